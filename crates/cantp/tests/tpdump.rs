use cantp_test::{CommandExt, tool};

#[test]
fn test_single_frame_transfer() {
    let output = tool!("tpdump").arg("--size=3").captured_output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("vcan0 7E0#03000102"));
    assert!(lines[1].starts_with("received 3 bytes OK"));
}

#[test]
fn test_multi_frame_transfer() {
    let output = tool!("tpdump")
        .args(["--size=20", "--block-size=2", "--st-min=5"])
        .captured_output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let first_frames = stdout.lines().filter(|l| l.contains("7E0#10")).count();
    let flow_controls = stdout.lines().filter(|l| l.contains("7E8#30")).count();
    let consecutive = stdout.lines().filter(|l| l.contains("7E0#2")).count();
    assert_eq!(first_frames, 1);
    assert_eq!(flow_controls, 1);
    assert_eq!(consecutive, 2);
    assert!(stdout.contains("received 20 bytes OK"));
}

#[test]
fn test_block_handshakes_appear_on_the_wire() {
    let output = tool!("tpdump")
        .args(["--size=100", "--block-size=4"])
        .captured_output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    // 100 bytes = FF + 14 CFs; BS=4 answers the FF and every 4th CF but the last
    let flow_controls = stdout.lines().filter(|l| l.contains("7E8#30")).count();
    assert_eq!(flow_controls, 4);
    assert!(stdout.contains("received 100 bytes OK"));
}

#[test]
fn test_oversized_message_is_refused() {
    let output = tool!("tpdump").arg("--size=4096").captured_output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_fd_short_single_frame() {
    let output = tool!("tpdump")
        .args(["--size=3", "--fd"])
        .captured_output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    // padded CAN-FD single frames carry the two-byte length form
    assert!(stdout.contains("7E0#0003000102"));
    assert!(stdout.contains("received 3 bytes OK"));
}

#[test]
fn test_fd_transfer() {
    let output = tool!("tpdump")
        .args(["--size=200", "--fd"])
        .captured_output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    // 200 bytes = FF(62) + CF(63) + CF(63) + CF(12)
    let consecutive = stdout.lines().filter(|l| l.contains("7E0#2")).count();
    assert_eq!(consecutive, 3);
    assert!(stdout.contains("received 200 bytes OK"));
}
