use std::io::{BufWriter, IsTerminal, Write};

use cantp::{
    Addressing, CanBus, CanTp, ChannelConfig, CopyResult, Diag, Duplex, RxResult, SendResult,
    StackConfig, StartResult, TaType, TxResult, config::FILLER_BYTE, ticks,
};
use clap::Parser;

/// Simulate an ISO 15765-2 transfer between two transport stacks
///
/// A tester-side stack transmits a message to an ECU-side stack over an
/// in-memory bus; every frame on the wire is printed as a candump line.
#[derive(Debug, Parser)]
#[clap(version, verbatim_doc_comment)]
struct Args {
    #[clap(short, long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    /// Message size in bytes (1..=4095)
    #[clap(short, long, default_value_t = 20)]
    size: u16,

    /// Block size the receiver advertises; 0 streams without handshakes
    #[clap(short, long, default_value_t = 8)]
    block_size: u8,

    /// STmin byte the receiver advertises (0x00-0x7F ms, 0xF1-0xF9 µs)
    #[clap(long, default_value_t = 0)]
    st_min: u8,

    /// Use 64-byte CAN-FD frames
    #[clap(long)]
    fd: bool,

    /// Send frames unpadded
    #[clap(long)]
    no_padding: bool,
}

/// Scheduler period both stacks run at, in simulated milliseconds
const PERIOD_MS: u16 = 2;

const TESTER_TX: u32 = 0x7E0;
const ECU_TX: u32 = 0x7E8;

/// Session layer of the transmitting stack: hands out a deterministic
/// payload pattern
#[derive(Default)]
struct Source {
    data: Vec<u8>,
    cursor: usize,
    result: Option<TxResult>,
}

impl Diag for Source {
    fn start_of_reception(&mut self, _total_len: u16) -> StartResult {
        StartResult::Busy
    }

    fn copy_rx_data(&mut self, _src: &[u8]) -> CopyResult {
        CopyResult::Ok
    }

    fn copy_tx_data(&mut self, dst: &mut [u8]) {
        for byte in dst.iter_mut() {
            *byte = self.data.get(self.cursor).copied().unwrap_or(0);
            self.cursor += 1;
        }
    }

    fn rx_indication(&mut self, _ta_type: TaType, _result: RxResult) {}

    fn tx_confirmation(&mut self, result: TxResult) {
        self.result = Some(result);
    }
}

/// Session layer of the receiving stack: collects the reassembled message
#[derive(Default)]
struct Sink {
    data: Vec<u8>,
    result: Option<RxResult>,
}

impl Diag for Sink {
    fn start_of_reception(&mut self, total_len: u16) -> StartResult {
        self.data.reserve(total_len as usize);
        StartResult::Ok
    }

    fn copy_rx_data(&mut self, src: &[u8]) -> CopyResult {
        self.data.extend_from_slice(src);
        CopyResult::Ok
    }

    fn copy_tx_data(&mut self, dst: &mut [u8]) {
        dst.fill(0);
    }

    fn rx_indication(&mut self, _ta_type: TaType, result: RxResult) {
        self.result = Some(result);
    }

    fn tx_confirmation(&mut self, _result: TxResult) {}
}

/// A driver that parks frames until the main loop ferries them across
#[derive(Default)]
struct Wire {
    sent: Vec<(u32, Vec<u8>)>,
}

impl CanBus for Wire {
    fn send(&mut self, can_id: u32, frame: &[u8]) -> SendResult {
        self.sent.push((can_id, frame.to_vec()));
        SendResult::Ok
    }
}

fn channel(rx_id: u32, tx_id: u32, ta_type: TaType, args: &Args) -> ChannelConfig {
    ChannelConfig {
        addressing: Addressing::Standard,
        fd: args.fd,
        ta_type,
        rx_id,
        tx_id,
        timer_a: ticks(50, PERIOD_MS),
        timer_b: ticks(150, PERIOD_MS),
        timer_c: ticks(150, PERIOD_MS),
        ta: 0,
        st_min: args.st_min,
        block_size: args.block_size,
        max_wft: 15,
    }
}

/// Deliver everything `from` put on the wire: print it, confirm it, hand it
/// to the peer
fn ferry<DF: Diag, DT: Diag>(
    tick: u32,
    from: &mut CanTp<DF, Wire>,
    to: &mut CanTp<DT, Wire>,
    out: &mut impl Write,
) -> eyre::Result<()> {
    let frames: Vec<(u32, Vec<u8>)> = from.bus_mut().sent.drain(..).collect();
    for (can_id, frame) in frames {
        writeln!(
            out,
            "({tick:06}) vcan0 {can_id:03X}#{}",
            hex::encode_upper(&frame)
        )?;
        from.tx_confirmation(can_id);
        to.rx_indication(can_id, &frame);
    }
    Ok(())
}

fn main() -> eyre::Result<()> {
    let use_color = std::io::stderr().is_terminal();
    if use_color {
        color_eyre::install()?;
    }

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(args.log_level.into())
        .with_env_var("TPDUMP_LOG")
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(use_color)
        .with_writer(std::io::stderr)
        .init();

    let padding = if args.no_padding {
        None
    } else {
        Some(FILLER_BYTE)
    };

    let tester_config = StackConfig {
        rx: vec![channel(ECU_TX, TESTER_TX, TaType::Physical, &args)],
        tx: vec![channel(ECU_TX, TESTER_TX, TaType::Physical, &args)],
        duplex: Duplex::Half,
        padding,
        period_ms: PERIOD_MS,
    };
    let ecu_config = StackConfig {
        rx: vec![channel(TESTER_TX, ECU_TX, TaType::Physical, &args)],
        tx: vec![channel(TESTER_TX, ECU_TX, TaType::Physical, &args)],
        duplex: Duplex::Half,
        padding,
        period_ms: PERIOD_MS,
    };

    let message: Vec<u8> = (0..args.size).map(|i| i as u8).collect();
    let source = Source {
        data: message.clone(),
        ..Source::default()
    };
    let mut tester = CanTp::new(tester_config, source, Wire::default())?;
    let mut ecu = CanTp::new(ecu_config, Sink::default(), Wire::default())?;

    tester.transmit(0, args.size)?;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut tick = 0u32;
    while tester.diag().result.is_none() || ecu.diag().result.is_none() {
        tick += 1;
        if tick > 200_000 {
            eyre::bail!("transfer stalled after {tick} ticks");
        }
        tester.tick();
        ecu.tick();
        ferry(tick, &mut tester, &mut ecu, &mut out)?;
        ferry(tick, &mut ecu, &mut tester, &mut out)?;
    }

    match (tester.diag().result, ecu.diag().result) {
        (Some(TxResult::Ok), Some(RxResult::Ok)) if ecu.diag().data == message => {
            writeln!(out, "received {} bytes OK in {tick} ticks", args.size)?;
        }
        (tx, rx) => {
            eyre::bail!("transfer failed: tx {tx:?}, rx {rx:?}");
        }
    }
    out.flush()?;

    Ok(())
}
