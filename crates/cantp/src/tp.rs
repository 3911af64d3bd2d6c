//! The transport stack: channels, scheduler, and driver entry points
//!
//! One [CanTp] owns every receive and transmit channel plus the registry of
//! frames currently at the driver. The embedding drives it from a single
//! logical task: [CanTp::tick] once per scheduler period, and
//! [CanTp::rx_indication] / [CanTp::tx_confirmation] from the CAN driver,
//! serialized with the tick. `&mut self` everywhere makes that single-writer
//! rule a compile-time fact rather than an integration note.
//!
//! A tick services every receive channel, then every transmit channel: a
//! channel whose timer has run out gets its timeout handler (and is forced
//! idle if the handler reports the transfer dead), any other non-idle channel
//! gets one unit of periodic work — one buffer-allocation attempt, one copy,
//! at most one frame submission.

use crate::channel::{RxChannel, TxChannel};
use crate::config::{Duplex, StackConfig, TaType};
use crate::diag::Diag;
use crate::driver::CanBus;
use crate::frame::MAX_MESSAGE_SIZE;
use crate::pci::MAX_FRAME_SIZE;

/// A channel reference in the transmitting registry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Rx(usize),
    Tx(usize),
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    side: Side,
    tx_id: u32,
}

/// The CAN transport stack
///
/// Generic over the session layer `D` and the CAN driver `B`, both owned.
pub struct CanTp<D, B> {
    pub(crate) rx: Vec<RxChannel>,
    pub(crate) tx: Vec<TxChannel>,
    /// Frames handed to the driver and not yet confirmed
    slots: Vec<Option<Slot>>,
    /// The physical channels consulted by the half-duplex policy
    phys_rx: Option<usize>,
    phys_tx: Option<usize>,
    pub(crate) duplex: Duplex,
    pub(crate) padding: Option<u8>,
    pub(crate) period_ms: u16,
    pub(crate) diag: D,
    pub(crate) bus: B,
}

impl<D: Diag, B: CanBus> CanTp<D, B> {
    /// Build the stack from its configuration
    pub fn new(config: StackConfig, diag: D, bus: B) -> eyre::Result<Self> {
        eyre::ensure!(
            config.period_ms > 0,
            "scheduler period must be at least 1 ms"
        );
        for (name, channels) in [("rx", &config.rx), ("tx", &config.tx)] {
            for (i, chan) in channels.iter().enumerate() {
                if channels[..i].iter().any(|c| c.rx_id == chan.rx_id) {
                    eyre::bail!(
                        "duplicate {name} channel listen id {:#X}: only the first would ever match",
                        chan.rx_id
                    );
                }
            }
        }

        let phys_rx = config.rx.iter().position(|c| c.ta_type == TaType::Physical);
        let phys_tx = config.tx.iter().position(|c| c.ta_type == TaType::Physical);
        let rx: Vec<RxChannel> = config.rx.into_iter().map(RxChannel::new).collect();
        let tx: Vec<TxChannel> = config.tx.into_iter().map(TxChannel::new).collect();
        let slots = vec![None; rx.len() + tx.len()];

        Ok(Self {
            rx,
            tx,
            slots,
            phys_rx,
            phys_tx,
            duplex: config.duplex,
            padding: config.padding,
            period_ms: config.period_ms,
            diag,
            bus,
        })
    }

    /// Begin transmitting a `size`-byte message on the given transmit channel
    ///
    /// The payload is pulled lazily through [Diag::copy_tx_data] as frames go
    /// out; nothing is copied here. Errors reject the request without touching
    /// any transfer in progress.
    pub fn transmit(&mut self, handle: usize, size: u16) -> eyre::Result<()> {
        let Some(chan) = self.tx.get(handle) else {
            eyre::bail!("no transmit channel {handle}");
        };
        eyre::ensure!(size > 0, "cannot transmit an empty message");
        eyre::ensure!(
            size <= MAX_MESSAGE_SIZE,
            "{size} bytes does not fit the 12-bit length field"
        );
        eyre::ensure!(chan.is_idle(), "transmit channel {handle} is busy");
        if self.duplex == Duplex::Half && !self.phys_rx_idle() {
            eyre::bail!("half-duplex: a reception is in progress");
        }

        let chan = &mut self.tx[handle];
        if size as usize > chan.pci.max_sf_data() {
            eyre::ensure!(
                chan.cfg.ta_type == TaType::Physical,
                "functional channels carry single frames only"
            );
            chan.set_multiple_frame_size(size);
            chan.goto_tran_ff();
        } else {
            chan.last_size = size as u8;
            chan.total_size = size;
            chan.cf_cnt = 0;
            chan.goto_tran_sf();
        }
        tracing::debug!(
            "TX start   {:#X} {size} bytes ({} CFs)",
            chan.cfg.tx_id,
            chan.cf_cnt
        );
        Ok(())
    }

    /// Entry point for an inbound CAN frame
    ///
    /// A transmit channel listening on this identifier gets first refusal, and
    /// takes the frame only if it is the Flow Control it is waiting for; any
    /// other frame type falls through to the receive channel. Frames that fit
    /// no channel are dropped without a trace of protocol activity.
    pub fn rx_indication(&mut self, can_id: u32, data: &[u8]) {
        if data.is_empty() || data.len() > MAX_FRAME_SIZE {
            return;
        }
        if let Some(i) = self.tx.iter().position(|c| c.cfg.rx_id == can_id) {
            if self.accept_fc(i, data) {
                return;
            }
        }
        if let Some(i) = self.rx.iter().position(|c| c.cfg.rx_id == can_id) {
            self.accept_rx_frame(i, data);
        }
    }

    /// Entry point for a CAN send completion
    ///
    /// Matches the identifier against the transmitting registry; a completion
    /// nothing is waiting for is ignored.
    pub fn tx_confirmation(&mut self, can_id: u32) {
        let found = self
            .slots
            .iter()
            .position(|slot| slot.is_some_and(|s| s.tx_id == can_id));
        let Some(idx) = found else {
            tracing::trace!("unclaimed TX confirmation for {can_id:#X}");
            return;
        };
        let slot = self.slots[idx].take().expect("slot was just matched");
        match slot.side {
            Side::Rx(i) => self.confirm_rx(i),
            Side::Tx(i) => self.confirm_tx(i),
        }
    }

    /// Advance every channel by one scheduler period
    pub fn tick(&mut self) {
        for i in 0..self.rx.len() {
            self.tick_rx(i);
        }
        for i in 0..self.tx.len() {
            self.tick_tx(i);
        }
    }

    fn tick_rx(&mut self, i: usize) {
        if self.rx[i].is_idle() {
            return;
        }
        if self.rx[i].timer == 0 {
            if self.timeout_rx(i) {
                self.rx[i].goto_idle();
                self.release_slot(Side::Rx(i));
            }
        } else {
            self.rx[i].timer -= 1;
            self.period_rx(i);
        }
    }

    fn tick_tx(&mut self, i: usize) {
        if self.tx[i].is_idle() {
            return;
        }
        if self.tx[i].timer == 0 {
            if self.timeout_tx(i) {
                self.tx[i].goto_idle();
                self.release_slot(Side::Tx(i));
            }
        } else {
            self.tx[i].timer -= 1;
            self.period_tx(i);
        }
    }

    /// Record a frame handed to the driver
    pub(crate) fn register_slot(&mut self, side: Side, tx_id: u32) {
        let free = self
            .slots
            .iter()
            .position(Option::is_none)
            .expect("one slot per channel, one frame in flight per channel");
        self.slots[free] = Some(Slot { side, tx_id });
    }

    /// Drop any registry entry for a channel whose transfer just died
    fn release_slot(&mut self, side: Side) {
        for slot in &mut self.slots {
            if slot.is_some_and(|s| s.side == side) {
                *slot = None;
            }
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn phys_tx_idle(&self) -> bool {
        self.phys_tx.is_none_or(|i| self.tx[i].is_idle())
    }

    #[inline]
    #[must_use]
    pub(crate) fn phys_rx_idle(&self) -> bool {
        self.phys_rx.is_none_or(|i| self.rx[i].is_idle())
    }

    pub fn diag(&self) -> &D {
        &self.diag
    }

    pub fn diag_mut(&mut self) -> &mut D {
        &mut self.diag
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::channel::RxStatus;
    use crate::config::{Addressing, ChannelConfig};
    use crate::diag::RxResult;
    use crate::testutil::{MockDiag, VecBus, half_duplex_config, pump, std_config};

    fn stack(config: StackConfig) -> CanTp<MockDiag, VecBus> {
        CanTp::new(config, MockDiag::default(), VecBus::default()).unwrap()
    }

    #[test]
    fn test_rejects_zero_period() {
        let mut config = std_config();
        config.period_ms = 0;
        let result = CanTp::new(config, MockDiag::default(), VecBus::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_shadowed_listen_id() {
        let mut config = std_config();
        let dup: ChannelConfig = config.rx[0].clone();
        config.rx.push(dup);
        let result = CanTp::new(config, MockDiag::default(), VecBus::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let mut tp = stack(std_config());
        tp.rx_indication(0x123, &[0x03, 1, 2, 3, 0, 0, 0, 0]);
        tp.tx_confirmation(0x123);
        tp.tick();
        assert!(tp.diag().rx_events.is_empty());
        assert!(tp.bus().sent.is_empty());
    }

    #[test]
    fn test_timer_decrements_once_per_tick() {
        let mut tp = stack(std_config());
        tp.rx_indication(0x7E0, &[0x02, 0x3E, 0x00, 0, 0, 0, 0, 0]);
        tp.diag_mut().start_default = crate::diag::StartResult::Busy;

        let timer_b = tp.rx[0].cfg.timer_b;
        assert_eq!(tp.rx[0].timer, timer_b);
        for n in 1..=5 {
            tp.tick();
            assert_eq!(tp.rx[0].timer, timer_b - n);
        }
    }

    #[test]
    fn test_half_duplex_blocks_transmit_while_receiving() {
        let mut tp = stack(half_duplex_config());
        tp.rx_indication(0x7E0, &[0x10, 0x14, 1, 2, 3, 4, 5, 6]);
        assert_eq!(tp.rx[0].status, RxStatus::RecvFf);
        assert!(tp.transmit(0, 10).is_err());
    }

    #[test]
    fn test_transmit_argument_checks() {
        let mut tp = stack(std_config());
        assert!(tp.transmit(9, 10).is_err());
        assert!(tp.transmit(0, 0).is_err());
        assert!(tp.transmit(0, 4096).is_err());

        tp.transmit(0, 10).unwrap();
        // the channel is busy until the transfer ends
        assert!(tp.transmit(0, 3).is_err());
    }

    /// Feed every frame the sender emits straight into the receiver and back
    fn run_transfer(
        sender: &mut CanTp<MockDiag, VecBus>,
        receiver: &mut CanTp<MockDiag, VecBus>,
        max_ticks: usize,
        case: &str,
    ) {
        for _ in 0..max_ticks {
            sender.tick();
            receiver.tick();
            for (id, frame) in pump(sender) {
                receiver.rx_indication(id, &frame);
            }
            for (id, frame) in pump(receiver) {
                sender.rx_indication(id, &frame);
            }
            if !sender.diag().tx_events.is_empty() && !receiver.diag().rx_events.is_empty() {
                return;
            }
        }
        panic!("{case}: transfer did not finish within {max_ticks} ticks");
    }

    /// Put every channel of both stacks on the given addressing family
    fn apply_family(config: &mut StackConfig, addressing: Addressing, fd: bool) {
        for chan in config.rx.iter_mut().chain(config.tx.iter_mut()) {
            chan.addressing = addressing;
            chan.fd = fd;
            chan.ta = 0x2A;
        }
    }

    /// Two stacks wired back to back reproduce the original message for
    /// every addressing family, message size, and block/separation parameters
    #[test]
    fn test_round_trip() {
        for &(addressing, fd) in &[
            (Addressing::Standard, false),
            (Addressing::Standard, true),
            (Addressing::Extended, false),
            (Addressing::Mixed, true),
        ] {
            for &(size, block_size, st_min) in &[
                (1u16, 8u8, 0u8),
                (3, 8, 0),
                (6, 8, 0),
                (7, 8, 0),
                (8, 0, 0),
                (10, 1, 0),
                (20, 2, 5),
                (27, 2, 5),
                (62, 4, 1),
                (63, 8, 0),
                (100, 0, 0),
                (585, 16, 0),
                (4095, 0, 0),
            ] {
                let mut receiver_config = std_config();
                receiver_config.rx[0].block_size = block_size;
                receiver_config.rx[0].st_min = st_min;
                apply_family(&mut receiver_config, addressing, fd);
                let mut receiver = stack(receiver_config);

                // the sender listens where the receiver talks
                let mut sender_config = std_config();
                sender_config.rx[0].rx_id = 0x7E8;
                sender_config.rx[0].tx_id = 0x7E0;
                sender_config.rx[1].rx_id = 0x7DE;
                sender_config.tx[0].rx_id = 0x7E8;
                sender_config.tx[0].tx_id = 0x7E0;
                apply_family(&mut sender_config, addressing, fd);
                let mut sender = stack(sender_config);

                let case = format!(
                    "{addressing:?} fd {fd} size {size} bs {block_size} st {st_min}"
                );
                let message: Vec<u8> = (0..size).map(|i| i as u8).collect();
                sender.diag_mut().tx_data = message.clone();
                sender.transmit(0, size).unwrap();
                run_transfer(&mut sender, &mut receiver, 9000, &case);
                assert_eq!(
                    sender.diag().tx_events,
                    vec![crate::diag::TxResult::Ok],
                    "{case}"
                );
                assert_eq!(
                    receiver.diag().rx_events,
                    vec![(TaType::Physical, RxResult::Ok)],
                    "{case}"
                );
                assert_eq!(receiver.diag().rx_data, message, "{case}");
            }
        }
    }

    /// A late confirmation for a transfer the watchdog already killed must
    /// not disturb the idle channel
    #[test]
    fn test_stale_confirmation_is_dropped() {
        let mut config = std_config();
        config.tx[0].timer_a = 1;
        let mut tp = stack(config);

        tp.transmit(0, 3).unwrap();
        tp.tick(); // submits the SF, nobody confirms
        assert_eq!(tp.bus_mut().sent.drain(..).count(), 1);
        tp.tick(); // timer A expires
        assert_eq!(tp.diag().tx_events, vec![crate::diag::TxResult::Error]);

        tp.tx_confirmation(0x7E8);
        assert!(tp.tx[0].is_idle());
        assert_eq!(tp.diag().tx_events.len(), 1);
    }
}
