//! Transmit-side frame pacing and per-status handlers
//!
//! Payload is pulled from the session layer one frame at a time, immediately
//! before each submit. Consecutive Frames are paced by `tx_delay`, reloaded
//! from the translated STmin after every confirmation, and the peer-granted
//! block budget decides when to stop and wait for the next Flow Control.

use crate::channel::{TxStatus, pad};
use crate::config::{Addressing, Duplex};
use crate::diag::{Diag, TxResult};
use crate::driver::{CanBus, SendResult};
use crate::frame::{FlowControl, FlowStatus, FrameType, st_min_ticks};
use crate::tp::{CanTp, Side};

impl<D: Diag, B: CanBus> CanTp<D, B> {
    /// Offer an inbound frame to transmit channel `i`
    ///
    /// A transmit channel consumes nothing but the Flow Control Frame it is
    /// waiting for; returns false to let the frame fall through to a receive
    /// channel.
    pub(crate) fn accept_fc(&mut self, i: usize, data: &[u8]) -> bool {
        let chan = &self.tx[i];
        if data.len() > chan.pci.capacity {
            return false;
        }
        if chan.cfg.addressing != Addressing::Standard && data[0] != chan.cfg.ta {
            return false;
        }
        if data.len() <= chan.pci.pci_pos {
            return false;
        }
        if FrameType::of(&chan.pci, data) != Some(FrameType::FlowControl) {
            return false;
        }
        if self.duplex == Duplex::Half && !self.phys_rx_idle() {
            return false;
        }
        if chan.status != TxStatus::RecvFc {
            return false;
        }
        if data.len() < chan.pci.max_fc_data {
            return false;
        }

        let fc = FlowControl::new(chan.pci, data);
        match FlowStatus::from_nibble(fc.fs_raw()) {
            Some(FlowStatus::ContinueToSend) => {
                let block_size = fc.block_size();
                let st = st_min_ticks(fc.st_min(), self.period_ms);
                let chan = &mut self.tx[i];
                chan.bs = block_size;
                chan.st = st;
                chan.goto_tran_cf();
                tracing::debug!(
                    "FC rx      {:#X} CTS bs {block_size} st {st} ticks",
                    chan.cfg.rx_id
                );
            }
            Some(FlowStatus::Wait) => {
                tracing::debug!("FC rx      {:#X} wait", chan.cfg.rx_id);
                let chan = &mut self.tx[i];
                chan.timer = chan.cfg.timer_b;
            }
            Some(FlowStatus::Overflow) => {
                tracing::warn!("peer cannot take {} bytes", chan.total_size);
                self.diag.tx_confirmation(TxResult::Overflow);
                self.tx[i].goto_idle();
            }
            None => {
                tracing::warn!("reserved flow status {:#X}", fc.fs_raw());
                self.diag.tx_confirmation(TxResult::Error);
                self.tx[i].goto_idle();
            }
        }
        true
    }

    pub(crate) fn period_tx(&mut self, i: usize) {
        match self.tx[i].status {
            TxStatus::Idle | TxStatus::RecvFc => {}
            TxStatus::TranSf => self.period_tran_sf(i),
            TxStatus::TranFf => self.period_tran_ff(i),
            TxStatus::TranCf => self.period_tran_cf(i),
        }
    }

    fn period_tran_sf(&mut self, i: usize) {
        if self.tx[i].in_flight {
            return;
        }
        let padding = self.padding;
        let (pos, len) = self.tx[i].make_sf_pci(padding.is_some());
        self.diag.copy_tx_data(&mut self.tx[i].frame[pos..pos + len]);
        let chan = &mut self.tx[i];
        let wire = pad(&mut chan.frame, pos + len, chan.pci.capacity, padding);
        let tx_id = chan.cfg.tx_id;
        if self.bus.send(tx_id, &self.tx[i].frame[..wire]) == SendResult::Ok {
            self.tx[i].in_flight = true;
            self.register_slot(Side::Tx(i), tx_id);
            tracing::debug!("SF tx      {tx_id:#X} {len} bytes");
        }
    }

    fn period_tran_ff(&mut self, i: usize) {
        if self.tx[i].in_flight {
            return;
        }
        let (pos, len) = self.tx[i].make_ff_pci();
        self.diag.copy_tx_data(&mut self.tx[i].frame[pos..pos + len]);
        let chan = &self.tx[i];
        let tx_id = chan.cfg.tx_id;
        // a First Frame has no tail to pad
        debug_assert_eq!(pos + len, chan.pci.capacity);
        if self.bus.send(tx_id, &self.tx[i].frame[..pos + len]) == SendResult::Ok {
            self.tx[i].in_flight = true;
            self.register_slot(Side::Tx(i), tx_id);
            tracing::debug!(
                "FF tx      {tx_id:#X} announcing {} bytes",
                self.tx[i].total_size
            );
        }
    }

    fn period_tran_cf(&mut self, i: usize) {
        if self.tx[i].in_flight {
            return;
        }
        debug_assert!(self.tx[i].cf_cnt > 0);
        let chan = &mut self.tx[i];
        if chan.tx_delay != 0 {
            chan.tx_delay -= 1;
        }
        if chan.tx_delay == 0 {
            self.transmit_cf(i);
        }
    }

    fn transmit_cf(&mut self, i: usize) {
        let padding = self.padding;
        let chan = &mut self.tx[i];
        chan.make_cf_pci();
        let remaining = chan.cf_cnt - 1;
        let len = if remaining == 0 {
            chan.last_size as usize
        } else {
            chan.pci.max_data
        };
        let pos = chan.pci.data_pos;
        self.diag.copy_tx_data(&mut self.tx[i].frame[pos..pos + len]);
        let chan = &mut self.tx[i];
        let wire = pad(&mut chan.frame, pos + len, chan.pci.capacity, padding);
        let tx_id = chan.cfg.tx_id;
        if self.bus.send(tx_id, &self.tx[i].frame[..wire]) == SendResult::Ok {
            let chan = &mut self.tx[i];
            chan.cf_cnt = remaining;
            chan.in_flight = true;
            let sn = chan.sn & 0x0F;
            self.register_slot(Side::Tx(i), tx_id);
            tracing::trace!(
                "CF tx      {tx_id:#X} sn {:#X}, {remaining} to go",
                sn
            );
        }
    }

    /// Returns true if the timeout killed the transfer and the channel must
    /// go idle
    pub(crate) fn timeout_tx(&mut self, i: usize) -> bool {
        match self.tx[i].status {
            TxStatus::Idle => false,
            status => {
                tracing::warn!("{status:?} watchdog expired on {:#X}", self.tx[i].cfg.tx_id);
                self.diag.tx_confirmation(TxResult::Error);
                true
            }
        }
    }

    /// The driver finished sending this channel's frame
    pub(crate) fn confirm_tx(&mut self, i: usize) {
        match self.tx[i].status {
            TxStatus::TranSf => {
                self.diag.tx_confirmation(TxResult::Ok);
                self.tx[i].goto_idle();
                tracing::debug!("TX done    {:#X} single frame", self.tx[i].cfg.tx_id);
            }
            TxStatus::TranFf => {
                let chan = &mut self.tx[i];
                chan.in_flight = false;
                // the First Frame spent sequence number zero
                chan.sn = (chan.sn + 1) & 0x0F;
                chan.goto_recv_fc();
            }
            TxStatus::TranCf => self.confirm_cf(i),
            status => {
                tracing::warn!("TX confirmation for a transmit channel in {status:?}");
            }
        }
    }

    fn confirm_cf(&mut self, i: usize) {
        let chan = &mut self.tx[i];
        debug_assert!(chan.in_flight);
        chan.in_flight = false;
        chan.sn = (chan.sn + 1) & 0x0F;

        if chan.cf_cnt == 0 {
            tracing::debug!("TX done    {:#X} {} bytes", chan.cfg.tx_id, chan.total_size);
            self.diag.tx_confirmation(TxResult::Ok);
            self.tx[i].goto_idle();
        } else if chan.bs != 0 {
            chan.bs -= 1;
            if chan.bs == 0 {
                // block spent, the peer owes us another Flow Control
                chan.goto_recv_fc();
            } else {
                chan.tx_delay = chan.st;
                chan.timer = chan.cfg.timer_c;
            }
        } else {
            chan.tx_delay = chan.st;
            chan.timer = chan.cfg.timer_c;
        }
    }
}
