//! Receive-side frame acceptance and per-status handlers
//!
//! A reception claims its session-layer buffer from the periodic tick, not
//! from the frame callback, so a hostile peer hammering Single Frames costs
//! one allocation attempt per tick at most. Consecutive Frame payload is the
//! exception: it is copied to the session layer straight from the callback,
//! because a whole block can land between two ticks.

use crate::channel::{RxStatus, pad};
use crate::config::{Addressing, Duplex, TaType};
use crate::diag::{CopyResult, Diag, RxResult, StartResult};
use crate::driver::{CanBus, SendResult};
use crate::frame::{ConsecutiveFrame, FirstFrame, FlowStatus, FrameType, SingleFrame};
use crate::tp::{CanTp, Side};

impl<D: Diag, B: CanBus> CanTp<D, B> {
    /// Dispatch an inbound frame to receive channel `i` by frame type
    ///
    /// Flow Control never reaches a receive channel; reserved frame types and
    /// address-byte mismatches drop silently.
    pub(crate) fn accept_rx_frame(&mut self, i: usize, data: &[u8]) {
        let chan = &self.rx[i];
        if data.len() > chan.pci.capacity {
            return;
        }
        if chan.cfg.addressing != Addressing::Standard && data[0] != chan.cfg.ta {
            return;
        }
        if data.len() <= chan.pci.pci_pos {
            return;
        }
        match FrameType::of(&chan.pci, data) {
            Some(FrameType::Single) => self.receive_sf(i, data),
            Some(FrameType::First) => self.receive_ff(i, data),
            Some(FrameType::Consecutive) => self.receive_cf(i, data),
            Some(FrameType::FlowControl) | None => {}
        }
    }

    fn receive_sf(&mut self, i: usize, data: &[u8]) {
        let chan = &self.rx[i];
        // a new reception must not preempt a physical transmission, but
        // functional requests stay reachable during one
        if self.duplex == Duplex::Half
            && chan.cfg.ta_type != TaType::Functional
            && !self.phys_tx_idle()
        {
            return;
        }
        let Some(payload) = SingleFrame::new(chan.pci, data).payload(self.padding.is_some()) else {
            tracing::trace!("malformed SF on {:#X} dropped", chan.cfg.rx_id);
            return;
        };
        if chan.owns_buffer {
            // a late SF aborts the reception in progress on this channel
            self.diag
                .rx_indication(self.rx[i].cfg.ta_type, RxResult::Error);
        }
        let chan = &mut self.rx[i];
        chan.frame[..payload.len()].copy_from_slice(payload);
        chan.last_size = payload.len() as u8;
        chan.owns_buffer = false;
        chan.goto_recv_sf();
        tracing::debug!("SF rx      {:#X} {} bytes", chan.cfg.rx_id, chan.last_size);
    }

    fn receive_ff(&mut self, i: usize, data: &[u8]) {
        let chan = &self.rx[i];
        if chan.cfg.ta_type != TaType::Physical {
            return;
        }
        if self.duplex == Duplex::Half && !self.phys_tx_idle() {
            return;
        }
        // a First Frame always occupies the full frame
        if data.len() != chan.pci.capacity {
            return;
        }
        let ff = FirstFrame::new(chan.pci, data);
        let total = ff.total_size();
        if total == 0 {
            // 32-bit escape length: messages beyond 4095 bytes are refused
            tracing::warn!("escape-length FF on {:#X} rejected", chan.cfg.rx_id);
            return;
        }
        if total as usize <= chan.pci.max_sf_data() {
            tracing::trace!("FF announcing {total} bytes fits a SF, dropped");
            return;
        }
        if chan.owns_buffer {
            self.diag
                .rx_indication(self.rx[i].cfg.ta_type, RxResult::Error);
        }
        let chunk = ff.chunk();
        let chan = &mut self.rx[i];
        chan.frame[..chunk.len()].copy_from_slice(chunk);
        let max_data = chan.pci.max_data;
        chan.total_size = total;
        (chan.cf_cnt, chan.last_size) = crate::channel::segments(total, max_data);
        chan.owns_buffer = false;
        chan.goto_recv_ff();
        tracing::debug!(
            "FF rx      {:#X} {total} bytes in {} CFs",
            chan.cfg.rx_id,
            chan.cf_cnt
        );
    }

    fn receive_cf(&mut self, i: usize, data: &[u8]) {
        if self.duplex == Duplex::Half && !self.phys_tx_idle() {
            return;
        }
        let chan = &self.rx[i];
        if chan.status != RxStatus::RecvCf || chan.cf_cnt == 0 {
            // nobody asked for this CF
            return;
        }
        let cf = ConsecutiveFrame::new(chan.pci, data);
        let expected = (chan.sn + 1) & 0x0F;
        let received = cf.sn();
        if received != expected {
            tracing::warn!(
                "CF rx      {:#X} sn {received:#X}, expected {expected:#X}",
                chan.cfg.rx_id
            );
            self.diag
                .rx_indication(self.rx[i].cfg.ta_type, RxResult::Error);
            self.rx[i].goto_idle();
            return;
        }
        let seg_size = if chan.cf_cnt == 1 {
            chan.last_size as usize
        } else {
            chan.pci.max_data
        };
        let Some(payload) = cf.payload(seg_size) else {
            return;
        };
        let ta_type = chan.cfg.ta_type;

        let chan = &mut self.rx[i];
        chan.sn = expected;
        chan.cf_cnt -= 1;
        tracing::trace!(
            "CF rx      {:#X} sn {expected:#X}, {} CFs to go",
            chan.cfg.rx_id,
            chan.cf_cnt
        );
        // copy out immediately so a burst of CFs between two ticks cannot
        // outrun the staging buffer
        match self.diag.copy_rx_data(payload) {
            CopyResult::Ok => {
                let chan = &mut self.rx[i];
                chan.timer = chan.cfg.timer_c;
                if chan.bs != 0 && chan.cf_cnt != 0 {
                    chan.bs -= 1;
                    if chan.bs == 0 {
                        chan.goto_tran_fc(FlowStatus::ContinueToSend);
                    }
                }
            }
            CopyResult::Error => {
                tracing::error!("session layer refused {seg_size} bytes mid-transfer");
                self.diag.rx_indication(ta_type, RxResult::Error);
                self.rx[i].goto_idle();
            }
        }
    }

    pub(crate) fn period_rx(&mut self, i: usize) {
        match self.rx[i].status {
            RxStatus::Idle => {}
            RxStatus::RecvSf => self.period_recv_sf(i),
            RxStatus::RecvFf => self.period_recv_ff(i),
            RxStatus::RecvCf => self.period_recv_cf(i),
            RxStatus::TranFc(fs) => self.period_tran_fc(i, fs),
        }
    }

    /// Hand the staged Single Frame to the session layer
    fn period_recv_sf(&mut self, i: usize) {
        let len = self.rx[i].last_size as usize;
        let ta_type = self.rx[i].cfg.ta_type;
        match self.diag.start_of_reception(len as u16) {
            StartResult::Ok => {
                let result = self.diag.copy_rx_data(&self.rx[i].frame[..len]);
                match result {
                    CopyResult::Ok => self.diag.rx_indication(ta_type, RxResult::Ok),
                    CopyResult::Error => {
                        tracing::error!("session layer granted then refused {len} bytes");
                        self.diag.rx_indication(ta_type, RxResult::Error);
                    }
                }
                self.rx[i].goto_idle();
            }
            StartResult::Busy => {} // ask again next tick
            StartResult::Overflow => {
                self.diag.rx_indication(ta_type, RxResult::Error);
                self.rx[i].goto_idle();
            }
        }
    }

    /// Claim the reassembly buffer and answer the First Frame
    fn period_recv_ff(&mut self, i: usize) {
        let total = self.rx[i].total_size;
        let ta_type = self.rx[i].cfg.ta_type;
        match self.diag.start_of_reception(total) {
            StartResult::Ok => {
                let chunk_len = self.rx[i].pci.max_ff_data;
                let result = self.diag.copy_rx_data(&self.rx[i].frame[..chunk_len]);
                match result {
                    CopyResult::Ok => {
                        let chan = &mut self.rx[i];
                        chan.owns_buffer = true;
                        chan.goto_tran_fc(FlowStatus::ContinueToSend);
                    }
                    CopyResult::Error => {
                        tracing::error!("session layer granted then refused the FF chunk");
                        self.diag.rx_indication(ta_type, RxResult::Error);
                        self.rx[i].goto_idle();
                    }
                }
            }
            StartResult::Busy => {} // ask again next tick
            StartResult::Overflow => {
                tracing::debug!("{total} bytes exceed the session layer, answering overflow");
                self.rx[i].goto_tran_fc(FlowStatus::Overflow);
            }
        }
    }

    fn period_recv_cf(&mut self, i: usize) {
        if self.rx[i].cf_cnt == 0 {
            let chan = &mut self.rx[i];
            tracing::debug!(
                "RX done    {:#X} {} bytes reassembled",
                chan.cfg.rx_id,
                chan.total_size
            );
            let ta_type = chan.cfg.ta_type;
            self.diag.rx_indication(ta_type, RxResult::Ok);
            self.rx[i].goto_idle();
        }
    }

    /// Submit the pending Flow Control Frame
    fn period_tran_fc(&mut self, i: usize, fs: FlowStatus) {
        if self.rx[i].in_flight {
            return;
        }
        let padding = self.padding;
        let chan = &mut self.rx[i];
        let len = chan.make_fc_pci(fs);
        let wire = pad(&mut chan.frame, len, chan.pci.capacity, padding);
        let tx_id = chan.cfg.tx_id;
        if self.bus.send(tx_id, &self.rx[i].frame[..wire]) == SendResult::Ok {
            self.rx[i].in_flight = true;
            self.register_slot(Side::Rx(i), tx_id);
            tracing::debug!("FC tx      {tx_id:#X} {fs:?}");
        }
    }

    /// Returns true if the timeout killed the transfer and the channel must
    /// go idle
    pub(crate) fn timeout_rx(&mut self, i: usize) -> bool {
        let ta_type = self.rx[i].cfg.ta_type;
        match self.rx[i].status {
            RxStatus::Idle => false,
            // no buffer was claimed, nothing to report upward
            RxStatus::RecvSf => true,
            RxStatus::RecvFf => {
                if self.rx[i].wft > 0 {
                    // buy time with a wait frame instead of giving up
                    self.rx[i].wft -= 1;
                    self.rx[i].goto_tran_fc(FlowStatus::Wait);
                    false
                } else {
                    tracing::warn!("buffer wait exhausted on {:#X}", self.rx[i].cfg.rx_id);
                    self.diag.rx_indication(ta_type, RxResult::Error);
                    true
                }
            }
            RxStatus::RecvCf => {
                tracing::warn!("CF gap timeout on {:#X}", self.rx[i].cfg.rx_id);
                self.diag.rx_indication(ta_type, RxResult::Error);
                true
            }
            RxStatus::TranFc(fs) => {
                // a wait frame holds no buffer yet, so its death is private
                if fs != FlowStatus::Wait {
                    self.diag.rx_indication(ta_type, RxResult::Error);
                }
                true
            }
        }
    }

    /// The driver finished sending this channel's Flow Control Frame
    pub(crate) fn confirm_rx(&mut self, i: usize) {
        let chan = &mut self.rx[i];
        chan.in_flight = false;
        match chan.status {
            RxStatus::TranFc(FlowStatus::ContinueToSend) => chan.goto_recv_cf(),
            RxStatus::TranFc(FlowStatus::Wait) => {
                chan.status = RxStatus::RecvFf;
                chan.timer = chan.cfg.timer_b;
            }
            RxStatus::TranFc(FlowStatus::Overflow) => chan.goto_idle(),
            status => {
                tracing::warn!("TX confirmation for a receive channel in {status:?}");
            }
        }
    }
}
