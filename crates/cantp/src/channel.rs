//! Per-channel transport state
//!
//! Receive and transmit channels are separate records with separate state
//! enums; a channel runs at most one transfer at a time. The `timer` field is
//! a unified countdown in scheduler ticks where zero means "fired" (or "not
//! armed" — idle channels keep it at zero and are skipped by the scheduler).

use crate::config::{Addressing, ChannelConfig};
use crate::frame::{CF_PCI_VALUE, FC_PCI_VALUE, FF_PCI_VALUE, FlowStatus};
use crate::pci::{CLASSIC_FRAME_SIZE, MAX_FRAME_SIZE, PciLayout};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RxStatus {
    Idle,
    /// A Single Frame is staged, waiting for a session-layer buffer
    RecvSf,
    /// A First Frame is staged, waiting for a session-layer buffer
    RecvFf,
    /// Consecutive Frames are streaming in
    RecvCf,
    /// A Flow Control Frame with this flow status is queued for transmission
    TranFc(FlowStatus),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TxStatus {
    Idle,
    TranSf,
    TranFf,
    /// Consecutive Frames are streaming out, paced by `tx_delay`
    TranCf,
    /// Waiting for the peer's Flow Control Frame
    RecvFc,
}

pub(crate) struct RxChannel {
    pub(crate) cfg: ChannelConfig,
    pub(crate) pci: PciLayout,
    pub(crate) status: RxStatus,
    /// A staged frame has been handed to the driver and awaits confirmation
    pub(crate) in_flight: bool,
    pub(crate) timer: u16,
    /// Sequence number of the most recent accepted Consecutive Frame
    pub(crate) sn: u8,
    /// Consecutive Frames left in the current block; 0 = unlimited
    pub(crate) bs: u8,
    /// Remaining wait-frame budget for this reception
    pub(crate) wft: u8,
    /// Payload bytes in the last (or only) segment
    pub(crate) last_size: u8,
    pub(crate) total_size: u16,
    /// Consecutive Frames still expected, the last one included
    pub(crate) cf_cnt: u16,
    /// A session-layer buffer is held for the transfer in progress
    ///
    /// While false, a failed or preempted reception ends silently: surfacing
    /// an error for a transfer the session layer never heard about could abort
    /// somebody else's transfer instead.
    pub(crate) owns_buffer: bool,
    pub(crate) frame: [u8; MAX_FRAME_SIZE],
}

impl RxChannel {
    pub(crate) fn new(cfg: ChannelConfig) -> Self {
        let pci = PciLayout::new(cfg.addressing, cfg.fd);
        Self {
            cfg,
            pci,
            status: RxStatus::Idle,
            in_flight: false,
            timer: 0,
            sn: 0,
            bs: 0,
            wft: 0,
            last_size: 0,
            total_size: 0,
            cf_cnt: 0,
            owns_buffer: false,
            frame: [0; MAX_FRAME_SIZE],
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn is_idle(&self) -> bool {
        self.status == RxStatus::Idle
    }

    pub(crate) fn goto_idle(&mut self) {
        self.status = RxStatus::Idle;
        self.in_flight = false;
        self.owns_buffer = false;
        self.timer = 0;
    }

    pub(crate) fn goto_recv_sf(&mut self) {
        self.status = RxStatus::RecvSf;
        self.timer = self.cfg.timer_b;
    }

    pub(crate) fn goto_recv_ff(&mut self) {
        self.status = RxStatus::RecvFf;
        self.sn = 0;
        self.wft = self.cfg.max_wft;
        self.timer = self.cfg.timer_b;
    }

    pub(crate) fn goto_recv_cf(&mut self) {
        self.status = RxStatus::RecvCf;
        self.timer = self.cfg.timer_c;
    }

    pub(crate) fn goto_tran_fc(&mut self, fs: FlowStatus) {
        self.status = RxStatus::TranFc(fs);
        self.in_flight = false;
        self.bs = self.cfg.block_size;
        self.timer = self.cfg.timer_a;
    }

    /// Stage the Flow Control header; returns the unpadded wire length
    ///
    /// The advertised block size and STmin always come from the configuration,
    /// not from the countdown state of the transfer in progress.
    pub(crate) fn make_fc_pci(&mut self, fs: FlowStatus) -> usize {
        if self.cfg.addressing != Addressing::Standard {
            self.frame[0] = self.cfg.ta;
        }
        self.frame[self.pci.pci_pos] = FC_PCI_VALUE | fs.nibble();
        self.frame[self.pci.fc_bs_pos] = self.cfg.block_size;
        self.frame[self.pci.fc_st_pos] = self.cfg.st_min;
        self.pci.max_fc_data
    }
}

pub(crate) struct TxChannel {
    pub(crate) cfg: ChannelConfig,
    pub(crate) pci: PciLayout,
    pub(crate) status: TxStatus,
    pub(crate) in_flight: bool,
    pub(crate) timer: u16,
    /// Sequence number for the next Consecutive Frame
    pub(crate) sn: u8,
    /// Ticks until the next Consecutive Frame may be submitted
    pub(crate) tx_delay: u16,
    /// Separation time in ticks, translated from the peer's Flow Control
    pub(crate) st: u16,
    /// Frames left in the peer-granted block; 0 = unlimited
    pub(crate) bs: u8,
    pub(crate) last_size: u8,
    pub(crate) total_size: u16,
    pub(crate) cf_cnt: u16,
    pub(crate) frame: [u8; MAX_FRAME_SIZE],
}

impl TxChannel {
    pub(crate) fn new(cfg: ChannelConfig) -> Self {
        let pci = PciLayout::new(cfg.addressing, cfg.fd);
        Self {
            cfg,
            pci,
            status: TxStatus::Idle,
            in_flight: false,
            timer: 0,
            sn: 0,
            tx_delay: 0,
            st: 0,
            bs: 0,
            last_size: 0,
            total_size: 0,
            cf_cnt: 0,
            frame: [0; MAX_FRAME_SIZE],
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn is_idle(&self) -> bool {
        self.status == TxStatus::Idle
    }

    pub(crate) fn goto_idle(&mut self) {
        self.status = TxStatus::Idle;
        self.in_flight = false;
        self.timer = 0;
    }

    pub(crate) fn goto_tran_sf(&mut self) {
        self.status = TxStatus::TranSf;
        self.in_flight = false;
        self.timer = self.cfg.timer_a;
    }

    pub(crate) fn goto_tran_ff(&mut self) {
        self.status = TxStatus::TranFf;
        self.in_flight = false;
        self.sn = 0;
        self.timer = self.cfg.timer_a;
    }

    pub(crate) fn goto_tran_cf(&mut self) {
        self.status = TxStatus::TranCf;
        self.in_flight = false;
        self.tx_delay = self.st;
        self.timer = self.cfg.timer_c;
    }

    pub(crate) fn goto_recv_fc(&mut self) {
        self.status = TxStatus::RecvFc;
        self.timer = self.cfg.timer_b;
    }

    pub(crate) fn set_multiple_frame_size(&mut self, size: u16) {
        let (cf_cnt, last_size) = segments(size, self.pci.max_data);
        self.total_size = size;
        self.cf_cnt = cf_cnt;
        self.last_size = last_size;
    }

    /// Stage the Single Frame header; returns the payload slot as (pos, len)
    ///
    /// The length form follows the frame that actually goes out, because the
    /// peer selects its form by the received frame length: anything beyond 8
    /// bytes is read as the two-byte form. A padded CAN-FD link fills every
    /// frame to capacity, so it uses the two-byte form for every payload
    /// size; an unpadded link keeps payloads that fit in 8 bytes in the
    /// classical nibble form.
    pub(crate) fn make_sf_pci(&mut self, padded: bool) -> (usize, usize) {
        if self.cfg.addressing != Addressing::Standard {
            self.frame[0] = self.cfg.ta;
        }
        let len = self.last_size as usize;
        let one_byte_form = if self.pci.capacity <= CLASSIC_FRAME_SIZE {
            true
        } else if padded {
            false
        } else {
            self.pci.data_pos + len <= CLASSIC_FRAME_SIZE
        };
        if one_byte_form {
            self.frame[self.pci.pci_pos] = len as u8;
            (self.pci.data_pos, len)
        } else {
            // CAN-FD two-byte length form
            self.frame[self.pci.pci_pos] = 0x00;
            self.frame[self.pci.pci_pos + 1] = len as u8;
            (self.pci.data_pos + 1, len)
        }
    }

    /// Stage the First Frame header; returns the payload slot as (pos, len)
    pub(crate) fn make_ff_pci(&mut self) -> (usize, usize) {
        if self.cfg.addressing != Addressing::Standard {
            self.frame[0] = self.cfg.ta;
        }
        let total = self.total_size & 0x0FFF;
        self.frame[self.pci.pci_pos] = FF_PCI_VALUE | (total >> 8) as u8;
        self.frame[self.pci.pci_pos + 1] = total as u8;
        (self.pci.ff_data_pos, self.pci.max_ff_data)
    }

    /// Stage the Consecutive Frame header for the current sequence number
    pub(crate) fn make_cf_pci(&mut self) {
        if self.cfg.addressing != Addressing::Standard {
            self.frame[0] = self.cfg.ta;
        }
        self.frame[self.pci.pci_pos] = CF_PCI_VALUE | (self.sn & 0x0F);
    }
}

/// Segment a multi-frame message into its Consecutive Frame count and the
/// payload size of the final frame
///
/// The First Frame carries one byte less than a Consecutive Frame (its PCI is
/// two bytes), which is exactly what the +1 balances: the frames carry
/// `max_data - 1 + (cf_cnt - 1) * max_data + last_size == size` bytes.
pub(crate) fn segments(size: u16, max_data: usize) -> (u16, u8) {
    debug_assert!(max_data > 0);
    debug_assert!(size as usize >= max_data);
    let max_data = max_data as u16;
    ((size / max_data), (size % max_data + 1) as u8)
}

/// Fill the frame tail with the configured padding byte
///
/// Returns the wire length: the full capacity when padding, the unpadded
/// length otherwise.
pub(crate) fn pad(
    frame: &mut [u8; MAX_FRAME_SIZE],
    from: usize,
    capacity: usize,
    padding: Option<u8>,
) -> usize {
    match padding {
        Some(filler) => {
            for byte in &mut frame[from..capacity] {
                *byte = filler;
            }
            capacity
        }
        None => from,
    }
}
