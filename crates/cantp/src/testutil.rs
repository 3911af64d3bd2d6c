//! Scripted session layer, recording bus, and config fixtures for the unit
//! tests

use std::collections::VecDeque;

use crate::config::{Addressing, ChannelConfig, Duplex, StackConfig, TaType};
use crate::diag::{CopyResult, Diag, RxResult, StartResult, TxResult};
use crate::driver::{CanBus, SendResult};
use crate::tp::CanTp;

/// A session layer that records every interaction and answers from a script
pub(crate) struct MockDiag {
    /// Scripted answers for `start_of_reception`, consumed front to back
    pub(crate) start_results: VecDeque<StartResult>,
    /// Answer once the script runs out
    pub(crate) start_default: StartResult,
    /// Every `start_of_reception` request, in order
    pub(crate) starts: Vec<u16>,
    /// Everything pushed through `copy_rx_data`
    pub(crate) rx_data: Vec<u8>,
    pub(crate) rx_events: Vec<(TaType, RxResult)>,
    /// Source bytes for `copy_tx_data`
    pub(crate) tx_data: Vec<u8>,
    tx_cursor: usize,
    pub(crate) tx_events: Vec<TxResult>,
}

impl Default for MockDiag {
    fn default() -> Self {
        Self {
            start_results: VecDeque::new(),
            start_default: StartResult::Ok,
            starts: Vec::new(),
            rx_data: Vec::new(),
            rx_events: Vec::new(),
            tx_data: Vec::new(),
            tx_cursor: 0,
            tx_events: Vec::new(),
        }
    }
}

impl Diag for MockDiag {
    fn start_of_reception(&mut self, total_len: u16) -> StartResult {
        self.starts.push(total_len);
        self.start_results
            .pop_front()
            .unwrap_or(self.start_default)
    }

    fn copy_rx_data(&mut self, src: &[u8]) -> CopyResult {
        self.rx_data.extend_from_slice(src);
        CopyResult::Ok
    }

    fn copy_tx_data(&mut self, dst: &mut [u8]) {
        for byte in dst.iter_mut() {
            *byte = self.tx_data.get(self.tx_cursor).copied().unwrap_or(0);
            self.tx_cursor += 1;
        }
    }

    fn rx_indication(&mut self, ta_type: TaType, result: RxResult) {
        self.rx_events.push((ta_type, result));
    }

    fn tx_confirmation(&mut self, result: TxResult) {
        self.tx_events.push(result);
    }
}

/// A driver that records submitted frames instead of sending them
#[derive(Default)]
pub(crate) struct VecBus {
    pub(crate) sent: Vec<(u32, Vec<u8>)>,
    /// Refuse this many submissions before accepting again
    pub(crate) refuse: usize,
}

impl CanBus for VecBus {
    fn send(&mut self, can_id: u32, frame: &[u8]) -> SendResult {
        if self.refuse > 0 {
            self.refuse -= 1;
            return SendResult::Error;
        }
        self.sent.push((can_id, frame.to_vec()));
        SendResult::Ok
    }
}

/// A physical channel on the usual OBD identifiers
pub(crate) fn channel_config() -> ChannelConfig {
    ChannelConfig {
        addressing: Addressing::Standard,
        fd: false,
        ta_type: TaType::Physical,
        rx_id: 0x7E0,
        tx_id: 0x7E8,
        timer_a: 25,
        timer_b: 75,
        timer_c: 75,
        ta: 0,
        st_min: 10,
        block_size: 8,
        max_wft: 15,
    }
}

pub(crate) fn extended_channel_config(ta: u8) -> ChannelConfig {
    ChannelConfig {
        addressing: Addressing::Extended,
        ta,
        ..channel_config()
    }
}

/// Two receive channels (physical + functional) and one transmit channel
pub(crate) fn std_config() -> StackConfig {
    let phys = channel_config();
    let func = ChannelConfig {
        ta_type: TaType::Functional,
        rx_id: 0x7DF,
        ..channel_config()
    };
    StackConfig {
        rx: vec![phys.clone(), func],
        tx: vec![phys],
        duplex: Duplex::Full,
        padding: Some(0xCC),
        period_ms: 2,
    }
}

pub(crate) fn half_duplex_config() -> StackConfig {
    StackConfig {
        duplex: Duplex::Half,
        ..std_config()
    }
}

pub(crate) fn stack(config: StackConfig) -> CanTp<MockDiag, VecBus> {
    CanTp::new(config, MockDiag::default(), VecBus::default()).unwrap()
}

/// Drain the recorded frames and confirm each one back to the stack, the way
/// a driver whose send completes in place would
pub(crate) fn pump(tp: &mut CanTp<MockDiag, VecBus>) -> Vec<(u32, Vec<u8>)> {
    let sent: Vec<(u32, Vec<u8>)> = tp.bus_mut().sent.drain(..).collect();
    for (can_id, _) in &sent {
        tp.tx_confirmation(*can_id);
    }
    sent
}
