//! Static channel and stack configuration
//!
//! Configuration is built in code by the embedding and is immutable once the
//! stack is constructed. Timer fields are expressed in scheduler ticks; the
//! [ticks] helper converts from milliseconds given the scheduler period.

/// How the target address travels on the wire
///
/// With [Addressing::Extended] and [Addressing::Mixed] the first byte of every
/// frame is a target-address byte and the protocol header shifts right by one,
/// which costs one payload byte per frame. [Addressing::Standard] carries no
/// address byte; the CAN identifier alone selects the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addressing {
    Standard,
    Extended,
    Mixed,
}

/// Physical (one-to-one) or functional (one-to-many) addressing
///
/// Functional channels are single-frame only: they never transmit multi-frame
/// messages and ignore First and Consecutive Frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaType {
    Physical,
    Functional,
}

/// Whether a reception and a transmission may overlap in time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Duplex {
    Full,
    Half,
}

/// Immutable per-channel configuration
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub addressing: Addressing,
    /// CAN-FD link: 64-byte frames instead of 8
    pub fd: bool,
    pub ta_type: TaType,
    /// Identifier this channel listens on
    pub rx_id: u32,
    /// Identifier this channel transmits on
    pub tx_id: u32,
    /// Frame-transmission watchdog (N_As / N_Ar), in ticks
    pub timer_a: u16,
    /// Flow-control wait (N_Bs / N_Br), in ticks
    pub timer_b: u16,
    /// Consecutive-frame gap watchdog (N_Cs / N_Cr), in ticks
    pub timer_c: u16,
    /// Target-address byte, compared and stamped for extended/mixed addressing
    pub ta: u8,
    /// Raw STmin byte advertised in outgoing Flow Control Frames
    pub st_min: u8,
    /// Block size advertised in outgoing Flow Control Frames; 0 = no limit
    pub block_size: u8,
    /// Wait Frame Transmissions budget per reception
    pub max_wft: u8,
}

/// Configuration for a whole [CanTp](crate::CanTp) instance
#[derive(Clone, Debug)]
pub struct StackConfig {
    pub rx: Vec<ChannelConfig>,
    pub tx: Vec<ChannelConfig>,
    pub duplex: Duplex,
    /// Fill byte for short frames; `None` sends unpadded frames
    pub padding: Option<u8>,
    /// Scheduler period in milliseconds, used to translate peer STmin requests
    pub period_ms: u16,
}

/// Default fill byte for padded frames
pub const FILLER_BYTE: u8 = 0xCC;

/// Convert a millisecond budget into scheduler ticks
pub const fn ticks(ms: u16, period_ms: u16) -> u16 {
    ms / period_ms
}
