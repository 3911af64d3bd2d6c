//! The upward interface to the diagnostic session layer
//!
//! The transport never owns message payload. Incoming bytes are pushed into a
//! session-layer buffer one frame at a time, outgoing bytes are pulled one
//! frame at a time, and a terminal indication closes every transfer. The
//! embedding implements [Diag] on whatever its session layer is.

use crate::config::TaType;

/// Answer to a receive-buffer request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartResult {
    /// A buffer for the announced length is available
    Ok,
    /// The announced length can never fit
    Overflow,
    /// No buffer right now; the transport retries next tick
    Busy,
}

/// Outcome of a buffer copy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyResult {
    Ok,
    Error,
}

/// Terminal outcome of a reception
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxResult {
    Ok,
    Error,
}

/// Terminal outcome of a transmission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxResult {
    Ok,
    Error,
    /// The peer reported it cannot receive a message of this size
    Overflow,
}

/// The diagnostic session layer, as the transport sees it
pub trait Diag {
    /// Request a buffer for an incoming message of `total_len` bytes
    fn start_of_reception(&mut self, total_len: u16) -> StartResult;

    /// Append received bytes to the buffer granted by [Diag::start_of_reception]
    fn copy_rx_data(&mut self, src: &[u8]) -> CopyResult;

    /// Fill `dst` with the next bytes of the message being transmitted
    ///
    /// The transport never asks for more than remains of the size passed to
    /// [CanTp::transmit](crate::CanTp::transmit), so the request cannot fail.
    fn copy_tx_data(&mut self, dst: &mut [u8]);

    /// A reception finished, successfully or not
    fn rx_indication(&mut self, ta_type: TaType, result: RxResult);

    /// A transmission finished, successfully or not
    fn tx_confirmation(&mut self, result: TxResult);
}
