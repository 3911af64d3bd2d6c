//! An ISO 15765-2 (CAN-TP) transport layer for flash bootloaders
//!
//! A diagnostic message is up to 4095 bytes; a CAN frame carries 8 (classical)
//! or 64 (CAN-FD) bytes. This crate segments outgoing messages into Single,
//! First, and Consecutive Frames, reassembles incoming ones, and runs the flow
//! control handshake (block size, separation time, wait frames) with the peer.
//!
//! The core is [CanTp]: a set of per-channel state machines advanced by a
//! cooperative [CanTp::tick] that the embedding must call once per scheduler
//! period, plus the two driver entry points [CanTp::rx_indication] and
//! [CanTp::tx_confirmation]. Payload never lives inside the transport: it is
//! pulled from and pushed to the session layer through the [Diag] trait one
//! frame at a time.

mod channel;
mod frame;
mod pci;
mod rx;
mod tp;
mod tx;

pub mod config;
pub mod diag;
pub mod driver;

pub use config::{Addressing, ChannelConfig, Duplex, StackConfig, TaType, ticks};
pub use diag::{CopyResult, Diag, RxResult, StartResult, TxResult};
pub use driver::{CanBus, SendResult};
pub use frame::{FlowStatus, MAX_MESSAGE_SIZE};
pub use pci::MAX_FRAME_SIZE;
pub use tp::CanTp;

#[cfg(test)]
pub(crate) mod testutil;

#[cfg(test)]
#[ctor::ctor]
fn setup_test_logging() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .with_ansi(true)
        .init();
}
