//! Loopback Channel - single-connection localhost TCP reader
//!
//! Receives a raw byte stream from a helper process over a localhost-only
//! TCP connection and hands every read to a registered consumer:
//! - binds an ephemeral port up front so the address can be given to the producer
//! - accepts exactly one connection on a dedicated I/O thread
//! - reports stalled data flow and completion to registered listeners

mod error;
mod listener;
mod reader;

pub use error::*;
pub use listener::*;
pub use reader::*;

/// Default scratch buffer size for a reader
pub const DEFAULT_BUFFER_SIZE: usize = 0x10000;
