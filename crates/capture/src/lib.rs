//! Screen Capture - real-time RGB24 screen capture
//!
//! Two interchangeable strategies behind [`ScreenSource`]:
//! - Direct: synchronous low-level pixel grab of the primary display
//! - Ffmpeg: an external encoder streaming raw frames over a loopback socket
//!
//! [`ScreenGrabber`] paces either one and fans frames out to listeners.

mod assembler;
mod backend;
mod config;
mod direct;
mod display;
mod error;
pub mod ffmpeg;
mod frame;
mod grabber;
pub mod handoff;
mod pointer;
mod session;
mod traits;

pub use assembler::*;
pub use backend::*;
pub use config::*;
pub use direct::*;
pub use display::*;
pub use error::*;
pub use ffmpeg::{EncoderStream, FfmpegCapture};
pub use frame::*;
pub use grabber::*;
pub use pointer::*;
pub use session::*;
pub use traits::*;

/// Open the capture source `settings` select
pub fn create_capture(settings: &CaptureSettings) -> CaptureResult<CaptureBackend> {
    CaptureBackend::open(settings)
}
