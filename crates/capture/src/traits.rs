//! Screen source trait abstraction

use crate::{CaptureResult, Frame, Point, Rect};

/// Concrete capture strategy behind a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Synchronous low-level pixel grab
    Direct,
    /// External encoder process feeding a loopback channel
    Ffmpeg,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Direct => write!(f, "direct"),
            SourceKind::Ffmpeg => write!(f, "ffmpeg"),
        }
    }
}

/// Screen source trait
///
/// All methods are callable from any thread. `dispose` may run concurrently
/// with a blocked `grab_frame`, which then returns `Ok(None)`.
pub trait ScreenSource: Send + Sync {
    /// Strategy implementing this source
    fn kind(&self) -> SourceKind;

    /// Frame rectangle in target pixel space
    fn bounds(&self) -> Rect;

    /// Physical/logical pixel ratio of the captured display
    fn scale_x(&self) -> f64;

    fn scale_y(&self) -> f64;

    /// Blocking grab of one complete RGB24 frame.
    ///
    /// `Ok(None)` means no frame: the source is disposed or the wait was cut
    /// short by disposal.
    fn grab_frame(&self) -> CaptureResult<Option<Frame>>;

    /// Pointer location in target coordinates, or the bottom-right corner
    /// of [`bounds`](Self::bounds) when the pointer is elsewhere
    fn pointer_position(&self) -> Point;

    /// Whether frames get the pointer overlay
    fn is_show_pointer(&self) -> bool;

    /// Release all resources. Idempotent, safe from any thread.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}
