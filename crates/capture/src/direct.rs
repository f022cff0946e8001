//! Direct screen capture using the platform's low-level pixel grab
//!
//! Grabs full-resolution RGBA pixels synchronously on the calling thread;
//! no subprocess, no background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use xcap::Monitor;

use crate::display::primary_monitor;
use crate::{
    CaptureError, CaptureResult, CaptureSession, DisplayInfo, Frame, Point, PointerOverlay,
    PointerProbe, RGBA_BYTES_PER_PIXEL, Rect, ScreenSource, SourceKind, SystemPointer,
    pointer_in_target, rgba_to_rgb24,
};

/// Grab handle for one monitor
struct GrabHandle(Monitor);

// SAFETY: on Windows the monitor wraps a raw HMONITOR, which is a plain display
// identifier. It is only used while holding `DirectCapture::grab`.
#[cfg(windows)]
unsafe impl Send for GrabHandle {}

/// Direct capture implementation
pub struct DirectCapture {
    session: CaptureSession,
    display: DisplayInfo,
    grab: Mutex<Option<GrabHandle>>,
    overlay: PointerOverlay,
    pointer: Box<dyn PointerProbe>,
    size_mismatch_logged: AtomicBool,
}

impl DirectCapture {
    /// Open the primary display, failing if the pixel grab is unavailable
    pub fn new(show_pointer: bool) -> CaptureResult<Self> {
        Self::with_pointer_probe(show_pointer, Box::new(SystemPointer::new()))
    }

    pub fn with_pointer_probe(
        show_pointer: bool,
        pointer: Box<dyn PointerProbe>,
    ) -> CaptureResult<Self> {
        info!("Initializing direct screen capture");

        let monitor = primary_monitor()?;
        let display = DisplayInfo::from_monitor(&monitor)?;

        // Capability probe: some sessions (e.g. Wayland without a portal)
        // enumerate monitors but refuse to hand out pixels
        let probe_start = Instant::now();
        let probe = monitor
            .capture_image()
            .map_err(|e| CaptureError::GrabUnavailable(e.to_string()))?;
        debug!(
            "Probe grab {}x{} took {:?}",
            probe.width(),
            probe.height(),
            probe_start.elapsed()
        );

        let bounds = display.scaled_bounds();
        let session = CaptureSession::new(bounds, display.scale_x, display.scale_y, show_pointer);
        session.activate();

        info!(
            "Created direct grabber, display={} ({}), bounds={}, scale={}x{}",
            display.name, display.id, bounds, display.scale_x, display.scale_y
        );

        Ok(Self {
            session,
            display,
            grab: Mutex::new(Some(GrabHandle(monitor))),
            overlay: PointerOverlay::default(),
            pointer,
            size_mismatch_logged: AtomicBool::new(false),
        })
    }

    pub fn display(&self) -> &DisplayInfo {
        &self.display
    }
}

impl ScreenSource for DirectCapture {
    fn kind(&self) -> SourceKind {
        SourceKind::Direct
    }

    fn bounds(&self) -> Rect {
        self.session.bounds()
    }

    fn scale_x(&self) -> f64 {
        self.session.scale_x()
    }

    fn scale_y(&self) -> f64 {
        self.session.scale_y()
    }

    fn grab_frame(&self) -> CaptureResult<Option<Frame>> {
        if self.session.is_disposed() {
            return Ok(None);
        }

        let image = {
            let grab = self.grab.lock();
            let Some(handle) = grab.as_ref() else {
                return Ok(None);
            };
            handle
                .0
                .capture_image()
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?
        };

        let (width, height) = (image.width(), image.height());
        let bounds = self.session.bounds();
        if (width, height) != (bounds.width, bounds.height)
            && !self.size_mismatch_logged.swap(true, Ordering::Relaxed)
        {
            warn!(
                "Grabbed {}x{} pixels for display bounds {}, using grabbed size",
                width, height, bounds
            );
        }

        let mut rgba = image.into_raw();

        if self.session.show_pointer() {
            let at = pointer_in_target(
                self.pointer.as_ref(),
                &self.display,
                Rect::new(0, 0, width, height),
            );
            self.overlay
                .composite(&mut rgba, width, height, RGBA_BYTES_PER_PIXEL, at);
        }

        if self.session.is_disposed() {
            return Ok(None);
        }

        let rgb = rgba_to_rgb24(&rgba);
        Ok(Some(Frame::new(rgb, width, height, self.session.next_sequence())))
    }

    fn pointer_position(&self) -> Point {
        pointer_in_target(self.pointer.as_ref(), &self.display, self.session.bounds())
    }

    fn is_show_pointer(&self) -> bool {
        self.session.show_pointer()
    }

    fn dispose(&self) {
        self.session.dispose(|| {
            // Waits for an in-flight grab to finish
            if self.grab.lock().take().is_some() {
                info!("Released direct grab handle for {}", self.display.name);
            }
        });
    }

    fn is_disposed(&self) -> bool {
        self.session.is_disposed()
    }
}

impl std::fmt::Debug for DirectCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectCapture")
            .field("display", &self.display)
            .field("state", &self.session.state())
            .finish()
    }
}
