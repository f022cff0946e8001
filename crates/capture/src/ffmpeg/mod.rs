//! Screen capture through an external ffmpeg process
//!
//! ffmpeg grabs the desktop, scales it to the configured quality and writes
//! raw RGB24 to a loopback TCP listener owned by this process.

mod args;
mod discovery;
mod stream;

pub use args::*;
pub use discovery::*;
pub use stream::*;

use std::process::{Child, ExitStatus};
use std::sync::OnceLock;

use loopback_channel::ReaderConfig;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::{
    CaptureError, CaptureResult, CaptureSession, CaptureSettings, DisplayInfo, Frame, Point,
    PointerOverlay, PointerProbe, RGB24_BYTES_PER_PIXEL, Rect, ScreenSource, SourceKind,
    SystemPointer, pointer_in_target, target_size,
};

/// Reader thread name prefix
const READER_NAME: &str = "ffmpeg-capture-reader";

/// Encoder-backed screen source
pub struct FfmpegCapture {
    session: CaptureSession,
    display: DisplayInfo,
    overlay: PointerOverlay,
    pointer: Box<dyn PointerProbe>,
    stream: EncoderStream,
    process: Mutex<Option<Child>>,
    /// Set once the encoder has been reaped on dispose
    exit: OnceLock<ExitStatus>,
}

impl FfmpegCapture {
    /// Capture the primary display
    pub fn new(settings: &CaptureSettings) -> CaptureResult<Self> {
        Self::with_display(settings, DisplayInfo::primary()?, Box::new(SystemPointer::new()))
    }

    /// Start the reader, resolve the input device and launch the encoder,
    /// in that order. A failing step tears down the ones before it.
    pub fn with_display(
        settings: &CaptureSettings,
        display: DisplayInfo,
        pointer: Box<dyn PointerProbe>,
    ) -> CaptureResult<Self> {
        let capture = display.scaled_bounds();
        let target = target_size(capture, settings.quality.height());
        if target.width == 0 || target.height == 0 {
            return Err(CaptureError::Display(format!(
                "display {} has no usable area",
                display.name
            )));
        }

        let aspect_x = target.width as f64 / capture.width as f64;
        let aspect_y = target.height as f64 / capture.height as f64;

        let stream = EncoderStream::open(
            ReaderConfig {
                name: READER_NAME.to_string(),
                data_flow_timeout: settings.data_flow_timeout(),
                buffer_size: settings.read_buffer_size,
                ..Default::default()
            },
            target,
        )?;

        let device_index = if cfg!(target_os = "macos") {
            discover_capture_device(&settings.ffmpeg_path).index()
        } else {
            0
        };

        let args = FfmpegArgs {
            program: settings.ffmpeg_path.clone(),
            input: InputDevice::for_host(capture, device_index),
            capture,
            target,
            framerate: settings.snaps_per_second,
            sink: stream.address(),
        };
        // Dropping `stream` on failure disposes the reader
        let child = args.spawn()?;
        info!(
            "Started {} (pid {}) for {} -> {} at {} fps",
            settings.ffmpeg_path,
            child.id(),
            capture,
            target,
            settings.snaps_per_second
        );

        let session = CaptureSession::new(
            target,
            display.scale_x,
            display.scale_y,
            settings.grab_pointer,
        );
        session.activate();

        Ok(Self {
            session,
            display,
            overlay: PointerOverlay::default().scaled(aspect_x, aspect_y),
            pointer,
            stream,
            process: Mutex::new(Some(child)),
            exit: OnceLock::new(),
        })
    }

    pub fn display(&self) -> &DisplayInfo {
        &self.display
    }

    pub fn stream(&self) -> &EncoderStream {
        &self.stream
    }

    /// Encoder exit status, if it has exited
    pub fn try_exit_status(&self) -> Option<ExitStatus> {
        if let Some(status) = self.exit.get() {
            return Some(*status);
        }
        self.process
            .lock()
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
    }
}

impl ScreenSource for FfmpegCapture {
    fn kind(&self) -> SourceKind {
        SourceKind::Ffmpeg
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

        let Some(mut data) = self.stream.next_frame() else {
            if self.session.is_disposed() {
                return Ok(None);
            }
            return Err(CaptureError::StreamEnded);
        };

        let bounds = self.session.bounds();
        if self.session.show_pointer() {
            let at = self.pointer_position();
            self.overlay.composite(
                &mut data,
                bounds.width,
                bounds.height,
                RGB24_BYTES_PER_PIXEL,
                at,
            );
        }

        Ok(Some(Frame::new(
            data,
            bounds.width,
            bounds.height,
            self.session.next_sequence(),
        )))
    }

    fn pointer_position(&self) -> Point {
        pointer_in_target(self.pointer.as_ref(), &self.display, self.session.bounds())
    }

    fn is_show_pointer(&self) -> bool {
        self.session.show_pointer()
    }

    fn dispose(&self) {
        self.session.dispose(|| {
            info!("Closing encoder stream {}", self.stream.address());
            self.stream.close();

            if let Some(mut child) = self.process.lock().take() {
                info!("Stopping encoder process {}", child.id());
                if let Err(e) = child.kill() {
                    warn!("Failed to kill encoder process: {}", e);
                }
                match child.wait() {
                    Ok(status) => {
                        if self.exit.set(status).is_err() {
                            error!("Encoder process reaped twice");
                        }
                    }
                    Err(e) => error!("Failed to reap encoder process: {}", e),
                }
            }
        });
    }

    fn is_disposed(&self) -> bool {
        self.session.is_disposed()
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for FfmpegCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegCapture")
            .field("display", &self.display)
            .field("stream", &self.stream)
            .field("state", &self.session.state())
            .finish()
    }
}
