//! Strategy selection

use tracing::{info, warn};

use crate::{
    CaptureResult, CaptureSettings, DirectCapture, FfmpegCapture, Frame, GrabberType, Point,
    Rect, ScreenSource, SourceKind,
};

/// The concrete source chosen for a set of settings
#[derive(Debug)]
pub enum CaptureBackend {
    Direct(DirectCapture),
    Ffmpeg(FfmpegCapture),
}

impl CaptureBackend {
    /// Open the source `settings.grabber` asks for. `Auto` prefers the
    /// direct grab and falls back to the encoder when it is unavailable.
    pub fn open(settings: &CaptureSettings) -> CaptureResult<Self> {
        settings.validate()?;

        let backend = match settings.grabber {
            GrabberType::Direct => Self::Direct(DirectCapture::new(settings.grab_pointer)?),
            GrabberType::Ffmpeg => Self::Ffmpeg(FfmpegCapture::new(settings)?),
            GrabberType::Auto => match DirectCapture::new(settings.grab_pointer) {
                Ok(direct) => Self::Direct(direct),
                Err(e) => {
                    warn!("Direct capture unavailable ({}), falling back to ffmpeg", e);
                    Self::Ffmpeg(FfmpegCapture::new(settings)?)
                }
            },
        };

        info!(
            "Opened {} capture source, bounds={}",
            backend.kind(),
            backend.bounds()
        );
        Ok(backend)
    }

    fn source(&self) -> &dyn ScreenSource {
        match self {
            CaptureBackend::Direct(direct) => direct,
            CaptureBackend::Ffmpeg(ffmpeg) => ffmpeg,
        }
    }
}

impl ScreenSource for CaptureBackend {
    fn kind(&self) -> SourceKind {
        self.source().kind()
    }

    fn bounds(&self) -> Rect {
        self.source().bounds()
    }

    fn scale_x(&self) -> f64 {
        self.source().scale_x()
    }

    fn scale_y(&self) -> f64 {
        self.source().scale_y()
    }

    fn grab_frame(&self) -> CaptureResult<Option<Frame>> {
        self.source().grab_frame()
    }

    fn pointer_position(&self) -> Point {
        self.source().pointer_position()
    }

    fn is_show_pointer(&self) -> bool {
        self.source().is_show_pointer()
    }

    fn dispose(&self) {
        self.source().dispose()
    }

    fn is_disposed(&self) -> bool {
        self.source().is_disposed()
    }
}
