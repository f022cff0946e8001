//! Active display resolution

use tracing::{debug, info};
use xcap::Monitor;

use crate::{CaptureError, CaptureResult, Rect};

/// Display information
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayInfo {
    /// Display ID
    pub id: u32,
    /// Display name
    pub name: String,
    /// Logical bounds in the virtual screen
    pub bounds: Rect,
    /// Physical/logical pixel ratio (for HiDPI)
    pub scale_x: f64,
    pub scale_y: f64,
    /// Is this the primary display?
    pub is_primary: bool,
}

impl DisplayInfo {
    /// Bounds in physical pixels
    pub fn scaled_bounds(&self) -> Rect {
        self.bounds.scale(self.scale_x, self.scale_y)
    }

    /// Resolve the active (primary) display
    pub fn primary() -> CaptureResult<Self> {
        let monitor = primary_monitor()?;
        Self::from_monitor(&monitor)
    }

    pub(crate) fn from_monitor(monitor: &Monitor) -> CaptureResult<Self> {
        let display = |e: xcap::XCapError| CaptureError::Display(e.to_string());

        let scale = monitor.scale_factor().map_err(display)? as f64;
        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };

        let info = Self {
            id: monitor.id().map_err(display)?,
            name: monitor
                .name()
                .unwrap_or_else(|_| "Primary Display".to_string()),
            bounds: logical_bounds(
                Rect::new(
                    monitor.x().map_err(display)?,
                    monitor.y().map_err(display)?,
                    monitor.width().map_err(display)?,
                    monitor.height().map_err(display)?,
                ),
                scale,
                MONITOR_BOUNDS_ARE_PHYSICAL,
            ),
            scale_x: scale,
            scale_y: scale,
            is_primary: monitor.is_primary().unwrap_or(false),
        };
        debug!("Resolved display {:?}", info);
        Ok(info)
    }
}

/// Windows reports monitor position and size in physical pixels, the other
/// platforms in logical points
const MONITOR_BOUNDS_ARE_PHYSICAL: bool = cfg!(windows);

/// Bring monitor bounds into logical coordinates
fn logical_bounds(reported: Rect, scale: f64, physical: bool) -> Rect {
    if physical {
        reported.scale(1.0 / scale, 1.0 / scale)
    } else {
        reported
    }
}

/// Primary monitor, or the first one reported if none is flagged primary
pub(crate) fn primary_monitor() -> CaptureResult<Monitor> {
    let monitors = Monitor::all().map_err(|e| CaptureError::Display(e.to_string()))?;
    info!("Found {} monitor(s)", monitors.len());

    let index = monitors
        .iter()
        .position(|m| m.is_primary().unwrap_or(false))
        .unwrap_or(0);

    monitors
        .into_iter()
        .nth(index)
        .ok_or(CaptureError::NoDisplays)
}
