//! Pointer location and overlay compositing

use std::cell::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};

use device_query::{DeviceQuery, DeviceState};
use tracing::warn;

use crate::{CaptureError, CaptureResult, DisplayInfo, Point, RGBA_BYTES_PER_PIXEL, Rect};

/// Source of the global pointer location (logical desktop coordinates)
pub trait PointerProbe: Send + Sync {
    /// Current pointer location, or None if it can't be queried
    fn locate(&self) -> Option<Point>;
}

thread_local! {
    // The input connection is not Send, so each grab thread opens its own once
    static DEVICE_STATE: OnceCell<Option<DeviceState>> = const { OnceCell::new() };
}

/// Pointer probe backed by the OS input state.
///
/// Once the input state can't be reached (e.g. no X server) the probe stops
/// asking and always reports None.
#[derive(Debug, Default)]
pub struct SystemPointer {
    unavailable: AtomicBool,
}

impl SystemPointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::Relaxed)
    }

    fn locate_with(&self, query: impl FnOnce() -> Option<(i32, i32)>) -> Option<Point> {
        if self.is_unavailable() {
            return None;
        }
        match query() {
            Some((x, y)) => Some(Point::new(x, y)),
            None => {
                if !self.unavailable.swap(true, Ordering::Relaxed) {
                    warn!("Pointer location unavailable, drawing at the fallback position");
                }
                None
            }
        }
    }
}

impl PointerProbe for SystemPointer {
    fn locate(&self) -> Option<Point> {
        self.locate_with(|| {
            DEVICE_STATE.with(|state| {
                state
                    .get_or_init(DeviceState::checked_new)
                    .as_ref()
                    .map(|state| state.get_mouse().coords)
            })
        })
    }
}

/// Pointer probe that always reports the same answer
#[derive(Debug, Clone, Copy)]
pub struct FixedPointer(pub Option<Point>);

impl PointerProbe for FixedPointer {
    fn locate(&self) -> Option<Point> {
        self.0
    }
}

/// Map the global pointer into `target` pixel space of `display`.
///
/// Falls back to the bottom-right corner of `target` when the pointer is on
/// another display or can't be located.
pub fn pointer_in_target(probe: &dyn PointerProbe, display: &DisplayInfo, target: Rect) -> Point {
    let fallback = target.far_corner();

    let Some(global) = probe.locate() else {
        return fallback;
    };
    if !display.bounds.contains(global) {
        return fallback;
    }

    let local = Point::new(global.x - display.bounds.x, global.y - display.bounds.y);
    let physical = local.scale(display.scale_x, display.scale_y);

    let source = display.scaled_bounds();
    if source.width == 0 || source.height == 0 {
        return fallback;
    }
    physical.scale(
        target.width as f64 / source.width as f64,
        target.height as f64 / source.height as f64,
    )
}

const OPAQUE_BLACK: u32 = 0xFF00_0000;
const OPAQUE_WHITE: u32 = 0xFFFF_FFFF;

const ARROW: [&str; 19] = [
    "B...........",
    "BB..........",
    "BWB.........",
    "BWWB........",
    "BWWWB.......",
    "BWWWWB......",
    "BWWWWWB.....",
    "BWWWWWWB....",
    "BWWWWWWWB...",
    "BWWWWWWWWB..",
    "BWWWWWWWWWB.",
    "BWWWWWWBBBBB",
    "BWWWBWWB....",
    "BWWB.BWWB...",
    "BWB..BWWB...",
    "BB....BWWB..",
    "B.....BWWB..",
    ".......BWWB.",
    ".......BBB..",
];

/// Pointer bitmap composited into frames.
///
/// Pixels are packed ARGB; a zero pixel is transparent and skipped, any
/// other pixel overwrites the destination (no alpha blending). Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerOverlay {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Default for PointerOverlay {
    fn default() -> Self {
        Self::arrow().scaled(2.0, 2.0)
    }
}

impl PointerOverlay {
    /// Bitmap of `width` x `height` row-major ARGB pixels
    pub fn from_argb(width: u32, height: u32, pixels: Vec<u32>) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "pointer bitmap {}x{} is empty",
                width, height
            )));
        }
        if pixels.len() != width as usize * height as usize {
            return Err(CaptureError::InvalidConfig(format!(
                "pointer bitmap {}x{} has {} pixels",
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Built-in arrow at its base size
    pub fn arrow() -> Self {
        let width = ARROW[0].len() as u32;
        let height = ARROW.len() as u32;
        let pixels = ARROW
            .iter()
            .flat_map(|row| row.bytes())
            .map(|cell| match cell {
                b'B' => OPAQUE_BLACK,
                b'W' => OPAQUE_WHITE,
                _ => 0,
            })
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Nearest-neighbour scaled copy
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        let width = ((self.width as f64 * sx).round() as u32).max(1);
        let height = ((self.height as f64 * sy).round() as u32).max(1);

        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            let src_y = ((y as f64 / sy) as u32).min(self.height - 1);
            for x in 0..width {
                let src_x = ((x as f64 / sx) as u32).min(self.width - 1);
                pixels.push(self.pixel(src_x, src_y));
            }
        }

        Self {
            width,
            height,
            pixels,
        }
    }

    /// Draw into a packed pixel buffer of `frame_width` x `frame_height`
    /// with `bytes_per_pixel` of 3 (RGB24) or 4 (RGBA), top-left corner at
    /// `at`. Parts falling outside the frame are clipped.
    pub fn composite(
        &self,
        frame: &mut [u8],
        frame_width: u32,
        frame_height: u32,
        bytes_per_pixel: usize,
        at: Point,
    ) {
        debug_assert!(frame.len() >= frame_width as usize * frame_height as usize * bytes_per_pixel);

        let fw = frame_width as i64;
        let fh = frame_height as i64;
        let x0 = (at.x as i64).max(0);
        let y0 = (at.y as i64).max(0);
        let x1 = (at.x as i64 + self.width as i64).min(fw);
        let y1 = (at.y as i64 + self.height as i64).min(fh);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        for dy in y0..y1 {
            let oy = (dy - at.y as i64) as u32;
            for dx in x0..x1 {
                let ox = (dx - at.x as i64) as u32;
                let argb = self.pixel(ox, oy);
                if argb == 0 {
                    continue;
                }
                let offset = ((dy * fw + dx) as usize) * bytes_per_pixel;
                let target = &mut frame[offset..offset + bytes_per_pixel];
                target[0] = (argb >> 16) as u8;
                target[1] = (argb >> 8) as u8;
                target[2] = argb as u8;
                if bytes_per_pixel == RGBA_BYTES_PER_PIXEL {
                    target[3] = 0xFF;
                }
            }
        }
    }
}
