//! Frame and geometry types

use bytes::Bytes;
use std::time::Instant;

/// Bytes per packed RGB24 pixel
pub const RGB24_BYTES_PER_PIXEL: usize = 3;

/// Bytes per packed 32-bit pixel
pub const RGBA_BYTES_PER_PIXEL: usize = 4;

/// Point in pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Multiply both coordinates, rounding to the nearest pixel
    pub fn scale(&self, sx: f64, sy: f64) -> Point {
        Point {
            x: (self.x as f64 * sx).round() as i32,
            y: (self.y as f64 * sy).round() as i32,
        }
    }
}

/// Rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Multiply origin and size, rounding to the nearest pixel
    pub fn scale(&self, sx: f64, sy: f64) -> Rect {
        Rect {
            x: (self.x as f64 * sx).round() as i32,
            y: (self.y as f64 * sy).round() as i32,
            width: (self.width as f64 * sx).round() as u32,
            height: (self.height as f64 * sy).round() as u32,
        }
    }

    /// Check if a point lies inside this rect
    pub fn contains(&self, point: Point) -> bool {
        let px = point.x as i64;
        let py = point.y as i64;
        px >= self.x as i64
            && py >= self.y as i64
            && px < self.x as i64 + self.width as i64
            && py < self.y as i64 + self.height as i64
    }

    /// Bottom-right corner, used as the "pointer elsewhere" position
    pub fn far_corner(&self) -> Point {
        Point::new(self.width as i32, self.height as i32)
    }

    /// Size of an RGB24 frame covering this rect
    pub fn rgb24_len(&self) -> usize {
        self.width as usize * self.height as usize * RGB24_BYTES_PER_PIXEL
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{},{}", self.width, self.height, self.x, self.y)
    }
}

/// Target frame size for a configured output height.
///
/// Keeps the source aspect ratio; the width is rounded to the nearest pixel
/// and then down to an even value, as raw yuv/rgb scalers require.
pub fn target_size(source: Rect, target_height: u32) -> Rect {
    if source.width == 0 || source.height == 0 || target_height == 0 {
        return Rect::new(0, 0, 0, target_height);
    }
    let aspect = target_height as f64 / source.height as f64;
    let width = ((source.width as f64 * aspect).round() as u32) & !1;
    Rect::new(0, 0, width.max(2), target_height)
}

/// Convert packed RGBA pixels to packed RGB24 in a single pass
pub fn rgba_to_rgb24(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / RGBA_BYTES_PER_PIXEL * RGB24_BYTES_PER_PIXEL);
    for pixel in rgba.chunks_exact(RGBA_BYTES_PER_PIXEL) {
        rgb.extend_from_slice(&pixel[..RGB24_BYTES_PER_PIXEL]);
    }
    rgb
}

/// One complete RGB24 frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packed RGB24 pixels, exactly `width * height * 3` bytes
    pub data: Bytes,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp
    pub timestamp: Instant,
    /// Frame sequence number within the session
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * RGB24_BYTES_PER_PIXEL
        );
        Self {
            data: Bytes::from(data),
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// RGB triplet at a pixel, if inside the frame
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB24_BYTES_PER_PIXEL;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }
}
