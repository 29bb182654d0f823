//! Frame containers.
//!
//! - `BgrFrame`: interleaved color frame as delivered by the frame sources (B, G, R order).
//! - `Mask`: single-channel binary image produced by the preprocessor, values in {0, 255}.
//!
//! Both are plain row-major byte buffers; neither performs any image processing.

use crate::OccupancyError;

/// Channel count of a well-formed color frame.
pub const BGR_CHANNELS: u32 = 3;

/// Foreground value written into masks.
pub const MASK_ON: u8 = 255;

// ----------------------------------------------------------------------------
// BgrFrame
// ----------------------------------------------------------------------------

/// Interleaved color frame.
///
/// The constructor does not validate; `validate()` is called by the preprocessor so
/// that malformed frames surface as `OccupancyError::InvalidFrame` at the core boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BgrFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    data: Vec<u8>,
}

impl BgrFrame {
    /// Wrap a BGR24 buffer.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::with_channels(data, width, height, BGR_CHANNELS)
    }

    /// Wrap a buffer with an arbitrary channel count (e.g. grayscale or BGRA input).
    pub fn with_channels(data: Vec<u8>, width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    /// Solid-color frame.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&bgr);
        }
        Self::new(data, width, height)
    }

    /// Convert an RGB24 buffer (e.g. decoded by `image`) into BGR order.
    pub fn from_rgb(mut rgb: Vec<u8>, width: u32, height: u32) -> Self {
        for px in rgb.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Self::new(rgb, width, height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Check area, channel count and buffer length.
    pub fn validate(&self) -> Result<(), OccupancyError> {
        if self.width == 0 || self.height == 0 {
            return Err(OccupancyError::invalid_frame(format!(
                "zero-area frame {}x{}",
                self.width, self.height
            )));
        }
        if self.channels != BGR_CHANNELS {
            return Err(OccupancyError::invalid_frame(format!(
                "expected {} channels, got {}",
                BGR_CHANNELS, self.channels
            )));
        }
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(BGR_CHANNELS as usize))
            .ok_or_else(|| OccupancyError::invalid_frame("frame dimensions overflow"))?;
        if self.data.len() != expected {
            return Err(OccupancyError::invalid_frame(format!(
                "frame length mismatch: expected {}, got {}",
                expected,
                self.data.len()
            )));
        }
        Ok(())
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        let px = self.data.get(offset..offset + 3)?;
        Some([px[0], px[1], px[2]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, bgr: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = self.offset(x, y);
        if let Some(px) = self.data.get_mut(offset..offset + 3) {
            px.copy_from_slice(&bgr);
        }
    }

    /// Fill a rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, bgr: [u8; 3]) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for py in y..y_end {
            for px in x..x_end {
                self.set_pixel(px, py, bgr);
            }
        }
    }

    /// RGB copy for encoders that expect RGB order.
    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        let mut rgb = self.data.clone();
        for px in rgb.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        image::RgbImage::from_raw(self.width, self.height, rgb)
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels as usize
    }
}

// ----------------------------------------------------------------------------
// Mask
// ----------------------------------------------------------------------------

/// Single-channel binary mask, same spatial size as the source frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Mask {
    /// Wrap a single-channel buffer. Fails when the length does not match.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, OccupancyError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(OccupancyError::invalid_frame(format!(
                "mask length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.data[idx] = value;
    }

    /// Fill a rectangle, clipped to the mask.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, value: u8) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for py in y..y_end {
            for px in x..x_end {
                self.set(px, py, value);
            }
        }
    }

    /// Returns true when the rectangle lies entirely inside the mask.
    pub fn contains_rect(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        match (x.checked_add(width), y.checked_add(height)) {
            (Some(x_end), Some(y_end)) => x_end <= self.width && y_end <= self.height,
            _ => false,
        }
    }

    /// Nonzero pixels inside a rectangle; `None` if the rectangle leaves the mask.
    pub fn count_nonzero_in(&self, x: u32, y: u32, width: u32, height: u32) -> Option<usize> {
        if !self.contains_rect(x, y, width, height) {
            return None;
        }
        let stride = self.width as usize;
        let count = (y as usize..(y + height) as usize)
            .map(|row| {
                let start = row * stride + x as usize;
                self.data[start..start + width as usize]
                    .iter()
                    .filter(|&&v| v != 0)
                    .count()
            })
            .sum();
        Some(count)
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
