//! Color frame -> binary foreground mask.
//!
//! The pipeline runs in a fixed order:
//!
//! 1. BGR -> single-channel intensity (ITU-R BT.601 weights, 14-bit fixed point)
//! 2. 3x3 Gaussian blur, sigma 1 (reflect-101 border)
//! 3. Gaussian-weighted adaptive threshold over a 25x25 block, offset 16, inverted
//!    (replicate border): foreground where a pixel is at least `offset` darker than
//!    its local weighted mean
//! 4. 5x5 median filter (replicate border)
//! 5. 3x3 dilation, one iteration (out-of-frame samples ignored)
//!
//! The transform is deterministic and holds no state between frames.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::{BgrFrame, Mask, MASK_ON};
use crate::OccupancyError;

// Fixed-point BT.601 weights scaled by 2^14 (B, G, R).
const GRAY_SHIFT: u32 = 14;
const GRAY_B: u32 = 1868;
const GRAY_G: u32 = 9617;
const GRAY_R: u32 = 4899;

/// Tunable parameters of the mask transform. Defaults are the documented values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub blur_size: u32,
    pub blur_sigma: f64,
    /// Neighborhood size of the adaptive threshold (odd).
    pub block_size: u32,
    /// Constant subtracted from the local mean.
    pub offset: f64,
    pub median_size: u32,
    pub dilate_size: u32,
    pub dilate_iterations: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            blur_size: 3,
            blur_sigma: 1.0,
            block_size: 25,
            offset: 16.0,
            median_size: 5,
            dilate_size: 3,
            dilate_iterations: 1,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.blur_size == 0 || self.blur_size % 2 == 0 {
            return Err(anyhow!("preprocess blur_size must be odd and >= 1"));
        }
        if self.block_size < 3 || self.block_size % 2 == 0 {
            return Err(anyhow!("preprocess block_size must be odd and >= 3"));
        }
        if self.median_size < 3 || self.median_size % 2 == 0 {
            return Err(anyhow!("preprocess median_size must be odd and >= 3"));
        }
        if self.dilate_size == 0 || self.dilate_size % 2 == 0 {
            return Err(anyhow!("preprocess dilate_size must be odd and >= 1"));
        }
        if !self.offset.is_finite() || !self.blur_sigma.is_finite() {
            return Err(anyhow!("preprocess offset and blur_sigma must be finite"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Border {
    /// `gfedcb|abcdefgh|gfedcba`
    Reflect101,
    /// `aaaaaa|abcdefgh|hhhhhhh`
    Replicate,
}

/// The mask transform with its kernels precomputed.
#[derive(Clone, Debug)]
pub struct Preprocessor {
    config: PreprocessConfig,
    blur_kernel: Vec<f32>,
    mean_kernel: Vec<f32>,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        config.validate()?;
        let blur_kernel = gaussian_kernel(config.blur_size, config.blur_sigma);
        // Block-mean sigma derived from the block size (sigma <= 0 rule).
        let mean_kernel = gaussian_kernel(config.block_size, 0.0);
        Ok(Self {
            config,
            blur_kernel,
            mean_kernel,
        })
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Run the full pipeline on one frame.
    pub fn transform(&self, frame: &BgrFrame) -> Result<Mask, OccupancyError> {
        frame.validate()?;
        let width = frame.width as usize;
        let height = frame.height as usize;

        let gray = to_gray(frame.data());
        let blurred = separable_filter(
            &gray,
            width,
            height,
            &self.blur_kernel,
            Border::Reflect101,
        );
        let thresholded = adaptive_threshold_inv(
            &blurred,
            width,
            height,
            &self.mean_kernel,
            self.config.offset,
        );
        let median = median_filter(&thresholded, width, height, self.config.median_size as usize);
        let mut dilated = median;
        for _ in 0..self.config.dilate_iterations {
            dilated = dilate(&dilated, width, height, self.config.dilate_size as usize);
        }

        Mask::new(dilated, frame.width, frame.height)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        let config = PreprocessConfig::default();
        Self {
            blur_kernel: gaussian_kernel(config.blur_size, config.blur_sigma),
            mean_kernel: gaussian_kernel(config.block_size, 0.0),
            config,
        }
    }
}

fn to_gray(bgr: &[u8]) -> Vec<u8> {
    bgr.chunks_exact(3)
        .map(|px| {
            let b = px[0] as u32;
            let g = px[1] as u32;
            let r = px[2] as u32;
            ((b * GRAY_B + g * GRAY_G + r * GRAY_R + (1 << (GRAY_SHIFT - 1))) >> GRAY_SHIFT) as u8
        })
        .collect()
}

/// Normalized 1D Gaussian kernel. A non-positive sigma is derived from the size.
fn gaussian_kernel(size: u32, sigma: f64) -> Vec<f32> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let radius = (size / 2) as i64;
    let scale = -0.5 / (sigma * sigma);
    let weights: Vec<f64> = (-radius..=radius)
        .map(|i| ((i * i) as f64 * scale).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / sum) as f32).collect()
}

fn border_index(i: isize, n: usize, border: Border) -> usize {
    let n = n as isize;
    if n <= 1 {
        return 0;
    }
    match border {
        Border::Replicate => i.clamp(0, n - 1) as usize,
        Border::Reflect101 => {
            let mut i = i;
            while i < 0 || i >= n {
                if i < 0 {
                    i = -i;
                }
                if i >= n {
                    i = 2 * (n - 1) - i;
                }
            }
            i as usize
        }
    }
}

/// Separable convolution with the same kernel on both axes, rounded back to u8.
fn separable_filter(
    src: &[u8],
    width: usize,
    height: usize,
    kernel: &[f32],
    border: Border,
) -> Vec<u8> {
    let radius = (kernel.len() / 2) as isize;

    let mut horizontal = vec![0f32; width * height];
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = border_index(x as isize + k as isize - radius, width, border);
                acc += row[sx] as f32 * weight;
            }
            horizontal[y * width + x] = acc;
        }
    }

    let mut out = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = border_index(y as isize + k as isize - radius, height, border);
                acc += horizontal[sy * width + x] * weight;
            }
            out[y * width + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Inverted adaptive threshold: 255 where `src - mean <= -offset`, else 0.
fn adaptive_threshold_inv(
    src: &[u8],
    width: usize,
    height: usize,
    mean_kernel: &[f32],
    offset: f64,
) -> Vec<u8> {
    let mean = separable_filter(src, width, height, mean_kernel, Border::Replicate);
    let delta = offset.floor() as i32;
    src.iter()
        .zip(mean.iter())
        .map(|(&s, &m)| {
            if s as i32 - m as i32 > -delta {
                0
            } else {
                MASK_ON
            }
        })
        .collect()
}

fn median_filter(src: &[u8], width: usize, height: usize, size: usize) -> Vec<u8> {
    let radius = (size / 2) as isize;
    let mid = size * size / 2;
    let mut window = Vec::with_capacity(size * size);
    let mut out = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            window.clear();
            for dy in -radius..=radius {
                let sy = border_index(y as isize + dy, height, Border::Replicate);
                for dx in -radius..=radius {
                    let sx = border_index(x as isize + dx, width, Border::Replicate);
                    window.push(src[sy * width + sx]);
                }
            }
            let (_, median, _) = window.select_nth_unstable(mid);
            out[y * width + x] = *median;
        }
    }
    out
}

/// Square max filter; samples outside the frame do not contribute.
fn dilate(src: &[u8], width: usize, height: usize, size: usize) -> Vec<u8> {
    let radius = size / 2;

    let mut rows = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(width - 1);
            rows[y * width + x] = src[y * width + lo..=y * width + hi]
                .iter()
                .copied()
                .max()
                .unwrap_or(0);
        }
    }

    let mut out = vec![0u8; width * height];
    for y in 0..height {
        let lo = y.saturating_sub(radius);
        let hi = (y + radius).min(height - 1);
        for x in 0..width {
            out[y * width + x] = (lo..=hi).map(|sy| rows[sy * width + x]).max().unwrap_or(0);
        }
    }
    out
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn textured_frame(width: u32, height: u32) -> BgrFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = ((x * 37 + y * 11) % 256) as u8;
                data.extend_from_slice(&[v, v.wrapping_add(40), v / 2]);
            }
        }
        BgrFrame::new(data, width, height)
    }

    #[test]
    fn gray_uses_bt601_weights() {
        assert_eq!(to_gray(&[255, 255, 255]), vec![255]);
        assert_eq!(to_gray(&[0, 0, 0]), vec![0]);
        assert_eq!(to_gray(&[255, 0, 0]), vec![29]);
        assert_eq!(to_gray(&[0, 0, 255]), vec![76]);
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(3, 1.0);
        assert_eq!(k.len(), 3);
        assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((k[0] - k[2]).abs() < 1e-7);
        assert!((k[1] - 0.4519).abs() < 1e-3);

        let block = gaussian_kernel(25, 0.0);
        assert_eq!(block.len(), 25);
        assert!(block[12] > block[0]);
    }

    #[test]
    fn reflect101_and_replicate_borders() {
        assert_eq!(border_index(-1, 5, Border::Reflect101), 1);
        assert_eq!(border_index(5, 5, Border::Reflect101), 3);
        assert_eq!(border_index(-1, 5, Border::Replicate), 0);
        assert_eq!(border_index(7, 5, Border::Replicate), 4);
        assert!(border_index(-30, 3, Border::Reflect101) < 3);
    }

    #[test]
    fn uniform_frame_produces_empty_mask() -> Result<()> {
        let pre = Preprocessor::default();
        let mask = pre.transform(&BgrFrame::filled(64, 48, [120, 130, 140]))?;
        assert_eq!(mask.width(), 64);
        assert_eq!(mask.height(), 48);
        assert_eq!(mask.count_nonzero(), 0);
        Ok(())
    }

    #[test]
    fn dark_patch_becomes_foreground() -> Result<()> {
        let mut frame = BgrFrame::filled(100, 100, [200, 200, 200]);
        frame.fill_rect(45, 45, 10, 10, [20, 20, 20]);
        let mask = Preprocessor::default().transform(&frame)?;
        assert_eq!(mask.get(50, 50), Some(MASK_ON));
        assert_eq!(mask.get(5, 5), Some(0));
        assert_eq!(mask.get(90, 90), Some(0));
        Ok(())
    }

    #[test]
    fn transform_is_deterministic() -> Result<()> {
        let pre = Preprocessor::default();
        let frame = textured_frame(80, 60);
        let a = pre.transform(&frame)?;
        let b = pre.transform(&frame)?;
        assert_eq!(a, b);
        assert!(a.data().iter().all(|&v| v == 0 || v == MASK_ON));
        Ok(())
    }

    #[test]
    fn invalid_frames_are_rejected() {
        let pre = Preprocessor::default();
        let empty = BgrFrame::new(Vec::new(), 0, 0);
        assert!(matches!(
            pre.transform(&empty),
            Err(OccupancyError::InvalidFrame { .. })
        ));
        let gray = BgrFrame::with_channels(vec![0u8; 16], 4, 4, 1);
        assert!(matches!(
            pre.transform(&gray),
            Err(OccupancyError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn median_removes_isolated_speckle() {
        let mut src = vec![0u8; 9 * 9];
        src[4 * 9 + 4] = MASK_ON;
        let out = median_filter(&src, 9, 9, 5);
        assert!(out.iter().all(|&v| v == 0));
    }

    #[test]
    fn dilate_grows_single_pixel_to_block() {
        let mut src = vec![0u8; 7 * 7];
        src[3 * 7 + 3] = MASK_ON;
        let out = dilate(&src, 7, 7, 3);
        assert_eq!(out.iter().filter(|&&v| v != 0).count(), 9);
        assert_eq!(out[2 * 7 + 2], MASK_ON);
        assert_eq!(out[8], 0);

        let mut corner = vec![0u8; 4 * 4];
        corner[0] = MASK_ON;
        let out = dilate(&corner, 4, 4, 3);
        assert_eq!(out.iter().filter(|&&v| v != 0).count(), 4);
    }

    #[test]
    fn config_validation_rejects_even_sizes() {
        let cfg = PreprocessConfig {
            block_size: 24,
            ..PreprocessConfig::default()
        };
        assert!(Preprocessor::new(cfg).is_err());
        let cfg = PreprocessConfig {
            median_size: 4,
            ..PreprocessConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(PreprocessConfig::default().validate().is_ok());
    }
}
