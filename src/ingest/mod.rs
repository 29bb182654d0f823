//! Frame sources.
//!
//! - Local files (`FileSource`): still images, image directories, video via FFmpeg
//!   (feature: ingest-file-ffmpeg). Loop back to frame zero when exhausted.
//! - Live streams (`RtspSource`): `rtsp://` and `http(s)://` via GStreamer
//!   (feature: rtsp-gstreamer). A read failure or end of stream ends the run.
//! - `stub://` URLs on either source: the synthetic scene in `synthetic`.
//!
//! Every source hands out interleaved BGR frames. The frame loop only sees the
//! `FrameSource` trait and asks `mode()` what to do on exhaustion.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod rtsp;
pub mod synthetic;

use anyhow::Result;

use crate::frame::BgrFrame;

pub use file::{FileConfig, FileSource};
pub use rtsp::{RtspConfig, RtspSource};
pub use synthetic::{SceneConfig, SyntheticScene};

/// What happens when a source runs out of frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Rewind to frame zero and keep going (demo footage).
    Looping,
    /// Stop and report (live camera).
    Live,
}

/// Statistics for any frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub rewinds: u64,
    pub location: String,
}

pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<BgrFrame>>;

    /// Restart at frame zero. Live sources fail.
    fn rewind(&mut self) -> Result<()>;

    fn mode(&self) -> SourceMode;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Which source a URL belongs to when the mode is not forced.
pub fn infer_mode(url: &str) -> SourceMode {
    let lower = url.trim().to_ascii_lowercase();
    if lower.starts_with("rtsp://") || lower.starts_with("http://") || lower.starts_with("https://")
    {
        SourceMode::Live
    } else {
        SourceMode::Looping
    }
}

/// Open a source for `url` in `mode`. `scene` is only used for `stub://` URLs.
pub fn open_source(
    url: &str,
    mode: SourceMode,
    target_fps: u32,
    scene: SceneConfig,
) -> Result<Box<dyn FrameSource>> {
    match mode {
        SourceMode::Looping => Ok(Box::new(FileSource::new(FileConfig {
            path: url.to_string(),
            target_fps,
            scene,
        })?)),
        SourceMode::Live => Ok(Box::new(RtspSource::new(RtspConfig {
            url: url.to_string(),
            target_fps,
            scene,
        })?)),
    }
}

/// Copy `height` rows of `row_bytes` out of a strided buffer.
pub(crate) fn pack_rows(
    data: &[u8],
    stride: usize,
    row_bytes: usize,
    height: usize,
) -> Option<Vec<u8>> {
    if stride == row_bytes {
        return data.get(..row_bytes * height).map(|d| d.to_vec());
    }
    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(data.get(start..start + row_bytes)?);
    }
    Some(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_inference_by_scheme() {
        assert_eq!(infer_mode("rtsp://cam/stream"), SourceMode::Live);
        assert_eq!(infer_mode("http://192.168.1.100:8080/video"), SourceMode::Live);
        assert_eq!(infer_mode("carPark.mp4"), SourceMode::Looping);
        assert_eq!(infer_mode("stub://lot"), SourceMode::Looping);
    }

    #[test]
    fn pack_rows_drops_padding() {
        let data = [1, 2, 3, 0, 4, 5, 6, 0];
        assert_eq!(pack_rows(&data, 4, 3, 2), Some(vec![1, 2, 3, 4, 5, 6]));
        assert_eq!(pack_rows(&data, 4, 3, 3), None);
        assert_eq!(pack_rows(&data[..6], 3, 3, 2), Some(vec![1, 2, 3, 0, 4, 5]));
    }
}
