//! Local file frame source.
//!
//! `FileSource` plays local footage in a loop:
//! - `stub://name`: the synthetic scene
//! - a still image (PNG/JPEG) or a directory of them, sorted by file name
//! - any other file: video decoded with FFmpeg (feature: ingest-file-ffmpeg)
//!
//! Remote URLs are rejected; those belong to `RtspSource`.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::synthetic::{SceneConfig, SyntheticScene};
use super::{FrameSource, SourceMode, SourceStats};
#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::BgrFrame;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local path (e.g. "carPark.mp4", "frames/") or `stub://name`.
    pub path: String,
    pub target_fps: u32,
    /// Scene for `stub://` paths.
    pub scene: SceneConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 30,
            scene: SceneConfig::new(1100, 720),
        }
    }
}

/// Looping local file source.
pub struct FileSource {
    backend: FileBackend,
    rewinds: u64,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    Images(ImageSequenceSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): {}",
                config.path
            ));
        }
        let backend = if config.path.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticFileSource::new(config))
        } else if is_image_input(Path::new(&config.path)) {
            FileBackend::Images(ImageSequenceSource::new(config)?)
        } else {
            video_backend(config)?
        };
        Ok(Self {
            backend,
            rewinds: 0,
        })
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn video_backend(config: FileConfig) -> Result<FileBackend> {
    Ok(FileBackend::Ffmpeg(FfmpegFileSource::new(config)?))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn video_backend(config: FileConfig) -> Result<FileBackend> {
    Err(anyhow!(
        "video file {} requires the ingest-file-ffmpeg feature",
        config.path
    ))
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            FileBackend::Images(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<BgrFrame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            FileBackend::Images(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn rewind(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.rewind(),
            FileBackend::Images(source) => source.rewind(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.rewind()?,
        }
        self.rewinds += 1;
        Ok(())
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Looping
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(_) => true,
            FileBackend::Images(source) => source.last_error.is_none(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        let (frames_captured, location) = match &self.backend {
            FileBackend::Synthetic(source) => (source.frame_count, source.config.path.clone()),
            FileBackend::Images(source) => (source.frame_count, source.config.path.clone()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        };
        SourceStats {
            frames_captured,
            rewinds: self.rewinds,
            location,
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    scene: SyntheticScene,
    position: u64,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        let scene = SyntheticScene::new(config.scene.clone());
        Self {
            config,
            scene,
            position: 0,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("FileSource: connected to {} (synthetic)", self.config.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<BgrFrame>> {
        if self.scene.is_exhausted(self.position) {
            return Ok(None);
        }
        let frame = self.scene.render(self.position);
        self.position += 1;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn rewind(&mut self) {
        self.position = 0;
    }
}

// ----------------------------------------------------------------------------
// Still images
// ----------------------------------------------------------------------------

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

struct ImageSequenceSource {
    config: FileConfig,
    files: Vec<PathBuf>,
    position: usize,
    frame_count: u64,
    last_error: Option<String>,
}

impl ImageSequenceSource {
    fn new(config: FileConfig) -> Result<Self> {
        let path = Path::new(&config.path);
        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("failed to list {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| has_image_extension(p))
                .collect();
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };
        if files.is_empty() {
            return Err(anyhow!("no PNG/JPEG images in {}", path.display()));
        }
        Ok(Self {
            config,
            files,
            position: 0,
            frame_count: 0,
            last_error: None,
        })
    }

    fn connect(&mut self) -> Result<()> {
        if !self.files[0].exists() {
            return Err(anyhow!("image file {} not found", self.files[0].display()));
        }
        log::info!(
            "FileSource: connected to {} ({} image(s))",
            self.config.path,
            self.files.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<BgrFrame>> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        let decoded = image::open(path).map_err(|e| {
            let message = format!("failed to decode {}: {}", path.display(), e);
            self.last_error = Some(message.clone());
            anyhow!(message)
        })?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        self.frame_count += 1;
        self.last_error = None;
        Ok(Some(BgrFrame::from_rgb(rgb.into_raw(), width, height)))
    }

    fn rewind(&mut self) {
        self.position = 0;
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_image_input(path: &Path) -> bool {
    path.is_dir() || has_image_extension(path)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(length: Option<u64>) -> FileConfig {
        FileConfig {
            path: "stub://lot".to_string(),
            target_fps: 30,
            scene: SceneConfig {
                length,
                ..SceneConfig::new(64, 48)
            },
        }
    }

    #[test]
    fn rejects_remote_urls() {
        let config = FileConfig {
            path: "rtsp://camera/stream".to_string(),
            ..stub_config(None)
        };
        assert!(FileSource::new(config).is_err());
    }

    #[test]
    fn stub_source_ends_and_rewinds() -> Result<()> {
        let mut source = FileSource::new(stub_config(Some(2)))?;
        source.connect()?;
        assert_eq!(source.mode(), SourceMode::Looping);

        let first = source.next_frame()?.ok_or_else(|| anyhow!("no frame"))?;
        assert_eq!((first.width, first.height), (64, 48));
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());

        source.rewind()?;
        let again = source.next_frame()?.ok_or_else(|| anyhow!("no frame"))?;
        assert_eq!(again, first);

        let stats = source.stats();
        assert_eq!(stats.frames_captured, 3);
        assert_eq!(stats.rewinds, 1);
        Ok(())
    }

    #[test]
    fn image_directory_plays_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        image::RgbImage::from_pixel(8, 4, image::Rgb([255, 0, 0])).save(dir.path().join("b.png"))?;
        image::RgbImage::from_pixel(8, 4, image::Rgb([0, 0, 255])).save(dir.path().join("a.png"))?;
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let mut source = FileSource::new(FileConfig {
            path: dir.path().to_string_lossy().into_owned(),
            ..stub_config(None)
        })?;
        source.connect()?;

        // a.png is blue in RGB, so BGR [255, 0, 0].
        let a = source.next_frame()?.ok_or_else(|| anyhow!("no frame"))?;
        assert_eq!(a.pixel(0, 0), Some([255, 0, 0]));
        let b = source.next_frame()?.ok_or_else(|| anyhow!("no frame"))?;
        assert_eq!(b.pixel(0, 0), Some([0, 0, 255]));
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn corrupt_image_is_a_read_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png")?;
        let mut source = FileSource::new(FileConfig {
            path: path.to_string_lossy().into_owned(),
            ..stub_config(None)
        })?;
        source.connect()?;
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        Ok(())
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn video_requires_ffmpeg_feature() {
        let config = FileConfig {
            path: "carPark.mp4".to_string(),
            ..stub_config(None)
        };
        assert!(FileSource::new(config).is_err());
    }
}
