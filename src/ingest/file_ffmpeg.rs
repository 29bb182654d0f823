//! Local video decoding with FFmpeg.
//!
//! Frames are scaled to BGR24 at the source resolution. At end of file the
//! decoder is drained before reporting exhaustion; `rewind` seeks back to the
//! first frame and flushes the decoder.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::file::FileConfig;
use super::pack_rows;
use crate::frame::BgrFrame;

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path)
            .with_context(|| format!("failed to open video file '{}' with ffmpeg", config.path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::BGR24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            config,
            input,
            stream_index,
            decoder,
            scaler,
            eof_sent: false,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        self.connected_at = Some(Instant::now());
        log::info!("FileSource: connected to {} (ffmpeg)", self.config.path);
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<BgrFrame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        // Frames already buffered in the decoder come first.
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        if self.eof_sent {
            return Ok(None);
        }

        while let Some((stream, packet)) = self.input.packets().next() {
            if stream.index() != self.stream_index {
                continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
                self.last_error = Some(e.to_string());
                return Err(anyhow!("send packet to ffmpeg decoder: {}", e));
            }
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
        }

        // End of file: drain what the decoder still holds.
        self.decoder.send_eof().context("signal end of file to decoder")?;
        self.eof_sent = true;
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        Ok(None)
    }

    pub(crate) fn rewind(&mut self) -> Result<()> {
        self.input.seek(0, ..).context("seek to first frame")?;
        self.decoder.flush();
        self.eof_sent = false;
        self.last_error = None;
        Ok(())
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    pub(crate) fn stats(&self) -> (u64, String) {
        (self.frame_count, self.config.path.clone())
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<BgrFrame> {
        let mut bgr = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut bgr)
            .context("scale frame to BGR")?;
        let frame = frame_to_bgr(&bgr)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }
}

fn frame_to_bgr(frame: &ffmpeg::frame::Video) -> Result<BgrFrame> {
    let width = frame.width();
    let height = frame.height();
    let pixels = pack_rows(
        frame.data(0),
        frame.stride(0),
        width as usize * 3,
        height as usize,
    )
    .context("ffmpeg frame row is out of bounds")?;
    Ok(BgrFrame::new(pixels, width, height))
}
