//! Frame ingestion sources.
//!
//! This module provides the sources the monitor pulls frames from:
//! - Synthetic camera (`stub://name`) for dry runs and tests
//! - Local image files or directories (replay)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - HTTP MJPEG/JPEG cameras (feature: ingest-http)
//!
//! Sources are pull-based and blocking. A read error skips one frame; it never
//! ends the stream. `Ok(None)` means the source is exhausted.

pub mod file;
#[cfg(feature = "ingest-http")]
pub mod http;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::{Duration, Instant};

use crate::config::SourceSettings;

pub use file::FileSource;
#[cfg(feature = "ingest-http")]
pub use http::HttpSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A blocking, pull-based supplier of decoded frames.
pub trait FrameSource {
    /// Open the underlying device, directory or stream.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    ///
    /// `Err` is a failed read for this call only; `Ok(None)` ends the stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Pick a source implementation from the configured URL.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.is_empty() {
        return Err(anyhow!("source url cannot be empty"));
    }
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return open_http(settings);
    }
    if url.starts_with("/dev/video") || url.starts_with("v4l2://") {
        return open_v4l2(settings);
    }
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Box::new(FileSource::new(path, settings)?));
    }
    if url.contains("://") {
        return Err(anyhow!("unsupported source url '{}'", url));
    }
    Ok(Box::new(FileSource::new(url, settings)?))
}

#[cfg(feature = "ingest-http")]
fn open_http(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(HttpSource::new(settings.clone())?))
}

#[cfg(not(feature = "ingest-http"))]
fn open_http(_settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!("http cameras require the ingest-http feature"))
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::new(settings.clone())))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(_settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!("v4l2 devices require the ingest-v4l2 feature"))
}

// ----------------------------------------------------------------------------
// Frame pacing
// ----------------------------------------------------------------------------

/// Holds a source to its target frame rate by sleeping between frames.
/// A target of zero disables pacing.
pub(crate) struct FramePacer {
    interval: Duration,
    last_frame_at: Option<Instant>,
}

impl FramePacer {
    pub(crate) fn new(target_fps: u32) -> Self {
        Self {
            interval: frame_interval(target_fps),
            last_frame_at: None,
        }
    }

    pub(crate) fn wait(&mut self) {
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

/// How long a live source may go without a frame before it reports unhealthy.
#[cfg_attr(
    not(any(feature = "ingest-http", feature = "ingest-v4l2")),
    allow(dead_code)
)]
pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}
