//! HTTP camera source.
//!
//! Reads `multipart/x-mixed-replace` MJPEG streams, or polls a JPEG snapshot
//! endpoint when the camera answers with a single image. A dropped MJPEG
//! stream fails the current read and is reopened on the next one.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::io::Read;
use std::time::{Duration, Instant};
use url::Url;

use super::{frame_interval, health_grace, FrameSource, SourceStats};
use crate::config::SourceSettings;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct HttpSource {
    settings: SourceSettings,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let url = Url::parse(&settings.url).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        Ok(Self {
            settings,
            stream: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            last_error: None,
        })
    }

    fn read_jpeg(&mut self) -> Result<Vec<u8>> {
        if self.stream.is_none() {
            self.connect()?;
        }
        let result = match self.stream.as_mut() {
            Some(HttpStream::Mjpeg(stream)) => stream.read_next_jpeg(),
            Some(HttpStream::SingleJpeg) => fetch_single_jpeg(&self.settings.url),
            None => Err(anyhow!("http source not connected")),
        };
        if let Err(err) = &result {
            self.last_error = Some(err.to_string());
            if matches!(self.stream, Some(HttpStream::Mjpeg(_))) {
                log::warn!("HttpSource: stream from {} dropped: {}", self.settings.url, err);
                self.stream = None;
            }
        }
        result
    }
}

impl FrameSource for HttpSource {
    fn connect(&mut self) -> Result<()> {
        let response = ureq::get(&self.settings.url)
            .call()
            .with_context(|| format!("connect to http camera {}", self.settings.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
            log::info!("HttpSource: connected to {} (mjpeg)", self.settings.url);
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
            log::info!("HttpSource: connected to {} (snapshot)", self.settings.url);
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let min_interval = frame_interval(self.settings.target_fps);
        loop {
            let jpeg_bytes = self.read_jpeg()?;

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                let elapsed = now.duration_since(last);
                if elapsed < min_interval {
                    if matches!(self.stream, Some(HttpStream::Mjpeg(_))) {
                        continue;
                    }
                    std::thread::sleep(min_interval - elapsed);
                }
            }

            let image = decode_jpeg(&jpeg_bytes)?;
            self.frame_count += 1;
            self.last_frame_at = Some(Instant::now());
            self.last_error = None;
            return Ok(Some(image));
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.settings.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.settings.url.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == 0xD8)?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == 0xD9)?;
    Some((start, start + 2 + end + 2))
}
