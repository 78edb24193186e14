//! V4L2 frame source.
//!
//! Captures from a local device node (e.g. `/dev/video0`), asking the driver
//! for RGB24 at the configured resolution. Drivers that insist on YUYV or
//! MJPEG are converted or decoded in-process.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;
use std::time::Instant;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{health_grace, FrameSource, SourceStats};
use crate::config::SourceSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CaptureFormat {
    Raw(PixelFormat),
    Mjpeg,
}

pub struct V4l2Source {
    settings: SourceSettings,
    device_path: String,
    state: Option<DeviceV4l2State>,
    format: CaptureFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(settings: SourceSettings) -> Self {
        let device_path = settings
            .url
            .strip_prefix("v4l2://")
            .unwrap_or(&settings.url)
            .to_string();
        Self {
            active_width: settings.width,
            active_height: settings.height,
            device_path,
            settings,
            state: None,
            format: CaptureFormat::Raw(PixelFormat::Rgb24),
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }
}

impl FrameSource for V4l2Source {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.format = if &format.fourcc.repr == b"MJPG" {
            CaptureFormat::Mjpeg
        } else {
            let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)
                .ok_or_else(|| anyhow!("unsupported v4l2 pixel format {}", format.fourcc))?;
            CaptureFormat::Raw(pixel_format)
        };

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.device_path,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{}, {:?})",
            self.device_path,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        let image = match self.format {
            CaptureFormat::Raw(format) => {
                normalize_to_rgb(buf, self.active_width, self.active_height, format)?
            }
            CaptureFormat::Mjpeg => image::load_from_memory(buf)
                .context("decode v4l2 mjpeg frame")?
                .into_rgb8(),
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Ok(Some(image))
    }

    fn is_healthy(&self) -> bool {
        if self.state.is_none() || self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= health_grace(self.settings.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.device_path.clone(),
        }
    }
}
