//! Synthetic camera (`stub://name`).
//!
//! Produces a noisy gray scene in which a bright square "visitor" appears for
//! `PRESENT_FRAMES` frames and then leaves for `ABSENT_FRAMES` frames. While the
//! visitor is present the focus drifts, so frames within one visit differ in
//! sharpness and the engine has something to choose between.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FramePacer, FrameSource, SourceStats};
use crate::config::SourceSettings;

const PRESENT_FRAMES: u64 = 40;
const ABSENT_FRAMES: u64 = 60;
/// Focus cycles through this many blur levels while the visitor is present.
const FOCUS_STEPS: u64 = 5;

pub struct SyntheticSource {
    settings: SourceSettings,
    rng: StdRng,
    pacer: FramePacer,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        let pacer = FramePacer::new(settings.target_fps);
        Self {
            settings,
            rng: StdRng::from_entropy(),
            pacer,
            frame_count: 0,
            connected: false,
        }
    }

    /// Use a fixed noise seed so two runs produce identical frames.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Whether the frame with the given 1-based index shows the visitor.
    pub fn visitor_present(frame_index: u64) -> bool {
        frame_index.saturating_sub(1) % (PRESENT_FRAMES + ABSENT_FRAMES) < PRESENT_FRAMES
    }

    fn render(&mut self) -> RgbImage {
        let (width, height) = (self.settings.width, self.settings.height);
        let mut image = RgbImage::from_fn(width, height, |_, _| {
            let level = self.rng.gen_range(40u8..160);
            Rgb([level, level, level])
        });

        if !Self::visitor_present(self.frame_count) {
            return image;
        }

        let side = (width.min(height) / 3).max(1);
        let cycle = (self.frame_count - 1) % (PRESENT_FRAMES + ABSENT_FRAMES);
        let travel = width.saturating_sub(side);
        let x = (travel as u64 * cycle / PRESENT_FRAMES) as u32;
        let y = (height.saturating_sub(side)) / 2;
        for py in y..(y + side).min(height) {
            for px in x..(x + side).min(width) {
                image.put_pixel(px, py, Rgb([255, 255, 255]));
            }
        }

        let sigma = (cycle % FOCUS_STEPS) as f32 * 0.8;
        if sigma > 0.0 {
            image = image::imageops::blur(&image, sigma);
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        if self.settings.width == 0 || self.settings.height == 0 {
            return Err(anyhow!(
                "synthetic source needs a non-zero resolution, got {}x{}",
                self.settings.width,
                self.settings.height
            ));
        }
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.settings.url,
            self.settings.width,
            self.settings.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected"));
        }
        self.pacer.wait();
        self.frame_count += 1;
        Ok(Some(self.render()))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.settings.url.clone(),
        }
    }
}
