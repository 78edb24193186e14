//! Frame representation for the episode engine.
//!
//! - `Frame`: decoded RGB image plus its grayscale, histogram-equalized derivative.
//! - `DetectionSignal`: per-frame match count and quality score, consumed by the policy.
//!
//! A `Frame` lives for one loop iteration. Only the RGB image survives, and only
//! when the episode buffer admits it.

use image::{GrayImage, RgbImage};
use imageproc::contrast::equalize_histogram;

use crate::error::{MonitorError, MonitorResult};

// ----------------------------------------------------------------------------
// Frame: one decoded capture
// ----------------------------------------------------------------------------

/// A captured frame and the preprocessed view detectors run against.
pub struct Frame {
    image: RgbImage,
    gray: GrayImage,
}

impl Frame {
    /// Preprocess a raw capture: grayscale conversion followed by histogram
    /// equalization. Empty captures are rejected as transient frame errors.
    pub fn from_rgb(image: RgbImage) -> MonitorResult<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(MonitorError::TransientFrame(format!(
                "empty frame ({}x{})",
                width, height
            )));
        }
        let gray = image::imageops::grayscale(&image);
        let gray = equalize_histogram(&gray);
        Ok(Self { image, gray })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Original color capture.
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Grayscale, contrast-equalized view.
    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Give up the preprocessed view and keep the capture for buffering.
    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

// ----------------------------------------------------------------------------
// DetectionSignal: what the trigger policy sees
// ----------------------------------------------------------------------------

/// Detection outcome and sharpness of a single frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionSignal {
    /// Number of target regions found (after the min-size filter).
    pub match_count: usize,
    /// Laplacian variance of the preprocessed frame. Higher is sharper.
    pub quality_score: f64,
}

impl DetectionSignal {
    pub fn new(match_count: usize, quality_score: f64) -> Self {
        Self {
            match_count,
            quality_score,
        }
    }

    /// A frame with no matches. The score is irrelevant to the policy.
    pub fn empty() -> Self {
        Self::new(0, 0.0)
    }

    pub fn is_detection(&self) -> bool {
        self.match_count > 0
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn preprocess_keeps_dimensions() {
        let image = RgbImage::from_fn(32, 16, |x, y| Rgb([(x * 8) as u8, (y * 16) as u8, 10]));
        let frame = Frame::from_rgb(image).unwrap();
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 16);
        assert_eq!(frame.gray().dimensions(), (32, 16));
    }

    #[test]
    fn equalization_stretches_low_contrast_frames() {
        // Two close gray levels end up at opposite ends of the range.
        let image = RgbImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgb([100, 100, 100])
            } else {
                Rgb([110, 110, 110])
            }
        });
        let frame = Frame::from_rgb(image).unwrap();
        let dark = frame.gray().get_pixel(0, 0)[0];
        let bright = frame.gray().get_pixel(7, 0)[0];
        assert!(bright - dark > 100, "dark={} bright={}", dark, bright);
    }

    #[test]
    fn empty_frame_is_transient_error() {
        let err = Frame::from_rgb(RgbImage::new(0, 0)).err().unwrap();
        assert!(matches!(err, MonitorError::TransientFrame(_)));
    }

    #[test]
    fn empty_signal_is_not_a_detection() {
        assert!(!DetectionSignal::empty().is_detection());
        assert!(DetectionSignal::new(2, 1.5).is_detection());
    }
}
