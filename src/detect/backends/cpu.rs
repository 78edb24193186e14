use std::collections::BTreeMap;

use anyhow::Result;
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionResult, MatchRegion};
use crate::frame::Frame;

/// Gray level (after equalization) above which a pixel counts as foreground.
const DEFAULT_BRIGHTNESS_THRESHOLD: u8 = 250;

/// CPU backend that reports bright connected regions.
///
/// Thresholds the equalized frame, labels 8-connected foreground blobs and
/// keeps the bounding boxes that meet the minimum match size. Good enough for
/// synthetic sources and lit test rigs; use the tract backend for real faces.
pub struct CpuBackend {
    min_match_size: u32,
    threshold: u8,
}

impl CpuBackend {
    pub fn new(min_match_size: u32) -> Self {
        Self {
            min_match_size,
            threshold: DEFAULT_BRIGHTNESS_THRESHOLD,
        }
    }

    /// Override the foreground threshold.
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    fn foreground(&self, gray: &GrayImage) -> GrayImage {
        GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            if gray.get_pixel(x, y)[0] >= self.threshold {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let mask = self.foreground(frame.gray());
        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

        // label -> (min_x, min_y, max_x, max_y, pixel count)
        let mut bounds: BTreeMap<u32, (u32, u32, u32, u32, u64)> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue;
            }
            let entry = bounds.entry(label).or_insert((x, y, x, y, 0));
            entry.0 = entry.0.min(x);
            entry.1 = entry.1.min(y);
            entry.2 = entry.2.max(x);
            entry.3 = entry.3.max(y);
            entry.4 += 1;
        }

        let mut result = DetectionResult::new(
            bounds
                .into_values()
                .map(|(min_x, min_y, max_x, max_y, pixels)| {
                    let width = max_x - min_x + 1;
                    let height = max_y - min_y + 1;
                    let fill = pixels as f32 / (width as f32 * height as f32);
                    MatchRegion {
                        x: min_x,
                        y: min_y,
                        width,
                        height,
                        confidence: fill,
                    }
                })
                .collect(),
        );
        result.retain_min_size(self.min_match_size);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn scene(square: Option<(u32, u32, u32)>) -> Frame {
        let image = RgbImage::from_fn(200, 150, |x, y| {
            if let Some((sx, sy, size)) = square {
                if x >= sx && x < sx + size && y >= sy && y < sy + size {
                    return Rgb([255, 255, 255]);
                }
            }
            let v = ((x * 7 + y * 13) % 180) as u8;
            Rgb([v, v, v])
        });
        Frame::from_rgb(image).unwrap()
    }

    #[test]
    fn finds_a_large_bright_square() {
        let mut backend = CpuBackend::new(70);
        let result = backend.detect(&scene(Some((40, 30, 80)))).unwrap();
        assert_eq!(result.match_count(), 1);
        let region = result.matches[0];
        assert_eq!((region.x, region.y), (40, 30));
        assert_eq!((region.width, region.height), (80, 80));
    }

    #[test]
    fn ignores_regions_below_min_size() {
        let mut backend = CpuBackend::new(70);
        let result = backend.detect(&scene(Some((10, 10, 40)))).unwrap();
        assert_eq!(result.match_count(), 0);
    }

    #[test]
    fn empty_scene_has_no_matches() {
        let mut backend = CpuBackend::new(70);
        assert_eq!(backend.detect(&scene(None)).unwrap().match_count(), 0);
    }
}
