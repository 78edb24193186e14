//! Frame sharpness scoring.
//!
//! The score is the variance of the discrete Laplacian of the grayscale frame.
//! Sharp frames have strong second-derivative responses at edges and score
//! high; motion-blurred or flat frames score near zero.

use image::GrayImage;
use imageproc::filter::laplacian_filter;

use crate::error::{MonitorError, MonitorResult};

/// Variance of the 3x3 Laplacian response over every pixel of `gray`.
pub fn laplacian_variance(gray: &GrayImage) -> MonitorResult<f64> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(MonitorError::transient("cannot score an empty frame"));
    }

    let response = laplacian_filter(gray);
    let n = f64::from(width) * f64::from(height);

    let mean = response.pixels().map(|p| f64::from(p[0])).sum::<f64>() / n;
    let variance = response
        .pixels()
        .map(|p| {
            let d = f64::from(p[0]) - mean;
            d * d
        })
        .sum::<f64>()
        / n;

    if !variance.is_finite() {
        return Err(MonitorError::transient("quality score is not finite"));
    }
    Ok(variance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(size: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn flat_frame_scores_zero() {
        let flat = GrayImage::from_pixel(40, 30, Luma([128]));
        assert_eq!(laplacian_variance(&flat).unwrap(), 0.0);
    }

    #[test]
    fn sharp_edges_outscore_blurred_copy() {
        let sharp = checkerboard(64, 8);
        let blurred = image::imageops::blur(&sharp, 3.0);
        let sharp_score = laplacian_variance(&sharp).unwrap();
        let blurred_score = laplacian_variance(&blurred).unwrap();
        assert!(
            sharp_score > blurred_score * 4.0,
            "sharp={} blurred={}",
            sharp_score,
            blurred_score
        );
    }

    #[test]
    fn scoring_is_deterministic() {
        let img = checkerboard(32, 4);
        assert_eq!(
            laplacian_variance(&img).unwrap(),
            laplacian_variance(&img).unwrap()
        );
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert!(laplacian_variance(&GrayImage::new(0, 0)).is_err());
    }
}
