#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionResult, MatchRegion};
use crate::frame::Frame;

/// Input size of the UltraFace RFB-320 family.
const MODEL_WIDTH: u32 = 320;
const MODEL_HEIGHT: u32 = 240;
const NMS_IOU_THRESHOLD: f32 = 0.3;

/// Tract-based face detector for ONNX models with UltraFace outputs.
///
/// Expects a model taking a `1x3x240x320` tensor normalized as
/// `(pixel - 127) / 128`, producing `scores [1, N, 2]` (background, face) and
/// `boxes [1, N, 4]` with normalized corner coordinates.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    min_match_size: u32,
    confidence_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, min_match_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, MODEL_HEIGHT as usize, MODEL_WIDTH as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            min_match_size,
            confidence_threshold: 0.7,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = image::imageops::resize(
            frame.image(),
            MODEL_WIDTH,
            MODEL_HEIGHT,
            FilterType::Triangle,
        );
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, MODEL_HEIGHT as usize, MODEL_WIDTH as usize),
            |(_, channel, y, x)| {
                let pixel = resized.get_pixel(x as u32, y as u32);
                (pixel[channel] as f32 - 127.0) / 128.0
            },
        );
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<MatchRegion>> {
        let scores = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no score output"))?;
        let boxes = outputs
            .get(1)
            .ok_or_else(|| anyhow!("model produced no box output"))?;
        let scores = scores
            .as_slice::<f32>()
            .context("score tensor was not f32")?;
        let boxes = boxes.as_slice::<f32>().context("box tensor was not f32")?;
        if scores.len() % 2 != 0 || boxes.len() != scores.len() * 2 {
            return Err(anyhow!(
                "unexpected output sizes: {} scores, {} box values",
                scores.len(),
                boxes.len()
            ));
        }

        let fw = frame.width() as f32;
        let fh = frame.height() as f32;
        let mut candidates: Vec<MatchRegion> = scores
            .chunks_exact(2)
            .zip(boxes.chunks_exact(4))
            .filter(|(score, _)| score[1] >= self.confidence_threshold)
            .map(|(score, b)| {
                let x1 = (b[0] * fw).clamp(0.0, fw);
                let y1 = (b[1] * fh).clamp(0.0, fh);
                let x2 = (b[2] * fw).clamp(0.0, fw);
                let y2 = (b[3] * fh).clamp(0.0, fh);
                MatchRegion {
                    x: x1 as u32,
                    y: y1 as u32,
                    width: (x2 - x1).max(0.0) as u32,
                    height: (y2 - y1).max(0.0) as u32,
                    confidence: score[1],
                }
            })
            .collect();

        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionResult> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let mut result = DetectionResult::new(self.decode(outputs, frame)?);
        result.retain_min_size(self.min_match_size);
        Ok(result)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::from_rgb(image::RgbImage::new(MODEL_WIDTH, MODEL_HEIGHT))
            .map_err(|e| anyhow!("{}", e))?;
        self.detect(&blank).map(|_| ())
    }
}

/// Greedy NMS over candidates sorted by descending confidence.
fn non_max_suppression(candidates: Vec<MatchRegion>, iou_threshold: f32) -> Vec<MatchRegion> {
    let mut kept: Vec<MatchRegion> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &MatchRegion, b: &MatchRegion) -> f32 {
    let ax2 = (a.x + a.width) as f32;
    let ay2 = (a.y + a.height) as f32;
    let bx2 = (b.x + b.width) as f32;
    let by2 = (b.y + b.height) as f32;
    let iw = (ax2.min(bx2) - (a.x.max(b.x) as f32)).max(0.0);
    let ih = (ay2.min(by2) - (a.y.max(b.y) as f32)).max(0.0);
    let inter = iw * ih;
    let union = (a.width * a.height + b.width * b.height) as f32 - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
