#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// COCO class labels in YOLOv8 output order.
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

const CXCYWH: usize = 4;

/// Tract-based YOLOv8 detector.
///
/// Loads a local ONNX export (`[1, 3, H, W]` input, `[1, 4 + classes, anchors]`
/// output), resizes each RGB frame to the model input, decodes boxes back to
/// frame pixels, and applies non-maximum suppression. No network I/O.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.1,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let (fw, fh) = (frame.width() as usize, frame.height() as usize);
        if fw == 0 || fh == 0 {
            return Err(anyhow!("frame has zero size"));
        }
        let pixels = frame.pixels();
        let expected_len = fw
            .checked_mul(fh)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let (mw, mh) = (self.width as usize, self.height as usize);
        // Nearest-neighbour resize straight into the NCHW tensor.
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, mh, mw), |(_, channel, y, x)| {
            let sx = x * fw / mw;
            let sy = y * fh / mh;
            pixels[(sy * fw + sx) * 3 + channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape();
        if shape.len() != 3 || shape[1] <= CXCYWH {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let classes = shape[1] - CXCYWH;
        let anchors = shape[2];
        let sx = frame.width() as f32 / self.width as f32;
        let sy = frame.height() as f32 / self.height as f32;
        let max_x = frame.width() as f32;
        let max_y = frame.height() as f32;

        let mut candidates = Vec::new();
        for i in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for c in 0..classes {
                let score = preds[[0, CXCYWH + c, i]];
                if score > best.1 {
                    best = (c, score);
                }
            }
            let (class_id, confidence) = best;
            if confidence < self.confidence_threshold {
                continue;
            }
            let cx = preds[[0, 0, i]] * sx;
            let cy = preds[[0, 1, i]] * sy;
            let w = preds[[0, 2, i]] * sx;
            let h = preds[[0, 3, i]] * sy;
            let x1 = (cx - w / 2.0).clamp(0.0, max_x);
            let y1 = (cy - h / 2.0).clamp(0.0, max_y);
            let x2 = (cx + w / 2.0).clamp(0.0, max_x);
            let y2 = (cy + h / 2.0).clamp(0.0, max_y);
            if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
                continue;
            }
            candidates.push(Candidate {
                class_id,
                confidence: confidence.min(1.0),
                x1,
                y1,
                x2,
                y2,
            });
        }

        non_max_suppression(&mut candidates, self.iou_threshold);

        Ok(candidates
            .into_iter()
            .map(|c| {
                let label = COCO_LABELS.get(c.class_id).copied().unwrap_or("unknown");
                Detection::new(
                    label,
                    c.confidence,
                    BoundingBox::new(c.x1 as i32, c.y1 as i32, c.x2 as i32, c.y2 as i32),
                )
            })
            .filter(|d| d.bbox.is_well_formed())
            .collect())
    }
}

struct Candidate {
    class_id: usize,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl Candidate {
    fn iou(&self, other: &Candidate) -> f32 {
        let iw = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let ih = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = iw * ih;
        let area_a = (self.x2 - self.x1) * (self.y2 - self.y1);
        let area_b = (other.x2 - other.x1) * (other.y2 - other.y1);
        let union = area_a + area_b - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Greedy NMS, highest confidence first, per class.
fn non_max_suppression(xs: &mut Vec<Candidate>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept = 0;
    for index in 0..xs.len() {
        let suppressed = (0..kept).any(|prev| {
            xs[prev].class_id == xs[index].class_id && xs[prev].iou(&xs[index]) > iou_threshold
        });
        if !suppressed {
            xs.swap(kept, index);
            kept += 1;
        }
    }
    xs.truncate(kept);
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(class_id: usize, confidence: f32, x1: f32) -> Candidate {
        Candidate {
            class_id,
            confidence,
            x1,
            y1: 0.0,
            x2: x1 + 10.0,
            y2: 10.0,
        }
    }

    #[test]
    fn nms_keeps_best_of_overlapping_boxes() {
        let mut xs = vec![cand(0, 0.5, 1.0), cand(0, 0.9, 0.0), cand(0, 0.7, 50.0)];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence, 0.9);
        assert_eq!(xs[1].confidence, 0.7);
    }

    #[test]
    fn nms_is_per_class() {
        let mut xs = vec![cand(0, 0.9, 0.0), cand(56, 0.8, 0.0)];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs.len(), 2);
    }
}
