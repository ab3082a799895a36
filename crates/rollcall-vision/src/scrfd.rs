//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. Landmark outputs
//! are ignored: only boxes and scores are needed for face counting and
//! subject localisation.

use crate::{to_rgb, VisionError};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::BoundingBox;
use rollcall_hw::Frame;
use std::path::Path;

const INPUT_SIZE: usize = 640;
const MEAN: f32 = 127.5;
const STD: f32 = 128.0;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// A detected face in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
}

/// Scale and padding applied when fitting the frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> (Self, usize, usize) {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as usize).clamp(1, INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, INPUT_SIZE);
        let lb = Self {
            scale,
            pad_x: ((INPUT_SIZE - new_w) / 2) as f32,
            pad_y: ((INPUT_SIZE - new_h) / 2) as f32,
        };
        (lb, new_w, new_h)
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score output, bbox output) for one stride.
type StrideOutputs = (usize, usize);

pub struct ScrfdDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
    score_threshold: f32,
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, VisionError> {
        if !model_path.exists() {
            return Err(VisionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = %model_path.display(), outputs = ?names, "loaded SCRFD model");
        if names.len() < 6 {
            return Err(VisionError::Inference(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }

        Ok(Self {
            session,
            stride_outputs: discover_outputs(&names),
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        })
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Faces in the frame, highest score first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, VisionError> {
        let (input, letterbox) = preprocess(frame)?;
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (pos, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Inference(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Inference(format!("boxes stride {stride}: {e}")))?;
            all.extend(decode_stride(scores, boxes, stride, &letterbox, self.score_threshold));
        }

        Ok(nms(all, NMS_IOU))
    }
}

/// Letterboxed NCHW tensor in RGB order, normalised for SCRFD.
fn preprocess(frame: &Frame) -> Result<(Array4<f32>, Letterbox), VisionError> {
    let rgb = to_rgb(frame)?;
    let (letterbox, new_w, new_h) = Letterbox::fit(frame.width as usize, frame.height as usize);
    let resized = imageops::resize(&rgb, new_w as u32, new_h as u32, FilterType::Triangle);

    // Padding is left at zero, which is MEAN after normalisation.
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, px) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, oy + y as usize, ox + x as usize]] = (px.0[c] as f32 - MEAN) / STD;
        }
    }
    Ok((tensor, letterbox))
}

/// Map output tensors to strides by name (`score_8`, `bbox_8`, ...), or fall
/// back to the usual export order: scores for 8/16/32, then boxes.
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();

    match named {
        Some(v) if v.len() == 3 => {
            tracing::debug!(?v, "SCRFD outputs mapped by name");
            [v[0], v[1], v[2]]
        }
        _ => {
            tracing::debug!(?names, "SCRFD outputs mapped by position");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let grid_w = INPUT_SIZE / stride;
    let grid_h = INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= threshold {
                return None;
            }
            let d = boxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * s;
            let cy = (cell / grid_w) as f32 * s;

            let (x1, y1) = letterbox.to_frame(cx - d[0] * s, cy - d[1] * s);
            let (x2, y2) = letterbox.to_frame(cx + d[2] * s, cy + d[3] * s);
            Some(Detection {
                bbox: BoundingBox::new(x1, y1, x2 - x1, y2 - y1),
                score,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression. Output is sorted by descending score.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let iy = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = ix * iy;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
