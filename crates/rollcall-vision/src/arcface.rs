//! ArcFace embedding extraction via ONNX Runtime.

use crate::{to_rgb, VisionError};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{BoundingBox, Embedding};
use rollcall_hw::Frame;
use std::path::Path;

const INPUT_SIZE: u32 = 112;
const MEAN: f32 = 127.5;
// Symmetric normalisation, unlike SCRFD's 128.0.
const STD: f32 = 127.5;
pub const EMBEDDING_DIM: usize = 512;

pub struct ArcFaceEncoder {
    session: Session,
}

impl ArcFaceEncoder {
    pub fn load(model_path: &Path) -> Result<Self, VisionError> {
        if !model_path.exists() {
            return Err(VisionError::ModelNotFound(model_path.display().to_string()));
        }
        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// L2-normalised embedding of the face inside `face`.
    pub fn encode(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Embedding, VisionError> {
        let crop = face_crop(frame, face)?;
        let input = preprocess(&crop);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::Inference(format!("embedding: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(VisionError::Inference(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Square crop centred on the face box, resized to the model input.
fn face_crop(frame: &Frame, face: &BoundingBox) -> Result<RgbImage, VisionError> {
    let side = face.width.max(face.height);
    let square = BoundingBox::new(
        face.x + (face.width - side) / 2.0,
        face.y + (face.height - side) / 2.0,
        side,
        side,
    );
    let rect = square
        .clamp_to(frame.width, frame.height)
        .ok_or_else(|| VisionError::Inference("face box lies outside the frame".into()))?;
    let rgb = to_rgb(frame)?;
    let cropped = imageops::crop_imm(&rgb, rect.x, rect.y, rect.width, rect.height).to_image();
    Ok(imageops::resize(&cropped, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle))
}

fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px.0[c] as f32 - MEAN) / STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}
