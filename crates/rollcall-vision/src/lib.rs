//! rollcall-vision: ONNX Runtime implementations of the detector seams.
//!
//! SCRFD finds faces; ArcFace turns a face crop into a 512-d embedding.
//! [`OnnxFaceAnalyzer`] combines both for check-in and enrollment, and
//! [`FaceBodyLocator`] reuses SCRFD to estimate the subject region for the
//! compliance and stability checks.

pub mod analyzer;
pub mod arcface;
pub mod scrfd;

pub use analyzer::{body_from_face, FaceBodyLocator, OnnxFaceAnalyzer};
pub use arcface::ArcFaceEncoder;
pub use scrfd::{Detection, ScrfdDetector};

use image::{DynamicImage, GrayImage, RgbImage};
use rollcall_core::AnalyzerError;
use rollcall_hw::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model file not found: {0} (download from insightface and place in the model dir)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("frame buffer does not match its dimensions")]
    InvalidFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<VisionError> for AnalyzerError {
    fn from(e: VisionError) -> Self {
        match e {
            VisionError::ModelNotFound(path) => AnalyzerError::ModelUnavailable(path),
            other => AnalyzerError::Inference(other.to_string()),
        }
    }
}

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("models")
}

pub fn scrfd_model_path(model_dir: &Path) -> PathBuf {
    model_dir.join(SCRFD_MODEL_FILE)
}

pub fn arcface_model_path(model_dir: &Path) -> PathBuf {
    model_dir.join(ARCFACE_MODEL_FILE)
}

/// RGB view of a frame; grayscale frames are replicated across channels.
pub(crate) fn to_rgb(frame: &Frame) -> Result<RgbImage, VisionError> {
    if frame.is_color() {
        RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or(VisionError::InvalidFrame)
    } else {
        let gray = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or(VisionError::InvalidFrame)?;
        Ok(DynamicImage::ImageLuma8(gray).to_rgb8())
    }
}
