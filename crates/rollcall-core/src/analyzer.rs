//! Seams for the expensive, fallible detectors the pipeline consumes.

use crate::types::{BoundingBox, FaceCapture};
use rollcall_hw::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Turns a frame containing a face into an embedding.
///
/// Implementations must report zero or several faces as
/// [`FaceCapture::NoFace`] / [`FaceCapture::MultipleFaces`], not as errors.
pub trait FaceAnalyzer: Send {
    fn analyze(&mut self, frame: &Frame) -> Result<FaceCapture, AnalyzerError>;
}

/// Finds the region of the frame occupied by the subject, if any.
pub trait SubjectLocator: Send {
    fn locate(&mut self, frame: &Frame) -> Result<Option<BoundingBox>, AnalyzerError>;
}

/// Locator that never finds a subject; downstream checks use the full frame.
pub struct FullFrameLocator;

impl SubjectLocator for FullFrameLocator {
    fn locate(&mut self, _frame: &Frame) -> Result<Option<BoundingBox>, AnalyzerError> {
        Ok(None)
    }
}
