//! Detector seam implementations backed by SCRFD + ArcFace.

use crate::arcface::ArcFaceEncoder;
use crate::scrfd::ScrfdDetector;
use crate::{arcface_model_path, scrfd_model_path, VisionError};
use rollcall_core::{AnalyzerError, BoundingBox, FaceAnalyzer, FaceCapture, SubjectLocator};
use rollcall_hw::Frame;
use std::path::Path;

/// Face counting plus embedding extraction for a single query image.
pub struct OnnxFaceAnalyzer {
    detector: ScrfdDetector,
    encoder: ArcFaceEncoder,
}

impl OnnxFaceAnalyzer {
    pub fn load(model_dir: &Path) -> Result<Self, VisionError> {
        Ok(Self {
            detector: ScrfdDetector::load(&scrfd_model_path(model_dir))?,
            encoder: ArcFaceEncoder::load(&arcface_model_path(model_dir))?,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<FaceCapture, AnalyzerError> {
        let faces = self.detector.detect(frame)?;
        match faces.as_slice() {
            [] => Ok(FaceCapture::NoFace),
            [face] => {
                tracing::debug!(score = face.score, "single face detected");
                Ok(FaceCapture::Single(self.encoder.encode(frame, &face.bbox)?))
            }
            many => Ok(FaceCapture::MultipleFaces(many.len())),
        }
    }
}

/// Subject locator that extends the largest detected face into an estimate
/// of the person's torso and legs.
pub struct FaceBodyLocator {
    detector: ScrfdDetector,
}

impl FaceBodyLocator {
    pub fn new(detector: ScrfdDetector) -> Self {
        Self { detector }
    }

    pub fn load(model_dir: &Path) -> Result<Self, VisionError> {
        Ok(Self::new(ScrfdDetector::load(&scrfd_model_path(model_dir))?))
    }
}

impl SubjectLocator for FaceBodyLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Option<BoundingBox>, AnalyzerError> {
        let faces = self.detector.detect(frame)?;
        let largest = faces
            .iter()
            .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()));
        Ok(largest.map(|f| body_from_face(&f.bbox)))
    }
}

/// Three face-widths wide, from half a face above the head to seven face
/// heights below it. Callers clip the result to the frame.
pub fn body_from_face(face: &BoundingBox) -> BoundingBox {
    let cx = face.x + face.width / 2.0;
    let width = face.width * 3.0;
    BoundingBox::new(cx - width / 2.0, face.y - face.height * 0.5, width, face.height * 7.0)
}
