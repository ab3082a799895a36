use serde::{Deserialize, Serialize};

/// Subject location in frame-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Integer rectangle already clipped to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Clip to a `width` x `height` frame. Returns `None` when nothing of the
    /// box remains inside the frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        let x0 = self.x.max(0.0).floor() as u32;
        let y0 = self.y.max(0.0).floor() as u32;
        let x1 = ((self.x + self.width).max(0.0).ceil() as u32).min(width);
        let y1 = ((self.y + self.height).max(0.0).ceil() as u32).min(height);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(PixelRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// Fixed-length face embedding. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance. Callers must compare equal dimensions.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// What a face analyzer found in a query image.
///
/// Only `Single` carries an embedding; the other variants never reach
/// distance computation.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceCapture {
    Single(Embedding),
    NoFace,
    MultipleFaces(usize),
}
