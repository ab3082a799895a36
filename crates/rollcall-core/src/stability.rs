//! Motion stability detection.
//!
//! Each frame's region of interest is reduced to a single motion magnitude:
//! the median absolute difference between the grayscale region and a
//! Gaussian-blurred copy of it, after resizing to a fixed grid, expressed in
//! grid-pixel units. An exponential moving average of that magnitude must
//! stay at or below the threshold for a sustained duration before the scene
//! is reported stable.

use crate::imaging;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use rollcall_hw::Frame;
use std::time::{Duration, Instant};

/// Fixed resolution (width, height) the region is resampled to before scoring.
pub const MOTION_GRID: (u32, u32) = (224, 160);

/// Sigma matching a 5x5 Gaussian kernel with automatic sigma.
const BLUR_SIGMA: f32 = 1.1;

#[derive(Debug, Clone, Copy)]
pub struct StabilityConfig {
    /// EMA level (grid pixels) at or below which the scene counts as still.
    pub motion_threshold: f32,
    /// Weight of the newest sample in the EMA.
    pub alpha: f32,
    /// How long the EMA must stay under the threshold.
    pub stable_for: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 5.0,
            alpha: 0.25,
            stable_for: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityState {
    Accumulating,
    Stable,
}

/// Per-stream stability tracker. One instance per pipeline.
pub struct StabilityDetector {
    config: StabilityConfig,
    ema: f32,
    still_since: Option<Instant>,
    state: StabilityState,
}

impl StabilityDetector {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            ema: 0.0,
            still_since: None,
            state: StabilityState::Accumulating,
        }
    }

    /// Score the frame's region of interest and fold it into the state,
    /// using the frame's capture timestamp as the clock.
    pub fn observe(&mut self, frame: &Frame, subject: Option<&BoundingBox>) -> bool {
        let score = motion_score(frame, subject);
        self.update(score, frame.timestamp)
    }

    /// Fold one motion sample taken at `at` into the state. Returns whether
    /// the scene is stable after this sample.
    pub fn update(&mut self, score: f32, at: Instant) -> bool {
        let alpha = self.config.alpha;
        self.ema = alpha * score + (1.0 - alpha) * self.ema;

        if self.ema <= self.config.motion_threshold {
            let since = *self.still_since.get_or_insert(at);
            if at.saturating_duration_since(since) >= self.config.stable_for {
                self.state = StabilityState::Stable;
            }
        } else {
            self.still_since = None;
            self.state = StabilityState::Accumulating;
        }

        self.state == StabilityState::Stable
    }

    pub fn state(&self) -> StabilityState {
        self.state
    }

    pub fn motion_ema(&self) -> f32 {
        self.ema
    }

    pub fn reset(&mut self) {
        self.ema = 0.0;
        self.still_since = None;
        self.state = StabilityState::Accumulating;
    }
}

/// Motion magnitude of the frame's region of interest, in grid pixels.
///
/// Returns `f32::INFINITY` for a frame whose buffer does not match its
/// dimensions, so a corrupt frame can never count as still.
pub fn motion_score(frame: &Frame, subject: Option<&BoundingBox>) -> f32 {
    let rect = imaging::region_of_interest(frame, subject);
    let Some(region) = imaging::gray_region(frame, rect) else {
        return f32::INFINITY;
    };

    let (grid_w, grid_h) = MOTION_GRID;
    let sampled = imageops::resize(&region, grid_w, grid_h, FilterType::Triangle);
    let blurred = imageops::blur(&sampled, BLUR_SIGMA);

    let mut histogram = [0u32; 256];
    for (a, b) in sampled.as_raw().iter().zip(blurred.as_raw().iter()) {
        histogram[a.abs_diff(*b) as usize] += 1;
    }

    median(&histogram, sampled.as_raw().len()) / 255.0 * grid_w.max(grid_h) as f32
}

/// Median of a 256-bin histogram holding `count` samples. Even counts
/// average the two middle values.
fn median(histogram: &[u32; 256], count: usize) -> f32 {
    if count == 0 {
        return 0.0;
    }
    let nth = |n: usize| -> f32 {
        let mut seen = 0usize;
        for (value, &bin) in histogram.iter().enumerate() {
            seen += bin as usize;
            if seen > n {
                return value as f32;
            }
        }
        255.0
    };
    if count % 2 == 1 {
        nth(count / 2)
    } else {
        (nth(count / 2 - 1) + nth(count / 2)) / 2.0
    }
}
