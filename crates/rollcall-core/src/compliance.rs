//! Per-frame compliance signals.
//!
//! The gate only needs two booleans per frame. [`ColourRatioClassifier`] is
//! the reference implementation: it checks that the upper and lower halves
//! of the subject region are dominated by a target colour channel and are
//! bright enough to judge.

use crate::imaging;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use rollcall_hw::Frame;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComplianceSignals {
    pub compliance_a: bool,
    pub compliance_b: bool,
}

/// Produces the two independent compliance checks for a frame.
pub trait ComplianceClassifier: Send {
    fn classify(&mut self, frame: &Frame, subject: Option<&BoundingBox>) -> ComplianceSignals;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    fn index(self) -> usize {
        match self {
            Channel::Red => 0,
            Channel::Green => 1,
            Channel::Blue => 2,
        }
    }
}

/// Threshold set for one half of the region.
#[derive(Debug, Clone, Copy)]
pub struct ColourRule {
    pub channel: Channel,
    /// Margin by which the target channel must exceed both others.
    pub delta: u8,
    /// Minimum share of dominant pixels, in [0, 1].
    pub min_ratio: f32,
    /// Minimum mean HSV value (max channel), in [0, 255].
    pub min_brightness: f32,
}

impl Default for ColourRule {
    fn default() -> Self {
        Self {
            channel: Channel::Blue,
            delta: 20,
            min_ratio: 0.12,
            min_brightness: 45.0,
        }
    }
}

/// Side length each half is downsampled to before counting.
const SAMPLE_SIZE: u32 = 32;

/// Upper half drives `compliance_a`, lower half drives `compliance_b`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColourRatioClassifier {
    pub upper: ColourRule,
    pub lower: ColourRule,
}

impl ColourRatioClassifier {
    pub fn new(upper: ColourRule, lower: ColourRule) -> Self {
        Self { upper, lower }
    }
}

impl ComplianceClassifier for ColourRatioClassifier {
    fn classify(&mut self, frame: &Frame, subject: Option<&BoundingBox>) -> ComplianceSignals {
        let rect = imaging::region_of_interest(frame, subject);
        // Colour cannot be judged on a grayscale frame.
        let Some(region) = imaging::rgb_region(frame, rect) else {
            return ComplianceSignals::default();
        };

        let (w, h) = region.dimensions();
        let split = h / 2;
        let upper = imageops::crop_imm(&region, 0, 0, w, split).to_image();
        let lower = imageops::crop_imm(&region, 0, split, w, h - split).to_image();

        ComplianceSignals {
            compliance_a: passes(&upper, &self.upper),
            compliance_b: passes(&lower, &self.lower),
        }
    }
}

fn passes(half: &RgbImage, rule: &ColourRule) -> bool {
    match dominance(half, rule.channel, rule.delta) {
        Some((ratio, brightness)) => brightness > rule.min_brightness && ratio > rule.min_ratio,
        None => false,
    }
}

/// Share of pixels where `channel` exceeds both other channels by more than
/// `delta`, plus the mean HSV value. `None` for an empty image.
pub fn dominance(img: &RgbImage, channel: Channel, delta: u8) -> Option<(f32, f32)> {
    if img.width() == 0 || img.height() == 0 {
        return None;
    }
    let small = imageops::resize(img, SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Triangle);

    let target = channel.index();
    let mut dominant = 0usize;
    let mut value_sum = 0u64;
    for px in small.pixels() {
        let c = px.0;
        let t = c[target] as i16;
        let wins = (0..3)
            .filter(|&i| i != target)
            .all(|i| t > c[i] as i16 + delta as i16);
        if wins {
            dominant += 1;
        }
        value_sum += c[0].max(c[1]).max(c[2]) as u64;
    }

    let n = (SAMPLE_SIZE * SAMPLE_SIZE) as f32;
    Some((dominant as f32 / n, value_sum as f32 / n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(w: u32, h: u32, top: [u8; 3], bottom: [u8; 3]) -> Frame {
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            let px = if y < h / 2 { top } else { bottom };
            for _ in 0..w {
                data.extend_from_slice(&px);
            }
        }
        Frame::rgb(data, w, h).unwrap()
    }

    #[test]
    fn test_blue_frame_passes_both() {
        let frame = solid(64, 64, [20, 30, 200], [20, 30, 200]);
        let signals = ColourRatioClassifier::default().classify(&frame, None);
        assert!(signals.compliance_a && signals.compliance_b);
    }

    #[test]
    fn test_red_frame_fails_both() {
        let frame = solid(64, 64, [200, 30, 20], [200, 30, 20]);
        let signals = ColourRatioClassifier::default().classify(&frame, None);
        assert_eq!(signals, ComplianceSignals::default());
    }

    #[test]
    fn test_halves_judged_independently() {
        let frame = solid(64, 64, [20, 30, 200], [120, 120, 120]);
        let signals = ColourRatioClassifier::default().classify(&frame, None);
        assert!(signals.compliance_a);
        assert!(!signals.compliance_b);
    }

    #[test]
    fn test_too_dark_fails() {
        let frame = solid(64, 64, [0, 0, 40], [0, 0, 40]);
        let signals = ColourRatioClassifier::default().classify(&frame, None);
        assert_eq!(signals, ComplianceSignals::default());
    }

    #[test]
    fn test_grayscale_frame_never_passes() {
        let frame = Frame::gray(vec![200; 64 * 64], 64, 64).unwrap();
        let signals = ColourRatioClassifier::default().classify(&frame, None);
        assert_eq!(signals, ComplianceSignals::default());
    }

    #[test]
    fn test_subject_box_limits_region() {
        // Left half blue, right half red; a box over the left half passes.
        let (w, h) = (64u32, 64u32);
        let mut data = Vec::new();
        for _ in 0..h {
            for x in 0..w {
                let px = if x < w / 2 { [20, 30, 200] } else { [200, 30, 20] };
                data.extend_from_slice(&px);
            }
        }
        let frame = Frame::rgb(data, w, h).unwrap();
        let subject = BoundingBox::new(0.0, 0.0, 32.0, 64.0);
        let signals = ColourRatioClassifier::default().classify(&frame, Some(&subject));
        assert!(signals.compliance_a && signals.compliance_b);
    }
}
