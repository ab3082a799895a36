//! Frame to `image` buffer conversions shared by the per-frame checks.

use crate::types::{BoundingBox, PixelRect};
use image::{imageops, GrayImage, RgbImage};
use rollcall_hw::Frame;

/// Region of interest: the subject box clipped to the frame, or the whole
/// frame when there is no box or nothing of it survives clipping.
pub fn region_of_interest(frame: &Frame, subject: Option<&BoundingBox>) -> PixelRect {
    subject
        .and_then(|b| b.clamp_to(frame.width, frame.height))
        .unwrap_or(PixelRect {
            x: 0,
            y: 0,
            width: frame.width,
            height: frame.height,
        })
}

/// Grayscale crop of the frame. `None` if the frame buffer is inconsistent
/// with its declared dimensions.
pub fn gray_region(frame: &Frame, rect: PixelRect) -> Option<GrayImage> {
    let full = GrayImage::from_raw(frame.width, frame.height, frame.luma())?;
    Some(imageops::crop_imm(&full, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// RGB crop of the frame. `None` for grayscale frames.
pub fn rgb_region(frame: &Frame, rect: PixelRect) -> Option<RgbImage> {
    if !frame.is_color() {
        return None;
    }
    let full = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())?;
    Some(imageops::crop_imm(&full, rect.x, rect.y, rect.width, rect.height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_defaults_to_full_frame() {
        let frame = Frame::gray(vec![0; 12], 4, 3).unwrap();
        let rect = region_of_interest(&frame, None);
        assert_eq!((rect.width, rect.height), (4, 3));

        let outside = BoundingBox::new(50.0, 50.0, 5.0, 5.0);
        let rect = region_of_interest(&frame, Some(&outside));
        assert_eq!((rect.width, rect.height), (4, 3));
    }

    #[test]
    fn test_gray_region_crops() {
        let data: Vec<u8> = (0..12).collect();
        let frame = Frame::gray(data, 4, 3).unwrap();
        let roi = region_of_interest(&frame, Some(&BoundingBox::new(1.0, 1.0, 2.0, 2.0)));
        let img = gray_region(&frame, roi).unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.as_raw(), &vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_rgb_region_requires_colour() {
        let frame = Frame::gray(vec![0; 4], 2, 2).unwrap();
        assert!(rgb_region(&frame, region_of_interest(&frame, None)).is_none());
    }
}
