//! Frame type and pixel conversions: YUYV to RGB, Y16 downscale, luma.

use std::time::Instant;

/// A captured camera frame. Immutable once captured.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved pixel data (`width * height * channels` bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1 for grayscale, 3 for RGB.
    pub channels: u8,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap a grayscale buffer, validating its length.
    pub fn gray(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        Self::with_channels(data, width, height, 1)
    }

    /// Wrap an interleaved RGB buffer, validating its length.
    pub fn rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        Self::with_channels(data, width, height, 3)
    }

    fn with_channels(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
            timestamp: Instant::now(),
            sequence: 0,
        })
    }

    /// Stamp the frame with a capture sequence number.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn is_color(&self) -> bool {
        self.channels == 3
    }

    /// Number of pixels (not bytes).
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Grayscale plane of the frame. RGB uses integer BT.601 luma weights.
    pub fn luma(&self) -> Vec<u8> {
        if !self.is_color() {
            return self.data.clone();
        }
        self.data
            .chunks_exact(3)
            .map(|px| {
                let y = 77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32;
                (y >> 8) as u8
            })
            .collect()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Convert packed YUYV (4:2:2) to interleaved RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share
/// the chroma pair. Uses the integer BT.601 studio-swing transform.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for quad in yuyv[..expected].chunks_exact(4) {
        let d = quad[1] as i32 - 128;
        let e = quad[3] as i32 - 128;
        for y in [quad[0], quad[2]] {
            let c = y as i32 - 16;
            rgb.push(clamp_u8((298 * c + 409 * e + 128) >> 8));
            rgb.push(clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8));
            rgb.push(clamp_u8((298 * c + 516 * d + 128) >> 8));
        }
    }
    Ok(rgb)
}

/// Downscale 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(buf: &[u8], pixels: usize) -> Result<Vec<u8>, FrameError> {
    let expected = pixels * 2;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_black_and_white() {
        // 2x1 image: black pixel then white pixel, neutral chroma
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_blue_chroma() {
        // High U (Cb) pushes blue above red and green
        let yuyv = vec![100, 240, 100, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        let (r, g, b) = (rgb[0], rgb[1], rgb[2]);
        assert!(b > r + 20 && b > g + 20, "expected blue-dominant, got {r},{g},{b}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let buf = vec![0xff, 0x10, 0x00, 0xab];
        assert_eq!(y16_to_grayscale(&buf, 2).unwrap(), vec![0x10, 0xab]);
    }

    #[test]
    fn test_frame_length_validated() {
        assert!(Frame::rgb(vec![0; 5], 2, 1).is_err());
        assert!(Frame::gray(vec![0; 2], 2, 1).is_ok());
    }

    #[test]
    fn test_luma_of_rgb_and_gray() {
        let white = Frame::rgb(vec![255; 3], 1, 1).unwrap();
        assert_eq!(white.luma(), vec![255]);

        let gray = Frame::gray(vec![7, 9], 2, 1).unwrap();
        assert_eq!(gray.luma(), vec![7, 9]);
    }
}
