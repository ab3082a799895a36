//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::{CameraError, FrameSource};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Number of mmap buffers queued with the driver.
const STREAM_BUFFERS: u32 = 4;

/// Upper bound on a single dequeue. A device that stops delivering frames
/// turns into a retryable error instead of a blocked acquisition thread.
const GRAB_TIMEOUT: Duration = Duration::from_secs(2);

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale, downscaled to 8-bit.
    Y16,
}

/// V4L2 camera device handle with a persistent capture stream.
pub struct Camera {
    // Declared before `device` so the stream is unmapped first on drop.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and request
    /// the given resolution. The driver may negotiate a different one.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV (colour is needed by the compliance check); accept
        // GREY or Y16 if that is all the driver offers.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"Y16 ") || fourcc == FourCC::new(b"Y16\0") {
            PixelFormat::Y16
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or Y16)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            stream: None,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Convert a raw driver buffer into a frame based on the negotiated format.
    fn decode(&self, buf: &[u8], sequence: u32) -> Result<Frame, CameraError> {
        let pixels = (self.width * self.height) as usize;
        let conversion = |e: frame::FrameError| CameraError::CaptureFailed(e.to_string());

        let frame = match self.pixel_format {
            PixelFormat::Yuyv => {
                let rgb = frame::yuyv_to_rgb(buf, self.width, self.height).map_err(conversion)?;
                Frame::rgb(rgb, self.width, self.height)
            }
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Frame::gray(buf[..pixels].to_vec(), self.width, self.height)
            }
            PixelFormat::Y16 => {
                let gray = frame::y16_to_grayscale(buf, pixels).map_err(conversion)?;
                Frame::gray(gray, self.width, self.height)
            }
        }
        .map_err(conversion)?;

        Ok(frame.with_sequence(sequence))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn grab(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| {
                    CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
                })?;
            stream.set_timeout(GRAB_TIMEOUT);
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::Released);
        };

        let (buf, meta) = stream.next().map_err(|e| match e.kind() {
            ErrorKind::TimedOut => CameraError::CaptureFailed(format!(
                "no frame from {} within {}ms",
                self.device_path,
                GRAB_TIMEOUT.as_millis()
            )),
            _ => CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")),
        })?;
        let sequence = meta.sequence;
        // Copy out of the mmap buffer before it is requeued.
        let raw = buf.to_vec();
        self.decode(&raw, sequence)
    }

    fn release(&mut self) -> Result<(), CameraError> {
        // Dropping the stream issues STREAMOFF and unmaps the buffers; the
        // device fd closes when the camera itself is dropped.
        self.stream.take();
        tracing::info!(device = %self.device_path, "camera stream stopped");
        Ok(())
    }
}
