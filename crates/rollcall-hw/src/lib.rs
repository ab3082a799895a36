//! rollcall-hw: camera capture and the acquisition side of the frame pipeline.
//!
//! Provides the [`Frame`] type, the [`FrameSource`] seam with its one-way
//! [`SourceHandle`] release, the drop-oldest [`FrameBuffer`], and a
//! V4L2-backed [`Camera`] when the `v4l2` feature is enabled.

pub mod buffer;
#[cfg(feature = "v4l2")]
pub mod camera;
pub mod frame;
pub mod source;

pub use buffer::FrameBuffer;
#[cfg(feature = "v4l2")]
pub use camera::{Camera, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
pub use source::{CameraError, FrameSource, SourceHandle};
