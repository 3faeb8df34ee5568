//! rollcall-hw — Camera capture.
//!
//! V4L2 access with conversion of YUYV, RGB3 and GREY buffers into RGB
//! frames for the face pipeline.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::Frame;
