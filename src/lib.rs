//! ISP-Cam-Capture: a V4L2 capture device core for ISP camera nodes
//!
//! The [`Camera`] owns one capture device through its lifecycle
//! (idle, initialized, running, error), a pool of page-aligned user-pointer
//! buffers, and a read pipeline that hands out either the captured buffer
//! itself or a cropped MONO8 conversion of it. Stalled devices are restarted
//! a bounded number of times before the camera enters the error state.
//!
//! Hardware access sits behind the [`CaptureDriver`] trait so the device
//! logic runs against the V4L2 driver in production and a scriptable mock in
//! tests.

pub mod camera;
pub mod config;
pub mod device;
pub mod error;
pub mod pool;
pub mod state;
pub mod traits;
pub mod transform;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use camera::{Camera, CameraFrame, CameraInfo};
pub use config::CameraConfig;
pub use device::{V4L2Camera, V4L2Driver};
pub use error::{CameraError, Result};
pub use state::State;
pub use traits::{CaptureDriver, DeviceCapabilities, Format, FourCC, PixelFormat};
