//! Capture device configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::traits::PixelFormat;

/// Default device node.
pub const DEFAULT_DEVICE: &str = "/dev/video2";
/// Default native width.
pub const DEFAULT_WIDTH: u32 = 640;
/// Default native height.
pub const DEFAULT_HEIGHT: u32 = 480;
/// Default number of capture buffers.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;
/// Capture input selected during init.
pub const DEFAULT_INPUT: u32 = 1;
/// Driver capture mode (preview).
pub const DEFAULT_CAPTURE_MODE: u32 = 0x8000;
/// Default consecutive restart attempts before giving up on a stall.
pub const DEFAULT_MAX_RECOVERIES: u32 = 3;

/// Static parameters of one capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    /// Device node path.
    pub device: PathBuf,
    /// Capture input index.
    pub input: u32,
    /// Driver specific capture mode.
    pub capture_mode: u32,
    /// Native capture width.
    pub width: u32,
    /// Native capture height.
    pub height: u32,
    /// Native pixel format.
    pub pixel_format: PixelFormat,
    /// Number of buffers in the pool.
    pub buffer_count: u32,
    /// Bounded wait for each readiness poll.
    pub poll_timeout: Duration,
    /// Delay after stream on to let the sensor settle.
    pub settle_delay: Duration,
    /// Consecutive restart attempts allowed per stall. Zero surfaces
    /// timeouts to the caller instead of restarting.
    pub max_recoveries: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            input: DEFAULT_INPUT,
            capture_mode: DEFAULT_CAPTURE_MODE,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            pixel_format: PixelFormat::Uyvy,
            buffer_count: DEFAULT_BUFFER_COUNT,
            poll_timeout: Duration::from_secs(2),
            settle_delay: Duration::from_secs(2),
            max_recoveries: DEFAULT_MAX_RECOVERIES,
        }
    }
}

impl CameraConfig {
    /// Default configuration for the device at `device`.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(device: P) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }

    /// Set the capture input index.
    #[must_use]
    pub fn with_input(mut self, input: u32) -> Self {
        self.input = input;
        self
    }

    /// Set the driver capture mode.
    #[must_use]
    pub fn with_capture_mode(mut self, mode: u32) -> Self {
        self.capture_mode = mode;
        self
    }

    /// Set the native capture size.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the pool size.
    #[must_use]
    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    /// Set the readiness poll timeout.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the post stream-on settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the stall restart cap.
    #[must_use]
    pub fn with_max_recoveries(mut self, attempts: u32) -> Self {
        self.max_recoveries = attempts;
        self
    }

    /// Bytes of one native frame.
    #[must_use]
    pub const fn native_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel() as usize
    }
}
