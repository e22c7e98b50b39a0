//! Core traits and types for the capture driver abstraction.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{CameraError, Result};
use crate::pool::BufferPool;

/// Pixel format code as four ASCII characters (e.g., UYVY, GREY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// UYVY pixel format (4:2:2 packed, luma in the second byte of each pair).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// GREY pixel format (8-bit monochrome).
    pub const GREY: Self = Self::new(b"GREY");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{}", char::from(byte))?;
        }
        Ok(())
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Pixel formats the capture device can produce or convert to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PixelFormat {
    /// 8-bit monochrome, one byte per pixel.
    Mono8 = 1,
    /// Packed 4:2:2 (U Y V Y), two bytes per pixel.
    Uyvy = 2,
}

impl PixelFormat {
    /// Bytes occupied by one pixel in this format.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Mono8 => 1,
            Self::Uyvy => 2,
        }
    }

    /// The FOURCC the driver uses for this format.
    #[must_use]
    pub const fn fourcc(self) -> FourCC {
        match self {
            Self::Mono8 => FourCC::GREY,
            Self::Uyvy => FourCC::UYVY,
        }
    }
}

impl TryFrom<u32> for PixelFormat {
    type Error = CameraError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::Mono8),
            2 => Ok(Self::Uyvy),
            other => Err(CameraError::UnknownPixelFormat(other)),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mono8 => write!(f, "MONO8"),
            Self::Uyvy => write!(f, "UYVY"),
        }
    }
}

/// Negotiated video format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a tightly packed format.
    #[must_use]
    pub const fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let stride = width * pixel_format.bytes_per_pixel();
        let size = stride * height;
        Self {
            width,
            height,
            fourcc: pixel_format.fourcc(),
            stride,
            size,
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Outcome of a bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// A completed buffer can be dequeued.
    Ready,
    /// The wait elapsed without the device producing a buffer.
    Timeout,
    /// The wait was interrupted by a signal and should be retried.
    Interrupted,
}

/// A completed buffer handed back by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Pool index of the buffer.
    pub index: u32,
    /// User-space address the driver filled; zero means no buffer.
    pub address: usize,
    /// Bytes the driver wrote into the buffer.
    pub bytes_used: u32,
    /// Driver frame sequence number.
    pub sequence: u32,
}

/// Hardware capture driver interface.
///
/// Every lifecycle and acquisition step of [`crate::Camera`] goes through
/// these calls. Buffers are user-space memory owned by a [`BufferPool`]; the
/// driver only borrows them while they are queued.
pub trait CaptureDriver: Send {
    /// Open descriptor for one device.
    type Handle: Send;

    /// Open the device node at `path`.
    fn open(&mut self, path: &Path) -> Result<Self::Handle>;

    /// Close a descriptor. Any streaming on it stops.
    fn close(&mut self, handle: Self::Handle);

    /// Select the capture input.
    fn set_input(&mut self, handle: &Self::Handle, index: u32) -> Result<()>;

    /// Query device capabilities.
    fn query_capabilities(&mut self, handle: &Self::Handle) -> Result<DeviceCapabilities>;

    /// Set the driver specific capture mode.
    fn set_capture_mode(&mut self, handle: &Self::Handle, mode: u32) -> Result<()>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_pixel_format(&mut self, handle: &Self::Handle, format: &Format) -> Result<Format>;

    /// Request a user-pointer buffer queue of `count` entries.
    fn request_buffers(&mut self, handle: &Self::Handle, count: u32) -> Result<()>;

    /// Hand buffer `index` to the driver for filling.
    fn enqueue_buffer(&mut self, handle: &Self::Handle, index: u32, buffer: &mut [u8])
        -> Result<()>;

    /// Take one completed buffer back from the driver.
    ///
    /// The pool is passed so drivers without DMA can fill the buffer here.
    fn dequeue_buffer(
        &mut self,
        handle: &Self::Handle,
        pool: &mut BufferPool,
    ) -> Result<DequeuedBuffer>;

    /// Start streaming.
    fn stream_on(&mut self, handle: &Self::Handle) -> Result<()>;

    /// Stop streaming.
    fn stream_off(&mut self, handle: &Self::Handle) -> Result<()>;

    /// Wait up to `timeout` for a completed buffer.
    fn poll_readable(&mut self, handle: &Self::Handle, timeout: Duration) -> Result<PollStatus>;
}
