//! V4L2 driver implementation using the v4l crate.
//!
//! Buffers are user-pointer buffers owned by the camera's pool. Format and
//! capability queries use the v4l crate's safe API; buffer queue ioctls go
//! through its raw `v4l2` module.

#![allow(unsafe_code)]

use std::io;
use std::mem;
use std::os::raw::{c_int, c_ulong, c_void};
use std::path::Path;
use std::time::Duration;

use log::debug;
use v4l::buffer::Type;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers, v4l2_streamparm};
use v4l::video::Capture;
use v4l::Device;

use crate::camera::Camera;
use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::pool::BufferPool;
use crate::traits::{
    CaptureDriver, DequeuedBuffer, DeviceCapabilities, Format, FourCC, PollStatus,
};

/// Issue a raw V4L2 ioctl on a device.
macro_rules! ioctl {
    ($device:expr, $request:ident, $arg:expr) => {
        // SAFETY: the argument is a live value of the type `$request` expects.
        unsafe {
            v4l2::ioctl(
                $device.handle().fd(),
                v4l2::vidioc::$request,
                ($arg as *mut _).cast::<c_void>(),
            )
        }
    };
}

/// V4L2 capture driver using user-pointer streaming.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4L2Driver;

/// Camera backed by a V4L2 device node.
pub type V4L2Camera = Camera<V4L2Driver>;

impl Camera<V4L2Driver> {
    /// Create an idle camera for the V4L2 device in `config`.
    pub fn v4l2(config: CameraConfig) -> Self {
        Self::new(V4L2Driver, config)
    }
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

impl CaptureDriver for V4L2Driver {
    type Handle = Device;

    fn open(&mut self, path: &Path) -> Result<Device> {
        debug!("open {}", path.display());
        Device::with_path(path)
            .map_err(|err| CameraError::DeviceOpen(format!("{}: {err}", path.display())))
    }

    fn close(&mut self, handle: Device) {
        // Closing the descriptor stops streaming and releases the queue.
        drop(handle);
    }

    fn set_input(&mut self, handle: &Device, index: u32) -> Result<()> {
        let mut input = c_int::try_from(index)
            .map_err(|err| CameraError::CapabilityNegotiation(err.to_string()))?;
        ioctl!(handle, VIDIOC_S_INPUT, &mut input).map_err(|err| {
            CameraError::CapabilityNegotiation(format!("select input {index}: {err}"))
        })
    }

    fn query_capabilities(&mut self, handle: &Device) -> Result<DeviceCapabilities> {
        let caps = handle
            .query_caps()
            .map_err(|err| CameraError::CapabilityNegotiation(err.to_string()))?;

        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        })
    }

    fn set_capture_mode(&mut self, handle: &Device, mode: u32) -> Result<()> {
        // SAFETY: v4l2_streamparm is plain old data; all-zero is valid.
        let mut parm: v4l2_streamparm = unsafe { mem::zeroed() };
        parm.type_ = Type::VideoCapture as u32;
        parm.parm.capture.capturemode = mode;

        ioctl!(handle, VIDIOC_S_PARM, &mut parm).map_err(|err| {
            CameraError::CapabilityNegotiation(format!("capture mode {mode:#x}: {err}"))
        })
    }

    fn set_pixel_format(&mut self, handle: &Device, format: &Format) -> Result<Format> {
        let mut fmt = handle
            .format()
            .map_err(|err| CameraError::FormatNegotiation(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = handle
            .set_format(&fmt)
            .map_err(|err| CameraError::FormatNegotiation(err.to_string()))?;

        Ok(to_format(&fmt))
    }

    fn request_buffers(&mut self, handle: &Device, count: u32) -> Result<()> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: Type::VideoCapture as u32,
            memory: Memory::UserPtr as u32,
            // SAFETY: the remaining fields are plain integers.
            ..unsafe { mem::zeroed() }
        };

        ioctl!(handle, VIDIOC_REQBUFS, &mut req)
            .map_err(|err| CameraError::Stream(format!("request {count} buffers: {err}")))?;

        if req.count < count {
            return Err(CameraError::Stream(format!(
                "driver granted {} of {count} buffers",
                req.count
            )));
        }
        Ok(())
    }

    fn enqueue_buffer(&mut self, handle: &Device, index: u32, buffer: &mut [u8]) -> Result<()> {
        // SAFETY: v4l2_buffer is plain old data; all-zero is valid.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.index = index;
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::UserPtr as u32;
        buf.m.userptr = buffer.as_mut_ptr() as c_ulong;
        buf.length = u32::try_from(buffer.len())
            .map_err(|err| CameraError::Enqueue(err.to_string()))?;

        // The pool outlives the queue: buffers are only freed after close.
        ioctl!(handle, VIDIOC_QBUF, &mut buf)
            .map_err(|err| CameraError::Enqueue(format!("buffer {index}: {err}")))
    }

    fn dequeue_buffer(&mut self, handle: &Device, _pool: &mut BufferPool) -> Result<DequeuedBuffer> {
        // SAFETY: v4l2_buffer is plain old data; all-zero is valid.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::UserPtr as u32;

        ioctl!(handle, VIDIOC_DQBUF, &mut buf)
            .map_err(|err| CameraError::Dequeue(err.to_string()))?;

        // SAFETY: USERPTR buffers report their address through `userptr`.
        let userptr = unsafe { buf.m.userptr };

        Ok(DequeuedBuffer {
            index: buf.index,
            address: usize::try_from(userptr).unwrap_or_default(),
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
        })
    }

    fn stream_on(&mut self, handle: &Device) -> Result<()> {
        let mut typ = Type::VideoCapture as u32;
        ioctl!(handle, VIDIOC_STREAMON, &mut typ)
            .map_err(|err| CameraError::Stream(format!("stream on: {err}")))
    }

    fn stream_off(&mut self, handle: &Device) -> Result<()> {
        let mut typ = Type::VideoCapture as u32;
        ioctl!(handle, VIDIOC_STREAMOFF, &mut typ)
            .map_err(|err| CameraError::Stream(format!("stream off: {err}")))
    }

    fn poll_readable(&mut self, handle: &Device, timeout: Duration) -> Result<PollStatus> {
        let mut fds = libc::pollfd {
            fd: handle.handle().fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);

        // SAFETY: fds is a single valid pollfd.
        let ready = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        match ready {
            0 => Ok(PollStatus::Timeout),
            n if n > 0 => Ok(PollStatus::Ready),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(PollStatus::Interrupted)
                } else {
                    Err(CameraError::Poll(err.to_string()))
                }
            }
        }
    }
}
