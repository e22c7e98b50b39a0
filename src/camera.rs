//! Capture device: lifecycle, frame acquisition and stall recovery.
//!
//! All state-mutating calls, including `read`, need exclusive access to the
//! camera. A returned [`CameraFrame`] borrows the camera, so the frame cannot
//! outlive the next `read` or a teardown call.

use std::thread;

use log::{debug, error, warn};

use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use crate::pool::{BufferPool, ScratchBuffer};
use crate::state::{Lifecycle, State};
use crate::traits::{
    CaptureDriver, DequeuedBuffer, DeviceCapabilities, Format, PixelFormat, PollStatus,
};
use crate::transform::{self, Geometry};

/// Static description of a capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Device name (its path).
    pub name: String,
    /// Native capture width.
    pub width: u32,
    /// Native capture height.
    pub height: u32,
}

/// Where the bytes of a frame live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameSource {
    Pool(usize),
    Scratch,
}

#[derive(Debug, Clone, Copy)]
struct FrameLayout {
    source: FrameSource,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    stride: u32,
    buf_size: usize,
    sequence: u32,
}

/// Open descriptor, or `InvalidState` if the device is closed.
fn open_handle<'h, H>(
    handle: &'h Option<H>,
    lifecycle: &Lifecycle,
    operation: &'static str,
) -> Result<&'h H> {
    handle.as_ref().ok_or(CameraError::InvalidState {
        operation,
        state: lifecycle.state(),
    })
}

struct Inner<D: CaptureDriver> {
    driver: D,
    config: CameraConfig,
    lifecycle: Lifecycle,
    handle: Option<D::Handle>,
    capabilities: Option<DeviceCapabilities>,
    pool: BufferPool,
    scratch: ScratchBuffer,
    out_width: u32,
    out_height: u32,
    out_format: PixelFormat,
}

/// A streaming capture device driven through a [`CaptureDriver`].
///
/// Every state-mutating call takes `&mut self`. Share a camera between
/// threads by wrapping it in a `Mutex`; that one lock then serializes
/// lifecycle calls and reads alike.
pub struct Camera<D: CaptureDriver> {
    info: CameraInfo,
    inner: Inner<D>,
}

impl<D: CaptureDriver> Camera<D> {
    /// Create an idle camera. Output size and format start equal to native.
    pub fn new(driver: D, config: CameraConfig) -> Self {
        debug!("camera path:{}", config.device.display());
        let info = CameraInfo {
            name: config.device.display().to_string(),
            width: config.width,
            height: config.height,
        };
        let inner = Inner {
            driver,
            out_width: config.width,
            out_height: config.height,
            out_format: config.pixel_format,
            config,
            lifecycle: Lifecycle::default(),
            handle: None,
            capabilities: None,
            pool: BufferPool::new(),
            scratch: ScratchBuffer::default(),
        };
        Self { info, inner }
    }

    /// Name and native size. Available in every state.
    pub fn info(&self) -> CameraInfo {
        self.info.clone()
    }

    /// Device node path.
    pub fn device_id(&self) -> &str {
        &self.info.name
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> State {
        self.inner.lifecycle.state()
    }

    /// Capabilities reported during the last successful `init`.
    pub const fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.inner.capabilities.as_ref()
    }

    /// Open the device, negotiate the native format and allocate buffers.
    pub fn init(&mut self) -> Result<()> {
        self.inner.init()
    }

    /// Close the device and release buffers. Succeeds when already idle.
    pub fn uninit(&mut self) -> Result<()> {
        self.inner.uninit()
    }

    /// Queue all buffers and start streaming.
    pub fn start(&mut self) -> Result<()> {
        self.inner.start()
    }

    /// Stop streaming.
    pub fn stop(&mut self) -> Result<()> {
        self.inner.stop()
    }

    /// Wait for the next frame.
    ///
    /// A stalled device is restarted transparently up to the configured
    /// number of attempts; after that the device enters [`State::Error`].
    ///
    /// The frame borrows the camera, so it is gone before the next `read`
    /// or any teardown call:
    ///
    /// ```compile_fail
    /// use isp_cam_capture::{CameraConfig, V4L2Camera};
    ///
    /// let mut camera = V4L2Camera::v4l2(CameraConfig::default());
    /// let first = camera.read().ok();
    /// let second = camera.read().ok();
    /// drop(first);
    /// ```
    pub fn read(&mut self) -> Result<CameraFrame<'_>> {
        let layout = self.inner.read()?;
        let bytes = match layout.source {
            FrameSource::Pool(index) => self.inner.pool.buffer(index).unwrap_or_default(),
            FrameSource::Scratch => self.inner.scratch.as_slice(),
        };
        let data = bytes.get(..layout.buf_size).unwrap_or(bytes);
        Ok(CameraFrame { data, layout })
    }

    /// Set the output size. Rejected while running.
    pub fn set_size(&mut self, width: u32, height: u32) -> Result<()> {
        self.inner.set_size(width, height)
    }

    /// Output size.
    pub const fn size(&self) -> (u32, u32) {
        (self.inner.out_width, self.inner.out_height)
    }

    /// Set the output pixel format. Rejected while running.
    pub fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        self.inner.set_pixel_format(format)
    }

    /// Output pixel format.
    pub const fn pixel_format(&self) -> PixelFormat {
        self.inner.out_format
    }
}

impl<D: CaptureDriver> Drop for Camera<D> {
    fn drop(&mut self) {
        let inner = &mut self.inner;
        if inner.lifecycle.state() == State::Running {
            if let Err(err) = inner.stop() {
                warn!("stop on drop failed: {err}");
            }
        }
        if let Err(err) = inner.uninit() {
            warn!("uninit on drop failed: {err}");
        }
    }
}

impl<D: CaptureDriver> Inner<D> {
    fn init(&mut self) -> Result<()> {
        debug!("init");
        self.lifecycle.require(State::Idle, "init")?;

        let handle = self.driver.open(&self.config.device).map_err(|err| {
            error!("error opening camera device: {err}");
            err
        })?;

        if let Err(err) = self.negotiate(&handle) {
            self.pool.free();
            self.driver.close(handle);
            return Err(err);
        }

        self.handle = Some(handle);
        self.lifecycle.transition(State::Initialized)
    }

    fn negotiate(&mut self, handle: &D::Handle) -> Result<()> {
        let config = &self.config;

        self.driver.set_input(handle, config.input)?;

        let caps = self.driver.query_capabilities(handle)?;
        if !caps.can_capture || !caps.can_stream {
            return Err(CameraError::CapabilityNegotiation(format!(
                "{} lacks capture streaming (capture:{} streaming:{})",
                caps.card, caps.can_capture, caps.can_stream
            )));
        }
        debug!("device {} driver {}", caps.card, caps.driver);
        self.capabilities = Some(caps);

        self.driver.set_capture_mode(handle, config.capture_mode)?;

        let requested = Format::new(config.width, config.height, config.pixel_format);
        let actual = self.driver.set_pixel_format(handle, &requested)?;
        // Conversion walks rows at the packed native stride.
        if actual.width != requested.width
            || actual.height != requested.height
            || actual.fourcc != requested.fourcc
            || actual.stride != requested.stride
        {
            return Err(CameraError::FormatNegotiation(format!(
                "requested {}x{} {} stride {}, driver set {}x{} {} stride {}",
                requested.width,
                requested.height,
                requested.fourcc,
                requested.stride,
                actual.width,
                actual.height,
                actual.fourcc,
                actual.stride
            )));
        }

        let frame_len = config.native_frame_len().max(actual.size as usize);
        self.pool.allocate(config.buffer_count, frame_len)
    }

    fn uninit(&mut self) -> Result<()> {
        debug!("uninit");

        if self.lifecycle.state() == State::Idle {
            return Ok(());
        }

        if let Some(handle) = self.handle.take() {
            self.driver.close(handle);
        }
        self.pool.free();
        self.lifecycle.reset();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        debug!("start");
        self.lifecycle.require(State::Initialized, "start")?;

        let handle = open_handle(&self.handle, &self.lifecycle, "start")?;
        let count = u32::try_from(self.pool.len())
            .map_err(|_| CameraError::Stream("buffer count overflow".to_owned()))?;
        self.driver.request_buffers(handle, count)?;

        for (index, buffer) in self.pool.buffers_mut() {
            self.driver.enqueue_buffer(handle, index, buffer)?;
        }

        self.driver.stream_on(handle)?;
        self.lifecycle.transition(State::Running)?;

        if !self.config.settle_delay.is_zero() {
            thread::sleep(self.config.settle_delay);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        debug!("stop");
        self.lifecycle.require(State::Running, "stop")?;

        let handle = open_handle(&self.handle, &self.lifecycle, "stop")?;
        self.driver.stream_off(handle)?;
        self.lifecycle.transition(State::Initialized)
    }

    fn read(&mut self) -> Result<FrameLayout> {
        self.lifecycle.require(State::Running, "read")?;
        self.wait_readable()?;

        let handle = open_handle(&self.handle, &self.lifecycle, "read")?;
        let dequeued = self
            .driver
            .dequeue_buffer(handle, &mut self.pool)
            .map_err(|err| {
                error!("error in dq buffer: {err}");
                err
            })?;

        if dequeued.address == 0 {
            error!("null buffer returned");
            return Err(CameraError::NullBuffer);
        }
        let index = dequeued.index as usize;
        let frame = if self.pool.address(index) == Some(dequeued.address) {
            self.prepare_frame(index, &dequeued)
        } else {
            error!("buffer {index} at {:#x} is not in the pool", dequeued.address);
            Err(CameraError::Dequeue(format!(
                "buffer {index} at {:#x} is not in the pool",
                dequeued.address
            )))
        };

        let handle = open_handle(&self.handle, &self.lifecycle, "read")?;
        if let Some(buffer) = self.pool.buffer_mut(index) {
            if let Err(err) = self.driver.enqueue_buffer(handle, dequeued.index, buffer) {
                error!("error in enq buffer {index}: {err}");
            }
        }

        frame
    }

    fn prepare_frame(&mut self, index: usize, dequeued: &DequeuedBuffer) -> Result<FrameLayout> {
        let native_format = self.config.pixel_format;
        let out_format = self.out_format;

        if out_format == native_format
            && self.out_width == self.config.width
            && self.out_height == self.config.height
        {
            let stride = self.config.width * native_format.bytes_per_pixel();
            return Ok(FrameLayout {
                source: FrameSource::Pool(index),
                width: self.config.width,
                height: self.config.height,
                pixel_format: native_format,
                stride,
                buf_size: (dequeued.bytes_used as usize).min(self.pool.buffer_len()),
                sequence: dequeued.sequence,
            });
        }

        let geometry = Geometry {
            native_width: self.config.width,
            native_height: self.config.height,
            width: self.out_width,
            height: self.out_height,
        };
        transform::lookup(native_format, out_format)?;

        let len = transform::frame_len(out_format, self.out_width, self.out_height);
        let src = self.pool.buffer(index).ok_or(CameraError::NullBuffer)?;
        let dst = self.scratch.ensure(len);
        transform::transform(src, dst, native_format, out_format, &geometry)?;

        Ok(FrameLayout {
            source: FrameSource::Scratch,
            width: self.out_width,
            height: self.out_height,
            pixel_format: out_format,
            stride: self.out_width * out_format.bytes_per_pixel(),
            buf_size: len,
            sequence: dequeued.sequence,
        })
    }

    /// Poll until a buffer is ready, restarting the device on timeouts.
    fn wait_readable(&mut self) -> Result<()> {
        let mut attempts = 0;

        while self.lifecycle.state() == State::Running {
            let timeout = self.config.poll_timeout;
            let handle = open_handle(&self.handle, &self.lifecycle, "read")?;
            match self.driver.poll_readable(handle, timeout)? {
                PollStatus::Ready => return Ok(()),
                PollStatus::Interrupted => {}
                PollStatus::Timeout => {
                    warn!("poll timeout after {timeout:?}");
                    if self.config.max_recoveries == 0 {
                        return Err(CameraError::PollTimeout);
                    }
                    self.recover(&mut attempts)?;
                }
            }
        }

        Err(CameraError::InvalidState {
            operation: "read",
            state: self.lifecycle.state(),
        })
    }

    /// Restart the device, retrying failed restarts until the cap.
    fn recover(&mut self, attempts: &mut u32) -> Result<()> {
        loop {
            if *attempts >= self.config.max_recoveries {
                error!("stall recovery failed after {attempts} attempts");
                self.lifecycle.fail();
                return Err(CameraError::RecoveryExhausted {
                    attempts: *attempts,
                });
            }
            *attempts += 1;
            warn!(
                "restarting stalled device (attempt {}/{})",
                attempts, self.config.max_recoveries
            );

            match self.restart() {
                Ok(()) => return Ok(()),
                Err(err) => warn!("restart attempt {attempts} failed: {err}"),
            }
        }
    }

    fn restart(&mut self) -> Result<()> {
        if self.lifecycle.state() == State::Running {
            if let Err(err) = self.stop() {
                warn!("stop during restart failed: {err}");
            }
        }
        self.uninit()?;
        self.init()?;
        self.start()
    }

    fn set_size(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            error!("invalid size {width}x{height}");
            return Err(CameraError::InvalidSize(width, height));
        }
        self.reject_while_running("set_size")?;

        Geometry {
            native_width: self.config.width,
            native_height: self.config.height,
            width,
            height,
        }
        .check_bounds()?;

        self.out_width = width;
        self.out_height = height;
        Ok(())
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        self.reject_while_running("set_pixel_format")?;
        self.out_format = format;
        Ok(())
    }

    fn reject_while_running(&self, operation: &'static str) -> Result<()> {
        let state = self.lifecycle.state();
        if state == State::Running {
            debug!("{operation} rejected in state {state}");
            return Err(CameraError::InvalidState { operation, state });
        }
        Ok(())
    }
}

/// A frame borrowed from the camera.
///
/// The data aliases either a pool buffer or the conversion scratch buffer.
#[derive(Debug)]
pub struct CameraFrame<'a> {
    data: &'a [u8],
    layout: FrameLayout,
}

impl CameraFrame<'_> {
    /// Width in pixels.
    pub const fn width(&self) -> u32 {
        self.layout.width
    }

    /// Height in pixels.
    pub const fn height(&self) -> u32 {
        self.layout.height
    }

    /// Pixel format of the data.
    pub const fn pixel_format(&self) -> PixelFormat {
        self.layout.pixel_format
    }

    /// Bytes per row.
    pub const fn stride(&self) -> u32 {
        self.layout.stride
    }

    /// Valid bytes in [`Self::data`].
    pub const fn buf_size(&self) -> usize {
        self.layout.buf_size
    }

    /// Driver sequence number of the captured buffer.
    pub const fn sequence(&self) -> u32 {
        self.layout.sequence
    }

    /// Whether the data aliases a capture buffer without conversion.
    pub const fn is_zero_copy(&self) -> bool {
        matches!(self.layout.source, FrameSource::Pool(_))
    }

    /// Frame bytes.
    pub const fn data(&self) -> &[u8] {
        self.data
    }
}
