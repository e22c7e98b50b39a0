//! Mock driver implementation for testing without hardware.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{CameraError, Result};
use crate::pool::BufferPool;
use crate::traits::{
    CaptureDriver, DequeuedBuffer, DeviceCapabilities, Format, FourCC, PixelFormat, PollStatus,
};

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Everything the mock records and everything a test can script.
#[derive(Debug)]
pub struct MockState {
    calls: Vec<&'static str>,
    polls: VecDeque<PollStatus>,
    failures: HashMap<&'static str, u32>,
    address_next: Option<usize>,
    pattern: TestPattern,
    capabilities: DeviceCapabilities,
    format_override: Option<Format>,
    format: Option<Format>,
    queued: VecDeque<(u32, usize)>,
    requested: u32,
    streaming: bool,
    sequence: u32,
    next_handle: u32,
    open_handles: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            polls: VecDeque::new(),
            failures: HashMap::new(),
            address_next: None,
            pattern: TestPattern::Gradient,
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format_override: None,
            format: None,
            queued: VecDeque::new(),
            requested: 0,
            streaming: false,
            sequence: 0,
            next_handle: 0,
            open_handles: 0,
        }
    }
}

impl MockState {
    /// Record a call and report whether it is scripted to fail.
    fn call(&mut self, name: &'static str) -> bool {
        self.calls.push(name);
        match self.failures.get_mut(name) {
            Some(0) | None => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }
}

/// Test-side handle onto a [`MockDriver`] that has been moved into a camera.
#[derive(Debug, Clone)]
pub struct MockControl(Arc<Mutex<MockState>>);

impl MockControl {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Driver calls made so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// How many times `name` was called.
    pub fn count(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|call| **call == name).count()
    }

    /// Queue poll outcomes; once exhausted polls report `Ready`.
    pub fn script_polls<I: IntoIterator<Item = PollStatus>>(&self, polls: I) {
        self.state().polls.extend(polls);
    }

    /// Make every call to `name` fail.
    pub fn fail(&self, name: &'static str) {
        self.fail_times(name, u32::MAX);
    }

    /// Make the next `times` calls to `name` fail.
    pub fn fail_times(&self, name: &'static str, times: u32) {
        self.state().failures.insert(name, times);
    }

    /// Make the next dequeue return a null address.
    pub fn return_null_buffer(&self) {
        self.state().address_next = Some(0);
    }

    /// Make the next dequeue report an address outside the pool.
    pub fn return_foreign_buffer(&self) {
        self.state().address_next = Some(1);
    }

    /// Pattern written into dequeued buffers.
    pub fn set_pattern(&self, pattern: TestPattern) {
        self.state().pattern = pattern;
    }

    /// Capabilities reported by the device.
    pub fn set_capabilities(&self, capabilities: DeviceCapabilities) {
        self.state().capabilities = capabilities;
    }

    /// Format the driver reports back regardless of the request.
    pub fn override_format(&self, format: Format) {
        self.state().format_override = Some(format);
    }

    /// Buffers currently owned by the driver.
    pub fn queued(&self) -> usize {
        self.state().queued.len()
    }

    /// Whether streaming is on.
    pub fn is_streaming(&self) -> bool {
        self.state().streaming
    }

    /// Descriptors opened and not yet closed.
    pub fn open_handles(&self) -> u32 {
        self.state().open_handles
    }
}

/// Descriptor issued by the mock.
#[derive(Debug, PartialEq, Eq)]
pub struct MockHandle(u32);

/// Mock capture driver for testing without hardware.
#[derive(Debug, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Create a new mock driver with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Control handle sharing this driver's state.
    #[must_use]
    pub fn control(&self) -> MockControl {
        MockControl(Arc::clone(&self.state))
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CaptureDriver for MockDriver {
    type Handle = MockHandle;

    fn open(&mut self, path: &Path) -> Result<Self::Handle> {
        let mut state = self.state();
        if state.call("open") {
            return Err(CameraError::DeviceOpen(format!(
                "{}: no such device",
                path.display()
            )));
        }
        state.next_handle += 1;
        state.open_handles += 1;
        Ok(MockHandle(state.next_handle))
    }

    fn close(&mut self, _handle: Self::Handle) {
        let mut state = self.state();
        state.call("close");
        state.open_handles = state.open_handles.saturating_sub(1);
        state.streaming = false;
        state.queued.clear();
        state.requested = 0;
    }

    fn set_input(&mut self, _handle: &Self::Handle, index: u32) -> Result<()> {
        if self.state().call("set_input") {
            return Err(CameraError::CapabilityNegotiation(format!(
                "input {index} rejected"
            )));
        }
        Ok(())
    }

    fn query_capabilities(&mut self, _handle: &Self::Handle) -> Result<DeviceCapabilities> {
        let mut state = self.state();
        if state.call("query_capabilities") {
            return Err(CameraError::CapabilityNegotiation(
                "query rejected".to_owned(),
            ));
        }
        Ok(state.capabilities.clone())
    }

    fn set_capture_mode(&mut self, _handle: &Self::Handle, mode: u32) -> Result<()> {
        if self.state().call("set_capture_mode") {
            return Err(CameraError::CapabilityNegotiation(format!(
                "capture mode {mode:#x} rejected"
            )));
        }
        Ok(())
    }

    fn set_pixel_format(&mut self, _handle: &Self::Handle, format: &Format) -> Result<Format> {
        let mut state = self.state();
        if state.call("set_pixel_format") {
            return Err(CameraError::FormatNegotiation(format!(
                "{} rejected",
                format.fourcc
            )));
        }
        let actual = state
            .format_override
            .clone()
            .unwrap_or_else(|| format.clone());
        state.format = Some(actual.clone());
        Ok(actual)
    }

    fn request_buffers(&mut self, _handle: &Self::Handle, count: u32) -> Result<()> {
        let mut state = self.state();
        if state.call("request_buffers") {
            return Err(CameraError::Stream("request buffers rejected".to_owned()));
        }
        state.requested = count;
        state.queued.clear();
        Ok(())
    }

    fn enqueue_buffer(
        &mut self,
        _handle: &Self::Handle,
        index: u32,
        buffer: &mut [u8],
    ) -> Result<()> {
        let mut state = self.state();
        if state.call("enqueue_buffer") {
            return Err(CameraError::Enqueue(format!("buffer {index} rejected")));
        }
        if index >= state.requested {
            return Err(CameraError::Enqueue(format!(
                "buffer {index} outside queue of {}",
                state.requested
            )));
        }
        state.queued.push_back((index, buffer.as_ptr() as usize));
        Ok(())
    }

    fn dequeue_buffer(
        &mut self,
        _handle: &Self::Handle,
        pool: &mut BufferPool,
    ) -> Result<DequeuedBuffer> {
        let mut state = self.state();
        if state.call("dequeue_buffer") {
            return Err(CameraError::Dequeue("dequeue rejected".to_owned()));
        }
        let (index, address) = state
            .queued
            .pop_front()
            .ok_or_else(|| CameraError::Dequeue("no buffer queued".to_owned()))?;

        let format = state
            .format
            .clone()
            .ok_or_else(|| CameraError::Dequeue("format not set".to_owned()))?;
        if let Some(buffer) = pool.buffer_mut(index as usize) {
            generate_test_frame(buffer, &format, state.pattern);
        }

        let sequence = state.sequence;
        state.sequence += 1;

        let address = state.address_next.take().unwrap_or(address);

        Ok(DequeuedBuffer {
            index,
            address,
            bytes_used: format.size,
            sequence,
        })
    }

    fn stream_on(&mut self, _handle: &Self::Handle) -> Result<()> {
        let mut state = self.state();
        if state.call("stream_on") {
            return Err(CameraError::Stream("stream on rejected".to_owned()));
        }
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self, _handle: &Self::Handle) -> Result<()> {
        let mut state = self.state();
        if state.call("stream_off") {
            return Err(CameraError::Stream("stream off rejected".to_owned()));
        }
        state.streaming = false;
        state.queued.clear();
        Ok(())
    }

    fn poll_readable(&mut self, _handle: &Self::Handle, _timeout: Duration) -> Result<PollStatus> {
        let mut state = self.state();
        if state.call("poll_readable") {
            return Err(CameraError::Poll("select failed".to_owned()));
        }
        Ok(state.polls.pop_front().unwrap_or(PollStatus::Ready))
    }
}

/// Fill `data` with `pattern` laid out as UYVY in `format`.
///
/// Formats other than UYVY are filled with the luma value only.
pub fn generate_test_frame(data: &mut [u8], format: &Format, pattern: TestPattern) {
    if format.fourcc != FourCC::UYVY {
        let luma = match pattern {
            TestPattern::Solid(y, _, _) => y,
            TestPattern::ColorBars | TestPattern::Gradient => 0,
        };
        data.fill(luma);
        return;
    }

    let width = format.width;
    let stride = (width * PixelFormat::Uyvy.bytes_per_pixel()) as usize;

    for line in data.chunks_exact_mut(stride).take(format.height as usize) {
        for (pair, macropixel) in (0u32..).step_by(2).zip(line.chunks_exact_mut(4)) {
            let (y0, y1, u, v) = pattern_at(pattern, pair, width);
            macropixel.copy_from_slice(&[u, y0, v, y1]);
        }
    }
}

/// Y0, Y1, U, V for the pixel pair starting at column `x`.
fn pattern_at(pattern: TestPattern, x: u32, width: u32) -> (u8, u8, u8, u8) {
    match pattern {
        TestPattern::ColorBars => {
            // 8 color bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
            const BARS: [(u8, u8, u8); 8] = [
                (235, 128, 128),
                (210, 16, 146),
                (170, 166, 16),
                (145, 54, 34),
                (106, 202, 222),
                (81, 90, 240),
                (41, 240, 110),
                (16, 128, 128),
            ];
            let bar_width = (width / 8).max(1);
            let (y, u, v) = BARS[(x / bar_width).min(7) as usize];
            (y, y, u, v)
        }
        TestPattern::Gradient => {
            #[allow(clippy::cast_possible_truncation)]
            let luma = |col: u32| ((col * 255) / width.max(1)) as u8;
            (luma(x), luma(x + 1), 128, 128)
        }
        TestPattern::Solid(y, u, v) => (y, y, u, v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uyvy(width: u32, height: u32) -> Format {
        Format::new(width, height, PixelFormat::Uyvy)
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = uyvy(640, 480);
        let mut data = vec![0u8; format.size as usize];
        generate_test_frame(&mut data, &format, TestPattern::ColorBars);

        // U Y V Y: first bar is white
        assert_eq!(&data[..4], &[128, 235, 128, 235]);
        // Last bar is black
        let last = (639 * 2 - 2) as usize;
        assert_eq!(data[last + 1], 16);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = uyvy(640, 480);
        let mut data = vec![0u8; format.size as usize];
        generate_test_frame(&mut data, &format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[1] < 10);

        // Right edge should be bright (last row, last pixel luma)
        let last_row_start = (479 * 640 * 2) as usize;
        assert!(data[last_row_start + 639 * 2 + 1] > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let format = uyvy(64, 64);
        let mut data = vec![0u8; format.size as usize];
        generate_test_frame(&mut data, &format, TestPattern::Solid(128, 64, 192));

        assert_eq!(&data[..4], &[64, 128, 192, 128]);
        assert!(data.chunks_exact(2).all(|pair| pair[1] == 128));
    }

    #[test]
    fn test_scripted_failures_count_down() {
        let driver = MockDriver::new();
        let control = driver.control();
        control.fail_times("open", 1);

        let mut driver = driver;
        assert!(driver.open(Path::new("/dev/video9")).is_err());
        let handle = driver.open(Path::new("/dev/video9")).expect("second open");
        assert_eq!(control.open_handles(), 1);
        driver.close(handle);
        assert_eq!(control.open_handles(), 0);
        assert_eq!(control.calls(), vec!["open", "open", "close"]);
    }

    #[test]
    fn test_poll_script_then_ready() {
        let mut driver = MockDriver::new();
        let control = driver.control();
        control.script_polls([PollStatus::Timeout, PollStatus::Interrupted]);

        let handle = driver.open(Path::new("/dev/video9")).expect("open");
        let timeout = Duration::from_millis(1);
        assert_eq!(
            driver.poll_readable(&handle, timeout).expect("poll"),
            PollStatus::Timeout
        );
        assert_eq!(
            driver.poll_readable(&handle, timeout).expect("poll"),
            PollStatus::Interrupted
        );
        assert_eq!(
            driver.poll_readable(&handle, timeout).expect("poll"),
            PollStatus::Ready
        );
    }
}
