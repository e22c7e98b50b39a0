//! Error type for capture operations.

use thiserror::Error;

use crate::state::State;
use crate::traits::PixelFormat;

/// Error type for camera operations.
#[derive(Error, Debug)]
pub enum CameraError {
    /// Failed to open the device node.
    #[error("Failed to open device: {0}")]
    DeviceOpen(String),

    /// Input selection, capability query or capture mode was refused.
    #[error("Capability negotiation failed: {0}")]
    CapabilityNegotiation(String),

    /// The driver refused or altered the requested native format.
    #[error("Format negotiation failed: {0}")]
    FormatNegotiation(String),

    /// The buffer pool could not be allocated; no buffers are retained.
    #[error("Buffer allocation failed: {0}")]
    BufferAllocation(String),

    /// A state change not listed in the transition table.
    #[error("Invalid state transition {from} -> {to}")]
    InvalidStateTransition {
        /// State the device was in.
        from: State,
        /// State that was requested.
        to: State,
    },

    /// An operation was attempted from a state that does not allow it.
    #[error("{operation} not allowed in state {state}")]
    InvalidState {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the device was in.
        state: State,
    },

    /// The readiness wait elapsed without a completed buffer.
    #[error("Timed out waiting for a frame")]
    PollTimeout,

    /// The readiness wait itself failed.
    #[error("Poll failed: {0}")]
    Poll(String),

    /// Handing a buffer to the driver failed.
    #[error("Failed to enqueue buffer: {0}")]
    Enqueue(String),

    /// Taking a completed buffer from the driver failed.
    #[error("Failed to dequeue buffer: {0}")]
    Dequeue(String),

    /// The driver returned a buffer with no memory behind it.
    #[error("Null buffer returned by driver")]
    NullBuffer,

    /// Stream on/off or buffer queue request failed.
    #[error("Stream error: {0}")]
    Stream(String),

    /// No converter is registered for the format pair.
    #[error("Unsupported conversion {from} -> {to}")]
    UnsupportedConversion {
        /// Source pixel format.
        from: PixelFormat,
        /// Requested output pixel format.
        to: PixelFormat,
    },

    /// Output crop does not fit inside the native frame.
    #[error("Output {width}x{height} exceeds native {native_width}x{native_height}")]
    CropOutOfBounds {
        /// Requested output width.
        width: u32,
        /// Requested output height.
        height: u32,
        /// Native capture width.
        native_width: u32,
        /// Native capture height.
        native_height: u32,
    },

    /// Width or height of zero.
    #[error("Invalid size {0}x{1}")]
    InvalidSize(u32, u32),

    /// Raw pixel format value outside the enumerated range.
    #[error("Unknown pixel format {0}")]
    UnknownPixelFormat(u32),

    /// Stall recovery gave up; the device is in the error state.
    #[error("Stall recovery failed after {attempts} attempts")]
    RecoveryExhausted {
        /// Consecutive restart attempts made.
        attempts: u32,
    },

    /// Frame content did not match the expected test pattern.
    #[error("Frame validation failed: {0}")]
    Validation(String),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
