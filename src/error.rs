//! Error types for capture and triangulation

use thiserror::Error;

/// Errors that can occur while configuring, capturing, or running the pipeline
///
/// Conditions that only cost a tick (no new frame, a frame missing its
/// body-index channel, calibration still pending, list saturation) are not
/// errors. They show up as [`crate::runtime::TickOutcome::Skipped`] or as
/// truncated counts.
#[derive(Debug, Error)]
pub enum PolyError {
    /// Configuration validation failed
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No capture device is installed
    #[error("no capture device installed")]
    NoDevice,

    /// The sensor or tracking collaborator reported a failure
    #[error("device error: {0}")]
    Device(String),

    /// A pixel buffer does not match the configured resolution
    #[error("{channel} buffer holds {actual} bytes, expected {expected}")]
    BufferSize {
        /// Which image channel was malformed
        channel: &'static str,
        /// Byte length implied by the configured resolution
        expected: usize,
        /// Byte length actually received
        actual: usize,
    },

    /// The capture thread exited; frames will not resume
    #[error("capture thread stopped: {0}")]
    CaptureStopped(Box<PolyError>),

    /// The capture thread panicked
    #[error("capture thread panicked")]
    CapturePanicked,

    /// The capture thread could not be spawned
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type alias for capture and pipeline operations
pub type Result<T> = std::result::Result<T, PolyError>;
