//! Error types for waveform playback.

use thiserror::Error;

/// Failure of a single playback request.
///
/// Every variant except [`PlaybackError::DeviceUnavailable`] aborts only the request
/// that produced it; the engine and its device stay usable.
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// The file or stream could not be opened or read.
    #[error("source unreadable: {0}")]
    SourceUnreadable(#[from] std::io::Error),

    /// `RIFF`/`WAVE` tags missing or the header is truncated.
    #[error("invalid waveform container: {0}")]
    InvalidContainer(String),

    /// The header describes a layout the engine cannot play.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The output device never opened, or has been closed.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device refused the final hardware parameter commit.
    #[error("hardware configuration rejected: {0}")]
    HardwareConfigRejected(#[source] DeviceError),

    /// Writing samples to the device failed mid-stream.
    #[error("device write failed: {0}")]
    DeviceWrite(#[source] DeviceError),

    /// The request was cancelled through its handle.
    #[error("playback cancelled")]
    Cancelled,

    /// The engine stopped before the request could run.
    #[error("playback engine stopped")]
    EngineStopped,
}

/// Error reported by an audio device implementation.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device is temporarily in use; the operation may succeed if retried.
    #[error("device busy")]
    Busy,

    /// The device refused a parameter value.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The operation or value is not supported by this device.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The device handle was closed.
    #[error("device closed")]
    Closed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
