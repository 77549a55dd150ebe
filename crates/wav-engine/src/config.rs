use std::time::Duration;

/// How playback requests are scheduled onto the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConcurrencyPolicy {
    /// FIFO queue drained by one dedicated worker thread.
    #[default]
    Queued,
    /// One thread per request, serialized on the device lock in acquisition order.
    PerRequest,
    /// Run on the calling thread.
    Inline,
}

/// Where sample data ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataLimit {
    /// Read until the source is exhausted, ignoring the header's `data` size.
    ///
    /// Any chunk stored after `data` is played as samples.
    #[default]
    EndOfSource,
    /// Stop after the number of bytes declared by the `data` sub-chunk.
    DeclaredSize,
}

/// Engine tuning parameters.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Bytes read from the source and written to the device per transfer.
    pub chunk_bytes: usize,
    /// Request scheduling model.
    pub policy: ConcurrencyPolicy,
    /// Sample data termination policy.
    pub data_limit: DataLimit,
    /// Wait for the device to play out queued frames after each successful request.
    pub drain_on_finish: bool,
    /// Extra commit attempts when the device reports itself busy (0 = fail immediately).
    pub busy_retries: u32,
    /// Pause between busy retries.
    pub busy_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 4096,
            policy: ConcurrencyPolicy::default(),
            data_limit: DataLimit::default(),
            drain_on_finish: true,
            busy_retries: 0,
            busy_backoff: Duration::from_millis(50),
        }
    }
}

/// Settings for the cpal output device.
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Substring of the output device name (case-insensitive); `None` uses the host default.
    pub device: Option<String>,
    /// Capacity of the write queue in front of the device callback, in seconds of audio.
    pub buffer_seconds: f32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_seconds: 0.5,
        }
    }
}
