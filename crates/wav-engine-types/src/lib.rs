use serde::{Deserialize, Serialize};

/// Reason why a playback request ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Sample data was exhausted.
    Eof,
    /// Parse, negotiation or device failure aborted the request.
    Error,
    /// The request was cancelled through its handle.
    Cancelled,
}

/// Playback status reported by an engine instance.
///
/// Track fields are cleared when the engine goes idle; `end_reason` and the
/// counters of the last request are kept until the next one starts.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackStatus {
    /// Source currently being played, if any.
    pub now_playing: Option<String>,
    /// Output device name, once the device is open.
    pub device: Option<String>,
    /// Negotiated sample rate (Hz).
    pub sample_rate: Option<u32>,
    /// Negotiated channel count.
    pub channels: Option<u16>,
    /// Source bit depth.
    pub bits_per_sample: Option<u16>,
    /// Duration declared by the waveform header, in milliseconds.
    pub duration_ms: Option<u64>,
    /// Elapsed time derived from frames written, in milliseconds.
    pub elapsed_ms: Option<u64>,
    /// Frames handed to the device by the current (or last) request.
    pub frames_written: u64,
    /// Chunk transfers performed by the current (or last) request.
    pub chunks_written: u64,
    /// Requests submitted but not yet finished, including the one streaming.
    pub pending_requests: u64,
    /// How the last request ended.
    pub end_reason: Option<PlaybackEndReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_reason_serializes_snake_case() {
        let json = serde_json::to_string(&PlaybackEndReason::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let back: PlaybackEndReason = serde_json::from_str("\"eof\"").unwrap();
        assert_eq!(back, PlaybackEndReason::Eof);
    }

    #[test]
    fn default_status_is_idle() {
        let status = PlaybackStatus::default();
        assert!(status.now_playing.is_none());
        assert_eq!(status.frames_written, 0);
        assert!(status.end_reason.is_none());
    }
}
