use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use wav_engine_types::{PlaybackEndReason, PlaybackStatus};

use crate::wav::WaveHeader;

/// Shared playback status updated by the engine.
#[derive(Debug, Default)]
pub struct PlayerStatusState {
    /// Label of the request currently streaming.
    pub now_playing: Option<String>,
    /// Output device name.
    pub device: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bits_per_sample: Option<u16>,
    /// Duration declared by the header.
    pub duration_ms: Option<u64>,
    /// Frames accepted by the device for the current request.
    pub frames_written: Arc<AtomicU64>,
    /// Chunk transfers for the current request.
    pub chunks_written: Arc<AtomicU64>,
    /// Requests submitted but not yet finished, including the one streaming.
    pub pending_requests: Arc<AtomicU64>,
    /// How the last request ended.
    pub end_reason: Option<PlaybackEndReason>,
}

impl PlayerStatusState {
    /// Create a shared, mutex-protected status store.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Return a serializable snapshot.
    pub fn snapshot(&self) -> PlaybackStatus {
        let frames_written = self.frames_written.load(Ordering::Relaxed);
        let elapsed_ms = match self.sample_rate {
            Some(sr) if sr > 0 => Some(frames_written.saturating_mul(1000) / u64::from(sr)),
            _ => None,
        };
        PlaybackStatus {
            now_playing: self.now_playing.clone(),
            device: self.device.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
            duration_ms: self.duration_ms,
            elapsed_ms,
            frames_written,
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            pending_requests: self.pending_requests.load(Ordering::Relaxed),
            end_reason: self.end_reason,
        }
    }

    /// Record the start of a request whose header has been parsed.
    pub fn begin_playback(&mut self, label: &str, header: &WaveHeader) {
        self.now_playing = Some(label.to_string());
        self.sample_rate = Some(header.sample_rate);
        self.channels = Some(header.channels);
        self.bits_per_sample = Some(header.bits_per_sample);
        self.duration_ms = header.duration_ms();
        self.frames_written.store(0, Ordering::Relaxed);
        self.chunks_written.store(0, Ordering::Relaxed);
        self.end_reason = None;
    }

    /// Clear track-specific fields and remember how the request ended.
    pub fn finish_playback(&mut self, reason: PlaybackEndReason) {
        self.now_playing = None;
        self.duration_ms = None;
        self.end_reason = Some(reason);
    }

    /// Note a request that ended before reaching the device.
    ///
    /// A track currently streaming keeps its fields; the reason is only recorded when
    /// the device is idle.
    pub fn record_unplayed(&mut self, reason: PlaybackEndReason) {
        if self.now_playing.is_none() {
            self.end_reason = Some(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::{HEADER_LEN, pcm16_header};

    fn header() -> WaveHeader {
        let raw: [u8; HEADER_LEN] = pcm16_header(2, 48_000, 192_000).try_into().unwrap();
        WaveHeader::parse(&raw).unwrap()
    }

    #[test]
    fn snapshot_reports_elapsed_from_frames() {
        let mut state = PlayerStatusState::default();
        state.begin_playback("song.wav", &header());
        state.frames_written.store(96_000, Ordering::Relaxed);

        let snap = state.snapshot();
        assert_eq!(snap.now_playing.as_deref(), Some("song.wav"));
        assert_eq!(snap.elapsed_ms, Some(2000));
        assert_eq!(snap.duration_ms, Some(1000));
        assert_eq!(snap.channels, Some(2));
    }

    #[test]
    fn begin_playback_resets_counters() {
        let mut state = PlayerStatusState::default();
        state.frames_written.store(10, Ordering::Relaxed);
        state.chunks_written.store(3, Ordering::Relaxed);
        state.end_reason = Some(PlaybackEndReason::Error);

        state.begin_playback("next.wav", &header());

        let snap = state.snapshot();
        assert_eq!(snap.frames_written, 0);
        assert_eq!(snap.chunks_written, 0);
        assert!(snap.end_reason.is_none());
    }

    #[test]
    fn finish_playback_keeps_counters_and_reason() {
        let mut state = PlayerStatusState::default();
        state.begin_playback("song.wav", &header());
        state.frames_written.store(42, Ordering::Relaxed);

        state.finish_playback(PlaybackEndReason::Eof);

        let snap = state.snapshot();
        assert!(snap.now_playing.is_none());
        assert_eq!(snap.frames_written, 42);
        assert_eq!(snap.end_reason, Some(PlaybackEndReason::Eof));
    }

    #[test]
    fn unplayed_request_leaves_streaming_track_alone() {
        let mut state = PlayerStatusState::default();
        state.begin_playback("song.wav", &header());

        state.record_unplayed(PlaybackEndReason::Error);

        let snap = state.snapshot();
        assert_eq!(snap.now_playing.as_deref(), Some("song.wav"));
        assert!(snap.end_reason.is_none());
    }

    #[test]
    fn unplayed_request_is_recorded_when_idle() {
        let mut state = PlayerStatusState::default();

        state.record_unplayed(PlaybackEndReason::Error);

        assert_eq!(state.snapshot().end_reason, Some(PlaybackEndReason::Error));
    }
}
