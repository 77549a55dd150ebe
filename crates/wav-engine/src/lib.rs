//! Playback of 16-bit PCM waveform files through the host's audio output.
//!
//! ## Pipeline
//! 1. **Parse**: [`wav`] validates the 44-byte header and positions the stream at the samples.
//! 2. **Negotiate**: [`engine`] asks the device ([`pcm::PcmDevice`]) for the file's exact format.
//! 3. **Stream**: fixed-size chunks are written to the device until the source is exhausted.
//!
//! Requests are scheduled through [`engine::PlaybackEngine`] according to a
//! [`config::ConcurrencyPolicy`]; the device is only ever touched by one request at a time.

pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod pcm;
pub mod request;
pub mod status;
pub mod wav;

#[cfg(test)]
mod mock;

pub use config::{ConcurrencyPolicy, DataLimit, EngineConfig, OutputConfig};
pub use engine::{CpalEngine, PlaybackEngine, PlaybackHandle, PlaybackReport};
pub use error::{DeviceError, PlaybackError};
pub use output::CpalBackend;
pub use request::PlaybackRequest;
pub use wav_engine_types::{PlaybackEndReason, PlaybackStatus};
