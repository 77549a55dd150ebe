//! Waveform container parsing.
//!
//! Only the canonical 44-byte layout is understood: `RIFF` header, a 16-byte `fmt `
//! sub-chunk and the `data` sub-chunk header, followed directly by interleaved samples.

use std::io::{ErrorKind, Read};

use crate::config::DataLimit;
use crate::error::{PlaybackError, Result};
use crate::pcm::PcmFormat;

/// Size of the fixed header record in bytes.
pub const HEADER_LEN: usize = 44;

/// Decoded fixed-layout waveform header. All multi-byte fields are little-endian on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaveHeader {
    pub riff: [u8; 4],
    pub chunk_size: u32,
    pub wave: [u8; 4],
    pub fmt: [u8; 4],
    pub fmt_size: u32,
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data: [u8; 4],
    pub data_size: u32,
}

impl WaveHeader {
    /// Decode and validate a header record.
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        let tag = |at: usize| -> [u8; 4] { [raw[at], raw[at + 1], raw[at + 2], raw[at + 3]] };
        let u16_at = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);
        let u32_at = |at: usize| u32::from_le_bytes(tag(at));

        let header = Self {
            riff: tag(0),
            chunk_size: u32_at(4),
            wave: tag(8),
            fmt: tag(12),
            fmt_size: u32_at(16),
            audio_format: u16_at(20),
            channels: u16_at(22),
            sample_rate: u32_at(24),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            bits_per_sample: u16_at(34),
            data: tag(36),
            data_size: u32_at(40),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if &self.riff != b"RIFF" || &self.wave != b"WAVE" {
            return Err(PlaybackError::InvalidContainer(format!(
                "expected RIFF/WAVE tags, found {:?}/{:?}",
                String::from_utf8_lossy(&self.riff),
                String::from_utf8_lossy(&self.wave)
            )));
        }
        self.sample_format()?;
        if self.channels == 0 {
            return Err(PlaybackError::UnsupportedFormat("zero channels".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(PlaybackError::UnsupportedFormat("zero sample rate".to_string()));
        }
        Ok(())
    }

    /// Device sample format for this header's bit depth.
    pub fn sample_format(&self) -> Result<PcmFormat> {
        match self.bits_per_sample {
            16 => Ok(PcmFormat::S16Le),
            other => Err(PlaybackError::UnsupportedFormat(format!(
                "{other}-bit samples"
            ))),
        }
    }

    /// Bytes per interleaved frame (`bits / 8 * channels`).
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.bits_per_sample / 8) * usize::from(self.channels)
    }

    /// Duration declared by the `data` sub-chunk, if the byte rate is usable.
    pub fn duration_ms(&self) -> Option<u64> {
        if self.byte_rate == 0 {
            return None;
        }
        Some(u64::from(self.data_size).saturating_mul(1000) / u64::from(self.byte_rate))
    }
}

/// Read and validate the header from the start of `reader`.
pub fn read_header<R: Read>(reader: &mut R) -> Result<WaveHeader> {
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            PlaybackError::InvalidContainer("truncated header".to_string())
        }
        _ => PlaybackError::SourceUnreadable(e),
    })?;
    WaveHeader::parse(&raw)
}

/// A validated header plus the reader positioned at the first sample byte.
pub struct WavStream<R> {
    header: WaveHeader,
    reader: R,
    remaining: Option<u64>,
}

impl<R: Read> WavStream<R> {
    /// Parse the header from `reader` and prepare for sequential sample reads.
    pub fn open(mut reader: R, limit: DataLimit) -> Result<Self> {
        let header = read_header(&mut reader)?;
        let remaining = match limit {
            DataLimit::EndOfSource => None,
            DataLimit::DeclaredSize => Some(u64::from(header.data_size)),
        };
        Ok(Self {
            header,
            reader,
            remaining,
        })
    }

    pub fn header(&self) -> &WaveHeader {
        &self.header
    }

    /// Fill `buf` with sample bytes, returning how many were read.
    ///
    /// Keeps reading until `buf` is full or the data ends; `Ok(0)` means exhausted.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = match self.remaining {
            Some(left) => buf.len().min(usize::try_from(left).unwrap_or(usize::MAX)),
            None => buf.len(),
        };

        let mut filled = 0;
        while filled < want {
            match self.reader.read(&mut buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PlaybackError::SourceUnreadable(e)),
            }
        }

        if let Some(left) = self.remaining.as_mut() {
            *left -= filled as u64;
        }
        Ok(filled)
    }
}

/// Build a canonical 16-bit PCM header for `data_size` bytes of samples.
#[cfg(test)]
pub(crate) fn pcm16_header(channels: u16, sample_rate: u32, data_size: u32) -> Vec<u8> {
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(HEADER_LEN);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    out
}
