//! cpal output stream fed from a [`SampleQueue`].
//!
//! The callback:
//! - copies as many whole frames as are buffered, without blocking
//! - converts `i16` to the device's native sample type
//! - fills the remainder with silence and counts the underrun

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use super::queue::SampleQueue;

/// Underrun counters shared with the callback.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub played_frames: AtomicU64,
    pub underrun_frames: AtomicU64,
    pub underrun_events: AtomicU64,
}

/// Build an output stream playing interleaved `i16` samples from `queue`.
///
/// `config.channels` must equal `queue.channels()`; no channel mapping is applied.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    counters: &Arc<StreamCounters>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, counters),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, counters),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, counters),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, counters),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    counters: &Arc<StreamCounters>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels = usize::from(config.channels);
    if channels != queue.channels() {
        return Err(anyhow!(
            "stream has {channels} channels but queue carries {}",
            queue.channels()
        ));
    }

    let queue_cb = queue.clone();
    let counters_cb = counters.clone();
    let mut scratch: Vec<i16> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0);
            }
            let frames = data.len() / channels;
            let got = queue_cb.pop_into(&mut scratch[..data.len()]);
            fill_output(data, &scratch[..got * channels]);

            if got > 0 {
                counters_cb
                    .played_frames
                    .fetch_add(got as u64, Ordering::Relaxed);
            }
            if got < frames {
                counters_cb.underrun_events.fetch_add(1, Ordering::Relaxed);
                counters_cb
                    .underrun_frames
                    .fetch_add((frames - got) as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Convert `src` into the head of `data`; the tail becomes silence.
fn fill_output<T>(data: &mut [T], src: &[i16])
where
    T: cpal::Sample + cpal::FromSample<i16>,
{
    for (dst, &s) in data.iter_mut().zip(src) {
        *dst = <T as cpal::Sample>::from_sample::<i16>(s);
    }
    for dst in data.iter_mut().skip(src.len()) {
        *dst = T::EQUILIBRIUM;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_output_pads_with_silence() {
        let mut data = [7i16; 6];
        fill_output(&mut data, &[1, 2, 3, 4]);
        assert_eq!(data, [1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn fill_output_converts_to_float() {
        let mut data = [1.0f32; 3];
        fill_output(&mut data, &[i16::MIN, 0]);
        assert_eq!(data[0], -1.0);
        assert_eq!(data[1], 0.0);
        assert_eq!(data[2], 0.0);
    }

    #[test]
    fn fill_output_converts_to_unsigned() {
        let mut data = [0u16; 2];
        fill_output(&mut data, &[0]);
        assert_eq!(data, [32_768, 32_768]);
    }
}
