//! Output device discovery and exact-format config matching.
//!
//! Thin wrappers around cpal for:
//! - selecting either the default device or a device by substring match
//! - finding a supported config that runs at exactly the requested channels and rate

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive),
/// or the host default output device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Best-effort device display name.
pub fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "unknown output".to_string())
}

/// Supported output config ranges of `device`.
pub fn output_ranges(device: &cpal::Device) -> Result<Vec<cpal::SupportedStreamConfigRange>> {
    let ranges: Vec<_> = device
        .supported_output_configs()
        .context("query supported output configs")?
        .collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }
    Ok(ranges)
}

/// Whether any range has exactly `channels` channels.
pub fn supports_channels(ranges: &[cpal::SupportedStreamConfigRange], channels: u16) -> bool {
    ranges.iter().any(|r| r.channels() == channels)
}

/// Whether any range covers `rate_hz`, optionally restricted to `channels`.
pub fn supports_rate(
    ranges: &[cpal::SupportedStreamConfigRange],
    channels: Option<u16>,
    rate_hz: u32,
) -> bool {
    ranges.iter().any(|r| {
        channels.is_none_or(|c| r.channels() == c)
            && r.min_sample_rate() <= rate_hz
            && rate_hz <= r.max_sample_rate()
    })
}

/// Pick the supported config that plays `channels` at exactly `rate_hz`.
///
/// Among matching ranges the native `i16` format wins, then formats that convert
/// losslessly from it.
pub fn pick_exact_config(
    ranges: &[cpal::SupportedStreamConfigRange],
    channels: u16,
    rate_hz: u32,
) -> Option<cpal::SupportedStreamConfig> {
    ranges
        .iter()
        .filter(|r| r.channels() == channels)
        .filter(|r| sample_format_rank(r.sample_format()).is_some())
        .filter_map(|r| r.clone().try_with_sample_rate(rate_hz))
        .min_by_key(|c| sample_format_rank(c.sample_format()))
}

/// Prefer a fixed buffer size if the device advertises one.
///
/// Returns `None` when the device only supports its default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const TARGET_FRAMES: u32 = 2048;
            Some(cpal::BufferSize::Fixed(TARGET_FRAMES.clamp(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Time for the host to play out one full output buffer.
///
/// Hosts that pick their own buffer size get `fallback`.
pub fn buffer_latency(buffer_size: &cpal::BufferSize, rate_hz: u32, fallback: Duration) -> Duration {
    match buffer_size {
        cpal::BufferSize::Fixed(frames) if rate_hz > 0 => {
            Duration::from_secs_f64(f64::from(*frames) / f64::from(rate_hz))
        }
        _ => fallback,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> Option<u8> {
    match format {
        cpal::SampleFormat::I16 => Some(0),
        cpal::SampleFormat::I32 => Some(1),
        cpal::SampleFormat::F32 => Some(2),
        cpal::SampleFormat::U16 => Some(3),
        _ => None,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(channels: u16, min: u32, max: u32, format: cpal::SampleFormat) -> cpal::SupportedStreamConfigRange {
        cpal::SupportedStreamConfigRange::new(
            channels,
            min,
            max,
            cpal::SupportedBufferSize::Range { min: 64, max: 8192 },
            format,
        )
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn supports_channels_requires_exact_count() {
        let ranges = [range(2, 44_100, 48_000, cpal::SampleFormat::F32)];
        assert!(supports_channels(&ranges, 2));
        assert!(!supports_channels(&ranges, 1));
    }

    #[test]
    fn supports_rate_checks_range_bounds() {
        let ranges = [
            range(2, 44_100, 48_000, cpal::SampleFormat::F32),
            range(1, 8_000, 8_000, cpal::SampleFormat::I16),
        ];
        assert!(supports_rate(&ranges, None, 48_000));
        assert!(supports_rate(&ranges, Some(1), 8_000));
        assert!(!supports_rate(&ranges, Some(2), 8_000));
        assert!(!supports_rate(&ranges, None, 96_000));
    }

    #[test]
    fn pick_exact_config_prefers_native_i16() {
        let ranges = [
            range(2, 8_000, 192_000, cpal::SampleFormat::F32),
            range(2, 8_000, 192_000, cpal::SampleFormat::I16),
        ];
        let cfg = pick_exact_config(&ranges, 2, 44_100).unwrap();
        assert_eq!(cfg.sample_format(), cpal::SampleFormat::I16);
        assert_eq!(cfg.sample_rate(), 44_100);
        assert_eq!(cfg.channels(), 2);
    }

    #[test]
    fn pick_exact_config_never_substitutes_rate_or_channels() {
        let ranges = [range(2, 48_000, 48_000, cpal::SampleFormat::F32)];
        assert!(pick_exact_config(&ranges, 2, 44_100).is_none());
        assert!(pick_exact_config(&ranges, 1, 48_000).is_none());
    }

    #[test]
    fn pick_exact_config_skips_unconvertible_formats() {
        let ranges = [range(2, 44_100, 44_100, cpal::SampleFormat::U8)];
        assert!(pick_exact_config(&ranges, 2, 44_100).is_none());
    }

    #[test]
    fn pick_buffer_size_clamps_to_range() {
        let cfg = range(2, 44_100, 44_100, cpal::SampleFormat::I16).with_sample_rate(44_100);
        assert_eq!(pick_buffer_size(&cfg), Some(cpal::BufferSize::Fixed(2048)));
    }

    #[test]
    fn buffer_latency_follows_fixed_size() {
        let fallback = Duration::from_millis(100);
        assert_eq!(
            buffer_latency(&cpal::BufferSize::Fixed(4410), 44_100, fallback),
            Duration::from_millis(100)
        );
        assert_eq!(
            buffer_latency(&cpal::BufferSize::Fixed(2048), 48_000, fallback),
            Duration::from_secs_f64(2048.0 / 48_000.0)
        );
        assert_eq!(buffer_latency(&cpal::BufferSize::Default, 48_000, fallback), fallback);
    }
}
