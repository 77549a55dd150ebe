//! cpal-backed playback device.
//!
//! cpal streams are callback driven and not `Send` on every host, so the device and
//! its stream live on a dedicated output thread. [`CpalPcm`] talks to that thread over a
//! command channel and feeds samples through a bounded [`queue::SampleQueue`]; a write
//! blocks while the queue is full, which gives the blocking-write semantics the engine
//! expects from a PCM device.

pub mod device;
pub mod queue;
pub mod stream;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, anyhow};
use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender};

use crate::config::OutputConfig;
use crate::error::DeviceError;
use crate::pcm::{Access, AudioBackend, HwParams, PcmDevice, PcmFormat};
use queue::{SampleQueue, calc_max_buffered_samples};
use stream::StreamCounters;

/// How long a drain may go without the callback consuming anything.
const DRAIN_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Playout time assumed when the host chooses the buffer size itself.
const DEFAULT_BUFFER_LATENCY: Duration = Duration::from_millis(100);

/// Opens cpal output devices.
#[derive(Clone, Debug, Default)]
pub struct CpalBackend {
    config: OutputConfig,
}

impl CpalBackend {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }
}

impl AudioBackend for CpalBackend {
    type Device = CpalPcm;

    fn open_playback(&self) -> Result<CpalPcm, DeviceError> {
        CpalPcm::open(&self.config)
    }
}

enum OutputCommand {
    Start {
        config: cpal::StreamConfig,
        sample_format: cpal::SampleFormat,
        queue: Arc<SampleQueue>,
        counters: Arc<StreamCounters>,
        reply: Sender<anyhow::Result<()>>,
    },
    Stop,
}

struct ActiveStream {
    queue: Arc<SampleQueue>,
    counters: Arc<StreamCounters>,
    frame_bytes: usize,
    channels: u16,
    rate: u32,
    /// Time the host needs to play one output buffer.
    latency: Duration,
}

impl ActiveStream {
    fn runs_at(&self, channels: u16, rate: u32) -> bool {
        self.channels == channels && self.rate == rate
    }

    /// Wait until the callback took every queued frame and the host played the
    /// buffer holding the last of them.
    fn drain(&self) -> Result<(), DeviceError> {
        if !self.queue.wait_until_empty(DRAIN_STALL_TIMEOUT) {
            return Err(DeviceError::Other(anyhow!(
                "drain stalled with {} frames queued",
                self.queue.len_frames()
            )));
        }
        std::thread::sleep(self.latency);
        Ok(())
    }
}

/// An open cpal output device.
pub struct CpalPcm {
    name: String,
    ranges: Vec<cpal::SupportedStreamConfigRange>,
    buffer_seconds: f32,
    cmd_tx: Option<Sender<OutputCommand>>,
    thread: Option<JoinHandle<()>>,
    active: Option<ActiveStream>,
}

type OpenReply = anyhow::Result<(String, Vec<cpal::SupportedStreamConfigRange>)>;

impl CpalPcm {
    fn open(config: &OutputConfig) -> Result<Self, DeviceError> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<OpenReply>(1);
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let needle = config.device.clone();

        let thread = std::thread::Builder::new()
            .name("wav-output".to_string())
            .spawn(move || output_thread_main(needle, ready_tx, cmd_rx))
            .context("spawn output thread")?;

        let (name, ranges) = ready_rx
            .recv()
            .map_err(|_| anyhow!("output thread exited during open"))??;

        tracing::info!(device = %name, configs = ranges.len(), "output device opened");

        Ok(Self {
            name,
            ranges,
            buffer_seconds: config.buffer_seconds,
            cmd_tx: Some(cmd_tx),
            thread: Some(thread),
            active: None,
        })
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.cmd_tx.is_none() {
            return Err(DeviceError::Closed);
        }
        Ok(())
    }

    fn stop_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.queue.close();
            log_counters(&self.name, &active.counters);
        }
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(OutputCommand::Stop);
        }
    }
}

fn log_counters(device: &str, counters: &StreamCounters) {
    tracing::debug!(
        device = %device,
        played_frames = counters.played_frames.load(Ordering::Relaxed),
        underrun_frames = counters.underrun_frames.load(Ordering::Relaxed),
        underrun_events = counters.underrun_events.load(Ordering::Relaxed),
        "output stream stopped"
    );
}

impl PcmDevice for CpalPcm {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn hw_params_any(&mut self) -> Result<HwParams, DeviceError> {
        self.ensure_open()?;
        Ok(HwParams::default())
    }

    fn set_access(&mut self, params: &mut HwParams, access: Access) -> Result<(), DeviceError> {
        match access {
            Access::RwInterleaved => {
                params.access = Some(access);
                Ok(())
            }
            other => Err(DeviceError::Unsupported(format!("{other:?} access"))),
        }
    }

    fn set_format(&mut self, params: &mut HwParams, format: PcmFormat) -> Result<(), DeviceError> {
        params.format = Some(format);
        Ok(())
    }

    fn set_channels(&mut self, params: &mut HwParams, channels: u16) -> Result<(), DeviceError> {
        if !device::supports_channels(&self.ranges, channels) {
            return Err(DeviceError::Unsupported(format!("{channels} channels")));
        }
        params.channels = Some(channels);
        Ok(())
    }

    fn set_rate(&mut self, params: &mut HwParams, rate_hz: u32) -> Result<(), DeviceError> {
        if !device::supports_rate(&self.ranges, params.channels, rate_hz) {
            return Err(DeviceError::Unsupported(format!("{rate_hz} Hz")));
        }
        params.rate = Some(rate_hz);
        Ok(())
    }

    fn commit(&mut self, params: &HwParams) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let (Some(Access::RwInterleaved), Some(_), Some(channels), Some(rate)) =
            (params.access, params.format, params.channels, params.rate)
        else {
            return Err(DeviceError::Rejected(format!(
                "incomplete parameter set {params:?}"
            )));
        };
        let frame_bytes = params
            .frame_bytes()
            .ok_or_else(|| DeviceError::Rejected("unknown frame size".to_string()))?;

        if self.active.as_ref().is_some_and(|a| a.runs_at(channels, rate)) {
            tracing::debug!(device = %self.name, channels, rate_hz = rate, "reusing output stream");
            return Ok(());
        }

        let supported = device::pick_exact_config(&self.ranges, channels, rate).ok_or_else(|| {
            DeviceError::Rejected(format!("no output config for {channels} ch @ {rate} Hz"))
        })?;
        let mut stream_config: cpal::StreamConfig = supported.config();
        if let Some(buf) = device::pick_buffer_size(&supported) {
            stream_config.buffer_size = buf;
        }

        self.stop_active();

        let queue = Arc::new(SampleQueue::new(
            usize::from(channels),
            calc_max_buffered_samples(rate, usize::from(channels), self.buffer_seconds),
        ));
        let counters = Arc::new(StreamCounters::default());
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let cmd_tx = self.cmd_tx.as_ref().ok_or(DeviceError::Closed)?;
        cmd_tx
            .send(OutputCommand::Start {
                config: stream_config.clone(),
                sample_format: supported.sample_format(),
                queue: queue.clone(),
                counters: counters.clone(),
                reply: reply_tx,
            })
            .map_err(|_| DeviceError::Closed)?;
        reply_rx.recv().map_err(|_| DeviceError::Closed)??;

        tracing::info!(
            device = %self.name,
            channels,
            rate_hz = rate,
            device_format = ?supported.sample_format(),
            buffer_size = ?stream_config.buffer_size,
            "output stream configured"
        );

        self.active = Some(ActiveStream {
            queue,
            counters,
            frame_bytes,
            channels,
            rate,
            latency: device::buffer_latency(&stream_config.buffer_size, rate, DEFAULT_BUFFER_LATENCY),
        });
        Ok(())
    }

    fn write_interleaved(&mut self, buf: &[u8], frames: usize) -> Result<usize, DeviceError> {
        self.ensure_open()?;
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| DeviceError::Rejected("hardware parameters not committed".to_string()))?;

        let bytes = frames * active.frame_bytes;
        let samples: Vec<i16> = buf[..bytes]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        if !active.queue.push_blocking(&samples) {
            return Err(DeviceError::Closed);
        }
        Ok(frames)
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        match self.active.as_ref() {
            Some(active) => active.drain(),
            None => Ok(()),
        }
    }

    fn drop_pending(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if let Some(active) = self.active.as_ref() {
            active.queue.clear();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.stop_active();
        self.cmd_tx = None;
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| DeviceError::Other(anyhow!("output thread panicked")))?;
            tracing::info!(device = %self.name, "output device closed");
        }
        Ok(())
    }
}

impl Drop for CpalPcm {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("output close error: {e}");
        }
    }
}

/// Owns the cpal host, device and stream for the lifetime of a [`CpalPcm`].
fn output_thread_main(
    needle: Option<String>,
    ready_tx: Sender<OpenReply>,
    cmd_rx: Receiver<OutputCommand>,
) {
    let host = cpal::default_host();
    let opened = device::pick_device(&host, needle.as_deref()).and_then(|d| {
        let ranges = device::output_ranges(&d)?;
        Ok((d, ranges))
    });
    let out_device = match opened {
        Ok((d, ranges)) => {
            let _ = ready_tx.send(Ok((device::device_name(&d), ranges)));
            d
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let mut current: Option<cpal::Stream> = None;
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            OutputCommand::Start {
                config,
                sample_format,
                queue,
                counters,
                reply,
            } => {
                current = None;
                let built = stream::build_output_stream(
                    &out_device,
                    &config,
                    sample_format,
                    &queue,
                    &counters,
                )
                .and_then(|s| {
                    s.play().context("start output stream")?;
                    Ok(s)
                });
                match built {
                    Ok(s) => {
                        current = Some(s);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            OutputCommand::Stop => current = None,
        }
    }
    drop(current);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn active(latency: Duration) -> ActiveStream {
        ActiveStream {
            queue: Arc::new(SampleQueue::new(1, 64)),
            counters: Arc::new(StreamCounters::default()),
            frame_bytes: 2,
            channels: 1,
            rate: 8_000,
            latency,
        }
    }

    #[test]
    fn drain_waits_for_last_buffer_to_play() {
        let stream = active(Duration::from_millis(40));
        assert!(stream.queue.push_blocking(&[1, 2, 3, 4]));

        let queue = stream.queue.clone();
        let consumer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            let mut out = [0i16; 4];
            queue.pop_into(&mut out);
            Instant::now()
        });

        stream.drain().unwrap();
        let returned = Instant::now();
        let emptied = consumer.join().unwrap();

        assert!(returned.duration_since(emptied) >= Duration::from_millis(30));
        assert_eq!(stream.queue.len_frames(), 0);
    }

    #[test]
    fn drain_reports_closed_queue_with_frames_left() {
        let stream = active(Duration::ZERO);
        assert!(stream.queue.push_blocking(&[1, 2]));
        stream.queue.close();

        assert!(stream.drain().is_err());
    }

    #[test]
    fn stream_is_reused_only_for_same_format() {
        let stream = active(Duration::ZERO);
        assert!(stream.runs_at(1, 8_000));
        assert!(!stream.runs_at(2, 8_000));
        assert!(!stream.runs_at(1, 44_100));
    }
}
