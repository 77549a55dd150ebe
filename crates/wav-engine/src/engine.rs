//! Playback engine.
//!
//! Owns the single open output device and executes playback requests against it:
//! parse the header, negotiate hardware parameters for the file's exact format, then
//! stream fixed-size chunks until the source is exhausted.
//!
//! Negotiation and streaming for one request happen while holding the device lock, so
//! requests never interleave on the device regardless of the [`ConcurrencyPolicy`].

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::anyhow;
use crossbeam_channel::{Receiver, Sender};

use crate::config::{ConcurrencyPolicy, EngineConfig};
use crate::error::{DeviceError, PlaybackError, Result};
use crate::pcm::{Access, AudioBackend, PcmDevice, PcmFormat};
use crate::request::PlaybackRequest;
use crate::status::PlayerStatusState;
use crate::wav::{WavStream, WaveHeader};
use wav_engine_types::{PlaybackEndReason, PlaybackStatus};

/// Outcome of a request that played to the end of its sample data.
#[derive(Clone, Debug)]
pub struct PlaybackReport {
    pub label: String,
    pub header: WaveHeader,
    /// Frames accepted by the device.
    pub frames_written: u64,
    /// Chunk transfers performed.
    pub chunks_written: u64,
    /// Trailing bytes shorter than one frame that were never written.
    pub dropped_bytes: usize,
}

/// Handle to a submitted request.
pub struct PlaybackHandle {
    label: String,
    cancel: Arc<AtomicBool>,
    done_rx: Receiver<Result<PlaybackReport>>,
}

impl PlaybackHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Ask the request to stop. Checked before negotiation and before every chunk.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Block until the request finished.
    pub fn wait(self) -> Result<PlaybackReport> {
        self.done_rx
            .recv()
            .unwrap_or(Err(PlaybackError::EngineStopped))
    }

    /// Result of the request if it already finished.
    pub fn try_wait(&self) -> Option<Result<PlaybackReport>> {
        self.done_rx.try_recv().ok()
    }
}

enum DeviceSlot<D> {
    Open { device: D, needs_reset: bool },
    Unavailable(String),
    Closed,
}

struct Job {
    request: PlaybackRequest,
    cancel: Arc<AtomicBool>,
    done_tx: Sender<Result<PlaybackReport>>,
}

struct EngineShared<D> {
    device: Mutex<DeviceSlot<D>>,
    /// Set once when the device failed to open; never changes afterwards.
    open_error: Option<String>,
    config: EngineConfig,
    status: Arc<Mutex<PlayerStatusState>>,
    pending: Arc<AtomicU64>,
}

/// Executes playback requests against one exclusively owned output device.
pub struct PlaybackEngine<D: PcmDevice> {
    shared: Arc<EngineShared<D>>,
    queue_tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    spawned: Mutex<Vec<JoinHandle<()>>>,
}

/// Engine playing through the host's cpal output device.
pub type CpalEngine = PlaybackEngine<crate::output::CpalPcm>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<D: PcmDevice> PlaybackEngine<D> {
    /// Open the backend's default output device and start the engine.
    ///
    /// An open failure does not fail construction: it is logged, kept, and every
    /// request afterwards fails with [`PlaybackError::DeviceUnavailable`].
    pub fn new<B>(backend: &B, config: EngineConfig) -> Self
    where
        B: AudioBackend<Device = D>,
    {
        let status = PlayerStatusState::shared();
        let slot = match backend.open_playback() {
            Ok(mut device) => {
                if let Err(e) = device.prepare() {
                    tracing::warn!(error = %e, "device prepare failed");
                }
                lock(&status).device = Some(device.name());
                DeviceSlot::Open {
                    device,
                    needs_reset: false,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "playback open error");
                DeviceSlot::Unavailable(e.to_string())
            }
        };

        let pending = lock(&status).pending_requests.clone();
        let open_error = match &slot {
            DeviceSlot::Unavailable(reason) => Some(reason.clone()),
            _ => None,
        };
        let shared = Arc::new(EngineShared {
            device: Mutex::new(slot),
            open_error,
            config,
            status,
            pending,
        });

        let (queue_tx, worker) = if shared.config.policy == ConcurrencyPolicy::Queued {
            let (tx, rx) = crossbeam_channel::unbounded();
            let shared_for_worker = shared.clone();
            match std::thread::Builder::new()
                .name("wav-playback".to_string())
                .spawn(move || worker_main(shared_for_worker, rx))
            {
                Ok(join) => (Some(tx), Some(join)),
                Err(e) => {
                    tracing::error!(error = %e, "failed to spawn playback worker");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        Self {
            shared,
            queue_tx,
            worker,
            spawned: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Why the device is unusable, if it is.
    pub fn device_error(&self) -> Option<String> {
        match &*lock(&self.shared.device) {
            DeviceSlot::Open { .. } => None,
            DeviceSlot::Unavailable(reason) => Some(reason.clone()),
            DeviceSlot::Closed => Some("device closed".to_string()),
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        lock(&self.shared.status).snapshot()
    }

    /// Submit a request according to the engine's concurrency policy.
    pub fn play(&self, request: PlaybackRequest) -> PlaybackHandle {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = PlaybackHandle {
            label: request.label().to_string(),
            cancel: cancel.clone(),
            done_rx,
        };
        let job = Job {
            request,
            cancel,
            done_tx,
        };

        self.shared.pending.fetch_add(1, Ordering::Relaxed);
        match self.shared.config.policy {
            ConcurrencyPolicy::Inline => run_job(&self.shared, job),
            ConcurrencyPolicy::PerRequest => self.spawn_job(job),
            ConcurrencyPolicy::Queued => match &self.queue_tx {
                Some(tx) => {
                    if let Err(err) = tx.send(job) {
                        reject_job(&self.shared, err.into_inner());
                    }
                }
                None => reject_job(&self.shared, job),
            },
        }
        handle
    }

    /// Submit a request and wait for it to finish.
    pub fn play_blocking(&self, request: PlaybackRequest) -> Result<PlaybackReport> {
        self.play(request).wait()
    }

    fn spawn_job(&self, job: Job) {
        let shared = self.shared.clone();
        let done_tx = job.done_tx.clone();
        let spawned = std::thread::Builder::new()
            .name("wav-request".to_string())
            .spawn(move || run_job(&shared, job));
        match spawned {
            Ok(join) => {
                let mut threads = lock(&self.spawned);
                threads.retain(|t| !t.is_finished());
                threads.push(join);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn playback thread");
                self.shared.pending.fetch_sub(1, Ordering::Relaxed);
                let _ = done_tx.send(Err(PlaybackError::EngineStopped));
            }
        }
    }

    /// Close the output device. Requests submitted afterwards fail with
    /// [`PlaybackError::DeviceUnavailable`]; a request already streaming finishes first.
    pub fn close(&self) {
        let mut slot = lock(&self.shared.device);
        if let DeviceSlot::Open { device, .. } = &mut *slot {
            if let Err(e) = device.close() {
                tracing::warn!(error = %e, "device close failed");
            }
            *slot = DeviceSlot::Closed;
        }
    }
}

impl<D: PcmDevice> Drop for PlaybackEngine<D> {
    fn drop(&mut self) {
        // Closing the queue lets the worker finish what was already submitted.
        drop(self.queue_tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        for t in lock(&self.spawned).drain(..) {
            let _ = t.join();
        }
    }
}

fn worker_main<D: PcmDevice>(shared: Arc<EngineShared<D>>, rx: Receiver<Job>) {
    tracing::debug!("playback worker started");
    while let Ok(job) = rx.recv() {
        run_job(&shared, job);
    }
    tracing::debug!("playback worker stopped");
}

fn reject_job<D>(shared: &EngineShared<D>, job: Job) {
    shared.pending.fetch_sub(1, Ordering::Relaxed);
    let _ = job.done_tx.send(Err(PlaybackError::EngineStopped));
}

fn run_job<D: PcmDevice>(shared: &EngineShared<D>, job: Job) {
    let Job {
        request,
        cancel,
        done_tx,
    } = job;
    let label = request.label().to_string();

    let result = shared.execute(request, &cancel);
    match &result {
        Ok(report) => tracing::info!(
            source = %label,
            frames = report.frames_written,
            chunks = report.chunks_written,
            "playback finished"
        ),
        Err(PlaybackError::Cancelled) => tracing::info!(source = %label, "playback cancelled"),
        Err(e) => tracing::warn!(source = %label, "playback error: {e}"),
    }
    shared.pending.fetch_sub(1, Ordering::Relaxed);
    let _ = done_tx.send(result);
}

fn end_reason(result: &Result<PlaybackReport>) -> PlaybackEndReason {
    match result {
        Ok(_) => PlaybackEndReason::Eof,
        Err(PlaybackError::Cancelled) => PlaybackEndReason::Cancelled,
        Err(_) => PlaybackEndReason::Error,
    }
}

impl<D: PcmDevice> EngineShared<D> {
    /// Run one request. Status fields describing the current track are only touched
    /// while the device lock is held.
    fn execute(&self, request: PlaybackRequest, cancel: &AtomicBool) -> Result<PlaybackReport> {
        let label = request.label().to_string();
        tracing::info!(source = %label, "playback requested");

        let mut wav = match self.open_source(request) {
            Ok(wav) => wav,
            Err(e) => {
                lock(&self.status).record_unplayed(PlaybackEndReason::Error);
                return Err(e);
            }
        };

        let mut slot = lock(&self.device);
        let result = self.play_locked(&mut slot, label, &mut wav, cancel);
        lock(&self.status).finish_playback(end_reason(&result));
        drop(slot);
        result
    }

    fn open_source(&self, request: PlaybackRequest) -> Result<WavStream<Box<dyn Read + Send>>> {
        if let Some(reason) = &self.open_error {
            return Err(PlaybackError::DeviceUnavailable(reason.clone()));
        }
        let reader = request.open()?;
        let wav = WavStream::open(reader, self.config.data_limit)?;
        wav.header().sample_format()?;
        Ok(wav)
    }

    fn play_locked<R: Read>(
        &self,
        slot: &mut DeviceSlot<D>,
        label: String,
        wav: &mut WavStream<R>,
        cancel: &AtomicBool,
    ) -> Result<PlaybackReport> {
        let (device, needs_reset) = match slot {
            DeviceSlot::Open {
                device,
                needs_reset,
            } => (device, needs_reset),
            DeviceSlot::Unavailable(reason) => {
                return Err(PlaybackError::DeviceUnavailable(reason.clone()));
            }
            DeviceSlot::Closed => {
                return Err(PlaybackError::DeviceUnavailable("device closed".to_string()));
            }
        };

        if cancel.load(Ordering::Relaxed) {
            return Err(PlaybackError::Cancelled);
        }

        if *needs_reset {
            reset_device(device);
        }
        // Cleared only once the request finished cleanly.
        *needs_reset = true;

        let header = wav.header().clone();
        let format = header.sample_format()?;
        let (frames_counter, chunks_counter) = {
            let mut status = lock(&self.status);
            status.begin_playback(&label, &header);
            (status.frames_written.clone(), status.chunks_written.clone())
        };
        tracing::info!(
            source = %label,
            channels = header.channels,
            rate_hz = header.sample_rate,
            bits = header.bits_per_sample,
            data_bytes = header.data_size,
            "waveform parsed"
        );

        negotiate(device, &header, format, &self.config)?;

        let totals = stream_samples(
            device,
            wav,
            self.config.chunk_bytes,
            cancel,
            &StreamProgress {
                frames: frames_counter,
                chunks: chunks_counter,
            },
        )?;

        if self.config.drain_on_finish {
            match device.drain() {
                Ok(()) => *needs_reset = false,
                Err(e) => tracing::warn!(error = %e, "device drain failed"),
            }
        } else {
            *needs_reset = false;
        }

        Ok(PlaybackReport {
            label,
            header,
            frames_written: totals.frames,
            chunks_written: totals.chunks,
            dropped_bytes: totals.dropped_bytes,
        })
    }
}

/// Discard leftovers of a request that did not finish cleanly.
fn reset_device<D: PcmDevice>(device: &mut D) {
    tracing::debug!("resetting device after unclean request");
    if let Err(e) = device.drop_pending() {
        tracing::warn!(error = %e, "device drop failed");
    }
    if let Err(e) = device.prepare() {
        tracing::warn!(error = %e, "device prepare failed");
    }
}

/// Configure the device for `header`'s exact format.
///
/// Individual `set_*` refusals are logged and negotiation continues; only a refused
/// commit aborts the request.
fn negotiate<D: PcmDevice>(
    device: &mut D,
    header: &WaveHeader,
    format: PcmFormat,
    config: &EngineConfig,
) -> Result<()> {
    let mut params = device
        .hw_params_any()
        .map_err(PlaybackError::HardwareConfigRejected)?;

    if let Err(e) = device.set_access(&mut params, Access::RwInterleaved) {
        tracing::warn!(error = %e, "access negotiation failed");
    }
    if let Err(e) = device.set_format(&mut params, format) {
        tracing::warn!(error = %e, format = ?format, "format negotiation failed");
    }
    if let Err(e) = device.set_channels(&mut params, header.channels) {
        tracing::warn!(error = %e, channels = header.channels, "channel negotiation failed");
    }
    if let Err(e) = device.set_rate(&mut params, header.sample_rate) {
        tracing::warn!(error = %e, rate_hz = header.sample_rate, "rate negotiation failed");
    }

    let mut attempt = 0;
    loop {
        match device.commit(&params) {
            Ok(()) => return Ok(()),
            Err(DeviceError::Busy) if attempt < config.busy_retries => {
                attempt += 1;
                tracing::debug!(attempt, "device busy, retrying commit");
                std::thread::sleep(config.busy_backoff);
            }
            Err(e) => {
                tracing::warn!(error = %e, "error finalizing hardware parameters");
                return Err(PlaybackError::HardwareConfigRejected(e));
            }
        }
    }
}

struct StreamProgress {
    frames: Arc<AtomicU64>,
    chunks: Arc<AtomicU64>,
}

struct StreamTotals {
    frames: u64,
    chunks: u64,
    dropped_bytes: usize,
}

/// Copy sample data to the device in `chunk_bytes` transfers until the source ends.
///
/// Bytes that do not fill a whole frame are carried into the next chunk; whatever is
/// left at the end of the source is dropped.
fn stream_samples<D: PcmDevice, R: Read>(
    device: &mut D,
    wav: &mut WavStream<R>,
    chunk_bytes: usize,
    cancel: &AtomicBool,
    progress: &StreamProgress,
) -> Result<StreamTotals> {
    let frame_bytes = wav.header().frame_bytes();
    let mut buf = vec![0u8; chunk_bytes.max(frame_bytes)];
    let mut carried = 0usize;
    let mut totals = StreamTotals {
        frames: 0,
        chunks: 0,
        dropped_bytes: 0,
    };

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(PlaybackError::Cancelled);
        }

        let read = wav.read_chunk(&mut buf[carried..])?;
        if read == 0 {
            if carried > 0 {
                tracing::debug!(bytes = carried, "dropping trailing partial frame");
            }
            totals.dropped_bytes = carried;
            return Ok(totals);
        }

        let available = carried + read;
        let frames = available / frame_bytes;
        let used = frames * frame_bytes;
        if frames > 0 {
            write_frames(device, &buf[..used], frames, frame_bytes)?;
            totals.frames += frames as u64;
            totals.chunks += 1;
            progress.frames.fetch_add(frames as u64, Ordering::Relaxed);
            progress.chunks.fetch_add(1, Ordering::Relaxed);
        }
        buf.copy_within(used..available, 0);
        carried = available - used;
    }
}

/// Write all `frames`, repeating the transfer when the device accepts fewer.
fn write_frames<D: PcmDevice>(
    device: &mut D,
    buf: &[u8],
    frames: usize,
    frame_bytes: usize,
) -> Result<()> {
    let mut done = 0;
    while done < frames {
        let written = device
            .write_interleaved(&buf[done * frame_bytes..], frames - done)
            .map_err(PlaybackError::DeviceWrite)?;
        if written == 0 {
            return Err(PlaybackError::DeviceWrite(DeviceError::Other(anyhow!(
                "device accepted no frames"
            ))));
        }
        done += written.min(frames - done);
    }
    Ok(())
}
