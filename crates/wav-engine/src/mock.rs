//! Recording audio backend for tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;

use crate::error::DeviceError;
use crate::pcm::{Access, AudioBackend, HwParams, PcmDevice, PcmFormat};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    HwParamsAny,
    SetAccess(Access),
    SetFormat(PcmFormat),
    SetChannels(u16),
    SetRate(u32),
    Commit,
    Write { frames: usize },
    Prepare,
    Drain,
    DropPending,
    Close,
}

/// Knobs and recordings shared between a test and the mock device.
#[derive(Debug, Default)]
pub struct MockState {
    pub calls: Vec<Call>,
    pub opens: usize,
    pub written: Vec<u8>,
    pub committed: Option<HwParams>,
    pub fail_open: bool,
    pub reject_access: bool,
    pub reject_rate: bool,
    /// Commit attempts that fail with `Busy` before succeeding.
    pub busy_commits: u32,
    pub reject_commit: bool,
    /// Fail the n-th write (1-based).
    pub fail_write_at: Option<usize>,
    /// Accept at most this many frames per write call.
    pub max_frames_per_write: Option<usize>,
    pub write_delay: Option<Duration>,
    pub writes: usize,
    /// Set between `hw_params_any` and the following `drain`/`drop_pending`.
    pub in_window: bool,
    pub overlapping_windows: usize,
    pub closed: bool,
}

impl MockState {
    pub fn writes_frames(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Write { frames } => Some(*frames),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

#[derive(Clone, Default)]
pub struct MockBackend {
    pub state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl AudioBackend for MockBackend {
    type Device = MockPcm;

    fn open_playback(&self) -> Result<MockPcm, DeviceError> {
        let mut st = self.state();
        st.opens += 1;
        if st.fail_open {
            return Err(DeviceError::Other(anyhow!("no such device")));
        }
        Ok(MockPcm {
            state: self.state.clone(),
        })
    }
}

pub struct MockPcm {
    state: Arc<Mutex<MockState>>,
}

impl MockPcm {
    fn record(&self, call: Call) -> MutexGuard<'_, MockState> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(call);
        st
    }
}

impl PcmDevice for MockPcm {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn hw_params_any(&mut self) -> Result<HwParams, DeviceError> {
        let mut st = self.record(Call::HwParamsAny);
        if st.closed {
            return Err(DeviceError::Closed);
        }
        if st.in_window {
            st.overlapping_windows += 1;
        }
        st.in_window = true;
        Ok(HwParams::default())
    }

    fn set_access(&mut self, params: &mut HwParams, access: Access) -> Result<(), DeviceError> {
        let st = self.record(Call::SetAccess(access));
        if st.reject_access {
            return Err(DeviceError::Unsupported("access".to_string()));
        }
        params.access = Some(access);
        Ok(())
    }

    fn set_format(&mut self, params: &mut HwParams, format: PcmFormat) -> Result<(), DeviceError> {
        let _st = self.record(Call::SetFormat(format));
        params.format = Some(format);
        Ok(())
    }

    fn set_channels(&mut self, params: &mut HwParams, channels: u16) -> Result<(), DeviceError> {
        let _st = self.record(Call::SetChannels(channels));
        params.channels = Some(channels);
        Ok(())
    }

    fn set_rate(&mut self, params: &mut HwParams, rate_hz: u32) -> Result<(), DeviceError> {
        let st = self.record(Call::SetRate(rate_hz));
        if st.reject_rate {
            return Err(DeviceError::Unsupported(format!("{rate_hz} Hz")));
        }
        params.rate = Some(rate_hz);
        Ok(())
    }

    fn commit(&mut self, params: &HwParams) -> Result<(), DeviceError> {
        let mut st = self.record(Call::Commit);
        if st.busy_commits > 0 {
            st.busy_commits -= 1;
            return Err(DeviceError::Busy);
        }
        if st.reject_commit {
            return Err(DeviceError::Rejected("mock rejects everything".to_string()));
        }
        st.committed = Some(params.clone());
        Ok(())
    }

    fn write_interleaved(&mut self, buf: &[u8], frames: usize) -> Result<usize, DeviceError> {
        let delay = {
            let mut st = self.state.lock().unwrap();
            st.writes += 1;
            if st.fail_write_at == Some(st.writes) {
                st.calls.push(Call::Write { frames: 0 });
                return Err(DeviceError::Other(anyhow!("underrun")));
            }
            st.write_delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut st = self.state.lock().unwrap();
        let frame_bytes = st
            .committed
            .as_ref()
            .and_then(HwParams::frame_bytes)
            .ok_or_else(|| DeviceError::Rejected("not committed".to_string()))?;
        let accepted = st.max_frames_per_write.map_or(frames, |max| frames.min(max));
        st.calls.push(Call::Write { frames: accepted });
        st.written.extend_from_slice(&buf[..accepted * frame_bytes]);
        Ok(accepted)
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        let _st = self.record(Call::Prepare);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), DeviceError> {
        let mut st = self.record(Call::Drain);
        st.in_window = false;
        Ok(())
    }

    fn drop_pending(&mut self) -> Result<(), DeviceError> {
        let mut st = self.record(Call::DropPending);
        st.in_window = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let mut st = self.record(Call::Close);
        st.closed = true;
        Ok(())
    }
}
