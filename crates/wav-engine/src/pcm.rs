//! Audio device abstraction.
//!
//! The engine only talks to hardware through these traits, mirroring the usual
//! "open / hw params / write frames / drain" lifecycle of a PCM playback device:
//! - [`AudioBackend::open_playback`] opens the default output in playback mode
//! - [`PcmDevice::hw_params_any`] allocates a parameter set scoped to one request
//! - `set_*` refine that set one field at a time, [`PcmDevice::commit`] installs it
//! - [`PcmDevice::write_interleaved`] blocks until the device accepted the frames

use crate::error::DeviceError;

/// Sample access layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    RwInterleaved,
    RwNonInterleaved,
}

/// Sample encoding understood by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmFormat {
    /// Signed 16-bit little-endian.
    S16Le,
}

impl PcmFormat {
    /// Bytes per single-channel sample.
    pub fn sample_bytes(self) -> usize {
        match self {
            PcmFormat::S16Le => 2,
        }
    }
}

/// Hardware parameter set for one request.
///
/// Starts unconstrained (every field `None`) and is refined by the device's `set_*`
/// methods. It is an owned value, so it is released on every exit path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HwParams {
    pub access: Option<Access>,
    pub format: Option<PcmFormat>,
    pub channels: Option<u16>,
    pub rate: Option<u32>,
}

impl HwParams {
    /// Bytes per interleaved frame, when format and channels are known.
    pub fn frame_bytes(&self) -> Option<usize> {
        Some(self.format?.sample_bytes() * usize::from(self.channels?))
    }
}

/// Opens playback devices.
pub trait AudioBackend: Send + Sync + 'static {
    type Device: PcmDevice;

    /// Open the default output device in playback mode.
    fn open_playback(&self) -> Result<Self::Device, DeviceError>;
}

/// An open playback device.
pub trait PcmDevice: Send + 'static {
    /// Human-readable device name.
    fn name(&self) -> String;

    /// Allocate a fresh parameter set covering everything the device supports.
    fn hw_params_any(&mut self) -> Result<HwParams, DeviceError>;

    fn set_access(&mut self, params: &mut HwParams, access: Access) -> Result<(), DeviceError>;

    fn set_format(&mut self, params: &mut HwParams, format: PcmFormat) -> Result<(), DeviceError>;

    fn set_channels(&mut self, params: &mut HwParams, channels: u16) -> Result<(), DeviceError>;

    /// Request an exact rate; devices must not substitute a nearby one.
    fn set_rate(&mut self, params: &mut HwParams, rate_hz: u32) -> Result<(), DeviceError>;

    /// Install `params` on the device. On success the device is prepared for writes.
    fn commit(&mut self, params: &HwParams) -> Result<(), DeviceError>;

    /// Write `frames` interleaved frames from `buf`, blocking until space is available.
    ///
    /// `buf` holds at least `frames` whole frames. Returns the number of frames accepted,
    /// which may be less than requested.
    fn write_interleaved(&mut self, buf: &[u8], frames: usize) -> Result<usize, DeviceError>;

    /// Make the device ready to accept writes.
    fn prepare(&mut self) -> Result<(), DeviceError>;

    /// Block until every written frame has been played.
    fn drain(&mut self) -> Result<(), DeviceError>;

    /// Discard frames written but not yet played.
    fn drop_pending(&mut self) -> Result<(), DeviceError>;

    /// Release the device. Further calls fail with [`DeviceError::Closed`].
    fn close(&mut self) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_needs_format_and_channels() {
        let mut params = HwParams::default();
        assert_eq!(params.frame_bytes(), None);
        params.format = Some(PcmFormat::S16Le);
        assert_eq!(params.frame_bytes(), None);
        params.channels = Some(2);
        assert_eq!(params.frame_bytes(), Some(4));
    }
}
