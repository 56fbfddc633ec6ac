//! The platform seam for the output session.
//!
//! An [`AudioBackend`] acquires render endpoints; opening a stream on an
//! endpoint negotiates one format and yields a [`DeviceLink`] — the complete
//! handle set for that device session. The session core only talks to these
//! traits; the cpal implementation lives in [`crate::cpal_backend`] and tests
//! substitute mocks.

use std::sync::Arc;

use crate::error::OutputError;
use crate::format::StreamFormat;

/// Entry point: acquires the default render endpoint of a platform audio
/// subsystem.
pub trait AudioBackend: Send + Sync {
    fn default_endpoint(&self) -> Result<Box<dyn RenderEndpoint>, OutputError>;
}

/// An audio render endpoint (a physical or virtual output device) before a
/// stream has been negotiated on it.
pub trait RenderEndpoint: Send {
    /// Human-readable endpoint name for logs and status.
    fn name(&self) -> String;

    /// Whether the endpoint accepts `format` natively, without conversion.
    fn supports_native(&self, format: &StreamFormat) -> bool;

    /// Negotiate and open a stream bound to `format`.
    ///
    /// `auto_convert` asks the platform to convert internally when the format
    /// is not native. `duration_ticks` is the requested ring size in 100-ns
    /// ticks; the actual allocation is read back from the returned client.
    /// Consumes the endpoint: the device handle moves into the link.
    fn open_stream(
        self: Box<Self>,
        format: &StreamFormat,
        auto_convert: bool,
        duration_ticks: u64,
    ) -> Result<DeviceLink, OutputError>;
}

/// The negotiated, format-bound connection to a device.
pub trait StreamClient: Send + Sync {
    /// Begin (or continue) consuming queued audio.
    fn start(&self) -> Result<(), OutputError>;

    /// Halt consumption, retaining queued audio.
    fn stop(&self) -> Result<(), OutputError>;

    /// Flush queued audio, returning the stream to position zero.
    fn reset(&self) -> Result<(), OutputError>;

    /// Actual allocated ring capacity in frames.
    fn capacity_frames(&self) -> u32;

    /// Frames currently queued (written but not yet consumed).
    fn queued_frames(&self) -> u32;
}

/// Write interface into the device ring.
pub trait RenderSink: Send + Sync {
    /// Acquire space for exactly `frames` frames, copy `samples` verbatim,
    /// and commit. Declines (returns `false`) when the ring lacks headroom
    /// or the slice does not hold exactly `frames` whole frames.
    fn write(&self, frames: u32, samples: &[f32]) -> bool;
}

/// Per-stream volume control, independent of the device master volume.
pub trait StreamVolume: Send + Sync {
    /// Channel count as reported by the device (not the last buffer).
    fn channel_count(&self) -> u32;

    fn set_channel_volume(&self, channel: u32, volume: f32);
}

/// Shared device master volume. The session pins this to unity and never
/// attenuates through it.
pub trait MasterVolume: Send + Sync {
    fn set_volume(&self, volume: f32);
    fn set_muted(&self, muted: bool);
}

/// Playback position reporting for the negotiated stream.
pub trait PlaybackClock: Send + Sync {
    /// Total frames the device has consumed since the stream opened.
    fn position_frames(&self) -> u64;
}

/// The complete handle set for one device session.
///
/// All handles are acquired together during negotiation and only ever
/// replaced as a unit: a reconfiguration drops the whole link and builds a
/// new one. Cloning the link takes a temporary reference to every handle, so
/// a submission can keep using a snapshot of the set while a concurrent
/// teardown swaps the session's primary link.
#[derive(Clone)]
pub struct DeviceLink {
    pub device_name: String,
    pub client: Arc<dyn StreamClient>,
    pub sink: Arc<dyn RenderSink>,
    pub stream_volume: Arc<dyn StreamVolume>,
    pub master_volume: Arc<dyn MasterVolume>,
    pub clock: Arc<dyn PlaybackClock>,
}
