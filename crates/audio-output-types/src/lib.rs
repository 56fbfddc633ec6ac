//! Shared vocabulary types for the output session and its front-ends.
//!
//! These are plain data payloads: no device handles, no locking. The session
//! library produces them; CLIs and control planes consume them.

use serde::{Deserialize, Serialize};

/// Transport state of an output session.
///
/// Governs whether submission and device streaming are active:
/// - `Stopped`: idle; the next submitted buffer (re)configures the device.
/// - `Paused`: streaming halted, buffered audio retained, submission refused.
/// - `Playing`: streaming active, submission accepted under backpressure.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TransportState {
    #[default]
    Stopped = 0,
    Paused = 1,
    Playing = 2,
}

impl TransportState {
    /// Decode the atomic representation used by session hot loops.
    ///
    /// Unknown values map to `Stopped`.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => TransportState::Paused,
            2 => TransportState::Playing,
            _ => TransportState::Stopped,
        }
    }
}

/// Point-in-time snapshot of an output session.
///
/// Format and device fields are `None` until the session has configured a
/// device (configuration is lazy, triggered by the first submitted buffer).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct OutputStatus {
    /// Current transport state.
    pub transport: TransportState,
    /// Active output device name, if configured.
    pub device: Option<String>,
    /// Negotiated channel count.
    pub channels: Option<u16>,
    /// Negotiated sample rate (Hz).
    pub sample_rate: Option<u32>,
    /// Speaker mask passed to the device (0 when the channel count has no
    /// canonical mapping).
    pub channel_mask: Option<u32>,
    /// Device ring capacity in frames, fixed at configuration time.
    pub buffer_capacity_frames: Option<u32>,
    /// Frames currently queued in the device ring (best-effort snapshot).
    pub queued_frames: Option<u32>,
    /// Device buffer capacity expressed in seconds at the negotiated rate.
    pub latency_seconds: f64,
    /// Session-stream volume in `[0.0, 1.0]`.
    pub volume: f64,
    /// Frames consumed by the device since the stream opened.
    pub position_frames: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_state_raw_roundtrip() {
        for state in [
            TransportState::Stopped,
            TransportState::Paused,
            TransportState::Playing,
        ] {
            assert_eq!(TransportState::from_raw(state as u8), state);
        }
        assert_eq!(TransportState::from_raw(250), TransportState::Stopped);
    }

    #[test]
    fn status_defaults_to_unconfigured() {
        let status = OutputStatus::default();
        assert_eq!(status.transport, TransportState::Stopped);
        assert!(status.device.is_none());
        assert!(status.channels.is_none());
    }
}
