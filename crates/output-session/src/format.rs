//! Canonical stream descriptors and device-tick math.
//!
//! The session always negotiates 32-bit IEEE float samples; the only
//! per-stream variables are channel count, sample rate, and the speaker
//! mask derived from the channel count. Device buffer durations are
//! expressed in 100-nanosecond ticks, the unit native audio APIs take.

use std::time::Duration;

/// Sample width in bits. The session only ever negotiates f32 streams.
pub const BITS_PER_SAMPLE: u16 = 32;

/// Device-side buffering target, in units of one upstream buffer: the
/// requested ring holds this many submissions' worth of audio.
pub const MAX_BUFFERED_UNITS: u64 = 16;

/// 100-nanosecond ticks per millisecond.
pub const TICKS_PER_MS: u64 = 10_000;

/// 100-nanosecond ticks per second.
pub const TICKS_PER_SEC: u64 = 10_000_000;

// Speaker position bits, matching the standard channel-mask layout.
pub const SPEAKER_FRONT_LEFT: u32 = 0x1;
pub const SPEAKER_FRONT_RIGHT: u32 = 0x2;
pub const SPEAKER_FRONT_CENTER: u32 = 0x4;
pub const SPEAKER_LOW_FREQUENCY: u32 = 0x8;
pub const SPEAKER_BACK_LEFT: u32 = 0x10;
pub const SPEAKER_BACK_RIGHT: u32 = 0x20;

/// Speaker mask for a channel count.
///
/// Counts outside {1, 2, 4, 5, 6} have no canonical layout here and get a
/// zero mask: the descriptor is passed through and the device decides.
pub fn channel_mask_for(channels: u16) -> u32 {
    match channels {
        1 => SPEAKER_FRONT_CENTER,
        2 => SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT,
        4 => SPEAKER_FRONT_LEFT | SPEAKER_FRONT_RIGHT | SPEAKER_BACK_LEFT | SPEAKER_BACK_RIGHT,
        5 => {
            SPEAKER_FRONT_LEFT
                | SPEAKER_FRONT_RIGHT
                | SPEAKER_FRONT_CENTER
                | SPEAKER_BACK_LEFT
                | SPEAKER_BACK_RIGHT
        }
        6 => {
            SPEAKER_FRONT_LEFT
                | SPEAKER_FRONT_RIGHT
                | SPEAKER_FRONT_CENTER
                | SPEAKER_LOW_FREQUENCY
                | SPEAKER_BACK_LEFT
                | SPEAKER_BACK_RIGHT
        }
        _ => 0,
    }
}

/// The negotiated device format: f32 samples at a channel count, sample
/// rate, and speaker mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub channel_mask: u32,
}

impl StreamFormat {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            channel_mask: channel_mask_for(channels),
        }
    }

    /// Whether a buffer with this channel count and rate can reuse the
    /// format as-is (the configuration fast path).
    pub fn matches(&self, channels: u16, sample_rate: u32) -> bool {
        self.channels == channels && self.sample_rate == sample_rate
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> u32 {
        u32::from(self.channels) * u32::from(BITS_PER_SAMPLE) / 8
    }

    /// Bytes per second at the negotiated rate.
    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.sample_rate * self.block_align()
    }
}

/// Requested device buffer duration in 100-ns ticks for one upstream buffer
/// of `frames` at `sample_rate`: the buffer's playback time rounded to whole
/// milliseconds, times `units`.
pub fn buffer_duration_ticks(frames: u64, sample_rate: u32, units: u64) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    let millis_per_unit = ((frames * 1000) as f64 / f64::from(sample_rate)).round() as u64;
    millis_per_unit * units * TICKS_PER_MS
}

/// Playback time of `frames` at `sample_rate`, in 100-ns ticks.
pub fn frames_to_ticks(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames * TICKS_PER_SEC / u64::from(sample_rate)
}

/// Frame count playable in `ticks` at `sample_rate`.
pub fn ticks_to_frames(ticks: u64, sample_rate: u32) -> u64 {
    ticks * u64::from(sample_rate) / TICKS_PER_SEC
}

/// Convert a tick count to a sleepable duration.
pub fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_nanos(ticks.saturating_mul(100))
}
