//! Throttled PCM output sessions over a pluggable platform backend.
//!
//! This crate delivers decoded f32 sample buffers to an audio device for
//! real-time playback. The center is [`OutputSession`]:
//!
//! 1. **Lazy configuration** — the first submitted buffer acquires the
//!    default render endpoint and negotiates a stream for its channel count
//!    and sample rate; a later format change rebuilds the whole handle set.
//! 2. **Throttled submission** — a feeder thread calls
//!    [`OutputSession::submit`], which polls device headroom and sleeps in
//!    playback-time-sized steps until the buffer fits, re-checking transport
//!    state each iteration.
//! 3. **Transport + volume** — pause/resume/stop/drain and a per-stream
//!    volume that never touches the shared device master control.
//!
//! The platform seam is the trait set in [`backend`]; [`cpal_backend`]
//! provides the real implementation and tests substitute mocks. Buffer
//! producers implement the collaborator traits in [`buffer`].

pub mod backend;
pub mod buffer;
pub mod cpal_backend;
pub mod error;
pub mod format;
pub mod ring;
pub mod session;

pub use audio_output_types::{OutputStatus, TransportState};
pub use backend::{
    AudioBackend, DeviceLink, MasterVolume, PlaybackClock, RenderEndpoint, RenderSink,
    StreamClient, StreamVolume,
};
pub use buffer::{BufferOwner, PcmBuffer, VecBuffer};
pub use cpal_backend::CpalBackend;
pub use error::OutputError;
pub use format::StreamFormat;
pub use session::{OutputSession, SessionConfig};
