//! Session-fatal error taxonomy.
//!
//! Every variant is fatal to the configure/submit call that produced it: the
//! session tears down to its unconfigured state and the public API reports a
//! boolean failure. Platform error detail travels on the tracing side channel
//! only, never across the session boundary. Insufficient device headroom is
//! *not* an error; the submission throttle loop absorbs it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    /// Endpoint enumeration or activation failed.
    #[error("output device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device declined the requested stream format, even with automatic
    /// conversion requested.
    #[error("stream format rejected: {0}")]
    FormatRejected(String),

    /// A post-initialization service (render sink, volume control, playback
    /// clock) could not be acquired.
    #[error("device service acquisition failed: {0}")]
    ServiceAcquisitionFailed(String),
}
