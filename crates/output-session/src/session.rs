//! The output session state machine.
//!
//! [`OutputSession`] owns at most one negotiated device link at a time and
//! feeds it interleaved f32 buffers under backpressure. Device acquisition is
//! lazy: the first submitted buffer configures a stream for its format, and a
//! later buffer with a different channel count or rate tears the whole link
//! down and negotiates a new one.
//!
//! ## Threading
//! The session is driven by external caller threads, conventionally one
//! feeder calling [`OutputSession::submit`] and one control thread calling
//! transport and volume operations. Structured state (format, link, volume)
//! lives under one mutex; the transport state lives in an atomic beside it so
//! the submission throttle loop and the drain loop can poll it without
//! blocking control calls. A pause or stop issued mid-wait takes effect
//! before the next write attempt, within one sleep quantum.
//!
//! Helpers suffixed `_locked` assume the session lock is already held, which
//! is how configuration re-applies volume without re-acquiring the lock.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use audio_output_types::{OutputStatus, TransportState};

use crate::backend::{AudioBackend, DeviceLink};
use crate::buffer::{BufferOwner, PcmBuffer};
use crate::format::{self, StreamFormat};

/// Tuning knobs for an output session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Device-side buffering target, in units of one upstream buffer.
    pub max_buffered_units: u64,
    /// Polling quantum for [`OutputSession::drain`].
    pub drain_quantum: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_buffered_units: format::MAX_BUFFERED_UNITS,
            drain_quantum: Duration::from_millis(50),
        }
    }
}

/// A single output stream: device session, transport state, and per-stream
/// volume.
///
/// Dropping the session releases every device handle. All methods take
/// `&self` and are safe to call from multiple threads.
pub struct OutputSession {
    backend: Box<dyn AudioBackend>,
    config: SessionConfig,
    transport: AtomicU8,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    format: Option<StreamFormat>,
    link: Option<DeviceLink>,
    capacity_frames: u32,
    latency_seconds: f64,
    volume: f64,
}

impl OutputSession {
    pub fn new(backend: Box<dyn AudioBackend>) -> Self {
        Self::with_config(backend, SessionConfig::default())
    }

    pub fn with_config(backend: Box<dyn AudioBackend>, config: SessionConfig) -> Self {
        Self {
            backend,
            config,
            transport: AtomicU8::new(TransportState::Stopped as u8),
            inner: Mutex::new(SessionInner {
                format: None,
                link: None,
                capacity_frames: 0,
                latency_seconds: 0.0,
                volume: 1.0,
            }),
        }
    }

    /// Current transport state (lock-free snapshot).
    pub fn transport_state(&self) -> TransportState {
        TransportState::from_raw(self.transport.load(Ordering::Acquire))
    }

    fn set_transport(&self, state: TransportState) {
        self.transport.store(state as u8, Ordering::Release);
    }

    /// Enter `Playing` and start the device stream if one is configured.
    /// Idempotent.
    pub fn resume(&self) {
        self.set_transport(TransportState::Playing);

        let inner = self.inner.lock().unwrap();
        if let Some(link) = &inner.link {
            if let Err(e) = link.client.start() {
                tracing::warn!(error = %e, "resume: stream start failed");
            }
        }
    }

    /// Enter `Paused` and halt the device stream, retaining queued audio.
    /// Idempotent.
    pub fn pause(&self) {
        self.set_transport(TransportState::Paused);

        let inner = self.inner.lock().unwrap();
        if let Some(link) = &inner.link {
            if let Err(e) = link.client.stop() {
                tracing::warn!(error = %e, "pause: stream stop failed");
            }
        }
    }

    /// Enter `Stopped`, flush queued audio, and leave the stream armed at
    /// position zero. This is "flush and idle"; releasing the device is
    /// [`OutputSession::reset`].
    pub fn stop(&self) {
        self.set_transport(TransportState::Stopped);

        let inner = self.inner.lock().unwrap();
        if let Some(link) = &inner.link {
            if let Err(e) = link
                .client
                .stop()
                .and_then(|_| link.client.reset())
                .and_then(|_| link.client.start())
            {
                tracing::warn!(error = %e, "stop: stream flush failed");
            }
        }
    }

    /// Store the session-stream volume and apply it to the configured device,
    /// if any. Values are expected in `[0.0, 1.0]`.
    ///
    /// The device master volume is pinned to unity and unmuted; attenuation
    /// happens only on this stream's channels, so other applications sharing
    /// the device are unaffected.
    pub fn set_volume(&self, volume: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.volume = volume;
        Self::apply_volume_locked(&inner);
    }

    /// Last stored volume. Authoritative even before a device is configured.
    pub fn volume(&self) -> f64 {
        self.inner.lock().unwrap().volume
    }

    /// Device buffer capacity in seconds at the negotiated rate.
    ///
    /// Keeps its last derived value across a teardown so drain timing stays
    /// sane for callers racing a stop.
    pub fn latency_seconds(&self) -> f64 {
        self.inner.lock().unwrap().latency_seconds
    }

    /// Deliver one buffer to the device, blocking until the ring has room.
    ///
    /// Returns `true` iff the buffer was fully handed to the device ring, in
    /// which case `owner` was notified exactly once. Returns `false` without
    /// side effects while paused; returns `false` without notifying when a
    /// concurrent pause/stop interrupts the wait or the device declines the
    /// write — the caller keeps the buffer either way.
    ///
    /// Configuration failures tear the session down to its empty state; the
    /// caller may retry on its own cadence.
    pub fn submit(&self, buffer: &dyn PcmBuffer, owner: &dyn BufferOwner) -> bool {
        // Snapshot the link under the lock, then throttle without it so
        // control calls stay responsive during the wait.
        let link = {
            let mut inner = self.inner.lock().unwrap();

            if self.transport_state() == TransportState::Paused {
                return false;
            }

            if !self.configure_locked(&mut inner, buffer) {
                self.teardown_locked(&mut inner);
                return false;
            }

            match &inner.link {
                Some(link) => link.clone(),
                None => return false,
            }
        };

        let frames = buffer.frames();
        let sample_rate = buffer.sample_rate();
        let capacity = link.client.capacity_frames();

        let mut available = capacity.saturating_sub(link.client.queued_frames());
        while self.transport_state() == TransportState::Playing && available < frames {
            let deficit = u64::from(frames - available);
            std::thread::sleep(format::ticks_to_duration(format::frames_to_ticks(
                deficit,
                sample_rate,
            )));
            available = capacity.saturating_sub(link.client.queued_frames());
        }

        let mut written = false;
        if self.transport_state() == TransportState::Playing && available >= frames {
            written = link.sink.write(frames, buffer.samples());
        }
        drop(link);

        if written {
            owner.on_buffer_processed(buffer);
        }
        written
    }

    /// Block until playback empties or a latency-derived budget elapses.
    ///
    /// Heuristic: there is no portable "device queue empty" signal, so this
    /// sleeps in fixed quanta while the transport is not `Stopped`,
    /// decrementing the budget only while `Playing`. Time spent paused does
    /// not count down — draining a paused stream waits until it is resumed
    /// and emptied, or stopped.
    pub fn drain(&self) {
        let quantum = self.config.drain_quantum;
        let quantum_ms = (quantum.as_millis() as i64).max(1);
        let mut budget_ms = {
            let inner = self.inner.lock().unwrap();
            (inner.latency_seconds * 1000.0).round() as i64
        };

        while self.transport_state() != TransportState::Stopped && budget_ms > 0 {
            std::thread::sleep(quantum);
            if self.transport_state() == TransportState::Playing {
                budget_ms -= quantum_ms;
            }
        }
    }

    /// Full teardown: release every device handle, clear the format, and
    /// return to the initial empty state. The next submission re-acquires
    /// from scratch.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.teardown_locked(&mut inner);
    }

    /// Point-in-time snapshot for status reporting.
    pub fn status(&self) -> OutputStatus {
        let inner = self.inner.lock().unwrap();
        OutputStatus {
            transport: self.transport_state(),
            device: inner.link.as_ref().map(|l| l.device_name.clone()),
            channels: inner.format.map(|f| f.channels),
            sample_rate: inner.format.map(|f| f.sample_rate),
            channel_mask: inner.format.map(|f| f.channel_mask),
            buffer_capacity_frames: inner.link.as_ref().map(|_| inner.capacity_frames),
            queued_frames: inner.link.as_ref().map(|l| l.client.queued_frames()),
            latency_seconds: inner.latency_seconds,
            volume: inner.volume,
            position_frames: inner.link.as_ref().map(|l| l.clock.position_frames()),
        }
    }

    /// Ensure a device session exists for `buffer`'s format.
    ///
    /// Fast path: an existing link whose format matches exactly is reused
    /// as-is — this is hit on every steady-state buffer. Anything else is a
    /// full negotiation: the old link (if any) is torn down first, and the
    /// new handle set is installed only once the stream is started.
    fn configure_locked(&self, inner: &mut SessionInner, buffer: &dyn PcmBuffer) -> bool {
        let channels = buffer.channels();
        let sample_rate = buffer.sample_rate();

        if inner.link.is_some() {
            if let Some(fmt) = &inner.format {
                if fmt.matches(channels, sample_rate) {
                    return true;
                }
            }
            // format change: the whole handle set is rebuilt, never patched
            self.teardown_locked(inner);
        }

        let fmt = StreamFormat::new(channels, sample_rate);
        if fmt.channel_mask == 0 {
            tracing::debug!(channels, "no speaker mask for channel count; passing zero mask");
        }

        let endpoint = match self.backend.default_endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!(error = %e, "endpoint acquisition failed");
                return false;
            }
        };

        let native = endpoint.supports_native(&fmt);
        if !native {
            tracing::warn!(
                channels,
                sample_rate,
                "format not natively supported; requesting automatic conversion"
            );
        }

        let duration_ticks = format::buffer_duration_ticks(
            u64::from(buffer.frames()),
            sample_rate,
            self.config.max_buffered_units,
        );

        let link = match endpoint.open_stream(&fmt, !native, duration_ticks) {
            Ok(link) => link,
            Err(e) => {
                tracing::error!(error = %e, "stream negotiation failed");
                return false;
            }
        };

        let capacity = link.client.capacity_frames();
        inner.capacity_frames = capacity;
        inner.latency_seconds = if sample_rate > 0 {
            f64::from(capacity) / f64::from(sample_rate)
        } else {
            0.0
        };

        if let Err(e) = link.client.start() {
            tracing::error!(error = %e, "stream start failed");
            return false;
        }

        tracing::info!(
            device = %link.device_name,
            channels,
            sample_rate,
            capacity_frames = capacity,
            native,
            "output stream configured"
        );

        inner.format = Some(fmt);
        inner.link = Some(link);
        self.set_transport(TransportState::Playing);
        Self::apply_volume_locked(inner);

        true
    }

    /// Pin master volume to unity/unmuted and set every device channel to
    /// the stored stream volume. No-op without a configured link.
    fn apply_volume_locked(inner: &SessionInner) {
        let Some(link) = &inner.link else {
            return;
        };

        link.master_volume.set_volume(1.0);
        link.master_volume.set_muted(false);

        let channels = link.stream_volume.channel_count();
        for channel in 0..channels {
            link.stream_volume
                .set_channel_volume(channel, inner.volume as f32);
        }
    }

    /// Release the link and clear the format, entering `Stopped`.
    ///
    /// An in-flight submission holding a clone of the link keeps the handle
    /// set alive until it observes the transport change and returns.
    fn teardown_locked(&self, inner: &mut SessionInner) {
        self.set_transport(TransportState::Stopped);

        if let Some(link) = inner.link.take() {
            if let Err(e) = link.client.stop() {
                tracing::warn!(error = %e, "teardown: stream stop failed");
            }
        }
        inner.format = None;
        inner.capacity_frames = 0;
        // latency_seconds keeps its last value: callers draining right after
        // a teardown still get a usable budget
    }
}

impl Drop for OutputSession {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use crate::backend::{
        AudioBackend, DeviceLink, MasterVolume, PlaybackClock, RenderEndpoint, RenderSink,
        StreamClient, StreamVolume,
    };
    use crate::buffer::VecBuffer;
    use crate::error::OutputError;

    /// One fake device implementing the whole handle set, with observable
    /// call counts and a queued-frame counter that "plays" a fixed slice of
    /// audio between polls.
    struct FakeDevice {
        channels: u16,
        capacity: u32,
        queued: AtomicU32,
        drain_per_poll: u32,
        starts: AtomicUsize,
        stops: AtomicUsize,
        resets: AtomicUsize,
        polls: AtomicUsize,
        decline_writes: AtomicBool,
        written: Mutex<Vec<f32>>,
        master_volume: AtomicU32,
        master_muted: AtomicBool,
        channel_volumes: Mutex<Vec<f32>>,
        position: AtomicU64,
    }

    impl FakeDevice {
        fn new(channels: u16, capacity: u32, queued: u32, drain_per_poll: u32) -> Arc<Self> {
            Arc::new(Self {
                channels,
                capacity,
                queued: AtomicU32::new(queued),
                drain_per_poll,
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
                decline_writes: AtomicBool::new(false),
                written: Mutex::new(Vec::new()),
                master_volume: AtomicU32::new(0.0f32.to_bits()),
                master_muted: AtomicBool::new(true),
                channel_volumes: Mutex::new(vec![-1.0; channels as usize]),
                position: AtomicU64::new(0),
            })
        }

        fn link(self: Arc<Self>, name: &str) -> DeviceLink {
            DeviceLink {
                device_name: name.to_string(),
                client: self.clone(),
                sink: self.clone(),
                stream_volume: self.clone(),
                master_volume: self.clone(),
                clock: self,
            }
        }

        fn written_samples(&self) -> Vec<f32> {
            self.written.lock().unwrap().clone()
        }
    }

    impl StreamClient for FakeDevice {
        fn start(&self) -> Result<(), OutputError> {
            self.starts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn stop(&self) -> Result<(), OutputError> {
            self.stops.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn reset(&self) -> Result<(), OutputError> {
            self.resets.fetch_add(1, Ordering::Relaxed);
            self.queued.store(0, Ordering::Relaxed);
            Ok(())
        }

        fn capacity_frames(&self) -> u32 {
            self.capacity
        }

        fn queued_frames(&self) -> u32 {
            self.polls.fetch_add(1, Ordering::Relaxed);
            let current = self.queued.load(Ordering::Relaxed);
            let drained = current.min(self.drain_per_poll);
            if drained > 0 {
                self.queued.fetch_sub(drained, Ordering::Relaxed);
            }
            current
        }
    }

    impl RenderSink for FakeDevice {
        fn write(&self, frames: u32, samples: &[f32]) -> bool {
            if self.decline_writes.load(Ordering::Relaxed) {
                return false;
            }
            if self.queued.load(Ordering::Relaxed) + frames > self.capacity {
                return false;
            }
            self.written.lock().unwrap().extend_from_slice(samples);
            self.queued.fetch_add(frames, Ordering::Relaxed);
            true
        }
    }

    impl StreamVolume for FakeDevice {
        fn channel_count(&self) -> u32 {
            u32::from(self.channels)
        }

        fn set_channel_volume(&self, channel: u32, volume: f32) {
            if let Some(slot) = self
                .channel_volumes
                .lock()
                .unwrap()
                .get_mut(channel as usize)
            {
                *slot = volume;
            }
        }
    }

    impl MasterVolume for FakeDevice {
        fn set_volume(&self, volume: f32) {
            self.master_volume.store(volume.to_bits(), Ordering::Relaxed);
        }

        fn set_muted(&self, muted: bool) {
            self.master_muted.store(muted, Ordering::Relaxed);
        }
    }

    impl PlaybackClock for FakeDevice {
        fn position_frames(&self) -> u64 {
            self.position.load(Ordering::Relaxed)
        }
    }

    struct FakeBackend {
        capacity: u32,
        initial_queued: u32,
        drain_per_poll: u32,
        opens: AtomicUsize,
        fail_endpoint: AtomicBool,
        fail_open: AtomicBool,
        devices: Mutex<Vec<Arc<FakeDevice>>>,
    }

    impl FakeBackend {
        fn new(capacity: u32, initial_queued: u32, drain_per_poll: u32) -> Arc<Self> {
            Arc::new(Self {
                capacity,
                initial_queued,
                drain_per_poll,
                opens: AtomicUsize::new(0),
                fail_endpoint: AtomicBool::new(false),
                fail_open: AtomicBool::new(false),
                devices: Mutex::new(Vec::new()),
            })
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::Relaxed)
        }

        fn device(&self, index: usize) -> Arc<FakeDevice> {
            self.devices.lock().unwrap()[index].clone()
        }
    }

    impl AudioBackend for Arc<FakeBackend> {
        fn default_endpoint(&self) -> Result<Box<dyn RenderEndpoint>, OutputError> {
            if self.fail_endpoint.load(Ordering::Relaxed) {
                return Err(OutputError::DeviceUnavailable(
                    "fake enumerator down".to_string(),
                ));
            }
            Ok(Box::new(FakeEndpoint {
                backend: self.clone(),
            }))
        }
    }

    struct FakeEndpoint {
        backend: Arc<FakeBackend>,
    }

    impl RenderEndpoint for FakeEndpoint {
        fn name(&self) -> String {
            "fake output".to_string()
        }

        fn supports_native(&self, _format: &StreamFormat) -> bool {
            true
        }

        fn open_stream(
            self: Box<Self>,
            format: &StreamFormat,
            _auto_convert: bool,
            _duration_ticks: u64,
        ) -> Result<DeviceLink, OutputError> {
            self.backend.opens.fetch_add(1, Ordering::Relaxed);
            if self.backend.fail_open.load(Ordering::Relaxed) {
                return Err(OutputError::FormatRejected(
                    "fake format rejection".to_string(),
                ));
            }
            let device = FakeDevice::new(
                format.channels,
                self.backend.capacity,
                self.backend.initial_queued,
                self.backend.drain_per_poll,
            );
            self.backend.devices.lock().unwrap().push(device.clone());
            Ok(device.link("fake output"))
        }
    }

    #[derive(Default)]
    struct CountingOwner {
        processed: AtomicUsize,
    }

    impl CountingOwner {
        fn count(&self) -> usize {
            self.processed.load(Ordering::Relaxed)
        }
    }

    impl BufferOwner for CountingOwner {
        fn on_buffer_processed(&self, _buffer: &dyn PcmBuffer) {
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn stereo_buffer(frames: u32) -> VecBuffer {
        VecBuffer::new(vec![0.25; frames as usize * 2], 2, 48_000)
    }

    fn session_with(backend: &Arc<FakeBackend>) -> OutputSession {
        OutputSession::new(Box::new(backend.clone()))
    }

    #[test]
    fn submit_lazily_configures_and_plays() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        assert_eq!(session.transport_state(), TransportState::Stopped);
        assert!(session.submit(&stereo_buffer(480), &owner));

        assert_eq!(backend.opens(), 1);
        assert_eq!(owner.count(), 1);
        assert_eq!(session.transport_state(), TransportState::Playing);
        assert!((session.latency_seconds() - 0.1).abs() < 1e-9);

        let device = backend.device(0);
        assert_eq!(device.starts.load(Ordering::Relaxed), 1);
        assert_eq!(device.written_samples().len(), 960);

        let status = session.status();
        assert_eq!(status.device.as_deref(), Some("fake output"));
        assert_eq!(status.channels, Some(2));
        assert_eq!(status.sample_rate, Some(48_000));
        assert_eq!(status.buffer_capacity_frames, Some(4_800));
    }

    #[test]
    fn same_format_reuses_configuration() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        assert!(session.submit(&stereo_buffer(480), &owner));
        assert!(session.submit(&stereo_buffer(480), &owner));

        assert_eq!(backend.opens(), 1);
        assert_eq!(owner.count(), 2);
    }

    #[test]
    fn format_change_rebuilds_the_link() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        assert!(session.submit(&stereo_buffer(480), &owner));
        let first = backend.device(0);
        let first_written = first.written_samples().len();

        let mono = VecBuffer::new(vec![0.5; 480], 1, 48_000);
        assert!(session.submit(&mono, &owner));

        assert_eq!(backend.opens(), 2);
        // the old link was stopped on teardown and received no new audio
        assert!(first.stops.load(Ordering::Relaxed) >= 1);
        assert_eq!(first.written_samples().len(), first_written);

        let second = backend.device(1);
        assert_eq!(second.written_samples().len(), 480);
        assert_eq!(session.status().channels, Some(1));
    }

    #[test]
    fn submit_waits_for_device_headroom() {
        // ring starts full; the fake device releases 16 frames per poll
        let backend = FakeBackend::new(64, 64, 16);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        let buffer = stereo_buffer(32);
        assert!(session.submit(&buffer, &owner));

        let device = backend.device(0);
        // polls observed 64, 48, 32 queued frames before headroom sufficed
        assert!(device.polls.load(Ordering::Relaxed) >= 3);
        assert_eq!(device.written_samples(), buffer.samples().to_vec());
        assert_eq!(owner.count(), 1);
    }

    #[test]
    fn paused_session_refuses_buffers() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        assert!(session.submit(&stereo_buffer(480), &owner));
        session.pause();

        assert!(!session.submit(&stereo_buffer(480), &owner));
        assert_eq!(owner.count(), 1);
        assert_eq!(backend.device(0).written_samples().len(), 960);

        session.resume();
        assert!(session.submit(&stereo_buffer(480), &owner));
        assert_eq!(owner.count(), 2);
    }

    #[test]
    fn resume_and_pause_are_idempotent() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = session_with(&backend);
        let owner = CountingOwner::default();
        assert!(session.submit(&stereo_buffer(480), &owner));

        session.pause();
        let after_first = session.status();
        session.pause();
        assert_eq!(session.status(), after_first);
        assert_eq!(session.transport_state(), TransportState::Paused);

        session.resume();
        let after_first = session.status();
        session.resume();
        assert_eq!(session.status(), after_first);
        assert_eq!(session.transport_state(), TransportState::Playing);
    }

    #[test]
    fn volume_is_stored_before_configuration_and_applied_on_it() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        session.set_volume(0.4);
        assert_eq!(session.volume(), 0.4);

        assert!(session.submit(&stereo_buffer(480), &owner));

        let device = backend.device(0);
        assert_eq!(
            f32::from_bits(device.master_volume.load(Ordering::Relaxed)),
            1.0
        );
        assert!(!device.master_muted.load(Ordering::Relaxed));
        assert_eq!(*device.channel_volumes.lock().unwrap(), vec![0.4, 0.4]);

        session.set_volume(0.8);
        assert_eq!(session.volume(), 0.8);
        assert_eq!(*device.channel_volumes.lock().unwrap(), vec![0.8, 0.8]);
        assert_eq!(
            f32::from_bits(device.master_volume.load(Ordering::Relaxed)),
            1.0
        );
    }

    #[test]
    fn stop_flushes_and_rearms_without_teardown() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        assert!(session.submit(&stereo_buffer(480), &owner));
        session.stop();

        let device = backend.device(0);
        assert_eq!(device.resets.load(Ordering::Relaxed), 1);
        assert!(device.starts.load(Ordering::Relaxed) >= 2);
        assert_eq!(session.transport_state(), TransportState::Stopped);
        // the link survives a stop; the next submit reuses it
        assert!(session.status().device.is_some());

        // a stopped transport refuses delivery (without notifying) until resumed
        assert!(!session.submit(&stereo_buffer(480), &owner));
        assert_eq!(owner.count(), 1);

        session.resume();
        assert!(session.submit(&stereo_buffer(480), &owner));
        assert_eq!(backend.opens(), 1);
        assert_eq!(owner.count(), 2);
        assert_eq!(session.transport_state(), TransportState::Playing);
    }

    #[test]
    fn reset_returns_session_to_empty() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        assert!(session.submit(&stereo_buffer(480), &owner));
        session.reset();

        let status = session.status();
        assert_eq!(status.transport, TransportState::Stopped);
        assert!(status.device.is_none());
        assert!(status.channels.is_none());

        // re-acquisition happens from scratch
        assert!(session.submit(&stereo_buffer(480), &owner));
        assert_eq!(backend.opens(), 2);
    }

    #[test]
    fn configure_failure_tears_down_and_reports_false() {
        let backend = FakeBackend::new(4_800, 0, 0);
        backend.fail_open.store(true, Ordering::Relaxed);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        assert!(!session.submit(&stereo_buffer(480), &owner));
        assert_eq!(owner.count(), 0);
        assert_eq!(backend.opens(), 1);

        let status = session.status();
        assert_eq!(status.transport, TransportState::Stopped);
        assert!(status.device.is_none());
    }

    #[test]
    fn endpoint_failure_reports_false() {
        let backend = FakeBackend::new(4_800, 0, 0);
        backend.fail_endpoint.store(true, Ordering::Relaxed);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        assert!(!session.submit(&stereo_buffer(480), &owner));
        assert_eq!(owner.count(), 0);
        assert_eq!(backend.opens(), 0);
    }

    #[test]
    fn sink_decline_returns_false_without_notifying() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = session_with(&backend);
        let owner = CountingOwner::default();

        assert!(session.submit(&stereo_buffer(480), &owner));
        backend.device(0).decline_writes.store(true, Ordering::Relaxed);

        assert!(!session.submit(&stereo_buffer(480), &owner));
        assert_eq!(owner.count(), 1);
    }

    #[test]
    fn drain_returns_within_latency_budget_while_playing() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = OutputSession::with_config(
            Box::new(backend.clone()),
            SessionConfig {
                drain_quantum: Duration::from_millis(10),
                ..SessionConfig::default()
            },
        );
        let owner = CountingOwner::default();
        assert!(session.submit(&stereo_buffer(480), &owner));

        // latency is 0.1 s; the budget should expire in roughly that time
        let start = Instant::now();
        session.drain();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(90), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "budget did not expire: {elapsed:?}");
        assert_eq!(session.transport_state(), TransportState::Playing);
    }

    #[test]
    fn drain_waits_while_paused_until_stopped() {
        let backend = FakeBackend::new(4_800, 0, 0);
        let session = Arc::new(OutputSession::with_config(
            Box::new(backend.clone()),
            SessionConfig {
                drain_quantum: Duration::from_millis(10),
                ..SessionConfig::default()
            },
        ));
        let owner = CountingOwner::default();
        assert!(session.submit(&stereo_buffer(480), &owner));
        session.pause();

        let (tx, rx) = std::sync::mpsc::channel();
        let drainer = session.clone();
        let handle = std::thread::spawn(move || {
            drainer.drain();
            let _ = tx.send(());
        });

        // paused time never counts down the budget
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

        session.stop();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn concurrent_teardown_never_strands_a_submission() {
        // ring permanently full: the submission sits in its wait loop, with
        // long deficit sleeps, until the teardown interrupts it
        let backend = FakeBackend::new(4_000, 4_000, 0);
        let session = Arc::new(session_with(&backend));
        let owner = Arc::new(CountingOwner::default());

        let (tx, rx) = std::sync::mpsc::channel();
        let submitter = session.clone();
        let owner_for_thread = owner.clone();
        let handle = std::thread::spawn(move || {
            let buffer = VecBuffer::new(vec![0.1; 4_000], 2, 8_000);
            let delivered = submitter.submit(&buffer, &*owner_for_thread);
            let _ = tx.send(delivered);
        });

        // let the submission configure and enter its wait loop
        std::thread::sleep(Duration::from_millis(100));
        let device = backend.device(0);
        // the in-flight submission holds its own clone of the full handle set
        assert!(Arc::strong_count(&device) >= 7);

        session.reset();

        let delivered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!delivered);
        assert_eq!(owner.count(), 0);
        handle.join().unwrap();

        // only the test and the backend's registry still hold the device
        assert_eq!(Arc::strong_count(&device), 2);
        assert!(device.written_samples().is_empty());
    }
}
