//! cpal implementation of the backend seam.
//!
//! ## Stream host thread
//! cpal streams are not `Send`, so each negotiated stream lives on a
//! dedicated host thread that owns the `cpal::Device` and `cpal::Stream`.
//! Transport commands travel over a crossbeam channel; the build outcome
//! comes back over a bounded reply channel so negotiation failures surface
//! from `open_stream`. When the last handle to the link drops, the command
//! channel disconnects and the host thread exits, releasing the device.
//!
//! ## Ring model
//! The requested buffer duration is converted to a [`FrameRing`] capacity.
//! The output callback drains the ring (zero-filling underruns), applies
//! per-channel and master gains, and advances the playback clock. Ring
//! occupancy is what the session polls as the device's queued-frame count.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::backend::{
    AudioBackend, DeviceLink, MasterVolume, PlaybackClock, RenderEndpoint, RenderSink,
    StreamClient, StreamVolume,
};
use crate::error::OutputError;
use crate::format::{self, StreamFormat};
use crate::ring::FrameRing;

/// Backend over the host's default audio API, optionally pinned to an output
/// device by case-insensitive name substring.
pub struct CpalBackend {
    host: cpal::Host,
    device_hint: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            device_hint: None,
        }
    }

    pub fn with_device(hint: impl Into<String>) -> Self {
        Self {
            host: cpal::default_host(),
            device_hint: Some(hint.into()),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn default_endpoint(&self) -> Result<Box<dyn RenderEndpoint>, OutputError> {
        let device = pick_device(&self.host, self.device_hint.as_deref())?;
        Ok(Box::new(CpalEndpoint { device }))
    }
}

/// List output device names for the default host.
pub fn list_devices() -> Result<Vec<String>, OutputError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| OutputError::DeviceUnavailable(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Pick the first output device whose name contains `needle`
/// (case-insensitive), or the host default when no hint is given.
fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, OutputError> {
    if let Some(needle) = needle {
        let needle_lc = needle.to_lowercase();
        let mut devices = host
            .output_devices()
            .map_err(|e| OutputError::DeviceUnavailable(e.to_string()))?;
        return devices
            .find(|d| {
                d.name()
                    .map(|n| n.to_lowercase().contains(&needle_lc))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                OutputError::DeviceUnavailable(format!("no output device matched: {needle}"))
            });
    }

    host.default_output_device()
        .ok_or_else(|| OutputError::DeviceUnavailable("no default output device".to_string()))
}

struct CpalEndpoint {
    device: cpal::Device,
}

impl RenderEndpoint for CpalEndpoint {
    fn name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn supports_native(&self, format: &StreamFormat) -> bool {
        let Ok(mut configs) = self.device.supported_output_configs() else {
            return false;
        };
        configs.any(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.channels() == format.channels
                && c.min_sample_rate() <= format.sample_rate
                && c.max_sample_rate() >= format.sample_rate
        })
    }

    fn open_stream(
        self: Box<Self>,
        format: &StreamFormat,
        auto_convert: bool,
        duration_ticks: u64,
    ) -> Result<DeviceLink, OutputError> {
        let device_name = self.name();
        let CpalEndpoint { device } = *self;

        if auto_convert {
            // cpal fronts shared-mode mixers that convert internally; the
            // request carries no extra flag, but the intent is worth a trace.
            tracing::debug!(
                device = %device_name,
                channels = format.channels,
                sample_rate = format.sample_rate,
                "format not native; relying on platform conversion"
            );
        }

        let capacity_frames = format::ticks_to_frames(duration_ticks, format.sample_rate).max(1);
        let channels = format.channels.max(1) as usize;
        let ring = Arc::new(FrameRing::new(channels, capacity_frames as usize));
        let gains = Arc::new(ChannelGains::new(format.channels.max(1)));
        let master = Arc::new(MasterGain::new());
        let position = Arc::new(AtomicU64::new(0));

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let ring_cb = ring.clone();
        let gains_cb = gains.clone();
        let master_cb = master.clone();
        let position_cb = position.clone();
        std::thread::spawn(move || {
            stream_host(
                device,
                config,
                channels,
                ring_cb,
                gains_cb,
                master_cb,
                position_cb,
                cmd_rx,
                ready_tx,
            )
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(OutputError::FormatRejected(
                    "stream host exited during negotiation".to_string(),
                ));
            }
        }

        Ok(DeviceLink {
            device_name,
            client: Arc::new(CpalStreamClient {
                cmd: cmd_tx,
                ring: ring.clone(),
            }),
            sink: Arc::new(CpalRenderSink { ring }),
            stream_volume: Arc::new(CpalStreamVolume { gains }),
            master_volume: Arc::new(CpalMasterVolume { master }),
            clock: Arc::new(CpalPlaybackClock { position }),
        })
    }
}

enum StreamCommand {
    Start,
    Stop,
    Shutdown,
}

/// Owns the device and stream for one negotiated link.
#[allow(clippy::too_many_arguments)]
fn stream_host(
    device: cpal::Device,
    config: cpal::StreamConfig,
    channels: usize,
    ring: Arc<FrameRing>,
    gains: Arc<ChannelGains>,
    master: Arc<MasterGain>,
    position: Arc<AtomicU64>,
    cmd_rx: Receiver<StreamCommand>,
    ready_tx: Sender<Result<(), OutputError>>,
) {
    let err_fn = |err| tracing::warn!(error = %err, "output stream error");

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let wrote = ring.read_into(data);
            if wrote < data.len() {
                data[wrote..].fill(0.0);
            }
            apply_gains(&mut data[..wrote], channels, &gains, &master);
            position.fetch_add((wrote / channels) as u64, Ordering::Relaxed);
        },
        err_fn,
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(OutputError::FormatRejected(e.to_string())));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            StreamCommand::Start => {
                if let Err(e) = stream.play() {
                    tracing::warn!(error = %e, "stream start failed");
                }
            }
            StreamCommand::Stop => {
                if let Err(e) = stream.pause() {
                    tracing::warn!(error = %e, "stream stop failed");
                }
            }
            StreamCommand::Shutdown => break,
        }
    }
    // stream drops here, releasing the device handle
}

/// Scale drained samples by the master and per-channel gains.
fn apply_gains(data: &mut [f32], channels: usize, gains: &ChannelGains, master: &MasterGain) {
    let master_gain = if master.muted() { 0.0 } else { master.volume() };
    for frame in data.chunks_mut(channels) {
        for (ch, sample) in frame.iter_mut().enumerate() {
            *sample *= master_gain * gains.get(ch);
        }
    }
}

/// Per-channel gains readable from the output callback without locking.
///
/// Values are stored as f32 bit patterns in atomics.
struct ChannelGains {
    gains: Vec<AtomicU32>,
}

impl ChannelGains {
    fn new(channels: u16) -> Self {
        Self {
            gains: (0..channels)
                .map(|_| AtomicU32::new(1.0f32.to_bits()))
                .collect(),
        }
    }

    fn channel_count(&self) -> u32 {
        self.gains.len() as u32
    }

    fn set(&self, channel: usize, volume: f32) {
        if let Some(g) = self.gains.get(channel) {
            g.store(volume.to_bits(), Ordering::Relaxed);
        }
    }

    fn get(&self, channel: usize) -> f32 {
        self.gains
            .get(channel)
            .map(|g| f32::from_bits(g.load(Ordering::Relaxed)))
            .unwrap_or(1.0)
    }
}

struct MasterGain {
    volume: AtomicU32,
    muted: AtomicBool,
}

impl MasterGain {
    fn new() -> Self {
        Self {
            volume: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

struct CpalStreamClient {
    cmd: Sender<StreamCommand>,
    ring: Arc<FrameRing>,
}

impl StreamClient for CpalStreamClient {
    fn start(&self) -> Result<(), OutputError> {
        self.cmd
            .send(StreamCommand::Start)
            .map_err(|_| OutputError::ServiceAcquisitionFailed("stream host is gone".to_string()))
    }

    fn stop(&self) -> Result<(), OutputError> {
        self.cmd
            .send(StreamCommand::Stop)
            .map_err(|_| OutputError::ServiceAcquisitionFailed("stream host is gone".to_string()))
    }

    fn reset(&self) -> Result<(), OutputError> {
        self.ring.clear();
        Ok(())
    }

    fn capacity_frames(&self) -> u32 {
        self.ring.capacity_frames() as u32
    }

    fn queued_frames(&self) -> u32 {
        self.ring.queued_frames() as u32
    }
}

impl Drop for CpalStreamClient {
    fn drop(&mut self) {
        let _ = self.cmd.send(StreamCommand::Shutdown);
    }
}

struct CpalRenderSink {
    ring: Arc<FrameRing>,
}

impl RenderSink for CpalRenderSink {
    fn write(&self, frames: u32, samples: &[f32]) -> bool {
        if samples.len() != frames as usize * self.ring.channels() {
            tracing::warn!(
                frames,
                samples = samples.len(),
                channels = self.ring.channels(),
                "sink write declined: sample count does not match frame count"
            );
            return false;
        }
        self.ring.write(samples)
    }
}

struct CpalStreamVolume {
    gains: Arc<ChannelGains>,
}

impl StreamVolume for CpalStreamVolume {
    fn channel_count(&self) -> u32 {
        self.gains.channel_count()
    }

    fn set_channel_volume(&self, channel: u32, volume: f32) {
        self.gains.set(channel as usize, volume);
    }
}

struct CpalMasterVolume {
    master: Arc<MasterGain>,
}

impl MasterVolume for CpalMasterVolume {
    fn set_volume(&self, volume: f32) {
        self.master.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    fn set_muted(&self, muted: bool) {
        self.master.muted.store(muted, Ordering::Relaxed);
    }
}

struct CpalPlaybackClock {
    position: Arc<AtomicU64>,
}

impl PlaybackClock for CpalPlaybackClock {
    fn position_frames(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }
}
