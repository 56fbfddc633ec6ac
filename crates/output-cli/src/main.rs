//! output-cli — feeds a generated tone through the output session.
//!
//! Exercises device negotiation, ring backpressure, and transport control
//! end to end: the feeder loop submits fixed-size buffers, and Ctrl-C stops
//! the stream mid-wait, which the in-flight submission observes within one
//! throttle iteration.

mod cli;
mod tone;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use output_session::{BufferOwner, CpalBackend, OutputSession, PcmBuffer, VecBuffer};
use tracing_subscriber::EnvFilter;

/// Counts reclaimed buffers. The feeder reuses a refused buffer on the next
/// iteration, so no pool is needed here.
#[derive(Default)]
struct ReclaimCounter {
    processed: AtomicUsize,
}

impl ReclaimCounter {
    fn count(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }
}

impl BufferOwner for ReclaimCounter {
    fn on_buffer_processed(&self, _buffer: &dyn PcmBuffer) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,output_cli=info")),
        )
        .init();

    if args.list_devices {
        for (i, name) in output_session::cpal_backend::list_devices()?
            .iter()
            .enumerate()
        {
            println!("#{i}: {name}");
        }
        return Ok(());
    }

    if args.channels == 0 || args.sample_rate == 0 || args.buffer_frames == 0 {
        bail!("channels, sample-rate, and buffer-frames must be non-zero");
    }

    let backend = match &args.device {
        Some(hint) => CpalBackend::with_device(hint),
        None => CpalBackend::new(),
    };
    let session = Arc::new(OutputSession::new(Box::new(backend)));
    session.set_volume(args.volume.clamp(0.0, 1.0));

    let interrupted = Arc::new(AtomicBool::new(false));
    let session_for_signal = session.clone();
    let interrupted_for_signal = interrupted.clone();
    let _ = ctrlc::set_handler(move || {
        interrupted_for_signal.store(true, Ordering::Relaxed);
        session_for_signal.stop();
    });

    let total_frames = (args.seconds.max(0.0) * args.sample_rate as f32) as u64;
    let mut generator = tone::ToneGenerator::new(args.freq, args.sample_rate, args.channels);
    let owner = ReclaimCounter::default();

    tracing::info!(
        freq_hz = args.freq,
        seconds = args.seconds,
        channels = args.channels,
        sample_rate = args.sample_rate,
        "tone playback starting"
    );

    let mut sent: u64 = 0;
    let mut refusals: u32 = 0;
    // a refused buffer stays ours; hold it for the next attempt
    let mut pending: Option<VecBuffer> = None;

    while sent < total_frames && !interrupted.load(Ordering::Relaxed) {
        let buffer = match pending.take() {
            Some(buffer) => buffer,
            None => {
                let frames = (total_frames - sent).min(u64::from(args.buffer_frames)) as u32;
                generator.next_buffer(frames)
            }
        };

        if session.submit(&buffer, &owner) {
            sent += u64::from(buffer.frames());
            refusals = 0;
        } else {
            if interrupted.load(Ordering::Relaxed) {
                break;
            }
            refusals += 1;
            if refusals > 20 {
                bail!("output device keeps refusing audio; giving up");
            }
            pending = Some(buffer);
            // the session tore down on failure; retry on our own cadence
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    if !interrupted.load(Ordering::Relaxed) {
        session.drain();
    }
    session.stop();

    tracing::info!(
        frames = sent,
        buffers = owner.count(),
        interrupted = interrupted.load(Ordering::Relaxed),
        "tone playback finished"
    );

    if args.status_json {
        println!("{}", serde_json::to_string_pretty(&session.status())?);
    }

    Ok(())
}
