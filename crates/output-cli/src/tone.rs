//! Test-tone synthesis for the demo feeder.

use output_session::VecBuffer;

const AMPLITUDE: f32 = 0.8;

/// Sine generator producing interleaved f32 buffers, phase-continuous
/// across calls.
pub struct ToneGenerator {
    sample_rate: u32,
    channels: u16,
    phase: f32,
    step: f32,
}

impl ToneGenerator {
    pub fn new(freq: f32, sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            phase: 0.0,
            step: std::f32::consts::TAU * freq / sample_rate.max(1) as f32,
        }
    }

    /// Produce the next `frames` frames, every channel carrying the tone.
    pub fn next_buffer(&mut self, frames: u32) -> VecBuffer {
        let mut samples = Vec::with_capacity(frames as usize * self.channels as usize);
        for _ in 0..frames {
            let value = self.phase.sin() * AMPLITUDE;
            for _ in 0..self.channels {
                samples.push(value);
            }
            self.phase = (self.phase + self.step) % std::f32::consts::TAU;
        }
        VecBuffer::new(samples, self.channels, self.sample_rate)
    }
}
