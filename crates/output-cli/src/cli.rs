use clap::Parser;

/// Play a generated test tone through the throttled output session.
#[derive(Parser, Debug)]
#[command(name = "output-cli", version)]
pub struct Args {
    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    pub freq: f32,

    /// Playback length in seconds
    #[arg(long, default_value_t = 3.0)]
    pub seconds: f32,

    /// Channel count for the generated tone
    #[arg(long, default_value_t = 2)]
    pub channels: u16,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 44_100)]
    pub sample_rate: u32,

    /// Stream volume in [0.0, 1.0]
    #[arg(long, default_value_t = 0.5)]
    pub volume: f64,

    /// Frames per submitted buffer
    #[arg(long, default_value_t = 4_410)]
    pub buffer_frames: u32,

    /// Print the final session status as JSON on exit
    #[arg(long)]
    pub status_json: bool,
}
