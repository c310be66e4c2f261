use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "radio", version = VERSION, about = "Console internet-radio player")]
pub struct Args {
    /// TOML config with the channel list and playback settings
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// List configured channels and exit
    #[arg(long)]
    pub list_channels: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Channel to start with (1-based, as shown by --list-channels)
    #[arg(long)]
    pub channel: Option<usize>,

    /// Startup volume (0-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,

    /// Decoded audio kept ahead of playback, in seconds
    #[arg(long)]
    pub buffer_seconds: Option<f32>,

    /// Start idle instead of tuning in right away
    #[arg(long)]
    pub no_autoplay: bool,
}
