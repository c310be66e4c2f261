use serde::{Deserialize, Serialize};

/// Transport state of the player.
///
/// Exactly one value is active per controller; the output device renders
/// audio only while the state is [`PlaybackState::Playing`].
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No worker, no device.
    #[default]
    Stopped,
    /// Worker running, device initialized but silent until enough audio is buffered.
    Buffering,
    /// Device rendering.
    Playing,
    /// Device suspended by an explicit user action.
    Paused,
}

impl PlaybackState {
    /// Short label for console/UI display.
    pub fn label(self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

/// Reason why a channel activation ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The server closed the stream.
    Eof,
    /// Connection, transport, decoder or output fault ended the stream.
    Error,
    /// Playback was explicitly stopped or replaced by a command.
    Stopped,
}

/// Class of a user-visible failure.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The stream URL could not be opened.
    Connection,
    /// The output device could not be opened or initialized.
    Device,
}

/// Polled snapshot of the player, suitable for a presentation layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    /// Zero-based index of the current channel.
    pub channel_index: usize,
    /// Number of configured channels.
    pub channel_count: usize,
    /// Title of the current channel.
    pub channel_title: Option<String>,
    /// Current transport state.
    pub state: PlaybackState,
    /// Decoded audio waiting in the ring buffer, in milliseconds.
    pub buffered_ms: Option<u64>,
    /// Ring buffer capacity, in milliseconds.
    pub buffer_capacity_ms: Option<u64>,
    /// Decoded sample rate (Hz).
    pub sample_rate: Option<u32>,
    /// Decoded channel count.
    pub channels: Option<u16>,
    /// User-facing volume (0..=100).
    pub volume: u8,
    /// `true` while muted.
    pub muted: bool,
    /// `true` while an output device is held for the current channel.
    pub output_open: bool,
    /// Last user-visible failure message.
    pub last_fault: Option<String>,
    /// How the last activation ended.
    pub end_reason: Option<EndReason>,
}

impl PlayerStatus {
    /// Position label in the form `current/total` (one-based).
    pub fn position_label(&self) -> String {
        if self.channel_count == 0 {
            return "0/0".to_string();
        }
        format!("{}/{}", self.channel_index + 1, self.channel_count)
    }
}
