//! Error types for the control surface and the ingestion pipeline.

use radio_types::FaultKind;
use thiserror::Error;

/// Failures returned by [`crate::PlaybackController`] operations.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("channel list is empty")]
    NoChannels,
    #[error("invalid channel: {0}")]
    InvalidChannel(String),
    #[error("channel index {index} out of range (0..{count})")]
    UnknownChannel { index: usize, count: usize },
    #[error("output device unavailable: {0}")]
    Device(String),
    #[error("still buffering; playback starts once enough audio is buffered")]
    StillBuffering,
    #[error("player is closed")]
    Closed,
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failures raised inside a channel activation.
///
/// These never cross into the control layer as `Err`; the worker logs them, reports the
/// user-visible ones as events and ends.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("cannot open {url}: {message}")]
    Connection { url: String, message: String },
    #[error("stream transport failed: {0}")]
    Transport(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("output failed: {0}")]
    Output(String),
}

impl StreamError {
    /// Fault class for failures that need operator awareness.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            StreamError::Connection { .. } => Some(FaultKind::Connection),
            StreamError::Output(_) => Some(FaultKind::Device),
            StreamError::Transport(_) | StreamError::Decode(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_not_user_visible() {
        assert!(StreamError::Transport("reset".into()).fault_kind().is_none());
        assert!(StreamError::Decode("bad header".into()).fault_kind().is_none());
        assert_eq!(
            StreamError::Connection {
                url: "http://x".into(),
                message: "refused".into()
            }
            .fault_kind(),
            Some(FaultKind::Connection)
        );
    }

    #[test]
    fn unknown_channel_message_names_range() {
        let msg = PlayerError::UnknownChannel { index: 5, count: 3 }.to_string();
        assert_eq!(msg, "channel index 5 out of range (0..3)");
    }
}
