//! Streaming internet-radio player core.
//!
//! ## Pipeline
//! 1. **Ingest**: a per-channel worker thread pulls MP3 frames from an HTTP stream
//!    ([`source`]), decodes them to PCM ([`decoder`]) and appends them to a bounded
//!    [`ring_buffer::RingBuffer`].
//! 2. **Monitor**: a periodic tick watches the buffered duration and flips the
//!    [`controller::PlaybackController`] between `Buffering` and `Playing`.
//! 3. **Output**: the [`sink`] drains the ring buffer into the audio device while playing.

pub mod channel;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod events;
pub mod ring_buffer;
pub mod sink;
pub mod source;

mod monitor;
mod session;
mod worker;

#[cfg(test)]
mod testing;

pub use channel::{Channel, ChannelList};
pub use config::{HttpStreamConfig, PlaybackConfig};
pub use controller::{Collaborators, DEFAULT_VOLUME, PlaybackController};
pub use decoder::{DecoderFactory, FrameDecoder, Mp3DecoderFactory};
pub use error::{PlayerError, StreamError};
pub use events::PlayerEvent;
pub use radio_types::{EndReason, FaultKind, PlaybackState, PlayerStatus};
pub use sink::{CpalSinkFactory, OutputSink, SinkFactory};
pub use source::{FrameSource, HttpStreamOpener, SourceOpener};
