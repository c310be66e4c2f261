//! Public control surface: channel selection, transport and volume.
//!
//! The controller owns at most one ingestion worker at a time. Every switch runs the
//! same teardown before anything new is built:
//!
//! 1. set the worker's cancel flag,
//! 2. detach the device and buffer from the shared state (bumping the generation),
//! 3. close the buffer so a stalled write returns, then join the worker,
//! 4. stop and dispose the old device.
//!
//! Methods take `&mut self`; the controller is driven from a single control thread.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use radio_types::{EndReason, FaultKind, PlaybackState, PlayerStatus};

use crate::channel::{Channel, ChannelList};
use crate::config::PlaybackConfig;
use crate::decoder::DecoderFactory;
use crate::error::PlayerError;
use crate::events::PlayerEvent;
use crate::monitor::MonitorHandle;
use crate::session::{Resume, Shared};
use crate::sink::SinkFactory;
use crate::source::SourceOpener;
use crate::worker::{WorkerContext, WorkerHandle};

/// Startup volume when none is configured.
pub const DEFAULT_VOLUME: u8 = 20;

/// External capabilities the pipeline is assembled from.
#[derive(Clone)]
pub struct Collaborators {
    pub opener: Arc<dyn SourceOpener>,
    pub decoders: Arc<dyn DecoderFactory>,
    pub sinks: Arc<dyn SinkFactory>,
}

pub struct PlaybackController {
    channels: ChannelList,
    config: PlaybackConfig,
    collaborators: Collaborators,
    shared: Arc<Shared>,
    worker: Option<WorkerHandle>,
    monitor: Option<MonitorHandle>,
    closed: bool,
}

impl PlaybackController {
    /// Build an idle controller (`Stopped`, first channel current) and start its monitor.
    pub fn new(
        channels: ChannelList,
        config: PlaybackConfig,
        collaborators: Collaborators,
    ) -> Result<Self, PlayerError> {
        config.validate()?;
        let shared = Arc::new(Shared::new(DEFAULT_VOLUME));
        let monitor = MonitorHandle::spawn(shared.clone(), &config)
            .map_err(|e| PlayerError::Config(format!("spawn buffer monitor: {e}")))?;
        tracing::debug!(channels = channels.len(), "playback controller ready");
        Ok(Self {
            channels,
            config,
            collaborators,
            shared,
            worker: None,
            monitor: Some(monitor),
            closed: false,
        })
    }

    fn ensure_open(&self) -> Result<(), PlayerError> {
        if self.closed {
            Err(PlayerError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn channels(&self) -> &ChannelList {
        &self.channels
    }

    pub fn channel_index(&self) -> usize {
        self.shared.channel_index()
    }

    pub fn current_channel(&self) -> Option<&Channel> {
        self.channels.get(self.channel_index())
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Decoded audio waiting in the current buffer; `None` without an active buffer.
    pub fn buffered_duration(&self) -> Option<Duration> {
        self.shared.buffered_duration()
    }

    pub fn volume(&self) -> u8 {
        self.shared.volume().0
    }

    pub fn is_muted(&self) -> bool {
        self.shared.volume().1
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.status(&self.channels)
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.shared.subscribe()
    }

    /// Tear down the current activation and start streaming channel `index`.
    ///
    /// Returns once the new worker is spawned; the state turns `Buffering` when its first
    /// frame is decoded. A device failure leaves the controller `Stopped` with no worker.
    pub fn select_channel(&mut self, index: usize) -> Result<(), PlayerError> {
        self.ensure_open()?;
        let channel = self
            .channels
            .get(index)
            .cloned()
            .ok_or(PlayerError::UnknownChannel {
                index,
                count: self.channels.len(),
            })?;

        self.retire_worker();
        self.shared.set_channel(index, channel.title());
        tracing::info!(
            index,
            title = %channel.title(),
            url = %channel.stream_url(),
            "select channel"
        );

        let sink = match self.collaborators.sinks.open() {
            Ok(sink) => sink,
            Err(e) => {
                tracing::warn!("cannot open output: {e}");
                self.shared
                    .record_fault(None, FaultKind::Device, e.to_string());
                return Err(e);
            }
        };
        let generation = self.shared.begin_session(sink);

        let ctx = WorkerContext {
            generation,
            url: channel.stream_url().to_string(),
            config: self.config.clone(),
            opener: self.collaborators.opener.clone(),
            decoders: self.collaborators.decoders.clone(),
            shared: self.shared.clone(),
        };
        match WorkerHandle::spawn(ctx) {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.end_session(EndReason::Error).release();
                Err(PlayerError::Device(format!("spawn ingestion worker: {e}")))
            }
        }
    }

    pub fn next_channel(&mut self) -> Result<(), PlayerError> {
        self.ensure_open()?;
        let index = self.channels.wrap_next(self.channel_index());
        self.select_channel(index)
    }

    pub fn previous_channel(&mut self) -> Result<(), PlayerError> {
        self.ensure_open()?;
        let index = self.channels.wrap_previous(self.channel_index());
        self.select_channel(index)
    }

    /// Resume rendering.
    ///
    /// From `Stopped` this restarts the current channel. A new activation must reach the
    /// high watermark before it plays: until then `Buffering` rejects the request with
    /// [`PlayerError::StillBuffering`] and `Paused` returns to `Buffering`.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        self.ensure_open()?;
        match self.shared.resume()? {
            Resume::Done => Ok(()),
            Resume::Reselect => self.select_channel(self.channel_index()),
        }
    }

    /// Suspend rendering without dropping buffered audio. No-op unless playing or buffering.
    pub fn pause(&mut self) -> Result<(), PlayerError> {
        self.ensure_open()?;
        self.shared.pause();
        Ok(())
    }

    /// Retire the current activation. Idempotent.
    pub fn stop(&mut self) -> Result<(), PlayerError> {
        self.ensure_open()?;
        self.retire_worker();
        Ok(())
    }

    /// Set the volume (clamped to 0..=100). Any nonzero value clears mute.
    pub fn set_volume(&mut self, volume: u8) -> Result<(), PlayerError> {
        self.ensure_open()?;
        self.shared.set_volume(volume);
        Ok(())
    }

    /// Mute (remembering the volume) or restore the remembered volume.
    pub fn toggle_mute(&mut self) -> Result<(), PlayerError> {
        self.ensure_open()?;
        self.shared.toggle_mute();
        Ok(())
    }

    /// Stop playback and the monitor. Every later call returns [`PlayerError::Closed`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.retire_worker();
        if let Some(monitor) = self.monitor.take() {
            monitor.shutdown();
        }
        self.closed = true;
        tracing::info!("playback controller closed");
    }

    fn retire_worker(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancel();
        }
        let detached = self.shared.end_session(EndReason::Stopped);
        detached.close_buffer();
        if let Some(worker) = self.worker.take() {
            worker.join();
        }
        detached.release();
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.close();
    }
}
