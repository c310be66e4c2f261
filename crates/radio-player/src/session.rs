//! Controller state shared with the ingestion worker and the buffer monitor.
//!
//! Every channel activation gets a generation number. Worker callbacks carry the
//! generation they were spawned with and are ignored once the controller has moved on,
//! so a late exit can never tear down a newer session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::Receiver;
use radio_types::{EndReason, FaultKind, PlaybackState, PlayerStatus};

use crate::channel::ChannelList;
use crate::error::PlayerError;
use crate::events::{Observers, PlayerEvent};
use crate::monitor;
use crate::ring_buffer::RingBuffer;
use crate::sink::OutputSink;

pub(crate) struct Shared {
    inner: Mutex<SessionState>,
    observers: Observers,
}

struct SessionState {
    generation: u64,
    state: PlaybackState,
    sink: Option<Arc<dyn OutputSink>>,
    buffer: Option<Arc<RingBuffer>>,
    /// Set by the first monitor promotion of the current session.
    primed: bool,
    channel_index: usize,
    volume: u8,
    muted: bool,
    saved_volume: u8,
    last_fault: Option<String>,
    end_reason: Option<EndReason>,
}

impl SessionState {
    fn gain(&self) -> f32 {
        f32::from(self.volume) / 100.0
    }

    fn set_state(&mut self, next: PlaybackState, events: &mut Vec<PlayerEvent>) {
        if self.state != next {
            self.state = next;
            events.push(PlayerEvent::StateChanged { state: next });
        }
    }

    fn detach(&mut self, reason: EndReason, events: &mut Vec<PlayerEvent>) -> Detached {
        let detached = Detached {
            sink: self.sink.take(),
            buffer: self.buffer.take(),
        };
        if detached.sink.is_some() || detached.buffer.is_some() {
            self.end_reason = Some(reason);
        }
        self.primed = false;
        self.set_state(PlaybackState::Stopped, events);
        detached
    }
}

/// Outcome of a user `play` request.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resume {
    /// Handled in place.
    Done,
    /// Nothing is active; the current channel has to be selected again.
    Reselect,
}

/// Resources taken out of a session, released outside the state lock.
#[must_use]
pub(crate) struct Detached {
    sink: Option<Arc<dyn OutputSink>>,
    buffer: Option<Arc<RingBuffer>>,
}

impl Detached {
    /// Wake a writer stalled on the buffer.
    pub(crate) fn close_buffer(&self) {
        if let Some(buffer) = &self.buffer {
            buffer.close();
        }
    }

    pub(crate) fn release(self) {
        self.close_buffer();
        if let Some(sink) = self.sink {
            sink.stop();
            sink.dispose();
        }
    }
}

impl Shared {
    pub(crate) fn new(volume: u8) -> Self {
        Self {
            inner: Mutex::new(SessionState {
                generation: 0,
                state: PlaybackState::Stopped,
                sink: None,
                buffer: None,
                primed: false,
                channel_index: 0,
                volume: volume.min(100),
                muted: false,
                saved_volume: volume.min(100),
                last_fault: None,
                end_reason: None,
            }),
            observers: Observers::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_all(&self, events: Vec<PlayerEvent>) {
        for event in events {
            self.observers.publish(event);
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.observers.subscribe()
    }

    pub(crate) fn state(&self) -> PlaybackState {
        self.lock().state
    }

    pub(crate) fn channel_index(&self) -> usize {
        self.lock().channel_index
    }

    pub(crate) fn volume(&self) -> (u8, bool) {
        let s = self.lock();
        (s.volume, s.muted)
    }

    pub(crate) fn buffered_duration(&self) -> Option<Duration> {
        self.lock().buffer.as_ref().map(|b| b.buffered_duration())
    }

    pub(crate) fn status(&self, channels: &ChannelList) -> PlayerStatus {
        let s = self.lock();
        let format = s.buffer.as_ref().map(|b| b.format());
        PlayerStatus {
            channel_index: s.channel_index,
            channel_count: channels.len(),
            channel_title: channels.get(s.channel_index).map(|c| c.title().to_string()),
            state: s.state,
            buffered_ms: s
                .buffer
                .as_ref()
                .map(|b| b.buffered_duration().as_millis() as u64),
            buffer_capacity_ms: s
                .buffer
                .as_ref()
                .map(|b| b.capacity_duration().as_millis() as u64),
            sample_rate: format.map(|f| f.sample_rate),
            channels: format.map(|f| f.channels),
            volume: s.volume,
            muted: s.muted,
            output_open: s.sink.is_some(),
            last_fault: s.last_fault.clone(),
            end_reason: s.end_reason,
        }
    }

    #[cfg(test)]
    pub(crate) fn has_session(&self) -> bool {
        self.lock().sink.is_some()
    }

    pub(crate) fn set_channel(&self, index: usize, title: &str) {
        let changed = {
            let mut s = self.lock();
            let changed = s.channel_index != index;
            s.channel_index = index;
            changed
        };
        if changed {
            self.observers.publish(PlayerEvent::ChannelChanged {
                index,
                title: title.to_string(),
            });
        }
    }

    /// Install the device for a new activation and return its generation.
    ///
    /// The state stays `Stopped` until the worker reports its first decoded frame.
    pub(crate) fn begin_session(&self, sink: Arc<dyn OutputSink>) -> u64 {
        let mut s = self.lock();
        sink.set_volume(s.gain());
        s.generation += 1;
        s.sink = Some(sink);
        s.buffer = None;
        s.primed = false;
        s.last_fault = None;
        s.end_reason = None;
        s.generation
    }

    /// Detach the current activation on behalf of the controller.
    ///
    /// Bumps the generation first so the retiring worker's callbacks become no-ops.
    pub(crate) fn end_session(&self, reason: EndReason) -> Detached {
        let mut events = Vec::new();
        let detached = {
            let mut s = self.lock();
            s.generation += 1;
            s.detach(reason, &mut events)
        };
        self.publish_all(events);
        detached
    }

    /// The device of the given activation, if it is still current.
    pub(crate) fn session_sink(&self, generation: u64) -> Option<Arc<dyn OutputSink>> {
        let s = self.lock();
        if s.generation != generation {
            return None;
        }
        s.sink.clone()
    }

    /// Publish the activation's ring buffer and enter `Buffering`.
    ///
    /// Returns `false` when the activation has been retired in the meantime.
    pub(crate) fn buffer_ready(&self, generation: u64, buffer: Arc<RingBuffer>) -> bool {
        let mut events = Vec::new();
        {
            let mut s = self.lock();
            if s.generation != generation || s.sink.is_none() {
                return false;
            }
            s.buffer = Some(buffer);
            s.set_state(PlaybackState::Buffering, &mut events);
        }
        self.publish_all(events);
        true
    }

    /// Record a user-visible failure. `None` applies regardless of generation.
    pub(crate) fn record_fault(&self, generation: Option<u64>, kind: FaultKind, message: String) {
        {
            let mut s = self.lock();
            if generation.is_some_and(|g| g != s.generation) {
                return;
            }
            s.last_fault = Some(message.clone());
        }
        self.observers.publish(PlayerEvent::Fault { kind, message });
    }

    /// Called by an exiting worker; releases the activation if it is still current.
    pub(crate) fn worker_finished(&self, generation: u64, reason: EndReason) {
        let mut events = Vec::new();
        let detached = {
            let mut s = self.lock();
            if s.generation != generation || s.sink.is_none() {
                return;
            }
            let detached = s.detach(reason, &mut events);
            events.push(PlayerEvent::Ended { reason });
            detached
        };
        tracing::info!(generation, reason = ?reason, "channel activation ended");
        detached.release();
        self.publish_all(events);
    }

    /// One buffer monitor step: report the fill level and apply watermark transitions.
    pub(crate) fn monitor_tick(&self, low: Duration, high: Duration) {
        let mut events = Vec::new();
        {
            let mut s = self.lock();
            let (Some(buffer), Some(sink)) = (s.buffer.clone(), s.sink.clone()) else {
                return;
            };
            let buffered = buffer.buffered_duration();
            events.push(PlayerEvent::BufferLevel {
                buffered,
                capacity: buffer.capacity_duration(),
            });

            if let Some(next) = monitor::next_state(s.state, buffered, low, high) {
                tracing::info!(
                    from = s.state.label(),
                    to = next.label(),
                    buffered_ms = buffered.as_millis() as u64,
                    "buffer level transition"
                );
                match next {
                    PlaybackState::Playing => {
                        sink.play();
                        s.primed = true;
                    }
                    _ => sink.pause(),
                }
                s.set_state(next, &mut events);
            }
        }
        self.publish_all(events);
    }

    pub(crate) fn resume(&self) -> Result<Resume, PlayerError> {
        let mut events = Vec::new();
        let outcome = {
            let mut s = self.lock();
            match s.state {
                PlaybackState::Playing => Ok(Resume::Done),
                PlaybackState::Stopped if s.sink.is_some() => Err(PlayerError::StillBuffering),
                PlaybackState::Stopped => Ok(Resume::Reselect),
                PlaybackState::Buffering if !s.primed => Err(PlayerError::StillBuffering),
                PlaybackState::Paused if !s.primed => {
                    s.set_state(PlaybackState::Buffering, &mut events);
                    Ok(Resume::Done)
                }
                PlaybackState::Buffering | PlaybackState::Paused => {
                    if let Some(sink) = &s.sink {
                        sink.play();
                    }
                    s.set_state(PlaybackState::Playing, &mut events);
                    Ok(Resume::Done)
                }
            }
        };
        self.publish_all(events);
        outcome
    }

    pub(crate) fn pause(&self) {
        let mut events = Vec::new();
        {
            let mut s = self.lock();
            match s.state {
                PlaybackState::Playing => {
                    if let Some(sink) = &s.sink {
                        sink.pause();
                    }
                    s.set_state(PlaybackState::Paused, &mut events);
                }
                PlaybackState::Buffering => s.set_state(PlaybackState::Paused, &mut events),
                PlaybackState::Paused | PlaybackState::Stopped => {}
            }
        }
        self.publish_all(events);
    }

    pub(crate) fn set_volume(&self, volume: u8) {
        let (volume, muted) = {
            let mut s = self.lock();
            let volume = volume.min(100);
            if volume > 0 {
                s.muted = false;
            }
            s.volume = volume;
            if let Some(sink) = &s.sink {
                sink.set_volume(s.gain());
            }
            (s.volume, s.muted)
        };
        self.observers
            .publish(PlayerEvent::VolumeChanged { volume, muted });
    }

    pub(crate) fn toggle_mute(&self) {
        let (volume, muted) = {
            let mut s = self.lock();
            if s.muted {
                s.muted = false;
                s.volume = s.saved_volume;
            } else {
                s.saved_volume = s.volume;
                s.volume = 0;
                s.muted = true;
            }
            if let Some(sink) = &s.sink {
                sink.set_volume(s.gain());
            }
            (s.volume, s.muted)
        };
        self.observers
            .publish(PlayerEvent::VolumeChanged { volume, muted });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::SampleFormat;
    use crate::testing::FakeSink;

    fn buffer() -> Arc<RingBuffer> {
        Arc::new(RingBuffer::new(
            SampleFormat {
                sample_rate: 1000,
                channels: 1,
                bits_per_sample: 16,
            },
            Duration::from_secs(10),
        ))
    }

    #[test]
    fn stale_worker_exit_is_ignored() {
        let shared = Shared::new(20);
        let sink = Arc::new(FakeSink::default());
        let old = shared.begin_session(sink.clone());
        shared.end_session(EndReason::Stopped).release();

        let current = shared.begin_session(sink.clone());
        assert_ne!(old, current);
        shared.worker_finished(old, EndReason::Eof);
        assert!(shared.has_session());
        assert!(!shared.buffer_ready(old, buffer()));
        assert!(shared.buffer_ready(current, buffer()));
        assert_eq!(shared.state(), PlaybackState::Buffering);
    }

    #[test]
    fn current_worker_exit_releases_everything() {
        let shared = Shared::new(20);
        let events = shared.subscribe();
        let sink = Arc::new(FakeSink::default());
        let generation = shared.begin_session(sink.clone());
        let rb = buffer();
        assert!(shared.buffer_ready(generation, rb.clone()));

        shared.worker_finished(generation, EndReason::Eof);
        assert_eq!(shared.state(), PlaybackState::Stopped);
        assert!(!shared.has_session());
        assert!(shared.buffered_duration().is_none());
        assert!(rb.is_closed());
        assert!(sink.is_disposed());

        let seen: Vec<_> = events.try_iter().collect();
        assert!(seen.contains(&PlayerEvent::Ended {
            reason: EndReason::Eof
        }));
    }

    #[test]
    fn monitor_tick_promotes_and_demotes_with_hysteresis() {
        let shared = Shared::new(20);
        let sink = Arc::new(FakeSink::default());
        let generation = shared.begin_session(sink.clone());
        let rb = buffer();
        assert!(shared.buffer_ready(generation, rb.clone()));
        let (low, high) = (Duration::from_millis(500), Duration::from_secs(2));

        // 1000 Hz mono 16-bit: 2000 bytes per second.
        rb.write(&[0; 1200]);
        shared.monitor_tick(low, high);
        assert_eq!(shared.state(), PlaybackState::Buffering);

        rb.write(&[0; 4000]);
        shared.monitor_tick(low, high);
        assert_eq!(shared.state(), PlaybackState::Playing);
        assert_eq!(sink.play_calls(), 1);

        rb.read(4600);
        shared.monitor_tick(low, high);
        assert_eq!(shared.state(), PlaybackState::Buffering);
        assert_eq!(sink.pause_calls(), 1);

        assert!(matches!(shared.resume(), Ok(Resume::Done)));
        assert_eq!(shared.state(), PlaybackState::Playing);
    }

    #[test]
    fn resume_before_first_promotion() {
        let shared = Shared::new(20);
        assert!(matches!(shared.resume(), Ok(Resume::Reselect)));

        let generation = shared.begin_session(Arc::new(FakeSink::default()));
        assert!(matches!(shared.resume(), Err(PlayerError::StillBuffering)));
        assert!(shared.buffer_ready(generation, buffer()));
        assert!(matches!(shared.resume(), Err(PlayerError::StillBuffering)));

        shared.pause();
        assert_eq!(shared.state(), PlaybackState::Paused);
        assert!(matches!(shared.resume(), Ok(Resume::Done)));
        assert_eq!(shared.state(), PlaybackState::Buffering);
    }

    #[test]
    fn faults_for_stale_generations_are_dropped() {
        let shared = Shared::new(20);
        let generation = shared.begin_session(Arc::new(FakeSink::default()));
        shared.record_fault(Some(generation + 1), FaultKind::Connection, "old".into());
        assert!(shared.status(&crate::testing::channels(2)).last_fault.is_none());
        shared.record_fault(Some(generation), FaultKind::Connection, "refused".into());
        assert_eq!(
            shared.status(&crate::testing::channels(2)).last_fault.as_deref(),
            Some("refused")
        );
    }
}
