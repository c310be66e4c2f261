//! State-change notifications for a presentation layer.
//!
//! Subscribers receive every event published after they subscribed. A subscriber whose
//! receiver was dropped is pruned on the next publish.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use radio_types::{EndReason, FaultKind, PlaybackState};

/// Notification published by the controller, the monitor or the ingestion worker.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    StateChanged { state: PlaybackState },
    ChannelChanged { index: usize, title: String },
    VolumeChanged { volume: u8, muted: bool },
    /// Published on every monitor tick while a buffer exists.
    BufferLevel { buffered: Duration, capacity: Duration },
    /// A failure the user should know about.
    Fault { kind: FaultKind, message: String },
    /// A channel activation ended on its own.
    Ended { reason: EndReason },
}

/// Fan-out of [`PlayerEvent`]s to any number of subscribers.
#[derive(Default)]
pub(crate) struct Observers {
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
}

impl Observers {
    pub(crate) fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub(crate) fn publish(&self, event: PlayerEvent) {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_published_events() {
        let obs = Observers::default();
        let a = obs.subscribe();
        let b = obs.subscribe();
        obs.publish(PlayerEvent::StateChanged {
            state: PlaybackState::Buffering,
        });
        let expected = PlayerEvent::StateChanged {
            state: PlaybackState::Buffering,
        };
        assert_eq!(a.try_recv().unwrap(), expected);
        assert_eq!(b.try_recv().unwrap(), expected);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let obs = Observers::default();
        let kept = obs.subscribe();
        drop(obs.subscribe());
        assert_eq!(obs.subscriber_count(), 2);

        obs.publish(PlayerEvent::Ended {
            reason: EndReason::Eof,
        });
        assert_eq!(obs.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let obs = Observers::default();
        obs.publish(PlayerEvent::VolumeChanged {
            volume: 20,
            muted: false,
        });
        let rx = obs.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
