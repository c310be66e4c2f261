//! Periodic buffer monitor.
//!
//! One thread per controller. Each tick reads the buffered duration of the current
//! activation and moves `Playing`/`Buffering` across the watermarks.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use radio_types::PlaybackState;

use crate::config::PlaybackConfig;
use crate::session::Shared;

/// Watermark transition for one observation, if any.
///
/// `Playing` drops to `Buffering` below `low`; `Buffering` is promoted to `Playing`
/// above `high`. `Paused` and `Stopped` are never changed here.
pub(crate) fn next_state(
    state: PlaybackState,
    buffered: Duration,
    low: Duration,
    high: Duration,
) -> Option<PlaybackState> {
    match state {
        PlaybackState::Playing if buffered < low => Some(PlaybackState::Buffering),
        PlaybackState::Buffering if buffered > high => Some(PlaybackState::Playing),
        _ => None,
    }
}

pub(crate) struct MonitorHandle {
    shutdown: Sender<()>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub(crate) fn spawn(shared: Arc<Shared>, config: &PlaybackConfig) -> std::io::Result<Self> {
        let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let interval = config.monitor_interval;
        let (low, high) = (config.low_watermark, config.high_watermark);
        let join = std::thread::Builder::new()
            .name("radio-monitor".to_string())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => shared.monitor_tick(low, high),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("buffer monitor exit");
            })?;
        Ok(Self { shutdown, join })
    }

    pub(crate) fn shutdown(self) {
        drop(self.shutdown);
        if self.join.join().is_err() {
            tracing::warn!("buffer monitor panicked");
        }
    }
}
