use std::time::Duration;

use crate::error::PlayerError;
use crate::ring_buffer::NEARLY_FULL_HEADROOM;

/// Playback tuning shared by the ingestion worker, the monitor and the output stage.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Ring buffer size in seconds of decoded audio.
    pub buffer_seconds: f32,
    /// Buffered duration below which `Playing` drops back to `Buffering`.
    pub low_watermark: Duration,
    /// Buffered duration above which `Buffering` is promoted to `Playing`.
    pub high_watermark: Duration,
    /// Period of the buffer monitor tick.
    pub monitor_interval: Duration,
    /// Pause taken by the ingestion worker while the ring buffer is nearly full.
    pub backoff: Duration,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
}

pub(crate) const DEFAULT_BUFFER_SECONDS: f32 = 30.0;

/// Largest accepted ring buffer, in seconds.
pub const MAX_BUFFER_SECONDS: f32 = 600.0;

/// Fill beyond the high watermark a buffer must be able to reach before the worker
/// backs off; covers the last frame written under the headroom.
const PROMOTION_MARGIN: Duration = Duration::from_millis(250);

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            low_watermark: Duration::from_millis(500),
            high_watermark: Duration::from_secs(3),
            monitor_interval: Duration::from_millis(500),
            backoff: Duration::from_millis(500),
            refill_max_frames: 4096,
            chunk_frames: 1024,
        }
    }
}

impl PlaybackConfig {
    /// Reject settings that would make the state machine oscillate, spin, or never leave
    /// `Buffering`, and buffers too large to allocate.
    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.low_watermark >= self.high_watermark {
            return Err(PlayerError::Config(format!(
                "low watermark ({:?}) must be below high watermark ({:?})",
                self.low_watermark, self.high_watermark
            )));
        }
        if self.monitor_interval.is_zero() || self.backoff.is_zero() {
            return Err(PlayerError::Config(
                "monitor interval and backoff must be non-zero".to_string(),
            ));
        }
        if self.refill_max_frames == 0 || self.chunk_frames == 0 {
            return Err(PlayerError::Config(
                "refill and chunk sizes must be non-zero".to_string(),
            ));
        }
        let seconds = effective_buffer_seconds(self.buffer_seconds);
        if seconds > MAX_BUFFER_SECONDS {
            return Err(PlayerError::Config(format!(
                "buffer of {seconds} s exceeds the {MAX_BUFFER_SECONDS} s limit"
            )));
        }
        let buffer = Duration::try_from_secs_f32(seconds)
            .map_err(|e| PlayerError::Config(format!("buffer length {seconds} s: {e}")))?;
        let reachable = self.high_watermark + NEARLY_FULL_HEADROOM + PROMOTION_MARGIN;
        if buffer < reachable {
            return Err(PlayerError::Config(format!(
                "buffer ({buffer:?}) must hold at least {reachable:?} \
                 to pass the high watermark ({:?})",
                self.high_watermark
            )));
        }
        Ok(())
    }

    /// Buffer length with the fallback applied for non-finite or non-positive values,
    /// capped at [`MAX_BUFFER_SECONDS`].
    pub fn buffer_duration(&self) -> Duration {
        let seconds = effective_buffer_seconds(self.buffer_seconds).min(MAX_BUFFER_SECONDS);
        Duration::try_from_secs_f32(seconds)
            .unwrap_or(Duration::from_secs(DEFAULT_BUFFER_SECONDS as u64))
    }
}

pub(crate) fn effective_buffer_seconds(buffer_seconds: f32) -> f32 {
    if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        DEFAULT_BUFFER_SECONDS
    }
}

/// Settings for opening HTTP streams.
#[derive(Clone, Debug)]
pub struct HttpStreamConfig {
    /// Max time to establish the TCP/TLS connection.
    pub connect_timeout: Duration,
    /// Max time to wait for the response headers.
    pub response_timeout: Duration,
    /// User-Agent header sent with the request.
    pub user_agent: String,
}

impl Default for HttpStreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(10),
            user_agent: concat!("radio-player/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = PlaybackConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.buffer_duration(), Duration::from_secs(30));
    }

    #[test]
    fn validate_rejects_inverted_watermarks() {
        let cfg = PlaybackConfig {
            low_watermark: Duration::from_secs(2),
            high_watermark: Duration::from_secs(2),
            ..PlaybackConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PlayerError::Config(_))));
    }

    #[test]
    fn validate_rejects_buffer_smaller_than_high_watermark() {
        let cfg = PlaybackConfig {
            buffer_seconds: 1.0,
            ..PlaybackConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_requires_room_above_the_high_watermark() {
        let just_above_high = PlaybackConfig {
            buffer_seconds: 3.1,
            ..PlaybackConfig::default()
        };
        assert!(matches!(
            just_above_high.validate(),
            Err(PlayerError::Config(_))
        ));

        let enough = PlaybackConfig {
            buffer_seconds: 3.5,
            ..PlaybackConfig::default()
        };
        assert!(enough.validate().is_ok());
    }

    #[test]
    fn validate_rejects_oversized_buffers_without_panicking() {
        for seconds in [1e9, 1e20, f32::MAX] {
            let cfg = PlaybackConfig {
                buffer_seconds: seconds,
                ..PlaybackConfig::default()
            };
            assert!(matches!(cfg.validate(), Err(PlayerError::Config(_))));
            assert_eq!(cfg.buffer_duration(), Duration::from_secs(600));
        }
        let cfg = PlaybackConfig {
            buffer_seconds: MAX_BUFFER_SECONDS,
            ..PlaybackConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn buffer_seconds_fallbacks() {
        assert_eq!(effective_buffer_seconds(-1.0), DEFAULT_BUFFER_SECONDS);
        assert_eq!(effective_buffer_seconds(f32::NAN), DEFAULT_BUFFER_SECONDS);
        assert_eq!(effective_buffer_seconds(f32::INFINITY), DEFAULT_BUFFER_SECONDS);
        assert_eq!(effective_buffer_seconds(5.0), 5.0);
    }
}
