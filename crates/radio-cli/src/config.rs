//! Configuration loading and parsing.
//!
//! Defines the TOML schema for the console player and resolves it into the library's
//! channel list and playback settings.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use radio_player::{Channel, ChannelList, HttpStreamConfig, PlaybackConfig};
use serde::Deserialize;

/// Channels used when the config file names none.
const DEFAULT_CHANNELS: &[(&str, &str)] = &[
    ("Trancemission", "http://air.radiorecord.ru:8102/tm_320"),
    ("Russian Mix", "http://air.radiorecord.ru:8102/rus_320"),
    ("Chill-Out", "http://air.radiorecord.ru:8102/chil_320"),
    ("Club", "http://air.radiorecord.ru:8102/club_320"),
    ("Deep", "http://air.radiorecord.ru:8102/deep_320"),
    ("Dancecore", "http://air.radiorecord.ru:8102/dc_320"),
    ("Dubstep", "http://air.radiorecord.ru:8102/dub_320"),
    ("Trap", "http://air.radiorecord.ru:8102/trap_320"),
];

/// Top-level config loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RadioConfig {
    /// Channel list, in display order.
    pub channels: Option<Vec<ChannelConfig>>,
    /// Output device name substring.
    pub device: Option<String>,
    /// Startup volume (0-100).
    pub volume: Option<u8>,
    /// 1-based channel selected at startup.
    pub start_channel: Option<usize>,
    pub playback: Option<PlaybackSection>,
    pub http: Option<HttpSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub title: String,
    pub url: String,
}

/// Overrides for [`PlaybackConfig`]; durations in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaybackSection {
    pub buffer_seconds: Option<f32>,
    pub low_watermark_ms: Option<u64>,
    pub high_watermark_ms: Option<u64>,
    pub monitor_interval_ms: Option<u64>,
    pub backoff_ms: Option<u64>,
    pub refill_max_frames: Option<usize>,
    pub chunk_frames: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpSection {
    pub connect_timeout_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
}

impl RadioConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<RadioConfig>(raw)?)
    }

    /// Configured channels, or the built-in list when none are configured.
    pub fn channel_list(&self) -> Result<ChannelList> {
        let channels = match &self.channels {
            Some(list) => list
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    Channel::new(&c.title, &c.url).with_context(|| format!("channel #{}", i + 1))
                })
                .collect::<Result<Vec<_>>>()?,
            None => DEFAULT_CHANNELS
                .iter()
                .map(|(title, url)| Channel::new(title, url))
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(ChannelList::new(channels)?)
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        let mut cfg = PlaybackConfig::default();
        let Some(p) = &self.playback else {
            return cfg;
        };
        if let Some(v) = p.buffer_seconds {
            cfg.buffer_seconds = v;
        }
        if let Some(ms) = p.low_watermark_ms {
            cfg.low_watermark = Duration::from_millis(ms);
        }
        if let Some(ms) = p.high_watermark_ms {
            cfg.high_watermark = Duration::from_millis(ms);
        }
        if let Some(ms) = p.monitor_interval_ms {
            cfg.monitor_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = p.backoff_ms {
            cfg.backoff = Duration::from_millis(ms);
        }
        if let Some(v) = p.refill_max_frames {
            cfg.refill_max_frames = v;
        }
        if let Some(v) = p.chunk_frames {
            cfg.chunk_frames = v;
        }
        cfg
    }

    pub fn http_config(&self) -> HttpStreamConfig {
        let mut cfg = HttpStreamConfig::default();
        let Some(h) = &self.http else {
            return cfg;
        };
        if let Some(ms) = h.connect_timeout_ms {
            cfg.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = h.response_timeout_ms {
            cfg.response_timeout = Duration::from_millis(ms);
        }
        if let Some(ua) = &h.user_agent {
            cfg.user_agent = ua.clone();
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_builtin_channels() {
        let cfg = RadioConfig::parse("").unwrap();
        let list = cfg.channel_list().unwrap();
        assert_eq!(list.len(), DEFAULT_CHANNELS.len());
        let first = list.get(0).unwrap();
        assert_eq!(first.title(), "Trancemission");
        assert_eq!(first.stream_url(), "http://air.radiorecord.ru:8102/tm_320");
    }

    #[test]
    fn parses_channels_and_overrides() {
        let cfg = RadioConfig::parse(
            r#"
            device = "usb"
            volume = 35
            start_channel = 2

            [[channels]]
            title = "One"
            url = "http://example.test/one"

            [[channels]]
            title = "Two"
            url = "http://example.test/two"

            [playback]
            buffer_seconds = 12.5
            high_watermark_ms = 2000

            [http]
            connect_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(cfg.device.as_deref(), Some("usb"));
        assert_eq!(cfg.volume, Some(35));
        assert_eq!(cfg.start_channel, Some(2));
        assert_eq!(cfg.channel_list().unwrap().len(), 2);

        let playback = cfg.playback_config();
        assert_eq!(playback.buffer_seconds, 12.5);
        assert_eq!(playback.high_watermark, Duration::from_secs(2));
        assert_eq!(playback.low_watermark, Duration::from_millis(500));

        let http = cfg.http_config();
        assert_eq!(http.connect_timeout, Duration::from_millis(2500));
        assert_eq!(http.response_timeout, Duration::from_secs(10));
    }

    #[test]
    fn blank_channel_url_is_rejected() {
        let cfg = RadioConfig::parse(
            r#"
            [[channels]]
            title = "Broken"
            url = "   "
            "#,
        )
        .unwrap();
        let err = cfg.channel_list().unwrap_err();
        assert!(format!("{err:#}").contains("channel #1"));
    }

    #[test]
    fn empty_channel_list_is_rejected() {
        let cfg = RadioConfig::parse("channels = []").unwrap();
        assert!(cfg.channel_list().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(RadioConfig::parse("colume = 3").is_err());
    }
}
