//! Compressed frame sources.
//!
//! A [`SourceOpener`] turns a stream URL into a [`FrameSource`]: a finite,
//! non-restartable sequence of compressed MP3 frames. The HTTP implementation issues a
//! single GET and lets Symphonia's MP3 demuxer find frame boundaries in the body.

use std::io::{self, Read};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::HttpStreamConfig;
use crate::error::StreamError;

/// MPEG audio channel mode from the frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    Stereo,
    JointStereo,
    DualChannel,
    Mono,
}

impl ChannelMode {
    pub fn channel_count(self) -> u16 {
        match self {
            ChannelMode::Mono => 1,
            _ => 2,
        }
    }
}

/// Format parameters carried by every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameFormat {
    pub sample_rate: u32,
    pub channel_mode: ChannelMode,
    /// Bit rate in kbit/s, 0 when unknown.
    pub bit_rate_kbps: u32,
    /// Frame length in bytes including the header, 0 when unknown.
    pub frame_length: usize,
    pub samples_per_frame: u32,
}

/// One compressed audio frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub format: FrameFormat,
    /// Presentation timestamp in samples since stream start.
    pub timestamp: u64,
}

/// Sequence of compressed frames from one connection.
pub trait FrameSource: Send {
    /// Next frame, or `Ok(None)` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>, StreamError>;
}

/// Opens a [`FrameSource`] for a stream URL.
pub trait SourceOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, StreamError>;
}

/// Opens MP3 streams over HTTP.
#[derive(Clone, Debug, Default)]
pub struct HttpStreamOpener {
    config: HttpStreamConfig,
}

impl HttpStreamOpener {
    pub fn new(config: HttpStreamConfig) -> Self {
        Self { config }
    }
}

impl SourceOpener for HttpStreamOpener {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, StreamError> {
        let connection_error = |message: String| StreamError::Connection {
            url: url.to_string(),
            message,
        };
        let start = Instant::now();
        let resp = ureq::get(url)
            .config()
            .timeout_connect(Some(self.config.connect_timeout))
            .timeout_recv_response(Some(self.config.response_timeout))
            .build()
            .header("User-Agent", &self.config.user_agent)
            .call()
            .map_err(|e| connection_error(e.to_string()))?;
        let elapsed = start.elapsed();
        if elapsed > Duration::from_millis(1500) {
            tracing::warn!(url = %url, took_ms = elapsed.as_millis() as u64, "stream connect slow");
        }

        let content_type = resp
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        tracing::info!(
            url = %url,
            status = resp.status().as_u16(),
            content_type = content_type.as_deref().unwrap_or(""),
            "stream connected"
        );

        let (_, body) = resp.into_parts();
        Ok(Box::new(Mp3StreamSource::from_reader(body.into_reader())))
    }
}

/// Adapts a `Send` reader to the `Sync` bound Symphonia puts on media sources.
struct SyncReader<R>(Mutex<R>);

impl<R: Read> Read for SyncReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.get_mut() {
            Ok(r) => r.read(buf),
            Err(poisoned) => poisoned.into_inner().read(buf),
        }
    }
}

/// MP3 frame source over any unseekable byte stream.
///
/// The demuxer is created lazily on the first `next_frame`, so a stream that closes
/// before delivering any audio reports end-of-stream instead of failing to open.
pub struct Mp3StreamSource {
    pending: Option<MediaSourceStream>,
    reader: Option<Box<dyn FormatReader>>,
    track_id: u32,
    fallback: Option<FrameFormat>,
}

impl Mp3StreamSource {
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        let source = ReadOnlySource::new(SyncReader(Mutex::new(reader)));
        Self {
            pending: Some(MediaSourceStream::new(Box::new(source), Default::default())),
            reader: None,
            track_id: 0,
            fallback: None,
        }
    }

    /// Probe the stream on first use. Returns `Ok(false)` when the stream ended first.
    fn ensure_reader(&mut self) -> Result<bool, StreamError> {
        if self.reader.is_some() {
            return Ok(true);
        }
        let Some(mss) = self.pending.take() else {
            return Ok(false);
        };

        let mut hint = Hint::new();
        hint.with_extension("mp3").mime_type("audio/mpeg");
        let probed = match symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        ) {
            Ok(p) => p,
            Err(e) => {
                return match classify(e) {
                    None => Ok(false),
                    Some(StreamError::Transport(msg)) => Err(StreamError::Transport(msg)),
                    Some(other) => Err(StreamError::Decode(format!("probe: {other}"))),
                };
            }
        };

        let reader = probed.format;
        let track = reader
            .default_track()
            .ok_or_else(|| StreamError::Decode("no audio track in stream".to_string()))?;
        self.track_id = track.id;
        self.fallback = fallback_format(&track.codec_params);
        self.reader = Some(reader);
        Ok(true)
    }
}

impl FrameSource for Mp3StreamSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        if !self.ensure_reader()? {
            return Ok(None);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        loop {
            let packet = match reader.next_packet() {
                Ok(p) => p,
                Err(e) => {
                    return match classify(e) {
                        None => Ok(None),
                        Some(err) => Err(err),
                    };
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let format = match FrameHeader::parse(packet.buf()).or(self.fallback) {
                Some(f) => f,
                None => {
                    tracing::debug!(bytes = packet.buf().len(), "skipping frame without header");
                    continue;
                }
            };
            return Ok(Some(Frame {
                timestamp: packet.ts(),
                data: packet.buf().to_vec(),
                format,
            }));
        }
    }
}

/// Map a demuxer error to a stream error, or `None` for a clean end of stream.
fn classify(err: SymphoniaError) -> Option<StreamError> {
    match err {
        SymphoniaError::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof => None,
        SymphoniaError::IoError(e) => Some(StreamError::Transport(e.to_string())),
        SymphoniaError::ResetRequired => {
            Some(StreamError::Transport("stream format changed".to_string()))
        }
        other => Some(StreamError::Decode(other.to_string())),
    }
}

fn fallback_format(params: &symphonia::core::codecs::CodecParameters) -> Option<FrameFormat> {
    let sample_rate = params.sample_rate?;
    let channel_mode = match params.channels.map(|c| c.count()) {
        Some(1) => ChannelMode::Mono,
        Some(_) => ChannelMode::Stereo,
        None => return None,
    };
    Some(FrameFormat {
        sample_rate,
        channel_mode,
        bit_rate_kbps: 0,
        frame_length: 0,
        samples_per_frame: params.max_frames_per_packet.unwrap_or(1152) as u32,
    })
}

/// MPEG-1/2/2.5 Layer III frame header reader.
pub struct FrameHeader;

const BITRATES_V1_L3: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const BITRATES_V2_L3: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

impl FrameHeader {
    /// Read the format from the first four bytes of a Layer III frame.
    ///
    /// Returns `None` for anything that is not a valid Layer III header (free-format
    /// bit rates included).
    pub fn parse(bytes: &[u8]) -> Option<FrameFormat> {
        let h = u32::from_be_bytes(bytes.get(..4)?.try_into().ok()?);
        if h >> 21 != 0x7ff {
            return None;
        }
        let version = (h >> 19) & 0b11;
        let layer = (h >> 17) & 0b11;
        let bitrate_index = ((h >> 12) & 0b1111) as usize;
        let rate_index = ((h >> 10) & 0b11) as usize;
        let padding = ((h >> 9) & 1) as usize;
        let mode = (h >> 6) & 0b11;

        if layer != 0b01 || version == 0b01 || bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let base_rate = [44_100u32, 48_000, 32_000].get(rate_index).copied()?;
        let (sample_rate, bit_rate_kbps, samples_per_frame, slot_factor) = match version {
            0b11 => (base_rate, BITRATES_V1_L3[bitrate_index], 1152, 144),
            0b10 => (base_rate / 2, BITRATES_V2_L3[bitrate_index], 576, 72),
            _ => (base_rate / 4, BITRATES_V2_L3[bitrate_index], 576, 72),
        };
        let frame_length =
            (slot_factor * bit_rate_kbps as usize * 1000) / sample_rate as usize + padding;
        let channel_mode = match mode {
            0b00 => ChannelMode::Stereo,
            0b01 => ChannelMode::JointStereo,
            0b10 => ChannelMode::DualChannel,
            _ => ChannelMode::Mono,
        };

        Some(FrameFormat {
            sample_rate,
            channel_mode,
            bit_rate_kbps,
            frame_length,
            samples_per_frame,
        })
    }
}
