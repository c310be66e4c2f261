//! Frame decoding stage.
//!
//! A [`DecoderFactory`] builds a stateful [`FrameDecoder`] from the first frame of a
//! stream. The decoder's output format is fixed from then on and sizes the ring buffer.

use symphonia::core::audio::{Layout, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use crate::error::StreamError;
use crate::ring_buffer::SampleFormat;
use crate::source::{ChannelMode, Frame};

/// Scratch space handed to [`FrameDecoder::decompress`].
///
/// Far larger than one decoded MP3 frame (1152 stereo 16-bit samples = 4608 bytes).
pub const DECODE_SCRATCH_BYTES: usize = 64 * 1024;

/// Stateful compressed-frame to PCM converter.
pub trait FrameDecoder: Send {
    /// PCM layout written by `decompress`.
    fn output_format(&self) -> SampleFormat;

    /// Decode one frame into `out`, returning the number of PCM bytes written.
    ///
    /// `Ok(0)` means the frame produced no audio (e.g. a corrupt frame that was skipped).
    fn decompress(&mut self, frame: &Frame, out: &mut [u8]) -> Result<usize, StreamError>;
}

/// Builds a decoder from a stream's first frame.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, first: &Frame) -> Result<Box<dyn FrameDecoder>, StreamError>;
}

/// Symphonia-backed MP3 decoder factory producing signed 16-bit little-endian PCM.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mp3DecoderFactory;

impl DecoderFactory for Mp3DecoderFactory {
    fn create(&self, first: &Frame) -> Result<Box<dyn FrameDecoder>, StreamError> {
        let layout = match first.format.channel_mode {
            ChannelMode::Mono => Layout::Mono,
            _ => Layout::Stereo,
        };
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_MP3)
            .with_sample_rate(first.format.sample_rate)
            .with_channels(layout.into_channels());

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| StreamError::Decode(format!("create decoder: {e}")))?;

        let format = SampleFormat {
            sample_rate: first.format.sample_rate,
            channels: first.format.channel_mode.channel_count(),
            bits_per_sample: 16,
        };
        tracing::info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            bit_rate_kbps = first.format.bit_rate_kbps,
            frame_length = first.format.frame_length,
            "decoder created"
        );
        Ok(Box::new(Mp3FrameDecoder {
            decoder,
            format,
            samples: None,
        }))
    }
}

struct Mp3FrameDecoder {
    decoder: Box<dyn Decoder>,
    format: SampleFormat,
    samples: Option<SampleBuffer<i16>>,
}

impl FrameDecoder for Mp3FrameDecoder {
    fn output_format(&self) -> SampleFormat {
        self.format
    }

    fn decompress(&mut self, frame: &Frame, out: &mut [u8]) -> Result<usize, StreamError> {
        let packet = Packet::new_from_slice(
            0,
            frame.timestamp,
            u64::from(frame.format.samples_per_frame),
            &frame.data,
        );
        let decoded = match self.decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable frame: {e}");
                return Ok(0);
            }
            Err(e) => return Err(StreamError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        if spec.rate != self.format.sample_rate
            || spec.channels.count() != self.format.channels as usize
        {
            return Err(StreamError::Decode(format!(
                "stream format changed to {} Hz / {} ch",
                spec.rate,
                spec.channels.count()
            )));
        }

        let frames = decoded.frames();
        if frames == 0 {
            return Ok(0);
        }
        let needs_alloc = self
            .samples
            .as_ref()
            .map(|b| b.capacity() < frames * spec.channels.count())
            .unwrap_or(true);
        if needs_alloc {
            self.samples = Some(SampleBuffer::<i16>::new(decoded.capacity() as u64, spec));
        }
        let Some(samples) = self.samples.as_mut() else {
            return Ok(0);
        };
        samples.copy_interleaved_ref(decoded);

        write_le_samples(samples.samples(), out)
    }
}

/// Serialize samples as little-endian bytes into `out`.
fn write_le_samples(samples: &[i16], out: &mut [u8]) -> Result<usize, StreamError> {
    let bytes = samples.len() * 2;
    if bytes > out.len() {
        return Err(StreamError::Decode(format!(
            "decoded frame ({bytes} bytes) exceeds scratch space ({} bytes)",
            out.len()
        )));
    }
    for (dst, s) in out.chunks_exact_mut(2).zip(samples) {
        dst.copy_from_slice(&s.to_le_bytes());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FrameFormat;

    fn frame(mode: ChannelMode, rate: u32) -> Frame {
        Frame {
            data: vec![0xFF, 0xFB, 0x90, 0x64],
            format: FrameFormat {
                sample_rate: rate,
                channel_mode: mode,
                bit_rate_kbps: 128,
                frame_length: 417,
                samples_per_frame: 1152,
            },
            timestamp: 0,
        }
    }

    #[test]
    fn create_fixes_output_format_from_first_frame() {
        let dec = Mp3DecoderFactory
            .create(&frame(ChannelMode::JointStereo, 44_100))
            .unwrap();
        let fmt = dec.output_format();
        assert_eq!(fmt.sample_rate, 44_100);
        assert_eq!(fmt.channels, 2);
        assert_eq!(fmt.bits_per_sample, 16);
        assert_eq!(fmt.bytes_per_second(), 176_400);
    }

    #[test]
    fn create_maps_mono_to_one_channel() {
        let dec = Mp3DecoderFactory.create(&frame(ChannelMode::Mono, 22_050)).unwrap();
        assert_eq!(dec.output_format().channels, 1);
    }

    #[test]
    fn write_le_samples_serializes_little_endian() {
        let mut out = [0u8; 6];
        let n = write_le_samples(&[1, -2, 0x1234], &mut out).unwrap();
        assert_eq!(n, 6);
        assert_eq!(out, [0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
    }

    #[test]
    fn write_le_samples_rejects_small_scratch() {
        let mut out = [0u8; 3];
        assert!(matches!(
            write_le_samples(&[1, 2], &mut out),
            Err(StreamError::Decode(_))
        ));
    }

    #[test]
    fn scratch_holds_a_full_decoded_frame() {
        assert!(DECODE_SCRATCH_BYTES >= 1152 * 2 * 2);
    }
}
