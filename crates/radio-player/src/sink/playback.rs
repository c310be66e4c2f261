//! Real-time side of the output: a CPAL stream whose callback drains the
//! [`SampleQueue`] into the device, upmixing or downmixing between the decoded
//! layout and the device layout and applying the radio volume on the way.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use super::queue::SampleQueue;

/// Shared knobs and counters read or updated by the callback.
#[derive(Clone)]
pub(crate) struct CallbackShared {
    /// Max frames pulled from the queue per refill.
    pub refill_max_frames: usize,
    /// When `true` the callback outputs silence and does not drain the queue.
    pub paused: Arc<AtomicBool>,
    /// Linear gain stored as `f32` bits.
    pub gain: Arc<AtomicU32>,
    pub underrun_frames: Arc<AtomicU64>,
    pub underrun_events: Arc<AtomicU64>,
}

/// Build an output stream that plays device-rate interleaved `f32` samples from `queue`.
pub(crate) fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    shared: CallbackShared,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, shared),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    shared: CallbackShared,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (config.channels as usize).max(1);
    let state = Mutex::new(LocalBuffer {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::new(),
    });
    let queue = queue.clone();
    let refill_max_frames = shared.refill_max_frames.max(1);

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
            if shared.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }

            let gain = f32::from_bits(shared.gain.load(Ordering::Relaxed));
            let mut st = state.lock().unwrap_or_else(PoisonError::into_inner);
            let frames = data.len() / channels_out;

            for frame in 0..frames {
                if st.pos >= st.src.len() {
                    st.pos = 0;
                    st.src.clear();
                    match queue.pop(refill_max_frames) {
                        Some(v) => st.src = v,
                        None => {
                            shared.underrun_events.fetch_add(1, Ordering::Relaxed);
                            shared
                                .underrun_frames
                                .fetch_add((frames - frame) as u64, Ordering::Relaxed);
                            data[frame * channels_out..].fill(silence);
                            break;
                        }
                    }
                }
                for ch in 0..channels_out {
                    let s = next_sample_mapped(&mut st, channels_out, ch) * gain;
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(s);
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

struct LocalBuffer {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

/// Next sample for device channel `dst_ch`; the read position moves after the frame's last channel.
fn next_sample_mapped(st: &mut LocalBuffer, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }

    let frame_start = st.pos;
    let get_src = |ch: usize, st: &LocalBuffer| -> f32 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0.0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (1, 1) | (1, 2) => get_src(0, st),
        (2, 2) => get_src(dst_ch, st),
        (2, 1) => 0.5 * (get_src(0, st) + get_src(1, st)),
        _ => get_src(dst_ch.min(st.src_channels.saturating_sub(1)), st),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}
