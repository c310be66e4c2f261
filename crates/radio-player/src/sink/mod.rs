//! Output stage: renders buffered PCM on an audio device.
//!
//! [`OutputSink`] is the seam the controller and the ingestion worker talk to. The CPAL
//! implementation keeps the device and its stream on a dedicated thread (CPAL streams are
//! not `Send`) and drives it over a command channel:
//!
//! ```text
//! RingBuffer (i16 LE) -> pump -> [resample] -> SampleQueue (f32) -> device callback
//! ```
//!
//! The pump only runs while playing, so a paused or buffering session leaves the ring
//! buffer untouched.

pub mod device;
mod playback;
mod queue;
mod resample;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::config::PlaybackConfig;
use crate::error::{PlayerError, StreamError};
use crate::ring_buffer::RingBuffer;
use device::OutputTarget;
use playback::CallbackShared;
use queue::{SampleQueue, calc_max_buffered_samples};
use resample::StreamResampler;

/// Audio output bound to one channel activation.
///
/// `init` attaches the buffer once the decoded format is known. Rendering starts with
/// `play` and is suspended by `pause`; `stop` releases the stream; `dispose` releases
/// the device. Every method may be called from any thread.
pub trait OutputSink: Send + Sync {
    fn init(&self, buffer: Arc<RingBuffer>) -> Result<(), StreamError>;
    fn play(&self);
    fn pause(&self);
    fn stop(&self);
    /// Linear gain in `0.0..=1.0`.
    fn set_volume(&self, gain: f32);
    fn dispose(&self);
}

/// Opens an output device for a new activation.
pub trait SinkFactory: Send + Sync {
    fn open(&self) -> Result<Arc<dyn OutputSink>, PlayerError>;
}

/// Names of the default host's output devices.
pub fn list_devices() -> Result<Vec<String>> {
    device::list_device_names(&cpal::default_host())
}

/// Poll period of the output thread when no command arrives.
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

/// Seconds of device-rate audio held between the pump and the callback.
const QUEUE_SECONDS: f32 = 0.25;

/// [`SinkFactory`] for CPAL devices.
#[derive(Clone, Debug)]
pub struct CpalSinkFactory {
    device: Option<String>,
    playback: PlaybackConfig,
}

impl CpalSinkFactory {
    /// `device` is a case-insensitive name substring; `None` selects the host default.
    pub fn new(device: Option<String>, playback: PlaybackConfig) -> Self {
        Self { device, playback }
    }
}

impl SinkFactory for CpalSinkFactory {
    fn open(&self) -> Result<Arc<dyn OutputSink>, PlayerError> {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let gain = Arc::new(AtomicU32::new(1.0f32.to_bits()));

        let device = self.device.clone();
        let playback = self.playback.clone();
        let thread_gain = gain.clone();
        let join = std::thread::Builder::new()
            .name("radio-output".to_string())
            .spawn(move || output_thread_main(device, playback, thread_gain, ready_tx, cmd_rx))
            .map_err(|e| PlayerError::Device(format!("spawn output thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(name)) => {
                tracing::info!(device = %name, "output device opened");
                Ok(Arc::new(CpalSink {
                    cmd_tx,
                    gain,
                    join: Mutex::new(Some(join)),
                }))
            }
            Ok(Err(message)) => {
                let _ = join.join();
                Err(PlayerError::Device(message))
            }
            Err(_) => {
                let _ = join.join();
                Err(PlayerError::Device("output thread exited".to_string()))
            }
        }
    }
}

enum SinkCommand {
    Init {
        buffer: Arc<RingBuffer>,
        reply: Sender<Result<(), String>>,
    },
    Play,
    Pause,
    Stop,
    Dispose,
}

/// Handle to a device owned by the output thread.
pub struct CpalSink {
    cmd_tx: Sender<SinkCommand>,
    gain: Arc<AtomicU32>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl OutputSink for CpalSink {
    fn init(&self, buffer: Arc<RingBuffer>) -> Result<(), StreamError> {
        let (reply, reply_rx) = crossbeam_channel::bounded(1);
        self.cmd_tx
            .send(SinkCommand::Init { buffer, reply })
            .map_err(|_| StreamError::Output("output thread is gone".to_string()))?;
        match reply_rx.recv() {
            Ok(result) => result.map_err(StreamError::Output),
            Err(_) => Err(StreamError::Output("output thread exited".to_string())),
        }
    }

    fn play(&self) {
        let _ = self.cmd_tx.send(SinkCommand::Play);
    }

    fn pause(&self) {
        let _ = self.cmd_tx.send(SinkCommand::Pause);
    }

    fn stop(&self) {
        let _ = self.cmd_tx.send(SinkCommand::Stop);
    }

    fn set_volume(&self, gain: f32) {
        let gain = if gain.is_finite() { gain.clamp(0.0, 1.0) } else { 0.0 };
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    fn dispose(&self) {
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            let _ = self.cmd_tx.send(SinkCommand::Dispose);
            if join.join().is_err() {
                tracing::warn!("output thread panicked");
            }
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn output_thread_main(
    device_name: Option<String>,
    playback: PlaybackConfig,
    gain: Arc<AtomicU32>,
    ready: Sender<Result<String, String>>,
    cmd_rx: Receiver<SinkCommand>,
) {
    let host = cpal::default_host();
    let device = match device::pick_device(&host, device_name.as_deref()) {
        Ok(d) => d,
        Err(e) => {
            let _ = ready.send(Err(format!("{e:#}")));
            return;
        }
    };
    let name = device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    if ready.send(Ok(name)).is_err() {
        return;
    }

    let mut active: Option<ActiveOutput> = None;
    let mut playing = false;
    loop {
        match cmd_rx.recv_timeout(PUMP_INTERVAL) {
            Ok(SinkCommand::Init { buffer, reply }) => {
                if let Some(old) = active.take() {
                    old.finish();
                }
                playing = false;
                let result = match ActiveOutput::start(&device, buffer, &playback, gain.clone()) {
                    Ok(out) => {
                        active = Some(out);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!("output init failed: {e:#}");
                        Err(format!("{e:#}"))
                    }
                };
                let _ = reply.send(result);
            }
            Ok(SinkCommand::Play) => {
                if let Some(out) = active.as_ref() {
                    match out.play() {
                        Ok(()) => playing = true,
                        Err(e) => tracing::warn!("output play failed: {e:#}"),
                    }
                }
            }
            Ok(SinkCommand::Pause) => {
                if let Some(out) = active.as_ref() {
                    out.pause();
                }
                playing = false;
            }
            Ok(SinkCommand::Stop) => {
                if let Some(out) = active.take() {
                    out.finish();
                }
                playing = false;
            }
            Ok(SinkCommand::Dispose) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if playing {
            if let Some(out) = active.as_mut() {
                if let Err(e) = out.feeder.pump() {
                    tracing::warn!("output pump failed: {e:#}");
                    playing = false;
                }
            }
        }
    }

    if let Some(out) = active.take() {
        out.finish();
    }
    tracing::debug!("output thread exit");
}

/// An open CPAL stream fed from one ring buffer.
struct ActiveOutput {
    stream: cpal::Stream,
    feeder: PcmFeeder,
    paused: Arc<AtomicBool>,
    underrun_frames: Arc<AtomicU64>,
    underrun_events: Arc<AtomicU64>,
}

impl ActiveOutput {
    fn start(
        device: &cpal::Device,
        buffer: Arc<RingBuffer>,
        playback: &PlaybackConfig,
        gain: Arc<AtomicU32>,
    ) -> Result<Self> {
        let format = buffer.format();
        if format.bits_per_sample != 16 {
            return Err(anyhow!(
                "unsupported PCM depth: {} bits",
                format.bits_per_sample
            ));
        }

        let supported = device::pick_output_config(
            device,
            OutputTarget {
                rate: format.sample_rate,
                channels: format.channels,
            },
        )?;
        let sample_format = supported.sample_format();
        let mut config = supported.config();
        if let Some(buffer_size) = device::pick_buffer_size(&supported) {
            config.buffer_size = buffer_size;
        }
        let device_rate = config.sample_rate;
        let channels = (format.channels as usize).max(1);

        let resampler = if device_rate != format.sample_rate {
            Some(
                StreamResampler::new(
                    format.sample_rate,
                    device_rate,
                    channels,
                    playback.chunk_frames,
                )
                .context("create resampler")?,
            )
        } else {
            None
        };

        let chunk_frames = playback.chunk_frames.max(1);
        let per_pump = resampler
            .as_ref()
            .map(|r| r.max_output_samples())
            .unwrap_or(chunk_frames * channels);
        let queue = Arc::new(SampleQueue::new(
            channels,
            calc_max_buffered_samples(device_rate, channels, QUEUE_SECONDS).max(per_pump * 2),
        ));

        let paused = Arc::new(AtomicBool::new(true));
        let underrun_frames = Arc::new(AtomicU64::new(0));
        let underrun_events = Arc::new(AtomicU64::new(0));
        let stream = playback::build_output_stream(
            device,
            &config,
            sample_format,
            &queue,
            CallbackShared {
                refill_max_frames: playback.refill_max_frames,
                paused: paused.clone(),
                gain,
                underrun_frames: underrun_frames.clone(),
                underrun_events: underrun_events.clone(),
            },
        )?;

        tracing::info!(
            src_rate = format.sample_rate,
            device_rate,
            device_channels = config.channels,
            sample_format = ?sample_format,
            "output stream ready"
        );

        Ok(Self {
            stream,
            feeder: PcmFeeder {
                bytes: vec![0; chunk_frames * format.block_align()],
                samples: Vec::with_capacity(chunk_frames * channels),
                per_pump,
                buffer,
                queue,
                resampler,
            },
            paused,
            underrun_frames,
            underrun_events,
        })
    }

    fn play(&self) -> Result<()> {
        self.paused.store(false, Ordering::Relaxed);
        self.stream.play().context("start output stream")
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        if let Err(e) = self.stream.pause() {
            tracing::debug!("stream pause not supported: {e}");
        }
    }

    fn finish(self) {
        self.paused.store(true, Ordering::Relaxed);
        let queued_frames = self.feeder.queue.len_frames();
        self.feeder.queue.clear();
        let events = self.underrun_events.load(Ordering::Relaxed);
        if events > 0 {
            tracing::info!(
                underrun_events = events,
                underrun_frames = self.underrun_frames.load(Ordering::Relaxed),
                queued_frames,
                "output stream closed"
            );
        } else {
            tracing::debug!(queued_frames, "output stream closed");
        }
    }
}

/// Moves PCM from the ring buffer into the callback queue.
struct PcmFeeder {
    buffer: Arc<RingBuffer>,
    queue: Arc<SampleQueue>,
    resampler: Option<StreamResampler>,
    bytes: Vec<u8>,
    samples: Vec<f32>,
    per_pump: usize,
}

impl PcmFeeder {
    /// Transfer whole chunks while the queue has room and the ring buffer has data.
    fn pump(&mut self) -> Result<()> {
        while self.queue.free_samples() >= self.per_pump {
            let n = self.buffer.read_into(&mut self.bytes);
            if n == 0 {
                break;
            }
            self.samples.clear();
            self.samples.extend(
                self.bytes[..n]
                    .chunks_exact(2)
                    .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0),
            );

            match self.resampler.as_mut() {
                Some(r) => {
                    let queue = &self.queue;
                    r.process(&self.samples, |out| {
                        queue.push_interleaved(out);
                    })?;
                }
                None => {
                    self.queue.push_interleaved(&self.samples);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::SampleFormat;

    fn feeder(rate: u32, chunk_frames: usize, queue_samples: usize) -> PcmFeeder {
        let format = SampleFormat {
            sample_rate: rate,
            channels: 2,
            bits_per_sample: 16,
        };
        PcmFeeder {
            buffer: Arc::new(RingBuffer::new(format, Duration::from_secs(1))),
            queue: Arc::new(SampleQueue::new(2, queue_samples)),
            resampler: None,
            bytes: vec![0; chunk_frames * format.block_align()],
            samples: Vec::new(),
            per_pump: chunk_frames * 2,
        }
    }

    #[test]
    fn pump_converts_i16_le_to_f32() {
        let mut f = feeder(1000, 4, 64);
        let pcm: Vec<u8> = [16_384i16, -32_768, 0, 32_767]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        f.buffer.write(&pcm);
        f.pump().unwrap();

        let out = f.queue.pop(8).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], -1.0);
        assert_eq!(out[2], 0.0);
        assert!(out[3] > 0.999);
        assert_eq!(f.buffer.filled_bytes(), 0);
    }

    #[test]
    fn pump_leaves_data_in_ring_when_queue_is_full() {
        let mut f = feeder(1000, 4, 8);
        f.buffer.write(&[0; 64]);
        f.pump().unwrap();
        assert_eq!(f.queue.len_frames(), 4);
        assert_eq!(f.buffer.filled_bytes(), 64 - 16);
    }
}
