//! In-crate fakes for worker and controller tests.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::channel::{Channel, ChannelList};
use crate::decoder::{DecoderFactory, FrameDecoder};
use crate::error::{PlayerError, StreamError};
use crate::events::PlayerEvent;
use crate::ring_buffer::{RingBuffer, SampleFormat};
use crate::sink::{OutputSink, SinkFactory};
use crate::source::{ChannelMode, Frame, FrameFormat, FrameSource, SourceOpener};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// `count` channels titled `Channel i` at `http://radio.test/i`.
pub(crate) fn channels(count: usize) -> ChannelList {
    ChannelList::new(
        (0..count)
            .map(|i| {
                Channel::new(format!("Channel {i}"), format!("http://radio.test/{i}")).unwrap()
            })
            .collect(),
    )
    .unwrap()
}

/// Poll `cond` until it holds; panics after a few seconds.
pub(crate) fn wait_for(mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < WAIT_LIMIT, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Receive events until one matches `pred`.
pub(crate) fn expect_event(
    rx: &Receiver<PlayerEvent>,
    pred: impl Fn(&PlayerEvent) -> bool,
) -> PlayerEvent {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(event) if pred(&event) => return event,
            Ok(_) => {}
            Err(e) => panic!("expected event not received: {e}"),
        }
    }
}

/// Number of sources alive right now, and the most ever alive at once.
#[derive(Clone, Default)]
pub(crate) struct LiveCounter {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl LiveCounter {
    pub(crate) fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> LiveGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        LiveGuard(self.clone())
    }
}

struct LiveGuard(LiveCounter);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Frame source yielding a scripted number of tiny frames.
pub(crate) struct ScriptedSource {
    remaining: Option<usize>,
    delay: Duration,
    next_ts: u64,
    _guard: Option<LiveGuard>,
}

impl ScriptedSource {
    pub(crate) fn frames(count: usize) -> Self {
        Self {
            remaining: Some(count),
            delay: Duration::ZERO,
            next_ts: 0,
            _guard: None,
        }
    }

    /// Ends before the first frame.
    pub(crate) fn empty() -> Self {
        Self::frames(0)
    }

    /// Never ends; one frame per millisecond.
    pub(crate) fn endless() -> Self {
        Self {
            remaining: None,
            delay: Duration::from_millis(1),
            next_ts: 0,
            _guard: None,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        if let Some(left) = self.remaining.as_mut() {
            if *left == 0 {
                return Ok(None);
            }
            *left -= 1;
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let timestamp = self.next_ts;
        self.next_ts += u64::from(FAKE_SAMPLES_PER_FRAME);
        Ok(Some(Frame {
            data: vec![0; 16],
            format: FrameFormat {
                sample_rate: FAKE_FORMAT.sample_rate,
                channel_mode: ChannelMode::Mono,
                bit_rate_kbps: 32,
                frame_length: 16,
                samples_per_frame: FAKE_SAMPLES_PER_FRAME,
            },
            timestamp,
        }))
    }
}

type SourceScript = dyn Fn() -> ScriptedSource + Send + Sync;

/// Opener handing out [`ScriptedSource`]s, or failing every connection.
#[derive(Clone)]
pub(crate) struct FakeOpener {
    script: Option<Arc<SourceScript>>,
    live: LiveCounter,
    opens: Arc<AtomicUsize>,
    last_url: Arc<Mutex<Option<String>>>,
}

impl FakeOpener {
    pub(crate) fn new(script: impl Fn() -> ScriptedSource + Send + Sync + 'static) -> Self {
        Self {
            script: Some(Arc::new(script)),
            live: LiveCounter::default(),
            opens: Arc::new(AtomicUsize::new(0)),
            last_url: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            script: None,
            ..Self::new(ScriptedSource::empty)
        }
    }

    pub(crate) fn live(&self) -> LiveCounter {
        self.live.clone()
    }

    pub(crate) fn open_calls(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn last_url(&self) -> Option<String> {
        self.last_url.lock().unwrap().clone()
    }
}

impl SourceOpener for FakeOpener {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>, StreamError> {
        *self.last_url.lock().unwrap() = Some(url.to_string());
        self.opens.fetch_add(1, Ordering::SeqCst);
        let Some(script) = &self.script else {
            return Err(StreamError::Connection {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        };
        let mut source = script();
        source._guard = Some(self.live.enter());
        Ok(Box::new(source))
    }
}

/// 8 kHz mono 16-bit: 16 000 bytes per second.
const FAKE_FORMAT: SampleFormat = SampleFormat {
    sample_rate: 8_000,
    channels: 1,
    bits_per_sample: 16,
};

/// 100 ms of audio per frame.
const FAKE_SAMPLES_PER_FRAME: u32 = 800;

#[derive(Default)]
pub(crate) struct FakeDecoderFactory;

impl DecoderFactory for FakeDecoderFactory {
    fn create(&self, _first: &Frame) -> Result<Box<dyn FrameDecoder>, StreamError> {
        Ok(Box::new(FakeDecoder))
    }
}

struct FakeDecoder;

impl FrameDecoder for FakeDecoder {
    fn output_format(&self) -> SampleFormat {
        FAKE_FORMAT
    }

    fn decompress(&mut self, frame: &Frame, out: &mut [u8]) -> Result<usize, StreamError> {
        let n = frame.format.samples_per_frame as usize * FAKE_FORMAT.block_align();
        out[..n].fill(0);
        Ok(n)
    }
}

/// Output sink that records calls.
pub(crate) struct FakeSink {
    gain: AtomicU32,
    inits: AtomicUsize,
    plays: AtomicUsize,
    pauses: AtomicUsize,
    disposed: AtomicBool,
    dispose_counter: Arc<AtomicUsize>,
    buffer: Mutex<Option<Arc<RingBuffer>>>,
}

impl Default for FakeSink {
    fn default() -> Self {
        Self::with_counter(Arc::new(AtomicUsize::new(0)))
    }
}

impl FakeSink {
    fn with_counter(dispose_counter: Arc<AtomicUsize>) -> Self {
        Self {
            gain: AtomicU32::new(1.0f32.to_bits()),
            inits: AtomicUsize::new(0),
            plays: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            dispose_counter,
            buffer: Mutex::new(None),
        }
    }

    pub(crate) fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::SeqCst))
    }

    pub(crate) fn init_calls(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub(crate) fn play_calls(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub(crate) fn pause_calls(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl OutputSink for FakeSink {
    fn init(&self, buffer: Arc<RingBuffer>) -> Result<(), StreamError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        *self.buffer.lock().unwrap() = Some(buffer);
        Ok(())
    }

    fn play(&self) {
        self.plays.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.buffer.lock().unwrap().take();
    }

    fn set_volume(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::SeqCst);
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.dispose_counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Sink factory that tracks every sink it opened.
#[derive(Clone, Default)]
pub(crate) struct FakeSinkFactory {
    fail: bool,
    sinks: Arc<Mutex<Vec<Arc<FakeSink>>>>,
    disposed: Arc<AtomicUsize>,
}

impl FakeSinkFactory {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn opened(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    pub(crate) fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn last(&self) -> Option<Arc<FakeSink>> {
        self.sinks.lock().unwrap().last().cloned()
    }
}

impl SinkFactory for FakeSinkFactory {
    fn open(&self) -> Result<Arc<dyn OutputSink>, PlayerError> {
        if self.fail {
            return Err(PlayerError::Device("no output device".to_string()));
        }
        let sink = Arc::new(FakeSink::with_counter(self.disposed.clone()));
        self.sinks.lock().unwrap().push(sink.clone());
        Ok(sink)
    }
}
