//! Ingestion worker: one thread per channel activation.
//!
//! Pulls frames from the source, decodes them and appends PCM to the activation's ring
//! buffer. Cancellation is cooperative and observed once per loop iteration; a blocking
//! read delays it until the read returns.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use radio_types::EndReason;

use crate::config::PlaybackConfig;
use crate::decoder::{DECODE_SCRATCH_BYTES, DecoderFactory, FrameDecoder};
use crate::error::StreamError;
use crate::ring_buffer::RingBuffer;
use crate::session::Shared;
use crate::source::SourceOpener;

pub(crate) struct WorkerContext {
    pub(crate) generation: u64,
    pub(crate) url: String,
    pub(crate) config: PlaybackConfig,
    pub(crate) opener: Arc<dyn SourceOpener>,
    pub(crate) decoders: Arc<dyn DecoderFactory>,
    pub(crate) shared: Arc<Shared>,
}

pub(crate) struct WorkerHandle {
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn(ctx: WorkerContext) -> std::io::Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_worker = cancel.clone();
        let join = std::thread::Builder::new()
            .name(format!("radio-ingest-{}", ctx.generation))
            .spawn(move || worker_main(ctx, cancel_worker))?;
        Ok(Self { cancel, join })
    }

    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Block until the worker thread has exited.
    pub(crate) fn join(self) {
        if self.join.join().is_err() {
            tracing::warn!("ingestion worker thread panicked");
        }
    }
}

fn worker_main(ctx: WorkerContext, cancel: Arc<AtomicBool>) {
    let generation = ctx.generation;
    let started = Instant::now();
    tracing::info!(url = %ctx.url, generation, "ingestion worker start");

    let reason = match panic::catch_unwind(AssertUnwindSafe(|| run(&ctx, &cancel))) {
        Ok(Ok(reason)) => reason,
        Ok(Err(e)) => {
            tracing::warn!(url = %ctx.url, generation, "ingestion failed: {e}");
            if let Some(kind) = e.fault_kind() {
                ctx.shared.record_fault(Some(generation), kind, e.to_string());
            }
            EndReason::Error
        }
        Err(_) => {
            tracing::error!(url = %ctx.url, generation, "ingestion worker panicked");
            EndReason::Error
        }
    };

    tracing::info!(
        generation,
        reason = ?reason,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "ingestion worker exit"
    );
    ctx.shared.worker_finished(generation, reason);
}

fn run(ctx: &WorkerContext, cancel: &AtomicBool) -> Result<EndReason, StreamError> {
    let mut source = ctx.opener.open(&ctx.url)?;
    let mut pipeline: Option<(Box<dyn FrameDecoder>, Arc<RingBuffer>)> = None;
    let mut scratch = vec![0u8; DECODE_SCRATCH_BYTES];

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Ok(EndReason::Stopped);
        }

        if let Some((_, buffer)) = &pipeline {
            if buffer.nearly_full() {
                tracing::debug!(
                    buffered_ms = buffer.buffered_duration().as_millis() as u64,
                    "buffer nearly full; backing off"
                );
                std::thread::sleep(ctx.config.backoff);
                continue;
            }
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!(url = %ctx.url, "stream ended");
                return Ok(EndReason::Eof);
            }
            Err(StreamError::Transport(message)) => {
                tracing::info!(url = %ctx.url, "stream transport closed: {message}");
                return Ok(EndReason::Error);
            }
            Err(e) => return Err(e),
        };

        if pipeline.is_none() {
            let decoder = ctx.decoders.create(&frame)?;
            let format = decoder.output_format();
            let buffer = Arc::new(RingBuffer::new(format, ctx.config.buffer_duration()));
            tracing::info!(
                sample_rate = format.sample_rate,
                channels = format.channels,
                capacity_bytes = buffer.capacity_bytes(),
                "first frame decoded; buffering"
            );

            let Some(sink) = ctx.shared.session_sink(ctx.generation) else {
                return Ok(EndReason::Stopped);
            };
            sink.init(buffer.clone())?;
            if !ctx.shared.buffer_ready(ctx.generation, buffer.clone()) {
                return Ok(EndReason::Stopped);
            }
            pipeline = Some((decoder, buffer));
        }
        let Some((decoder, buffer)) = pipeline.as_mut() else {
            continue;
        };

        let n = decoder.decompress(&frame, &mut scratch)?;
        if n > 0 && buffer.write(&scratch[..n]) < n {
            // Closed by a retiring controller.
            return Ok(EndReason::Stopped);
        }
    }
}
