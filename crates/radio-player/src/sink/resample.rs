//! Incremental resample stage.
//!
//! Uses Rubato to convert decoded interleaved `f32` audio from the stream rate to the
//! output device rate. Input arrives in arbitrary-sized pieces from the sink pump and is
//! processed in fixed chunks.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub(crate) struct StreamResampler {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out_interleaved: Vec<f32>,
    indexing: Indexing,
}

impl StreamResampler {
    pub(crate) fn new(
        src_rate: u32,
        dst_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self> {
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let chunk_frames = chunk_frames.max(1);
        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init error: {e}"))?;

        let out_frames = ((chunk_frames as f64 * f_ratio).ceil() as usize + 1) * 2;
        tracing::info!(src_rate, dst_rate, chunk_frames, "resampling");

        Ok(Self {
            resampler: Box::new(resampler),
            channels,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            out_interleaved: vec![0.0; out_frames * channels],
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
        })
    }

    /// Upper bound of samples emitted for one input chunk.
    pub(crate) fn max_output_samples(&self) -> usize {
        self.out_interleaved.len()
    }

    /// Input samples needed to complete one chunk.
    pub(crate) fn chunk_samples(&self) -> usize {
        self.chunk_frames * self.channels
    }

    /// Queue `input` and resample every complete chunk, handing each output block to `emit`.
    pub(crate) fn process(&mut self, input: &[f32], mut emit: impl FnMut(&[f32])) -> Result<()> {
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_samples();

        while self.pending.len() >= chunk_samples {
            let input_adapter = InterleavedSlice::new(
                &self.pending[..chunk_samples],
                self.channels,
                self.chunk_frames,
            )
            .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;

            let out_capacity_frames = self.out_interleaved.len() / self.channels;
            let mut output_adapter = InterleavedSlice::new_mut(
                &mut self.out_interleaved,
                self.channels,
                out_capacity_frames,
            )
            .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

            self.indexing.input_offset = 0;
            self.indexing.output_offset = 0;
            self.indexing.partial_len = None;

            let (_nbr_in, nbr_out) = self
                .resampler
                .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
                .map_err(|e| anyhow!("resampler process error: {e}"))?;

            emit(&self.out_interleaved[..nbr_out * self.channels]);
            self.pending.drain(..chunk_samples);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_input_until_a_chunk_is_complete() {
        let mut r = StreamResampler::new(44_100, 48_000, 2, 256).unwrap();
        let mut emitted = 0usize;
        r.process(&vec![0.0; 200], |out| emitted += out.len()).unwrap();
        assert_eq!(emitted, 0);
        r.process(&vec![0.0; 400], |out| emitted += out.len()).unwrap();
        assert!(emitted > 0);
        assert!(emitted <= r.max_output_samples());
    }

    #[test]
    fn output_bound_covers_upsampling_ratio() {
        let r = StreamResampler::new(22_050, 48_000, 1, 1024).unwrap();
        assert!(r.max_output_samples() >= 1024 * 48_000 / 22_050);
        assert_eq!(r.chunk_samples(), 1024);
    }
}
