//! Sample-rate conversion.
//!
//! - [`resample`]: linear interpolation used for uplink capture blocks and for
//!   converting whole frames whose rate differs from the open output sink.
//! - [`DeviceRateConverter`]: streaming Rubato sinc conversion from the session
//!   rate to the output device rate, run inside the output callback when the
//!   device cannot open a stream at the session rate.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Linearly resample a mono block from `in_rate` to `out_rate`.
///
/// Equal rates return a copy. Otherwise the output has `floor(len * out / in)`
/// samples; output `i` interpolates between `input[floor(x)]` and the next sample
/// (clamped to the last one) at `x = i * in / out`.
pub fn resample(input: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
    if in_rate == out_rate {
        return input.to_vec();
    }
    if input.is_empty() || in_rate == 0 || out_rate == 0 {
        return Vec::new();
    }

    let out_len = (input.len() as u64 * out_rate as u64 / in_rate as u64) as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let x = (i as u64 * in_rate as u64) as f64 / out_rate as f64;
            let i0 = (x.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let frac = (x - i0 as f64) as f32;
            input[i0] * (1.0 - frac) + input[i1] * frac
        })
        .collect()
}

/// Streaming mono converter from session rate to device rate.
pub struct DeviceRateConverter {
    resampler: Async<f32>,
    chunk_frames: usize,
    input: Vec<f32>,
    output: Vec<f32>,
    out_pos: usize,
    out_len: usize,
    indexing: Indexing,
}

impl DeviceRateConverter {
    pub fn new(src_rate: u32, dst_rate: u32, chunk_frames: usize) -> Result<Self> {
        if src_rate == 0 || dst_rate == 0 {
            return Err(anyhow!("invalid conversion {src_rate} -> {dst_rate}"));
        }
        let f_ratio = dst_rate as f64 / src_rate as f64;
        let chunk_frames = chunk_frames.max(16);

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler =
            Async::<f32>::new_sinc(f_ratio, 1.1, &params, chunk_frames, 1, FixedAsync::Input)
                .map_err(|e| anyhow!("resampler init error: {e}"))?;

        let capacity = (chunk_frames as f64 * f_ratio * 1.1).ceil() as usize + chunk_frames;

        tracing::info!(from_hz = src_rate, to_hz = dst_rate, chunk_frames, "device rate conversion enabled");
        Ok(Self {
            resampler,
            chunk_frames,
            input: vec![0.0; chunk_frames],
            output: vec![0.0; capacity],
            out_pos: 0,
            out_len: 0,
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
        })
    }

    /// Fill `out` with device-rate samples, pulling session-rate chunks from `source`.
    pub fn fill(&mut self, out: &mut [f32], mut source: impl FnMut(&mut [f32])) -> Result<()> {
        let mut written = 0;
        while written < out.len() {
            if self.out_pos >= self.out_len {
                source(&mut self.input);

                let input_adapter = InterleavedSlice::new(&self.input, 1, self.chunk_frames)
                    .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;
                let out_capacity = self.output.len();
                let mut output_adapter =
                    InterleavedSlice::new_mut(&mut self.output, 1, out_capacity)
                        .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

                let (_nbr_in, nbr_out) = self
                    .resampler
                    .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
                    .map_err(|e| anyhow!("resampler process error: {e}"))?;

                self.out_pos = 0;
                self.out_len = nbr_out;
                if nbr_out == 0 {
                    continue;
                }
            }

            let take = (self.out_len - self.out_pos).min(out.len() - written);
            out[written..written + take]
                .copy_from_slice(&self.output[self.out_pos..self.out_pos + take]);
            self.out_pos += take;
            written += take;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_copy_input() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn upsample_doubles_length() {
        let input: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let out = resample(&input, 8_000, 16_000);
        assert_eq!(out.len(), 200);
        assert_eq!(out[0], input[0]);
        assert!((out[1] - 0.005).abs() < 1e-6);
        assert_eq!(out[2], input[1]);
        // Tail clamps to the last sample.
        assert_eq!(out[199], input[99]);
    }

    #[test]
    fn downsample_halves_length() {
        let input: Vec<f32> = (0..2048).map(|i| (i as f32 * 0.01).sin()).collect();
        let out = resample(&input, 32_000, 16_000);
        assert_eq!(out.len(), 1024);
        assert_eq!(out[10], input[20]);
    }

    #[test]
    fn capture_block_at_48k_to_16k() {
        let input = vec![0.25f32; 2048];
        let out = resample(&input, 48_000, 16_000);
        assert_eq!(out.len(), 682);
        assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn fractional_ratio_interpolates() {
        let input = vec![0.0, 1.0, 2.0, 3.0];
        // 44.1k -> 48k: x = i * 0.91875
        let out = resample(&input, 44_100, 48_000);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.91875).abs() < 1e-5);
    }

    #[test]
    fn empty_or_zero_rate_yields_empty() {
        assert!(resample(&[], 48_000, 16_000).is_empty());
        assert!(resample(&[0.1, 0.2], 0, 16_000).is_empty());
    }
}
