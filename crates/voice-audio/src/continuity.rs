//! Per-frame continuity smoothing for inbound PCM.
//!
//! Decoded frames arrive independently, so their edges rarely line up. Each frame
//! goes through four fixed stages, in this order:
//! 1. splice ramp against the previous frame's last sample
//! 2. 3-tap anti-aliasing (`[0.25, 0.5, 0.25]`) over interior samples
//! 3. tanh soft limiting above `0.95`
//! 4. sine edge envelope over the first/last `min(8, len / 8)` samples
//!
//! The order affects output bit-for-bit and must not change.

use std::f32::consts::FRAC_PI_2;

use voice_audio_types::ProcessorStats;

use crate::device::AudioCapability;
use crate::error::AudioError;

const SPLICE_THRESHOLD: f32 = 0.1;
const SPLICE_MAX_LEN: usize = 5;
const LIMIT_THRESHOLD: f32 = 0.95;
const LIMIT_CEILING: f32 = 0.9;
const ENVELOPE_MAX_LEN: usize = 8;

/// Stateful smoother for a single audio session.
#[derive(Debug)]
pub struct ContinuityProcessor {
    sample_rate: u32,
    initialized: bool,
    init_failed: bool,
    previous_frame: Option<Vec<f32>>,
    last_sample: f32,
    processed_frames: u64,
    failed_frames: u64,
    smoothed_frames: u64,
}

impl ContinuityProcessor {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            initialized: false,
            init_failed: false,
            previous_frame: None,
            last_sample: 0.0,
            processed_frames: 0,
            failed_frames: 0,
            smoothed_frames: 0,
        }
    }

    /// One-time capability check. Idempotent once it has succeeded.
    ///
    /// A failed check leaves the processor inert: every later frame is dropped.
    pub fn initialize(&mut self, host: &dyn AudioCapability) -> Result<(), AudioError> {
        if self.initialized {
            return Ok(());
        }
        if !host.supports_output() {
            self.init_failed = true;
            return Err(AudioError::Initialization(
                "host has no audio output capability".to_string(),
            ));
        }
        self.initialized = true;
        self.init_failed = false;
        tracing::info!(rate_hz = self.sample_rate, "continuity processor initialized");
        Ok(())
    }

    /// Change the working rate. Zero or unchanged values are ignored; state is kept.
    pub fn set_sample_rate(&mut self, rate: u32) {
        if rate == 0 || rate == self.sample_rate {
            return;
        }
        self.sample_rate = rate;
        tracing::debug!(rate_hz = rate, "continuity processor rate changed");
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Smooth one frame. Returns `None` (and counts a failure) for dropped frames.
    pub fn process(&mut self, frame: &[f32]) -> Option<Vec<f32>> {
        self.processed_frames += 1;
        match self.try_process(frame) {
            Ok(out) => Some(out),
            Err(e) => {
                self.failed_frames += 1;
                tracing::warn!(
                    frame = self.processed_frames,
                    failed = self.failed_frames,
                    "dropping frame: {e}"
                );
                None
            }
        }
    }

    fn try_process(&mut self, frame: &[f32]) -> Result<Vec<f32>, AudioError> {
        if self.init_failed {
            return Err(AudioError::Processing("processor is not initialized".to_string()));
        }
        if frame.is_empty() {
            return Err(AudioError::Processing("empty frame".to_string()));
        }
        if let Some(pos) = frame.iter().position(|s| !s.is_finite()) {
            return Err(AudioError::Processing(format!(
                "non-finite sample at index {pos}"
            )));
        }

        let mut out = frame.to_vec();
        if self.splice(&mut out) {
            self.smoothed_frames += 1;
        }
        anti_alias(&mut out);
        soft_limit(&mut out);
        apply_envelope(&mut out);

        self.last_sample = out[out.len() - 1];
        self.previous_frame = Some(out.clone());
        Ok(out)
    }

    /// Ramp the leading samples from the previous boundary value toward this
    /// frame's first sample. Returns `true` when a ramp was applied.
    fn splice(&self, data: &mut [f32]) -> bool {
        let Some(prev) = self.previous_frame.as_deref() else {
            return false;
        };
        let Some(&prev_last) = prev.last() else {
            return false;
        };
        let diff = data[0] - prev_last;
        if diff.abs() <= SPLICE_THRESHOLD {
            return false;
        }
        let fade_len = SPLICE_MAX_LEN.min(data.len());
        for (i, sample) in data.iter_mut().take(fade_len).enumerate() {
            let factor = i as f32 / fade_len as f32;
            *sample = prev_last + diff * factor;
        }
        true
    }

    pub fn last_sample(&self) -> f32 {
        self.last_sample
    }

    pub fn stats(&self) -> ProcessorStats {
        let (success_rate, smooth_rate) = if self.processed_frames > 0 {
            let processed = self.processed_frames as f64;
            (
                (self.processed_frames - self.failed_frames) as f64 / processed * 100.0,
                self.smoothed_frames as f64 / processed * 100.0,
            )
        } else {
            (0.0, 0.0)
        };
        ProcessorStats {
            processed_frames: self.processed_frames,
            failed_frames: self.failed_frames,
            smoothed_frames: self.smoothed_frames,
            success_rate,
            smooth_rate,
            sample_rate: self.sample_rate,
        }
    }

    /// Forget the previous frame and zero the counters (session boundary).
    pub fn reset(&mut self) {
        self.previous_frame = None;
        self.last_sample = 0.0;
        self.processed_frames = 0;
        self.failed_frames = 0;
        self.smoothed_frames = 0;
        tracing::debug!("continuity processor reset");
    }
}

fn anti_alias(data: &mut [f32]) {
    let len = data.len();
    if len < 3 {
        return;
    }
    let mut prev = data[0];
    for i in 1..len - 1 {
        let cur = data[i];
        data[i] = 0.25 * prev + 0.5 * cur + 0.25 * data[i + 1];
        prev = cur;
    }
}

fn soft_limit(data: &mut [f32]) {
    for sample in data.iter_mut() {
        let abs = sample.abs();
        if abs > LIMIT_THRESHOLD {
            let sign = if *sample >= 0.0 { 1.0 } else { -1.0 };
            *sample = sign * abs.tanh() * LIMIT_CEILING;
        }
    }
}

fn apply_envelope(data: &mut [f32]) {
    let len = data.len();
    let fade_len = ENVELOPE_MAX_LEN.min(len / 8);
    if fade_len == 0 {
        return;
    }
    for (i, sample) in data.iter_mut().take(fade_len).enumerate() {
        *sample *= (FRAC_PI_2 * (i as f32 / fade_len as f32)).sin();
    }
    for i in len - fade_len..len {
        data[i] *= (FRAC_PI_2 * ((len - i) as f32 / fade_len as f32)).sin();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StaticCapability;

    fn ready() -> ContinuityProcessor {
        let mut p = ContinuityProcessor::new(48_000);
        p.initialize(&StaticCapability::full()).unwrap();
        p
    }

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-6, "{a} != {b}");
    }

    #[test]
    fn output_length_matches_input() {
        let mut p = ready();
        for len in [1usize, 2, 3, 7, 8, 63, 64, 960] {
            let frame: Vec<f32> = (0..len).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
            let out = p.process(&frame).unwrap();
            assert_eq!(out.len(), len);
        }
    }

    #[test]
    fn empty_and_non_finite_frames_are_dropped() {
        let mut p = ready();
        assert!(p.process(&[]).is_none());
        assert!(p.process(&[0.1, f32::NAN, 0.2]).is_none());
        let stats = p.stats();
        assert_eq!(stats.processed_frames, 2);
        assert_eq!(stats.failed_frames, 2);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn splice_ramps_from_previous_boundary() {
        let mut p = ready();
        // Short frames keep the envelope disabled so the ramp is visible.
        p.process(&[0.5, 0.5, 0.5, 0.5, 0.5, 0.5]).unwrap();
        assert_close(p.last_sample(), 0.5);

        let out = p.process(&[0.9; 6]).unwrap();
        let expected = [0.5, 0.58, 0.66, 0.74, 0.82];
        for (got, want) in out.iter().zip(expected.iter()) {
            assert_close(*got, *want);
        }
        for pair in out[..5].windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert_eq!(p.stats().smoothed_frames, 1);
    }

    #[test]
    fn small_jump_is_not_spliced() {
        let mut p = ready();
        p.process(&[0.5, 0.5, 0.5]).unwrap();
        p.process(&[0.55, 0.55, 0.55]).unwrap();
        assert_eq!(p.stats().smoothed_frames, 0);
    }

    #[test]
    fn anti_alias_keeps_edges() {
        let mut data = vec![1.0, 0.0, 1.0, 0.0];
        anti_alias(&mut data);
        assert_eq!(data, vec![1.0, 0.5, 0.5, 0.0]);

        let mut short = vec![1.0, -1.0];
        anti_alias(&mut short);
        assert_eq!(short, vec![1.0, -1.0]);
    }

    #[test]
    fn soft_limit_bounds_peaks() {
        let mut data = vec![0.95, 0.96, -1.0, 2.0, -0.5];
        soft_limit(&mut data);
        assert_eq!(data[0], 0.95);
        assert_close(data[1], 0.96f32.tanh() * 0.9);
        assert_close(data[2], -(1.0f32.tanh()) * 0.9);
        assert!(data[3] <= 0.9 && data[3] > 0.0);
        assert_eq!(data[4], -0.5);
    }

    #[test]
    fn soft_limited_output_stays_under_ceiling() {
        let mut p = ready();
        let frame = vec![1.5f32; 5];
        let out = p.process(&frame).unwrap();
        for (x, y) in frame.iter().zip(out.iter()) {
            assert!(y.abs() <= 0.9);
            assert_eq!(x.signum(), y.signum());
        }
    }

    #[test]
    fn envelope_fades_both_edges() {
        let mut data = vec![1.0f32; 64];
        apply_envelope(&mut data);
        assert_eq!(data[0], 0.0);
        assert_close(data[4], (FRAC_PI_2 * 0.5).sin());
        assert_eq!(data[8], 1.0);
        assert_close(data[63], (FRAC_PI_2 / 8.0).sin());
        assert_close(data[56], 1.0);

        let mut tiny = vec![1.0f32; 7];
        apply_envelope(&mut tiny);
        assert!(tiny.iter().all(|s| *s == 1.0));
    }

    #[test]
    fn reset_matches_fresh_processor() {
        let frame: Vec<f32> = (0..128).map(|i| ((i as f32) * 0.2).sin() * 0.8).collect();

        let mut fresh = ready();
        let expected = fresh.process(&frame).unwrap();

        let mut used = ready();
        used.process(&[-0.9; 32]).unwrap();
        used.process(&[0.9; 32]).unwrap();
        used.reset();
        let out = used.process(&frame).unwrap();

        assert_eq!(out, expected);
        assert_eq!(used.stats().processed_frames, 1);
        assert_eq!(used.stats().smoothed_frames, 0);
    }

    #[test]
    fn set_sample_rate_ignores_invalid_and_keeps_state() {
        let mut p = ready();
        p.process(&[0.5; 4]).unwrap();
        p.set_sample_rate(0);
        assert_eq!(p.sample_rate(), 48_000);
        p.set_sample_rate(24_000);
        assert_eq!(p.sample_rate(), 24_000);
        p.process(&[0.9; 4]).unwrap();
        assert_eq!(p.stats().smoothed_frames, 1);
        assert_eq!(p.stats().sample_rate, 24_000);
    }

    #[test]
    fn failed_initialization_makes_processor_inert() {
        let mut p = ContinuityProcessor::new(48_000);
        let err = p.initialize(&StaticCapability::none()).unwrap_err();
        assert!(matches!(err, AudioError::Initialization(_)));
        assert!(p.process(&[0.1, 0.2]).is_none());
        assert_eq!(p.stats().failed_frames, 1);
    }

    #[test]
    fn stats_report_rates() {
        let mut p = ready();
        p.process(&[0.0; 4]).unwrap();
        p.process(&[0.5; 4]).unwrap();
        p.process(&[]);
        p.process(&[0.0; 4]).unwrap();
        let stats = p.stats();
        assert_eq!(stats.processed_frames, 4);
        assert_eq!(stats.failed_frames, 1);
        assert_eq!(stats.smoothed_frames, 2);
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!(stats.smooth_rate, 50.0);
    }
}
