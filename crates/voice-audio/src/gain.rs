//! Lock-free output gain shared between the scheduler and the device callback.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Shared volume handle. Cloning is cheap (single `Arc` increment).
#[derive(Clone)]
pub struct GainControl {
    target_bits: Arc<AtomicU32>,
}

impl GainControl {
    pub fn new(gain: f32) -> Self {
        Self {
            target_bits: Arc::new(AtomicU32::new(sanitize(gain).to_bits())),
        }
    }

    /// Set the target gain. Values are clamped to `[0, 1]`; non-finite values are ignored.
    pub fn set(&self, gain: f32) {
        if !gain.is_finite() {
            return;
        }
        self.target_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        sanitize(f32::from_bits(self.target_bits.load(Ordering::Relaxed)))
    }
}

impl fmt::Debug for GainControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GainControl").field("gain", &self.get()).finish()
    }
}

fn sanitize(gain: f32) -> f32 {
    if gain.is_finite() {
        gain.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Per-sample gain ramp so volume changes do not click.
pub(crate) struct GainRamp {
    ramp_len: u32,
    current: f32,
    step: f32,
    remaining: u32,
    last_target: f32,
}

impl GainRamp {
    /// Ramp over 10 ms at `sample_rate`.
    pub(crate) fn new(sample_rate: u32, initial: f32) -> Self {
        let gain = sanitize(initial);
        Self {
            ramp_len: sample_rate / 100,
            current: gain,
            step: 0.0,
            remaining: 0,
            last_target: gain,
        }
    }

    pub(crate) fn apply(&mut self, data: &mut [f32], target: f32) {
        let target = sanitize(target);
        if target != self.last_target {
            self.last_target = target;
            if self.ramp_len == 0 {
                self.current = target;
                self.remaining = 0;
            } else {
                self.remaining = self.ramp_len;
                self.step = (target - self.current) / self.ramp_len as f32;
            }
        }

        for sample in data.iter_mut() {
            if self.remaining > 0 {
                self.remaining -= 1;
                self.current = if self.remaining == 0 {
                    target
                } else {
                    (self.current + self.step).clamp(0.0, 1.0)
                };
            }
            *sample *= self.current;
        }
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> f32 {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clamps_and_ignores_nan() {
        let gain = GainControl::new(1.0);
        gain.set(1.7);
        assert_eq!(gain.get(), 1.0);
        gain.set(-0.2);
        assert_eq!(gain.get(), 0.0);
        gain.set(0.4);
        gain.set(f32::NAN);
        assert_eq!(gain.get(), 0.4);
    }

    #[test]
    fn clones_share_state() {
        let a = GainControl::new(1.0);
        let b = a.clone();
        a.set(0.25);
        assert_eq!(b.get(), 0.25);
    }

    #[test]
    fn ramp_reaches_target_exactly() {
        let mut ramp = GainRamp::new(1_000, 1.0);
        let mut data = vec![1.0f32; 10];
        ramp.apply(&mut data, 0.0);
        assert_eq!(data[9], 0.0);
        assert!(data[0] < 1.0 && data[0] > data[5]);
        assert_eq!(ramp.current(), 0.0);
    }

    #[test]
    fn steady_gain_is_plain_multiply() {
        let mut ramp = GainRamp::new(48_000, 0.5);
        let mut data = vec![0.8f32; 4];
        ramp.apply(&mut data, 0.5);
        assert!(data.iter().all(|s| *s == 0.4));
    }

    #[test]
    fn low_rate_snaps_without_ramp() {
        let mut ramp = GainRamp::new(50, 1.0);
        let mut data = vec![1.0f32; 2];
        ramp.apply(&mut data, 0.5);
        assert_eq!(data, vec![0.5, 0.5]);
    }
}
