//! Device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - answering whether the host can play or capture audio at all
//! - selecting an output or input device by substring match or host default
//! - choosing an output config for the session sample rate

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Host audio capability probe used by `initialize` calls.
pub trait AudioCapability {
    fn supports_output(&self) -> bool;
    fn supports_input(&self) -> bool;
}

impl AudioCapability for cpal::Host {
    fn supports_output(&self) -> bool {
        self.default_output_device().is_some()
    }

    fn supports_input(&self) -> bool {
        self.default_input_device().is_some()
    }
}

/// Fixed capability answer, for hosts that already know what they have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticCapability {
    pub output: bool,
    pub input: bool,
}

impl StaticCapability {
    pub fn full() -> Self {
        Self {
            output: true,
            input: true,
        }
    }

    pub fn none() -> Self {
        Self {
            output: false,
            input: false,
        }
    }

    /// Snapshot another capability source, e.g. a `cpal::Host` that must stay on its thread.
    pub fn probe(source: &dyn AudioCapability) -> Self {
        Self {
            output: source.supports_output(),
            input: source.supports_input(),
        }
    }
}

impl AudioCapability for StaticCapability {
    fn supports_output(&self) -> bool {
        self.output
    }

    fn supports_input(&self) -> bool {
        self.input
    }
}

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_output_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| device_matches(d, needle))
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Pick the first input device matching `needle` (case-insensitive), or the default device.
pub fn pick_input_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.input_devices().context("No input devices")?;
        return devices
            .find(|d| device_matches(d, needle))
            .ok_or_else(|| anyhow!("No input device matched: {needle}"));
    }

    host.default_input_device()
        .ok_or_else(|| anyhow!("No default input device"))
}

fn device_matches(device: &cpal::Device, needle: &str) -> bool {
    device
        .description()
        .ok()
        .map(|n| matches_device_name(&n.name(), needle))
        .unwrap_or(false)
}

/// Choose the output config closest to `target_rate`.
///
/// Prefers an exact rate match, then the highest rate below the target, then the
/// lowest rate above it; ties are broken by sample format (f32 first).
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            below: rate <= target_rate,
            distance: rate.abs_diff(target_rate),
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = match &best {
            None => true,
            Some((b, _)) => candidate.is_better_than(b),
        };
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    below: bool,
    distance: u32,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate) -> bool {
        if (self.distance == 0) != (other.distance == 0) {
            return self.distance == 0;
        }
        if self.below != other.below {
            return self.below;
        }
        if self.distance != other.distance {
            return self.distance < other.distance;
        }
        self.format_rank < other.format_rank
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Print available output and input devices to stdout.
///
/// This is intended for CLI UX (`--list-devices`) rather than structured output.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    println!("Output devices:");
    for (i, d) in host.output_devices().context("No output devices")?.enumerate() {
        println!("  #{i}: {}", d.description()?);
    }
    println!("Input devices:");
    for (i, d) in host.input_devices().context("No input devices")?.enumerate() {
        println!("  #{i}: {}", d.description()?);
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(below: bool, distance: u32, format_rank: u8) -> Candidate {
        Candidate {
            below,
            distance,
            format_rank,
        }
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB Headset Mic", "headset"));
        assert!(matches_device_name("usb headset", "USB"));
        assert!(!matches_device_name("USB Headset", "speaker"));
        assert!(!matches_device_name("USB Headset", "  "));
    }

    #[test]
    fn pick_rate_for_range_clamps_to_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, 48_000), 48_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, 16_000), 44_100);
        assert_eq!(pick_rate_for_range(8_000, 24_000, 48_000), 24_000);
    }

    #[test]
    fn exact_rate_beats_everything() {
        assert!(cand(true, 0, 3).is_better_than(&cand(true, 100, 0)));
        assert!(!cand(false, 100, 0).is_better_than(&cand(true, 0, 3)));
    }

    #[test]
    fn below_target_preferred_then_closest() {
        assert!(cand(true, 4_000, 0).is_better_than(&cand(false, 100, 0)));
        assert!(cand(true, 100, 2).is_better_than(&cand(true, 4_000, 0)));
    }

    #[test]
    fn format_rank_breaks_ties() {
        assert!(cand(true, 0, 0).is_better_than(&cand(true, 0, 2)));
        assert!(!cand(true, 0, 2).is_better_than(&cand(true, 0, 0)));
    }

    #[test]
    fn static_capability_reports_flags() {
        assert!(StaticCapability::full().supports_output());
        assert!(StaticCapability::full().supports_input());
        assert!(!StaticCapability::none().supports_output());
        let probed = StaticCapability::probe(&StaticCapability {
            output: true,
            input: false,
        });
        assert!(probed.output && !probed.input);
    }
}
