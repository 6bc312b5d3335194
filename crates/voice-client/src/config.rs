//! Configuration loading and resolution.
//!
//! The TOML file only overrides what it names; everything else keeps the
//! pipeline defaults. Command-line device flags win over the file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use voice_audio::PipelineConfig;

/// Top-level client configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ClientConfigFile {
    pub playback: Option<PlaybackSection>,
    pub capture: Option<CaptureSection>,
    /// Samples per uplink frame.
    pub uplink_frame_samples: Option<usize>,
}

/// `[playback]` table.
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackSection {
    pub sample_rate: Option<u32>,
    pub settle_ms: Option<u64>,
    pub schedule_ahead_ms: Option<u64>,
    pub pump_interval_ms: Option<u64>,
    pub volume: Option<f32>,
    pub convert_chunk_frames: Option<usize>,
    pub device: Option<String>,
}

/// `[capture]` table.
#[derive(Debug, Default, Deserialize)]
pub struct CaptureSection {
    pub target_rate: Option<u32>,
    pub block_frames: Option<usize>,
    pub buffer_seconds: Option<f32>,
    pub device: Option<String>,
    pub noise_suppression: Option<bool>,
    pub echo_cancellation: Option<bool>,
    pub auto_gain_control: Option<bool>,
}

impl ClientConfigFile {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ClientConfigFile>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Apply the file over the pipeline defaults.
    pub fn resolve(&self) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        if let Some(p) = self.playback.as_ref() {
            let pb = &mut cfg.playback;
            set(&mut pb.sample_rate, p.sample_rate.filter(|r| *r > 0));
            set(&mut pb.settle_ms, p.settle_ms);
            set(&mut pb.schedule_ahead_ms, p.schedule_ahead_ms);
            set(&mut pb.pump_interval_ms, p.pump_interval_ms);
            set(&mut pb.initial_volume, p.volume.filter(|v| v.is_finite()).map(|v| v.clamp(0.0, 1.0)));
            set(&mut pb.convert_chunk_frames, p.convert_chunk_frames);
            if p.device.is_some() {
                pb.device = normalize_device_name(p.device.clone());
            }
        }
        if let Some(c) = self.capture.as_ref() {
            let cap = &mut cfg.capture;
            set(&mut cap.target_rate, c.target_rate.filter(|r| *r > 0));
            set(&mut cap.block_frames, c.block_frames.filter(|b| *b > 0));
            set(&mut cap.buffer_seconds, c.buffer_seconds);
            set(&mut cap.hints.noise_suppression, c.noise_suppression);
            set(&mut cap.hints.echo_cancellation, c.echo_cancellation);
            set(&mut cap.hints.auto_gain_control, c.auto_gain_control);
            if c.device.is_some() {
                cap.device = normalize_device_name(c.device.clone());
            }
        }
        set(&mut cfg.uplink_frame_samples, self.uplink_frame_samples.filter(|n| *n > 0));
        cfg
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Load the optional config file and apply command-line device overrides.
pub fn resolve_pipeline_config(
    path: Option<&Path>,
    output_device: Option<String>,
    input_device: Option<String>,
) -> Result<PipelineConfig> {
    let file = match path {
        Some(path) => ClientConfigFile::load(path)?,
        None => ClientConfigFile::default(),
    };
    let mut cfg = file.resolve();
    if let Some(device) = normalize_device_name(output_device) {
        cfg.playback.device = Some(device);
    }
    if let Some(device) = normalize_device_name(input_device) {
        cfg.capture.device = Some(device);
    }
    Ok(cfg)
}

pub(crate) fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        let file: ClientConfigFile = toml::from_str("").unwrap();
        let cfg = file.resolve();
        assert_eq!(cfg.playback.sample_rate, 48_000);
        assert_eq!(cfg.playback.settle_ms, 200);
        assert_eq!(cfg.capture.target_rate, 16_000);
        assert_eq!(cfg.uplink_frame_samples, 960);
    }

    #[test]
    fn tables_override_named_fields_only() {
        let file: ClientConfigFile = toml::from_str(
            r#"
            uplink_frame_samples = 320

            [playback]
            sample_rate = 24000
            volume = 1.8
            device = "  USB DAC "

            [capture]
            block_frames = 1024
            echo_cancellation = false
            "#,
        )
        .unwrap();
        let cfg = file.resolve();
        assert_eq!(cfg.playback.sample_rate, 24_000);
        assert_eq!(cfg.playback.initial_volume, 1.0);
        assert_eq!(cfg.playback.device.as_deref(), Some("USB DAC"));
        assert_eq!(cfg.playback.schedule_ahead_ms, 40);
        assert_eq!(cfg.capture.block_frames, 1024);
        assert!(!cfg.capture.hints.echo_cancellation);
        assert!(cfg.capture.hints.noise_suppression);
        assert_eq!(cfg.uplink_frame_samples, 320);
    }

    #[test]
    fn zero_rates_are_ignored() {
        let file: ClientConfigFile = toml::from_str(
            r#"
            [playback]
            sample_rate = 0
            [capture]
            target_rate = 0
            "#,
        )
        .unwrap();
        let cfg = file.resolve();
        assert_eq!(cfg.playback.sample_rate, 48_000);
        assert_eq!(cfg.capture.target_rate, 16_000);
    }

    #[test]
    fn cli_devices_override_file() {
        let cfg = resolve_pipeline_config(None, Some(" Speakers ".to_string()), Some("".to_string()))
            .unwrap();
        assert_eq!(cfg.playback.device.as_deref(), Some("Speakers"));
        assert_eq!(cfg.capture.device, None);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ClientConfigFile::load(Path::new("/nonexistent/voice.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("voice.toml"));
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB  DAC ".to_string())),
            Some("USB  DAC".to_string())
        );
    }
}
