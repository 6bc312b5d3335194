//! Output sink backed by a CPAL output stream.
//!
//! The stream callback renders the shared [`SegmentMixer`] timeline, so the
//! mixer cursor is the device clock the scheduler places segments on. The callback:
//! - renders mono session-rate audio (through a sinc converter when the device
//!   could not open at the session rate)
//! - applies the output gain with a short ramp
//! - fans mono out to every device channel in the device sample format
//!
//! `cpal::Stream` is not `Send` on every host, so the backend must be opened on the
//! thread that keeps the sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::PlaybackConfig;
use crate::device::{pick_output_config, pick_output_device};
use crate::error::AudioError;
use crate::gain::{GainControl, GainRamp};
use crate::mixer::{ScheduledSegment, SegmentMixer};
use crate::resample::DeviceRateConverter;
use crate::scheduler::{OutputBackend, OutputSink};

/// Opens CPAL output streams on the selected device.
pub struct CpalOutputBackend {
    host: cpal::Host,
    device: Option<String>,
    convert_chunk_frames: usize,
}

impl CpalOutputBackend {
    pub fn new(host: cpal::Host, cfg: &PlaybackConfig) -> Self {
        Self {
            host,
            device: cfg.device.clone(),
            convert_chunk_frames: cfg.convert_chunk_frames,
        }
    }
}

impl OutputBackend for CpalOutputBackend {
    type Sink = CpalOutputSink;

    fn open(&mut self, sample_rate: u32) -> Result<Self::Sink, AudioError> {
        let device = pick_output_device(&self.host, self.device.as_deref())
            .map_err(|e| AudioError::Initialization(format!("{e:#}")))?;
        let device_name = device
            .description()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());

        let supported = pick_output_config(&device, sample_rate)
            .map_err(|e| AudioError::Initialization(format!("{e:#}")))?;
        let sample_format = supported.sample_format();
        let config = supported.config();
        let device_rate = config.sample_rate;

        let converter = if device_rate != sample_rate {
            let converter =
                DeviceRateConverter::new(sample_rate, device_rate, self.convert_chunk_frames)
                    .map_err(|e| AudioError::Initialization(format!("{e:#}")))?;
            Some(converter)
        } else {
            None
        };

        let shared = OutputShared {
            mixer: Arc::new(Mutex::new(SegmentMixer::new())),
            position: Arc::new(AtomicU64::new(0)),
            gain: GainControl::new(1.0),
        };

        let stream = build_output_stream(
            &device,
            &config,
            sample_format,
            shared.clone(),
            converter,
            sample_rate,
        )
        .map_err(|e| AudioError::Initialization(format!("{e:#}")))?;
        stream
            .play()
            .map_err(|e| AudioError::Initialization(format!("output stream failed to start: {e}")))?;

        tracing::info!(
            device = %device_name,
            device_rate_hz = device_rate,
            session_rate_hz = sample_rate,
            channels = config.channels,
            format = ?sample_format,
            "output stream started"
        );

        Ok(CpalOutputSink {
            stream: Some(stream),
            shared,
            sample_rate,
        })
    }
}

#[derive(Clone)]
struct OutputShared {
    mixer: Arc<Mutex<SegmentMixer>>,
    /// Session-rate frames rendered by the callback.
    position: Arc<AtomicU64>,
    gain: GainControl,
}

/// An open CPAL output stream rendering a segment timeline.
pub struct CpalOutputSink {
    stream: Option<cpal::Stream>,
    shared: OutputShared,
    sample_rate: u32,
}

impl OutputSink for CpalOutputSink {
    fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule(&mut self, segment: ScheduledSegment) -> Result<()> {
        if self.stream.is_none() {
            return Err(anyhow!("output stream is closed"));
        }
        let mut mixer = self
            .shared
            .mixer
            .lock()
            .map_err(|_| anyhow!("output mixer lock poisoned"))?;
        mixer.schedule(segment);
        Ok(())
    }

    fn set_gain(&mut self, gain: f32) {
        self.shared.gain.set(gain);
    }

    fn cancel_pending(&mut self) {
        if let Ok(mut mixer) = self.shared.mixer.lock() {
            let dropped = mixer.cancel_pending();
            if dropped > 0 {
                tracing::debug!(dropped, "pending segments cancelled");
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("output stream pause failed: {e}");
            }
        }
        if let Ok(mut mixer) = self.shared.mixer.lock() {
            mixer.clear();
        }
        tracing::info!("output stream closed");
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: OutputShared,
    converter: Option<DeviceRateConverter>,
    session_rate: u32,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared, converter, session_rate),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared, converter, session_rate),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared, converter, session_rate),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared, converter, session_rate),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: OutputShared,
    mut converter: Option<DeviceRateConverter>,
    session_rate: u32,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (config.channels as usize).max(1);
    let mut ramp = GainRamp::new(config.sample_rate, shared.gain.get());
    let mut mono: Vec<f32> = Vec::new();
    let mut convert_failed = false;

    let err_fn = |err| tracing::warn!("output stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out;
            mono.resize(frames, 0.0);

            match shared.mixer.lock() {
                Ok(mut mixer) => {
                    match converter.as_mut() {
                        Some(conv) => {
                            if let Err(e) = conv.fill(&mut mono, |chunk| mixer.render(chunk)) {
                                if !convert_failed {
                                    convert_failed = true;
                                    tracing::warn!(session_rate_hz = session_rate, "output conversion failed: {e:#}");
                                }
                                mono.fill(0.0);
                            }
                        }
                        None => mixer.render(&mut mono),
                    }
                    shared.position.store(mixer.position(), Ordering::Release);
                }
                Err(_) => mono.fill(0.0),
            }

            ramp.apply(&mut mono, shared.gain.get());
            write_interleaved(data, &mono, channels_out);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Copy mono samples into every channel of an interleaved device buffer.
///
/// Trailing device samples that do not form a whole frame are silenced.
fn write_interleaved<T>(data: &mut [T], mono: &[f32], channels: usize)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let channels = channels.max(1);
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
    for (i, frame) in data.chunks_mut(channels).enumerate() {
        match mono.get(i) {
            Some(sample) if frame.len() == channels => {
                frame.fill(<T as cpal::Sample>::from_sample::<f32>(*sample));
            }
            _ => frame.fill(silence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_fans_out_to_all_channels() {
        let mut data = vec![0.0f32; 6];
        write_interleaved(&mut data, &[0.1, 0.2, 0.3], 2);
        assert_eq!(data, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn short_mono_leaves_silence() {
        let mut data = vec![1.0f32; 6];
        write_interleaved(&mut data, &[0.5], 3);
        assert_eq!(data, vec![0.5, 0.5, 0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn stale_device_samples_are_overwritten() {
        let mut data = vec![0.9f32; 5];
        write_interleaved(&mut data, &[0.25, 0.5, 0.75], 2);
        assert_eq!(data, vec![0.25, 0.25, 0.5, 0.5, 0.0]);

        let mut empty = vec![0.9f32; 4];
        write_interleaved(&mut empty, &[], 2);
        assert_eq!(empty, vec![0.0; 4]);
    }

    #[test]
    fn converts_to_integer_formats() {
        let mut data = vec![0i16; 2];
        write_interleaved(&mut data, &[0.0, 1.0], 1);
        assert_eq!(data[0], 0);
        assert!(data[1] > 32_000);

        let mut unsigned = vec![0u16; 1];
        write_interleaved(&mut unsigned, &[0.0], 1);
        assert!((32_767..=32_768).contains(&unsigned[0]));
    }
}
