//! Microphone capture resampled to the uplink rate.
//!
//! The device callback downmixes to mono and pushes into a bounded [`SampleQueue`]
//! without blocking. A worker thread pops fixed-size blocks, converts each block
//! independently from the device's native rate to the target rate, and hands the
//! result to the registered frame callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, StreamTrait};
use voice_audio_types::CaptureStats;

use crate::config::{CaptureConfig, CaptureHints};
use crate::device::{AudioCapability, pick_input_device};
use crate::error::DeviceError;
use crate::queue::{SampleQueue, calc_max_buffered_samples};
use crate::resample::resample;

/// Receives resampled capture frames on the worker thread.
pub type FrameCallback = Box<dyn FnMut(Vec<f32>) + Send>;

/// Receives mono device samples on the device callback thread. Must not block.
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send>;

/// Opens microphone streams.
pub trait InputBackend {
    /// Keeps the device stream alive; dropping it disconnects the device.
    type Stream;

    /// Native rate of the device `open` will use.
    fn native_rate(&mut self) -> Result<u32, DeviceError>;

    fn open(&mut self, hints: &CaptureHints, sink: SampleSink) -> Result<Self::Stream, DeviceError>;
}

#[derive(Default)]
struct CaptureShared {
    on_frame: Mutex<Option<FrameCallback>>,
    residual: Mutex<Vec<f32>>,
    emitted_frames: AtomicU64,
    dropped_frames: AtomicU64,
}

impl CaptureShared {
    /// Forward one resampled frame, prefixed with any residual samples.
    fn emit(&self, frame: Vec<f32>) {
        if frame.is_empty() {
            return;
        }
        let merged = match self.residual.lock() {
            Ok(mut residual) if !residual.is_empty() => {
                let mut merged = std::mem::take(&mut *residual);
                merged.extend_from_slice(&frame);
                merged
            }
            _ => frame,
        };

        let Ok(mut slot) = self.on_frame.lock() else {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match slot.as_mut() {
            Some(callback) => {
                callback(merged);
                self.emitted_frames.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(samples = merged.len(), dropped, "no frame callback; capture frame dropped");
            }
        }
    }

    fn clear_residual(&self) {
        if let Ok(mut residual) = self.residual.lock() {
            residual.clear();
        }
    }
}

struct Running<S> {
    stream: S,
    queue: Arc<SampleQueue>,
    worker: Option<JoinHandle<()>>,
}

/// Captures microphone audio and emits mono frames at the target rate.
pub struct CaptureResampler<B: InputBackend> {
    backend: B,
    config: CaptureConfig,
    shared: Arc<CaptureShared>,
    running: Option<Running<B::Stream>>,
    native_rate: Option<u32>,
    overflow_samples: u64,
}

impl<B: InputBackend> CaptureResampler<B> {
    pub fn new(backend: B, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            shared: Arc::new(CaptureShared::default()),
            running: None,
            native_rate: None,
            overflow_samples: 0,
        }
    }

    /// Register the consumer of resampled frames, replacing any previous one.
    pub fn set_on_frame(&mut self, callback: impl FnMut(Vec<f32>) + Send + 'static) {
        if let Ok(mut slot) = self.shared.on_frame.lock() {
            *slot = Some(Box::new(callback));
        }
    }

    pub fn clear_on_frame(&mut self) {
        if let Ok(mut slot) = self.shared.on_frame.lock() {
            *slot = None;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Native rate of the open device, once started.
    pub fn native_rate(&self) -> Option<u32> {
        self.native_rate
    }

    /// Fail early when the host offers no audio input at all.
    pub fn check_capability(&self, capability: &dyn AudioCapability) -> Result<(), DeviceError> {
        if capability.supports_input() {
            return Ok(());
        }
        tracing::error!("host has no audio input capability");
        Err(DeviceError::Unavailable(
            "host has no audio input capability".to_string(),
        ))
    }

    /// Open the microphone and start the block worker. Idempotent while running.
    ///
    /// Permission and availability failures are returned as-is; nothing is retried.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.running.is_some() {
            return Ok(());
        }
        let target_rate = self.config.target_rate;
        if target_rate == 0 {
            return Err(DeviceError::Unavailable("capture target rate is zero".to_string()));
        }

        let native_rate = self.backend.native_rate()?;
        let capacity = calc_max_buffered_samples(native_rate, self.config.buffer_seconds);
        let queue = Arc::new(SampleQueue::new(capacity));

        let queue_cb = queue.clone();
        let stream = self.backend.open(
            &self.config.hints,
            Box::new(move |samples: &[f32]| {
                queue_cb.push_or_drop(samples);
            }),
        )?;

        let block = self.config.block_frames.max(1);
        let queue_worker = queue.clone();
        let shared = self.shared.clone();
        let worker = thread::Builder::new()
            .name("capture-resample".to_string())
            .spawn(move || {
                while let Some(samples) = queue_worker.pop_block(block) {
                    shared.emit(resample(&samples, native_rate, target_rate));
                }
                tracing::debug!("capture worker exiting");
            })
            .map_err(|e| DeviceError::Unavailable(format!("capture worker spawn failed: {e}")))?;

        tracing::info!(
            native_rate_hz = native_rate,
            target_rate_hz = target_rate,
            block_frames = block,
            capacity_samples = capacity,
            "capture started"
        );
        self.native_rate = Some(native_rate);
        self.running = Some(Running {
            stream,
            queue,
            worker: Some(worker),
        });
        Ok(())
    }

    /// Disconnect the device, finish the worker and clear the residual. No-op when stopped.
    pub fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        let queue = running.queue.clone();
        self.overflow_samples += queue.overflow_samples();
        drop(running.stream);
        queue.close();
        if let Some(worker) = running.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("capture worker panicked");
            }
        }
        self.shared.clear_residual();
        tracing::info!("capture stopped");
    }

    pub fn stats(&self) -> CaptureStats {
        let live_overflow = self
            .running
            .as_ref()
            .map(|r| r.queue.overflow_samples())
            .unwrap_or(0);
        CaptureStats {
            running: self.running.is_some(),
            native_rate: self.native_rate,
            target_rate: self.config.target_rate,
            emitted_frames: self.shared.emitted_frames.load(Ordering::Relaxed),
            dropped_frames: self.shared.dropped_frames.load(Ordering::Relaxed),
            overflow_samples: self.overflow_samples + live_overflow,
        }
    }
}

impl<B: InputBackend> Drop for CaptureResampler<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens CPAL input streams on the selected microphone.
pub struct CpalInputBackend {
    host: cpal::Host,
    device: Option<String>,
    selected: Option<(cpal::Device, cpal::SupportedStreamConfig)>,
}

impl CpalInputBackend {
    pub fn new(host: cpal::Host, device: Option<String>) -> Self {
        Self {
            host,
            device,
            selected: None,
        }
    }

    fn select(&mut self) -> Result<&(cpal::Device, cpal::SupportedStreamConfig), DeviceError> {
        if self.selected.is_none() {
            let device = pick_input_device(&self.host, self.device.as_deref())
                .map_err(|e| DeviceError::from_backend_message(format!("{e:#}")))?;
            let config = device.default_input_config()?;
            self.selected = Some((device, config));
        }
        self.selected
            .as_ref()
            .ok_or_else(|| DeviceError::Unavailable("no input device selected".to_string()))
    }
}

impl InputBackend for CpalInputBackend {
    type Stream = cpal::Stream;

    fn native_rate(&mut self) -> Result<u32, DeviceError> {
        let (_, config) = self.select()?;
        Ok(config.sample_rate())
    }

    fn open(&mut self, hints: &CaptureHints, sink: SampleSink) -> Result<Self::Stream, DeviceError> {
        let (device, supported) = self.select()?;
        let config = supported.config();
        let sample_format = supported.sample_format();

        // cpal has no portable voice-processing switches; the OS defaults apply.
        tracing::debug!(
            requested_channels = hints.channel_count,
            noise_suppression = hints.noise_suppression,
            echo_cancellation = hints.echo_cancellation,
            auto_gain_control = hints.auto_gain_control,
            "capture hints are advisory"
        );

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_input_stream::<f32>(device, &config, sink)?,
            cpal::SampleFormat::I16 => build_input_stream::<i16>(device, &config, sink)?,
            cpal::SampleFormat::I32 => build_input_stream::<i32>(device, &config, sink)?,
            cpal::SampleFormat::U16 => build_input_stream::<u16>(device, &config, sink)?,
            other => {
                return Err(DeviceError::Unavailable(format!(
                    "unsupported input sample format: {other:?}"
                )));
            }
        };
        stream.play()?;

        tracing::info!(
            rate_hz = config.sample_rate,
            channels = config.channels,
            format = ?sample_format,
            "input stream started"
        );
        Ok(stream)
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut sink: SampleSink,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let mut mono: Vec<f32> = Vec::new();
    let err_fn = |err| tracing::warn!("input stream error: {err}");

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _| {
            downmix_into(data, channels, &mut mono);
            sink(&mono);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Average interleaved device frames into mono `f32`.
fn downmix_into<T>(data: &[T], channels: usize, out: &mut Vec<f32>)
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    out.clear();
    let channels = channels.max(1);
    out.extend(data.chunks(channels).map(|frame| {
        let sum: f32 = frame
            .iter()
            .map(|s| <f32 as cpal::FromSample<T>>::from_sample_(*s))
            .sum();
        sum / frame.len() as f32
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StaticCapability;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct FakeInput {
        sink: Arc<Mutex<Option<SampleSink>>>,
        opens: Arc<AtomicU64>,
        rate: u32,
        fail: Option<DeviceError>,
    }

    impl FakeInput {
        fn at(rate: u32) -> Self {
            Self {
                rate,
                ..Self::default()
            }
        }

        fn feed(&self, samples: &[f32]) {
            if let Some(sink) = self.sink.lock().unwrap().as_mut() {
                sink(samples);
            }
        }
    }

    impl InputBackend for FakeInput {
        type Stream = ();

        fn native_rate(&mut self) -> Result<u32, DeviceError> {
            match &self.fail {
                Some(e) => Err(e.clone()),
                None => Ok(self.rate),
            }
        }

        fn open(&mut self, _hints: &CaptureHints, sink: SampleSink) -> Result<(), DeviceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }
    }

    fn config() -> CaptureConfig {
        CaptureConfig {
            target_rate: 16_000,
            block_frames: 2048,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn block_is_resampled_to_target_rate() {
        let fake = FakeInput::at(48_000);
        let mut capture = CaptureResampler::new(fake.clone(), config());
        let (tx, rx) = crossbeam_channel::unbounded();
        capture.set_on_frame(move |frame| {
            let _ = tx.send(frame);
        });
        capture.start().unwrap();
        assert_eq!(capture.native_rate(), Some(48_000));

        fake.feed(&vec![0.5; 1500]);
        fake.feed(&vec![0.5; 600]);
        let frame = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.len(), 682);
        assert!(frame.iter().all(|s| (*s - 0.5).abs() < 1e-6));

        capture.stop();
        assert_eq!(capture.stats().emitted_frames, 1);
    }

    #[test]
    fn start_is_idempotent() {
        let fake = FakeInput::at(16_000);
        let mut capture = CaptureResampler::new(fake.clone(), config());
        capture.start().unwrap();
        capture.start().unwrap();
        assert!(capture.is_running());
        assert_eq!(fake.opens.load(Ordering::SeqCst), 1);
        capture.stop();
        assert!(!capture.is_running());
        capture.stop();
    }

    #[test]
    fn device_errors_surface_synchronously() {
        let fake = FakeInput {
            fail: Some(DeviceError::PermissionDenied("user refused".to_string())),
            ..FakeInput::at(48_000)
        };
        let mut capture = CaptureResampler::new(fake.clone(), config());
        let err = capture.start().unwrap_err();
        assert_eq!(err, DeviceError::PermissionDenied("user refused".to_string()));
        assert!(!capture.is_running());
        assert_eq!(fake.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_input_capability_is_unavailable() {
        let capture = CaptureResampler::new(FakeInput::at(48_000), config());
        let err = capture
            .check_capability(&StaticCapability::none())
            .unwrap_err();
        assert!(matches!(err, DeviceError::Unavailable(_)));

        let output_only = StaticCapability {
            output: true,
            input: false,
        };
        assert!(capture.check_capability(&output_only).is_err());
        assert!(capture.check_capability(&StaticCapability::full()).is_ok());
    }

    #[test]
    fn frames_without_callback_are_dropped() {
        let shared = CaptureShared::default();
        shared.emit(vec![0.1; 4]);
        shared.emit(Vec::new());
        assert_eq!(shared.dropped_frames.load(Ordering::Relaxed), 1);
        assert_eq!(shared.emitted_frames.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn residual_is_prefixed_then_drained() {
        let shared = CaptureShared::default();
        let (tx, rx) = crossbeam_channel::unbounded();
        *shared.on_frame.lock().unwrap() = Some(Box::new(move |f| {
            let _ = tx.send(f);
        }));
        shared.residual.lock().unwrap().extend_from_slice(&[0.9, 0.8]);

        shared.emit(vec![0.1]);
        shared.emit(vec![0.2]);
        assert_eq!(rx.try_recv().unwrap(), vec![0.9, 0.8, 0.1]);
        assert_eq!(rx.try_recv().unwrap(), vec![0.2]);
    }

    #[test]
    fn downmix_averages_channels() {
        let mut out = Vec::new();
        downmix_into(&[0.2f32, 0.4, -1.0, 1.0], 2, &mut out);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }
}
