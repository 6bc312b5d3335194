//! Inbound voice playback: continuity smoothing followed by gapless scheduling.

use std::time::Instant;

use voice_audio_types::{PlaybackSnapshot, PlaybackState};

use crate::config::PlaybackConfig;
use crate::continuity::ContinuityProcessor;
use crate::device::AudioCapability;
use crate::error::AudioError;
use crate::events::PlaybackObserver;
use crate::scheduler::{OutputBackend, PlaybackScheduler};

/// One playback session: a [`ContinuityProcessor`] feeding a [`PlaybackScheduler`].
pub struct VoicePlayer<B: OutputBackend> {
    processor: ContinuityProcessor,
    scheduler: PlaybackScheduler<B>,
    init_error_reported: bool,
}

impl<B: OutputBackend> VoicePlayer<B> {
    pub fn new(backend: B, config: &PlaybackConfig) -> Self {
        Self {
            processor: ContinuityProcessor::new(config.sample_rate),
            scheduler: PlaybackScheduler::new(backend, config),
            init_error_reported: false,
        }
    }

    pub fn set_observer(&mut self, observer: impl PlaybackObserver + 'static) {
        self.scheduler.set_observer(observer);
    }

    /// Check host capability and open the output sink.
    ///
    /// A failed capability check is reported to the observer once.
    pub fn initialize(&mut self, capability: &dyn AudioCapability) -> Result<(), AudioError> {
        if let Err(e) = self.processor.initialize(capability) {
            if !self.init_error_reported {
                self.init_error_reported = true;
                self.scheduler.report_error(&e.to_string());
            }
            return Err(e);
        }
        if !self.scheduler.initialize() {
            return Err(AudioError::Initialization(
                "playback output could not be opened".to_string(),
            ));
        }
        Ok(())
    }

    pub fn set_sample_rate(&mut self, rate: u32) {
        self.processor.set_sample_rate(rate);
        self.scheduler.set_sample_rate(rate);
    }

    /// Smooth and enqueue one decoded frame.
    ///
    /// Returns `false` when the frame was dropped by the processor or the
    /// scheduler is inert.
    pub fn play_pcm(&mut self, frame: &[f32]) -> bool {
        match self.processor.process(frame) {
            Some(smoothed) => self.scheduler.enqueue(smoothed),
            None => false,
        }
    }

    pub fn pump(&mut self, now: Instant) {
        self.scheduler.pump(now);
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    pub fn destroy(&mut self) {
        self.scheduler.destroy();
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.scheduler.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.scheduler.volume()
    }

    pub fn state(&self) -> PlaybackState {
        self.scheduler.state()
    }

    /// Stop playback and forget cross-frame state at a session boundary.
    pub fn reset_session(&mut self) {
        self.scheduler.stop();
        self.processor.reset();
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot::from_parts(&self.scheduler.snapshot(), &self.processor.stats())
    }
}
