//! Gapless playback scheduling.
//!
//! The scheduler owns the [`PlaybackQueue`] and an output sink whose frame counter
//! is the device clock. Each queued frame becomes one segment placed on that clock:
//! the next segment starts at exactly the previous segment's end frame, so
//! consecutive frames concatenate with no inserted or overlapping samples.
//!
//! Lifecycle is `Idle` / `Playing`:
//! - the first enqueue while idle fires `on_start_play`
//! - when the device clock passes the last segment and the queue is empty, a
//!   settle window starts; a new frame inside it cancels the pending stop
//! - when the settle window elapses, `on_stop_play` fires once
//!
//! Wall-clock time (`Instant`) is only used for the settle window, never for
//! sample placement. The host drives the state machine through [`PlaybackScheduler::pump`].

use std::time::{Duration, Instant};

use voice_audio_types::{PlaybackState, SchedulerSnapshot};

use crate::config::PlaybackConfig;
use crate::error::AudioError;
use crate::events::{NoopObserver, PlaybackObserver};
use crate::mixer::ScheduledSegment;
use crate::queue::{AudioFrame, PlaybackQueue};
use crate::resample::resample;

const LATE_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// An open output device that plays segments on its own frame clock.
pub trait OutputSink {
    /// Frames rendered since the sink was opened.
    fn position(&self) -> u64;
    /// Rate of the device clock, in Hz.
    fn sample_rate(&self) -> u32;
    fn schedule(&mut self, segment: ScheduledSegment) -> anyhow::Result<()>;
    fn set_gain(&mut self, gain: f32);
    /// Drop segments that have not started sounding yet.
    fn cancel_pending(&mut self);
    fn close(&mut self);
}

/// Opens output sinks. Failing to open is an initialization error.
pub trait OutputBackend {
    type Sink: OutputSink;

    fn open(&mut self, sample_rate: u32) -> Result<Self::Sink, AudioError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SegmentSpan {
    id: u64,
    start: u64,
    end: u64,
}

pub struct PlaybackScheduler<B: OutputBackend> {
    backend: B,
    sink: Option<B::Sink>,
    observer: Box<dyn PlaybackObserver>,
    queue: PlaybackQueue,
    state: PlaybackState,
    active: Option<SegmentSpan>,
    last_end: Option<u64>,
    settle_deadline: Option<Instant>,
    settle_window: Duration,
    schedule_ahead_ms: u64,
    volume: f32,
    sample_rate: u32,
    init_failed: bool,
    destroyed: bool,
    next_segment_id: u64,
    last_late_warn: Option<Instant>,
}

impl<B: OutputBackend> PlaybackScheduler<B> {
    pub fn new(backend: B, config: &PlaybackConfig) -> Self {
        let volume = if config.initial_volume.is_finite() {
            config.initial_volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        Self {
            backend,
            sink: None,
            observer: Box::new(NoopObserver),
            queue: PlaybackQueue::new(),
            state: PlaybackState::Idle,
            active: None,
            last_end: None,
            settle_deadline: None,
            settle_window: config.settle_window(),
            schedule_ahead_ms: config.schedule_ahead_ms,
            volume,
            sample_rate: config.sample_rate.max(1),
            init_failed: false,
            destroyed: false,
            next_segment_id: 1,
            last_late_warn: None,
        }
    }

    /// Replace the lifecycle observer.
    pub fn set_observer(&mut self, observer: impl PlaybackObserver + 'static) {
        self.observer = Box::new(observer);
    }

    /// Open the output sink if needed. Idempotent.
    ///
    /// Returns `false` after reporting an initialization error through the observer;
    /// a failed scheduler stays inert and does not retry.
    pub fn initialize(&mut self) -> bool {
        if self.sink.is_some() {
            return true;
        }
        if self.destroyed || self.init_failed {
            return false;
        }
        match self.backend.open(self.sample_rate) {
            Ok(mut sink) => {
                sink.set_gain(self.volume);
                tracing::info!(
                    rate_hz = self.sample_rate,
                    device_clock_hz = sink.sample_rate(),
                    volume = self.volume,
                    "playback output opened"
                );
                self.sink = Some(sink);
                true
            }
            Err(e) => {
                self.init_failed = true;
                tracing::error!("playback initialization failed: {e}");
                self.observer.on_error(&e.to_string());
                false
            }
        }
    }

    /// Set the output gain, clamped to `[0, 1]`. Non-finite values are ignored.
    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(sink) = self.sink.as_mut() {
            sink.set_gain(self.volume);
        }
        tracing::debug!(volume_pct = (self.volume * 100.0).round() as u32, "volume set");
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Change the rate used to tag frames enqueued from now on.
    ///
    /// Frames already queued or sounding keep their rate.
    pub fn set_sample_rate(&mut self, rate: u32) {
        if rate == 0 || rate == self.sample_rate {
            return;
        }
        self.sample_rate = rate;
        tracing::info!(rate_hz = rate, "playback rate changed");
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Device clock position, when the sink is open.
    pub fn position(&self) -> Option<u64> {
        self.sink.as_ref().map(|s| s.position())
    }

    /// Append a processed frame. Starts playback when idle.
    ///
    /// Returns `false` if the frame is empty or the scheduler is inert.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> bool {
        if self.destroyed || samples.is_empty() {
            return false;
        }
        if !self.initialize() {
            return false;
        }

        self.queue.push(AudioFrame::new(samples, self.sample_rate));

        match self.state {
            PlaybackState::Idle => {
                self.state = PlaybackState::Playing;
                self.settle_deadline = None;
                tracing::info!(queued = self.queue.len(), "playback started");
                self.observer.on_start_play();
                let anchor = self.last_end.unwrap_or(0);
                self.start_next(anchor, false);
            }
            PlaybackState::Playing if self.active.is_none() => {
                if self.settle_deadline.take().is_some() {
                    tracing::debug!("settle window cancelled by new frame");
                }
                let anchor = self.last_end.unwrap_or(0);
                self.start_next(anchor, false);
            }
            PlaybackState::Playing => {}
        }
        true
    }

    /// Advance segment chaining and the settle window.
    pub fn pump(&mut self, now: Instant) {
        if self.state != PlaybackState::Playing {
            return;
        }
        let Some(position) = self.position() else {
            return;
        };
        let ahead = self.schedule_ahead_frames();

        while let Some(span) = self.active {
            if !self.queue.is_empty() && position + ahead >= span.end {
                self.start_next(span.end, true);
                if self.active != Some(span) {
                    continue;
                }
            }
            if position >= span.end {
                tracing::trace!(id = span.id, end = span.end, "segment finished");
                self.active = None;
            }
            break;
        }

        if self.active.is_some() {
            return;
        }
        match self.settle_deadline {
            None => {
                self.settle_deadline = Some(now + self.settle_window);
                tracing::debug!(
                    settle_ms = self.settle_window.as_millis() as u64,
                    "queue drained; settle window started"
                );
                if self.settle_window.is_zero() {
                    self.finish_settle();
                }
            }
            Some(deadline) if now >= deadline => self.finish_settle(),
            Some(_) => {}
        }
    }

    fn finish_settle(&mut self) {
        if !self.queue.is_empty() {
            return;
        }
        self.state = PlaybackState::Idle;
        self.settle_deadline = None;
        self.last_end = None;
        tracing::info!("playback queue empty; stopped");
        self.observer.on_stop_play();
    }

    /// Stop immediately: clear the queue, cancel the settle window and drop
    /// segments that have not started. A segment already sounding may finish,
    /// and the next start is anchored after its tail.
    pub fn stop(&mut self) {
        let was_playing = self.state == PlaybackState::Playing;
        let dropped = self.queue.len();
        self.queue.clear();
        self.settle_deadline = None;
        if let (Some(span), Some(position)) = (self.active.take(), self.position()) {
            if span.start >= position {
                self.last_end = Some(span.start);
            }
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.cancel_pending();
        }
        self.state = PlaybackState::Idle;
        if was_playing {
            tracing::info!(dropped_frames = dropped, "playback stopped");
            self.observer.on_stop_play();
        }
    }

    /// Stop and release the output sink. The scheduler is inert afterwards.
    pub fn destroy(&mut self) {
        self.stop();
        if let Some(mut sink) = self.sink.take() {
            sink.close();
        }
        self.last_end = None;
        self.destroyed = true;
        tracing::debug!("playback scheduler destroyed");
    }

    /// Report an error raised outside the scheduler through its observer.
    pub(crate) fn report_error(&mut self, message: &str) {
        tracing::error!("{message}");
        self.observer.on_error(message);
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            state: self.state,
            queue_length: self.queue.len(),
            volume: self.volume,
            sample_rate: self.sample_rate,
            initialized: self.sink.is_some(),
        }
    }

    fn schedule_ahead_frames(&self) -> u64 {
        let rate = self.sink.as_ref().map(|s| s.sample_rate()).unwrap_or(self.sample_rate);
        self.schedule_ahead_ms * rate as u64 / 1000
    }

    /// Hand the next queued frame to the sink at `max(not_before, position)`.
    ///
    /// Frames that fail to schedule are reported and skipped.
    fn start_next(&mut self, not_before: u64, chained: bool) -> bool {
        let Some(sink) = self.sink.as_mut() else {
            return false;
        };
        while let Some(frame) = self.queue.pop() {
            let sink_rate = sink.sample_rate();
            let samples = if frame.sample_rate == sink_rate {
                frame.samples
            } else {
                resample(&frame.samples, frame.sample_rate, sink_rate)
            };
            if samples.is_empty() {
                continue;
            }

            let position = sink.position();
            if chained && position > not_before {
                let now = Instant::now();
                let due = self
                    .last_late_warn
                    .map(|t| now.duration_since(t) >= LATE_WARN_INTERVAL)
                    .unwrap_or(true);
                if due {
                    self.last_late_warn = Some(now);
                    tracing::warn!(
                        late_frames = position - not_before,
                        "segment scheduled late; gap inserted"
                    );
                }
            }

            let start = not_before.max(position);
            let id = self.next_segment_id;
            self.next_segment_id += 1;
            let end = start + samples.len() as u64;
            match sink.schedule(ScheduledSegment {
                id,
                start_frame: start,
                samples,
            }) {
                Ok(()) => {
                    tracing::trace!(id, start, end, queued = self.queue.len(), "segment scheduled");
                    self.active = Some(SegmentSpan { id, start, end });
                    self.last_end = Some(end);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(id, "segment schedule failed: {e:#}");
                    self.observer.on_error(&format!("segment schedule failed: {e}"));
                }
            }
        }
        false
    }
}
