//! Output backend that renders into memory on a manually advanced clock.
//!
//! Used for dry runs and tests: nothing touches a sound card, and the device
//! clock only moves when [`OfflineHandle::advance`] is called.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::AudioError;
use crate::mixer::{ScheduledSegment, SegmentMixer};
use crate::scheduler::{OutputBackend, OutputSink};

/// A segment as it was handed to the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledRecord {
    pub id: u64,
    pub start_frame: u64,
    pub len: usize,
}

#[derive(Debug)]
struct OfflineState {
    mixer: SegmentMixer,
    sample_rate: u32,
    gain: f32,
    rendered: Vec<f32>,
    scheduled: Vec<ScheduledRecord>,
    cancel_calls: usize,
    opened: bool,
    closed: bool,
}

/// Shared view of an offline sink's clock and output.
#[derive(Clone, Debug)]
pub struct OfflineHandle {
    state: Arc<Mutex<OfflineState>>,
}

impl OfflineHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(OfflineState {
                mixer: SegmentMixer::new(),
                sample_rate: 0,
                gain: 1.0,
                rendered: Vec::new(),
                scheduled: Vec::new(),
                cancel_calls: 0,
                opened: false,
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OfflineState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Render `frames` frames and advance the device clock by that amount.
    ///
    /// Does nothing before the sink is opened or after it is closed.
    pub fn advance(&self, frames: usize) {
        let mut g = self.lock();
        if !g.opened || g.closed {
            return;
        }
        let mut block = vec![0.0f32; frames];
        g.mixer.render(&mut block);
        let gain = g.gain;
        g.rendered.extend(block.iter().map(|s| s * gain));
    }

    pub fn position(&self) -> u64 {
        self.lock().mixer.position()
    }

    /// Rate the sink was opened at; 0 before open.
    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    /// Everything rendered so far, with gain applied.
    pub fn rendered(&self) -> Vec<f32> {
        self.lock().rendered.clone()
    }

    /// Every segment handed to the sink, in call order.
    pub fn scheduled(&self) -> Vec<ScheduledRecord> {
        self.lock().scheduled.clone()
    }

    pub fn gain(&self) -> f32 {
        self.lock().gain
    }

    pub fn cancel_calls(&self) -> usize {
        self.lock().cancel_calls
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Backend producing [`OfflineSink`]s that share one [`OfflineHandle`].
#[derive(Clone, Debug)]
pub struct OfflineBackend {
    handle: OfflineHandle,
    fail_open: bool,
}

impl Default for OfflineBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self {
            handle: OfflineHandle::new(),
            fail_open: false,
        }
    }

    /// A backend whose `open` always fails, as on a host without audio output.
    pub fn unavailable() -> Self {
        Self {
            handle: OfflineHandle::new(),
            fail_open: true,
        }
    }

    pub fn handle(&self) -> OfflineHandle {
        self.handle.clone()
    }
}

impl OutputBackend for OfflineBackend {
    type Sink = OfflineSink;

    fn open(&mut self, sample_rate: u32) -> Result<Self::Sink, AudioError> {
        if self.fail_open {
            return Err(AudioError::Initialization(
                "no audio output available".to_string(),
            ));
        }
        {
            let mut g = self.handle.lock();
            g.sample_rate = sample_rate;
            g.opened = true;
            g.closed = false;
        }
        Ok(OfflineSink {
            handle: self.handle.clone(),
        })
    }
}

pub struct OfflineSink {
    handle: OfflineHandle,
}

impl OutputSink for OfflineSink {
    fn position(&self) -> u64 {
        self.handle.position()
    }

    fn sample_rate(&self) -> u32 {
        self.handle.sample_rate()
    }

    fn schedule(&mut self, segment: ScheduledSegment) -> anyhow::Result<()> {
        let mut g = self.handle.lock();
        if g.closed {
            anyhow::bail!("offline sink is closed");
        }
        g.scheduled.push(ScheduledRecord {
            id: segment.id,
            start_frame: segment.start_frame,
            len: segment.samples.len(),
        });
        g.mixer.schedule(segment);
        Ok(())
    }

    fn set_gain(&mut self, gain: f32) {
        self.handle.lock().gain = gain;
    }

    fn cancel_pending(&mut self) {
        let mut g = self.handle.lock();
        g.cancel_calls += 1;
        g.mixer.cancel_pending();
    }

    fn close(&mut self) {
        let mut g = self.handle.lock();
        g.mixer.clear();
        g.closed = true;
    }
}
