use serde::{Deserialize, Serialize};

/// Lifecycle state of the playback scheduler.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing queued or sounding; the next enqueue starts playback.
    #[default]
    Idle,
    /// A segment is scheduled or the settle window is still open.
    Playing,
}

/// Lifecycle notification emitted by the playback path.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "message", rename_all = "snake_case")]
pub enum PlaybackEvent {
    /// Playback transitioned Idle -> Playing.
    StartPlay,
    /// Playback transitioned Playing -> Idle.
    StopPlay,
    /// A component reported an error.
    Error(String),
}

/// Counters reported by the continuity processor.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessorStats {
    /// Frames handed to `process`, including dropped ones.
    pub processed_frames: u64,
    /// Frames dropped as malformed.
    pub failed_frames: u64,
    /// Frames that needed a splice ramp at their leading edge.
    pub smoothed_frames: u64,
    /// Percentage of processed frames that were not dropped.
    pub success_rate: f64,
    /// Percentage of processed frames that were spliced.
    pub smooth_rate: f64,
    /// Working sample rate in Hz.
    pub sample_rate: u32,
}

/// Scheduler-level view of the playback path.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSnapshot {
    /// Current lifecycle state.
    pub state: PlaybackState,
    /// Frames waiting in the queue (not yet handed to the device).
    pub queue_length: usize,
    /// Output gain in `[0, 1]`.
    pub volume: f32,
    /// Working sample rate in Hz.
    pub sample_rate: u32,
    /// Whether the output sink has been opened.
    pub initialized: bool,
}

/// Combined playback status exposed to status/UI layers.
///
/// This merges scheduler state with continuity processor counters.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaybackSnapshot {
    /// Current lifecycle state.
    pub state: PlaybackState,
    /// Frames waiting in the queue.
    pub queue_length: usize,
    /// Output gain in `[0, 1]`.
    pub volume: f32,
    /// Working sample rate in Hz.
    pub sample_rate: u32,
    /// Frames handed to the continuity processor.
    pub processed_frames: u64,
    /// Frames dropped by the continuity processor.
    pub failed_frames: u64,
    /// Frames spliced by the continuity processor.
    pub smoothed_frames: u64,
    /// Percentage of frames that were not dropped.
    pub success_rate: f64,
    /// Percentage of frames that were spliced.
    pub smooth_rate: f64,
}

impl PlaybackSnapshot {
    /// Merge scheduler and processor views into one snapshot.
    pub fn from_parts(scheduler: &SchedulerSnapshot, stats: &ProcessorStats) -> Self {
        Self {
            state: scheduler.state,
            queue_length: scheduler.queue_length,
            volume: scheduler.volume,
            sample_rate: scheduler.sample_rate,
            processed_frames: stats.processed_frames,
            failed_frames: stats.failed_frames,
            smoothed_frames: stats.smoothed_frames,
            success_rate: stats.success_rate,
            smooth_rate: stats.smooth_rate,
        }
    }
}

/// Counters reported by the capture path.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureStats {
    /// Whether the microphone stream is open.
    pub running: bool,
    /// Device-native input rate in Hz, once started.
    pub native_rate: Option<u32>,
    /// Uplink target rate in Hz.
    pub target_rate: u32,
    /// Frames delivered to the uplink callback.
    pub emitted_frames: u64,
    /// Frames discarded because no callback was registered.
    pub dropped_frames: u64,
    /// Input samples discarded because the block queue was full.
    pub overflow_samples: u64,
}
