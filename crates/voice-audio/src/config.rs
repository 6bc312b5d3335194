use std::time::Duration;

/// Playback tuning parameters shared by the scheduler and the output sink.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Session sample rate used until the handshake negotiates another one.
    pub sample_rate: u32,
    /// Delay before an empty queue is reported as stopped.
    pub settle_ms: u64,
    /// How early (before the active segment ends) the next segment is handed to the sink.
    pub schedule_ahead_ms: u64,
    /// Interval at which the playback worker pumps the scheduler.
    pub pump_interval_ms: u64,
    /// Initial output gain in `[0, 1]`.
    pub initial_volume: f32,
    /// Session-rate frames rendered per conversion step when the device rate differs.
    pub convert_chunk_frames: usize,
    /// Output device substring; `None` uses the host default.
    pub device: Option<String>,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for 20-60 ms voice frames.
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            settle_ms: 200,
            schedule_ahead_ms: 40,
            pump_interval_ms: 5,
            initial_volume: 1.0,
            convert_chunk_frames: 256,
            device: None,
        }
    }
}

impl PlaybackConfig {
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.max(1))
    }
}

/// Capture tuning parameters.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Uplink sample rate in Hz.
    pub target_rate: u32,
    /// Device samples processed per resample step.
    pub block_frames: usize,
    /// Capacity of the device -> worker queue, in seconds of native-rate audio.
    pub buffer_seconds: f32,
    /// Input device substring; `None` uses the host default.
    pub device: Option<String>,
    /// Processing hints requested from the device.
    pub hints: CaptureHints,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_rate: 16_000,
            block_frames: 2048,
            buffer_seconds: 2.0,
            device: None,
            hints: CaptureHints::default(),
        }
    }
}

/// Voice processing hints for the microphone stream.
///
/// cpal has no portable switch for these; backends log them and rely on
/// the OS voice-processing defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureHints {
    pub channel_count: u16,
    pub noise_suppression: bool,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureHints {
    fn default() -> Self {
        Self {
            channel_count: 1,
            noise_suppression: true,
            echo_cancellation: true,
            auto_gain_control: true,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub playback: PlaybackConfig,
    pub capture: CaptureConfig,
    /// Samples per uplink frame (960 = 60 ms at 16 kHz).
    pub uplink_frame_samples: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig::default(),
            capture: CaptureConfig::default(),
            uplink_frame_samples: 960,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_voice_session() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.playback.sample_rate, 48_000);
        assert_eq!(cfg.playback.settle_window(), Duration::from_millis(200));
        assert_eq!(cfg.capture.target_rate, 16_000);
        assert_eq!(cfg.capture.block_frames, 2048);
        assert_eq!(cfg.uplink_frame_samples, 960);
        assert_eq!(cfg.capture.hints.channel_count, 1);
    }

    #[test]
    fn pump_interval_never_zero() {
        let cfg = PlaybackConfig {
            pump_interval_ms: 0,
            ..PlaybackConfig::default()
        };
        assert_eq!(cfg.pump_interval(), Duration::from_millis(1));
    }
}
