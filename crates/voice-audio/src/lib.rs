pub mod capture;
pub mod config;
pub mod continuity;
pub mod device;
pub mod error;
pub mod events;
mod gain;
pub mod mixer;
pub mod offline;
pub mod playback;
pub mod player;
pub mod queue;
pub mod resample;
pub mod scheduler;
pub mod uplink;

pub use capture::{CaptureResampler, CpalInputBackend, InputBackend};
pub use config::{CaptureConfig, CaptureHints, PipelineConfig, PlaybackConfig};
pub use continuity::ContinuityProcessor;
pub use error::{AudioError, DeviceError};
pub use events::{NoopObserver, PlaybackObserver};
pub use offline::{OfflineBackend, OfflineHandle};
pub use playback::CpalOutputBackend;
pub use player::VoicePlayer;
pub use scheduler::{OutputBackend, OutputSink, PlaybackScheduler};
pub use uplink::UplinkFramer;
