//! Error taxonomy for the audio core.
//!
//! Processing errors are absorbed by the continuity stage and only counted;
//! initialization and device errors surface to the caller immediately.

use thiserror::Error;

/// Errors reported by the audio core.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The host has no usable audio capability for this component.
    #[error("audio initialization failed: {0}")]
    Initialization(String),

    /// A malformed or empty frame reached the continuity stage.
    #[error("frame processing failed: {0}")]
    Processing(String),

    /// Microphone capture could not be started.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Capture device failures, surfaced synchronously from `CaptureResampler::start`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The OS or user refused microphone access.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No input device, device busy, or the stream could not be built.
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
}

impl DeviceError {
    /// Classify a backend message, treating permission wording as a denial.
    pub fn from_backend_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
            DeviceError::PermissionDenied(message)
        } else {
            DeviceError::Unavailable(message)
        }
    }
}

impl From<cpal::BuildStreamError> for DeviceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                DeviceError::Unavailable("device not available".to_string())
            }
            other => DeviceError::from_backend_message(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for DeviceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        DeviceError::from_backend_message(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for DeviceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        DeviceError::from_backend_message(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_message_classifies_permission() {
        assert_eq!(
            DeviceError::from_backend_message("Access denied by user"),
            DeviceError::PermissionDenied("Access denied by user".to_string())
        );
        assert_eq!(
            DeviceError::from_backend_message("device busy"),
            DeviceError::Unavailable("device busy".to_string())
        );
    }

    #[test]
    fn device_error_converts_into_audio_error() {
        let err: AudioError = DeviceError::Unavailable("no mic".to_string()).into();
        assert!(matches!(err, AudioError::Device(DeviceError::Unavailable(_))));
        assert_eq!(err.to_string(), "capture device unavailable: no mic");
    }

    #[test]
    fn build_stream_not_available_maps_to_unavailable() {
        let err = DeviceError::from(cpal::BuildStreamError::DeviceNotAvailable);
        assert!(matches!(err, DeviceError::Unavailable(_)));
    }
}
