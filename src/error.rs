//! Application error taxonomy
//!
//! Every failure the application surfaces to the user is one of these
//! variants. They are caught where they occur, logged, and shown as a
//! transient banner; none of them stop the event loop.

use thiserror::Error;

/// Errors surfaced by the camera, detection, filter and recording paths
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Camera or microphone denied or unavailable
    #[error("Failed to access camera: {0}")]
    DeviceAccess(String),

    /// Detection model failed to load
    #[error("Failed to load object detection model: {0}")]
    ModelLoad(String),

    /// A single detection cycle failed
    #[error("Detection failed: {0}")]
    ModelInference(String),

    /// Beauty filter shader could not be built
    #[error("Beauty filter unavailable: {0}")]
    ShaderCompile(String),

    /// No encoder format is supported, or the encoder is missing
    #[error("Recording not supported: {0}")]
    RecordingUnsupported(String),

    /// Stop produced zero bytes of media
    #[error("Recording failed: no data was captured")]
    RecordingEmpty,

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No recording in progress")]
    NotRecording,

    /// Encoder pipe or output file failure
    #[error("Failed to save recording: {0}")]
    RecordingSave(String),

    /// Window or GPU context could not be created
    #[error("Graphics initialization failed: {0}")]
    Graphics(String),
}

impl AppError {
    /// Short category name used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::DeviceAccess(_) => "device_access",
            AppError::ModelLoad(_) => "model_load",
            AppError::ModelInference(_) => "model_inference",
            AppError::ShaderCompile(_) => "shader_compile",
            AppError::RecordingUnsupported(_) => "recording_unsupported",
            AppError::RecordingEmpty => "recording_empty",
            AppError::AlreadyRecording => "already_recording",
            AppError::NotRecording => "not_recording",
            AppError::RecordingSave(_) => "recording_save",
            AppError::Graphics(_) => "graphics",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AppError::DeviceAccess("permission denied".to_string());
        assert_eq!(err.to_string(), "Failed to access camera: permission denied");
        assert_eq!(err.kind(), "device_access");
        assert_eq!(AppError::RecordingEmpty.kind(), "recording_empty");
    }
}
