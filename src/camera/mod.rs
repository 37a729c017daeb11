//! Camera and microphone acquisition
//!
//! Provides cross-platform camera capture using the nokhwa crate and
//! microphone capture using cpal, bundled into a [`MediaStream`] that the
//! [`CameraSession`] acquires, switches and releases.

pub mod capture;
pub mod microphone;
pub mod session;

pub use capture::{select_camera, CameraCapture, CameraFrame, CameraInfo};
pub use microphone::MicrophoneCapture;
pub use session::{
    AudioTrack, CameraSession, MediaDevices, MediaRequest, MediaStream, SessionConfig, VideoTrack,
};

use crate::error::AppError;

/// Which way the requested camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    /// Towards the user ("user")
    #[default]
    Front,
    /// Away from the user ("environment")
    Back,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::Front => FacingMode::Back,
            FacingMode::Back => FacingMode::Front,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FacingMode::Front => "user",
            FacingMode::Back => "environment",
        }
    }
}

/// Whether the build target is a phone or tablet platform
pub fn is_mobile_platform() -> bool {
    cfg!(any(target_os = "android", target_os = "ios"))
}

/// Device access backed by nokhwa cameras and the default cpal input
#[derive(Debug, Default)]
pub struct NativeMediaDevices;

impl MediaDevices for NativeMediaDevices {
    fn get_user_media(&mut self, request: &MediaRequest) -> Result<MediaStream, AppError> {
        let cameras = CameraCapture::list_cameras();
        if cameras.is_empty() {
            return Err(AppError::DeviceAccess("no camera found".to_string()));
        }

        let index = select_camera(&cameras, request.facing).unwrap_or(cameras[0].index);
        tracing::info!(
            "Requesting camera {} for facing mode {}",
            index,
            request.facing.as_str()
        );

        let video = CameraCapture::open(index, request.ideal_width, request.ideal_height)?;

        let audio: Option<Box<dyn AudioTrack>> = if request.audio {
            match MicrophoneCapture::open() {
                Ok(mic) => Some(Box::new(mic)),
                Err(e) => {
                    tracing::warn!("Microphone unavailable, continuing video-only: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(MediaStream::new(Box::new(video), audio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_toggle() {
        assert_eq!(FacingMode::Front.toggled(), FacingMode::Back);
        assert_eq!(FacingMode::Back.toggled().toggled(), FacingMode::Back);
        assert_eq!(FacingMode::default().as_str(), "user");
    }
}
