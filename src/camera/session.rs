//! Camera session lifecycle
//!
//! A session owns at most one [`MediaStream`]. Every acquisition stops the
//! previous stream's tracks first, and every acquisition or release bumps
//! a generation counter so work started against an old stream can be
//! recognised as stale.

use super::{is_mobile_platform, CameraFrame, FacingMode};
use crate::error::AppError;

/// A live video source
pub trait VideoTrack {
    fn label(&self) -> &str;
    /// Native stream resolution
    fn resolution(&self) -> (u32, u32);
    fn latest_frame(&self) -> Option<CameraFrame>;
    fn stop(&mut self);
}

/// A live audio source producing interleaved f32 samples
pub trait AudioTrack {
    fn label(&self) -> &str;
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn drain_samples(&mut self) -> Vec<f32>;
    fn stop(&mut self);
}

/// Constraints passed to [`MediaDevices::get_user_media`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaRequest {
    pub facing: FacingMode,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub audio: bool,
}

/// Camera track plus optional microphone track
pub struct MediaStream {
    video: Box<dyn VideoTrack>,
    audio: Option<Box<dyn AudioTrack>>,
}

impl MediaStream {
    pub fn new(video: Box<dyn VideoTrack>, audio: Option<Box<dyn AudioTrack>>) -> Self {
        Self { video, audio }
    }

    pub fn video(&self) -> &dyn VideoTrack {
        self.video.as_ref()
    }

    pub fn audio(&self) -> Option<&dyn AudioTrack> {
        self.audio.as_deref()
    }

    pub fn audio_mut(&mut self) -> Option<&mut (dyn AudioTrack + 'static)> {
        self.audio.as_deref_mut()
    }

    pub fn track_count(&self) -> u64 {
        1 + self.audio.is_some() as u64
    }

    /// Stop every track, returning how many were stopped
    pub fn stop_all(mut self) -> u64 {
        let count = self.track_count();
        self.video.stop();
        if let Some(audio) = self.audio.as_mut() {
            audio.stop();
        }
        count
    }
}

/// Source of media streams
pub trait MediaDevices {
    fn get_user_media(&mut self, request: &MediaRequest) -> Result<MediaStream, AppError>;
}

/// Stream constraints that stay fixed for a session
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub audio: bool,
    /// Offer facing switches on non-mobile platforms
    pub force_mobile_controls: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ideal_width: 640,
            ideal_height: 480,
            audio: true,
            force_mobile_controls: false,
        }
    }
}

pub struct CameraSession<D: MediaDevices> {
    devices: D,
    config: SessionConfig,
    stream: Option<MediaStream>,
    facing: FacingMode,
    generation: u64,
    tracks_acquired: u64,
    tracks_released: u64,
}

impl<D: MediaDevices> CameraSession<D> {
    pub fn new(devices: D, config: SessionConfig) -> Self {
        Self {
            devices,
            config,
            stream: None,
            facing: FacingMode::default(),
            generation: 0,
            tracks_acquired: 0,
            tracks_released: 0,
        }
    }

    /// Replace the current stream with one facing `facing`.
    ///
    /// Returns the native resolution of the new video track.
    pub fn acquire(&mut self, facing: FacingMode) -> Result<(u32, u32), AppError> {
        self.stop_tracks();
        self.generation += 1;
        self.facing = facing;

        let request = MediaRequest {
            facing,
            ideal_width: self.config.ideal_width,
            ideal_height: self.config.ideal_height,
            audio: self.config.audio,
        };
        let stream = self.devices.get_user_media(&request)?;

        let resolution = stream.video().resolution();
        self.tracks_acquired += stream.track_count();
        tracing::info!(
            facing = facing.as_str(),
            generation = self.generation,
            "Camera stream acquired: {} ({}x{}), audio: {}",
            stream.video().label(),
            resolution.0,
            resolution.1,
            stream.audio().map(|a| a.label()).unwrap_or("none")
        );

        self.stream = Some(stream);
        Ok(resolution)
    }

    /// Whether facing switches are offered
    pub fn can_switch(&self) -> bool {
        self.config.force_mobile_controls || is_mobile_platform()
    }

    /// Toggle front/back and re-acquire
    pub fn switch_facing(&mut self) -> Result<(u32, u32), AppError> {
        let next = self.facing.toggled();
        tracing::info!("Switching camera to {}", next.as_str());
        self.acquire(next)
    }

    /// Stop all tracks and invalidate in-flight work
    pub fn release(&mut self) {
        if self.stop_tracks() > 0 {
            self.generation += 1;
        }
    }

    fn stop_tracks(&mut self) -> u64 {
        let Some(stream) = self.stream.take() else {
            return 0;
        };
        let stopped = stream.stop_all();
        self.tracks_released += stopped;
        tracing::debug!("Stopped {} track(s)", stopped);
        stopped
    }

    pub fn latest_frame(&self) -> Option<CameraFrame> {
        self.stream.as_ref().and_then(|s| s.video().latest_frame())
    }

    /// Drain buffered microphone samples (empty without a mic)
    pub fn drain_audio(&mut self) -> Vec<f32> {
        self.stream
            .as_mut()
            .and_then(|s| s.audio_mut())
            .map(|a| a.drain_samples())
            .unwrap_or_default()
    }

    /// `(sample_rate, channels)` of the live audio track
    pub fn audio_format(&self) -> Option<(u32, u16)> {
        self.stream
            .as_ref()
            .and_then(|s| s.audio())
            .map(|a| (a.sample_rate(), a.channels()))
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.stream.as_ref().map(|s| s.video().resolution())
    }

    pub fn camera_label(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.video().label())
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tracks_acquired(&self) -> u64 {
        self.tracks_acquired
    }

    pub fn tracks_released(&self) -> u64 {
        self.tracks_released
    }
}

impl<D: MediaDevices> Drop for CameraSession<D> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct FakeVideo {
        stopped: Rc<Cell<u64>>,
        resolution: (u32, u32),
    }

    impl VideoTrack for FakeVideo {
        fn label(&self) -> &str {
            "fake camera"
        }
        fn resolution(&self) -> (u32, u32) {
            self.resolution
        }
        fn latest_frame(&self) -> Option<CameraFrame> {
            None
        }
        fn stop(&mut self) {
            self.stopped.set(self.stopped.get() + 1);
        }
    }

    struct FakeAudio {
        stopped: Rc<Cell<u64>>,
    }

    impl AudioTrack for FakeAudio {
        fn label(&self) -> &str {
            "fake mic"
        }
        fn sample_rate(&self) -> u32 {
            48_000
        }
        fn channels(&self) -> u16 {
            1
        }
        fn drain_samples(&mut self) -> Vec<f32> {
            vec![0.25; 4]
        }
        fn stop(&mut self) {
            self.stopped.set(self.stopped.get() + 1);
        }
    }

    #[derive(Clone, Default)]
    struct FakeDevices {
        stopped: Rc<Cell<u64>>,
        requests: Rc<RefCell<Vec<MediaRequest>>>,
        deny: bool,
    }

    impl MediaDevices for FakeDevices {
        fn get_user_media(&mut self, request: &MediaRequest) -> Result<MediaStream, AppError> {
            if self.deny {
                return Err(AppError::DeviceAccess("permission denied".to_string()));
            }
            self.requests.borrow_mut().push(*request);
            let resolution = match request.facing {
                FacingMode::Front => (640, 480),
                FacingMode::Back => (1280, 720),
            };
            let video = FakeVideo {
                stopped: self.stopped.clone(),
                resolution,
            };
            let audio = request.audio.then(|| {
                Box::new(FakeAudio {
                    stopped: self.stopped.clone(),
                }) as Box<dyn AudioTrack>
            });
            Ok(MediaStream::new(Box::new(video), audio))
        }
    }

    #[test]
    fn test_acquire_reports_native_resolution() {
        let devices = FakeDevices::default();
        let mut session = CameraSession::new(devices.clone(), SessionConfig::default());

        assert_eq!(session.acquire(FacingMode::Front).unwrap(), (640, 480));
        assert!(session.is_active());
        assert_eq!(session.audio_format(), Some((48_000, 1)));
        assert_eq!(session.drain_audio().len(), 4);

        let requests = devices.requests.borrow();
        assert_eq!(requests[0].ideal_width, 640);
        assert_eq!(requests[0].ideal_height, 480);
        assert!(requests[0].audio);
    }

    #[test]
    fn test_switch_twice_restores_facing_without_leaking_tracks() {
        let devices = FakeDevices::default();
        let mut session = CameraSession::new(devices.clone(), SessionConfig::default());

        session.acquire(FacingMode::Front).unwrap();
        assert_eq!(session.switch_facing().unwrap(), (1280, 720));
        assert_eq!(session.facing(), FacingMode::Back);
        session.switch_facing().unwrap();
        assert_eq!(session.facing(), FacingMode::Front);

        session.release();
        assert!(!session.is_active());
        assert_eq!(session.tracks_acquired(), 6);
        assert_eq!(session.tracks_released(), session.tracks_acquired());
        assert_eq!(devices.stopped.get(), 6);
    }

    #[test]
    fn test_generation_bumps_on_acquire_and_release() {
        let mut session = CameraSession::new(FakeDevices::default(), SessionConfig::default());
        assert_eq!(session.generation(), 0);

        session.acquire(FacingMode::Front).unwrap();
        let acquired = session.generation();
        session.release();
        assert!(session.generation() > acquired);

        // Releasing with nothing held is a no-op
        let released = session.generation();
        session.release();
        assert_eq!(session.generation(), released);
    }

    #[test]
    fn test_denied_access_is_reported() {
        let devices = FakeDevices {
            deny: true,
            ..Default::default()
        };
        let mut session = CameraSession::new(devices, SessionConfig::default());

        let err = session.acquire(FacingMode::Front).unwrap_err();
        assert!(matches!(err, AppError::DeviceAccess(_)));
        assert!(!session.is_active());
        assert!(session.latest_frame().is_none());
    }

    #[test]
    fn test_video_only_stream() {
        let devices = FakeDevices::default();
        let config = SessionConfig {
            audio: false,
            ..Default::default()
        };
        let mut session = CameraSession::new(devices.clone(), config);

        session.acquire(FacingMode::Front).unwrap();
        assert_eq!(session.audio_format(), None);
        assert!(session.drain_audio().is_empty());
        session.release();
        assert_eq!(devices.stopped.get(), 1);
    }
}
