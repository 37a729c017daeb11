//! Canvas recording
//!
//! [`CaptureController`] drives the `Idle -> Recording -> Idle` cycle: it
//! picks a format, feeds the composed canvas and microphone samples to a
//! [`MediaEncoder`], collects the encoded segments and hands the finished
//! file to a [`DownloadSink`].

pub mod download;
pub mod encoder;
pub mod format;
pub mod timer;

pub use download::{recording_file_name, DownloadSink, FileDownloads};
pub use encoder::{AudioFormat, EncoderSettings, FfmpegEncoder, MediaEncoder};
pub use format::{select_format, FormatSupport, RecordingFormat};
pub use timer::RecordingTimer;

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::RgbaImage;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
}

/// An in-progress recording
#[derive(Debug)]
struct RecordingSession {
    format: RecordingFormat,
    started_at: DateTime<Utc>,
    frame_size: (u32, u32),
    chunks: Vec<Vec<u8>>,
    /// Time zero of the video stream
    clock_start: Instant,
    /// Frames accepted by the encoder
    frames: u64,
}

impl RecordingSession {
    fn collect(&mut self, segments: Vec<Vec<u8>>) {
        self.chunks
            .extend(segments.into_iter().filter(|segment| !segment.is_empty()));
    }

    fn byte_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Frames the stream should hold at `now`: one at time zero, then one
    /// per elapsed interval.
    fn frames_due(&self, now: Instant, fps: u32) -> u64 {
        let elapsed = now.saturating_duration_since(self.clock_start).as_nanos();
        (elapsed * fps as u128 / 1_000_000_000) as u64 + 1
    }
}

pub struct CaptureController<E: MediaEncoder, D: DownloadSink> {
    encoder: E,
    downloads: D,
    preferences: Vec<String>,
    fps: u32,
    session: Option<RecordingSession>,
    timer: RecordingTimer,
}

impl<E: MediaEncoder, D: DownloadSink> CaptureController<E, D> {
    pub fn new(encoder: E, downloads: D, preferences: Vec<String>, fps: u32) -> Self {
        Self {
            encoder,
            downloads,
            preferences,
            fps: fps.max(1),
            session: None,
            timer: RecordingTimer::default(),
        }
    }

    pub fn state(&self) -> CaptureState {
        if self.session.is_some() {
            CaptureState::Recording
        } else {
            CaptureState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Mime type of the active recording
    pub fn active_format(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.format.mime.as_str())
    }

    /// Begin recording a canvas of `frame_size`, with audio when `audio` is
    /// the live microphone format.
    pub fn start_recording(
        &mut self,
        frame_size: (u32, u32),
        audio: Option<AudioFormat>,
        now: Instant,
        started_at: DateTime<Utc>,
    ) -> Result<&RecordingFormat, AppError> {
        if self.session.is_some() {
            return Err(AppError::AlreadyRecording);
        }
        if !self.encoder.is_available() {
            return Err(AppError::RecordingUnsupported(
                "no media encoder is available".to_string(),
            ));
        }
        let format = select_format(&self.preferences, &self.encoder).ok_or_else(|| {
            AppError::RecordingUnsupported(format!(
                "none of [{}] can be encoded",
                self.preferences.join(", ")
            ))
        })?;

        let (width, height) = frame_size;
        if width == 0 || height == 0 {
            return Err(AppError::RecordingUnsupported(
                "no video frame to record".to_string(),
            ));
        }
        // yuv420p needs even dimensions
        let frame_size = ((width & !1).max(2), (height & !1).max(2));

        self.encoder.start(&EncoderSettings {
            format: format.clone(),
            width: frame_size.0,
            height: frame_size.1,
            fps: self.fps,
            audio,
        })?;

        tracing::info!(
            "Recording started: {} at {}x{} {} fps{}",
            format.mime,
            frame_size.0,
            frame_size.1,
            self.fps,
            if audio.is_some() { " with audio" } else { "" }
        );

        self.timer.start(now);
        let session = self.session.insert(RecordingSession {
            format,
            started_at,
            frame_size,
            chunks: Vec::new(),
            clock_start: now,
            frames: 0,
        });
        Ok(&session.format)
    }

    /// Offer the composed canvas. The stream is constant rate, so the canvas
    /// is written as many times as needed to keep the frame count in step
    /// with wall-clock time; frames the encoder refuses stay owed. Returns
    /// the number of frames written.
    pub fn capture_frame(&mut self, canvas: &RgbaImage, now: Instant) -> Result<u64, AppError> {
        let fps = self.fps;
        let Some(session) = self.session.as_mut() else {
            return Ok(0);
        };
        if canvas.width() == 0 || canvas.height() == 0 {
            return Ok(0);
        }
        let owed = session.frames_due(now, fps).saturating_sub(session.frames);
        if owed == 0 {
            return Ok(0);
        }

        let (width, height) = session.frame_size;
        let scaled;
        let frame = if canvas.dimensions() == (width, height) {
            canvas
        } else {
            scaled = image::imageops::resize(canvas, width, height, FilterType::Triangle);
            &scaled
        };

        let mut written = 0;
        while written < owed {
            if !self.encoder.write_video(frame)? {
                break;
            }
            written += 1;
        }
        if owed > 1 {
            tracing::trace!("Caught up {} of {} owed frames", written, owed);
        }
        session.frames += written;
        Ok(written)
    }

    /// Forward microphone samples while recording
    pub fn capture_audio(&mut self, samples: &[f32]) -> Result<(), AppError> {
        if self.session.is_none() || samples.is_empty() {
            return Ok(());
        }
        self.encoder.write_audio(samples)
    }

    /// Collect encoder output and advance the timer. Returns true if the
    /// timer text changed.
    pub fn poll(&mut self, now: Instant) -> bool {
        if let Some(session) = self.session.as_mut() {
            session.collect(self.encoder.take_segments());
        }
        self.timer.tick(now)
    }

    /// Finish the recording and deliver it as one file
    pub fn stop_recording(&mut self) -> Result<PathBuf, AppError> {
        let mut session = self.session.take().ok_or(AppError::NotRecording)?;
        self.timer.stop();

        session.collect(self.encoder.take_segments());
        let remaining = self.encoder.finish()?;
        session.collect(remaining);

        let bytes = session.byte_len();
        tracing::info!(
            "Recording stopped: {} frames, {} segments, {} bytes",
            session.frames,
            session.chunks.len(),
            bytes
        );
        if bytes == 0 {
            return Err(AppError::RecordingEmpty);
        }

        let data = session.chunks.concat();
        let name = recording_file_name(session.started_at, session.format.extension());
        self.downloads.deliver(&name, &data)
    }

    pub fn timer_text(&self) -> Option<String> {
        self.timer.text()
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeEncoder {
        supported: Vec<&'static str>,
        started: Option<EncoderSettings>,
        frames: Vec<(u32, u32)>,
        /// Refuse every nth write, as a backed-up encoder would
        refuse_every: Option<usize>,
        write_attempts: usize,
        audio_samples: usize,
        pending: Vec<Vec<u8>>,
        tail: Vec<Vec<u8>>,
    }

    impl FormatSupport for FakeEncoder {
        fn is_type_supported(&self, mime: &str) -> bool {
            self.supported.contains(&mime)
        }
    }

    impl MediaEncoder for FakeEncoder {
        fn start(&mut self, settings: &EncoderSettings) -> Result<(), AppError> {
            self.started = Some(settings.clone());
            Ok(())
        }

        fn write_video(&mut self, frame: &RgbaImage) -> Result<bool, AppError> {
            self.write_attempts += 1;
            if let Some(n) = self.refuse_every {
                if self.write_attempts % n == 0 {
                    return Ok(false);
                }
            }
            self.frames.push(frame.dimensions());
            Ok(true)
        }

        fn write_audio(&mut self, samples: &[f32]) -> Result<(), AppError> {
            self.audio_samples += samples.len();
            Ok(())
        }

        fn take_segments(&mut self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.pending)
        }

        fn finish(&mut self) -> Result<Vec<Vec<u8>>, AppError> {
            self.started = None;
            Ok(std::mem::take(&mut self.tail))
        }
    }

    #[derive(Default)]
    struct MemoryDownloads {
        files: Vec<(String, Vec<u8>)>,
    }

    impl DownloadSink for MemoryDownloads {
        fn deliver(&mut self, file_name: &str, data: &[u8]) -> Result<PathBuf, AppError> {
            self.files.push((file_name.to_string(), data.to_vec()));
            Ok(PathBuf::from(file_name))
        }
    }

    const VP9: &str = "video/webm;codecs=vp9,opus";
    const VP8: &str = "video/webm;codecs=vp8,opus";
    const MP4: &str = "video/mp4;codecs=avc1,mp4a";

    fn controller(supported: Vec<&'static str>) -> CaptureController<FakeEncoder, MemoryDownloads> {
        let encoder = FakeEncoder {
            supported,
            ..Default::default()
        };
        let prefs = vec![VP9.to_string(), VP8.to_string(), MP4.to_string()];
        CaptureController::new(encoder, MemoryDownloads::default(), prefs, 30)
    }

    fn started_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 7).unwrap()
    }

    #[test]
    fn test_empty_recording_delivers_nothing() {
        let mut capture = controller(vec![VP8]);
        capture
            .start_recording((640, 480), None, Instant::now(), started_at())
            .unwrap();
        assert_eq!(capture.state(), CaptureState::Recording);

        assert_eq!(capture.stop_recording(), Err(AppError::RecordingEmpty));
        assert_eq!(capture.state(), CaptureState::Idle);
        assert!(capture.downloads.files.is_empty());
        assert_eq!(capture.timer_text(), None);
    }

    #[test]
    fn test_stop_while_idle_is_an_error() {
        let mut capture = controller(vec![VP8]);
        assert_eq!(capture.stop_recording(), Err(AppError::NotRecording));
        assert_eq!(capture.state(), CaptureState::Idle);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut capture = controller(vec![VP8]);
        let now = Instant::now();
        capture.start_recording((640, 480), None, now, started_at()).unwrap();
        assert_eq!(
            capture.start_recording((640, 480), None, now, started_at()),
            Err(AppError::AlreadyRecording)
        );
        assert_eq!(capture.active_format(), Some(VP8));
    }

    #[test]
    fn test_unsupported_formats() {
        let mut capture = controller(vec![]);
        let result = capture.start_recording((640, 480), None, Instant::now(), started_at());
        assert!(matches!(result, Err(AppError::RecordingUnsupported(_))));
        assert_eq!(capture.state(), CaptureState::Idle);
    }

    #[test]
    fn test_segments_concatenated_into_one_file() {
        let mut capture = controller(vec![MP4, VP9]);
        let t0 = Instant::now();
        let audio = AudioFormat {
            sample_rate: 48_000,
            channels: 1,
        };
        let format = capture
            .start_recording((640, 480), Some(audio), t0, started_at())
            .unwrap();
        assert_eq!(format.mime, VP9);

        let canvas = RgbaImage::new(640, 480);
        assert_eq!(capture.capture_frame(&canvas, t0).unwrap(), 1);
        capture.capture_audio(&[0.0; 480]).unwrap();

        capture.encoder.pending = vec![b"ab".to_vec(), Vec::new()];
        capture.poll(t0 + Duration::from_millis(10));
        capture.encoder.tail = vec![b"cd".to_vec()];

        let path = capture.stop_recording().unwrap();
        assert_eq!(path, PathBuf::from("recording-2024-05-01T12-30-07.000Z.webm"));
        assert_eq!(capture.downloads.files.len(), 1);
        assert_eq!(capture.downloads.files[0].1, b"abcd");
        assert_eq!(capture.encoder.audio_samples, 480);
    }

    #[test]
    fn test_frames_throttled_and_scaled() {
        let mut capture = controller(vec![VP8]);
        let t0 = Instant::now();
        capture.start_recording((640, 480), None, t0, started_at()).unwrap();

        let canvas = RgbaImage::new(320, 240);
        assert_eq!(capture.capture_frame(&canvas, t0).unwrap(), 1);
        assert_eq!(capture.capture_frame(&canvas, t0 + Duration::from_millis(10)).unwrap(), 0);
        assert_eq!(capture.capture_frame(&canvas, t0 + Duration::from_millis(40)).unwrap(), 1);

        assert_eq!(capture.encoder.frames, vec![(640, 480), (640, 480)]);
    }

    /// Render ticks at 60 Hz for ten seconds
    fn sixty_hz_ticks(capture: &mut CaptureController<FakeEncoder, MemoryDownloads>, t0: Instant) {
        let canvas = RgbaImage::new(64, 48);
        let tick = Duration::from_nanos(1_000_000_000 / 60);
        for i in 0..600 {
            capture.capture_frame(&canvas, t0 + tick * i).unwrap();
        }
    }

    #[test]
    fn test_frame_count_follows_wall_clock_at_render_rate() {
        let mut capture = controller(vec![VP8]);
        let t0 = Instant::now();
        capture.start_recording((64, 48), None, t0, started_at()).unwrap();

        sixty_hz_ticks(&mut capture, t0);
        assert_eq!(capture.encoder.frames.len(), 300);
    }

    #[test]
    fn test_refused_frames_are_written_later() {
        let mut capture = controller(vec![VP8]);
        capture.encoder.refuse_every = Some(3);
        let t0 = Instant::now();
        capture.start_recording((64, 48), None, t0, started_at()).unwrap();

        sixty_hz_ticks(&mut capture, t0);
        assert!(capture.encoder.write_attempts > 300);
        assert_eq!(capture.encoder.frames.len(), 300);
    }

    #[test]
    fn test_stalled_ticks_are_caught_up() {
        let mut capture = controller(vec![VP8]);
        let t0 = Instant::now();
        capture.start_recording((64, 48), None, t0, started_at()).unwrap();

        let canvas = RgbaImage::new(64, 48);
        assert_eq!(capture.capture_frame(&canvas, t0).unwrap(), 1);
        assert_eq!(capture.capture_frame(&canvas, t0 + Duration::from_secs(1)).unwrap(), 30);
        assert_eq!(capture.encoder.frames.len(), 31);
    }

    #[test]
    fn test_idle_controller_ignores_frames() {
        let mut capture = controller(vec![VP8]);
        let canvas = RgbaImage::new(64, 48);
        assert_eq!(capture.capture_frame(&canvas, Instant::now()).unwrap(), 0);
        capture.capture_audio(&[0.5; 16]).unwrap();
        assert!(capture.encoder.frames.is_empty());
        assert_eq!(capture.encoder.audio_samples, 0);
    }

    #[test]
    fn test_timer_follows_recording() {
        let mut capture = controller(vec![VP8]);
        let t0 = Instant::now();
        capture.start_recording((64, 48), None, t0, started_at()).unwrap();
        assert_eq!(capture.timer_text().as_deref(), Some("REC 00:00"));
        assert!(capture.poll(t0 + Duration::from_millis(2500)));
        assert_eq!(capture.timer_text().as_deref(), Some("REC 00:02"));
    }
}
