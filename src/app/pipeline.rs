//! Per-tick frame pipeline
//!
//! Everything the render loop does that does not touch the window: poll the
//! detection worker, schedule the next detection, compose the canvas, draw
//! the overlay and feed the recorder. Results are applied before the canvas
//! is drawn so a frame never mixes two detection results.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, Utc};
use image::RgbaImage;

use crate::camera::{CameraFrame, CameraSession, FacingMode, MediaDevices};
use crate::capture::{AudioFormat, CaptureController, DownloadSink, MediaEncoder};
use crate::detect::{
    DetectionOverlay, DetectionRequest, DetectionScheduler, DetectionService, FirstSeen,
    Resolution, WorkerEvent,
};
use crate::error::AppError;
use crate::render::{filter_frame, BeautySettings, FrameCompositor, FrameFilter};
use crate::telemetry::Notifications;

/// Where the detector is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorStatus {
    Loading,
    Ready(String),
    Unavailable,
}

impl DetectorStatus {
    pub fn text(&self) -> String {
        match self {
            DetectorStatus::Loading => "Loading model...".to_string(),
            DetectorStatus::Ready(name) => format!("Detecting with {}", name),
            DetectorStatus::Unavailable => "Object detection unavailable".to_string(),
        }
    }
}

/// Request currently at the worker
struct InFlight {
    sequence: u64,
    source_size: (u32, u32),
}

pub struct Pipeline<M, S, E, D>
where
    M: MediaDevices,
    S: DetectionService,
    E: MediaEncoder,
    D: DownloadSink,
{
    session: CameraSession<M>,
    detection: S,
    detector: DetectorStatus,
    scheduler: DetectionScheduler,
    in_flight: Option<InFlight>,
    overlay: DetectionOverlay,
    compositor: FrameCompositor,
    capture: CaptureController<E, D>,
    notifications: Notifications,
    beauty: BeautySettings,
    frame: Option<CameraFrame>,
    last_frame_number: u64,
    /// Canvas needs recomposing
    dirty: bool,
    /// Bumped every time the canvas is recomposed
    canvas_version: u64,
}

impl<M, S, E, D> Pipeline<M, S, E, D>
where
    M: MediaDevices,
    S: DetectionService,
    E: MediaEncoder,
    D: DownloadSink,
{
    pub fn new(
        session: CameraSession<M>,
        detection: S,
        scheduler: DetectionScheduler,
        overlay: DetectionOverlay,
        compositor: FrameCompositor,
        capture: CaptureController<E, D>,
        beauty: BeautySettings,
    ) -> Self {
        Self {
            session,
            detection,
            detector: DetectorStatus::Loading,
            scheduler,
            in_flight: None,
            overlay,
            compositor,
            capture,
            notifications: Notifications::default(),
            beauty,
            frame: None,
            last_frame_number: 0,
            dirty: true,
            canvas_version: 0,
        }
    }

    /// Open the camera facing `facing`, replacing any current stream
    pub fn start_camera(&mut self, facing: FacingMode, now: Instant) {
        self.scheduler.cancel();
        let result = self.session.acquire(facing);
        self.on_stream_changed(result, now);
    }

    /// Toggle front/back. Ignored where switching is not offered.
    pub fn switch_camera(&mut self, now: Instant) {
        if !self.session.can_switch() {
            tracing::debug!("Camera switching not offered on this platform");
            return;
        }
        self.scheduler.cancel();
        let result = self.session.switch_facing();
        self.on_stream_changed(result, now);
    }

    fn on_stream_changed(&mut self, result: Result<(u32, u32), AppError>, now: Instant) {
        self.frame = None;
        self.last_frame_number = 0;
        self.overlay.clear();
        self.dirty = true;

        match result {
            Ok((width, height)) => {
                self.compositor.resize(width, height);
                if matches!(self.detector, DetectorStatus::Ready(_)) {
                    self.scheduler.start(now);
                }
            }
            Err(e) => {
                // The released camera's last image must not linger
                self.compositor.clear();
                self.canvas_version += 1;
                self.notifications.report(&e);
            }
        }
    }

    /// Run one render tick. Returns true if the canvas was recomposed.
    pub fn tick(&mut self, now: Instant, filter: Option<&mut dyn FrameFilter>) -> bool {
        self.poll_detection(now);
        self.update_frame();
        self.schedule_detection(now);

        let recomposed = self.compose(filter);
        self.record(now);
        recomposed
    }

    fn poll_detection(&mut self, now: Instant) {
        while let Some(event) = self.detection.poll_event() {
            match event {
                WorkerEvent::Ready { detector } => {
                    self.detector = DetectorStatus::Ready(detector);
                    if self.session.is_active() {
                        self.scheduler.start(now);
                    }
                }
                WorkerEvent::LoadFailed(e) => {
                    self.detector = DetectorStatus::Unavailable;
                    self.scheduler.cancel();
                    self.notifications.report(&e);
                }
                WorkerEvent::Completed(response) => {
                    let source_size = match self.in_flight.take() {
                        Some(req) if req.sequence == response.sequence => req.source_size,
                        other => {
                            self.in_flight = other;
                            continue;
                        }
                    };

                    let resolution = self.scheduler.resolve(
                        response.sequence,
                        response.generation,
                        self.session.generation(),
                    );
                    if resolution == Resolution::Stale {
                        tracing::debug!(
                            "Discarding detection {} from generation {}",
                            response.sequence,
                            response.generation
                        );
                        continue;
                    }

                    match response.result {
                        Ok(detections) => {
                            tracing::debug!(
                                "Detection {}: {} objects in {:?}",
                                response.sequence,
                                detections.len(),
                                response.elapsed
                            );
                            if self.overlay.apply(detections, source_size, Local::now()) {
                                tracing::info!("First-seen log now has {} labels", self.overlay.log().len());
                            }
                            self.dirty = true;
                        }
                        Err(e) => self.notifications.report(&e),
                    }
                }
            }
        }
    }

    fn update_frame(&mut self) {
        let Some(frame) = self.session.latest_frame() else {
            return;
        };
        if frame.frame_number <= self.last_frame_number {
            return;
        }
        self.last_frame_number = frame.frame_number;
        self.frame = Some(frame);
        self.dirty = true;
    }

    fn schedule_detection(&mut self, now: Instant) {
        let Some(sequence) = self.scheduler.poll(now) else {
            return;
        };
        let Some(frame) = &self.frame else {
            self.scheduler.abandon(sequence);
            return;
        };

        let request = DetectionRequest {
            frame: Arc::clone(&frame.image),
            generation: self.session.generation(),
            sequence,
        };
        let source_size = (frame.width(), frame.height());
        if self.detection.submit(request) {
            self.in_flight = Some(InFlight {
                sequence,
                source_size,
            });
        } else {
            self.scheduler.abandon(sequence);
        }
    }

    fn compose(&mut self, filter: Option<&mut dyn FrameFilter>) -> bool {
        if !self.dirty {
            return false;
        }
        let Some(frame) = &self.frame else {
            return false;
        };
        self.dirty = false;

        let filtered = filter_frame(&self.beauty, filter, &frame.image);
        self.compositor.compose(&frame.image, filtered.as_ref());
        self.overlay.draw(self.compositor.canvas_mut());
        self.canvas_version += 1;
        true
    }

    fn record(&mut self, now: Instant) {
        let samples = self.session.drain_audio();
        if !self.capture.is_recording() {
            return;
        }

        let fed = self
            .capture
            .capture_audio(&samples)
            .and_then(|_| self.capture.capture_frame(self.compositor.canvas(), now));
        if let Err(e) = fed {
            self.notifications.report(&e);
            self.finish_recording();
        }
        self.capture.poll(now);
    }

    /// Start or stop recording
    pub fn toggle_recording(&mut self, now: Instant) {
        if self.capture.is_recording() {
            self.finish_recording();
        } else {
            self.start_recording(now);
        }
    }

    pub fn start_recording(&mut self, now: Instant) {
        let audio = self
            .session
            .audio_format()
            .map(|(sample_rate, channels)| AudioFormat {
                sample_rate,
                channels,
            });
        let size = self.compositor.size();
        match self.capture.start_recording(size, audio, now, Utc::now()) {
            Ok(format) => tracing::info!("Recording as {}", format.mime),
            Err(e) => self.notifications.report(&e),
        }
    }

    /// Stop recording and save. Returns the saved path.
    pub fn finish_recording(&mut self) -> Option<PathBuf> {
        match self.capture.stop_recording() {
            Ok(path) => {
                self.notifications
                    .push(format!("Saved {}", path.display()), Instant::now());
                Some(path)
            }
            Err(e) => {
                self.notifications.report(&e);
                None
            }
        }
    }

    /// Cancel detection, save any recording and release the camera
    pub fn shutdown(&mut self) -> Option<PathBuf> {
        self.scheduler.cancel();
        let saved = if self.capture.is_recording() {
            tracing::info!("Saving recording before exit");
            self.finish_recording()
        } else {
            None
        };
        self.session.release();
        saved
    }

    pub fn toggle_beauty(&mut self) {
        self.set_beauty_enabled(!self.beauty.enabled);
    }

    pub fn set_beauty_enabled(&mut self, enabled: bool) {
        if self.beauty.enabled != enabled {
            tracing::info!("Beauty filter {}", if enabled { "on" } else { "off" });
            self.beauty.enabled = enabled;
            self.dirty = true;
        }
    }

    pub fn set_beauty_strength(&mut self, percent: u32) {
        let next = BeautySettings::new(self.beauty.enabled, percent);
        if next != self.beauty {
            self.beauty = next;
            self.dirty = true;
        }
    }

    pub fn beauty(&self) -> BeautySettings {
        self.beauty
    }

    pub fn canvas(&self) -> &RgbaImage {
        self.compositor.canvas()
    }

    pub fn canvas_version(&self) -> u64 {
        self.canvas_version
    }

    pub fn first_seen(&self) -> &[FirstSeen] {
        self.overlay.log().entries()
    }

    pub fn detector_status(&self) -> &DetectorStatus {
        &self.detector
    }

    pub fn session(&self) -> &CameraSession<M> {
        &self.session
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_recording()
    }

    pub fn timer_text(&self) -> Option<String> {
        self.capture.timer_text()
    }

    pub fn notifications_mut(&mut self) -> &mut Notifications {
        &mut self.notifications
    }

    pub fn detection(&self) -> &S {
        &self.detection
    }
}
