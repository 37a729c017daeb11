//! Camera capture thread
//!
//! Captures frames on a background thread and provides the latest frame
//! to the render loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use image::RgbaImage;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex;

use super::session::VideoTrack;
use super::FacingMode;
use crate::error::AppError;

/// How long `open` waits for the device to start streaming
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Camera frame data
#[derive(Clone)]
pub struct CameraFrame {
    /// RGBA pixels
    pub image: Arc<RgbaImage>,
    /// Frame number
    pub frame_number: u64,
    /// Frame timestamp
    pub timestamp: Instant,
}

impl CameraFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Information about an available camera
#[derive(Clone, Debug)]
pub struct CameraInfo {
    /// Camera index
    pub index: u32,
    /// Camera name
    pub name: String,
}

/// Pick the camera that best matches a facing mode.
///
/// Names are checked first; otherwise front maps to the first enumerated
/// camera and back to the second (or the first if there is only one).
pub fn select_camera(cameras: &[CameraInfo], facing: FacingMode) -> Option<u32> {
    let keywords: &[&str] = match facing {
        FacingMode::Front => &["front", "user", "facetime", "integrated"],
        FacingMode::Back => &["back", "rear", "environment", "world"],
    };

    let by_name = cameras.iter().find(|camera| {
        let name = camera.name.to_lowercase();
        keywords.iter().any(|keyword| name.contains(keyword))
    });
    if let Some(camera) = by_name {
        return Some(camera.index);
    }

    match facing {
        FacingMode::Front => cameras.first(),
        FacingMode::Back => cameras.get(1).or_else(|| cameras.first()),
    }
    .map(|camera| camera.index)
}

/// Result the capture thread reports once the stream is open
type OpenResult = Result<(u32, u32, String), String>;

/// Camera capture interface
pub struct CameraCapture {
    /// Current frame (latest captured) - triple buffered
    frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
    /// Index of the latest complete frame
    latest_frame_idx: Arc<AtomicU64>,
    /// Whether capture is running
    running: Arc<AtomicBool>,
    /// Capture thread handle
    thread_handle: Option<std::thread::JoinHandle<()>>,
    /// Native stream resolution
    width: u32,
    height: u32,
    /// Human readable device name
    name: String,
    /// Frame counter
    frame_count: Arc<AtomicU64>,
}

impl CameraCapture {
    /// List available cameras
    pub fn list_cameras() -> Vec<CameraInfo> {
        match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            Ok(camera_list) => camera_list
                .iter()
                .enumerate()
                .map(|(idx, info)| CameraInfo {
                    index: idx as u32,
                    name: info.human_name().to_string(),
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {:?}", e);
                Vec::new()
            }
        }
    }

    /// Open a camera and start streaming.
    ///
    /// Blocks until the device reports its native resolution or fails.
    pub fn open(camera_index: u32, ideal_width: u32, ideal_height: u32) -> Result<Self, AppError> {
        let frames: [Arc<Mutex<Option<CameraFrame>>>; 3] = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let latest_frame_idx = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<OpenResult>(1);

        let frames_clone = frames.clone();
        let latest_frame_idx_clone = latest_frame_idx.clone();
        let running_clone = running.clone();
        let frame_count_clone = frame_count.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(
                    camera_index,
                    ideal_width,
                    ideal_height,
                    ready_tx,
                    frames_clone,
                    latest_frame_idx_clone,
                    running_clone,
                    frame_count_clone,
                );
            })
            .map_err(|e| AppError::DeviceAccess(format!("failed to spawn capture thread: {}", e)))?;

        let mut capture = Self {
            frames,
            latest_frame_idx,
            running,
            thread_handle: Some(thread_handle),
            width: ideal_width,
            height: ideal_height,
            name: format!("Camera {}", camera_index),
            frame_count,
        };

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok((width, height, name))) => {
                capture.width = width;
                capture.height = height;
                capture.name = name;
                Ok(capture)
            }
            Ok(Err(e)) => {
                capture.stop();
                Err(AppError::DeviceAccess(e))
            }
            Err(_) => {
                capture.stop();
                Err(AppError::DeviceAccess(format!(
                    "camera {} did not start within {:?}",
                    camera_index, OPEN_TIMEOUT
                )))
            }
        }
    }

    /// Open the camera, preferring the closest format to the ideal size
    fn open_camera(index: CameraIndex, ideal_width: u32, ideal_height: u32) -> Result<Camera, String> {
        let closest = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(
            CameraFormat::new_from(ideal_width, ideal_height, FrameFormat::MJPEG, 30),
        ));

        match Camera::new(index.clone(), closest) {
            Ok(c) => Ok(c),
            Err(e) => {
                tracing::warn!("Failed to open camera near {}x{}: {:?}", ideal_width, ideal_height, e);

                let highest = RequestedFormat::new::<RgbAFormat>(
                    RequestedFormatType::HighestResolution(Resolution::new(ideal_width, ideal_height)),
                );

                match Camera::new(index.clone(), highest) {
                    Ok(c) => Ok(c),
                    Err(e2) => {
                        tracing::warn!("Failed with HighestResolution: {:?}", e2);

                        // Last resort: whatever the driver offers
                        let any = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None);
                        Camera::new(index, any)
                            .map_err(|e3| format!("failed to open camera with all format attempts: {}", e3))
                    }
                }
            }
        }
    }

    /// Camera capture thread
    #[allow(clippy::too_many_arguments)]
    fn capture_thread(
        camera_index: u32,
        ideal_width: u32,
        ideal_height: u32,
        ready: Sender<OpenResult>,
        frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
        latest_frame_idx: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        frame_count: Arc<AtomicU64>,
    ) {
        tracing::info!("Starting camera capture thread (camera {})", camera_index);

        let mut camera = match Self::open_camera(CameraIndex::Index(camera_index), ideal_width, ideal_height) {
            Ok(c) => c,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        if let Err(e) = camera.open_stream() {
            let _ = ready.send(Err(format!("failed to open camera stream: {}", e)));
            return;
        }

        let resolution = camera.resolution();
        let name = camera.info().human_name().to_string();
        tracing::info!(
            "Camera opened: {} ({}x{})",
            name,
            resolution.width(),
            resolution.height()
        );
        let _ = ready.send(Ok((resolution.width(), resolution.height(), name)));

        let mut write_idx: u64 = 0;

        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(frame) => match frame.decode_image::<RgbAFormat>() {
                    Ok(decoded) => {
                        let frame_num = frame_count.fetch_add(1, Ordering::Relaxed) + 1;
                        let (width, height) = (decoded.width(), decoded.height());
                        let Some(image) = RgbaImage::from_raw(width, height, decoded.into_raw()) else {
                            tracing::warn!("Decoded frame has unexpected size");
                            continue;
                        };

                        let camera_frame = CameraFrame {
                            image: Arc::new(image),
                            frame_number: frame_num,
                            timestamp: Instant::now(),
                        };

                        let slot = (write_idx % 3) as usize;
                        *frames[slot].lock() = Some(camera_frame);

                        latest_frame_idx.store(write_idx, Ordering::Release);
                        write_idx = write_idx.wrapping_add(1);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to decode frame: {:?}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }

        if let Err(e) = camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {:?}", e);
        }
        tracing::info!("Camera capture thread stopped");
    }

    /// Get the latest captured frame
    pub fn latest_frame(&self) -> Option<CameraFrame> {
        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        self.frames[slot].lock().clone()
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stop capturing and join the capture thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl VideoTrack for CameraCapture {
    fn label(&self) -> &str {
        &self.name
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn latest_frame(&self) -> Option<CameraFrame> {
        CameraCapture::latest_frame(self)
    }

    fn stop(&mut self) {
        CameraCapture::stop(self);
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cameras(names: &[&str]) -> Vec<CameraInfo> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| CameraInfo {
                index: i as u32,
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_select_camera_by_name() {
        let list = cameras(&["Back Camera", "Front Camera"]);
        assert_eq!(select_camera(&list, FacingMode::Front), Some(1));
        assert_eq!(select_camera(&list, FacingMode::Back), Some(0));
    }

    #[test]
    fn test_select_camera_fallback_order() {
        let list = cameras(&["USB Video Device", "HD Webcam C920"]);
        assert_eq!(select_camera(&list, FacingMode::Front), Some(0));
        assert_eq!(select_camera(&list, FacingMode::Back), Some(1));

        let single = cameras(&["USB Video Device"]);
        assert_eq!(select_camera(&single, FacingMode::Back), Some(0));
        assert_eq!(select_camera(&[], FacingMode::Front), None);
    }
}
