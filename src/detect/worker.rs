//! Detection worker thread
//!
//! Owns the detector and runs requests off the render loop. The model is
//! loaded on the worker thread so startup never blocks the window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbaImage;

use super::model::ObjectDetector;
use super::Detection;
use crate::error::AppError;

/// Frame to run detection on
pub struct DetectionRequest {
    pub frame: Arc<RgbaImage>,
    /// Camera session generation the frame came from
    pub generation: u64,
    pub sequence: u64,
}

/// Outcome of one request
#[derive(Debug)]
pub struct DetectionResponse {
    pub generation: u64,
    pub sequence: u64,
    pub result: Result<Vec<Detection>, AppError>,
    pub elapsed: Duration,
}

/// Messages from the worker to the render loop
#[derive(Debug)]
pub enum WorkerEvent {
    /// Model loaded and accepting requests
    Ready { detector: String },
    /// Model failed to load; the worker has exited
    LoadFailed(AppError),
    Completed(DetectionResponse),
}

/// Asynchronous detection backend polled from the render loop
pub trait DetectionService {
    /// Queue a request; returns false if it was not accepted
    fn submit(&mut self, request: DetectionRequest) -> bool;
    /// Next pending event, if any
    fn poll_event(&mut self) -> Option<WorkerEvent>;
}

pub struct DetectionWorker {
    /// Channel to send frames to the worker thread
    request_tx: Option<Sender<DetectionRequest>>,
    event_rx: Receiver<WorkerEvent>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl DetectionWorker {
    /// Start the worker; `factory` builds the detector on the worker thread
    pub fn spawn<F>(factory: F) -> Result<Self, AppError>
    where
        F: FnOnce() -> Result<Box<dyn ObjectDetector>, AppError> + Send + 'static,
    {
        let (request_tx, request_rx) = crossbeam_channel::bounded::<DetectionRequest>(1);
        let (event_tx, event_rx) = crossbeam_channel::unbounded::<WorkerEvent>();

        let thread_handle = std::thread::Builder::new()
            .name("object-detection".to_string())
            .spawn(move || Self::worker_thread(factory, request_rx, event_tx))
            .map_err(|e| AppError::ModelLoad(format!("Failed to spawn detection thread: {}", e)))?;

        Ok(Self {
            request_tx: Some(request_tx),
            event_rx,
            thread_handle: Some(thread_handle),
        })
    }

    fn worker_thread<F>(factory: F, requests: Receiver<DetectionRequest>, events: Sender<WorkerEvent>)
    where
        F: FnOnce() -> Result<Box<dyn ObjectDetector>, AppError>,
    {
        tracing::info!("Detection thread started");

        let mut detector = match factory() {
            Ok(detector) => {
                tracing::info!("Detector ready: {}", detector.name());
                let _ = events.send(WorkerEvent::Ready {
                    detector: detector.name().to_string(),
                });
                detector
            }
            Err(e) => {
                let _ = events.send(WorkerEvent::LoadFailed(e));
                return;
            }
        };

        while let Ok(request) = requests.recv() {
            let started = Instant::now();
            let result = detector.detect(&request.frame);
            let response = DetectionResponse {
                generation: request.generation,
                sequence: request.sequence,
                result,
                elapsed: started.elapsed(),
            };
            if events.send(WorkerEvent::Completed(response)).is_err() {
                break;
            }
        }

        tracing::info!("Detection thread stopped");
    }

    /// Stop the worker thread
    pub fn stop(&mut self) {
        // Dropping the sender ends the request loop
        self.request_tx = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl DetectionService for DetectionWorker {
    fn submit(&mut self, request: DetectionRequest) -> bool {
        let Some(sender) = &self.request_tx else {
            return false;
        };
        match sender.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                self.request_tx = None;
                false
            }
        }
    }

    fn poll_event(&mut self) -> Option<WorkerEvent> {
        self.event_rx.try_recv().ok()
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    struct FixedDetector {
        fail: bool,
    }

    impl ObjectDetector for FixedDetector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<Detection>, AppError> {
            if self.fail {
                return Err(AppError::ModelInference("boom".to_string()));
            }
            Ok(vec![Detection {
                label: "cup".to_string(),
                confidence: 0.8,
                bbox: BoundingBox::new(0.0, 0.0, frame.width() as f32, frame.height() as f32),
            }])
        }
    }

    fn next_event(worker: &DetectionWorker) -> WorkerEvent {
        worker
            .event_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker event")
    }

    fn request(sequence: u64) -> DetectionRequest {
        DetectionRequest {
            frame: Arc::new(RgbaImage::new(8, 6)),
            generation: 3,
            sequence,
        }
    }

    #[test]
    fn test_worker_runs_requests() {
        let mut worker =
            DetectionWorker::spawn(|| Ok(Box::new(FixedDetector { fail: false }) as Box<dyn ObjectDetector>))
                .unwrap();

        assert!(matches!(next_event(&worker), WorkerEvent::Ready { ref detector } if detector == "fixed"));
        assert!(worker.submit(request(7)));

        match next_event(&worker) {
            WorkerEvent::Completed(response) => {
                assert_eq!(response.generation, 3);
                assert_eq!(response.sequence, 7);
                let detections = response.result.unwrap();
                assert_eq!(detections[0].bbox.width, 8.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_inference_error_does_not_stop_worker() {
        let mut worker =
            DetectionWorker::spawn(|| Ok(Box::new(FixedDetector { fail: true }) as Box<dyn ObjectDetector>))
                .unwrap();
        next_event(&worker);

        for sequence in 0..2 {
            assert!(worker.submit(request(sequence)));
            match next_event(&worker) {
                WorkerEvent::Completed(response) => {
                    assert!(matches!(response.result, Err(AppError::ModelInference(_))));
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_load_failure_is_reported() {
        let mut worker =
            DetectionWorker::spawn(|| Err(AppError::ModelLoad("missing model".to_string()))).unwrap();

        assert!(matches!(next_event(&worker), WorkerEvent::LoadFailed(AppError::ModelLoad(_))));
        worker.stop();
        assert!(!worker.submit(request(1)));
    }
}
