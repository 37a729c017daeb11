//! Object detection
//!
//! Runs a pretrained detector off the render loop at a fixed interval and
//! draws the most recent result over the canvas. Labels seen for the first
//! time are kept in an insertion-ordered log.

pub mod labels;
pub mod log;
pub mod model;
pub mod overlay;
pub mod scheduler;
pub mod worker;

pub use log::{FirstSeen, UniqueDetectionLog};
pub use model::{DetectorConfig, ObjectDetector, YoloDetector};
pub use overlay::DetectionOverlay;
pub use scheduler::{DetectionScheduler, Resolution};
pub use worker::{DetectionRequest, DetectionResponse, DetectionService, DetectionWorker, WorkerEvent};

/// Axis-aligned box in source-frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Scale from one frame size to another
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Class name
    pub label: String,
    /// Score in 0..=1
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    /// Label drawn above the box, e.g. `person (87%)`
    pub fn display_label(&self) -> String {
        format!("{} ({}%)", self.label, (self.confidence * 100.0).round() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_label_rounds_percentage() {
        let detection = Detection {
            label: "person".to_string(),
            confidence: 0.876,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        };
        assert_eq!(detection.display_label(), "person (88%)");
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        let far = BoundingBox::new(50.0, 50.0, 10.0, 10.0);

        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&far), 0.0);
    }
}
