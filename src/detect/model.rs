//! Detection model
//!
//! Wraps an ONNX object detector with YOLOv8-style output through ONNX
//! Runtime. Pre- and post-processing are plain functions over `image` and
//! `ndarray` buffers so they can be exercised without a model file.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbaImage;
use ndarray::{Array4, ArrayView2, Axis};

use super::labels::class_name;
use super::{BoundingBox, Detection};
use crate::error::AppError;
use crate::settings::AppSettings;

/// Square model input edge in pixels
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// File searched for in the `models` directory when no path is configured
const DEFAULT_MODEL_FILE: &str = "yolov8n.onnx";

/// Value used to pad the letterboxed input
const PAD_VALUE: f32 = 114.0 / 255.0;

/// Box coordinates precede class scores in each prediction column
const CXYWH_OFFSET: usize = 4;

/// Something that turns a frame into detections
pub trait ObjectDetector: Send {
    fn name(&self) -> &str;
    fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<Detection>, AppError>;
}

/// Model location and decoding thresholds
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl DetectorConfig {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            model_path: settings.model_path.as_ref().map(PathBuf::from),
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: settings.confidence_threshold,
            iou_threshold: settings.iou_threshold,
            max_detections: settings.max_detections,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

/// Resize into the top-left of a square input, preserving aspect ratio.
///
/// Returns the NCHW tensor and the scale applied to the source frame.
pub fn letterbox(frame: &RgbaImage, size: u32) -> (Array4<f32>, f32) {
    let side = size as usize;
    let mut input = Array4::from_elem((1, 3, side, side), PAD_VALUE);

    let (w0, h0) = (frame.width() as f32, frame.height() as f32);
    if w0 == 0.0 || h0 == 0.0 {
        return (input, 1.0);
    }

    let ratio = (size as f32 / w0).min(size as f32 / h0);
    let w_new = ((w0 * ratio).round() as u32).clamp(1, size);
    let h_new = ((h0 * ratio).round() as u32).clamp(1, size);
    let resized = image::imageops::resize(frame, w_new, h_new, FilterType::Triangle);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b, _] = pixel.0;
        input[[0, 0, y, x]] = r as f32 / 255.0;
        input[[0, 1, y, x]] = g as f32 / 255.0;
        input[[0, 2, y, x]] = b as f32 / 255.0;
    }

    (input, ratio)
}

/// Decode a `[4 + classes, anchors]` prediction matrix into detections in
/// source-frame pixels.
pub fn decode_predictions(
    predictions: ArrayView2<'_, f32>,
    ratio: f32,
    source_size: (u32, u32),
    confidence_threshold: f32,
) -> Vec<Detection> {
    let (src_w, src_h) = (source_size.0 as f32, source_size.1 as f32);
    let mut detections = Vec::new();

    if predictions.nrows() <= CXYWH_OFFSET || ratio <= 0.0 {
        return detections;
    }

    for pred in predictions.axis_iter(Axis(1)) {
        let scores = pred.slice(ndarray::s![CXYWH_OFFSET..]);
        let Some((class_id, &confidence)) = scores
            .iter()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })
        else {
            continue;
        };

        if confidence < confidence_threshold {
            continue;
        }
        let Some(label) = class_name(class_id) else {
            continue;
        };

        let cx = pred[0] / ratio;
        let cy = pred[1] / ratio;
        let w = pred[2] / ratio;
        let h = pred[3] / ratio;
        let x = (cx - w / 2.0).clamp(0.0, src_w);
        let y = (cy - h / 2.0).clamp(0.0, src_h);
        let width = (w.min(src_w - x)).max(0.0);
        let height = (h.min(src_h - y)).max(0.0);

        detections.push(Detection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox::new(x, y, width, height),
        });
    }

    detections
}

/// Greedy per-class non-maximum suppression, highest confidence first
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections.drain(..) {
        let suppressed = kept.iter().any(|k| {
            k.label == candidate.label && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    *detections = kept;
}

/// Locate the model file.
///
/// An explicit path wins; otherwise `models/yolov8n.onnx` is searched next
/// to the executable, its ancestors, and the working directory.
pub fn find_model_path(explicit: Option<&Path>) -> Result<PathBuf, String> {
    if let Some(path) = explicit {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(format!("Model not found: {}", path.display()))
        };
    }

    let mut candidates = Vec::new();
    if let Ok(exe_path) = std::env::current_exe() {
        // target/debug, target, crate root
        for dir in exe_path.ancestors().skip(1).take(3) {
            candidates.push(dir.join("models"));
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("models"));
    }

    candidates
        .iter()
        .map(|dir| dir.join(DEFAULT_MODEL_FILE))
        .find(|path| path.exists())
        .ok_or_else(|| {
            format!(
                "{} not found. Place an exported model in a 'models' directory or set modelPath.",
                DEFAULT_MODEL_FILE
            )
        })
}

/// YOLOv8 detector running on ONNX Runtime
pub struct YoloDetector {
    session: ort::session::Session,
    config: DetectorConfig,
    name: String,
}

impl YoloDetector {
    /// Load the model described by `config`
    pub fn load(config: DetectorConfig) -> Result<Self, AppError> {
        let path = find_model_path(config.model_path.as_deref()).map_err(AppError::ModelLoad)?;
        tracing::info!("Loading detection model from {}", path.display());

        let session = ort::session::Session::builder()
            .map_err(|e| AppError::ModelLoad(format!("Failed to create session builder: {}", e)))?
            .with_intra_threads(2)
            .map_err(|e| AppError::ModelLoad(format!("Failed to set threads: {}", e)))?
            .commit_from_file(&path)
            .map_err(|e| AppError::ModelLoad(format!("Failed to load {}: {}", path.display(), e)))?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "detector".to_string());

        Ok(Self {
            session,
            config,
            name,
        })
    }
}

impl ObjectDetector for YoloDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<Detection>, AppError> {
        let (input, ratio) = letterbox(frame, self.config.input_size);

        let input_tensor = ort::value::Tensor::from_array(input)
            .map_err(|e| AppError::ModelInference(format!("Failed to create tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .map_err(|e| AppError::ModelInference(format!("Inference failed: {}", e)))?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| AppError::ModelInference("No output from detection model".to_string()))?;

        // Returns (shape, data slice)
        let (shape, data) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::ModelInference(format!("Failed to extract output: {}", e)))?;

        if shape.len() != 3 {
            return Err(AppError::ModelInference(format!(
                "Unexpected output rank {} (expected [1, 4 + classes, anchors])",
                shape.len()
            )));
        }
        let (rows, cols) = (shape[1] as usize, shape[2] as usize);
        let view = ArrayView2::from_shape((rows, cols), data)
            .map_err(|e| AppError::ModelInference(format!("Bad output shape: {}", e)))?;

        // Some exports emit [anchors, 4 + classes]
        let predictions = if rows > cols { view.reversed_axes() } else { view };

        let mut detections = decode_predictions(
            predictions,
            ratio,
            (frame.width(), frame.height()),
            self.config.confidence_threshold,
        );
        non_max_suppression(&mut detections, self.config.iou_threshold);
        detections.truncate(self.config.max_detections);

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Prediction matrix with one column per `(cx, cy, w, h, class, score)`
    fn predictions(columns: &[(f32, f32, f32, f32, usize, f32)]) -> Array2<f32> {
        let mut preds = Array2::zeros((CXYWH_OFFSET + 80, columns.len()));
        for (i, &(cx, cy, w, h, class, score)) in columns.iter().enumerate() {
            preds[[0, i]] = cx;
            preds[[1, i]] = cy;
            preds[[2, i]] = w;
            preds[[3, i]] = h;
            preds[[CXYWH_OFFSET + class, i]] = score;
        }
        preds
    }

    #[test]
    fn test_letterbox_scales_into_top_left() {
        let frame = RgbaImage::from_pixel(64, 32, image::Rgba([255, 0, 0, 255]));
        let (input, ratio) = letterbox(&frame, 32);

        assert_eq!(input.shape(), &[1, 3, 32, 32]);
        assert_eq!(ratio, 0.5);
        assert!((input[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(input[[0, 1, 0, 0]], 0.0);
        // Bottom half is padding
        assert!((input[[0, 0, 31, 0]] - PAD_VALUE).abs() < 1e-6);
    }

    #[test]
    fn test_decode_maps_back_to_source_pixels() {
        // Source 1280x720 letterboxed into 640 -> ratio 0.5
        let preds = predictions(&[
            (100.0, 100.0, 40.0, 60.0, 0, 0.9),
            (300.0, 200.0, 20.0, 20.0, 15, 0.3),
        ]);

        let detections = decode_predictions(preds.view(), 0.5, (1280, 720), 0.5);
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(d.label, "person");
        assert_eq!(d.bbox, BoundingBox::new(160.0, 140.0, 80.0, 120.0));
    }

    #[test]
    fn test_decode_clamps_to_frame() {
        let preds = predictions(&[(5.0, 5.0, 20.0, 20.0, 16, 0.8)]);
        let detections = decode_predictions(preds.view(), 1.0, (100, 100), 0.5);

        assert_eq!(detections[0].label, "dog");
        assert_eq!(detections[0].bbox.x, 0.0);
        assert_eq!(detections[0].bbox.y, 0.0);
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap_only() {
        let mut detections = vec![
            Detection {
                label: "cat".to_string(),
                confidence: 0.6,
                bbox: BoundingBox::new(2.0, 0.0, 10.0, 10.0),
            },
            Detection {
                label: "cat".to_string(),
                confidence: 0.9,
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            },
            Detection {
                label: "dog".to_string(),
                confidence: 0.7,
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            },
        ];

        non_max_suppression(&mut detections, 0.45);

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "cat");
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[1].label, "dog");
    }

    #[test]
    fn test_missing_explicit_model_is_an_error() {
        let err = find_model_path(Some(Path::new("/nonexistent/model.onnx"))).unwrap_err();
        assert!(err.contains("/nonexistent/model.onnx"));
    }
}
