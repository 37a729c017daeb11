//! Settings management for Smart Camera
//!
//! Handles loading/saving of the XML preferences file stored in the user's
//! config directory.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

fn default_target_fps() -> u32 {
    60
}

fn default_detection_interval_ms() -> u64 {
    500
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_max_detections() -> usize {
    20
}

fn default_ideal_width() -> u32 {
    640
}

fn default_ideal_height() -> u32 {
    480
}

fn default_true() -> bool {
    true
}

fn default_recording_fps() -> u32 {
    30
}

fn default_recording_formats() -> Vec<String> {
    vec![
        "video/webm;codecs=vp9,opus".to_string(),
        "video/webm;codecs=vp8,opus".to_string(),
        "video/mp4;codecs=avc1,mp4a".to_string(),
    ]
}

fn default_watermark_path() -> Option<String> {
    Some("assets/logo.png".to_string())
}

fn default_watermark_width_percent() -> f32 {
    15.0
}

fn default_watermark_margin() -> u32 {
    20
}

fn default_beauty_strength() -> u32 {
    50
}

/// User preferences stored in `<config_dir>/SmartCamera/settings.xml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename = "SmartCameraSettings")]
pub struct AppSettings {
    /// Render/composite frame rate (15-240)
    #[serde(rename = "targetFps", default = "default_target_fps")]
    pub target_fps: u32,

    /// Interval between detection requests in milliseconds
    #[serde(rename = "detectionIntervalMs", default = "default_detection_interval_ms")]
    pub detection_interval_ms: u64,

    /// Minimum score for a detection to be kept (0-1)
    #[serde(rename = "confidenceThreshold", default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// IoU above which same-class boxes are suppressed (0-1)
    #[serde(rename = "iouThreshold", default = "default_iou_threshold")]
    pub iou_threshold: f32,

    #[serde(rename = "maxDetections", default = "default_max_detections")]
    pub max_detections: usize,

    /// Explicit ONNX model path. When unset the `models` directory is searched.
    #[serde(rename = "modelPath", default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,

    /// Ideal camera width requested from the device
    #[serde(rename = "idealWidth", default = "default_ideal_width")]
    pub ideal_width: u32,

    /// Ideal camera height requested from the device
    #[serde(rename = "idealHeight", default = "default_ideal_height")]
    pub ideal_height: u32,

    /// Open the default microphone alongside the camera
    #[serde(rename = "captureAudio", default = "default_true")]
    pub capture_audio: bool,

    /// Frame rate of recorded video
    #[serde(rename = "recordingFps", default = "default_recording_fps")]
    pub recording_fps: u32,

    /// Recording formats in order of preference
    #[serde(rename = "recordingFormat", default = "default_recording_formats")]
    pub recording_formats: Vec<String>,

    /// Watermark image drawn bottom-right of the canvas
    #[serde(rename = "watermarkPath", default = "default_watermark_path", skip_serializing_if = "Option::is_none")]
    pub watermark_path: Option<String>,

    /// Watermark width as a percentage of canvas width
    #[serde(rename = "watermarkWidthPercent", default = "default_watermark_width_percent")]
    pub watermark_width_percent: f32,

    /// Watermark inset from the bottom-right corner in pixels
    #[serde(rename = "watermarkMargin", default = "default_watermark_margin")]
    pub watermark_margin: u32,

    #[serde(rename = "beautyEnabled", default)]
    pub beauty_enabled: bool,

    /// Beauty filter strength in percent (0-100)
    #[serde(rename = "beautyStrength", default = "default_beauty_strength")]
    pub beauty_strength: u32,

    /// Optional WGSL file overriding the embedded beauty shader
    #[serde(rename = "beautyShaderPath", default, skip_serializing_if = "Option::is_none")]
    pub beauty_shader_path: Option<String>,

    /// Where finished recordings are written. Defaults to the download directory.
    #[serde(rename = "outputDir", default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,

    /// Show the camera switch control on desktop platforms too
    #[serde(rename = "forceMobileControls", default)]
    pub force_mobile_controls: bool,

    /// Also write logs to `smart_camera.log`
    #[serde(rename = "logToFile", default)]
    pub log_to_file: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            detection_interval_ms: default_detection_interval_ms(),
            confidence_threshold: default_confidence_threshold(),
            iou_threshold: default_iou_threshold(),
            max_detections: default_max_detections(),
            model_path: None,
            ideal_width: default_ideal_width(),
            ideal_height: default_ideal_height(),
            capture_audio: true,
            recording_fps: default_recording_fps(),
            recording_formats: default_recording_formats(),
            watermark_path: default_watermark_path(),
            watermark_width_percent: default_watermark_width_percent(),
            watermark_margin: default_watermark_margin(),
            beauty_enabled: false,
            beauty_strength: default_beauty_strength(),
            beauty_shader_path: None,
            output_dir: None,
            force_mobile_controls: false,
            log_to_file: false,
        }
    }
}

impl AppSettings {
    /// Clamp every value into its valid range
    pub fn sanitize(&mut self) {
        self.target_fps = self.target_fps.clamp(15, 240);
        self.detection_interval_ms = self.detection_interval_ms.clamp(50, 10_000);
        self.confidence_threshold = self.confidence_threshold.clamp(0.0, 1.0);
        self.iou_threshold = self.iou_threshold.clamp(0.0, 1.0);
        self.max_detections = self.max_detections.clamp(1, 300);
        self.ideal_width = self.ideal_width.max(1);
        self.ideal_height = self.ideal_height.max(1);
        self.recording_fps = self.recording_fps.clamp(1, 60);
        self.watermark_width_percent = self.watermark_width_percent.clamp(0.0, 100.0);
        self.beauty_strength = self.beauty_strength.min(100);
        if self.recording_formats.is_empty() {
            self.recording_formats = default_recording_formats();
        }
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }

    /// Beauty strength as the 0-1 shader uniform
    pub fn beauty_strength_unit(&self) -> f32 {
        self.beauty_strength as f32 / 100.0
    }

    /// Load settings from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        let mut settings: Self = from_str(&contents)?;
        settings.sanitize();
        Ok(settings)
    }

    /// Save settings to an XML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        let xml = to_string(self)?;
        let formatted = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, formatted)?;
        Ok(())
    }

    /// Default settings file location
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("SmartCamera");
            p.push("settings.xml");
            p
        })
    }

    /// Load from the config directory, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to load settings from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save to the config directory
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::settings_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to_file(&path)
    }

    /// Directory finished recordings are written to
    pub fn recordings_dir(&self) -> PathBuf {
        self.output_dir
            .as_ref()
            .map(PathBuf::from)
            .or_else(dirs::download_dir)
            .or_else(dirs::video_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Settings-related errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),
    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),
    #[error("Could not find config directory")]
    NoConfigDir,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.target_fps, 60);
        assert_eq!(settings.detection_interval(), Duration::from_millis(500));
        assert_eq!(settings.recording_formats.len(), 3);
        assert_eq!(settings.recording_formats[0], "video/webm;codecs=vp9,opus");
        assert!(!settings.beauty_enabled);
        assert_eq!(settings.beauty_strength_unit(), 0.5);
        assert_eq!(settings.watermark_margin, 20);
    }

    #[test]
    fn test_sanitize_clamps_values() {
        let mut settings = AppSettings {
            target_fps: 1000,
            confidence_threshold: 1.5,
            beauty_strength: 250,
            recording_fps: 0,
            recording_formats: Vec::new(),
            ..Default::default()
        };
        settings.sanitize();
        assert_eq!(settings.target_fps, 240);
        assert_eq!(settings.confidence_threshold, 1.0);
        assert_eq!(settings.beauty_strength, 100);
        assert_eq!(settings.recording_fps, 1);
        assert_eq!(settings.recording_formats, default_recording_formats());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.xml");

        let settings = AppSettings {
            beauty_enabled: true,
            beauty_strength: 75,
            model_path: Some("/opt/models/yolov8n.onnx".to_string()),
            force_mobile_controls: true,
            ..Default::default()
        };
        settings.save_to_file(&path).unwrap();

        let loaded = AppSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let xml = r#"<SmartCameraSettings><beautyEnabled>true</beautyEnabled></SmartCameraSettings>"#;
        let settings: AppSettings = from_str(xml).unwrap();
        assert!(settings.beauty_enabled);
        assert_eq!(settings.detection_interval_ms, 500);
        assert_eq!(settings.recording_formats, default_recording_formats());
    }
}
