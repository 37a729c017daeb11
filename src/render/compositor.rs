//! Canvas compositing
//!
//! Merges the (optionally filtered) camera frame and the watermark onto the
//! display canvas. Compositing is synchronous and deterministic: unchanged
//! inputs always produce identical canvas bytes.

use std::path::Path;

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};

/// Logo drawn in the bottom-right corner of every frame
pub struct Watermark {
    image: RgbaImage,
    /// Width as a percentage of canvas width
    width_percent: f32,
    /// Inset from the right and bottom edges in pixels
    margin: u32,
    /// Resized copy for the last canvas size
    scaled: Option<RgbaImage>,
}

impl Watermark {
    pub fn new(image: RgbaImage, width_percent: f32, margin: u32) -> Self {
        Self {
            image,
            width_percent,
            margin,
            scaled: None,
        }
    }

    pub fn load(path: &Path, width_percent: f32, margin: u32) -> Result<Self, image::ImageError> {
        let image = image::open(path)?.to_rgba8();
        tracing::info!(
            "Loaded watermark {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self::new(image, width_percent, margin))
    }

    /// Position and size on a canvas: `(x, y, width, height)`.
    ///
    /// `None` when the scaled logo would be empty.
    pub fn placement(&self, canvas_width: u32, canvas_height: u32) -> Option<(i64, i64, u32, u32)> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return None;
        }

        let width = canvas_width as f32 * self.width_percent / 100.0;
        let height = self.image.height() as f32 / self.image.width() as f32 * width;
        let (width, height) = (width.round() as u32, height.round() as u32);
        if width == 0 || height == 0 {
            return None;
        }

        let x = canvas_width as i64 - width as i64 - self.margin as i64;
        let y = canvas_height as i64 - height as i64 - self.margin as i64;
        Some((x, y, width, height))
    }

    fn scaled_to(&mut self, width: u32, height: u32) -> &RgbaImage {
        let stale = self
            .scaled
            .as_ref()
            .map_or(true, |s| s.width() != width || s.height() != height);
        if stale {
            self.scaled = Some(image::imageops::resize(
                &self.image,
                width,
                height,
                FilterType::Triangle,
            ));
        }
        self.scaled.get_or_insert_with(|| RgbaImage::new(width, height))
    }
}

pub struct FrameCompositor {
    canvas: RgbaImage,
    watermark: Option<Watermark>,
}

impl FrameCompositor {
    pub fn new(width: u32, height: u32, watermark: Option<Watermark>) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
            watermark,
        }
    }

    /// Match the canvas to the camera's native resolution
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.canvas.dimensions() != (width, height) {
            tracing::info!("Canvas resized to {}x{}", width, height);
            self.canvas = RgbaImage::new(width, height);
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    pub fn has_watermark(&self) -> bool {
        self.watermark.is_some()
    }

    /// Compose one frame: clear, draw `filtered` if present else `frame`,
    /// then the watermark.
    pub fn compose(&mut self, frame: &RgbaImage, filtered: Option<&RgbaImage>) -> &RgbaImage {
        let source = filtered.unwrap_or(frame);
        let (width, height) = self.canvas.dimensions();

        self.clear();

        if source.width() > 0 && source.height() > 0 && width > 0 && height > 0 {
            if source.dimensions() == (width, height) {
                self.canvas.copy_from_slice(source.as_raw());
            } else {
                let scaled = image::imageops::resize(source, width, height, FilterType::Triangle);
                self.canvas.copy_from_slice(scaled.as_raw());
            }
        }

        if let Some(watermark) = self.watermark.as_mut() {
            if let Some((x, y, w, h)) = watermark.placement(width, height) {
                let logo = watermark.scaled_to(w, h);
                image::imageops::overlay(&mut self.canvas, logo, x, y);
            }
        }

        &self.canvas
    }

    /// Blank the canvas, watermark included
    pub fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Mutable canvas for drawing overlays after composition
    pub fn canvas_mut(&mut self) -> &mut RgbaImage {
        &mut self.canvas
    }
}
