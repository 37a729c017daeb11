//! Detection overlay drawing
//!
//! Keeps the most recent detection result and draws it onto the canvas
//! every render tick until the next result replaces it.

use ab_glyph::{FontRef, PxScale};
use chrono::{DateTime, Local};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use super::log::UniqueDetectionLog;
use super::Detection;

/// Box and label appearance
#[derive(Debug, Clone, Copy)]
pub struct OverlayStyle {
    pub box_color: Rgba<u8>,
    pub text_color: Rgba<u8>,
    pub line_width: u32,
    pub label_height: u32,
    /// Horizontal padding on each side of the label text
    pub label_padding: u32,
    pub font_size: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            box_color: Rgba([0, 255, 0, 255]),
            text_color: Rgba([0, 0, 0, 255]),
            line_width: 2,
            label_height: 25,
            label_padding: 5,
            font_size: 16.0,
        }
    }
}

pub struct DetectionOverlay {
    latest: Vec<Detection>,
    /// Size of the frame the latest result was computed on
    source_size: (u32, u32),
    log: UniqueDetectionLog,
    font: Option<FontRef<'static>>,
    style: OverlayStyle,
}

impl DetectionOverlay {
    pub fn new(style: OverlayStyle) -> Self {
        let font = match FontRef::try_from_slice(epaint_default_fonts::UBUNTU_LIGHT) {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!("Label font unavailable, drawing boxes only: {}", e);
                None
            }
        };

        Self {
            latest: Vec::new(),
            source_size: (0, 0),
            log: UniqueDetectionLog::new(),
            font,
            style,
        }
    }

    /// Replace the displayed result. Returns true if the first-seen log grew.
    pub fn apply(&mut self, detections: Vec<Detection>, source_size: (u32, u32), at: DateTime<Local>) -> bool {
        let changed = self.log.record_all(&detections, at);
        self.latest = detections;
        self.source_size = source_size;
        changed
    }

    /// Drop the displayed boxes; the first-seen log is kept
    pub fn clear(&mut self) {
        self.latest.clear();
    }

    pub fn latest(&self) -> &[Detection] {
        &self.latest
    }

    pub fn log(&self) -> &UniqueDetectionLog {
        &self.log
    }

    /// Draw the latest result onto `canvas`, scaling from the source frame
    pub fn draw(&self, canvas: &mut RgbaImage) {
        let (src_w, src_h) = self.source_size;
        if self.latest.is_empty() || src_w == 0 || src_h == 0 {
            return;
        }

        let sx = canvas.width() as f32 / src_w as f32;
        let sy = canvas.height() as f32 / src_h as f32;

        for detection in &self.latest {
            let bbox = detection.bbox.scaled(sx, sy);
            let x = bbox.x.round() as i32;
            let y = bbox.y.round() as i32;
            let w = (bbox.width.round() as u32).max(1);
            let h = (bbox.height.round() as u32).max(1);

            for inset in 0..self.style.line_width {
                let (iw, ih) = (w.saturating_sub(2 * inset), h.saturating_sub(2 * inset));
                if iw == 0 || ih == 0 {
                    break;
                }
                let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(iw, ih);
                draw_hollow_rect_mut(canvas, rect, self.style.box_color);
            }

            self.draw_label(canvas, x, y, &detection.display_label());
        }
    }

    fn draw_label(&self, canvas: &mut RgbaImage, x: i32, y: i32, text: &str) {
        let scale = PxScale::from(self.style.font_size);
        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(scale, font, text),
            None => (0, 0),
        };

        let top = y - self.style.label_height as i32;
        let background = Rect::at(x, top).of_size(
            text_w + 2 * self.style.label_padding,
            self.style.label_height,
        );
        draw_filled_rect_mut(canvas, background, self.style.box_color);

        if let Some(font) = &self.font {
            let text_top = top + (self.style.label_height as i32 - text_h as i32) / 2;
            draw_text_mut(
                canvas,
                self.style.text_color,
                x + self.style.label_padding as i32,
                text_top,
                scale,
                font,
                text,
            );
        }
    }
}

impl Default for DetectionOverlay {
    fn default() -> Self {
        Self::new(OverlayStyle::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    fn detection(label: &str, bbox: BoundingBox) -> Detection {
        Detection {
            label: label.to_string(),
            confidence: 0.91,
            bbox,
        }
    }

    #[test]
    fn test_draws_box_and_label_background() {
        let mut overlay = DetectionOverlay::default();
        overlay.apply(
            vec![detection("cup", BoundingBox::new(50.0, 60.0, 40.0, 30.0))],
            (200, 200),
            Local::now(),
        );

        let mut canvas = RgbaImage::from_pixel(200, 200, BLACK);
        overlay.draw(&mut canvas);

        // 2 px stroke
        assert_eq!(*canvas.get_pixel(50, 70), GREEN);
        assert_eq!(*canvas.get_pixel(51, 70), GREEN);
        assert_eq!(*canvas.get_pixel(52, 70), BLACK);
        // Interior untouched
        assert_eq!(*canvas.get_pixel(70, 75), BLACK);
        // Label background sits above the box, left of the text
        assert_eq!(*canvas.get_pixel(51, 36), GREEN);
        assert_eq!(*canvas.get_pixel(51, 34), BLACK);
    }

    #[test]
    fn test_boxes_scale_to_canvas() {
        let mut overlay = DetectionOverlay::default();
        overlay.apply(
            vec![detection("dog", BoundingBox::new(40.0, 40.0, 10.0, 10.0))],
            (100, 100),
            Local::now(),
        );

        let mut canvas = RgbaImage::from_pixel(200, 200, BLACK);
        overlay.draw(&mut canvas);

        assert_eq!(*canvas.get_pixel(80, 90), GREEN);
        assert_eq!(*canvas.get_pixel(40, 45), BLACK);
    }

    #[test]
    fn test_result_persists_until_replaced() {
        let mut overlay = DetectionOverlay::default();
        overlay.apply(
            vec![detection("cat", BoundingBox::new(50.0, 60.0, 40.0, 30.0))],
            (200, 200),
            Local::now(),
        );

        let mut first = RgbaImage::from_pixel(200, 200, BLACK);
        let mut second = RgbaImage::from_pixel(200, 200, BLACK);
        overlay.draw(&mut first);
        overlay.draw(&mut second);
        assert_eq!(first, second);

        assert!(!overlay.apply(Vec::new(), (200, 200), Local::now()));
        let mut cleared = RgbaImage::from_pixel(200, 200, BLACK);
        overlay.draw(&mut cleared);
        assert_eq!(cleared, RgbaImage::from_pixel(200, 200, BLACK));
        assert_eq!(overlay.log().len(), 1);
    }
}
