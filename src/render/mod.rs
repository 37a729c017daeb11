//! Frame rendering
//!
//! The beauty filter runs on the GPU and is read back so that the composed
//! canvas lives in CPU memory, where the watermark and detection overlay
//! are drawn and where recording reads it from.

pub mod beauty;
pub mod compositor;

pub use beauty::{BeautyFilter, BeautyParams};
pub use compositor::{FrameCompositor, Watermark};

use image::RgbaImage;

/// An image-to-image filter applied before compositing
pub trait FrameFilter {
    /// Filter `frame` at `strength` (0-1). `None` means no output this tick.
    fn apply(&mut self, frame: &RgbaImage, strength: f32) -> Option<RgbaImage>;
}

/// User controls for the beauty filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeautySettings {
    pub enabled: bool,
    /// 0-1
    pub strength: f32,
}

impl BeautySettings {
    pub fn new(enabled: bool, strength_percent: u32) -> Self {
        Self {
            enabled,
            strength: strength_percent.min(100) as f32 / 100.0,
        }
    }

    pub fn strength_percent(&self) -> u32 {
        (self.strength * 100.0).round() as u32
    }
}

/// Run the filter when it is enabled and available.
///
/// Returns `None` when the raw frame should be composited instead.
pub fn filter_frame(
    settings: &BeautySettings,
    filter: Option<&mut dyn FrameFilter>,
    frame: &RgbaImage,
) -> Option<RgbaImage> {
    if !settings.enabled {
        return None;
    }
    filter?.apply(frame, settings.strength)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingFilter {
        calls: usize,
    }

    impl FrameFilter for CountingFilter {
        fn apply(&mut self, frame: &RgbaImage, _strength: f32) -> Option<RgbaImage> {
            self.calls += 1;
            Some(frame.clone())
        }
    }

    #[test]
    fn test_disabled_filter_is_not_invoked() {
        let frame = RgbaImage::new(4, 4);
        let mut filter = CountingFilter { calls: 0 };

        let off = BeautySettings::new(false, 80);
        assert!(filter_frame(&off, Some(&mut filter), &frame).is_none());
        assert_eq!(filter.calls, 0);

        let on = BeautySettings::new(true, 80);
        assert!(filter_frame(&on, Some(&mut filter), &frame).is_some());
        assert_eq!(filter.calls, 1);

        // Enabled but unavailable falls back to the raw frame
        assert!(filter_frame(&on, None, &frame).is_none());
    }

    #[test]
    fn test_strength_percent() {
        let settings = BeautySettings::new(true, 150);
        assert_eq!(settings.strength, 1.0);
        assert_eq!(BeautySettings::new(true, 35).strength_percent(), 35);
    }
}
