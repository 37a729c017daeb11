//! Smart Camera - Library
//!
//! Live webcam viewer with object detection overlays, a GPU beauty filter
//! and recording of the composed canvas.

pub mod app;
pub mod camera;
pub mod capture;
pub mod detect;
pub mod error;
pub mod render;
pub mod settings;
pub mod shaders;
pub mod telemetry;
pub mod ui;

pub use app::App;
pub use error::{AppError, AppResult};
