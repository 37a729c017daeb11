//! Telemetry and logging infrastructure
//!
//! Provides structured logging with tracing, an in-memory debug console
//! mirrored into the UI, and transient error banners.

pub mod console;
pub mod logging;
pub mod notify;

pub use console::{ConsoleLine, DebugConsole, DebugConsoleLayer};
pub use logging::{init_logging, LogConfig, LogGuard};
pub use notify::{Notice, Notifications};
