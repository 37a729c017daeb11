//! On-screen debug console
//!
//! A bounded ring of recent log lines fed by a tracing layer, rendered by
//! the debug panel in the UI.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Lines kept before the oldest is dropped
pub const DEFAULT_CAPACITY: usize = 500;

/// One rendered log line
#[derive(Clone, Debug)]
pub struct ConsoleLine {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub message: String,
}

impl ConsoleLine {
    pub fn display(&self) -> String {
        format!(
            "[{}] {:<5} {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Shared handle to the console buffer
#[derive(Clone)]
pub struct DebugConsole {
    lines: Arc<Mutex<VecDeque<ConsoleLine>>>,
    capacity: usize,
}

impl DebugConsole {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, level: Level, message: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(ConsoleLine {
            timestamp: Local::now(),
            level,
            message: message.into(),
        });
    }

    /// Copy of the current lines, oldest first
    pub fn snapshot(&self) -> Vec<ConsoleLine> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl Default for DebugConsole {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Tracing layer that mirrors this crate's events into a [`DebugConsole`]
pub struct DebugConsoleLayer {
    console: DebugConsole,
}

impl DebugConsoleLayer {
    pub fn new(console: DebugConsole) -> Self {
        Self { console }
    }
}

impl<S: Subscriber> Layer<S> for DebugConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !metadata.target().starts_with("smart_camera") {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.console.push(*metadata.level(), visitor.finish());
    }
}

/// Collects the `message` field plus any structured fields as `key=value`
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_console_drops_oldest_line() {
        let console = DebugConsole::new(2);
        console.push(Level::INFO, "one");
        console.push(Level::WARN, "two");
        console.push(Level::ERROR, "three");

        let lines = console.snapshot();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "two");
        assert_eq!(lines[1].message, "three");
        assert_eq!(lines[1].level, Level::ERROR);
    }

    #[test]
    fn test_layer_mirrors_crate_events() {
        let console = DebugConsole::new(16);
        let subscriber = tracing_subscriber::registry().with(DebugConsoleLayer::new(console.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "smart_camera::detect", label = "cat", "first sighting");
            tracing::info!(target: "wgpu_core", "ignored");
        });

        let lines = console.snapshot();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].message, "first sighting label=cat");
        assert_eq!(lines[0].level, Level::WARN);
    }
}
