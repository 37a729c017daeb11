use std::time::{Duration, Instant};

/// `REC mm:ss`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("REC {:02}:{:02}", secs / 60, secs % 60)
}

/// Visible recording timer, advanced once per elapsed second
#[derive(Debug, Default)]
pub struct RecordingTimer {
    started: Option<Instant>,
    shown_secs: u64,
}

impl RecordingTimer {
    pub fn start(&mut self, now: Instant) {
        self.started = Some(now);
        self.shown_secs = 0;
    }

    pub fn stop(&mut self) {
        self.started = None;
        self.shown_secs = 0;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Advance to `now`. Returns true if the displayed text changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(started) = self.started else {
            return false;
        };
        let secs = now.saturating_duration_since(started).as_secs();
        if secs != self.shown_secs {
            self.shown_secs = secs;
            true
        } else {
            false
        }
    }

    pub fn text(&self) -> Option<String> {
        self.started
            .map(|_| format_elapsed(Duration::from_secs(self.shown_secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(999)), "REC 00:00");
        assert_eq!(format_elapsed(Duration::from_secs(75)), "REC 01:15");
        assert_eq!(format_elapsed(Duration::from_secs(3600)), "REC 60:00");
    }

    #[test]
    fn test_text_changes_once_per_second() {
        let t0 = Instant::now();
        let mut timer = RecordingTimer::default();
        assert_eq!(timer.text(), None);

        timer.start(t0);
        assert_eq!(timer.text().as_deref(), Some("REC 00:00"));
        assert!(!timer.tick(t0 + Duration::from_millis(400)));
        assert!(!timer.tick(t0 + Duration::from_millis(900)));
        assert!(timer.tick(t0 + Duration::from_millis(1100)));
        assert!(!timer.tick(t0 + Duration::from_millis(1900)));
        assert_eq!(timer.text().as_deref(), Some("REC 00:01"));

        timer.stop();
        assert_eq!(timer.text(), None);
        assert!(!timer.tick(t0 + Duration::from_secs(5)));
    }
}
