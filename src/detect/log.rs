//! First-seen detection log

use std::collections::HashSet;

use chrono::{DateTime, Local};

use super::Detection;

/// A label and when it was first detected
#[derive(Debug, Clone, PartialEq)]
pub struct FirstSeen {
    pub label: String,
    pub seen_at: DateTime<Local>,
}

impl FirstSeen {
    pub fn time_text(&self) -> String {
        format!("First seen: {}", self.seen_at.format("%H:%M:%S"))
    }
}

/// Labels in the order they were first detected. Grows for the whole session.
#[derive(Debug, Default)]
pub struct UniqueDetectionLog {
    entries: Vec<FirstSeen>,
    seen: HashSet<String>,
}

impl UniqueDetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a label; returns false if it was already known
    pub fn record(&mut self, label: &str, at: DateTime<Local>) -> bool {
        if self.seen.contains(label) {
            return false;
        }
        self.seen.insert(label.to_string());
        self.entries.push(FirstSeen {
            label: label.to_string(),
            seen_at: at,
        });
        true
    }

    /// Record every label in a result; returns true if any was new
    pub fn record_all(&mut self, detections: &[Detection], at: DateTime<Local>) -> bool {
        let mut changed = false;
        for detection in detections {
            if self.record(&detection.label, at) {
                tracing::info!(label = %detection.label, "New object detected");
                changed = true;
            }
        }
        changed
    }

    pub fn entries(&self) -> &[FirstSeen] {
        &self.entries
    }

    pub fn contains(&self, label: &str) -> bool {
        self.seen.contains(label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use chrono::TimeZone;

    fn detection(label: &str) -> Detection {
        Detection {
            label: label.to_string(),
            confidence: 0.9,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        }
    }

    #[test]
    fn test_labels_kept_once_in_first_seen_order() {
        let mut log = UniqueDetectionLog::new();
        let t0 = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let t1 = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 5).unwrap();

        let batches = [
            vec![detection("person"), detection("cup"), detection("person")],
            vec![],
            vec![detection("cup"), detection("laptop")],
            vec![detection("person"), detection("dog"), detection("laptop")],
        ];

        assert!(log.record_all(&batches[0], t0));
        assert!(!log.record_all(&batches[1], t1));
        assert!(log.record_all(&batches[2], t1));
        assert!(log.record_all(&batches[3], t1));

        let labels: Vec<&str> = log.entries().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["person", "cup", "laptop", "dog"]);
        assert_eq!(log.entries()[0].seen_at, t0);
        assert_eq!(log.entries()[0].time_text(), "First seen: 09:30:00");
    }

    #[test]
    fn test_repeat_label_keeps_original_time() {
        let mut log = UniqueDetectionLog::new();
        let t0 = Local.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let t1 = Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        assert!(log.record("cat", t0));
        assert!(!log.record("cat", t1));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].seen_at, t0);
        assert!(log.contains("cat"));
    }
}
