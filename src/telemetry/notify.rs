//! Transient error banners

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::AppError;

/// How long a banner stays visible
pub const BANNER_TTL: Duration = Duration::from_secs(5);

/// Banners shown at once; older ones are dropped early
const MAX_VISIBLE: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub message: String,
    pub raised_at: Instant,
}

/// Queue of user-visible error banners
#[derive(Debug)]
pub struct Notifications {
    notices: VecDeque<Notice>,
    ttl: Duration,
}

impl Notifications {
    pub fn new(ttl: Duration) -> Self {
        Self {
            notices: VecDeque::new(),
            ttl,
        }
    }

    /// Log an error and raise a banner for it
    pub fn report(&mut self, error: &AppError) {
        tracing::error!(kind = error.kind(), "{}", error);
        self.push(error.to_string(), Instant::now());
    }

    /// Raise a banner with a custom message
    pub fn push(&mut self, message: impl Into<String>, now: Instant) {
        if self.notices.len() == MAX_VISIBLE {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            message: message.into(),
            raised_at: now,
        });
    }

    /// Drop expired banners and return the ones still visible
    pub fn active(&mut self, now: Instant) -> Vec<Notice> {
        let ttl = self.ttl;
        self.notices
            .retain(|notice| now.saturating_duration_since(notice.raised_at) < ttl);
        self.notices.iter().cloned().collect()
    }

    pub fn dismiss_all(&mut self) {
        self.notices.clear();
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self::new(BANNER_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_expires_after_ttl() {
        let mut notifications = Notifications::default();
        let start = Instant::now();
        notifications.push("Failed to access camera", start);

        assert_eq!(notifications.active(start + Duration::from_secs(4)).len(), 1);
        assert!(notifications.active(start + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_report_raises_banner() {
        let mut notifications = Notifications::default();
        notifications.report(&AppError::RecordingEmpty);

        let active = notifications.active(Instant::now());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].message, AppError::RecordingEmpty.to_string());
    }
}
