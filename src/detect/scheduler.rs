//! Fixed-interval detection scheduling
//!
//! Ticks at a fixed interval independent of the render cadence. A tick only
//! issues a request when nothing is in flight, so at most one request is
//! ever pending. Results are tagged with the camera generation they were
//! issued for and are discarded if the camera changed in the meantime.

use std::time::{Duration, Instant};

/// What to do with a completed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Result belongs to the current stream
    Apply,
    /// Stream was switched or torn down since the request was issued
    Stale,
}

#[derive(Debug)]
pub struct DetectionScheduler {
    interval: Duration,
    next_due: Option<Instant>,
    pending: Option<u64>,
    next_sequence: u64,
}

impl DetectionScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
            pending: None,
            next_sequence: 0,
        }
    }

    /// Start ticking; the first tick fires one interval from `now`
    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    /// Stop ticking. A request already in flight is left to complete.
    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Consume a due tick, returning the sequence number of the request to
    /// issue. Returns `None` when not due, or when the tick is skipped
    /// because a request is still pending.
    pub fn poll(&mut self, now: Instant) -> Option<u64> {
        let due = self.next_due?;
        if now < due {
            return None;
        }

        // Missed ticks are dropped rather than replayed
        let mut next = due + self.interval;
        if next <= now {
            next = now + self.interval;
        }
        self.next_due = Some(next);

        if let Some(pending) = self.pending {
            tracing::trace!("Detection tick skipped, request {} still pending", pending);
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending = Some(sequence);
        Some(sequence)
    }

    /// The request could not be queued; free the pending slot
    pub fn abandon(&mut self, sequence: u64) {
        if self.pending == Some(sequence) {
            self.pending = None;
        }
    }

    /// A response arrived for `sequence`, issued against `request_generation`
    pub fn resolve(&mut self, sequence: u64, request_generation: u64, current_generation: u64) -> Resolution {
        if self.pending == Some(sequence) {
            self.pending = None;
        }

        if request_generation == current_generation && self.is_running() {
            Resolution::Apply
        } else {
            Resolution::Stale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(500);

    #[test]
    fn test_first_tick_after_one_interval() {
        let start = Instant::now();
        let mut scheduler = DetectionScheduler::new(INTERVAL);
        assert_eq!(scheduler.poll(start + INTERVAL), None);

        scheduler.start(start);
        assert_eq!(scheduler.poll(start + Duration::from_millis(499)), None);
        assert_eq!(scheduler.poll(start + INTERVAL), Some(0));
    }

    #[test]
    fn test_tick_skipped_while_request_pending() {
        let start = Instant::now();
        let mut scheduler = DetectionScheduler::new(INTERVAL);
        scheduler.start(start);

        let first = scheduler.poll(start + INTERVAL).unwrap();
        assert!(scheduler.is_pending());
        // Inference slower than the interval: next tick finds it pending
        assert_eq!(scheduler.poll(start + INTERVAL * 2), None);

        assert_eq!(scheduler.resolve(first, 1, 1), Resolution::Apply);
        assert!(!scheduler.is_pending());
        assert_eq!(scheduler.poll(start + INTERVAL * 3), Some(1));
    }

    #[test]
    fn test_missed_ticks_are_not_replayed() {
        let start = Instant::now();
        let mut scheduler = DetectionScheduler::new(INTERVAL);
        scheduler.start(start);

        let seq = scheduler.poll(start + INTERVAL * 10).unwrap();
        scheduler.resolve(seq, 0, 0);
        assert_eq!(scheduler.poll(start + INTERVAL * 10 + Duration::from_millis(10)), None);
        assert!(scheduler.poll(start + INTERVAL * 11).is_some());
    }

    #[test]
    fn test_result_from_old_generation_is_stale() {
        let start = Instant::now();
        let mut scheduler = DetectionScheduler::new(INTERVAL);
        scheduler.start(start);

        let seq = scheduler.poll(start + INTERVAL).unwrap();
        // Camera switched while the request was in flight
        assert_eq!(scheduler.resolve(seq, 1, 2), Resolution::Stale);
    }

    #[test]
    fn test_cancel_stops_ticks_and_discards_late_result() {
        let start = Instant::now();
        let mut scheduler = DetectionScheduler::new(INTERVAL);
        scheduler.start(start);

        let seq = scheduler.poll(start + INTERVAL).unwrap();
        scheduler.cancel();
        assert_eq!(scheduler.poll(start + INTERVAL * 5), None);
        assert_eq!(scheduler.resolve(seq, 1, 1), Resolution::Stale);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn test_abandon_frees_slot() {
        let start = Instant::now();
        let mut scheduler = DetectionScheduler::new(INTERVAL);
        scheduler.start(start);

        let seq = scheduler.poll(start + INTERVAL).unwrap();
        scheduler.abandon(seq);
        assert!(!scheduler.is_pending());
        assert!(scheduler.poll(start + INTERVAL * 2).is_some());
    }
}
