//! Pending-job accounting for confined cells.
//!
//! | Level    | Pending jobs   |
//! |----------|----------------|
//! | Normal   | < 256          |
//! | Warning  | 256 - 1024     |
//! | Critical | > 1024         |
//!
//! Packet forwarding is the hot path; a media cell that sits above the
//! warning threshold is falling behind the network thread.

use crate::observability::metrics;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Depth above which a mailbox is considered elevated.
pub const MAILBOX_NORMAL: usize = 256;

/// Depth above which a mailbox is considered critical.
pub const MAILBOX_WARNING: usize = 1024;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Tracks queued, processed and discarded jobs for one cell.
///
/// Shared between the submitting threads (which enqueue) and the owning
/// worker thread (which dequeues); all counters are atomic.
#[derive(Debug)]
pub struct MailboxMonitor {
    label: &'static str,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    processed: AtomicU64,
    discarded: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Record a job being queued.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        match Self::level_for_depth(new_depth) {
            MailboxLevel::Critical if new_depth == MAILBOX_WARNING + 1 => {
                warn!(
                    target: "call.mailbox",
                    cell = self.label,
                    depth = new_depth,
                    threshold = MAILBOX_WARNING,
                    "Cell mailbox depth critical"
                );
            }
            MailboxLevel::Warning if new_depth == MAILBOX_NORMAL + 1 => {
                debug!(
                    target: "call.mailbox",
                    cell = self.label,
                    depth = new_depth,
                    "Cell mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Record a job being taken off the queue and run.
    pub fn record_dequeue(&self) {
        let previous = self.depth.fetch_sub(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
        metrics::set_cell_mailbox_depth(self.label, previous.saturating_sub(1));
    }

    /// Record a queued job that was dropped without running.
    pub fn record_discard(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job that could not be queued at all.
    pub fn record_rejected(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        Self::level_for_depth(self.current_depth())
    }

    fn level_for_depth(depth: usize) -> MailboxLevel {
        if depth > MAILBOX_WARNING {
            MailboxLevel::Critical
        } else if depth > MAILBOX_NORMAL {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_dequeue_tracks_depth_and_peak() {
        let monitor = MailboxMonitor::new("network");

        assert_eq!(monitor.current_depth(), 0);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3); // Peak stays at 3
        assert_eq!(monitor.processed(), 1);
    }

    #[test]
    fn test_levels() {
        let monitor = MailboxMonitor::new("media");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..=MAILBOX_NORMAL {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in MAILBOX_NORMAL..MAILBOX_WARNING {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_discard_and_reject() {
        let monitor = MailboxMonitor::new("network");

        monitor.record_enqueue();
        monitor.record_discard();
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.discarded(), 1);

        monitor.record_rejected();
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.discarded(), 2);
        assert_eq!(monitor.processed(), 0);
    }
}
