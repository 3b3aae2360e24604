//! Rate-limited diagnostics for the tick path
//!
//! Bounds violations, corrupt grid chains and pool exhaustion must never stop
//! the tick loop, and must not flood the log either. `RateLimitedWarn` lets a
//! call site emit at most one warning per interval and counts the rest.
//! Uses atomics only, so it can be shared by `&self` accessors and never
//! allocates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default minimum spacing between two emitted warnings
pub const DEFAULT_DIAG_INTERVAL: Duration = Duration::from_secs(1);

/// Per-site warning limiter
#[derive(Debug)]
pub struct RateLimitedWarn {
    /// Static label included in every emitted warning
    site: &'static str,
    origin: Instant,
    interval_ms: u64,
    /// Milliseconds since `origin` of the last emission, plus one (0 = never)
    last_emit: AtomicU64,
    /// Occurrences swallowed since the last emission
    suppressed: AtomicU64,
    /// Occurrences ever reported
    total: AtomicU64,
}

impl RateLimitedWarn {
    pub fn new(site: &'static str) -> Self {
        Self::with_interval(site, DEFAULT_DIAG_INTERVAL)
    }

    pub fn with_interval(site: &'static str, interval: Duration) -> Self {
        Self {
            site,
            origin: Instant::now(),
            interval_ms: interval.as_millis() as u64,
            last_emit: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Record an occurrence. Returns `Some(suppressed)` when the caller should
    /// emit a warning now, with the number of occurrences swallowed since the
    /// previous one.
    pub fn hit(&self) -> Option<u64> {
        self.total.fetch_add(1, Ordering::Relaxed);
        let now = self.origin.elapsed().as_millis() as u64 + 1;
        let last = self.last_emit.load(Ordering::Relaxed);

        if last != 0 && now.saturating_sub(last) < self.interval_ms {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Only one thread wins the slot for this interval
        if self
            .last_emit
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        Some(self.suppressed.swap(0, Ordering::Relaxed))
    }

    /// Record an occurrence and emit a `tracing` warning if allowed
    pub fn warn(&self, detail: std::fmt::Arguments<'_>) {
        if let Some(suppressed) = self.hit() {
            tracing::warn!(site = self.site, suppressed, "{}", detail);
        }
    }

    /// Total occurrences ever recorded (emitted + suppressed)
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn site(&self) -> &'static str {
        self.site
    }
}
