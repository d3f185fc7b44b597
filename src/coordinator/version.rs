//! Monotonic version source.
//!
//! Per spec §9 ("Monotonic versions across restarts"): a wall-clock
//! millisecond timestamp alone is insufficient (clock skew, same-millisecond
//! conflicts), so the last-issued version is cached in memory and every
//! fresh version is `max(now_ms, last + 1)`. The Coordinator persists this
//! counter alongside the view snapshot so it survives restarts.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

pub struct VersionSource {
    last: AtomicU64,
}

impl VersionSource {
    pub fn new(persisted: u64) -> Self {
        Self {
            last: AtomicU64::new(persisted),
        }
    }

    /// Produce a version strictly greater than any previously issued or
    /// observed version.
    pub fn next(&self) -> u64 {
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        loop {
            let prev = self.last.load(Ordering::SeqCst);
            let candidate = now_ms.max(prev + 1);
            if self
                .last
                .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    /// Fold in a version observed from a remote peer, so a subsequently
    /// issued local version is always strictly greater than anything this
    /// Coordinator has seen.
    pub fn observe(&self, version: u64) {
        self.last.fetch_max(version, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_is_strictly_monotonic() {
        let source = VersionSource::new(0);
        let mut last = source.next();
        for _ in 0..1000 {
            let v = source.next();
            assert!(v > last);
            last = v;
        }
    }

    #[test]
    fn observe_raises_floor() {
        let source = VersionSource::new(0);
        source.observe(1_000_000_000_000);
        let v = source.next();
        assert!(v > 1_000_000_000_000);
    }
}
