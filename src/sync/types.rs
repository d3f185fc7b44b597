//! Types describing sync rounds between two Coordinators (spec §4.4).

use std::time::Duration;

/// Tuning knobs for a `SyncManager` round. Defaults follow spec §4.4's
/// "reasonable defaults" note: bounded batches so a single round never
/// blocks on an unbounded transfer, and a couple of retries before
/// surfacing failure to the caller.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

/// What a push or pull half of a round actually moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub records_sent: usize,
    pub records_received: usize,
    pub attachments_sent: usize,
    pub attachments_received: usize,
    pub attachments_missing: usize,
}

/// Outcome of a full `sync()` call — a push stats and a pull stats, since
/// the two directions are independent (spec §4.4, "push and pull are
/// symmetric but not coupled").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub push: TransferStats,
    pub pull: TransferStats,
}
