//! Tracking of the external sync-in pulse counter

use chrono::{DateTime, Utc};

/// Counter value before the first observation
pub const SYNC_COUNT_UNSET: u32 = u32::MAX;

/// Records when the sync-in counter last advanced.
///
/// The stored time moves only when the counter changes, so it marks the
/// arrival of a trigger edge rather than the latest sample.
#[derive(Debug, Clone)]
pub struct SyncTracker {
    count: u32,
    time: Option<DateTime<Utc>>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self {
            count: SYNC_COUNT_UNSET,
            time: None,
        }
    }

    pub fn update(&mut self, count: u32, time: DateTime<Utc>) {
        if self.count == SYNC_COUNT_UNSET || self.count != count {
            self.count = count;
            self.time = Some(time);
        }
    }

    /// Last observed counter, `SYNC_COUNT_UNSET` until the first update
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Time at which the counter last changed
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }
}

impl Default for SyncTracker {
    fn default() -> Self {
        Self::new()
    }
}
