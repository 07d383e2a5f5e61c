use serde::{Deserialize, Serialize};

/// One sample of a ranged progress source (index build, migration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressSample {
    pub start: u64,
    pub current: u64,
    pub target: u64,
}

impl ProgressSample {
    /// Fractional progress in `[0, 1]`; a degenerate range counts as done.
    pub fn fraction(&self) -> f64 {
        let range = self.target.saturating_sub(self.start);
        if range == 0 {
            return 1.0;
        }
        let done = self.current.saturating_sub(self.start) as f64 / range as f64;
        done.clamp(0.0, 1.0)
    }

    /// Outstanding work; zero once caught up.
    pub fn pending(&self) -> u64 {
        self.target.saturating_sub(self.current)
    }
}

/// One sample of peer-replication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicationSample {
    /// Feeds known to the replicator.
    pub feeds: u64,
    /// Feeds still missing messages.
    pub incomplete_feeds: u64,
}
