//! Core configuration.

use std::time::Duration;

/// Tunables for the consensus core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How many primary-parent hops below `bexec` a block may sit before it
    /// becomes prunable.
    pub prune_staleness: u32,

    /// Interval between cleanup (prune) passes.
    pub cleanup_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            prune_staleness: 100,
            cleanup_interval: Duration::from_secs(10),
        }
    }
}
