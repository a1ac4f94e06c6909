//! Verification worker pool.
//!
//! Signature and certificate checks are CPU-bound; they run on a dedicated
//! rayon pool so the state machine thread never blocks on crypto. Results
//! come back as completion events on the main event channel.

use crate::metrics::metrics;
use braid_core::Event;
use braid_messages::VoteGossip;
use braid_types::{Block, ConsensusConfig, Hash, PublicKey};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Errors from pool construction.
#[derive(Debug, Error)]
pub enum VerifyPoolError {
    #[error("failed to build verification thread pool: {0}")]
    Build(String),
}

/// Dedicated thread pool for signature and certificate verification.
pub struct VerifyPool {
    pool: rayon::ThreadPool,
    config: Arc<ConsensusConfig>,
    event_tx: mpsc::Sender<Event>,
}

impl VerifyPool {
    /// Build a pool with `threads` workers.
    pub fn new(
        threads: usize,
        config: Arc<ConsensusConfig>,
        event_tx: mpsc::Sender<Event>,
    ) -> Result<Self, VerifyPoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("braid-verify-{i}"))
            .build()
            .map_err(|e| VerifyPoolError::Build(e.to_string()))?;
        debug!(threads = threads.max(1), "verification pool started");
        Ok(Self {
            pool,
            config,
            event_tx,
        })
    }

    /// Verify a block off-thread; completes with `Event::BlockVerified`.
    pub fn spawn_block_verify(&self, blk_hash: Hash, block: Block) {
        let config = Arc::clone(&self.config);
        let event_tx = self.event_tx.clone();
        self.pool.spawn(move || {
            let valid = block.verify(&config);
            if !valid {
                metrics().verification_failures.inc();
            }
            let _ = event_tx.blocking_send(Event::BlockVerified { blk_hash, valid });
        });
    }

    /// Verify a vote's partial certificate off-thread; completes with
    /// `Event::VoteVerified`.
    pub fn spawn_vote_verify(&self, vote: VoteGossip, public_key: PublicKey) {
        let event_tx = self.event_tx.clone();
        self.pool.spawn(move || {
            let valid = vote.cert.verify(&public_key);
            if !valid {
                metrics().verification_failures.inc();
            }
            let _ = event_tx.blocking_send(Event::VoteVerified { vote, valid });
        });
    }
}
