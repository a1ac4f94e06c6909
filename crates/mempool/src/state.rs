//! Command pool state.

use braid_core::{Action, Event};
use braid_types::Hash;
use std::collections::VecDeque;
use tracing::{debug, instrument, trace};

/// Mempool configuration.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Number of commands per proposal batch.
    pub blk_size: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self { blk_size: 4 }
    }
}

/// Command pool state machine.
///
/// Commands arrive one at a time from clients. A replica that is not the
/// current proposer drops them (the client retries at the correct leader).
/// The proposer buffers them in FIFO order and emits a `BatchReady` event
/// when exactly `blk_size` commands are pending.
///
/// At most one batch is released per submission, so proposal work never
/// starves delivery or vote handling on the shared event context.
pub struct CommandPool {
    /// FIFO buffer of commands awaiting a batch.
    pending: VecDeque<Hash>,

    /// Configuration.
    config: MempoolConfig,
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("pending", &self.pending.len())
            .field("blk_size", &self.config.blk_size)
            .finish()
    }
}

impl CommandPool {
    /// Create a new command pool.
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            pending: VecDeque::new(),
            config,
        }
    }

    /// Number of commands awaiting a batch.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Handle a command submitted by a client.
    ///
    /// `is_proposer` reflects the pacemaker's current answer; commands that
    /// arrive while this replica is not the proposer are dropped.
    #[instrument(skip(self), fields(cmd_hash = ?cmd_hash))]
    pub fn on_command_submitted(&mut self, cmd_hash: Hash, is_proposer: bool) -> Vec<Action> {
        if !is_proposer {
            trace!("not the current proposer; dropping command");
            return vec![];
        }
        self.pending.push_back(cmd_hash);
        if self.pending.len() < self.config.blk_size {
            return vec![];
        }

        // Pop exactly one batch; further batches wait for the next cycle.
        let cmds: Vec<Hash> = self.pending.drain(..self.config.blk_size).collect();
        debug!(batch = cmds.len(), left = self.pending.len(), "batch ready");
        vec![Action::EnqueueInternal {
            event: Event::BatchReady { cmds },
        }]
    }
}
