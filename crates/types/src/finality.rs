//! Commit notifications.

use crate::{Hash, ReplicaId};

/// Notification that a command reached a decision.
///
/// Emitted in log order for every command of every committed block; the host
/// state machine executes commands in exactly this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finality {
    /// The reporting replica.
    pub replica: ReplicaId,
    /// Decision value (1 = committed).
    pub decision: i8,
    /// Index of the command within its block.
    pub cmd_idx: u64,
    /// Height of the committing block.
    pub cmd_height: u64,
    /// The decided command.
    pub cmd_hash: Hash,
    /// The block that carried the command.
    pub blk_hash: Hash,
}
