//! Consensus error taxonomy.

use braid_types::Hash;
use thiserror::Error;

/// Structured consensus errors.
///
/// Only [`ConsensusError::SafetyBreached`] is fatal; the runner logs and
/// aborts on it. The others indicate a broken precondition on a single
/// block and are logged and dropped at the call site.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsensusError {
    /// A block (or one of its parents) was used before delivery.
    #[error("block not delivered: {0}")]
    NotDelivered(Hash),

    /// `update` ran on a block that carries no certificate reference.
    #[error("empty qc_ref on block {0}")]
    EmptyQcRef(Hash),

    /// A delivered block's certificate refers to a block that was never
    /// fetched.
    #[error("block referred by qc not fetched: {0}")]
    QcRefNotFetched(Hash),

    /// The commit walk failed to reach `bexec`.
    ///
    /// Indicates either a protocol bug or enough Byzantine replicas to
    /// break the `n >= 2f + 1` assumption; there is nothing sane to do.
    #[error("safety breached: commit walk from {from} missed bexec {bexec}")]
    SafetyBreached { from: Hash, bexec: Hash },
}

impl ConsensusError {
    /// Whether the process must abort on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsensusError::SafetyBreached { .. })
    }
}
