//! Identifier newtypes.

use sbor::prelude::BasicSbor;

/// Stable identifier of a replica within a configuration.
///
/// Assigned at startup from the replica table and never reused while the
/// configuration is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub struct ReplicaId(pub u16);

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "replica-{}", self.0)
    }
}
