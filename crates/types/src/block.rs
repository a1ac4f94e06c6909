//! Block and command wire types.

use crate::{ConsensusConfig, Hash, QuorumCert};
use sbor::prelude::{basic_encode, BasicSbor};

/// An opaque client command, identified by its content hash.
///
/// The consensus core orders command *hashes*; payloads are cached in
/// storage purely so a replica can serve them to the host state machine.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Command {
    /// Raw command payload.
    pub payload: Vec<u8>,
}

impl Command {
    /// Create a command from payload bytes.
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Content address of this command.
    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.payload)
    }
}

/// The wire form of a block.
///
/// Only these fields travel between replicas and enter the content address.
/// Per-replica bookkeeping (height, resolved parents, `qc_ref`, `self_qc`,
/// vote set, delivery and decision state) lives on the storage entry and is
/// never serialized.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Block {
    /// Hashes of parent blocks; `parent_hashes[0]` is the primary parent.
    /// Empty only for the genesis block.
    pub parent_hashes: Vec<Hash>,
    /// Ordered command hashes carried by this block.
    pub cmds: Vec<Hash>,
    /// Certificate for an ancestor, carried only when the primary parent had
    /// already reached quorum at proposal time.
    pub qc: Option<QuorumCert>,
    /// Opaque extra payload.
    pub extra: Vec<u8>,
}

impl Block {
    /// Create a block from its wire fields.
    pub fn new(
        parent_hashes: Vec<Hash>,
        cmds: Vec<Hash>,
        qc: Option<QuorumCert>,
        extra: Vec<u8>,
    ) -> Self {
        Self {
            parent_hashes,
            cmds,
            qc,
            extra,
        }
    }

    /// The genesis block, identical on every replica.
    pub fn genesis() -> Self {
        Self {
            parent_hashes: vec![],
            cmds: vec![],
            qc: None,
            extra: b"braid-genesis".to_vec(),
        }
    }

    /// Content address of the genesis block.
    pub fn genesis_hash() -> Hash {
        static GENESIS_HASH: std::sync::OnceLock<Hash> = std::sync::OnceLock::new();
        *GENESIS_HASH.get_or_init(|| Block::genesis().hash())
    }

    /// Content address over the wire fields.
    pub fn hash(&self) -> Hash {
        let encoded = basic_encode(self).expect("block encoding is infallible");
        Hash::from_bytes(&encoded)
    }

    /// Whether this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.parent_hashes.is_empty()
    }

    /// Structural and certificate verification.
    ///
    /// Checks that a non-genesis block names at least one parent and that a
    /// carried certificate verifies against the configuration. The genesis
    /// certificate is axiomatic (installed at init, never signed), so a
    /// certificate covering genesis is accepted as-is. Ancestry checks
    /// (does the certificate actually cover an ancestor) are done at
    /// delivery time when the references are resolved.
    pub fn verify(&self, config: &ConsensusConfig) -> bool {
        if self.parent_hashes.is_empty() {
            return false;
        }
        match &self.qc {
            Some(qc) if qc.obj_hash() == Block::genesis_hash() => true,
            Some(qc) => qc.verify(config),
            None => true,
        }
    }
}
