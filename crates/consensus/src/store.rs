//! Content-addressed entity storage.

use braid_types::{Block, Command, Hash, QuorumCert, ReplicaId};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// A block and its per-replica bookkeeping.
///
/// The wire `block` is what travels between replicas; everything else is
/// local state populated over the block's lifecycle. A node is *fetched*
/// when it exists at all, and *delivered* once its references are resolved
/// and `height` is assigned.
#[derive(Debug, Clone)]
pub struct BlockNode {
    /// The wire form of the block.
    pub block: Block,
    /// One plus the primary parent's height; assigned at delivery, never
    /// taken from the wire.
    pub height: u64,
    /// Resolved parent references (mirrors `block.parent_hashes` at
    /// delivery; severed during pruning).
    pub parents: Vec<Hash>,
    /// The certificate this block carries, if any. Matches `block.qc`
    /// except on genesis, where `on_init` installs it after the fact.
    pub qc: Option<QuorumCert>,
    /// The block certified by `qc`; resolved at delivery.
    pub qc_ref: Option<Hash>,
    /// Accumulator over votes for *this* block.
    pub self_qc: Option<QuorumCert>,
    /// Replicas that have voted for this block.
    pub voted: HashSet<ReplicaId>,
    /// Whether delivery has completed. Monotone: set exactly once.
    pub delivered: bool,
    /// Decision state: 0 = undecided, 1 = committed.
    pub decision: i8,
}

impl BlockNode {
    fn new(block: Block) -> Self {
        let qc = block.qc.clone();
        Self {
            block,
            height: 0,
            parents: Vec::new(),
            qc,
            qc_ref: None,
            self_qc: None,
            voted: HashSet::new(),
            delivered: false,
            decision: 0,
        }
    }
}

/// Content-addressed store of blocks and commands.
///
/// Sole owner of all block state; every cross-reference elsewhere in the
/// core is a `Hash` resolved through this arena.
#[derive(Debug, Default)]
pub struct EntityStorage {
    blocks: HashMap<Hash, BlockNode>,
    cmds: HashMap<Hash, Command>,
}

impl EntityStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block if new; idempotent. Returns its content address.
    pub fn add_blk(&mut self, block: Block) -> Hash {
        let hash = block.hash();
        self.blocks.entry(hash).or_insert_with(|| {
            trace!(blk_hash = ?hash, "block added to storage");
            BlockNode::new(block)
        });
        hash
    }

    /// Look up a block's node.
    pub fn find_blk(&self, hash: &Hash) -> Option<&BlockNode> {
        self.blocks.get(hash)
    }

    /// Look up a block's node mutably.
    pub fn find_blk_mut(&mut self, hash: &Hash) -> Option<&mut BlockNode> {
        self.blocks.get_mut(hash)
    }

    /// Whether the block's wire form is present.
    pub fn is_blk_fetched(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Whether the block has passed delivery.
    pub fn is_blk_delivered(&self, hash: &Hash) -> bool {
        self.blocks.get(hash).is_some_and(|node| node.delivered)
    }

    /// Cache a command payload.
    pub fn add_cmd(&mut self, cmd: Command) -> Hash {
        let hash = cmd.hash();
        self.cmds.entry(hash).or_insert(cmd);
        hash
    }

    /// Look up a cached command.
    pub fn find_cmd(&self, hash: &Hash) -> Option<&Command> {
        self.cmds.get(hash)
    }

    /// Drop a block whose references have been severed.
    ///
    /// Called by `prune` once the node's parent links are gone; a node that
    /// still holds parents is kept. Returns whether the block was released.
    pub fn try_release_blk(&mut self, hash: &Hash) -> bool {
        let releasable = self
            .blocks
            .get(hash)
            .is_some_and(|node| node.parents.is_empty());
        if releasable {
            self.blocks.remove(hash);
            trace!(blk_hash = ?hash, "block released from storage");
        }
        releasable
    }

    /// Number of stored blocks.
    pub fn blk_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of cached commands.
    pub fn cmd_count(&self) -> usize {
        self.cmds.len()
    }
}
