//! Delivery dependency tracking.
//!
//! A [`PendingBlock`] exists for every fetched-but-not-yet-delivered block
//! the core cares about. It records which dependencies are still
//! outstanding; the core completes deliveries (and cascades to dependents)
//! as dependencies resolve. Fetch requests are deduplicated here so
//! concurrent interest in the same hash produces a single outstanding
//! request.

use braid_messages::{ProposalGossip, VoteGossip};
use braid_types::{Hash, ReplicaId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Delivery context for one block.
#[derive(Debug)]
pub struct PendingBlock {
    /// The block awaiting delivery.
    pub blk_hash: Hash,
    /// Preferred peer for fetching this block's dependencies.
    pub peer: ReplicaId,
    /// Parents that have not yet been delivered.
    pub missing_parents: HashSet<Hash>,
    /// The carried certificate's referent, while not yet fetched.
    pub awaiting_qc_ref: Option<Hash>,
    /// Verification verdict; `None` while the worker pool has it.
    pub verdict: Option<bool>,
    /// Whether verification has been dispatched.
    pub verify_requested: bool,
    /// Proposals to process once this block delivers.
    pub proposals: Vec<ProposalGossip>,
}

impl PendingBlock {
    fn new(blk_hash: Hash, peer: ReplicaId) -> Self {
        Self {
            blk_hash,
            peer,
            missing_parents: HashSet::new(),
            awaiting_qc_ref: None,
            verdict: None,
            verify_requested: false,
            proposals: Vec::new(),
        }
    }

    /// Whether every dependency has resolved.
    pub fn is_ready(&self) -> bool {
        self.missing_parents.is_empty()
            && self.awaiting_qc_ref.is_none()
            && self.verdict == Some(true)
    }
}

/// The set of in-flight deliveries and their held continuations.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    pending: HashMap<Hash, PendingBlock>,
    /// Hashes with an outstanding fetch request (request coalescing).
    fetch_requested: HashSet<Hash>,
    /// Verified votes waiting for their block to deliver.
    votes_waiting: HashMap<Hash, Vec<VoteGossip>>,
}

impl DeliveryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the context for a block.
    pub fn ensure(&mut self, blk_hash: Hash, peer: ReplicaId) -> &mut PendingBlock {
        self.pending
            .entry(blk_hash)
            .or_insert_with(|| PendingBlock::new(blk_hash, peer))
    }

    /// Whether a context exists for this block.
    pub fn contains(&self, blk_hash: &Hash) -> bool {
        self.pending.contains_key(blk_hash)
    }

    /// Access a context.
    pub fn get(&self, blk_hash: &Hash) -> Option<&PendingBlock> {
        self.pending.get(blk_hash)
    }

    /// Access a context mutably.
    pub fn get_mut(&mut self, blk_hash: &Hash) -> Option<&mut PendingBlock> {
        self.pending.get_mut(blk_hash)
    }

    /// Remove and return a context.
    pub fn take(&mut self, blk_hash: &Hash) -> Option<PendingBlock> {
        self.pending.remove(blk_hash)
    }

    /// Whether any context lists this hash as a missing parent.
    pub fn is_wanted_as_parent(&self, blk_hash: &Hash) -> bool {
        self.pending
            .values()
            .any(|ctx| ctx.missing_parents.contains(blk_hash))
    }

    /// Record that a fetch request is going out for `blk_hash`.
    ///
    /// Returns `false` if a request is already outstanding, so concurrent
    /// interest in the same hash coalesces into one request.
    pub fn mark_fetch_requested(&mut self, blk_hash: Hash) -> bool {
        self.fetch_requested.insert(blk_hash)
    }

    /// Clear the outstanding-fetch marker once the block arrives.
    pub fn clear_fetch_request(&mut self, blk_hash: &Hash) {
        self.fetch_requested.remove(blk_hash);
    }

    /// A block was fetched: clear qc-ref waits on it.
    pub fn mark_fetched(&mut self, blk_hash: &Hash) {
        for ctx in self.pending.values_mut() {
            if ctx.awaiting_qc_ref == Some(*blk_hash) {
                ctx.awaiting_qc_ref = None;
            }
        }
    }

    /// A block was delivered: clear parent waits on it.
    pub fn mark_delivered(&mut self, blk_hash: &Hash) {
        for ctx in self.pending.values_mut() {
            ctx.missing_parents.remove(blk_hash);
        }
    }

    /// Record a verification verdict.
    pub fn set_verdict(&mut self, blk_hash: &Hash, valid: bool) {
        match self.pending.get_mut(blk_hash) {
            Some(ctx) => ctx.verdict = Some(valid),
            None => debug!(?blk_hash, "verdict for block with no pending context"),
        }
    }

    /// Drop a block that failed verification.
    ///
    /// Its held proposals and buffered votes are discarded. Contexts
    /// waiting on it as a parent stay pending; another branch may still
    /// deliver them, and otherwise they simply never resolve.
    pub fn reject(&mut self, blk_hash: &Hash) {
        if let Some(ctx) = self.pending.remove(blk_hash) {
            warn!(
                ?blk_hash,
                held_proposals = ctx.proposals.len(),
                "rejecting block that failed verification"
            );
        }
        self.votes_waiting.remove(blk_hash);
        self.fetch_requested.remove(blk_hash);
    }

    /// Hashes whose contexts are ready to deliver.
    pub fn ready_hashes(&self) -> Vec<Hash> {
        self.pending
            .values()
            .filter(|ctx| ctx.is_ready())
            .map(|ctx| ctx.blk_hash)
            .collect()
    }

    /// Buffer a verified vote until its block delivers.
    pub fn push_vote(&mut self, vote: VoteGossip) {
        self.votes_waiting
            .entry(vote.blk_hash)
            .or_default()
            .push(vote);
    }

    /// Take the buffered votes for a delivered block.
    pub fn take_votes(&mut self, blk_hash: &Hash) -> Vec<VoteGossip> {
        self.votes_waiting.remove(blk_hash).unwrap_or_default()
    }

    /// Whether no deliveries are in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of in-flight deliveries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
