//! Async waiter registry.
//!
//! Three rendezvous patterns back the observability surface:
//!
//! - **Keyed one-shot** (`qc_waiting`, `blk_delivery_waiting`): waiters
//!   keyed by block hash, resolved once when the matching event fires,
//!   then erased.
//! - **Broadcast one-shot** (`propose_waiting`, `receive_proposal_waiting`,
//!   `hqc_update_waiting`): a slot whose current subscribers are resolved
//!   when the event fires; the slot is emptied before firing so late
//!   subscribers wait for the *next* event.
//! - **Per-command** (`decision_waiting`): one callback per command hash,
//!   fired when the command's block commits.
//!
//! The runner resolves waiters as it observes internal events and finality
//! actions flowing out of the state machine.

use braid_messages::ProposalGossip;
use braid_types::{Finality, Hash};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};

type DecisionCallback = Box<dyn FnOnce(Finality) + Send>;

/// Pending notifications registry.
#[derive(Default)]
pub struct Waiters {
    qc_waiting: HashMap<Hash, Vec<oneshot::Sender<Hash>>>,
    blk_delivery_waiting: HashMap<Hash, Vec<oneshot::Sender<Hash>>>,
    propose_waiting: Vec<oneshot::Sender<ProposalGossip>>,
    receive_proposal_waiting: Vec<oneshot::Sender<ProposalGossip>>,
    hqc_update_waiting: Vec<oneshot::Sender<Hash>>,
    decision_waiting: HashMap<Hash, DecisionCallback>,
}

impl std::fmt::Debug for Waiters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiters")
            .field("qc_waiting", &self.qc_waiting.len())
            .field("blk_delivery_waiting", &self.blk_delivery_waiting.len())
            .field("propose_waiting", &self.propose_waiting.len())
            .field(
                "receive_proposal_waiting",
                &self.receive_proposal_waiting.len(),
            )
            .field("hqc_update_waiting", &self.hqc_update_waiting.len())
            .field("decision_waiting", &self.decision_waiting.len())
            .finish()
    }
}

impl Waiters {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Subscription
    // ═══════════════════════════════════════════════════════════════════════

    /// Resolves when a QC for `blk_hash` forms (or is next observed in a
    /// carried certificate).
    pub fn async_qc_finish(&mut self, blk_hash: Hash) -> oneshot::Receiver<Hash> {
        let (tx, rx) = oneshot::channel();
        self.qc_waiting.entry(blk_hash).or_default().push(tx);
        rx
    }

    /// Resolves when `blk_hash` completes delivery.
    pub fn async_blk_delivery(&mut self, blk_hash: Hash) -> oneshot::Receiver<Hash> {
        let (tx, rx) = oneshot::channel();
        self.blk_delivery_waiting
            .entry(blk_hash)
            .or_default()
            .push(tx);
        rx
    }

    /// Resolves with the next proposal this replica broadcasts.
    pub fn async_wait_proposal(&mut self) -> oneshot::Receiver<ProposalGossip> {
        let (tx, rx) = oneshot::channel();
        self.propose_waiting.push(tx);
        rx
    }

    /// Resolves with the next remote proposal that finishes processing.
    pub fn async_wait_receive_proposal(&mut self) -> oneshot::Receiver<ProposalGossip> {
        let (tx, rx) = oneshot::channel();
        self.receive_proposal_waiting.push(tx);
        rx
    }

    /// Resolves with the hqc block hash the next time hqc advances.
    pub fn async_hqc_update(&mut self) -> oneshot::Receiver<Hash> {
        let (tx, rx) = oneshot::channel();
        self.hqc_update_waiting.push(tx);
        rx
    }

    /// Register a decision callback for a command.
    ///
    /// The first registration for a hash wins; a later one for the same
    /// in-flight command is dropped.
    pub fn register_decision(&mut self, cmd_hash: Hash, callback: DecisionCallback) {
        if self.decision_waiting.contains_key(&cmd_hash) {
            debug!(?cmd_hash, "decision waiter already registered; ignoring");
            return;
        }
        self.decision_waiting.insert(cmd_hash, callback);
    }

    /// Number of commands awaiting a decision.
    pub fn decisions_pending(&self) -> usize {
        self.decision_waiting.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Resolution (called by the runner)
    // ═══════════════════════════════════════════════════════════════════════

    /// A QC formed for `blk_hash`.
    pub fn on_qc_finish(&mut self, blk_hash: Hash) {
        if let Some(waiters) = self.qc_waiting.remove(&blk_hash) {
            for tx in waiters {
                let _ = tx.send(blk_hash);
            }
        }
    }

    /// A block completed delivery.
    pub fn on_blk_delivered(&mut self, blk_hash: Hash) {
        if let Some(waiters) = self.blk_delivery_waiting.remove(&blk_hash) {
            for tx in waiters {
                let _ = tx.send(blk_hash);
            }
        }
    }

    /// This replica broadcast a proposal.
    pub fn on_propose(&mut self, proposal: &ProposalGossip) {
        // Empty the slot before firing: late subscribers wait for the next
        // proposal.
        for tx in std::mem::take(&mut self.propose_waiting) {
            let _ = tx.send(proposal.clone());
        }
    }

    /// A remote proposal finished processing.
    pub fn on_receive_proposal(&mut self, proposal: &ProposalGossip) {
        for tx in std::mem::take(&mut self.receive_proposal_waiting) {
            let _ = tx.send(proposal.clone());
        }
    }

    /// The hqc advanced.
    pub fn on_hqc_update(&mut self, blk_hash: Hash) {
        for tx in std::mem::take(&mut self.hqc_update_waiting) {
            let _ = tx.send(blk_hash);
        }
    }

    /// A command committed.
    pub fn on_decide(&mut self, finality: Finality) {
        match self.decision_waiting.remove(&finality.cmd_hash) {
            Some(callback) => callback(finality),
            None => trace!(cmd_hash = ?finality.cmd_hash, "decision with no waiter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::{Block, ReplicaId};

    fn proposal() -> ProposalGossip {
        ProposalGossip::new(
            ReplicaId(0),
            Block::new(vec![Hash::from_bytes(b"p")], vec![], None, vec![]),
        )
    }

    #[tokio::test]
    async fn test_keyed_waiter_resolves_once() {
        let mut waiters = Waiters::new();
        let hash = Hash::from_bytes(b"blk");
        let rx = waiters.async_qc_finish(hash);

        waiters.on_qc_finish(hash);
        assert_eq!(rx.await.unwrap(), hash);

        // A second fire has no one to notify and does not panic.
        waiters.on_qc_finish(hash);
    }

    #[tokio::test]
    async fn test_broadcast_slot_rearms_before_firing() {
        let mut waiters = Waiters::new();
        let early = waiters.async_wait_proposal();
        waiters.on_propose(&proposal());
        assert!(early.await.is_ok());

        // Subscribed after the event: waits for the next one.
        let mut late = waiters.async_wait_proposal();
        assert!(late.try_recv().is_err());
        waiters.on_propose(&proposal());
        assert!(late.await.is_ok());
    }

    #[tokio::test]
    async fn test_decision_callback_fires_once() {
        let mut waiters = Waiters::new();
        let cmd = Hash::from_bytes(b"cmd");
        let (tx, rx) = oneshot::channel();
        waiters.register_decision(
            cmd,
            Box::new(move |fin| {
                let _ = tx.send(fin);
            }),
        );

        // A second registration for the same command is ignored.
        waiters.register_decision(cmd, Box::new(|_| panic!("must not fire")));
        assert_eq!(waiters.decisions_pending(), 1);

        let finality = Finality {
            replica: ReplicaId(0),
            decision: 1,
            cmd_idx: 0,
            cmd_height: 2,
            cmd_hash: cmd,
            blk_hash: Hash::from_bytes(b"blk"),
        };
        waiters.on_decide(finality);
        assert_eq!(rx.await.unwrap().cmd_hash, cmd);
        assert_eq!(waiters.decisions_pending(), 0);
    }

    #[tokio::test]
    async fn test_hqc_update_notifies_all_current_waiters() {
        let mut waiters = Waiters::new();
        let a = waiters.async_hqc_update();
        let b = waiters.async_hqc_update();
        let hash = Hash::from_bytes(b"hqc");
        waiters.on_hqc_update(hash);
        assert_eq!(a.await.unwrap(), hash);
        assert_eq!(b.await.unwrap(), hash);
    }
}
