//! Safety and commit state machine.
//!
//! This module implements the consensus core as a synchronous, event-driven
//! model: entry points take wire messages or delegated-work completions and
//! return actions. Nothing here suspends; delivery dependencies are tracked
//! in [`DeliveryQueue`] and resolved as fetch/verification results arrive.

use crate::config::CoreConfig;
use crate::error::ConsensusError;
use crate::pending::DeliveryQueue;
use crate::store::EntityStorage;
use braid_core::{Action, Event, OutboundMessage, TimerId};
use braid_messages::{GetBlocksResponse, ProposalGossip, VoteGossip};
use braid_types::{
    Block, ConsensusConfig, Finality, Hash, KeyPair, PartialCert, QuorumCert, ReplicaId,
};
use std::collections::HashSet;
use tracing::{debug, error, info, instrument, trace, warn};

/// The highest quorum certificate this replica has observed.
///
/// The branch-selection anchor for voting: a replica only votes for blocks
/// that extend `blk_hash` via primary parents.
#[derive(Debug, Clone)]
pub struct HighQc {
    /// The certified block.
    pub blk_hash: Hash,
    /// Height of the certified block.
    pub height: u64,
    /// The certificate itself.
    pub qc: QuorumCert,
}

/// Consensus core state machine.
///
/// Holds the block DAG, the safety variables (`vheight`, `bexec`, `hqc`,
/// `tails`), and the delivery pipeline. All entry points run to completion
/// on the caller's (single) event context.
pub struct ConsensusState {
    // ═══════════════════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════════════════
    /// This replica's identifier.
    id: ReplicaId,

    /// Signing key for votes and certificates.
    keypair: KeyPair,

    /// Replica table and quorum size.
    config: ConsensusConfig,

    /// Core tunables.
    core_config: CoreConfig,

    // ═══════════════════════════════════════════════════════════════════════
    // Chain State
    // ═══════════════════════════════════════════════════════════════════════
    /// Content-addressed arena of all known blocks and commands.
    storage: EntityStorage,

    /// The genesis block hash.
    b0: Hash,

    /// Highest committed block. Monotone in height.
    bexec: Hash,

    /// Height of the highest block this replica has voted for. Monotone.
    vheight: u64,

    /// Highest QC observed; replaced only on strictly greater height.
    hqc: HighQc,

    /// Current leaves of the DAG (delivered blocks with no known child).
    tails: HashSet<Hash>,

    /// Administrative flag suppressing outbound votes.
    neg_vote: bool,

    // ═══════════════════════════════════════════════════════════════════════
    // Delivery Pipeline
    // ═══════════════════════════════════════════════════════════════════════
    /// In-flight deliveries and their held proposals/votes.
    delivery: DeliveryQueue,
}

impl std::fmt::Debug for ConsensusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusState")
            .field("id", &self.id)
            .field("vheight", &self.vheight)
            .field("bexec", &self.bexec)
            .field("hqc_height", &self.hqc.height)
            .field("tails", &self.tails.len())
            .field("blocks", &self.storage.blk_count())
            .field("in_flight", &self.delivery.len())
            .finish()
    }
}

impl ConsensusState {
    /// Create a fresh core with the genesis block installed.
    ///
    /// Call [`ConsensusState::on_init`] before processing any event.
    pub fn new(
        id: ReplicaId,
        keypair: KeyPair,
        config: ConsensusConfig,
        core_config: CoreConfig,
    ) -> Self {
        let mut storage = EntityStorage::new();
        let b0 = storage.add_blk(Block::genesis());
        {
            let node = storage.find_blk_mut(&b0).expect("genesis block just added");
            node.height = 1;
            node.delivered = true;
            node.decision = 1;
        }
        let mut tails = HashSet::new();
        tails.insert(b0);

        Self {
            id,
            keypair,
            config,
            core_config,
            storage,
            b0,
            bexec: b0,
            vheight: 0,
            hqc: HighQc {
                blk_hash: b0,
                height: 1,
                qc: QuorumCert::new(b0),
            },
            tails,
            neg_vote: false,
            delivery: DeliveryQueue::new(),
        }
    }

    /// Install the quorum size and the genesis certificate.
    ///
    /// Sets `nmajority = 2 * nfaulty + 1`, gives genesis a self-referential
    /// finalized QC, and seeds genesis's vote set with every configured
    /// replica.
    pub fn on_init(&mut self, nfaulty: usize) {
        let nmajority = 2 * nfaulty + 1;
        self.config.set_nmajority(nmajority);

        let mut qc = QuorumCert::new(self.b0);
        qc.compute();

        let replicas: Vec<ReplicaId> = self.config.replica_ids().collect();
        if let Some(node) = self.storage.find_blk_mut(&self.b0) {
            node.qc = Some(qc.clone());
            node.qc_ref = Some(self.b0);
            node.self_qc = Some(qc.clone());
            for replica in replicas {
                node.voted.insert(replica);
            }
        }
        self.hqc = HighQc {
            blk_hash: self.b0,
            height: 1,
            qc,
        };
        info!(replica = %self.id, nmajority, "consensus core initialized");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// This replica's identifier.
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Height of the highest block voted for.
    pub fn vheight(&self) -> u64 {
        self.vheight
    }

    /// The highest committed block.
    pub fn bexec(&self) -> Hash {
        self.bexec
    }

    /// Height of the highest committed block.
    pub fn bexec_height(&self) -> u64 {
        self.height_of(&self.bexec).unwrap_or(0)
    }

    /// The highest QC observed.
    pub fn hqc(&self) -> &HighQc {
        &self.hqc
    }

    /// The genesis block hash.
    pub fn genesis_hash(&self) -> Hash {
        self.b0
    }

    /// Current DAG leaves.
    pub fn tails(&self) -> &HashSet<Hash> {
        &self.tails
    }

    /// The block/command arena.
    pub fn storage(&self) -> &EntityStorage {
        &self.storage
    }

    /// Mutable access to the command cache and arena.
    pub fn storage_mut(&mut self) -> &mut EntityStorage {
        &mut self.storage
    }

    /// The replica table.
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Number of in-flight deliveries.
    pub fn in_flight_deliveries(&self) -> usize {
        self.delivery.len()
    }

    /// Suppress (or re-enable) outbound votes.
    pub fn set_neg_vote(&mut self, neg_vote: bool) {
        self.neg_vote = neg_vote;
    }

    /// Height of a delivered block.
    pub fn height_of(&self, blk_hash: &Hash) -> Option<u64> {
        self.storage
            .find_blk(blk_hash)
            .filter(|node| node.delivered)
            .map(|node| node.height)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Delivery
    // ═══════════════════════════════════════════════════════════════════════

    /// Resolve a block's references and mark it delivered.
    ///
    /// Preconditions: every parent delivered; the certificate's referent
    /// fetched. Re-delivery is a warning, not an error.
    pub fn on_deliver_blk(&mut self, blk_hash: Hash) -> Result<bool, ConsensusError> {
        let (parent_hashes, qc_target, already_delivered) = {
            let node = self
                .storage
                .find_blk(&blk_hash)
                .ok_or(ConsensusError::NotDelivered(blk_hash))?;
            (
                node.block.parent_hashes.clone(),
                node.qc.as_ref().map(|qc| qc.obj_hash()),
                node.delivered,
            )
        };
        if already_delivered {
            warn!(?blk_hash, "attempt to deliver a block twice");
            return Ok(false);
        }

        let mut height = 0;
        for (i, parent) in parent_hashes.iter().enumerate() {
            let pnode = self
                .storage
                .find_blk(parent)
                .filter(|node| node.delivered)
                .ok_or(ConsensusError::NotDelivered(*parent))?;
            if i == 0 {
                height = pnode.height + 1;
            }
        }

        let qc_ref = match qc_target {
            Some(target) => {
                if !self.storage.is_blk_fetched(&target) {
                    return Err(ConsensusError::QcRefNotFetched(target));
                }
                Some(target)
            }
            None => None,
        };

        if let Some(node) = self.storage.find_blk_mut(&blk_hash) {
            node.parents = parent_hashes.clone();
            node.height = height;
            node.qc_ref = qc_ref;
            node.delivered = true;
        }
        for parent in &parent_hashes {
            self.tails.remove(parent);
        }
        self.tails.insert(blk_hash);
        debug!(replica = %self.id, ?blk_hash, height, "block delivered");
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Safety & Commit
    // ═══════════════════════════════════════════════════════════════════════

    /// Replace `hqc` if the certified block is strictly higher.
    fn update_hqc(&mut self, blk_hash: Hash, qc: &QuorumCert) -> Vec<Action> {
        let Some(height) = self.height_of(&blk_hash) else {
            return vec![];
        };
        if height > self.hqc.height {
            debug!(
                replica = %self.id,
                ?blk_hash,
                height,
                prev_height = self.hqc.height,
                "hqc advanced"
            );
            self.hqc = HighQc {
                blk_hash,
                height,
                qc: qc.clone(),
            };
            vec![Action::EnqueueInternal {
                event: Event::HighQcUpdated { blk_hash, height },
            }]
        } else {
            vec![]
        }
    }

    /// The commit rule, run on every newly delivered block.
    ///
    /// Advances `hqc` from the block's carried certificate, then attempts
    /// to extend `bexec`: if the certified block's own certificate covers
    /// its primary parent, a three-chain of direct-parent links is complete
    /// and everything down to `bexec` commits in height order.
    pub fn update(&mut self, nblk: Hash) -> Result<Vec<Action>, ConsensusError> {
        let (qc_ref, qc) = {
            let node = self
                .storage
                .find_blk(&nblk)
                .ok_or(ConsensusError::NotDelivered(nblk))?;
            (node.qc_ref, node.qc.clone())
        };
        let (Some(bhash), Some(qc)) = (qc_ref, qc) else {
            return Err(ConsensusError::EmptyQcRef(nblk));
        };

        let mut actions = self.update_hqc(bhash, &qc);

        // Check for commit.
        let Some(b) = self.storage.find_blk(&bhash) else {
            return Ok(actions);
        };
        let Some(b_qc_ref) = b.qc_ref else {
            return Ok(actions);
        };
        // A decided block could be incomplete due to pruning.
        if b.decision != 0 {
            return Ok(actions);
        }
        let Some(&p_hash) = b.parents.first() else {
            return Ok(actions);
        };
        let Some(p) = self.storage.find_blk(&p_hash) else {
            return Ok(actions);
        };
        if p.decision != 0 {
            return Ok(actions);
        }
        // Commit requires a direct parent: the certificate must cover the
        // primary parent itself.
        if b_qc_ref != p_hash {
            return Ok(actions);
        }

        let bexec_height = self.bexec_height();
        let mut commit_queue: Vec<Hash> = Vec::new();
        let mut cur = p_hash;
        loop {
            let Some(node) = self.storage.find_blk(&cur) else {
                error!(replica = %self.id, from = ?p_hash, bexec = ?self.bexec, "safety breached");
                return Err(ConsensusError::SafetyBreached {
                    from: p_hash,
                    bexec: self.bexec,
                });
            };
            if node.height <= bexec_height {
                break;
            }
            commit_queue.push(cur);
            let Some(&next) = node.parents.first() else {
                error!(replica = %self.id, from = ?p_hash, bexec = ?self.bexec, "safety breached");
                return Err(ConsensusError::SafetyBreached {
                    from: p_hash,
                    bexec: self.bexec,
                });
            };
            cur = next;
        }
        if cur != self.bexec {
            error!(replica = %self.id, from = ?p_hash, bexec = ?self.bexec, "safety breached");
            return Err(ConsensusError::SafetyBreached {
                from: p_hash,
                bexec: self.bexec,
            });
        }

        for blk_hash in commit_queue.iter().rev() {
            let (height, cmds) = match self.storage.find_blk_mut(blk_hash) {
                Some(node) => {
                    node.decision = 1;
                    (node.height, node.block.cmds.clone())
                }
                None => continue,
            };
            info!(replica = %self.id, ?blk_hash, height, cmds = cmds.len(), "block committed");
            for (idx, cmd_hash) in cmds.iter().enumerate() {
                actions.push(Action::EmitFinality {
                    finality: Finality {
                        replica: self.id,
                        decision: 1,
                        cmd_idx: idx as u64,
                        cmd_height: height,
                        cmd_hash: *cmd_hash,
                        blk_hash: *blk_hash,
                    },
                });
            }
        }
        self.bexec = p_hash;
        Ok(actions)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposer Logic
    // ═══════════════════════════════════════════════════════════════════════

    /// Build, deliver, and broadcast a new proposal.
    ///
    /// The block carries a certificate only when the primary parent already
    /// reached quorum. The proposer votes for its own block first, which
    /// requires the new height to exceed `vheight`.
    #[instrument(skip(self, cmds, parents, extra), fields(replica = %self.id, cmds = cmds.len()))]
    pub fn on_propose(
        &mut self,
        cmds: Vec<Hash>,
        parents: Vec<Hash>,
        extra: Vec<u8>,
    ) -> Result<Vec<Action>, ConsensusError> {
        if parents.is_empty() {
            warn!("on_propose with empty parents");
            return Ok(vec![]);
        }
        let p_hash = parents[0];
        let (p_voted, p_self_qc) = {
            let Some(p) = self.storage.find_blk(&p_hash).filter(|node| node.delivered) else {
                warn!(parent = ?p_hash, "proposal parent not delivered; dropping");
                return Ok(vec![]);
            };
            (p.voted.len(), p.self_qc.clone())
        };
        for parent in &parents {
            self.tails.remove(parent);
        }

        // A block optionally carries a QC.
        let qc = if p_voted >= self.config.nmajority() {
            p_self_qc
        } else {
            None
        };

        let block = Block::new(parents, cmds, qc, extra);
        let blk_hash = self.storage.add_blk(block.clone());
        if let Some(node) = self.storage.find_blk_mut(&blk_hash) {
            node.self_qc = Some(QuorumCert::new(blk_hash));
        }
        self.on_deliver_blk(blk_hash)?;

        let mut actions = Vec::new();
        match self.update(blk_hash) {
            Ok(mut more) => actions.append(&mut more),
            Err(ConsensusError::EmptyQcRef(_)) => {
                debug!(?blk_hash, "proposal carries no certificate")
            }
            Err(e) => return Err(e),
        }

        let height = self.height_of(&blk_hash).unwrap_or(0);
        let proposal = ProposalGossip::new(self.id, block);
        info!(?blk_hash, height, "proposing block");
        actions.push(Action::EnqueueInternal {
            event: Event::ProposalEmitted {
                proposal: proposal.clone(),
            },
        });

        // Self-vote.
        if height <= self.vheight {
            warn!(
                height,
                vheight = self.vheight,
                "new block not above vheight; skipping self-vote"
            );
        } else {
            self.vheight = height;
            let cert = PartialCert::create(&self.keypair, self.id, blk_hash);
            let vote = VoteGossip::new(self.id, blk_hash, cert);
            actions.extend(self.apply_vote(&vote));
        }

        actions.push(Action::Broadcast {
            message: OutboundMessage::Proposal(proposal),
        });
        Ok(actions)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Follower Logic
    // ═══════════════════════════════════════════════════════════════════════

    /// Run the voting rule on a delivered proposal.
    ///
    /// A replica votes iff the block is higher than anything it has voted
    /// for and its primary-parent chain passes through the `hqc` block.
    fn process_proposal(
        &mut self,
        proposal: &ProposalGossip,
    ) -> Result<Vec<Action>, ConsensusError> {
        let blk_hash = proposal.block.hash();
        if !self.storage.is_blk_delivered(&blk_hash) {
            return Err(ConsensusError::NotDelivered(blk_hash));
        }

        let mut actions = Vec::new();
        match self.update(blk_hash) {
            Ok(mut more) => actions.append(&mut more),
            Err(ConsensusError::EmptyQcRef(_)) => {
                debug!(?blk_hash, "proposal carries no certificate")
            }
            Err(e) => return Err(e),
        }

        let height = self.height_of(&blk_hash).unwrap_or(0);
        let mut opinion = false;
        if height > self.vheight {
            // Walk the primary-parent chain down to the hqc height.
            let mut cur = blk_hash;
            let mut cur_height = height;
            while cur_height > self.hqc.height {
                match self
                    .storage
                    .find_blk(&cur)
                    .and_then(|node| node.parents.first().copied())
                {
                    Some(parent) => {
                        cur = parent;
                        cur_height = self.height_of(&cur).unwrap_or(0);
                    }
                    None => break,
                }
            }
            if cur == self.hqc.blk_hash {
                opinion = true;
                self.vheight = height;
            }
        }
        debug!(
            replica = %self.id,
            ?blk_hash,
            height,
            opinion,
            vheight = self.vheight,
            hqc_height = self.hqc.height,
            "processed proposal"
        );

        // A carried certificate is proof that its referent reached quorum.
        if let Some(qc_ref) = self.storage.find_blk(&blk_hash).and_then(|node| node.qc_ref) {
            actions.push(Action::EnqueueInternal {
                event: Event::QuorumFormed { blk_hash: qc_ref },
            });
        }
        actions.push(Action::EnqueueInternal {
            event: Event::ProposalProcessed {
                proposal: proposal.clone(),
            },
        });

        if opinion && !self.neg_vote {
            let cert = PartialCert::create(&self.keypair, self.id, blk_hash);
            let vote = VoteGossip::new(self.id, blk_hash, cert);
            if proposal.proposer == self.id {
                actions.extend(self.apply_vote(&vote));
            } else {
                actions.push(Action::SendTo {
                    peer: proposal.proposer,
                    message: OutboundMessage::Vote(vote),
                });
            }
        }
        Ok(actions)
    }

    /// Count a verified vote for a delivered block.
    ///
    /// Forms the QC at exactly `nmajority` distinct voters.
    fn apply_vote(&mut self, vote: &VoteGossip) -> Vec<Action> {
        let blk_hash = vote.blk_hash;
        let nmajority = self.config.nmajority();
        let mut formed_qc: Option<QuorumCert> = None;
        {
            let Some(node) = self.storage.find_blk_mut(&blk_hash).filter(|node| node.delivered) else {
                warn!(?blk_hash, "vote for unknown or undelivered block");
                return vec![];
            };
            if node.voted.len() >= nmajority {
                trace!(?blk_hash, "quorum already formed; ignoring vote");
                return vec![];
            }
            if !node.voted.insert(vote.voter) {
                warn!(voter = %vote.voter, ?blk_hash, "duplicate vote");
                return vec![];
            }
            if node.self_qc.is_none() {
                warn!(?blk_hash, "vote for a block this replica did not propose");
                node.self_qc = Some(QuorumCert::new(blk_hash));
            }
            if let Some(qc) = node.self_qc.as_mut() {
                qc.add_part(vote.voter, vote.cert.sig);
                if node.voted.len() == nmajority {
                    qc.compute();
                    formed_qc = Some(qc.clone());
                }
            }
        }
        match formed_qc {
            Some(qc) => {
                info!(replica = %self.id, ?blk_hash, "quorum certificate formed");
                let mut actions = vec![Action::EnqueueInternal {
                    event: Event::QuorumFormed { blk_hash },
                }];
                actions.extend(self.update_hqc(blk_hash, &qc));
                actions
            }
            None => vec![],
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event Entry Points
    // ═══════════════════════════════════════════════════════════════════════

    /// Inbound proposal from a peer.
    #[instrument(skip(self, proposal), fields(replica = %self.id, proposer = %proposal.proposer))]
    pub fn on_proposal_received(
        &mut self,
        peer: ReplicaId,
        proposal: ProposalGossip,
    ) -> Result<Vec<Action>, ConsensusError> {
        let blk_hash = proposal.block.hash();
        debug!(?blk_hash, %peer, "received proposal");
        if proposal.block.is_genesis() {
            warn!(%peer, "proposal carries a genesis block; dropping");
            return Ok(vec![]);
        }
        if self.storage.is_blk_delivered(&blk_hash) {
            return self.process_proposal(&proposal);
        }
        let mut actions = self.note_block_fetched(proposal.block.clone(), peer)?;
        self.delivery.ensure(blk_hash, peer).proposals.push(proposal);
        actions.extend(self.schedule_delivery(blk_hash, peer)?);
        actions.extend(self.try_complete_ready()?);
        Ok(actions)
    }

    /// Inbound vote from a peer.
    ///
    /// Dispatches signature verification and, if the voted-for block is not
    /// here yet, kicks its delivery (fetching from the voter).
    #[instrument(skip(self, vote), fields(replica = %self.id, voter = %vote.voter))]
    pub fn on_vote_received(
        &mut self,
        peer: ReplicaId,
        vote: VoteGossip,
    ) -> Result<Vec<Action>, ConsensusError> {
        debug!(blk_hash = ?vote.blk_hash, %peer, "received vote");
        if !vote.is_consistent() {
            warn!(voter = %vote.voter, "vote envelope does not match its certificate");
            return Ok(vec![]);
        }
        let Some(public_key) = self.config.public_key(vote.voter).copied() else {
            warn!(voter = %vote.voter, "vote from unknown replica");
            return Ok(vec![]);
        };

        let blk_hash = vote.blk_hash;
        let mut actions = vec![Action::VerifyVote { vote, public_key }];
        if !self.storage.is_blk_delivered(&blk_hash) {
            self.delivery.ensure(blk_hash, peer);
            if self.storage.is_blk_fetched(&blk_hash) {
                actions.extend(self.schedule_delivery(blk_hash, peer)?);
                actions.extend(self.try_complete_ready()?);
            } else if self.delivery.mark_fetch_requested(blk_hash) {
                actions.push(Action::FetchBlocks {
                    peer,
                    blk_hashes: vec![blk_hash],
                });
            }
        }
        Ok(actions)
    }

    /// Completion of a delegated vote verification.
    pub fn on_vote_verified(&mut self, vote: VoteGossip, valid: bool) -> Vec<Action> {
        if !valid {
            warn!(voter = %vote.voter, blk_hash = ?vote.blk_hash, "invalid vote");
            return vec![];
        }
        if self.storage.is_blk_delivered(&vote.blk_hash) {
            self.apply_vote(&vote)
        } else {
            trace!(blk_hash = ?vote.blk_hash, "buffering vote until block delivers");
            self.delivery.push_vote(vote);
            vec![]
        }
    }

    /// Completion of a delegated block verification.
    pub fn on_block_verified(
        &mut self,
        blk_hash: Hash,
        valid: bool,
    ) -> Result<Vec<Action>, ConsensusError> {
        if !valid {
            warn!(?blk_hash, "block failed verification");
            self.delivery.reject(&blk_hash);
            return Ok(vec![]);
        }
        self.delivery.set_verdict(&blk_hash, true);
        self.try_complete_ready()
    }

    /// Blocks arrived from a fetch request or response.
    pub fn on_blocks_received(
        &mut self,
        peer: ReplicaId,
        blocks: Vec<Block>,
    ) -> Result<Vec<Action>, ConsensusError> {
        let mut actions = Vec::new();
        for block in blocks {
            if block.is_genesis() {
                trace!(%peer, "ignoring genesis block in fetch response");
                continue;
            }
            actions.extend(self.note_block_fetched(block, peer)?);
        }
        actions.extend(self.try_complete_ready()?);
        Ok(actions)
    }

    /// A peer asked for blocks; answer with what we have fetched.
    pub fn on_block_request(&self, peer: ReplicaId, blk_hashes: Vec<Hash>) -> Vec<Action> {
        let blocks: Vec<Block> = blk_hashes
            .iter()
            .filter_map(|hash| self.storage.find_blk(hash).map(|node| node.block.clone()))
            .collect();
        trace!(
            replica = %self.id,
            %peer,
            requested = blk_hashes.len(),
            found = blocks.len(),
            "serving block request"
        );
        vec![Action::SendTo {
            peer,
            message: OutboundMessage::BlocksResponse(GetBlocksResponse::new(blocks)),
        }]
    }

    /// Periodic cleanup: prune once no deliveries are in flight.
    pub fn on_cleanup(&mut self) -> Vec<Action> {
        if self.delivery.is_empty() {
            self.prune(self.core_config.prune_staleness);
        } else {
            debug!(
                in_flight = self.delivery.len(),
                "skipping prune; deliveries in flight"
            );
        }
        vec![Action::SetTimer {
            id: TimerId::Cleanup,
            duration: self.core_config.cleanup_interval,
        }]
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Delivery Internals
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a block's wire form in storage and unblock waiters on its
    /// fetch.
    fn note_block_fetched(
        &mut self,
        block: Block,
        peer: ReplicaId,
    ) -> Result<Vec<Action>, ConsensusError> {
        let blk_hash = block.hash();
        if self.storage.is_blk_fetched(&blk_hash) {
            self.delivery.clear_fetch_request(&blk_hash);
            return Ok(vec![]);
        }
        self.storage.add_blk(block);
        debug!(replica = %self.id, ?blk_hash, %peer, "block fetched");
        self.delivery.clear_fetch_request(&blk_hash);
        self.delivery.mark_fetched(&blk_hash);

        let mut actions = Vec::new();
        if self.delivery.contains(&blk_hash) || self.delivery.is_wanted_as_parent(&blk_hash) {
            self.delivery.ensure(blk_hash, peer);
            actions.extend(self.schedule_delivery(blk_hash, peer)?);
        }
        Ok(actions)
    }

    /// (Re)compute a fetched block's outstanding dependencies and request
    /// whatever is missing.
    fn schedule_delivery(
        &mut self,
        blk_hash: Hash,
        peer: ReplicaId,
    ) -> Result<Vec<Action>, ConsensusError> {
        let Some(node) = self.storage.find_blk(&blk_hash) else {
            return Ok(vec![]);
        };
        if node.delivered {
            return Ok(vec![]);
        }
        let block = node.block.clone();

        let missing_parents: HashSet<Hash> = block
            .parent_hashes
            .iter()
            .filter(|parent| !self.storage.is_blk_delivered(parent))
            .copied()
            .collect();
        let qc_target = block
            .qc
            .as_ref()
            .map(|qc| qc.obj_hash())
            .filter(|target| !self.storage.is_blk_fetched(target));

        let mut actions = Vec::new();
        let mut need_fetch: Vec<Hash> = Vec::new();
        {
            let ctx = self.delivery.ensure(blk_hash, peer);
            ctx.missing_parents = missing_parents.clone();
            ctx.awaiting_qc_ref = qc_target;
            if ctx.verdict.is_none() && !ctx.verify_requested {
                ctx.verify_requested = true;
                actions.push(Action::VerifyBlock {
                    blk_hash,
                    block: block.clone(),
                });
            }
        }

        for parent in &missing_parents {
            if !self.storage.is_blk_fetched(parent) {
                if self.delivery.mark_fetch_requested(*parent) {
                    need_fetch.push(*parent);
                }
            } else if !self.delivery.contains(parent) {
                self.delivery.ensure(*parent, peer);
                actions.extend(self.schedule_delivery(*parent, peer)?);
            }
        }
        if let Some(target) = qc_target {
            if self.delivery.mark_fetch_requested(target) {
                need_fetch.push(target);
            }
        }
        if !need_fetch.is_empty() {
            debug!(
                replica = %self.id,
                ?blk_hash,
                count = need_fetch.len(),
                %peer,
                "fetching missing ancestors"
            );
            actions.push(Action::FetchBlocks {
                peer,
                blk_hashes: need_fetch,
            });
        }
        Ok(actions)
    }

    /// Deliver every block whose dependencies have resolved, cascading to
    /// dependents. Held proposals and buffered votes run on completion.
    fn try_complete_ready(&mut self) -> Result<Vec<Action>, ConsensusError> {
        let mut actions = Vec::new();
        loop {
            let ready = self.delivery.ready_hashes();
            if ready.is_empty() {
                break;
            }
            for blk_hash in ready {
                let Some(ctx) = self.delivery.take(&blk_hash) else {
                    continue;
                };
                self.on_deliver_blk(blk_hash)?;
                actions.push(Action::EnqueueInternal {
                    event: Event::BlockDelivered { blk_hash },
                });
                self.delivery.mark_delivered(&blk_hash);
                for proposal in &ctx.proposals {
                    actions.extend(self.process_proposal(proposal)?);
                }
                for vote in self.delivery.take_votes(&blk_hash) {
                    actions.extend(self.apply_vote(&vote));
                }
            }
        }
        Ok(actions)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Pruning
    // ═══════════════════════════════════════════════════════════════════════

    /// Release blocks more than `staleness` primary-parent hops below
    /// `bexec`.
    ///
    /// Walks back `staleness` steps, then severs parent links depth-first,
    /// releasing each block once its links are gone. Callable only when no
    /// delivery of a block with prunable ancestors is in flight.
    pub fn prune(&mut self, staleness: u32) {
        let mut start = self.bexec;
        for _ in 0..staleness {
            match self
                .storage
                .find_blk(&start)
                .and_then(|node| node.parents.first().copied())
            {
                Some(parent) => start = parent,
                None => return,
            }
        }
        debug!(replica = %self.id, start = ?start, staleness, "pruning below committed frontier");

        if let Some(node) = self.storage.find_blk_mut(&start) {
            node.qc_ref = None;
        }
        let mut stack = vec![start];
        let mut released = 0usize;
        while let Some(&top) = stack.last() {
            let next = match self.storage.find_blk_mut(&top) {
                None => {
                    stack.pop();
                    continue;
                }
                Some(node) => {
                    if node.parents.is_empty() {
                        None
                    } else {
                        node.qc_ref = None;
                        node.parents.pop()
                    }
                }
            };
            match next {
                Some(next_hash) => stack.push(next_hash),
                None => {
                    if self.storage.try_release_blk(&top) {
                        released += 1;
                    }
                    stack.pop();
                }
            }
        }
        debug!(replica = %self.id, released, "prune complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_types::test_utils::{test_cmd, test_config};
    use std::collections::VecDeque;
    use tracing_test::traced_test;

    /// Build `n` initialized cores sharing one replica table.
    fn setup(n: u16, nfaulty: usize) -> Vec<ConsensusState> {
        let (config, keys) = test_config(n);
        keys.into_iter()
            .enumerate()
            .map(|(i, keypair)| {
                let mut core = ConsensusState::new(
                    ReplicaId(i as u16),
                    keypair,
                    config.clone(),
                    CoreConfig::default(),
                );
                core.on_init(nfaulty);
                core
            })
            .collect()
    }

    /// Execute delegated work inline, collecting everything else.
    ///
    /// Mirrors what the runner does: verification runs immediately and its
    /// completion feeds back into the core until no delegated work remains.
    fn drive(core: &mut ConsensusState, actions: Vec<Action>) -> Vec<Action> {
        let mut queue: VecDeque<Action> = actions.into();
        let mut outbox = Vec::new();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::VerifyBlock { blk_hash, block } => {
                    let valid = block.verify(core.config());
                    queue.extend(core.on_block_verified(blk_hash, valid).unwrap());
                }
                Action::VerifyVote { vote, public_key } => {
                    let valid = vote.cert.verify(&public_key);
                    queue.extend(core.on_vote_verified(vote, valid));
                }
                other => outbox.push(other),
            }
        }
        outbox
    }

    fn broadcast_proposal(outbox: &[Action]) -> ProposalGossip {
        outbox
            .iter()
            .find_map(|action| match action {
                Action::Broadcast {
                    message: OutboundMessage::Proposal(prop),
                } => Some(prop.clone()),
                _ => None,
            })
            .expect("no proposal broadcast")
    }

    fn sent_votes(outbox: &[Action]) -> Vec<VoteGossip> {
        outbox
            .iter()
            .filter_map(|action| match action {
                Action::SendTo {
                    message: OutboundMessage::Vote(vote),
                    ..
                } => Some(*vote),
                _ => None,
            })
            .collect()
    }

    fn finalities(outbox: &[Action]) -> Vec<Finality> {
        outbox
            .iter()
            .filter_map(|action| match action {
                Action::EmitFinality { finality } => Some(*finality),
                _ => None,
            })
            .collect()
    }

    fn delivered_order(outbox: &[Action]) -> Vec<Hash> {
        outbox
            .iter()
            .filter_map(|action| match action {
                Action::EnqueueInternal {
                    event: Event::BlockDelivered { blk_hash },
                } => Some(*blk_hash),
                _ => None,
            })
            .collect()
    }

    fn quorum_formed(outbox: &[Action]) -> Vec<Hash> {
        outbox
            .iter()
            .filter_map(|action| match action {
                Action::EnqueueInternal {
                    event: Event::QuorumFormed { blk_hash },
                } => Some(*blk_hash),
                _ => None,
            })
            .collect()
    }

    /// Leader proposes; all followers receive and vote; votes return to the
    /// leader. Returns (proposal, leader outbox from vote processing).
    fn run_round(
        cores: &mut [ConsensusState],
        leader: usize,
        cmds: Vec<Hash>,
        parent: Hash,
    ) -> (ProposalGossip, Vec<Action>) {
        let leader_id = cores[leader].id();
        let actions = cores[leader]
            .on_propose(cmds, vec![parent], vec![])
            .unwrap();
        let leader_out = drive(&mut cores[leader], actions);
        let proposal = broadcast_proposal(&leader_out);

        let mut votes = Vec::new();
        for (i, core) in cores.iter_mut().enumerate() {
            if i == leader {
                continue;
            }
            let actions = core
                .on_proposal_received(leader_id, proposal.clone())
                .unwrap();
            let out = drive(core, actions);
            votes.extend(sent_votes(&out));
        }

        let mut vote_out = leader_out;
        for vote in votes {
            let voter = vote.voter;
            let actions = cores[leader].on_vote_received(voter, vote).unwrap();
            vote_out.extend(drive(&mut cores[leader], actions));
        }
        (proposal, vote_out)
    }

    #[traced_test]
    #[test]
    fn test_three_chain_commit() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();

        let (prop1, _) = run_round(&mut cores, 0, vec![test_cmd(1)], genesis);
        let b1 = prop1.block.hash();
        // B1 carries the genesis certificate. Votes stop counting once the
        // quorum of 3 is reached.
        assert!(prop1.block.qc.is_some());
        assert_eq!(cores[0].storage().find_blk(&b1).unwrap().voted.len(), 3);

        let (prop2, _) = run_round(&mut cores, 0, vec![test_cmd(2)], b1);
        let b2 = prop2.block.hash();
        assert_eq!(prop2.block.qc.as_ref().unwrap().obj_hash(), b1);

        let (prop3, out3) = run_round(&mut cores, 0, vec![test_cmd(3)], b2);
        assert_eq!(prop3.block.qc.as_ref().unwrap().obj_hash(), b2);

        // Proposing B3 completes the three-chain B1 <- B2 <- B3: B1 commits.
        let fins = finalities(&out3);
        assert_eq!(fins.len(), 1);
        assert_eq!(fins[0].cmd_hash, test_cmd(1));
        assert_eq!(fins[0].cmd_height, 2);
        assert_eq!(fins[0].cmd_idx, 0);
        assert_eq!(fins[0].blk_hash, b1);
        assert_eq!(fins[0].decision, 1);
        assert_eq!(cores[0].bexec(), b1);
        assert_eq!(cores[0].bexec_height(), 2);

        // Followers committed B1 as well, when processing B3.
        for core in &cores[1..] {
            assert_eq!(core.bexec(), b1);
            assert_eq!(core.storage().find_blk(&b1).unwrap().decision, 1);
        }
    }

    #[traced_test]
    #[test]
    fn test_no_commit_without_quorum_on_fork() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();

        // B1 reaches quorum normally.
        let (prop1, _) = run_round(&mut cores, 0, vec![test_cmd(1)], genesis);
        let b1 = prop1.block.hash();

        // Two competing proposals at the same height; neither collects a
        // quorum of votes (no votes are exchanged at all).
        let actions = cores[0]
            .on_propose(vec![test_cmd(2)], vec![b1], vec![])
            .unwrap();
        let _ = drive(&mut cores[0], actions);
        let actions = cores[1]
            .on_propose(vec![test_cmd(9)], vec![b1], vec![])
            .unwrap();
        let _ = drive(&mut cores[1], actions);

        for core in &cores {
            assert_eq!(core.bexec(), core.genesis_hash());
            assert_eq!(core.bexec_height(), 1);
        }
    }

    #[traced_test]
    #[test]
    fn test_duplicate_vote_is_dropped() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();
        let leader_id = cores[0].id();

        let actions = cores[0]
            .on_propose(vec![test_cmd(1)], vec![genesis], vec![])
            .unwrap();
        let out = drive(&mut cores[0], actions);
        let proposal = broadcast_proposal(&out);
        let b1 = proposal.block.hash();

        // Self-vote counted.
        assert_eq!(cores[0].storage().find_blk(&b1).unwrap().voted.len(), 1);

        // Replica 1 votes; the same vote arrives twice.
        let actions = cores[1]
            .on_proposal_received(leader_id, proposal)
            .unwrap();
        let out = drive(&mut cores[1], actions);
        let vote = sent_votes(&out)[0];

        for _ in 0..2 {
            let actions = cores[0].on_vote_received(vote.voter, vote).unwrap();
            let _ = drive(&mut cores[0], actions);
        }
        let node = cores[0].storage().find_blk(&b1).unwrap();
        assert_eq!(node.voted.len(), 2);
        assert!(!node.self_qc.as_ref().unwrap().is_finalized());
    }

    #[traced_test]
    #[test]
    fn test_quorum_forms_at_exactly_nmajority() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();
        let leader_id = cores[0].id();

        let actions = cores[0]
            .on_propose(vec![test_cmd(1)], vec![genesis], vec![])
            .unwrap();
        let out = drive(&mut cores[0], actions);
        let proposal = broadcast_proposal(&out);
        let b1 = proposal.block.hash();

        let mut votes = Vec::new();
        for core in cores[1..].iter_mut() {
            let actions = core
                .on_proposal_received(leader_id, proposal.clone())
                .unwrap();
            let out = drive(core, actions);
            votes.extend(sent_votes(&out));
        }
        assert_eq!(votes.len(), 3);

        // Vote 2 of 3 (self-vote was the first): no QC yet.
        let actions = cores[0].on_vote_received(votes[0].voter, votes[0]).unwrap();
        let out = drive(&mut cores[0], actions);
        assert!(quorum_formed(&out).is_empty());
        assert!(!cores[0]
            .storage()
            .find_blk(&b1)
            .unwrap()
            .self_qc
            .as_ref()
            .unwrap()
            .is_finalized());

        // Vote 3 of 3: QC forms and hqc advances.
        let actions = cores[0].on_vote_received(votes[1].voter, votes[1]).unwrap();
        let out = drive(&mut cores[0], actions);
        assert_eq!(quorum_formed(&out), vec![b1]);
        let node = cores[0].storage().find_blk(&b1).unwrap();
        assert!(node.self_qc.as_ref().unwrap().is_finalized());
        assert_eq!(node.self_qc.as_ref().unwrap().part_count(), 3);
        assert_eq!(cores[0].hqc().blk_hash, b1);

        // A fourth vote is ignored: the QC is already formed.
        let actions = cores[0].on_vote_received(votes[2].voter, votes[2]).unwrap();
        let _ = drive(&mut cores[0], actions);
        assert_eq!(cores[0].storage().find_blk(&b1).unwrap().voted.len(), 3);
    }

    #[traced_test]
    #[test]
    fn test_out_of_order_delivery() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();
        let leader_id = cores[0].id();

        // Build B1..B3 with votes from replicas 1 and 2 only; replica 3
        // sees nothing yet.
        let mut proposals = Vec::new();
        let mut parent = genesis;
        for i in 1..=3u8 {
            let actions = cores[0]
                .on_propose(vec![test_cmd(i)], vec![parent], vec![])
                .unwrap();
            let out = drive(&mut cores[0], actions);
            let proposal = broadcast_proposal(&out);
            parent = proposal.block.hash();
            for follower in 1..3 {
                let actions = cores[follower]
                    .on_proposal_received(leader_id, proposal.clone())
                    .unwrap();
                let out = drive(&mut cores[follower], actions);
                for vote in sent_votes(&out) {
                    let actions = cores[0].on_vote_received(vote.voter, vote).unwrap();
                    let _ = drive(&mut cores[0], actions);
                }
            }
            proposals.push(proposal);
        }
        let hashes: Vec<Hash> = proposals.iter().map(|p| p.block.hash()).collect();

        // Replica 3 receives only B3. It must fetch B2 (parent and qc-ref)
        // and then B1 before anything delivers.
        let actions = cores[3]
            .on_proposal_received(leader_id, proposals[2].clone())
            .unwrap();
        let out = drive(&mut cores[3], actions);
        assert!(delivered_order(&out).is_empty());
        assert!(sent_votes(&out).is_empty());

        let mut fetch_wanted: Vec<Hash> = out
            .iter()
            .filter_map(|action| match action {
                Action::FetchBlocks { blk_hashes, .. } => Some(blk_hashes.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(fetch_wanted, vec![hashes[1]]);

        // Serve fetches from the leader until replica 3 stops asking.
        let mut all_out = Vec::new();
        while !fetch_wanted.is_empty() {
            let served = cores[0].on_block_request(ReplicaId(3), fetch_wanted.clone());
            let blocks = served
                .iter()
                .find_map(|action| match action {
                    Action::SendTo {
                        message: OutboundMessage::BlocksResponse(resp),
                        ..
                    } => Some(resp.blocks.clone()),
                    _ => None,
                })
                .unwrap();
            let actions = cores[3].on_blocks_received(leader_id, blocks).unwrap();
            let out = drive(&mut cores[3], actions);
            fetch_wanted = out
                .iter()
                .filter_map(|action| match action {
                    Action::FetchBlocks { blk_hashes, .. } => Some(blk_hashes.clone()),
                    _ => None,
                })
                .flatten()
                .collect();
            all_out.extend(out);
        }

        // Delivery completed in height order and the held proposal ran:
        // replica 3 voted for B3 and committed B1.
        assert_eq!(delivered_order(&all_out), hashes);
        let votes = sent_votes(&all_out);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].blk_hash, hashes[2]);
        let fins = finalities(&all_out);
        assert_eq!(fins.len(), 1);
        assert_eq!(fins[0].cmd_hash, test_cmd(1));
        assert_eq!(cores[3].bexec(), hashes[0]);
    }

    #[traced_test]
    #[test]
    fn test_voting_rule_rejects_off_branch_proposal() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();

        // Normal chain B1..B3; follower 1 ends with vheight = 4 (voted B3)
        // and hqc = QC(B2) at height 3.
        let (prop1, _) = run_round(&mut cores, 0, vec![test_cmd(1)], genesis);
        let b1 = prop1.block.hash();
        let (prop2, _) = run_round(&mut cores, 0, vec![test_cmd(2)], b1);
        let b2 = prop2.block.hash();
        let (_, _) = run_round(&mut cores, 0, vec![test_cmd(3)], b2);
        assert_eq!(cores[1].vheight(), 4);
        assert_eq!(cores[1].hqc().blk_hash, b2);

        // A malicious leader (replica 3) grows a branch from B1 that never
        // passes through B2: A2, A3, A4 at heights 3..5.
        let a2 = Block::new(vec![b1], vec![test_cmd(21)], None, vec![]);
        let a3 = Block::new(vec![a2.hash()], vec![test_cmd(22)], None, vec![]);
        let a4 = Block::new(vec![a3.hash()], vec![test_cmd(23)], None, vec![]);

        let vheight_before = cores[1].vheight();
        let mut all_out = Vec::new();
        for block in [a2, a3, a4.clone()] {
            let proposal = ProposalGossip::new(ReplicaId(3), block);
            let actions = cores[1]
                .on_proposal_received(ReplicaId(3), proposal)
                .unwrap();
            all_out.extend(drive(&mut cores[1], actions));
        }

        // A4 delivered (height 5 > vheight) but does not extend hqc: the
        // walk lands on A2, not B2. No vote, vheight unchanged.
        assert!(cores[1].storage().is_blk_delivered(&a4.hash()));
        assert!(sent_votes(&all_out).is_empty());
        assert_eq!(cores[1].vheight(), vheight_before);
    }

    #[traced_test]
    #[test]
    fn test_neg_vote_suppresses_votes_only() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();
        let leader_id = cores[0].id();

        cores[1].set_neg_vote(true);

        let actions = cores[0]
            .on_propose(vec![test_cmd(1)], vec![genesis], vec![])
            .unwrap();
        let out = drive(&mut cores[0], actions);
        let proposal = broadcast_proposal(&out);

        let actions = cores[1]
            .on_proposal_received(leader_id, proposal)
            .unwrap();
        let out = drive(&mut cores[1], actions);
        assert!(sent_votes(&out).is_empty());
        // The opinion was still computed; vheight advanced.
        assert_eq!(cores[1].vheight(), 2);
    }

    #[traced_test]
    #[test]
    fn test_vote_from_unknown_replica_is_dropped() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();
        let actions = cores[0]
            .on_propose(vec![test_cmd(1)], vec![genesis], vec![])
            .unwrap();
        let out = drive(&mut cores[0], actions);
        let b1 = broadcast_proposal(&out).block.hash();

        let stranger = braid_types::test_utils::test_keypair(99);
        let cert = PartialCert::create(&stranger, ReplicaId(9), b1);
        let vote = VoteGossip::new(ReplicaId(9), b1, cert);
        let actions = cores[0].on_vote_received(ReplicaId(9), vote).unwrap();
        assert!(actions.is_empty());
        assert_eq!(cores[0].storage().find_blk(&b1).unwrap().voted.len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_forged_vote_fails_verification() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();
        let actions = cores[0]
            .on_propose(vec![test_cmd(1)], vec![genesis], vec![])
            .unwrap();
        let out = drive(&mut cores[0], actions);
        let b1 = broadcast_proposal(&out).block.hash();

        // Replica 2's identity, but signed with replica 3's key.
        let wrong_key = braid_types::test_utils::test_keypair(3);
        let cert = PartialCert::create(&wrong_key, ReplicaId(2), b1);
        let vote = VoteGossip::new(ReplicaId(2), b1, cert);
        let actions = cores[0].on_vote_received(ReplicaId(2), vote).unwrap();
        let _ = drive(&mut cores[0], actions);
        assert_eq!(cores[0].storage().find_blk(&b1).unwrap().voted.len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_deliver_twice_is_a_noop() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();
        let actions = cores[0]
            .on_propose(vec![test_cmd(1)], vec![genesis], vec![])
            .unwrap();
        let out = drive(&mut cores[0], actions);
        let b1 = broadcast_proposal(&out).block.hash();
        assert!(!cores[0].on_deliver_blk(b1).unwrap());
    }

    #[traced_test]
    #[test]
    fn test_update_requires_qc_ref() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();

        // Hand-deliver a block with no certificate.
        let block = Block::new(vec![genesis], vec![], None, vec![]);
        let mut core = cores.remove(0);
        let blk_hash = core.storage_mut().add_blk(block);
        core.on_deliver_blk(blk_hash).unwrap();
        assert_eq!(
            core.update(blk_hash),
            Err(ConsensusError::EmptyQcRef(blk_hash))
        );
    }

    #[traced_test]
    #[test]
    fn test_monotone_safety_variables() {
        let mut cores = setup(4, 1);
        let mut parent = cores[0].genesis_hash();
        let mut prev = Vec::new();
        for core in &cores {
            prev.push((core.vheight(), core.bexec_height(), core.hqc().height));
        }

        for i in 0..10u8 {
            let (proposal, _) = run_round(&mut cores, 0, vec![test_cmd(i)], parent);
            parent = proposal.block.hash();
            for (core, prev) in cores.iter().zip(prev.iter_mut()) {
                let now = (core.vheight(), core.bexec_height(), core.hqc().height);
                assert!(now.0 >= prev.0, "vheight must be monotone");
                assert!(now.1 >= prev.1, "bexec height must be monotone");
                assert!(now.2 >= prev.2, "hqc height must be monotone");
                *prev = now;
            }
        }
        // 10 rounds of a three-chain pipeline: commits trail by two.
        assert_eq!(cores[0].bexec_height(), 9);
    }

    #[traced_test]
    #[test]
    fn test_prune_releases_stale_blocks() {
        let mut cores = setup(4, 1);
        let mut parent = cores[0].genesis_hash();
        let genesis = parent;
        let mut chain = Vec::new();

        // 22 rounds: proposing B22 commits B20, so bexec lands at height 21.
        for i in 0..22u8 {
            let (proposal, _) = run_round(&mut cores, 0, vec![test_cmd(i)], parent);
            parent = proposal.block.hash();
            chain.push(parent);
        }
        assert_eq!(cores[0].bexec_height(), 21);

        cores[0].prune(5);

        let storage = cores[0].storage();
        // Blocks at height <= 16 (B15 and below, and genesis) are gone.
        assert!(!storage.is_blk_fetched(&genesis));
        for blk in &chain[..15] {
            assert!(!storage.is_blk_fetched(blk), "height <= 16 must be released");
        }
        // Blocks at heights 17..=23 remain.
        for blk in &chain[15..] {
            assert!(storage.is_blk_fetched(blk), "recent blocks must remain");
        }
        assert_eq!(storage.blk_count(), 7);

        // Committed state above the cut is intact and the chain still
        // extends: another round commits one more block.
        let (_, out) = run_round(&mut cores, 0, vec![test_cmd(42)], parent);
        assert_eq!(finalities(&out).len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_vote_before_block_arrives_is_buffered() {
        let mut cores = setup(4, 1);
        let genesis = cores[0].genesis_hash();
        let leader_id = cores[0].id();

        // Leader proposes B1; replica 1 votes.
        let actions = cores[0]
            .on_propose(vec![test_cmd(1)], vec![genesis], vec![])
            .unwrap();
        let out = drive(&mut cores[0], actions);
        let proposal = broadcast_proposal(&out);
        let b1 = proposal.block.hash();
        let actions = cores[1]
            .on_proposal_received(leader_id, proposal.clone())
            .unwrap();
        let out = drive(&mut cores[1], actions);
        let vote = sent_votes(&out)[0];

        // Replica 2 sees the vote before the proposal: it verifies the
        // vote, buffers it, and fetches the block from the voter.
        let actions = cores[2].on_vote_received(vote.voter, vote).unwrap();
        let out = drive(&mut cores[2], actions);
        assert!(out
            .iter()
            .any(|action| matches!(action, Action::FetchBlocks { .. })));
        assert_eq!(cores[2].storage().find_blk(&b1).map(|n| n.voted.len()), None);

        // The proposal arrives; the buffered vote is counted on delivery.
        let actions = cores[2]
            .on_proposal_received(leader_id, proposal)
            .unwrap();
        let _ = drive(&mut cores[2], actions);
        let node = cores[2].storage().find_blk(&b1).unwrap();
        assert!(node.delivered);
        // Buffered remote vote plus this replica's own state: the vote set
        // holds the buffered voter.
        assert!(node.voted.contains(&vote.voter));
    }
}
