//! Pacemaker boundary.
//!
//! The pacemaker is the liveness module: it names the current proposer and
//! supplies parent blocks for new proposals. The consensus core consumes it
//! through this trait; the implementations here cover a static leader and a
//! simple rotation, which is all the deterministic harness needs.

use braid_consensus::ConsensusState;
use braid_types::{Hash, ReplicaId};

/// Names proposers and selects proposal parents.
pub trait Pacemaker: Send {
    /// The replica currently expected to propose.
    fn get_proposer(&self, core: &ConsensusState) -> ReplicaId;

    /// Called when a batch is ready; returns the proposer that should build
    /// it. A batch whose proposer is no longer this replica is dropped.
    fn beat(&mut self, core: &ConsensusState) -> ReplicaId;

    /// Parent blocks for the next proposal; `[0]` becomes the primary
    /// parent.
    fn get_parents(&self, core: &ConsensusState) -> Vec<Hash> {
        vec![select_leaf(core)]
    }
}

/// The highest tail whose primary-parent chain passes through the hqc
/// block, falling back to the hqc block itself.
///
/// Ties on height break on the hash so every replica picks the same leaf.
fn select_leaf(core: &ConsensusState) -> Hash {
    let hqc = core.hqc();
    let mut best: Option<(u64, Hash)> = None;
    for &tail in core.tails() {
        let Some(height) = core.height_of(&tail) else {
            continue;
        };
        if !extends_hqc(core, tail, height) {
            continue;
        }
        let candidate = (height, tail);
        if best.is_none_or(|cur| candidate > cur) {
            best = Some(candidate);
        }
    }
    best.map(|(_, hash)| hash).unwrap_or(hqc.blk_hash)
}

fn extends_hqc(core: &ConsensusState, tail: Hash, height: u64) -> bool {
    let hqc = core.hqc();
    let mut cur = tail;
    let mut cur_height = height;
    while cur_height > hqc.height {
        match core
            .storage()
            .find_blk(&cur)
            .and_then(|node| node.parents.first().copied())
        {
            Some(parent) => {
                cur = parent;
                cur_height = core.height_of(&cur).unwrap_or(0);
            }
            None => return false,
        }
    }
    cur == hqc.blk_hash
}

/// A pacemaker with one designated proposer.
#[derive(Debug, Clone)]
pub struct FixedPacemaker {
    proposer: ReplicaId,
}

impl FixedPacemaker {
    /// Create a pacemaker that always names `proposer`.
    pub fn new(proposer: ReplicaId) -> Self {
        Self { proposer }
    }
}

impl Pacemaker for FixedPacemaker {
    fn get_proposer(&self, _core: &ConsensusState) -> ReplicaId {
        self.proposer
    }

    fn beat(&mut self, _core: &ConsensusState) -> ReplicaId {
        self.proposer
    }
}

/// Rotates the proposer with the height of the highest certified block.
#[derive(Debug, Clone)]
pub struct RoundRobinPacemaker {
    replicas: Vec<ReplicaId>,
}

impl RoundRobinPacemaker {
    /// Create a rotation over the given replicas.
    pub fn new(replicas: Vec<ReplicaId>) -> Self {
        Self { replicas }
    }

    fn proposer_for(&self, hqc_height: u64) -> ReplicaId {
        self.replicas[(hqc_height as usize) % self.replicas.len()]
    }
}

impl Pacemaker for RoundRobinPacemaker {
    fn get_proposer(&self, core: &ConsensusState) -> ReplicaId {
        self.proposer_for(core.hqc().height)
    }

    fn beat(&mut self, core: &ConsensusState) -> ReplicaId {
        self.proposer_for(core.hqc().height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_consensus::CoreConfig;
    use braid_messages::{ProposalGossip, VoteGossip};
    use braid_types::test_utils::{test_cmd, test_config};
    use braid_types::{Block, KeyPair, PartialCert};

    fn make_core() -> (ConsensusState, Vec<KeyPair>) {
        let (config, keys) = test_config(4);
        let mut core = ConsensusState::new(
            ReplicaId(0),
            keys[0].clone(),
            config,
            CoreConfig::default(),
        );
        core.on_init(1);
        (core, keys)
    }

    fn extend_chain(core: &mut ConsensusState, parent: Hash, seed: u8) -> Hash {
        core.on_propose(vec![test_cmd(seed)], vec![parent], vec![])
            .unwrap();
        *core.tails().iter().next().unwrap()
    }

    #[test]
    fn test_fixed_pacemaker_names_one_proposer() {
        let (core, _) = make_core();
        let mut pacemaker = FixedPacemaker::new(ReplicaId(2));
        assert_eq!(pacemaker.get_proposer(&core), ReplicaId(2));
        assert_eq!(pacemaker.beat(&core), ReplicaId(2));
    }

    #[test]
    fn test_round_robin_rotates_with_certified_height() {
        let pacemaker = RoundRobinPacemaker::new((0..4).map(ReplicaId).collect());
        assert_eq!(pacemaker.proposer_for(1), ReplicaId(1));
        assert_eq!(pacemaker.proposer_for(2), ReplicaId(2));
        assert_eq!(pacemaker.proposer_for(4), ReplicaId(0));
        assert_eq!(pacemaker.proposer_for(5), ReplicaId(1));
    }

    #[test]
    fn test_round_robin_reads_hqc_from_core() {
        let (core, _) = make_core();
        let mut pacemaker = RoundRobinPacemaker::new((0..4).map(ReplicaId).collect());
        // Fresh core: hqc is genesis at height 1.
        assert_eq!(pacemaker.get_proposer(&core), ReplicaId(1));
        assert_eq!(pacemaker.beat(&core), ReplicaId(1));
    }

    #[test]
    fn test_select_leaf_picks_highest_chain_tail() {
        let (mut core, _) = make_core();
        let genesis = core.genesis_hash();
        let b1 = extend_chain(&mut core, genesis, 1);
        let b2 = extend_chain(&mut core, b1, 2);

        let pacemaker = FixedPacemaker::new(ReplicaId(0));
        assert_eq!(pacemaker.get_parents(&core), vec![b2]);
    }

    #[test]
    fn test_select_leaf_ignores_off_branch_tails() {
        let (mut core, keys) = make_core();
        let genesis = core.genesis_hash();
        let b1 = extend_chain(&mut core, genesis, 1);
        let b2 = extend_chain(&mut core, b1, 2);

        // Votes from replicas 1 and 2 complete the quorum on b2 (the
        // self-vote was the first); hqc anchors there.
        for i in 1..3u16 {
            let cert = PartialCert::create(&keys[i as usize], ReplicaId(i), b2);
            core.on_vote_verified(VoteGossip::new(ReplicaId(i), b2, cert), true);
        }
        assert_eq!(core.hqc().blk_hash, b2);

        // A fork at the same height delivers and becomes a second tail,
        // but does not pass through the hqc block.
        let fork = Block::new(vec![b1], vec![test_cmd(9)], None, vec![]);
        let fork_hash = fork.hash();
        core.on_proposal_received(ReplicaId(3), ProposalGossip::new(ReplicaId(3), fork))
            .unwrap();
        core.on_block_verified(fork_hash, true).unwrap();
        assert!(core.tails().contains(&fork_hash));
        assert!(core.tails().contains(&b2));

        let pacemaker = FixedPacemaker::new(ReplicaId(0));
        assert_eq!(pacemaker.get_parents(&core), vec![b2]);
    }
}
