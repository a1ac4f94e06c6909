//! Node state machine.

use crate::Pacemaker;
use braid_consensus::{ConsensusError, ConsensusState};
use braid_core::{Action, Event, StateMachine};
use braid_mempool::CommandPool;
use tracing::{debug, error, warn};

/// Combined replica state machine.
///
/// Composes the consensus core and the command pool, routing events to the
/// right sub-machine and mapping consensus errors onto the action stream:
/// fatal errors become [`Action::Fatal`], everything else is logged and
/// dropped.
pub struct NodeStateMachine {
    /// Safety core, block DAG, and delivery pipeline.
    consensus: ConsensusState,

    /// Leader-side command batching.
    mempool: CommandPool,

    /// Proposer election and parent selection.
    pacemaker: Box<dyn Pacemaker>,
}

impl std::fmt::Debug for NodeStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStateMachine")
            .field("consensus", &self.consensus)
            .field("mempool", &self.mempool)
            .finish()
    }
}

impl NodeStateMachine {
    /// Create a node state machine from its parts.
    pub fn new(
        consensus: ConsensusState,
        mempool: CommandPool,
        pacemaker: Box<dyn Pacemaker>,
    ) -> Self {
        Self {
            consensus,
            mempool,
            pacemaker,
        }
    }

    /// Kick off periodic work. Returns the initial timer actions.
    pub fn initialize(&mut self) -> Vec<Action> {
        self.consensus.on_cleanup()
    }

    /// Get a reference to the consensus core.
    pub fn consensus(&self) -> &ConsensusState {
        &self.consensus
    }

    /// Get a mutable reference to the consensus core.
    pub fn consensus_mut(&mut self) -> &mut ConsensusState {
        &mut self.consensus
    }

    /// Get a reference to the command pool.
    pub fn mempool(&self) -> &CommandPool {
        &self.mempool
    }

    fn check(&self, result: Result<Vec<Action>, ConsensusError>) -> Vec<Action> {
        match result {
            Ok(actions) => actions,
            Err(e) if e.is_fatal() => {
                error!(replica = %self.consensus.id(), error = %e, "fatal consensus error");
                vec![Action::Fatal {
                    reason: e.to_string(),
                }]
            }
            Err(e) => {
                warn!(replica = %self.consensus.id(), error = %e, "dropping event");
                vec![]
            }
        }
    }
}

impl StateMachine for NodeStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        match event {
            // Client path: buffer while proposer, batch at blk_size.
            Event::CommandSubmitted { cmd_hash } => {
                let is_proposer =
                    self.pacemaker.get_proposer(&self.consensus) == self.consensus.id();
                self.mempool.on_command_submitted(cmd_hash, is_proposer)
            }
            Event::BatchReady { cmds } => {
                let proposer = self.pacemaker.beat(&self.consensus);
                if proposer != self.consensus.id() {
                    debug!(
                        replica = %self.consensus.id(),
                        %proposer,
                        "no longer the proposer; dropping batch"
                    );
                    return vec![];
                }
                let parents = self.pacemaker.get_parents(&self.consensus);
                let result = self.consensus.on_propose(cmds, parents, vec![]);
                self.check(result)
            }

            // Protocol messages.
            Event::ProposalReceived { peer, proposal } => {
                let result = self.consensus.on_proposal_received(peer, proposal);
                self.check(result)
            }
            Event::VoteReceived { peer, vote } => {
                let result = self.consensus.on_vote_received(peer, vote);
                self.check(result)
            }
            Event::BlocksReceived { peer, blocks } => {
                let result = self.consensus.on_blocks_received(peer, blocks);
                self.check(result)
            }
            Event::BlockRequestReceived { peer, blk_hashes } => {
                self.consensus.on_block_request(peer, blk_hashes)
            }

            // Delegated-work completions.
            Event::BlockVerified { blk_hash, valid } => {
                let result = self.consensus.on_block_verified(blk_hash, valid);
                self.check(result)
            }
            Event::VoteVerified { vote, valid } => self.consensus.on_vote_verified(vote, valid),

            // Timers.
            Event::CleanupTimer => self.consensus.on_cleanup(),

            // Observability events are consumed by the runner (waiter
            // registry, metrics); nothing to do in the state machine.
            Event::QuorumFormed { .. }
            | Event::HighQcUpdated { .. }
            | Event::BlockDelivered { .. }
            | Event::ProposalEmitted { .. }
            | Event::ProposalProcessed { .. } => vec![],
        }
    }
}
