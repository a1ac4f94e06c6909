//! Deterministic simulation runner.
//!
//! Processes events in deterministic order and executes actions inline.
//! Given the same seed, a run produces identical results. Delegated
//! verification happens synchronously (the real crypto, no thread pool),
//! and the network model decides delivery times and drops.

use crate::event_queue::EventKey;
use crate::network::{NetworkConfig, SimulatedNetwork};
use braid_consensus::{ConsensusState, CoreConfig};
use braid_core::{Action, Event, OutboundMessage, StateMachine, TimerId};
use braid_mempool::{CommandPool, MempoolConfig};
use braid_node::{FixedPacemaker, NodeStateMachine};
use braid_types::{ConsensusConfig, Finality, Hash, KeyPair, ReplicaId};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, trace};

/// Index type for simulation-only node routing.
pub type NodeIndex = u32;

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Total actions generated.
    pub actions_generated: u64,
    /// Messages scheduled for delivery.
    pub messages_sent: u64,
    /// Messages dropped by the network model.
    pub messages_dropped: u64,
    /// Timers set.
    pub timers_set: u64,
    /// Timers cancelled.
    pub timers_cancelled: u64,
}

/// Deterministic multi-replica simulation.
///
/// All replicas run in one thread against simulated time. The runner
/// checks the protocol's universal invariants after every event:
/// per-replica monotone `vheight`, `bexec` height and `hqc` height, and
/// cross-replica commit-prefix agreement.
pub struct SimulationRunner {
    /// All replicas, indexed by NodeIndex.
    nodes: Vec<NodeStateMachine>,

    /// Global event queue, ordered deterministically.
    queue: BTreeMap<EventKey, (NodeIndex, Event)>,

    /// Sequence counter for deterministic ordering.
    seq: u64,

    /// Current simulation time.
    now: Duration,

    /// Network model.
    network: SimulatedNetwork,

    /// RNG for network conditions (seeded for determinism).
    rng: ChaCha8Rng,

    /// Timer registry for cancellation support.
    timers: HashMap<(NodeIndex, TimerId), EventKey>,

    /// Shared replica table, used for inline verification.
    table: ConsensusConfig,

    /// Per-replica committed command log, in decision order.
    decided: Vec<Vec<Finality>>,

    /// Last observed (vheight, bexec height, hqc height) per replica.
    prev: Vec<(u64, u64, u64)>,

    /// Statistics.
    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create a simulation with deterministically seeded replica keys.
    ///
    /// Replica 0 is the fixed proposer; `nfaulty` derives from the group
    /// size as `(n - 1) / 2`.
    pub fn new(config: NetworkConfig, seed: u64) -> Self {
        let n = config.num_replicas;
        let rng = ChaCha8Rng::seed_from_u64(seed);

        let keys: Vec<KeyPair> = (0..n)
            .map(|i| {
                let mut seed_bytes = [0u8; 32];
                let key_seed = seed.wrapping_add(i as u64).wrapping_mul(0x517cc1b727220a95);
                seed_bytes[..8].copy_from_slice(&key_seed.to_le_bytes());
                seed_bytes[8..16].copy_from_slice(&(i as u64).to_le_bytes());
                KeyPair::from_seed(&seed_bytes)
            })
            .collect();

        let mut table = ConsensusConfig::new();
        for (i, key) in keys.iter().enumerate() {
            table.add_replica(ReplicaId(i as u16), key.public_key());
        }
        let nfaulty = (n - 1) / 2;
        table.set_nmajority(2 * nfaulty + 1);

        let mut nodes: Vec<NodeStateMachine> = keys
            .into_iter()
            .enumerate()
            .map(|(i, keypair)| {
                let mut core = ConsensusState::new(
                    ReplicaId(i as u16),
                    keypair,
                    table.clone(),
                    CoreConfig::default(),
                );
                core.on_init(nfaulty);
                NodeStateMachine::new(
                    core,
                    CommandPool::new(MempoolConfig {
                        blk_size: config.blk_size,
                    }),
                    Box::new(FixedPacemaker::new(ReplicaId(0))),
                )
            })
            .collect();

        let initial: Vec<(NodeIndex, Vec<Action>)> = nodes
            .iter_mut()
            .enumerate()
            .map(|(i, node)| (i as NodeIndex, node.initialize()))
            .collect();

        let mut runner = Self {
            nodes,
            queue: BTreeMap::new(),
            seq: 0,
            now: Duration::ZERO,
            network: SimulatedNetwork::new(config),
            rng,
            timers: HashMap::new(),
            table,
            decided: vec![Vec::new(); n],
            prev: vec![(0, 1, 1); n],
            stats: SimulationStats::default(),
        };
        for (node_index, actions) in initial {
            runner.execute_actions(node_index, actions);
        }
        runner
    }

    /// Get a replica's state machine.
    pub fn node(&self, index: NodeIndex) -> Option<&NodeStateMachine> {
        self.nodes.get(index as usize)
    }

    /// A replica's committed command log so far.
    pub fn decided(&self, index: NodeIndex) -> &[Finality] {
        &self.decided[index as usize]
    }

    /// Simulation statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Submit a client command to a replica at the current time.
    pub fn submit_command(&mut self, node: NodeIndex, cmd_hash: Hash) {
        let event = Event::CommandSubmitted { cmd_hash };
        self.schedule(node, self.now, event);
    }

    /// Advance the simulation until `deadline`.
    pub fn run_until(&mut self, deadline: Duration) {
        while let Some((&key, _)) = self.queue.first_key_value() {
            if key.time > deadline {
                break;
            }
            let Some((key, (node_index, event))) = self.queue.pop_first() else {
                break;
            };
            self.now = key.time;
            if let Some((node_index, timer_id)) = timer_id_of(node_index, &event) {
                self.timers.remove(&(node_index, timer_id));
            }
            self.process(node_index, event);
        }
        self.now = deadline;
    }

    fn process(&mut self, node_index: NodeIndex, event: Event) {
        trace!(node = node_index, event = event.type_name(), "sim event");
        self.stats.events_processed += 1;
        let actions = self.nodes[node_index as usize].handle(event);
        self.execute_actions(node_index, actions);
        self.check_monotone(node_index);
    }

    fn execute_actions(&mut self, node_index: NodeIndex, actions: Vec<Action>) {
        for action in actions {
            self.stats.actions_generated += 1;
            match action {
                Action::Broadcast { message } => {
                    let targets: Vec<NodeIndex> = (0..self.decided.len() as NodeIndex)
                        .filter(|&peer| peer != node_index)
                        .collect();
                    for peer in targets {
                        self.schedule_message(node_index, peer, &message);
                    }
                }
                Action::SendTo { peer, message } => {
                    self.schedule_message(node_index, peer.0 as NodeIndex, &message);
                }
                Action::FetchBlocks { peer, blk_hashes } => {
                    let request = Event::BlockRequestReceived {
                        peer: ReplicaId(node_index as u16),
                        blk_hashes,
                    };
                    self.schedule_with_network(peer.0 as NodeIndex, request);
                }
                Action::SetTimer { id, duration } => {
                    self.stats.timers_set += 1;
                    self.cancel_timer(node_index, id);
                    let key = self.schedule(node_index, self.now + duration, timer_event(id));
                    self.timers.insert((node_index, id), key);
                }
                Action::CancelTimer { id } => {
                    self.stats.timers_cancelled += 1;
                    self.cancel_timer(node_index, id);
                }
                Action::EnqueueInternal { event } => {
                    self.schedule(node_index, self.now, event);
                }
                Action::VerifyBlock { blk_hash, block } => {
                    // Verification is instant in simulation.
                    let valid = block.verify(&self.table);
                    let event = Event::BlockVerified { blk_hash, valid };
                    self.schedule(node_index, self.now, event);
                }
                Action::VerifyVote { vote, public_key } => {
                    let valid = vote.cert.verify(&public_key);
                    let event = Event::VoteVerified { vote, valid };
                    self.schedule(node_index, self.now, event);
                }
                Action::EmitFinality { finality } => {
                    self.record_decision(node_index, finality);
                }
                Action::Fatal { reason } => {
                    panic!("replica {node_index} hit a fatal consensus error: {reason}");
                }
            }
        }
    }

    fn schedule_message(&mut self, from: NodeIndex, to: NodeIndex, message: &OutboundMessage) {
        let event = match message {
            OutboundMessage::Proposal(proposal) => Event::ProposalReceived {
                peer: ReplicaId(from as u16),
                proposal: proposal.clone(),
            },
            OutboundMessage::Vote(vote) => Event::VoteReceived {
                peer: ReplicaId(from as u16),
                vote: *vote,
            },
            OutboundMessage::BlocksRequest(request) => Event::BlockRequestReceived {
                peer: ReplicaId(from as u16),
                blk_hashes: request.blk_hashes.clone(),
            },
            OutboundMessage::BlocksResponse(response) => Event::BlocksReceived {
                peer: ReplicaId(from as u16),
                blocks: response.blocks.clone(),
            },
        };
        self.schedule_with_network(to, event);
    }

    fn schedule_with_network(&mut self, to: NodeIndex, event: Event) {
        match self.network.delay(&mut self.rng) {
            Some(delay) => {
                self.stats.messages_sent += 1;
                self.schedule(to, self.now + delay, event);
            }
            None => {
                self.stats.messages_dropped += 1;
                trace!(to, event = event.type_name(), "message dropped");
            }
        }
    }

    fn schedule(&mut self, node: NodeIndex, time: Duration, event: Event) -> EventKey {
        let key = EventKey {
            time,
            priority: event.priority(),
            seq: self.seq,
        };
        self.seq += 1;
        self.queue.insert(key, (node, event));
        key
    }

    fn cancel_timer(&mut self, node: NodeIndex, id: TimerId) {
        if let Some(key) = self.timers.remove(&(node, id)) {
            self.queue.remove(&key);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Invariant Checking
    // ═══════════════════════════════════════════════════════════════════════

    /// Safety variables never move backwards.
    fn check_monotone(&mut self, node_index: NodeIndex) {
        let core = self.nodes[node_index as usize].consensus();
        let now = (core.vheight(), core.bexec_height(), core.hqc().height);
        let prev = &mut self.prev[node_index as usize];
        assert!(
            now.0 >= prev.0,
            "replica {node_index}: vheight moved backwards ({} -> {})",
            prev.0,
            now.0
        );
        assert!(
            now.1 >= prev.1,
            "replica {node_index}: bexec height moved backwards ({} -> {})",
            prev.1,
            now.1
        );
        assert!(
            now.2 >= prev.2,
            "replica {node_index}: hqc height moved backwards ({} -> {})",
            prev.2,
            now.2
        );
        *prev = now;
    }

    /// Any two replicas agree on every decided log position they share.
    fn record_decision(&mut self, node_index: NodeIndex, finality: Finality) {
        let position = self.decided[node_index as usize].len();
        for (other, log) in self.decided.iter().enumerate() {
            if other == node_index as usize || log.len() <= position {
                continue;
            }
            let reference = &log[position];
            assert_eq!(
                (reference.cmd_hash, reference.blk_hash, reference.cmd_height),
                (finality.cmd_hash, finality.blk_hash, finality.cmd_height),
                "replicas {other} and {node_index} disagree at log position {position}"
            );
        }
        debug!(
            node = node_index,
            position,
            cmd_hash = ?finality.cmd_hash,
            height = finality.cmd_height,
            "command decided"
        );
        self.decided[node_index as usize].push(finality);
    }
}

fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::Cleanup => Event::CleanupTimer,
    }
}

/// If this event is a timer firing, the timer registry key to clear.
fn timer_id_of(node: NodeIndex, event: &Event) -> Option<(NodeIndex, TimerId)> {
    match event {
        Event::CleanupTimer => Some((node, TimerId::Cleanup)),
        _ => None,
    }
}
