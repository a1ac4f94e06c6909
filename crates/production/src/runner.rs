//! Production event loop.
//!
//! Owns the node state machine and everything it delegates to: the runner
//! receives events from the network pump, timers, the verification pool,
//! and clients; hands them to the state machine one at a time; and executes
//! the returned actions. Internal events are drained before the next
//! external event so causality is preserved.

use crate::fetch::{FetchConfig, FetchManager};
use crate::metrics::metrics;
use crate::timers::TimerManager;
use crate::transport::{spawn_inbound_pump, Transport};
use crate::verify::{VerifyPool, VerifyPoolError};
use crate::waiters::Waiters;
use braid_core::{Action, Event, StateMachine};
use braid_node::NodeStateMachine;
use braid_types::{ConsensusConfig, Finality, Hash, ReplicaId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, trace};

/// How often the fetch manager checks for timed-out requests.
const FETCH_TICK: Duration = Duration::from_millis(50);

/// Client and observer handle onto a running replica.
///
/// Cheap to clone; all methods are safe to call from any task.
#[derive(Clone)]
pub struct ConsensusService {
    event_tx: mpsc::Sender<Event>,
    waiters: Arc<Mutex<Waiters>>,
}

impl ConsensusService {
    /// Submit a command for replication.
    ///
    /// `callback` fires with the command's [`Finality`] when it commits on
    /// this replica. If the command never commits, the callback never
    /// fires; clients time out on their own.
    pub async fn exec_command(
        &self,
        cmd_hash: Hash,
        callback: impl FnOnce(Finality) + Send + 'static,
    ) {
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.register_decision(cmd_hash, Box::new(callback));
        }
        let _ = self.event_tx.send(Event::CommandSubmitted { cmd_hash }).await;
    }

    /// Resolves when a QC for `blk_hash` is formed or next observed.
    pub fn async_qc_finish(&self, blk_hash: Hash) -> tokio::sync::oneshot::Receiver<Hash> {
        self.with_waiters(|w| w.async_qc_finish(blk_hash))
    }

    /// Resolves when `blk_hash` completes delivery on this replica.
    pub fn async_blk_delivery(&self, blk_hash: Hash) -> tokio::sync::oneshot::Receiver<Hash> {
        self.with_waiters(|w| w.async_blk_delivery(blk_hash))
    }

    /// Resolves with the next proposal this replica broadcasts.
    pub fn async_wait_proposal(
        &self,
    ) -> tokio::sync::oneshot::Receiver<braid_messages::ProposalGossip> {
        self.with_waiters(|w| w.async_wait_proposal())
    }

    /// Resolves with the next remote proposal processed by this replica.
    pub fn async_wait_receive_proposal(
        &self,
    ) -> tokio::sync::oneshot::Receiver<braid_messages::ProposalGossip> {
        self.with_waiters(|w| w.async_wait_receive_proposal())
    }

    /// Resolves the next time this replica's hqc advances.
    pub fn async_hqc_update(&self) -> tokio::sync::oneshot::Receiver<Hash> {
        self.with_waiters(|w| w.async_hqc_update())
    }

    fn with_waiters<T>(&self, f: impl FnOnce(&mut Waiters) -> T) -> T {
        let mut waiters = self
            .waiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut waiters)
    }
}

/// Hosts one replica's state machine on the tokio runtime.
pub struct ProductionRunner {
    local_id: ReplicaId,
    node: NodeStateMachine,
    event_rx: mpsc::Receiver<Event>,
    transport: Arc<dyn Transport>,
    verify_pool: VerifyPool,
    fetch: FetchManager,
    timers: TimerManager,
    waiters: Arc<Mutex<Waiters>>,
    /// First time each not-yet-delivered block was seen, for the delivery
    /// latency histogram.
    delivery_started: HashMap<Hash, Instant>,
}

impl ProductionRunner {
    /// Wire up a replica: state machine, transport, verification pool,
    /// fetch manager, timers, waiters.
    ///
    /// `inbox` is the stream of raw frames from the transport;
    /// `verify_threads` sizes the crypto pool.
    pub fn new(
        node: NodeStateMachine,
        config: Arc<ConsensusConfig>,
        transport: Arc<dyn Transport>,
        inbox: mpsc::UnboundedReceiver<(ReplicaId, Vec<u8>)>,
        fetch_config: FetchConfig,
        verify_threads: usize,
    ) -> Result<(Self, ConsensusService), VerifyPoolError> {
        let local_id = node.consensus().id();
        let (event_tx, event_rx) = mpsc::channel(1024);

        let _pump = spawn_inbound_pump(inbox, event_tx.clone());
        let verify_pool = VerifyPool::new(verify_threads, config.clone(), event_tx.clone())?;
        let peers: Vec<ReplicaId> = config
            .replica_ids()
            .filter(|replica| *replica != local_id)
            .collect();
        let fetch = FetchManager::new(fetch_config, peers, transport.clone());
        let timers = TimerManager::new(event_tx.clone());
        let waiters = Arc::new(Mutex::new(Waiters::new()));

        let service = ConsensusService {
            event_tx,
            waiters: waiters.clone(),
        };
        let runner = Self {
            local_id,
            node,
            event_rx,
            transport,
            verify_pool,
            fetch,
            timers,
            waiters,
            delivery_started: HashMap::new(),
        };
        Ok((runner, service))
    }

    /// Run the event loop until the event channel closes.
    pub async fn run(mut self) {
        info!(replica = %self.local_id, "replica runner started");
        let initial = self.node.initialize();
        self.execute(initial);

        let mut fetch_tick = tokio::time::interval(FETCH_TICK);
        fetch_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                maybe_event = self.event_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.dispatch(event),
                        None => break,
                    }
                }
                _ = fetch_tick.tick() => {
                    self.fetch.tick();
                }
            }
        }
        info!(replica = %self.local_id, "replica runner stopped");
    }

    /// Process one event and everything it causes, internal events first.
    fn dispatch(&mut self, event: Event) {
        let mut events: VecDeque<Event> = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            trace!(replica = %self.local_id, event = event.type_name(), "dispatch");
            self.observe(&event);
            let actions = self.node.handle(event);
            for action in actions {
                if let Action::EnqueueInternal { event } = action {
                    events.push_back(event);
                } else {
                    self.execute_one(action);
                }
            }
        }
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            if let Action::EnqueueInternal { event } = action {
                self.dispatch(event);
            } else {
                self.execute_one(action);
            }
        }
    }

    /// Resolve waiters and update metrics from events flowing through.
    fn observe(&mut self, event: &Event) {
        if let Event::ProposalReceived { proposal, .. } = event {
            let blk_hash = proposal.block.hash();
            if !self.node.consensus().storage().is_blk_delivered(&blk_hash) {
                self.delivery_started.entry(blk_hash).or_insert_with(Instant::now);
            }
        }
        let Ok(mut waiters) = self.waiters.lock() else {
            return;
        };
        match event {
            Event::QuorumFormed { blk_hash } => {
                metrics().quorums_formed.inc();
                waiters.on_qc_finish(*blk_hash);
            }
            Event::BlockDelivered { blk_hash } => {
                metrics().blocks_delivered.inc();
                if let Some(started) = self.delivery_started.remove(blk_hash) {
                    metrics()
                        .delivery_latency
                        .observe(started.elapsed().as_secs_f64());
                }
                waiters.on_blk_delivered(*blk_hash);
            }
            Event::HighQcUpdated { blk_hash, .. } => waiters.on_hqc_update(*blk_hash),
            Event::ProposalEmitted { proposal } => waiters.on_propose(proposal),
            Event::ProposalProcessed { proposal } => waiters.on_receive_proposal(proposal),
            Event::BlocksReceived { peer, blocks } => {
                self.fetch.on_blocks_received(*peer, blocks);
            }
            _ => {}
        }
    }

    fn execute_one(&mut self, action: Action) {
        match action {
            Action::Broadcast { message } => {
                metrics().messages_sent.inc();
                self.transport.broadcast(&message);
            }
            Action::SendTo { peer, message } => {
                metrics().messages_sent.inc();
                self.transport.send(peer, &message);
            }
            Action::FetchBlocks { peer, blk_hashes } => {
                self.fetch.request(peer, blk_hashes);
            }
            Action::SetTimer { id, duration } => self.timers.set_timer(id, duration),
            Action::CancelTimer { id } => self.timers.cancel_timer(id),
            Action::VerifyBlock { blk_hash, block } => {
                self.verify_pool.spawn_block_verify(blk_hash, block);
            }
            Action::VerifyVote { vote, public_key } => {
                self.verify_pool.spawn_vote_verify(vote, public_key);
            }
            Action::EmitFinality { finality } => {
                metrics().commands_decided.inc();
                metrics()
                    .bexec_height
                    .set(self.node.consensus().bexec_height() as i64);
                if let Ok(mut waiters) = self.waiters.lock() {
                    waiters.on_decide(finality);
                }
            }
            Action::Fatal { reason } => {
                error!(replica = %self.local_id, reason, "fatal consensus error; aborting");
                std::process::abort();
            }
            Action::EnqueueInternal { .. } => unreachable!("handled by the dispatch loop"),
        }
    }
}
