//! Fetch manager for retrieving missing blocks from peers.
//!
//! The fetch manager handles all aspects of block fetching:
//! - Peer selection with fallback (the peer that caused the fetch first,
//!   then other replicas by reputation)
//! - Request coalescing so concurrent interest in one hash produces one
//!   outstanding request
//! - Automatic retries with exponential backoff
//! - Peer reputation tracking for reliability
//!
//! # Architecture
//!
//! When the core needs an ancestor it emits `Action::FetchBlocks`. The
//! manager sends a `GetBlocksRequest` to the chosen peer and watches the
//! inbound `BlocksReceived` events for the answers. `tick()` is called
//! periodically by the runner to retry timed-out requests on other peers.

use crate::metrics::metrics;
use crate::transport::Transport;
use braid_core::OutboundMessage;
use braid_messages::GetBlocksRequest;
use braid_types::{Block, Hash, ReplicaId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

// ═══════════════════════════════════════════════════════════════════════════
// Fetch Configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Configuration for the fetch manager.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Initial timeout before a request is retried elsewhere.
    pub initial_timeout: Duration,

    /// Maximum per-request timeout (after exponential backoff).
    pub max_timeout: Duration,

    /// Maximum retries before giving up on a hash.
    pub max_retries: u32,

    /// Cooldown period before retrying a failed peer.
    pub peer_cooldown: Duration,

    /// Maximum number of hashes to put in a single request.
    pub max_hashes_per_request: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_millis(500),
            max_timeout: Duration::from_secs(5),
            max_retries: 3,
            peer_cooldown: Duration::from_secs(10),
            max_hashes_per_request: 100,
        }
    }
}

impl FetchConfig {
    /// Config optimized for low-latency local networks.
    pub fn for_local() -> Self {
        Self {
            initial_timeout: Duration::from_millis(100),
            max_timeout: Duration::from_secs(1),
            peer_cooldown: Duration::from_secs(2),
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Peer Reputation
// ═══════════════════════════════════════════════════════════════════════════

/// Peer reputation for fetch operations.
#[derive(Debug, Clone, Default)]
struct FetchPeerReputation {
    /// Number of successful fetch responses.
    successes: u32,
    /// Number of failed fetch attempts.
    failures: u32,
    /// Time of last failure (for cooldown calculation).
    last_failure: Option<Instant>,
}

impl FetchPeerReputation {
    fn is_in_cooldown(&self, cooldown: Duration) -> bool {
        self.last_failure
            .map(|t| t.elapsed() < cooldown)
            .unwrap_or(false)
    }

    /// Score for peer selection (higher is better).
    fn score(&self) -> i32 {
        self.successes as i32 * 10 - self.failures as i32 * 5
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Fetch Context
// ═══════════════════════════════════════════════════════════════════════════

/// In-flight fetch for one block hash.
///
/// Coalesces every caller interested in the hash onto a single outstanding
/// request; knows which peer to ask first and which to rotate to.
#[derive(Debug)]
struct BlockFetchContext {
    /// The peer the fetch was first attributed to (asked first).
    preferred: ReplicaId,
    /// Peers already asked.
    tried: HashSet<ReplicaId>,
    /// The currently outstanding request, if any.
    in_flight: Option<(ReplicaId, Instant)>,
    /// Retry count so far.
    retries: u32,
    /// When the fetch was first requested (for latency metrics).
    started: Instant,
}

/// Fetch status for external inspection.
#[derive(Debug, Clone)]
pub struct FetchStatus {
    /// Hashes with an active fetch.
    pub pending_blocks: usize,
    /// Outstanding requests.
    pub in_flight_requests: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// FetchManager Implementation
// ═══════════════════════════════════════════════════════════════════════════

/// Manages fetching of blocks from peers.
pub struct FetchManager {
    config: FetchConfig,
    /// All other replicas, for fallback selection.
    peers: Vec<ReplicaId>,
    /// Transport for sending requests.
    transport: Arc<dyn Transport>,
    /// Active fetches by block hash.
    contexts: HashMap<Hash, BlockFetchContext>,
    /// Peer reputations.
    reputations: HashMap<ReplicaId, FetchPeerReputation>,
}

impl FetchManager {
    /// Create a new fetch manager.
    pub fn new(config: FetchConfig, peers: Vec<ReplicaId>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            peers,
            transport,
            contexts: HashMap::new(),
            reputations: HashMap::new(),
        }
    }

    /// Current status for inspection.
    pub fn status(&self) -> FetchStatus {
        FetchStatus {
            pending_blocks: self.contexts.len(),
            in_flight_requests: self
                .contexts
                .values()
                .filter(|ctx| ctx.in_flight.is_some())
                .count(),
        }
    }

    /// Start (or join) fetches for the given hashes, asking `peer` first.
    ///
    /// Called when the core emits `Action::FetchBlocks`. Hashes already
    /// being fetched are coalesced onto the existing request.
    pub fn request(&mut self, peer: ReplicaId, blk_hashes: Vec<Hash>) {
        let mut fresh: Vec<Hash> = Vec::new();
        for blk_hash in blk_hashes {
            if self.contexts.contains_key(&blk_hash) {
                trace!(?blk_hash, "fetch already in flight; coalescing");
                continue;
            }
            self.contexts.insert(
                blk_hash,
                BlockFetchContext {
                    preferred: peer,
                    tried: HashSet::new(),
                    in_flight: None,
                    retries: 0,
                    started: Instant::now(),
                },
            );
            metrics().fetch_started.inc();
            fresh.push(blk_hash);
        }
        if fresh.is_empty() {
            return;
        }
        info!(%peer, count = fresh.len(), "starting block fetch");
        self.dispatch(peer, fresh);
    }

    /// Note blocks that arrived (from any response or gossip).
    pub fn on_blocks_received(&mut self, from: ReplicaId, blocks: &[Block]) {
        for block in blocks {
            let blk_hash = block.hash();
            let Some(ctx) = self.contexts.remove(&blk_hash) else {
                continue;
            };
            let elapsed = ctx.started.elapsed();
            metrics().fetch_completed.inc();
            metrics().fetch_latency.observe(elapsed.as_secs_f64());
            debug!(?blk_hash, %from, ?elapsed, "block fetch complete");
            self.reputations.entry(from).or_default().successes += 1;
        }
    }

    /// Retry timed-out requests; called periodically by the runner.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let mut expired: Vec<Hash> = Vec::new();
        for (blk_hash, ctx) in &self.contexts {
            if let Some((_, sent_at)) = ctx.in_flight {
                if now.duration_since(sent_at) > self.timeout_for(ctx.retries) {
                    expired.push(*blk_hash);
                }
            }
        }
        for blk_hash in expired {
            self.retry(blk_hash);
        }
    }

    fn timeout_for(&self, retries: u32) -> Duration {
        let backoff = self.config.initial_timeout * 2u32.saturating_pow(retries);
        backoff.min(self.config.max_timeout)
    }

    fn retry(&mut self, blk_hash: Hash) {
        let give_up = {
            let Some(ctx) = self.contexts.get_mut(&blk_hash) else {
                return;
            };
            if let Some((peer, _)) = ctx.in_flight.take() {
                let rep = self.reputations.entry(peer).or_default();
                rep.failures += 1;
                rep.last_failure = Some(Instant::now());
            }
            ctx.retries += 1;
            ctx.retries > self.config.max_retries
        };
        if give_up {
            warn!(?blk_hash, "giving up on fetch after max retries");
            self.contexts.remove(&blk_hash);
            metrics().fetch_abandoned.inc();
            return;
        }
        metrics().fetch_retries.inc();
        let Some(peer) = self.select_peer(&blk_hash) else {
            // No peer outside cooldown; leave the context for the next tick.
            trace!(?blk_hash, "no peer available for retry");
            return;
        };
        warn!(?blk_hash, %peer, "retrying fetch on another peer");
        self.dispatch(peer, vec![blk_hash]);
    }

    /// Select a peer for a fetch: preferred first, then the rest by
    /// reputation, skipping peers in cooldown or already tried.
    fn select_peer(&self, blk_hash: &Hash) -> Option<ReplicaId> {
        let ctx = self.contexts.get(blk_hash)?;
        let usable = |peer: &ReplicaId| {
            !ctx.tried.contains(peer)
                && !self
                    .reputations
                    .get(peer)
                    .is_some_and(|rep| rep.is_in_cooldown(self.config.peer_cooldown))
        };
        if usable(&ctx.preferred) {
            return Some(ctx.preferred);
        }
        let mut candidates: Vec<(i32, ReplicaId)> = self
            .peers
            .iter()
            .filter(|peer| usable(peer))
            .map(|&peer| {
                let score = self
                    .reputations
                    .get(&peer)
                    .map(|rep| rep.score())
                    .unwrap_or(0);
                (score, peer)
            })
            .collect();
        candidates.sort_by(|a, b| b.cmp(a));
        candidates.first().map(|(_, peer)| *peer)
    }

    fn dispatch(&mut self, peer: ReplicaId, blk_hashes: Vec<Hash>) {
        let now = Instant::now();
        for chunk in blk_hashes.chunks(self.config.max_hashes_per_request) {
            for blk_hash in chunk {
                if let Some(ctx) = self.contexts.get_mut(blk_hash) {
                    ctx.tried.insert(peer);
                    ctx.in_flight = Some((peer, now));
                }
            }
            let request = GetBlocksRequest::new(chunk.to_vec());
            self.transport
                .send(peer, &OutboundMessage::BlocksRequest(request));
        }
    }
}
