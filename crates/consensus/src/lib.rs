//! BFT consensus core.
//!
//! This crate provides the block DAG, the delivery pipeline, and the
//! safety/commit state machine of a chained-HotStuff replication engine.
//!
//! # Architecture
//!
//! The core processes events synchronously and emits actions for the runner:
//!
//! - `ProposalReceived` → resolve ancestors, verify, deliver, maybe vote
//! - `VoteReceived` → verify signature, count vote, form QC at quorum
//! - `BlocksReceived` → satisfy pending fetches, cascade deliveries
//! - `CleanupTimer` → prune blocks far below the committed frontier
//!
//! All I/O (network fetch, signature verification off-thread) is performed
//! by the runner via returned `Action`s.
//!
//! # Consensus Protocol (chained HotStuff)
//!
//! ## Safety
//!
//! - **Voting rule**: a replica votes for a block iff the block is higher
//!   than anything it has voted for (`vheight`) and extends the branch of
//!   its highest known QC (`hqc`) via primary parents.
//!
//! - **Three-chain commit**: block `b1` commits when `b2` with
//!   `b2.parents[0] = b1` and `b2.qc_ref = b1` exists, and a further `b3`
//!   with `b3.qc_ref = b2` is delivered. The commit walk extends `bexec`
//!   down the primary-parent chain; missing `bexec` on the walk is a fatal
//!   safety breach.
//!
//! - **Quorum gating**: a QC forms only when exactly `nmajority = 2f + 1`
//!   distinct valid partial signatures have been accumulated.
//!
//! ## Delivery
//!
//! A block reaches the safety core only after *delivery*: every parent
//! delivered, the certificate's referent fetched, and the block verified on
//! the worker pool. Delivery order is parent-before-child by construction.

mod config;
mod error;
mod pending;
mod state;
mod store;

pub use config::CoreConfig;
pub use error::ConsensusError;
pub use pending::{DeliveryQueue, PendingBlock};
pub use state::{ConsensusState, HighQc};
pub use store::{BlockNode, EntityStorage};
