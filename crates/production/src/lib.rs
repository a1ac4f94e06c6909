//! Production runtime for Braid replicas.
//!
//! Hosts the deterministic [`braid_node::NodeStateMachine`] on a tokio
//! event loop and supplies everything the state machine delegates:
//!
//! - **Transport boundary**: [`Transport`] trait plus an in-process
//!   [`ChannelNetwork`] for multi-replica tests; wire framing via the sbor
//!   [`codec`].
//! - **Fetch manager**: coalescing, retrying block fetches with peer
//!   reputation ([`FetchManager`]).
//! - **Verification pool**: CPU-bound signature/certificate checks on a
//!   dedicated rayon pool ([`VerifyPool`]).
//! - **Waiter registry**: keyed and broadcast one-shot rendezvous for
//!   observers, and per-command decision callbacks ([`Waiters`]).
//! - **Timers**: tokio-backed timer management ([`TimerManager`]).
//! - **Metrics**: Prometheus counters and histograms ([`metrics`]).

pub mod codec;
mod fetch;
mod metrics;
mod runner;
mod timers;
mod transport;
mod verify;
mod waiters;

pub use fetch::{FetchConfig, FetchManager, FetchStatus};
pub use metrics::metrics;
pub use runner::{ConsensusService, ProductionRunner};
pub use timers::TimerManager;
pub use transport::{ChannelNetwork, Transport};
pub use verify::{VerifyPool, VerifyPoolError};
pub use waiters::Waiters;
