//! Leader-side command batching.
//!
//! Buffers client command hashes while this replica is the proposer and
//! releases them in fixed-size batches for proposal building.

mod state;

pub use state::{CommandPool, MempoolConfig};
