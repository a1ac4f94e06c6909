//! Deterministic simulation of a Braid replica group.
//!
//! Runs every replica's state machine in one thread with simulated time
//! and a seeded network model. Given the same seed, a simulation produces
//! identical results every run, which makes consensus bugs reproducible.
//!
//! The runner also enforces the protocol's universal invariants after
//! every event: monotone `vheight`/`bexec`/`hqc` per replica, and
//! commit-prefix agreement across replicas.

mod event_queue;
mod network;
mod runner;

pub use network::{NetworkConfig, SimulatedNetwork};
pub use runner::{NodeIndex, SimulationRunner, SimulationStats};
