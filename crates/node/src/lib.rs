//! Replica state machine composition.
//!
//! Wires the consensus core and the command pool into a single
//! [`braid_core::StateMachine`], and defines the pacemaker boundary that
//! names proposers and selects proposal parents.

mod pacemaker;
mod state;

pub use pacemaker::{FixedPacemaker, Pacemaker, RoundRobinPacemaker};
pub use state::NodeStateMachine;
