//! Deterministic in-process cluster harness
//!
//! Runs multiple election state machines and one coordinator inside a
//! single thread with a manually stepped clock and an in-memory frame
//! bus, so protocol behavior can be tested without a network or real
//! time.

pub mod cluster;
pub mod scenarios;

pub use cluster::Cluster;
pub use scenarios::{run_scenario, scenario_names, ScenarioError, ScenarioReport};
