//! Predefined protocol scenarios
//!
//! Each scenario builds a cluster, drives it through a scripted
//! timeline, and checks the election outcome against the protocol's
//! documented behavior, including the cases where divergence is the
//! expected result rather than a failure.

use crate::cluster::Cluster;
use std::time::Duration;
use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;
use tracing::info;

/// Step size used by all scenarios
const STEP: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("expectation failed: {0}")]
    ExpectationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub masters: Vec<u8>,
    pub log_line_count: usize,
    pub notes: Vec<String>,
}

/// Names of all predefined scenarios
pub fn scenario_names() -> &'static [&'static str] {
    &["convergence", "tie", "reset", "partition"]
}

/// Run a scenario by name
pub fn run_scenario(name: &str) -> Result<ScenarioReport, ScenarioError> {
    match name {
        "convergence" => convergence(),
        "tie" => tie(),
        "reset" => reset(),
        "partition" => partition(),
        other => Err(ScenarioError::UnknownScenario(other.to_string())),
    }
}

fn expect(condition: bool, what: &str) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::ExpectationFailed(what.to_string()))
    }
}

fn report(name: &str, cluster: &Cluster, notes: Vec<String>) -> Result<ScenarioReport, ScenarioError> {
    Ok(ScenarioReport {
        scenario: name.to_string(),
        masters: cluster.masters().iter().map(|id| id.value()).collect(),
        log_line_count: cluster.log_lines()?.len(),
        notes,
    })
}

/// Three nodes with distinct readings converge on the highest one
fn convergence() -> Result<ScenarioReport, ScenarioError> {
    let dir = TempDir::new()?;
    let mut cluster = Cluster::new(
        &[(1, 100), (2, 900), (3, 500)],
        dir.path().join("sensor_readings.txt"),
    )?;

    cluster.run_for(Duration::from_secs(1), STEP)?;
    let masters = cluster.masters();
    expect(
        masters.len() == 1 && masters[0].value() == 2,
        "node 2 is the sole master after convergence",
    )?;

    // In steady state the master alone reports, once per cycle
    let baseline = cluster.log_lines()?.len();
    cluster.run_for(Duration::from_millis(250), STEP)?;
    let lines = cluster.log_lines()?;
    let new: Vec<&String> = lines.iter().skip(baseline).collect();
    expect(
        new.len() == 1 && new[0] == "Swarm ID 2: 900",
        "exactly one master-report log line per steady cycle",
    )?;

    info!("convergence: master {:?}, {} log lines", masters, lines.len());
    report("convergence", &cluster, vec![format!("steady line: {}", new[0])])
}

/// Equal readings: no cross-node tie break, both claim master
fn tie() -> Result<ScenarioReport, ScenarioError> {
    let dir = TempDir::new()?;
    let mut cluster = Cluster::new(
        &[(1, 700), (2, 700)],
        dir.path().join("sensor_readings.txt"),
    )?;

    cluster.run_for(Duration::from_secs(1), STEP)?;
    expect(
        cluster.masters().len() == 2,
        "both tied nodes independently claim master",
    )?;

    report("tie", &cluster, vec!["tie is documented divergence".to_string()])
}

/// A coordinator reset forces every node master, suspends the swarm
/// for the hold window, and clears the coordinator view
fn reset() -> Result<ScenarioReport, ScenarioError> {
    let dir = TempDir::new()?;
    let mut cluster = Cluster::new(
        &[(1, 100), (2, 900), (3, 500)],
        dir.path().join("sensor_readings.txt"),
    )?;

    cluster.run_for(Duration::from_secs(1), STEP)?;
    cluster.press_button();
    expect(
        cluster.coordinator().view().is_empty(),
        "coordinator view empty immediately after reset",
    )?;

    // One step delivers the reset broadcast
    cluster.step(STEP)?;
    expect(
        cluster.masters().len() == 3,
        "every node claims master inside the hold window",
    )?;

    // After the hold the peer tables (which survived) re-elect node 2
    cluster.run_for(Duration::from_secs(4), STEP)?;
    let masters = cluster.masters();
    expect(
        masters.len() == 1 && masters[0].value() == 2,
        "node 2 re-elected after the hold",
    )?;

    report("reset", &cluster, vec!["view and channels reassigned fresh".to_string()])
}

/// An isolated node and the remaining group elect independent masters
fn partition() -> Result<ScenarioReport, ScenarioError> {
    let dir = TempDir::new()?;
    let mut cluster = Cluster::new(
        &[(1, 100), (2, 900), (3, 500)],
        dir.path().join("sensor_readings.txt"),
    )?;

    // Node 2 never hears or reaches its peers
    cluster.isolate(1);
    cluster.run_for(Duration::from_secs(1), STEP)?;

    let mut masters: Vec<u8> = cluster.masters().iter().map(|id| id.value()).collect();
    masters.sort_unstable();
    expect(
        masters == vec![2, 3],
        "isolated node 2 and group winner node 3 both claim master",
    )?;

    report(
        "partition",
        &cluster,
        vec!["two masters under partition is documented divergence".to_string()],
    )
}
