//! swarm-sim - deterministic protocol scenario runner
//!
//! Runs the swarm election protocol in-process with a stepped clock:
//! - `run` - execute one scenario and report the outcome
//! - `list` - list the predefined scenarios

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use swarm_harness::{run_scenario, scenario_names};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "swarm-sim")]
#[command(about = "In-process scenario runner for the swarm election protocol")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario
    Run {
        /// Scenario to run
        #[arg(short, long, default_value = "convergence")]
        scenario: String,

        /// Write the report as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List predefined scenarios
    List,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { scenario, output } => {
            let result = run_scenario(&scenario)?;
            info!(
                "Scenario {} passed: masters {:?}, {} log lines",
                result.scenario, result.masters, result.log_line_count
            );
            for note in &result.notes {
                info!("  note: {}", note);
            }
            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&result)?)?;
                info!("Report written to {}", path.display());
            }
        }
        Commands::List => {
            for name in scenario_names() {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
