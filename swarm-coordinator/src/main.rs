//! Swarm Coordinator
//!
//! The singular supervising controller: listens for master reports on
//! the shared broadcast port, appends every reading to the log file,
//! flashes one output channel per reporting node, and broadcasts a
//! reset when asked. The physical debounced button is stood in for by
//! the `reset` command on stdin.

use clap::Parser;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use swarm_core::{
    transport::DEFAULT_PORT, Coordinator, CoordinatorConfig, FlashBank, LedDriver, Transport,
};
use tokio::time::interval;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Swarm supervising coordinator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP port shared by the whole swarm
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Append-only reading log file
    #[arg(long, default_value = "sensor_readings.txt")]
    log_file: PathBuf,

    /// Number of visual output channels
    #[arg(long, default_value = "3")]
    channels: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Commands arriving from stdin (the button stand-in)
enum Command {
    Reset,
    View,
    Quit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut transport = Transport::new(args.port).await?;
    info!("Listening for master reports on {}", transport.local_addr()?);
    transport.start_receive();

    let config = CoordinatorConfig {
        log_path: args.log_file,
        channel_count: args.channels,
        ..Default::default()
    };
    let channel_count = config.channel_count;
    let mut coordinator = Coordinator::new(config)?;
    let mut leds = FlashBank::new(channel_count, Instant::now());
    let mut was_resetting = false;

    let (command_tx, mut command_rx) = tokio::sync::mpsc::channel::<Command>(16);

    std::thread::spawn(move || {
        println!("\nCommands:");
        println!("  reset  - Broadcast a swarm reset (the button)");
        println!("  view   - Show last known status per swarm id");
        println!("  quit   - Exit\n");

        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "" => continue,
                "reset" => Command::Reset,
                "view" => Command::View,
                "quit" | "exit" => Command::Quit,
                other => {
                    println!("Unknown command: {}", other);
                    continue;
                }
            };
            if command_tx.blocking_send(command).is_err() {
                break;
            }
        }
    });

    let mut ticker = interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                if was_resetting && !coordinator.is_resetting(now) {
                    info!("Reset visual state over, listening again");
                    was_resetting = false;
                }
                for (channel, level) in leds.tick(now) {
                    debug!("LED channel {}: {}", channel, if level { "on" } else { "off" });
                }
            }

            Some((frame, src)) = transport.recv() => {
                debug!("Frame from {}: {:?}", src, frame);
                match coordinator.handle_frame(&frame, Instant::now()) {
                    Ok(Some(update)) => {
                        leds.set_flash_interval(update.channel, update.interval_ms);
                        leds.set_active(update.channel, true);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to record report: {}", e),
                }
            }

            Some(command) = command_rx.recv() => {
                match command {
                    Command::Reset => {
                        let now = Instant::now();
                        let frame = coordinator.press_button(now);
                        leds.all_off();
                        info!("Resetting: all channels off for the hold window");
                        if let Err(e) = transport.broadcast(&frame).await {
                            warn!("Failed to broadcast reset: {}", e);
                        }
                        was_resetting = true;
                    }
                    Command::View => {
                        let view = coordinator.view();
                        if view.is_empty() {
                            println!("(no nodes seen yet)");
                        }
                        for (id, status) in view {
                            println!(
                                "Swarm ID {}: {} ({}, channel {:?})",
                                id,
                                status.last_reading,
                                status.role,
                                coordinator.channel_of(*id),
                            );
                        }
                    }
                    Command::Quit => {
                        info!("Shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}
