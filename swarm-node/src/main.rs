//! Swarm Node
//!
//! One sensing node: samples a (simulated) analog sensor, broadcasts
//! its reading over UDP, and participates in the decentralized master
//! election. LED output is represented by two logical flash channels
//! whose level transitions are logged.

use clap::Parser;
use rand::Rng;
use std::time::{Duration, Instant};
use swarm_core::{
    derive_swarm_id, transport::DEFAULT_PORT, Election, ElectionConfig, FlashBank, FlashOutputs,
    LedDriver, Reading, Sensor, SwarmId, Transport,
};
use tokio::time::interval;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Logical flash channels of a node
const INDICATOR_CHANNEL: usize = 0;
const MASTER_CHANNEL: usize = 1;

/// Swarm sensing node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Stable station identifier (e.g. MAC address); the swarm id is
    /// its last digit
    #[arg(short, long, default_value = "")]
    station_id: String,

    /// Explicit swarm id, overriding derivation from the station id
    #[arg(long)]
    swarm_id: Option<u8>,

    /// UDP port shared by the whole swarm
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Base value for the simulated sensor
    #[arg(long, default_value = "512")]
    base_reading: Reading,

    /// Random jitter applied around the base reading
    #[arg(long, default_value = "32")]
    jitter: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Simulated analog sensor: base value plus uniform jitter, clamped to
/// the device range
struct SimulatedSensor {
    base: Reading,
    jitter: u16,
}

impl Sensor for SimulatedSensor {
    fn sample(&mut self) -> Reading {
        let jitter = i32::from(self.jitter);
        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        (i32::from(self.base) + offset).clamp(0, i32::from(swarm_core::types::READING_MAX)) as Reading
    }
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

    let swarm_id = match args.swarm_id {
        Some(id) => SwarmId::new(id),
        None => derive_swarm_id(&args.station_id)
            .ok_or("no digit in --station-id; pass --swarm-id instead")?,
    };

    info!("Swarm node {} starting", swarm_id);

    let mut transport = Transport::new(args.port).await?;
    info!("Listening on {}", transport.local_addr()?);
    transport.start_receive();

    let mut sensor = SimulatedSensor {
        base: args.base_reading,
        jitter: args.jitter,
    };

    let now = Instant::now();
    let mut election = Election::new(ElectionConfig::new(swarm_id), now);
    let mut leds = FlashBank::new(2, now);
    let mut prev_state = election.state(now);

    let mut ticker = interval(Duration::from_millis(50));

    loop {
        let frames = tokio::select! {
            _ = ticker.tick() => {
                election.poll(Instant::now(), &mut sensor)
            }

            Some((frame, src)) = transport.recv() => {
                debug!("Frame from {}: {:?}", src, frame);
                election.handle_frame(&frame, Instant::now(), &mut sensor)
            }
        };

        for frame in &frames {
            if let Err(e) = transport.broadcast(frame).await {
                // Best-effort: the next cycle retries, no backoff
                warn!("Broadcast failed: {}", e);
            }
        }

        let now = Instant::now();
        let state = election.state(now);
        if state != prev_state {
            info!("State: {:?} -> {:?}", prev_state, state);
            prev_state = state;
        }

        drive_leds(&mut leds, election.outputs(), now);
    }
}

/// Map the election's flash outputs onto the LED bank and log toggles
fn drive_leds(leds: &mut FlashBank, outputs: FlashOutputs, now: Instant) {
    apply_channel(leds, INDICATOR_CHANNEL, outputs.indicator_interval_ms);
    apply_channel(leds, MASTER_CHANNEL, outputs.master_interval_ms);

    for (channel, level) in leds.tick(now) {
        let name = if channel == MASTER_CHANNEL { "master" } else { "indicator" };
        debug!("LED {}: {}", name, if level { "on" } else { "off" });
    }
}

fn apply_channel(leds: &mut FlashBank, channel: usize, interval_ms: Option<u64>) {
    match interval_ms {
        Some(ms) => {
            leds.set_flash_interval(channel, ms);
            leds.set_active(channel, true);
        }
        None => leds.set_active(channel, false),
    }
}
