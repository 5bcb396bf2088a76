//! Coordinator state machine
//!
//! The singular coordinator aggregates master reports from the swarm,
//! appends each reading to a durable log file, drives one visual
//! output channel per reporting node, and broadcasts resets on a
//! button press.

use crate::flash::FlashCalibration;
use crate::frame::Frame;
use crate::types::{Reading, Role, SwarmId};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Append-only reading log
    pub log_path: PathBuf,
    /// Number of visual output channels (reference hardware: 3 RGB LEDs)
    pub channel_count: usize,
    /// Duration of the "resetting" visual state after a button press
    pub reset_hold: Duration,
    pub calibration: FlashCalibration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("sensor_readings.txt"),
            channel_count: 3,
            reset_hold: Duration::from_millis(crate::election::RESET_HOLD_MS),
            calibration: FlashCalibration::default(),
        }
    }
}

/// Last known status of one reporting node
#[derive(Debug, Clone, Copy)]
pub struct NodeStatus {
    pub role: Role,
    pub last_reading: Reading,
    pub last_seen: Instant,
}

/// Visual update produced by a master report: which channel to flash
/// and at what interval. `None` channel updates are swallowed upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub swarm_id: SwarmId,
    pub channel: usize,
    pub interval_ms: u64,
}

/// Append-only reading log, one line per master report.
///
/// The reference implementation truncates this file on reset; here the
/// log is kept strictly append-only and only the in-memory view is
/// cleared.
struct ReadingLog {
    writer: BufWriter<File>,
}

impl ReadingLog {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn append(&mut self, swarm_id: SwarmId, reading: Reading) -> io::Result<()> {
        writeln!(self.writer, "Swarm ID {swarm_id}: {reading}")?;
        self.writer.flush()
    }
}

/// Coordinator for the swarm: per-node status view, channel
/// assignment, reading log, and reset signaling. Owned by a single
/// loop; all time-dependent operations take `now` explicitly.
pub struct Coordinator {
    config: CoordinatorConfig,
    view: HashMap<SwarmId, NodeStatus>,
    channels: HashMap<SwarmId, usize>,
    next_channel: usize,
    log: ReadingLog,
    resetting_until: Option<Instant>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> io::Result<Self> {
        let log = ReadingLog::open(&config.log_path)?;
        Ok(Self {
            config,
            view: HashMap::new(),
            channels: HashMap::new(),
            next_channel: 0,
            log,
            resetting_until: None,
        })
    }

    /// Current per-node status view
    pub fn view(&self) -> &HashMap<SwarmId, NodeStatus> {
        &self.view
    }

    /// Channel assigned to a node, if it got one before capacity ran out
    pub fn channel_of(&self, id: SwarmId) -> Option<usize> {
        self.channels.get(&id).copied()
    }

    /// Whether the post-button "resetting" visual state is active
    pub fn is_resetting(&self, now: Instant) -> bool {
        matches!(self.resetting_until, Some(deadline) if now < deadline)
    }

    /// Route one inbound frame. While resetting, everything inbound is
    /// dropped; node-to-node frames and the reset echo are ignored.
    pub fn handle_frame(&mut self, frame: &Frame, now: Instant) -> io::Result<Option<ChannelUpdate>> {
        if self.is_resetting(now) {
            debug!("coordinator: dropping frame during reset");
            return Ok(None);
        }
        match frame {
            Frame::MasterReport {
                role,
                swarm_id,
                reading,
            } => self.on_master_report(*swarm_id, *role, *reading, now),
            Frame::PeerReading { .. } | Frame::Reset => Ok(None),
        }
    }

    /// Record a master report: update the view, append the log line,
    /// and return the flash update for the node's assigned channel.
    pub fn on_master_report(
        &mut self,
        swarm_id: SwarmId,
        role: Role,
        reading: Reading,
        now: Instant,
    ) -> io::Result<Option<ChannelUpdate>> {
        info!("coordinator: swarm id {} reports {} ({})", swarm_id, reading, role);
        self.view.insert(
            swarm_id,
            NodeStatus {
                role,
                last_reading: reading,
                last_seen: now,
            },
        );
        self.log.append(swarm_id, reading)?;

        let Some(channel) = self.assign_channel(swarm_id) else {
            // Silent capacity limit: nodes beyond the channel count are
            // tracked and logged but not displayed.
            return Ok(None);
        };
        Ok(Some(ChannelUpdate {
            swarm_id,
            channel,
            interval_ms: self.config.calibration.interval_ms(reading),
        }))
    }

    /// First-seen-order channel assignment, capped at the channel count
    fn assign_channel(&mut self, swarm_id: SwarmId) -> Option<usize> {
        if let Some(channel) = self.channels.get(&swarm_id) {
            return Some(*channel);
        }
        if self.next_channel >= self.config.channel_count {
            debug!("coordinator: no free channel for swarm id {}", swarm_id);
            return None;
        }
        let channel = self.next_channel;
        self.next_channel += 1;
        self.channels.insert(swarm_id, channel);
        Some(channel)
    }

    /// Button press: forget every node and its channel, enter the
    /// resetting visual state, and return the reset frame to
    /// broadcast. Channel assignment starts fresh with the next
    /// reports.
    pub fn press_button(&mut self, now: Instant) -> Frame {
        info!("coordinator: reset requested");
        self.view.clear();
        self.channels.clear();
        self.next_channel = 0;
        self.resetting_until = Some(now + self.config.reset_hold);
        Frame::Reset
    }
}
