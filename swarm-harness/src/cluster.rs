//! In-process multi-node cluster
//!
//! Frames produced in one step are delivered at the start of the next
//! step, mimicking the one-hop latency of the broadcast channel. Links
//! between nodes can be severed to simulate partitions; the
//! coordinator always hears every controller-direction frame unless a
//! reset hold is dropping them.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use swarm_core::{
    ChannelUpdate, Coordinator, CoordinatorConfig, Election, ElectionConfig, Frame, Reading,
    Sensor, SwarmId,
};
use tracing::debug;

/// Fixed-value sensor, settable mid-scenario
pub struct FixedSensor(Reading);

impl FixedSensor {
    pub fn set(&mut self, value: Reading) {
        self.0 = value;
    }
}

impl Sensor for FixedSensor {
    fn sample(&mut self) -> Reading {
        self.0
    }
}

struct ClusterNode {
    election: Election,
    sensor: FixedSensor,
}

/// A frame in flight: who queued it (`None` = the coordinator) and
/// what it carries
type InFlight = (Option<usize>, Frame);

/// Simulated swarm: N nodes, one coordinator, a stepped clock
pub struct Cluster {
    now: Instant,
    nodes: Vec<ClusterNode>,
    coordinator: Coordinator,
    log_path: PathBuf,
    pending: Vec<InFlight>,
    /// Severed node-to-node links, directional (from, to)
    cut: HashSet<(usize, usize)>,
    /// Channel updates the coordinator produced, in order
    pub channel_updates: Vec<ChannelUpdate>,
}

impl Cluster {
    /// Build a cluster of nodes `(swarm_id, reading)` logging to the
    /// given file
    pub fn new(nodes: &[(u8, Reading)], log_path: PathBuf) -> io::Result<Self> {
        let now = Instant::now();
        let coordinator = Coordinator::new(CoordinatorConfig {
            log_path: log_path.clone(),
            ..Default::default()
        })?;
        let nodes = nodes
            .iter()
            .map(|&(id, reading)| ClusterNode {
                election: Election::new(ElectionConfig::new(SwarmId::new(id)), now),
                sensor: FixedSensor(reading),
            })
            .collect();

        Ok(Self {
            now,
            nodes,
            coordinator,
            log_path,
            pending: Vec::new(),
            cut: HashSet::new(),
            channel_updates: Vec::new(),
        })
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn node(&self, index: usize) -> &Election {
        &self.nodes[index].election
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn set_reading(&mut self, index: usize, value: Reading) {
        self.nodes[index].sensor.set(value);
    }

    /// Sever the link between two nodes, both directions
    pub fn cut_link(&mut self, a: usize, b: usize) {
        self.cut.insert((a, b));
        self.cut.insert((b, a));
    }

    /// Isolate one node from every other node (the coordinator still
    /// hears it)
    pub fn isolate(&mut self, index: usize) {
        for other in 0..self.nodes.len() {
            if other != index {
                self.cut_link(index, other);
            }
        }
    }

    pub fn heal_all(&mut self) {
        self.cut.clear();
    }

    /// Coordinator button press: clears its view and queues the reset
    /// broadcast
    pub fn press_button(&mut self) {
        let frame = self.coordinator.press_button(self.now);
        self.pending.push((None, frame));
    }

    /// Advance the clock by `advance`, poll every node, then deliver
    /// the frames queued in the previous step.
    pub fn step(&mut self, advance: Duration) -> io::Result<()> {
        self.now += advance;
        let now = self.now;

        let mut queued: Vec<InFlight> = Vec::new();
        for (index, node) in self.nodes.iter_mut().enumerate() {
            for frame in node.election.poll(now, &mut node.sensor) {
                queued.push((Some(index), frame));
            }
        }

        for (origin, frame) in std::mem::take(&mut self.pending) {
            debug!("delivering {:?} from {:?}", frame, origin);
            for index in 0..self.nodes.len() {
                if origin == Some(index) {
                    continue;
                }
                if let Some(from) = origin {
                    if self.cut.contains(&(from, index)) {
                        continue;
                    }
                }
                let node = &mut self.nodes[index];
                for out in node.election.handle_frame(&frame, now, &mut node.sensor) {
                    queued.push((Some(index), out));
                }
            }
            if origin.is_some() {
                if let Some(update) = self.coordinator.handle_frame(&frame, now)? {
                    self.channel_updates.push(update);
                }
            }
        }

        self.pending = queued;
        Ok(())
    }

    /// Step repeatedly until `total` simulated time has passed
    pub fn run_for(&mut self, total: Duration, step: Duration) -> io::Result<()> {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            self.step(step)?;
            elapsed += step;
        }
        Ok(())
    }

    /// Swarm ids of every node currently claiming master
    pub fn masters(&self) -> Vec<SwarmId> {
        self.nodes
            .iter()
            .filter(|n| n.election.is_master())
            .map(|n| n.election.swarm_id())
            .collect()
    }

    /// Lines of the coordinator's reading log so far
    pub fn log_lines(&self) -> io::Result<Vec<String>> {
        let text = std::fs::read_to_string(&self.log_path)?;
        Ok(text.lines().map(str::to_string).collect())
    }
}
