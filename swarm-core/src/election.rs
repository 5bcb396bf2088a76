//! Node-local leader election loop
//!
//! Every node runs the same cycle: sample the sensor, broadcast
//! `(id, reading)`, and decide master status by comparing the own
//! reading against the last known reading of every other node. The
//! decision is purely local; there is no voting round, no quorum, and
//! no acknowledgment. Two nodes with divergent peer tables can both
//! claim master at the same instant, and a partition can leave zero
//! claimants. That divergence is accepted protocol behavior, healed by
//! the periodic re-broadcast rather than detected and escalated.
//!
//! Cycle state machine: Idle, then Master or Slave after each cycle,
//! with an orthogonal ResetHold entered from any state when a reset
//! broadcast arrives. The hold is an explicit deadline checked on every
//! poll, never a blocking sleep.

use crate::flash::FlashCalibration;
use crate::frame::Frame;
use crate::types::{NodeState, Reading, Role, Sensor, SwarmId};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Silence window before a node forces a re-broadcast (heartbeat)
pub const SILENT_TIME_MS: u64 = 200;

/// How long a node suspends its own loop after a reset broadcast
pub const RESET_HOLD_MS: u64 = 3000;

/// Policy for inbound peer frames carrying this node's own identifier.
///
/// Swarm identifiers come from the low-order digit of a network
/// identifier, so collisions are possible and the protocol does not
/// resolve them. The stored entry never feeds the master decision
/// either way (the comparison skips the own identifier); the policy
/// only controls whether the colliding value lands in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Store the colliding reading like any other peer entry (matches
    /// the reference firmware's unchecked array write)
    #[default]
    Overwrite,
    /// Drop colliding frames with a warning
    Reject,
}

/// Per-node election configuration
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub swarm_id: SwarmId,
    pub silent_time: Duration,
    pub reset_hold: Duration,
    pub calibration: FlashCalibration,
    pub collision_policy: CollisionPolicy,
    /// Age beyond which a peer entry stops counting in the master
    /// decision. `None` (the default, matching the reference) keeps
    /// stale entries forever; the entry itself is never pruned.
    pub reading_ttl: Option<Duration>,
}

impl ElectionConfig {
    pub fn new(swarm_id: SwarmId) -> Self {
        Self {
            swarm_id,
            silent_time: Duration::from_millis(SILENT_TIME_MS),
            reset_hold: Duration::from_millis(RESET_HOLD_MS),
            calibration: FlashCalibration::default(),
            collision_policy: CollisionPolicy::default(),
            reading_ttl: None,
        }
    }

    pub fn with_silent_time(mut self, silent_time: Duration) -> Self {
        self.silent_time = silent_time;
        self
    }

    pub fn with_reset_hold(mut self, reset_hold: Duration) -> Self {
        self.reset_hold = reset_hold;
        self
    }

    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    pub fn with_reading_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.reading_ttl = ttl;
        self
    }
}

/// Last known reading of a peer, overwritten on every receipt
#[derive(Debug, Clone, Copy)]
struct PeerEntry {
    value: Reading,
    seen: Instant,
}

/// Flash output state computed by the last cycle. `None` = inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashOutputs {
    /// Indicator channel: own reading interval, driven whenever a cycle
    /// has run
    pub indicator_interval_ms: Option<u64>,
    /// Master channel: own reading interval, driven only while master
    pub master_interval_ms: Option<u64>,
}

/// Election state machine for a single node.
///
/// Owns all mutable per-node state, so multiple instances can run in
/// one process for integration tests. All time-dependent operations
/// take `now` explicitly.
pub struct Election {
    config: ElectionConfig,
    readings: HashMap<SwarmId, PeerEntry>,
    own_reading: Reading,
    is_master: bool,
    /// Whether any broadcast cycle has run yet
    cycled: bool,
    /// Reset drove both outputs to the off state until the next cycle
    outputs_off: bool,
    /// Last broadcast-or-receive instant, drives the silence timer
    last_activity: Instant,
    /// Reset hold deadline; while set and in the future, the own loop
    /// is suspended
    reset_hold_until: Option<Instant>,
}

impl Election {
    pub fn new(config: ElectionConfig, now: Instant) -> Self {
        Self {
            config,
            readings: HashMap::new(),
            own_reading: 0,
            is_master: false,
            cycled: false,
            outputs_off: false,
            last_activity: now,
            reset_hold_until: None,
        }
    }

    pub fn swarm_id(&self) -> SwarmId {
        self.config.swarm_id
    }

    pub fn is_master(&self) -> bool {
        self.is_master
    }

    pub fn own_reading(&self) -> Reading {
        self.own_reading
    }

    /// Last known reading for a peer, if any was ever received
    pub fn peer_reading(&self, id: SwarmId) -> Option<Reading> {
        self.readings.get(&id).map(|e| e.value)
    }

    pub fn state(&self, now: Instant) -> NodeState {
        if self.in_reset_hold(now) {
            NodeState::ResetHold
        } else if !self.cycled {
            NodeState::Idle
        } else if self.is_master {
            NodeState::Master
        } else {
            NodeState::Slave
        }
    }

    fn in_reset_hold(&self, now: Instant) -> bool {
        matches!(self.reset_hold_until, Some(deadline) if now < deadline)
    }

    /// Flash output state for the LED driver, refreshed each cycle
    pub fn outputs(&self) -> FlashOutputs {
        if !self.cycled || self.outputs_off {
            return FlashOutputs {
                indicator_interval_ms: None,
                master_interval_ms: None,
            };
        }
        let interval = self.config.calibration.interval_ms(self.own_reading);
        FlashOutputs {
            indicator_interval_ms: Some(interval),
            master_interval_ms: self.is_master.then_some(interval),
        }
    }

    /// One non-blocking iteration of the node's own loop.
    ///
    /// Inside the reset hold this does nothing; once the hold deadline
    /// passes the stale silence timer forces an immediate cycle.
    /// Otherwise a cycle runs when nothing was sent or received for
    /// `silent_time`. Returns the frames to broadcast.
    pub fn poll(&mut self, now: Instant, sensor: &mut dyn Sensor) -> Vec<Frame> {
        if let Some(deadline) = self.reset_hold_until {
            if now < deadline {
                return Vec::new();
            }
            debug!("node {}: reset hold expired", self.config.swarm_id);
            self.reset_hold_until = None;
        }

        if now.duration_since(self.last_activity) >= self.config.silent_time {
            return self.run_cycle(now, sensor);
        }
        Vec::new()
    }

    /// Process one inbound frame. Returns the frames to broadcast.
    pub fn handle_frame(&mut self, frame: &Frame, now: Instant, sensor: &mut dyn Sensor) -> Vec<Frame> {
        match frame {
            Frame::Reset => {
                self.apply_reset(now);
                Vec::new()
            }
            Frame::PeerReading { swarm_id, reading } => {
                self.handle_peer_reading(*swarm_id, *reading, now, sensor)
            }
            // Controller-direction traffic is not for nodes
            Frame::MasterReport { .. } => Vec::new(),
        }
    }

    fn handle_peer_reading(
        &mut self,
        from: SwarmId,
        reading: Reading,
        now: Instant,
        sensor: &mut dyn Sensor,
    ) -> Vec<Frame> {
        if self.in_reset_hold(now) {
            trace!("node {}: dropping peer frame during reset hold", self.config.swarm_id);
            return Vec::new();
        }

        if from == self.config.swarm_id {
            match self.config.collision_policy {
                CollisionPolicy::Reject => {
                    warn!(
                        "node {}: rejecting frame with colliding swarm id",
                        self.config.swarm_id
                    );
                }
                CollisionPolicy::Overwrite => {
                    debug!(
                        "node {}: storing frame with colliding swarm id",
                        self.config.swarm_id
                    );
                    self.readings.insert(from, PeerEntry { value: reading, seen: now });
                }
            }
            // Own-id frames never trigger a cycle; a broadcast echo
            // must not feed back into re-broadcasting.
            return Vec::new();
        }

        let changed = self.readings.get(&from).map(|e| e.value) != Some(reading);
        self.readings.insert(from, PeerEntry { value: reading, seen: now });
        self.last_activity = now;

        if changed {
            trace!(
                "node {}: peer {} now reads {}",
                self.config.swarm_id,
                from,
                reading
            );
            self.run_cycle(now, sensor)
        } else {
            Vec::new()
        }
    }

    /// One broadcast cycle: sample, announce, decide.
    fn run_cycle(&mut self, now: Instant, sensor: &mut dyn Sensor) -> Vec<Frame> {
        self.own_reading = sensor.sample();
        self.cycled = true;
        self.outputs_off = false;
        self.last_activity = now;

        let was_master = self.is_master;
        self.is_master = self.decide_master(now);
        if self.is_master != was_master {
            info!(
                "node {}: {} (reading {})",
                self.config.swarm_id,
                if self.is_master { "claiming master" } else { "yielding master" },
                self.own_reading
            );
        }

        let mut frames = vec![Frame::PeerReading {
            swarm_id: self.config.swarm_id,
            reading: self.own_reading,
        }];
        if self.is_master {
            frames.push(Frame::MasterReport {
                role: Role::Master,
                swarm_id: self.config.swarm_id,
                reading: self.own_reading,
            });
        }
        frames
    }

    /// Master unless any other node's last known reading is strictly
    /// greater. Ties favor the local node; unknown peers never
    /// disqualify.
    fn decide_master(&self, now: Instant) -> bool {
        !self.readings.iter().any(|(id, entry)| {
            *id != self.config.swarm_id
                && self.entry_counts(entry, now)
                && entry.value > self.own_reading
        })
    }

    fn entry_counts(&self, entry: &PeerEntry, now: Instant) -> bool {
        match self.config.reading_ttl {
            Some(ttl) => now.duration_since(entry.seen) <= ttl,
            None => true,
        }
    }

    fn apply_reset(&mut self, now: Instant) {
        info!(
            "node {}: reset received, holding for {:?}",
            self.config.swarm_id, self.config.reset_hold
        );
        // Reference behavior: drive both outputs off, then treat this
        // node as master until normal cycles resume. The peer table is
        // deliberately kept.
        self.outputs_off = true;
        self.is_master = true;
        self.cycled = true;
        self.reset_hold_until = Some(now + self.config.reset_hold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedSensor(Reading);

    impl Sensor for FixedSensor {
        fn sample(&mut self) -> Reading {
            self.0
        }
    }

    fn node(id: u8) -> Election {
        Election::new(ElectionConfig::new(SwarmId::new(id)), Instant::now())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn peer(id: u8, reading: Reading) -> Frame {
        Frame::PeerReading {
            swarm_id: SwarmId::new(id),
            reading,
        }
    }

    #[test]
    fn test_starts_idle_and_cycles_after_silence() {
        let t0 = Instant::now();
        let mut el = Election::new(ElectionConfig::new(SwarmId::new(1)), t0);
        let mut sensor = FixedSensor(500);

        assert_eq!(el.state(t0), NodeState::Idle);
        assert!(el.poll(t0 + ms(199), &mut sensor).is_empty());

        let frames = el.poll(t0 + ms(200), &mut sensor);
        assert_eq!(frames.len(), 2); // empty table: master, so reading + report
        assert_eq!(el.state(t0 + ms(200)), NodeState::Master);
    }

    #[test]
    fn test_unknown_peers_never_disqualify() {
        let t0 = Instant::now();
        let mut el = Election::new(ElectionConfig::new(SwarmId::new(1)), t0);
        let frames = el.poll(t0 + ms(200), &mut FixedSensor(1));
        assert!(el.is_master());
        assert!(frames.contains(&Frame::MasterReport {
            role: Role::Master,
            swarm_id: SwarmId::new(1),
            reading: 1,
        }));
    }

    #[test]
    fn test_higher_peer_reading_disqualifies() {
        let mut el = node(1);
        let mut sensor = FixedSensor(100);
        let now = Instant::now();

        let frames = el.handle_frame(&peer(2, 900), now, &mut sensor);
        assert!(!el.is_master());
        assert_eq!(el.state(now), NodeState::Slave);
        // Only the reading broadcast, no master report
        assert_eq!(frames, vec![peer(1, 100)]);
    }

    #[test]
    fn test_lower_peer_reading_keeps_master() {
        let mut el = node(1);
        let now = Instant::now();
        el.handle_frame(&peer(2, 100), now, &mut FixedSensor(900));
        assert!(el.is_master());
    }

    #[test]
    fn test_tie_favors_local_node_on_both_sides() {
        let now = Instant::now();
        let mut a = node(1);
        let mut b = node(2);
        a.handle_frame(&peer(2, 512), now, &mut FixedSensor(512));
        b.handle_frame(&peer(1, 512), now, &mut FixedSensor(512));
        // No cross-node tie break: both legitimately claim master.
        assert!(a.is_master());
        assert!(b.is_master());
    }

    #[test]
    fn test_receipt_triggers_cycle_only_on_change() {
        let mut el = node(1);
        let mut sensor = FixedSensor(100);
        let now = Instant::now();

        assert!(!el.handle_frame(&peer(2, 300), now, &mut sensor).is_empty());
        // Same value again: table refreshed, no new cycle
        assert!(el
            .handle_frame(&peer(2, 300), now + ms(10), &mut sensor)
            .is_empty());
        // New value: cycle again
        assert!(!el
            .handle_frame(&peer(2, 301), now + ms(20), &mut sensor)
            .is_empty());
    }

    #[test]
    fn test_receive_resets_silence_timer() {
        let t0 = Instant::now();
        let mut el = Election::new(ElectionConfig::new(SwarmId::new(1)), t0);
        let mut sensor = FixedSensor(100);

        el.handle_frame(&peer(2, 300), t0 + ms(150), &mut sensor);
        // The unchanged receipt at t0+150 restarted the window
        el.handle_frame(&peer(2, 300), t0 + ms(180), &mut sensor);
        assert!(el.poll(t0 + ms(379), &mut sensor).is_empty());
        assert!(!el.poll(t0 + ms(380), &mut sensor).is_empty());
    }

    #[test]
    fn test_reset_forces_master_and_suspends_loop() {
        let t0 = Instant::now();
        let mut el = Election::new(ElectionConfig::new(SwarmId::new(1)), t0);
        let mut sensor = FixedSensor(100);

        el.handle_frame(&peer(2, 900), t0, &mut sensor);
        assert!(!el.is_master());

        el.handle_frame(&Frame::Reset, t0 + ms(10), &mut sensor);
        assert!(el.is_master());
        assert_eq!(el.state(t0 + ms(10)), NodeState::ResetHold);

        // Suspended for exactly the hold duration
        assert!(el.poll(t0 + ms(10) + ms(2999), &mut sensor).is_empty());
        let frames = el.poll(t0 + ms(10) + ms(3000), &mut sensor);
        assert!(!frames.is_empty());
        // Peer table survived the reset, so the higher peer wins again
        assert!(!el.is_master());
    }

    #[test]
    fn test_inbound_dropped_during_hold() {
        let t0 = Instant::now();
        let mut el = Election::new(ElectionConfig::new(SwarmId::new(1)), t0);
        let mut sensor = FixedSensor(100);

        el.handle_frame(&Frame::Reset, t0, &mut sensor);
        let frames = el.handle_frame(&peer(2, 900), t0 + ms(100), &mut sensor);
        assert!(frames.is_empty());
        assert_eq!(el.peer_reading(SwarmId::new(2)), None);
    }

    #[test]
    fn test_master_report_ignored_by_nodes() {
        let mut el = node(1);
        let report = Frame::MasterReport {
            role: Role::Master,
            swarm_id: SwarmId::new(2),
            reading: 1000,
        };
        let frames = el.handle_frame(&report, Instant::now(), &mut FixedSensor(1));
        assert!(frames.is_empty());
        assert_eq!(el.peer_reading(SwarmId::new(2)), None);
    }

    #[test]
    fn test_collision_overwrite_stores_but_never_competes() {
        let mut el = node(1);
        let mut sensor = FixedSensor(100);
        let now = Instant::now();

        let frames = el.handle_frame(&peer(1, 1000), now, &mut sensor);
        assert!(frames.is_empty()); // own-id frames never trigger a cycle
        assert_eq!(el.peer_reading(SwarmId::new(1)), Some(1000));

        // The colliding entry does not feed the decision
        let frames = el.poll(now + ms(200), &mut sensor);
        assert!(el.is_master());
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_collision_reject_drops_frame() {
        let config =
            ElectionConfig::new(SwarmId::new(1)).with_collision_policy(CollisionPolicy::Reject);
        let mut el = Election::new(config, Instant::now());
        el.handle_frame(&peer(1, 1000), Instant::now(), &mut FixedSensor(100));
        assert_eq!(el.peer_reading(SwarmId::new(1)), None);
    }

    #[test]
    fn test_stale_entries_persist_by_default() {
        let t0 = Instant::now();
        let mut el = Election::new(ElectionConfig::new(SwarmId::new(1)), t0);
        let mut sensor = FixedSensor(100);

        el.handle_frame(&peer(2, 900), t0, &mut sensor);
        // Hours later the stale entry still disqualifies
        el.poll(t0 + Duration::from_secs(3600), &mut sensor);
        assert!(!el.is_master());
    }

    #[test]
    fn test_reading_ttl_expires_stale_entries_from_decision() {
        let t0 = Instant::now();
        let config = ElectionConfig::new(SwarmId::new(1))
            .with_reading_ttl(Some(Duration::from_secs(1)));
        let mut el = Election::new(config, t0);
        let mut sensor = FixedSensor(100);

        el.handle_frame(&peer(2, 900), t0, &mut sensor);
        assert!(!el.is_master());

        el.poll(t0 + Duration::from_secs(2), &mut sensor);
        assert!(el.is_master());
        // The entry itself is never pruned
        assert_eq!(el.peer_reading(SwarmId::new(2)), Some(900));
    }

    #[test]
    fn test_outputs_follow_cycle_state() {
        let t0 = Instant::now();
        let mut el = Election::new(ElectionConfig::new(SwarmId::new(1)), t0);
        let mut sensor = FixedSensor(524);

        // No cycle yet: everything inactive
        assert_eq!(el.outputs().indicator_interval_ms, None);

        el.poll(t0 + ms(200), &mut sensor);
        let outputs = el.outputs();
        assert_eq!(outputs.indicator_interval_ms, Some(1010));
        assert_eq!(outputs.master_interval_ms, Some(1010));

        // A higher peer demotes us: indicator stays, master goes off
        el.handle_frame(&peer(2, 1000), t0 + ms(210), &mut sensor);
        let outputs = el.outputs();
        assert_eq!(outputs.indicator_interval_ms, Some(1010));
        assert_eq!(outputs.master_interval_ms, None);

        // Reset drives both outputs off despite master being forced
        el.handle_frame(&Frame::Reset, t0 + ms(220), &mut sensor);
        assert!(el.is_master());
        assert_eq!(el.outputs().indicator_interval_ms, None);
        assert_eq!(el.outputs().master_interval_ms, None);
    }
}
