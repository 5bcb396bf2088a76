//! Core types for the swarm protocol

use std::fmt;

/// Unique identifier for a swarm node.
///
/// A small non-negative integer, assigned once at startup from the
/// low-order digit of a stable network identifier (MAC address or
/// hostname). Collisions between nodes are possible and are not
/// resolved by the protocol itself; see [`crate::election::CollisionPolicy`]
/// for how a node treats frames carrying its own identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwarmId(u8);

impl SwarmId {
    pub fn new(id: u8) -> Self {
        SwarmId(id)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive a swarm identifier from a stable station identifier.
///
/// Takes the last ASCII digit of the identifier string (e.g. the final
/// digit of a MAC address or hostname). Returns `None` if the string
/// contains no digit.
pub fn derive_swarm_id(station_id: &str) -> Option<SwarmId> {
    station_id
        .chars()
        .rev()
        .find(|c| c.is_ascii_digit())
        .map(|c| SwarmId(c as u8 - b'0'))
}

/// Sensor reading as sampled once per broadcast cycle.
///
/// Device range is 0..=1023 for the reference analog sensor; the
/// protocol itself accepts any value that fits the wire encoding.
pub type Reading = u16;

/// Upper bound of the reference sensor range.
pub const READING_MAX: Reading = 1023;

/// Role a node claims in a master report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    /// Wire representation used in master-report payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "MASTER",
            Role::Slave => "SLAVE",
        }
    }

    /// Parse the wire representation
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "MASTER" => Some(Role::Master),
            "SLAVE" => Some(Role::Slave),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of a node's election loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No broadcast cycle has run yet
    Idle,
    /// Last cycle decided this node is master
    Master,
    /// Last cycle decided another node outranks this one
    Slave,
    /// Reset received, own loop suspended until the hold deadline
    ResetHold,
}

/// External sensing capability, called once per broadcast cycle
pub trait Sensor {
    fn sample(&mut self) -> Reading;
}
