//! Wire framing for swarm messages
//!
//! Messages are flat ASCII text frames `<start><payload><end>` with no
//! length prefix, checksum, or version field, sent as single best-effort
//! broadcast datagrams. Two disjoint delimiter pairs separate the two
//! message directions sharing the broadcast port: node-to-node frames
//! and controller-direction frames (master reports and the reset
//! broadcast). A receiver must check the leading delimiter before
//! parsing payload structure, and drops anything matching neither pair.

use crate::types::{Reading, Role, SwarmId};
use thiserror::Error;

/// Delimiter pair for node-to-node reading broadcasts
pub const PEER_START: &str = "@@@";
pub const PEER_END: &str = "&&&";

/// Delimiter pair for controller-direction frames
pub const CTRL_START: &str = "+++";
pub const CTRL_END: &str = "***";

/// Fixed payload of a reset broadcast
pub const RESET_TOKEN: &str = "RESET_REQUESTED";

/// Framing and parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame matches neither delimiter pair")]
    UnknownDelimiter,

    #[error("expected {expected} payload fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("invalid integer field: {0:?}")]
    BadInteger(String),

    #[error("unknown role: {0:?}")]
    BadRole(String),
}

/// A parsed swarm protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Node-to-node reading broadcast: `"{id},{reading}"`
    PeerReading { swarm_id: SwarmId, reading: Reading },

    /// Master report to the coordinator: `"{role},{id},{reading}"`
    MasterReport {
        role: Role,
        swarm_id: SwarmId,
        reading: Reading,
    },

    /// Coordinator-issued reset, fixed token payload
    Reset,
}

impl Frame {
    /// Encode to the delimited wire text
    pub fn encode(&self) -> String {
        match self {
            Frame::PeerReading { swarm_id, reading } => {
                format!("{PEER_START}{swarm_id},{reading}{PEER_END}")
            }
            Frame::MasterReport {
                role,
                swarm_id,
                reading,
            } => {
                format!("{CTRL_START}{role},{swarm_id},{reading}{CTRL_END}")
            }
            Frame::Reset => format!("{CTRL_START}{RESET_TOKEN}{CTRL_END}"),
        }
    }

    /// Parse a frame from wire text.
    ///
    /// The leading delimiter selects the payload grammar; frames
    /// matching neither pair are rejected without further inspection.
    pub fn parse(s: &str) -> Result<Frame, FrameError> {
        if let Some(payload) = strip_delimiters(s, PEER_START, PEER_END) {
            let fields = split_fields(payload, 2)?;
            Ok(Frame::PeerReading {
                swarm_id: parse_swarm_id(fields[0])?,
                reading: parse_reading(fields[1])?,
            })
        } else if let Some(payload) = strip_delimiters(s, CTRL_START, CTRL_END) {
            if payload == RESET_TOKEN {
                return Ok(Frame::Reset);
            }
            let fields = split_fields(payload, 3)?;
            let role =
                Role::parse(fields[0]).ok_or_else(|| FrameError::BadRole(fields[0].to_string()))?;
            Ok(Frame::MasterReport {
                role,
                swarm_id: parse_swarm_id(fields[1])?,
                reading: parse_reading(fields[2])?,
            })
        } else {
            Err(FrameError::UnknownDelimiter)
        }
    }
}

fn strip_delimiters<'a>(s: &'a str, start: &str, end: &str) -> Option<&'a str> {
    s.strip_prefix(start)?.strip_suffix(end)
}

fn split_fields(payload: &str, expected: usize) -> Result<Vec<&str>, FrameError> {
    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() != expected {
        return Err(FrameError::FieldCount {
            expected,
            got: fields.len(),
        });
    }
    Ok(fields)
}

fn parse_swarm_id(s: &str) -> Result<SwarmId, FrameError> {
    s.parse::<u8>()
        .map(SwarmId::new)
        .map_err(|_| FrameError::BadInteger(s.to_string()))
}

fn parse_reading(s: &str) -> Result<Reading, FrameError> {
    s.parse::<Reading>()
        .map_err(|_| FrameError::BadInteger(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_reading_roundtrip() {
        let frame = Frame::PeerReading {
            swarm_id: SwarmId::new(3),
            reading: 512,
        };
        let wire = frame.encode();
        assert_eq!(wire, "@@@3,512&&&");
        assert_eq!(Frame::parse(&wire), Ok(frame));
    }

    #[test]
    fn test_master_report_roundtrip() {
        let frame = Frame::MasterReport {
            role: Role::Master,
            swarm_id: SwarmId::new(7),
            reading: 900,
        };
        let wire = frame.encode();
        assert_eq!(wire, "+++MASTER,7,900***");
        assert_eq!(Frame::parse(&wire), Ok(frame));
    }

    #[test]
    fn test_reset_roundtrip() {
        let wire = Frame::Reset.encode();
        assert_eq!(wire, "+++RESET_REQUESTED***");
        assert_eq!(Frame::parse(&wire), Ok(Frame::Reset));
    }

    #[test]
    fn test_unknown_delimiter_rejected() {
        assert_eq!(Frame::parse("~~~oops"), Err(FrameError::UnknownDelimiter));
        assert_eq!(Frame::parse(""), Err(FrameError::UnknownDelimiter));
        // Bare payload without any framing
        assert_eq!(Frame::parse("3,512"), Err(FrameError::UnknownDelimiter));
    }

    #[test]
    fn test_missing_separator_rejected() {
        assert_eq!(
            Frame::parse("@@@3512&&&"),
            Err(FrameError::FieldCount {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn test_malformed_integer_rejected() {
        assert_eq!(
            Frame::parse("@@@x,512&&&"),
            Err(FrameError::BadInteger("x".to_string()))
        );
        assert_eq!(
            Frame::parse("@@@3,many&&&"),
            Err(FrameError::BadInteger("many".to_string()))
        );
    }

    #[test]
    fn test_bad_role_rejected() {
        assert_eq!(
            Frame::parse("+++OVERLORD,3,512***"),
            Err(FrameError::BadRole("OVERLORD".to_string()))
        );
    }

    #[test]
    fn test_peer_payload_in_ctrl_frame_rejected() {
        // Two-field payload under the controller delimiters is not a
        // valid master report.
        assert_eq!(
            Frame::parse("+++3,512***"),
            Err(FrameError::FieldCount {
                expected: 3,
                got: 2
            })
        );
    }
}
