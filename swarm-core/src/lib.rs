//! Swarm Core Library
//!
//! Decentralized leader election for a swarm of sensing nodes.
//! Each node periodically broadcasts its sensor reading over UDP and
//! locally decides master status by comparing against its peer table;
//! a singular coordinator aggregates master reports and issues resets.

pub mod coordinator;
pub mod election;
pub mod flash;
pub mod frame;
pub mod transport;
pub mod types;

pub use coordinator::{ChannelUpdate, Coordinator, CoordinatorConfig, NodeStatus};
pub use election::{CollisionPolicy, Election, ElectionConfig, FlashOutputs};
pub use flash::{FlashBank, FlashCalibration, FlashTimer, LedDriver};
pub use frame::{Frame, FrameError};
pub use transport::Transport;
pub use types::{derive_swarm_id, NodeState, Reading, Role, Sensor, SwarmId};
