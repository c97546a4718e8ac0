//! Swarm simulator module
//!
//! Drives a population of robots over a square arena:
//! - Random-walk motion and radio-range neighbour discovery
//! - One control step per robot per tick
//! - Transaction and chain gossip along node peer links
//! - Scheduled kills and teardown logs

pub mod arena;
pub mod config;
pub mod runner;
pub mod stats;

pub use config::{ArenaConfig, KillEvent, SwarmSimConfig};
pub use runner::SwarmRunner;
pub use stats::{RobotSummary, SimResult};
