//! Configuration for the swarm simulator

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use sw_rust::{ContractParams, NodeConfig, PeeringConfig, RobotId, SimTime};

/// Configuration for a swarm run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwarmSimConfig {
    /// Number of simulation ticks
    pub ticks: SimTime,

    /// Robots in the arena, numbered from 1
    pub num_robots: usize,

    /// Random seed (None = generate random)
    #[serde(skip)]
    pub seed: Option<[u8; 32]>,

    pub arena: ArenaConfig,

    /// Node settings shared by every robot
    pub node: NodeConfig,

    /// Peering settings; observation tracking follows the consensus kind
    pub peering: PeeringConfig,

    /// Smart contract parameters (`scs` in scenario files)
    #[serde(alias = "scs")]
    pub contract: ContractParams,

    /// Robots removed during the run
    pub kills: Vec<KillEvent>,

    /// Where teardown logs go; None skips them
    pub log_dir: Option<PathBuf>,

    /// Dump contract state of every robot at teardown
    pub debug: bool,

    /// Print progress every this many ticks (0 = quiet)
    pub report_every: SimTime,
}

impl Default for SwarmSimConfig {
    fn default() -> Self {
        Self {
            ticks: 600,
            num_robots: 10,
            seed: None,
            arena: ArenaConfig::default(),
            node: NodeConfig::default(),
            peering: PeeringConfig::default(),
            contract: ContractParams::new("hello_index", 100, 1, 10),
            kills: Vec::new(),
            log_dir: None,
            debug: false,
            report_every: 100,
        }
    }
}

impl SwarmSimConfig {
    /// Get or generate seed
    pub fn resolve_seed(&self) -> [u8; 32] {
        self.seed.unwrap_or_else(|| {
            let mut temp_rng = StdRng::from_entropy();
            let mut seed = [0u8; 32];
            use rand::RngCore;
            temp_rng.fill_bytes(&mut seed);
            seed
        })
    }

    /// Contract parameters with the robot count filled in
    pub fn contract_params(&self) -> ContractParams {
        let mut params = self.contract.clone();
        if params.num_robots.is_none() {
            params.num_robots = Some(self.num_robots);
        }
        params
    }

    /// Peering settings with observation tracking set by the consensus kind
    pub fn peering_config(&self) -> PeeringConfig {
        PeeringConfig {
            track_observations: self.node.consensus.tracks_observations(),
            ..self.peering.clone()
        }
    }
}

/// Arena geometry and motion
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Side of the square arena
    pub size: f64,

    /// Robots closer than this hear each other
    pub radio_range: f64,

    /// Distance covered per tick
    pub speed: f64,

    /// Largest heading change per tick, in radians
    pub turn: f64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            size: 2.0,
            radio_range: 0.3,
            speed: 0.02,
            turn: 0.6,
        }
    }
}

impl ArenaConfig {
    /// Reject geometry the arena can not be built from
    pub fn validate(&self) -> Result<(), String> {
        if !(self.size.is_finite() && self.size > 0.0) {
            return Err(format!("arena size must be positive, got {}", self.size));
        }
        for (name, value) in [
            ("radio_range", self.radio_range),
            ("speed", self.speed),
            ("turn", self.turn),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(format!("arena {} must not be negative, got {}", name, value));
            }
        }
        Ok(())
    }
}

/// Remove `robot` at `tick`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct KillEvent {
    pub tick: SimTime,
    pub robot: RobotId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_validation() {
        assert!(ArenaConfig::default().validate().is_ok());

        for size in [0.0, -1.0, f64::NAN] {
            let arena = ArenaConfig {
                size,
                ..Default::default()
            };
            assert!(arena.validate().is_err());
        }

        let arena = ArenaConfig {
            speed: -0.1,
            ..Default::default()
        };
        assert!(arena.validate().is_err());
    }

    #[test]
    fn test_scenario_with_zero_size_is_rejected() {
        let config: SwarmSimConfig = serde_yaml::from_str("arena:\n  size: 0.0\n").unwrap();
        assert!(config.arena.validate().is_err());
    }
}
