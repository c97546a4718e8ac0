//! Statistics and results for the swarm simulator

use std::collections::BTreeMap;

use sw_rust::sw_interface::{short_hex, HashBytes};
use sw_rust::{ConsensusKind, RobotId, SimTime};

/// Simulation result
#[derive(Debug)]
pub struct SimResult {
    /// Seed used for the simulation
    pub seed_used: [u8; 32],

    /// Number of ticks completed
    pub ticks_completed: SimTime,

    /// Update strategy of the contract
    pub update: String,

    pub consensus: ConsensusKind,

    /// Final state of every robot, by id
    pub robots: Vec<RobotSummary>,

    pub gossip: GossipStats,

    /// Rows written and errors hit while tearing robots down
    pub teardown: TeardownStats,
}

/// Final state of one robot
#[derive(Debug, Clone)]
pub struct RobotSummary {
    pub id: RobotId,
    pub killed: bool,
    pub height: u64,
    pub head: HashBytes,
    pub total_difficulty: u64,
    pub peers: usize,
    pub mempool: usize,
    pub produced_blocks: u64,
    pub confirmed_hellos: u64,
    pub balance: u64,
    pub score: u64,
}

#[derive(Debug, Default, Clone)]
pub struct GossipStats {
    /// Transactions copied between mempools
    pub transactions: usize,

    /// Times a robot switched to a peer's chain
    pub syncs: usize,

    /// Peer chains that failed validation
    pub rejected: usize,
}

#[derive(Debug, Default, Clone)]
pub struct TeardownStats {
    pub robots: usize,
    pub block_rows: usize,
    pub sc_rows: usize,
    pub errors: usize,
    /// Robots removed because their peering failed
    pub failures: usize,
}

impl SimResult {
    /// Robots still running, and how many of them share the most common head
    pub fn head_agreement(&self) -> (usize, usize) {
        let mut heads: BTreeMap<HashBytes, usize> = BTreeMap::new();
        let mut alive = 0;
        for robot in self.robots.iter().filter(|r| !r.killed) {
            alive += 1;
            *heads.entry(robot.head).or_insert(0) += 1;
        }
        (alive, heads.values().copied().max().unwrap_or(0))
    }

    /// Print a summary of the simulation results
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║        Swarm Simulation Results                        ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Configuration:");
        println!("  Seed: {:?}", self.seed_used);
        println!("  Ticks: {}", self.ticks_completed);
        println!("  Update: {}", self.update);
        println!("  Consensus: {:?}\n", self.consensus);

        let (alive, agreeing) = self.head_agreement();
        let heights: Vec<u64> = self.robots.iter().map(|r| r.height).collect();
        println!("Chain Statistics:");
        println!(
            "  Robots alive: {}/{}",
            alive,
            self.robots.len()
        );
        if let (Some(min), Some(max)) = (heights.iter().min(), heights.iter().max()) {
            let avg = heights.iter().sum::<u64>() as f64 / heights.len() as f64;
            println!("  Heights: min={}, max={}, avg={:.1}", min, max, avg);
        }
        println!("  Head agreement: {}/{}", agreeing, alive);
        println!(
            "  Confirmed greetings: {}",
            self.robots.iter().map(|r| r.confirmed_hellos).sum::<u64>()
        );
        println!();

        println!("Gossip Statistics:");
        println!("  Transactions relayed: {}", self.gossip.transactions);
        println!("  Chain switches: {}", self.gossip.syncs);
        println!("  Rejected chains: {}", self.gossip.rejected);
        println!();

        if self.teardown.robots > 0 {
            println!("Teardown:");
            println!("  Robots: {}", self.teardown.robots);
            println!("  Peering failures: {}", self.teardown.failures);
            println!(
                "  Rows written: block={}, sc={}",
                self.teardown.block_rows, self.teardown.sc_rows
            );
            println!("  Errors: {}", self.teardown.errors);
            println!();
        }

        println!("Robots:");
        println!(
            "  {:>4} {:>6} {:>6} {:>5} {:>5} {:>6} {:>7} {:>6}  {}",
            "ID", "HEIGHT", "TDIFF", "PEERS", "HELLO", "BLOCKS", "BALANCE", "SCORE", "HEAD"
        );
        for r in &self.robots {
            println!(
                "  {:>4} {:>6} {:>6} {:>5} {:>5} {:>6} {:>7} {:>6}  {}{}",
                r.id,
                r.height,
                r.total_difficulty,
                r.peers,
                r.confirmed_hellos,
                r.produced_blocks,
                r.balance,
                r.score,
                short_hex(&r.head),
                if r.killed { " (killed)" } else { "" }
            );
        }
        println!();
    }
}
