//! Swarm simulation runner

use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sw_rust::{enode_to_id, ChainNode, RadioBeacon, RobotController, ToyNode};

use super::arena::Arena;
use super::config::SwarmSimConfig;
use super::stats::{GossipStats, RobotSummary, SimResult, TeardownStats};

/// Swarm simulation runner
pub struct SwarmRunner {
    config: SwarmSimConfig,
    rng: StdRng,
    seed: [u8; 32],

    // robot i has id i + 1
    robots: Vec<RobotController<ToyNode>>,
    // taken out before the end of the run
    removed: Vec<bool>,
    arena: Arena,

    gossip: GossipStats,
    teardown: TeardownStats,
}

// Mutable access to two different robots at once
fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

impl SwarmRunner {
    /// Create a new swarm runner
    pub fn new(config: SwarmSimConfig) -> Self {
        let seed = config.resolve_seed();
        let mut rng = StdRng::from_seed(seed);

        let params = config.contract_params();
        let peering = config.peering_config();
        let robots: Vec<RobotController<ToyNode>> = (1..=config.num_robots as u32)
            .map(|id| {
                let node = ToyNode::new(id, config.node.clone(), &params);
                RobotController::new(id, node, peering.clone())
            })
            .collect();
        let arena = Arena::scatter(config.arena.clone(), config.num_robots, &mut rng);

        Self {
            config,
            rng,
            seed,
            removed: vec![false; robots.len()],
            robots,
            arena,
            gossip: GossipStats::default(),
            teardown: TeardownStats::default(),
        }
    }

    fn alive(&self) -> Vec<bool> {
        self.robots.iter().map(|r| !r.is_killed()).collect()
    }

    fn destroy(&mut self, index: usize) {
        let log_dir = self.config.log_dir.clone();
        let debug = self.config.debug;
        let report = self.robots[index].destroy(log_dir.as_deref(), debug);

        self.teardown.robots += 1;
        self.teardown.block_rows += report.block_rows;
        self.teardown.sc_rows += report.sc_rows;
        self.teardown.errors += report.errors;
    }

    /// Main simulation loop
    pub fn run(mut self) -> SimResult {
        println!("Starting swarm simulation...");
        println!("  Robots: {}", self.config.num_robots);
        println!("  Ticks: {}", self.config.ticks);
        println!("  Seed: {:?}", self.seed);
        println!();

        for tick in 0..self.config.ticks {
            if self.config.report_every > 0 && tick % self.config.report_every == 0 && tick > 0 {
                println!("Tick {}/{}", tick, self.config.ticks);
            }

            self.apply_kills(tick);
            self.control_tick(tick);
            self.move_robots();
            self.gossip_tick();
        }

        for index in 0..self.robots.len() {
            if !self.robots[index].is_killed() {
                self.destroy(index);
            }
        }

        self.collect_results()
    }

    fn apply_kills(&mut self, tick: u64) {
        let due: Vec<u32> = self
            .config
            .kills
            .iter()
            .filter(|k| k.tick == tick)
            .map(|k| k.robot)
            .collect();

        for id in due {
            match (id as usize).checked_sub(1).filter(|i| *i < self.robots.len()) {
                Some(index) if !self.robots[index].is_killed() => {
                    info!("tick {}: removing robot {}", tick, id);
                    self.removed[index] = true;
                    self.destroy(index);
                }
                Some(_) => {}
                None => warn!("kill event names unknown robot {}", id),
            }
        }
    }

    fn control_tick(&mut self, tick: u64) {
        let alive = self.alive();
        let beacons: Vec<RadioBeacon> = self.robots.iter().map(|r| r.beacon()).collect();

        for index in 0..self.robots.len() {
            if !alive[index] {
                continue;
            }

            let neighbors: Vec<RadioBeacon> = self
                .arena
                .neighbors(index, &alive)
                .into_iter()
                .map(|j| beacons[j])
                .collect();

            let robot = &mut self.robots[index];
            if let Err(e) = robot.control_step(tick, &neighbors, &mut self.rng) {
                error!("robot {}: {}", robot.id(), e);
                self.teardown.failures += 1;
                self.removed[index] = true;
                self.destroy(index);
            }
        }
    }

    fn move_robots(&mut self) {
        for index in 0..self.robots.len() {
            if self.robots[index].is_moving() {
                self.arena.walk(index, &mut self.rng);
            }
        }
    }

    /// Every robot pulls pending transactions and heavier chains from its peers
    fn gossip_tick(&mut self) {
        for index in 0..self.robots.len() {
            if self.robots[index].is_killed() {
                continue;
            }

            let peers: Vec<usize> = self.robots[index]
                .node()
                .peers()
                .iter()
                .filter_map(|enode| enode_to_id(enode).ok())
                .filter_map(|id| (id as usize).checked_sub(1))
                .filter(|j| *j != index && *j < self.robots.len())
                .collect();

            for j in peers {
                let (me, peer) = pair_mut(&mut self.robots, index, j);
                if peer.is_killed() {
                    continue;
                }

                for tx in peer.node().pending_transactions() {
                    let before = me.node().mempool_len();
                    me.node_mut().send_transaction(tx);
                    if me.node().mempool_len() > before {
                        self.gossip.transactions += 1;
                    }
                }

                match me.node_mut().sync_from(peer.node().chain()) {
                    Ok(true) => self.gossip.syncs += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("robot {} rejected chain of {}: {}", me.id(), peer.id(), e);
                        self.gossip.rejected += 1;
                    }
                }
            }
        }
    }

    fn collect_results(&self) -> SimResult {
        let robots = self
            .robots
            .iter()
            .zip(&self.removed)
            .map(|(r, removed)| {
                let node = r.node();
                let head = node.head();
                RobotSummary {
                    id: r.id(),
                    killed: *removed,
                    height: head.height,
                    head: head.hash,
                    total_difficulty: head.total_difficulty,
                    peers: node.peers().len(),
                    mempool: node.mempool_len(),
                    produced_blocks: node.produced_blocks(),
                    confirmed_hellos: r.fsm().confirmed_hellos(),
                    balance: head.state.balance(r.id()),
                    score: head.state.score(r.id()),
                }
            })
            .collect();

        SimResult {
            seed_used: self.seed,
            ticks_completed: self.config.ticks,
            update: self
                .config
                .contract
                .update
                .clone()
                .unwrap_or_else(|| "none".to_string()),
            consensus: self.config.node.consensus,
            robots,
            gossip: self.gossip.clone(),
            teardown: self.teardown.clone(),
        }
    }
}
