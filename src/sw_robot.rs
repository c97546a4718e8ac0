//! Per-robot controller
//!
//! Owns everything one robot needs between ticks: its node, the peering
//! clock, the greeting state machine and the transaction nonce. The host
//! calls [`RobotController::control_step`] once per tick with the beacons in
//! radio range, and [`RobotController::destroy`] when the robot is removed.

use std::path::Path;

use hashbrown::HashSet;
use log::{info, warn};
use rand::Rng;

use crate::sw_enode::enode_to_id;
use crate::sw_fsm::{ExperimentFsm, ExperimentState};
use crate::sw_interface::{
    Block, BlockSelector, ChainNode, NodeError, RadioBeacon, RobotId, SimTime, TxBuilder,
};
use crate::sw_logs::{write_chain_logs, TeardownReport};
use crate::sw_peering::{led_preset, LedColor, PeeringConfig, PeeringController, PeeringOutcome};
use crate::sw_timer::Timer;

pub struct RobotController<N: ChainNode> {
    id: RobotId,
    node: N,
    peering_clock: Timer,
    peering: PeeringController,
    fsm: ExperimentFsm,
    txs: TxBuilder,
    started: bool,
    killed: bool,
    led: [LedColor; 3],
    last_peering: Option<PeeringOutcome>,
}

impl<N: ChainNode> RobotController<N> {
    pub fn new(id: RobotId, node: N, peering: PeeringConfig) -> Self {
        Self {
            id,
            node,
            peering_clock: Timer::new(peering.interval),
            peering: PeeringController::new(peering),
            fsm: ExperimentFsm::new(),
            txs: TxBuilder::new(id),
            started: false,
            killed: false,
            led: led_preset(0),
            last_peering: None,
        }
    }

    pub fn id(&self) -> RobotId {
        self.id
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut N {
        &mut self.node
    }

    pub fn state(&self) -> ExperimentState {
        self.fsm.state()
    }

    pub fn fsm(&self) -> &ExperimentFsm {
        &self.fsm
    }

    pub fn led(&self) -> [LedColor; 3] {
        self.led
    }

    pub fn last_peering(&self) -> Option<&PeeringOutcome> {
        self.last_peering.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn kill(&mut self) {
        self.killed = true;
    }

    /// Should the host keep the robot moving this tick
    pub fn is_moving(&self) -> bool {
        self.started && !self.killed && self.fsm.is_moving()
    }

    /// What this robot advertises to its radio neighbours
    pub fn beacon(&self) -> RadioBeacon {
        RadioBeacon {
            id: self.id,
            total_difficulty: self.node.total_difficulty(),
            mempool_digest: self.node.mempool_hash().digest(),
        }
    }

    /// One control tick
    ///
    /// The first call only starts the experiment. Peer table errors stop the
    /// tick and are returned; the host decides what to do with the robot.
    pub fn control_step<R: Rng + ?Sized>(
        &mut self,
        now: SimTime,
        neighbors: &[RadioBeacon],
        rng: &mut R,
    ) -> Result<(), NodeError> {
        if self.killed {
            return Ok(());
        }

        if !self.started {
            self.started = true;
            info!("robot {}: --//-- Starting Experiment --//--", self.id);
            self.peering_clock.reset();
            return Ok(());
        }

        self.node.step(now);
        self.peering_clock.step();

        if self.peering_clock.query() {
            let outcome = self.peering.pass(&mut self.node, neighbors, &mut self.txs)?;
            self.led = outcome.led;
            self.last_peering = Some(outcome);
        }

        self.fsm
            .step(&mut self.node, neighbors, &mut self.txs, rng);
        Ok(())
    }

    /// Local chain from genesis to head
    pub fn chain(&self) -> Vec<&Block> {
        let head = match self.node.block(BlockSelector::Last) {
            Some(block) => block.height,
            None => return Vec::new(),
        };
        (0..=head)
            .filter_map(|h| self.node.block(BlockSelector::Height(h)))
            .collect()
    }

    /// Transactions included more than once on the local chain
    pub fn repeated_transactions(&self) -> usize {
        let chain = self.chain();
        let mut seen = HashSet::new();
        chain
            .iter()
            .flat_map(|b| b.data.iter())
            .filter(|tx| !seen.insert(tx.id))
            .count()
    }

    /// Per-robot scores at the head, for debugging
    pub fn dump_state(&self) {
        let Some(head) = self.node.block(BlockSelector::Last) else {
            return;
        };
        let state = &head.state;
        info!(
            "robot {} state: n={} update={} balances={:?}",
            self.id, state.n, state.update, state.balances
        );

        if state.update.uses_lottery() {
            for (enode, count) in state.lottery.iter() {
                if let Ok(id) = enode_to_id(enode) {
                    info!("  {}: {}", id, count);
                }
            }
        } else {
            for (enode, value) in &state.connectivity {
                if let Ok(id) = enode_to_id(enode) {
                    info!("  {}: {}", id, value);
                }
            }
        }
    }

    /// Tear the robot down, writing what can be written
    pub fn destroy(&mut self, log_dir: Option<&Path>, debug: bool) -> TeardownReport {
        self.killed = true;

        let repeated = self.repeated_transactions();
        if repeated > 0 {
            warn!("REPEATED TRANSACTIONS ON CHAIN: #{}", repeated);
        }

        if debug {
            self.dump_state();
        }

        let report = match log_dir {
            Some(dir) => {
                let dir = dir.join(self.id.to_string());
                write_chain_logs(&dir, self.id, self.node.time(), self.chain())
            }
            None => TeardownReport::default(),
        };

        info!("Killed robot {}", self.id);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::sw_contract::ContractParams;
    use crate::sw_enode::gen_enode;
    use crate::sw_node::{NodeConfig, ToyNode};

    fn robot(id: RobotId) -> RobotController<ToyNode> {
        let node = ToyNode::new(
            id,
            NodeConfig {
                block_period: 4,
                ..Default::default()
            },
            &ContractParams::new("hello_index", 100, 1, 3),
        );
        RobotController::new(
            id,
            node,
            PeeringConfig {
                interval: 2,
                track_observations: false,
            },
        )
    }

    #[test]
    fn test_first_step_only_starts() {
        let mut r = robot(1);
        let mut rng = StdRng::seed_from_u64(0);

        r.control_step(0, &[], &mut rng).unwrap();
        assert!(r.is_started());
        assert_eq!(r.state(), ExperimentState::Idle);
        assert_eq!(r.node().time(), 0);

        r.control_step(1, &[], &mut rng).unwrap();
        assert_eq!(r.state(), ExperimentState::Random);
        assert!(r.is_moving());
    }

    #[test]
    fn test_greeting_confirmed_on_own_chain() {
        let mut r = robot(1);
        let mut rng = StdRng::seed_from_u64(0);
        let other = robot(2).beacon();

        r.control_step(0, &[], &mut rng).unwrap();
        for now in 1..=10 {
            r.control_step(now, &[other], &mut rng).unwrap();
        }

        assert!(r.fsm().confirmed_hellos() >= 1);
        assert!(r.node().state().ledger.hellos(2).len() >= 1);
        assert_eq!(r.repeated_transactions(), 0);
    }

    #[test]
    fn test_peering_runs_on_its_clock() {
        let mut r = robot(1);
        let mut rng = StdRng::seed_from_u64(0);
        let mut other = robot(2).beacon();
        // heavier chain makes robot 2 worth peering with
        other.total_difficulty = 10;

        r.control_step(0, &[], &mut rng).unwrap();
        r.control_step(1, &[other], &mut rng).unwrap();
        assert!(r.node().peers().is_empty());

        r.control_step(2, &[other], &mut rng).unwrap();
        assert!(r.node().peers().contains(&gen_enode(2)));
        assert_eq!(r.led(), led_preset(1));
    }

    #[test]
    fn test_peering_error_surfaces() {
        let mut r = robot(1);
        let mut rng = StdRng::seed_from_u64(0);
        // a beacon claiming to be ourselves
        let mut me = r.beacon();
        me.total_difficulty = 10;

        r.control_step(0, &[], &mut rng).unwrap();
        r.control_step(1, &[me], &mut rng).unwrap();
        let err = r.control_step(2, &[me], &mut rng).unwrap_err();
        assert_eq!(err, NodeError::SelfPeer(gen_enode(1)));
    }

    #[test]
    fn test_destroy_without_logs() {
        let mut r = robot(3);
        let mut rng = StdRng::seed_from_u64(0);
        r.control_step(0, &[], &mut rng).unwrap();
        for now in 1..=8 {
            r.control_step(now, &[], &mut rng).unwrap();
        }

        assert_eq!(r.chain().len(), 3);
        let report = r.destroy(None, true);
        assert_eq!(report, TeardownReport::default());
        assert!(r.is_killed());

        // killed robots ignore further ticks
        r.control_step(9, &[], &mut rng).unwrap();
        assert_eq!(r.node().time(), 8);
    }
}
