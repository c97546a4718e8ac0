//! Experiment State Machine
//!
//! A robot starts in `Idle`, wanders in `Random` until it meets somebody and
//! then greets one neighbour from `Transact`, going back to `Random` once the
//! greeting is on its chain.

use std::collections::BTreeMap;
use std::fmt;

use log::info;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::sw_interface::{
    ChainNode, RadioBeacon, RobotId, SimTime, TxBuilder, TxCall, TxId,
};

/// Minimal state machine with a payload handed over on each transition
#[derive(Debug, Clone)]
pub struct FiniteStateMachine<S> {
    prev: S,
    curr: S,
    pass_along: Option<RobotId>,
    accumulated: BTreeMap<S, SimTime>,
    entered_at: SimTime,
    transitions: u64,
    drop_resource: bool,
}

impl<S: Copy + Ord + fmt::Display> FiniteStateMachine<S> {
    pub fn new(start: S) -> Self {
        Self {
            prev: start,
            curr: start,
            pass_along: None,
            accumulated: BTreeMap::new(),
            entered_at: 0,
            transitions: 0,
            drop_resource: false,
        }
    }

    pub fn state(&self) -> S {
        self.curr
    }

    pub fn previous(&self) -> S {
        self.prev
    }

    pub fn query(&self, state: S) -> bool {
        self.curr == state
    }

    pub fn pass_along(&self) -> Option<RobotId> {
        self.pass_along
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Ticks spent in each state that has been left at least once
    pub fn timers(&self) -> &BTreeMap<S, SimTime> {
        &self.accumulated
    }

    pub fn drop_resource(&self) -> bool {
        self.drop_resource
    }

    pub fn mark_drop_resource(&mut self) {
        self.drop_resource = true;
    }

    pub fn set_state(&mut self, state: S, reason: &str, pass_along: Option<RobotId>, now: SimTime) {
        info!("{} -> {} | {}", self.curr, state, reason);
        self.drop_resource = false;

        *self.accumulated.entry(self.curr).or_insert(0) += now.saturating_sub(self.entered_at);
        self.prev = self.curr;
        self.curr = state;
        self.entered_at = now;
        self.pass_along = pass_along;
        self.transitions += 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExperimentState {
    Idle,
    Random,
    Transact,
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExperimentState::Idle => "IDLE",
            ExperimentState::Random => "RANDOM",
            ExperimentState::Transact => "TRANSACT",
        };
        f.write_str(name)
    }
}

/// The greeting loop of one robot
#[derive(Debug, Clone)]
pub struct ExperimentFsm {
    fsm: FiniteStateMachine<ExperimentState>,
    pending_hello: Option<TxId>,
    confirmed: u64,
}

impl Default for ExperimentFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentFsm {
    pub fn new() -> Self {
        Self {
            fsm: FiniteStateMachine::new(ExperimentState::Idle),
            pending_hello: None,
            confirmed: 0,
        }
    }

    pub fn state(&self) -> ExperimentState {
        self.fsm.state()
    }

    pub fn machine(&self) -> &FiniteStateMachine<ExperimentState> {
        &self.fsm
    }

    pub fn pending_hello(&self) -> Option<&TxId> {
        self.pending_hello.as_ref()
    }

    /// Greetings whose receipt has been seen
    pub fn confirmed_hellos(&self) -> u64 {
        self.confirmed
    }

    /// Robot keeps wandering in both active states
    pub fn is_moving(&self) -> bool {
        !self.fsm.query(ExperimentState::Idle)
    }

    pub fn step<N, R>(
        &mut self,
        node: &mut N,
        neighbors: &[RadioBeacon],
        txs: &mut TxBuilder,
        rng: &mut R,
    ) where
        N: ChainNode + ?Sized,
        R: Rng + ?Sized,
    {
        let now = node.time();

        if self.fsm.query(ExperimentState::Idle) {
            self.fsm.set_state(
                ExperimentState::Random,
                "Walking randomly to meet peers",
                None,
                now,
            );
        }

        if self.fsm.query(ExperimentState::Random) {
            if let Some(neighbor) = neighbors.choose(rng) {
                self.fsm.set_state(
                    ExperimentState::Transact,
                    &format!("Greeting peer {}", neighbor.id),
                    Some(neighbor.id),
                    now,
                );
            }
        } else if self.fsm.query(ExperimentState::Transact) {
            if self.pending_hello.is_none() {
                if let Some(neighbor) = self.fsm.pass_along() {
                    let tx = txs.build(TxCall::Hello { neighbor }, now);
                    self.pending_hello = Some(tx.id);
                    node.send_transaction(tx);
                }
            }

            let confirmed = self
                .pending_hello
                .as_ref()
                .is_some_and(|id| node.transaction_receipt(id).is_some());
            if confirmed {
                self.pending_hello = None;
                self.confirmed += 1;
                self.fsm
                    .set_state(ExperimentState::Random, "Transaction success", None, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::sw_enode::gen_enode;
    use crate::sw_interface::{
        Block, BlockSelector, Enode, MempoolHash, NodeError, Receipt, Transaction,
    };

    struct MockNode {
        enode: Enode,
        now: SimTime,
        sent: Vec<Transaction>,
        included: BTreeSet<TxId>,
    }

    impl MockNode {
        fn new() -> Self {
            Self {
                enode: gen_enode(1),
                now: 0,
                sent: Vec::new(),
                included: BTreeSet::new(),
            }
        }

        fn confirm_all(&mut self) {
            for tx in &self.sent {
                self.included.insert(tx.id);
            }
        }
    }

    impl ChainNode for MockNode {
        fn enode(&self) -> &Enode {
            &self.enode
        }

        fn peers(&self) -> BTreeSet<Enode> {
            BTreeSet::new()
        }

        fn add_peer(&mut self, _enode: &Enode) -> Result<(), NodeError> {
            Ok(())
        }

        fn remove_peer(&mut self, _enode: &Enode) -> Result<(), NodeError> {
            Ok(())
        }

        fn total_difficulty(&self) -> u64 {
            0
        }

        fn mempool_hash(&self) -> MempoolHash {
            MempoolHash([0u8; 32])
        }

        fn send_transaction(&mut self, tx: Transaction) {
            self.sent.push(tx);
        }

        fn transaction_receipt(&self, tx_id: &TxId) -> Option<Receipt> {
            self.included.get(tx_id).map(|id| Receipt {
                tx_id: *id,
                block_height: 1,
                block_hash: [1u8; 32],
            })
        }

        fn block(&self, _selector: BlockSelector) -> Option<&Block> {
            None
        }

        fn time(&self) -> SimTime {
            self.now
        }

        fn step(&mut self, now: SimTime) {
            self.now = now;
        }
    }

    fn neighbor(id: RobotId) -> RadioBeacon {
        RadioBeacon {
            id,
            total_difficulty: 0,
            mempool_digest: 0,
        }
    }

    #[test]
    fn test_idle_goes_random_without_neighbors() {
        let mut node = MockNode::new();
        let mut fsm = ExperimentFsm::new();
        let mut txs = TxBuilder::new(1);
        let mut rng = StdRng::seed_from_u64(1);

        fsm.step(&mut node, &[], &mut txs, &mut rng);
        assert_eq!(fsm.state(), ExperimentState::Random);

        fsm.step(&mut node, &[], &mut txs, &mut rng);
        assert_eq!(fsm.state(), ExperimentState::Random);
        assert!(node.sent.is_empty());
    }

    #[test]
    fn test_single_neighbor_is_carried_into_transact() {
        let mut node = MockNode::new();
        let mut fsm = ExperimentFsm::new();
        let mut txs = TxBuilder::new(1);
        let mut rng = StdRng::seed_from_u64(7);

        fsm.step(&mut node, &[neighbor(4)], &mut txs, &mut rng);
        assert_eq!(fsm.state(), ExperimentState::Transact);
        assert_eq!(fsm.machine().pass_along(), Some(4));
        assert_eq!(fsm.machine().previous(), ExperimentState::Random);
        assert_eq!(fsm.machine().transitions(), 2);
    }

    #[test]
    fn test_at_most_one_outstanding_hello() {
        let mut node = MockNode::new();
        let mut fsm = ExperimentFsm::new();
        let mut txs = TxBuilder::new(1);
        let mut rng = StdRng::seed_from_u64(7);

        fsm.step(&mut node, &[neighbor(4)], &mut txs, &mut rng);
        node.step(5);
        fsm.step(&mut node, &[neighbor(4)], &mut txs, &mut rng);
        node.step(6);
        fsm.step(&mut node, &[neighbor(4)], &mut txs, &mut rng);

        assert_eq!(node.sent.len(), 1);
        assert_eq!(node.sent[0].call, TxCall::Hello { neighbor: 4 });
        assert_eq!(node.sent[0].timestamp, 5);
        assert_eq!(fsm.pending_hello(), Some(&node.sent[0].id));
        assert_eq!(fsm.state(), ExperimentState::Transact);
    }

    #[test]
    fn test_receipt_returns_to_random() {
        let mut node = MockNode::new();
        let mut fsm = ExperimentFsm::new();
        let mut txs = TxBuilder::new(1);
        let mut rng = StdRng::seed_from_u64(3);

        fsm.step(&mut node, &[neighbor(2)], &mut txs, &mut rng);
        node.step(4);
        fsm.step(&mut node, &[neighbor(2)], &mut txs, &mut rng);
        node.confirm_all();
        node.step(9);
        fsm.step(&mut node, &[], &mut txs, &mut rng);

        assert_eq!(fsm.state(), ExperimentState::Random);
        assert!(fsm.pending_hello().is_none());
        assert_eq!(fsm.confirmed_hellos(), 1);
        assert_eq!(fsm.machine().pass_along(), None);
        assert_eq!(fsm.machine().timers()[&ExperimentState::Transact], 9);
    }

    #[test]
    fn test_transition_clears_drop_resource() {
        let mut machine = FiniteStateMachine::new(ExperimentState::Idle);
        machine.mark_drop_resource();
        assert!(machine.drop_resource());

        machine.set_state(ExperimentState::Random, "go", None, 3);
        assert!(!machine.drop_resource());
        assert_eq!(machine.timers()[&ExperimentState::Idle], 3);
    }
}
