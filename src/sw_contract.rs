//! Smart-contract state carried in every block
//!
//! The contract owns the balances, the interaction ledger and whichever
//! score map its update strategy maintains. A node applies each block by
//! running the block's transactions through [`Contract::apply`] in order and
//! then asking [`Contract::get_block_reward`] for the producer reward, which
//! refreshes the scores first. Given the same parent state and the same
//! block, every node ends up with the same contract.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::sw_enode::gen_enode;
use crate::sw_estimator::{ConnectivityMap, Estimator, Lottery, UpdateStrategy};
use crate::sw_interface::{BlockContext, HashBytes, RobotId, SimTime, Transaction, TxCall};
use crate::sw_ledger::InteractionLedger;

/// Contract parameters as they come from a scenario file
///
/// Every field is optional so that a partial configuration still yields a
/// contract. Missing values are reported once at construction and the
/// features depending on them turn into no-ops.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractParams {
    pub update: Option<String>,
    pub decay: Option<SimTime>,
    pub trans_reward: Option<u64>,
    pub num_robots: Option<usize>,

    /// Give every robot one lottery ticket at genesis
    #[serde(default = "default_seed_lottery")]
    pub seed_lottery: bool,
}

fn default_seed_lottery() -> bool {
    true
}

impl Default for ContractParams {
    fn default() -> Self {
        Self {
            update: None,
            decay: None,
            trans_reward: None,
            num_robots: None,
            seed_lottery: default_seed_lottery(),
        }
    }
}

impl ContractParams {
    pub fn new(update: &str, decay: SimTime, trans_reward: u64, num_robots: usize) -> Self {
        Self {
            update: Some(update.to_string()),
            decay: Some(decay),
            trans_reward: Some(trans_reward),
            num_robots: Some(num_robots),
            seed_lottery: true,
        }
    }

    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.update.is_none() {
            missing.push("update");
        }
        if self.decay.is_none() {
            missing.push("decay");
        }
        if self.trans_reward.is_none() {
            missing.push("trans_reward");
        }
        if self.num_robots.is_none() {
            missing.push("num_robots");
        }
        missing
    }
}

/// Caller information for a contract call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgContext {
    pub sender: RobotId,
    pub timestamp: SimTime,
}

impl From<&Transaction> for MsgContext {
    fn from(tx: &Transaction) -> Self {
        Self {
            sender: tx.sender,
            timestamp: tx.timestamp,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Applied transactions
    pub n: u64,
    pub private: BTreeMap<String, String>,
    pub balances: BTreeMap<RobotId, u64>,

    pub ledger: InteractionLedger,
    pub connectivity: ConnectivityMap,
    pub lottery: Lottery,

    pub trans_reward: Option<u64>,
    pub decay: Option<SimTime>,
    pub update: UpdateStrategy,

    /// Calls naming a robot outside `1..=num_robots` are skipped
    #[serde(default)]
    pub num_robots: Option<usize>,
}

impl Contract {
    /// Genesis state for the given parameters
    pub fn new(params: &ContractParams) -> Self {
        for key in params.missing() {
            warn!(
                "Missing required parameter scs.{} for initializing smart contract state variables",
                key
            );
        }

        let robots = 1..=params.num_robots.unwrap_or(0) as RobotId;

        let update = match &params.update {
            Some(name) => UpdateStrategy::from(name.as_str()),
            None => UpdateStrategy::None,
        };
        if let UpdateStrategy::Unrecognized(name) = &update {
            warn!("unknown update strategy \"{}\", scores will not change", name);
        }

        let lottery = if params.seed_lottery {
            Lottery::seeded(robots.clone())
        } else {
            Lottery::new()
        };

        Self {
            n: 0,
            private: BTreeMap::new(),
            balances: BTreeMap::new(),
            ledger: InteractionLedger::new(),
            connectivity: robots.map(|id| (gen_enode(id), 0)).collect(),
            lottery,
            trans_reward: params.trans_reward,
            decay: params.decay,
            update,
            num_robots: params.num_robots,
        }
    }

    /// Rebuild a contract from a snapshot taken with [`Contract::snapshot`]
    pub fn restore(snapshot: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(snapshot)
    }

    pub fn snapshot(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    fn is_known_robot(&self, id: RobotId) -> bool {
        match self.num_robots {
            Some(count) => id >= 1 && (id as usize) <= count,
            None => id >= 1,
        }
    }

    /// Run one transaction against the state
    pub fn apply(&mut self, tx: &Transaction) {
        let subject = match tx.call {
            TxCall::Hello { neighbor } => neighbor,
            TxCall::AddPeer { peer } => peer,
        };
        if !self.is_known_robot(tx.sender) || !self.is_known_robot(subject) {
            warn!(
                "skipping {}({}) from robot {}: unknown robot id",
                tx.call.name(),
                subject,
                tx.sender
            );
            return;
        }

        let msg = MsgContext::from(tx);
        match tx.call {
            TxCall::Hello { neighbor } => self.hello(&msg, neighbor),
            TxCall::AddPeer { peer } => self.add_peer(&msg, peer),
        }
        self.n += 1;
    }

    pub fn hello(&mut self, msg: &MsgContext, neighbor: RobotId) {
        self.ledger.record_hello(neighbor, msg.sender, msg.timestamp);
    }

    pub fn add_peer(&mut self, msg: &MsgContext, peer: RobotId) {
        self.ledger.record_peer(msg.sender, peer, msg.timestamp);
    }

    /// Reward for producing `block`; refreshes the scores first
    pub fn get_block_reward(&mut self, block: &BlockContext) -> u64 {
        self.update_scores(block);

        match self.trans_reward {
            Some(reward) => block.tx_count as u64 * reward,
            None => {
                warn!("get_block_reward called without trans_reward, paying nothing");
                0
            }
        }
    }

    pub fn update_scores(&mut self, block: &BlockContext) {
        let estimator = Estimator {
            ledger: &self.ledger,
            balances: &self.balances,
            decay: self.decay,
            trans_reward: self.trans_reward,
        };

        debug!(
            "updating scores with {} at height {} (t={})",
            self.update, block.height, block.timestamp
        );
        estimator.update(
            &self.update,
            block,
            &mut self.connectivity,
            &mut self.lottery,
        );
    }

    pub fn credit(&mut self, robot: RobotId, amount: u64) {
        *self.balances.entry(robot).or_insert(0) += amount;
    }

    pub fn balance(&self, robot: RobotId) -> u64 {
        self.balances.get(&robot).copied().unwrap_or(0)
    }

    /// Score of a robot under the active strategy
    pub fn score(&self, robot: RobotId) -> u64 {
        let enode = gen_enode(robot);
        if self.update.uses_lottery() {
            self.lottery.tickets(&enode)
        } else {
            self.connectivity.get(&enode).copied().unwrap_or(0)
        }
    }

    /// Canonical hash over every field
    pub fn state_hash(&self) -> HashBytes {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.n.to_le_bytes());

        hasher.update(&(self.private.len() as u64).to_le_bytes());
        for (key, value) in &self.private {
            hasher.update(key.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.as_bytes());
            hasher.update(&[0]);
        }

        hasher.update(&(self.balances.len() as u64).to_le_bytes());
        for (robot, balance) in &self.balances {
            hasher.update(&robot.to_le_bytes());
            hasher.update(&balance.to_le_bytes());
        }

        self.ledger.feed_hash(&mut hasher);

        hasher.update(&(self.connectivity.len() as u64).to_le_bytes());
        for (enode, value) in &self.connectivity {
            hasher.update(enode.as_bytes());
            hasher.update(&value.to_le_bytes());
        }

        self.lottery.feed_hash(&mut hasher);

        hasher.update(&self.trans_reward.unwrap_or(u64::MAX).to_le_bytes());
        hasher.update(&self.decay.unwrap_or(u64::MAX).to_le_bytes());
        hasher.update(self.update.name().as_bytes());
        hasher.update(&(self.num_robots.unwrap_or(usize::MAX) as u64).to_le_bytes());

        *hasher.finalize().as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_tx(sender: RobotId, neighbor: RobotId, timestamp: SimTime) -> Transaction {
        Transaction::new(sender, TxCall::Hello { neighbor }, timestamp, 0)
    }

    fn block(tx_count: usize, timestamp: SimTime) -> BlockContext {
        BlockContext {
            height: 1,
            timestamp,
            miner: 1,
            tx_count,
        }
    }

    #[test]
    fn test_genesis_layout() {
        let contract = Contract::new(&ContractParams::new("hello_index", 50, 1, 3));

        assert_eq!(contract.connectivity.len(), 3);
        assert!(contract.connectivity.values().all(|v| *v == 0));
        assert_eq!(contract.lottery.total(), 3);
        assert_eq!(contract.update, UpdateStrategy::HelloIndex);
        assert_eq!(contract.n, 0);
    }

    #[test]
    fn test_missing_params_degrade() {
        let mut contract = Contract::new(&ContractParams::default());

        contract.apply(&hello_tx(2, 1, 10));
        assert_eq!(contract.ledger.hellos(1).len(), 1);

        // no strategy, no reward, no panic
        assert_eq!(contract.get_block_reward(&block(1, 20)), 0);
        assert!(contract.connectivity.is_empty());
    }

    #[test]
    fn test_hello_index_without_decay_is_noop() {
        let params = ContractParams {
            decay: None,
            ..ContractParams::new("hello_index", 50, 1, 3)
        };
        let mut contract = Contract::new(&params);
        contract.apply(&hello_tx(2, 1, 10));
        contract.apply(&hello_tx(3, 1, 12));

        // reward still paid, scores untouched
        assert_eq!(contract.get_block_reward(&block(2, 20)), 2);
        assert!(contract.connectivity.values().all(|v| *v == 0));
        assert_eq!(contract.score(1), 0);
    }

    #[test]
    fn test_unknown_robot_ids_are_skipped() {
        let mut contract = Contract::new(&ContractParams::new("hello_index", 50, 1, 3));
        contract.apply(&hello_tx(2, RobotId::MAX, 10));
        contract.apply(&hello_tx(2, 0, 10));
        contract.apply(&hello_tx(4, 1, 10));
        contract.apply(&Transaction::new(1, TxCall::AddPeer { peer: 9 }, 10, 0));

        assert_eq!(contract.n, 0);
        assert_eq!(contract.ledger.total_hellos(), 0);
        contract.get_block_reward(&block(4, 20));
        assert_eq!(contract.connectivity.len(), 3);

        // a valid call after the bad ones still lands
        contract.apply(&hello_tx(2, 1, 15));
        contract.get_block_reward(&block(1, 20));
        assert_eq!(contract.score(1), 1);
    }

    #[test]
    fn test_reward_is_tx_count_times_reward() {
        let mut contract = Contract::new(&ContractParams::new("none", 50, 3, 2));
        assert_eq!(contract.get_block_reward(&block(0, 5)), 0);
        assert_eq!(contract.get_block_reward(&block(4, 5)), 12);
    }

    #[test]
    fn test_reward_updates_connectivity() {
        // 3 robots, decay 30, hellos at t=10 and t=40, block at t=55
        let mut contract = Contract::new(&ContractParams::new("hello_index", 30, 1, 3));
        let txs = [hello_tx(2, 1, 10), hello_tx(2, 1, 40)];
        for tx in &txs {
            contract.apply(tx);
        }

        let reward = contract.get_block_reward(&block(txs.len(), 55));

        assert_eq!(reward, 2);
        assert_eq!(contract.connectivity[&gen_enode(1)], 1);
        assert_eq!(contract.connectivity[&gen_enode(2)], 0);
        assert_eq!(contract.score(1), 1);
        assert_eq!(contract.n, 2);
    }

    #[test]
    fn test_wider_window_keeps_both_hellos() {
        let mut contract = Contract::new(&ContractParams::new("hello_index", 50, 1, 3));
        contract.apply(&hello_tx(2, 1, 10));
        contract.apply(&hello_tx(2, 1, 40));

        contract.get_block_reward(&block(2, 55));
        assert_eq!(contract.score(1), 2);
    }

    #[test]
    fn test_add_peer_feeds_peer_index() {
        let mut contract = Contract::new(&ContractParams::new("peer_index", 50, 1, 3));
        contract.apply(&Transaction::new(1, TxCall::AddPeer { peer: 2 }, 10, 0));
        contract.apply(&Transaction::new(3, TxCall::AddPeer { peer: 2 }, 11, 0));

        contract.update_scores(&block(2, 20));
        assert_eq!(contract.score(2), 2);
        assert_eq!(contract.score(1), 0);
    }

    #[test]
    fn test_state_hash_tracks_every_change() {
        let params = ContractParams::new("hello_index", 50, 1, 3);
        let a = Contract::new(&params);
        let mut b = Contract::new(&params);
        assert_eq!(a.state_hash(), b.state_hash());

        b.credit(1, 1);
        assert_ne!(a.state_hash(), b.state_hash());

        let mut c = Contract::new(&params);
        c.apply(&hello_tx(2, 1, 10));
        assert_ne!(a.state_hash(), c.state_hash());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut contract = Contract::new(&ContractParams::new("market_share", 50, 1, 3));
        contract.apply(&hello_tx(2, 1, 10));
        contract.credit(2, 7);
        contract.private.insert("note".to_string(), "x".to_string());

        let snapshot = contract.snapshot().unwrap();
        let restored = Contract::restore(&snapshot).unwrap();

        assert_eq!(restored, contract);
        assert_eq!(restored.state_hash(), contract.state_hash());
        assert_eq!(restored.update, UpdateStrategy::MarketShare);
    }
}
