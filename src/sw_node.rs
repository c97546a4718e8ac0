//! In-memory reference node
//!
//! `ToyNode` keeps a single linear chain, a mempool and a peer table. Every
//! `block_period` ticks it seals whatever is pending into a block. Blocks
//! carry the contract state they produce, and a block from somebody else is
//! only accepted after re-executing it on top of its parent and getting the
//! same state hash. The heavier chain (by total difficulty) wins.

use std::collections::BTreeSet;
use std::fmt;

use hashbrown::{HashMap, HashSet};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::sw_contract::{Contract, ContractParams};
use crate::sw_enode::{enode_to_id, gen_enode};
use crate::sw_interface::{
    short_hex, Block, BlockContext, BlockSelector, ChainNode, Enode, HashBytes, MempoolHash,
    NodeError, Receipt, RobotId, SimTime, Transaction, TxId, DEFAULT_BLOCK_PERIOD, GENESIS_HASH,
};
use crate::sw_timer::Timer;

/// Difficulty of a block sealed by the producer whose turn it is
pub const DIFF_IN_TURN: u64 = 2;
pub const DIFF_NO_TURN: u64 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusKind {
    /// Producers take turns by height
    #[default]
    Authority,
    /// Highest connectivity score in the parent state is in turn
    Connection,
    /// Lottery draw seeded by the parent hash picks who is in turn
    Stake,
}

impl ConsensusKind {
    /// Robots under this consensus report their peers on chain
    pub fn tracks_observations(&self) -> bool {
        matches!(self, ConsensusKind::Connection)
    }

    /// Difficulty `miner` earns for sealing on top of `parent`
    pub fn difficulty(&self, parent: &Block, miner: RobotId, num_robots: usize) -> u64 {
        let in_turn = match self {
            ConsensusKind::Authority => {
                let n = num_robots.max(1) as u64;
                (parent.height + 1) % n == miner as u64 % n
            }
            ConsensusKind::Connection => most_connected(&parent.state) == Some(miner),
            ConsensusKind::Stake => {
                let seed = u64::from_le_bytes(head_bytes(&parent.hash));
                parent.state.lottery.draw(seed) == Some(&gen_enode(miner))
            }
        };

        if in_turn {
            DIFF_IN_TURN
        } else {
            DIFF_NO_TURN
        }
    }
}

fn head_bytes(hash: &HashBytes) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

// highest score, lowest id on ties
fn most_connected(state: &Contract) -> Option<RobotId> {
    state
        .connectivity
        .iter()
        .filter_map(|(enode, score)| enode_to_id(enode).ok().map(|id| (id, *score)))
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(id, _)| id)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub block_period: SimTime,
    pub consensus: ConsensusKind,
    pub mining: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            block_period: DEFAULT_BLOCK_PERIOD,
            consensus: ConsensusKind::default(),
            mining: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Remote chain does not share our genesis
    ForeignGenesis,
    /// Block at this height does not link to the block before it
    BrokenLink(u64),
    /// Re-executing the block gave a different result
    InvalidBlock(u64),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::ForeignGenesis => write!(f, "remote chain has a different genesis"),
            ChainError::BrokenLink(height) => write!(f, "block {} does not link to its parent", height),
            ChainError::InvalidBlock(height) => write!(f, "block {} failed re-execution", height),
        }
    }
}

impl std::error::Error for ChainError {}

/// Block 0, identical for every robot sharing `params`
pub fn genesis_block(params: &ContractParams) -> Block {
    let state = Contract::new(params);
    let hash = Block::compute_hash(0, 0, 0, DIFF_NO_TURN, &GENESIS_HASH, &[], &state.state_hash());

    Block {
        height: 0,
        timestamp: 0,
        miner: 0,
        difficulty: DIFF_NO_TURN,
        total_difficulty: DIFF_NO_TURN,
        parent_hash: GENESIS_HASH,
        hash,
        data: Vec::new(),
        reception: 0,
        state,
    }
}

/// Apply `data` on top of `parent` and seal the result
pub fn execute_block(
    parent: &Block,
    miner: RobotId,
    timestamp: SimTime,
    data: Vec<Transaction>,
    difficulty: u64,
) -> Block {
    let mut state = parent.state.clone();
    for tx in &data {
        state.apply(tx);
    }

    let height = parent.height + 1;
    let context = BlockContext {
        height,
        timestamp,
        miner,
        tx_count: data.len(),
    };
    let reward = state.get_block_reward(&context);
    state.credit(miner, reward);

    let hash = Block::compute_hash(
        height,
        timestamp,
        miner,
        difficulty,
        &parent.hash,
        &data,
        &state.state_hash(),
    );

    Block {
        height,
        timestamp,
        miner,
        difficulty,
        total_difficulty: parent.total_difficulty + difficulty,
        parent_hash: parent.hash,
        hash,
        data,
        reception: timestamp,
        state,
    }
}

pub struct ToyNode {
    id: RobotId,
    enode: Enode,
    config: NodeConfig,
    num_robots: usize,

    chain: Vec<Block>,
    mempool: HashMap<TxId, Transaction>,
    // included tx -> height
    tx_index: HashMap<TxId, u64>,
    peers: BTreeSet<Enode>,

    block_timer: Timer,
    now: SimTime,
    produced: u64,
}

impl ToyNode {
    pub fn new(id: RobotId, config: NodeConfig, params: &ContractParams) -> Self {
        let block_timer = Timer::new(config.block_period);
        Self {
            id,
            enode: gen_enode(id),
            num_robots: params.num_robots.unwrap_or(1),
            config,
            chain: vec![genesis_block(params)],
            mempool: HashMap::new(),
            tx_index: HashMap::new(),
            peers: BTreeSet::new(),
            block_timer,
            now: 0,
            produced: 0,
        }
    }

    pub fn id(&self) -> RobotId {
        self.id
    }

    pub fn consensus(&self) -> ConsensusKind {
        self.config.consensus
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn head(&self) -> &Block {
        // chain always holds genesis
        &self.chain[self.chain.len() - 1]
    }

    /// Contract state at the head of the chain
    pub fn state(&self) -> &Contract {
        &self.head().state
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.len()
    }

    /// Pending transactions in canonical order
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        let mut pending: Vec<Transaction> = self.mempool.values().cloned().collect();
        pending.sort_by(|a, b| {
            (a.timestamp, a.sender, a.nonce, a.id).cmp(&(b.timestamp, b.sender, b.nonce, b.id))
        });
        pending
    }

    pub fn all_transactions(&self) -> Vec<&Transaction> {
        self.chain.iter().flat_map(|b| b.data.iter()).collect()
    }

    /// Transactions that appear on the chain more than once
    pub fn repeated_transactions(&self) -> usize {
        let all = self.all_transactions();
        let unique: HashSet<&TxId> = all.iter().map(|tx| &tx.id).collect();
        all.len() - unique.len()
    }

    pub fn produced_blocks(&self) -> u64 {
        self.produced
    }

    pub fn is_mining(&self) -> bool {
        self.config.mining
    }

    pub fn start_mining(&mut self) {
        self.config.mining = true;
        self.block_timer.reset();
    }

    pub fn stop_mining(&mut self) {
        self.config.mining = false;
    }

    /// Seal the mempool into a new head block
    pub fn produce_block(&mut self) -> &Block {
        let data = self.pending_transactions();
        let parent = self.head();
        let difficulty = self
            .config
            .consensus
            .difficulty(parent, self.id, self.num_robots);
        let block = execute_block(parent, self.id, self.now, data, difficulty);

        debug!(
            "robot {} sealed block {} ({} txs, diff {}) {}",
            self.id,
            block.height,
            block.data.len(),
            block.difficulty,
            short_hex(&block.hash)
        );

        for tx in &block.data {
            self.mempool.remove(&tx.id);
            self.tx_index.insert(tx.id, block.height);
        }
        self.produced += 1;
        self.chain.push(block);
        self.head()
    }

    fn validate(&self, parent: &Block, block: &Block) -> Result<Block, ChainError> {
        if block.parent_hash != parent.hash || block.height != parent.height + 1 {
            return Err(ChainError::BrokenLink(block.height));
        }

        let difficulty = self
            .config
            .consensus
            .difficulty(parent, block.miner, self.num_robots);
        let mut replayed = execute_block(
            parent,
            block.miner,
            block.timestamp,
            block.data.clone(),
            difficulty,
        );

        if replayed.hash != block.hash
            || replayed.total_difficulty != block.total_difficulty
            || !block.verify_hash()
        {
            return Err(ChainError::InvalidBlock(block.height));
        }

        replayed.reception = self.now;
        Ok(replayed)
    }

    /// Adopt `remote` if it is strictly heavier than the local chain
    ///
    /// Every block past the fork point is re-executed; on any mismatch the
    /// local chain is left untouched. Returns whether the head moved.
    pub fn sync_from(&mut self, remote: &[Block]) -> Result<bool, ChainError> {
        let remote_head = match remote.last() {
            Some(block) => block,
            None => return Ok(false),
        };
        if remote_head.total_difficulty <= self.head().total_difficulty {
            return Ok(false);
        }
        if remote[0].hash != self.chain[0].hash {
            return Err(ChainError::ForeignGenesis);
        }

        let fork = self
            .chain
            .iter()
            .zip(remote.iter())
            .take_while(|(local, other)| local.hash == other.hash)
            .count()
            - 1;

        let mut adopted: Vec<Block> = Vec::with_capacity(remote.len() - fork - 1);
        for block in &remote[fork + 1..] {
            let next = {
                let parent = adopted.last().unwrap_or(&self.chain[fork]);
                self.validate(parent, block)?
            };
            adopted.push(next);
        }

        let orphaned: Vec<Block> = self.chain.split_off(fork + 1);
        self.chain.extend(adopted);

        self.tx_index = self
            .chain
            .iter()
            .flat_map(|b| b.data.iter().map(move |tx| (tx.id, b.height)))
            .collect();

        let mut returned = 0;
        for tx in orphaned.into_iter().flat_map(|b| b.data) {
            if !self.tx_index.contains_key(&tx.id) {
                self.mempool.insert(tx.id, tx);
                returned += 1;
            }
        }
        let tx_index = &self.tx_index;
        self.mempool.retain(|id, _| !tx_index.contains_key(id));

        info!(
            "robot {} synced to height {} (fork at {}, {} txs back to mempool)",
            self.id,
            self.head().height,
            fork,
            returned
        );
        Ok(true)
    }
}

impl ChainNode for ToyNode {
    fn enode(&self) -> &Enode {
        &self.enode
    }

    fn peers(&self) -> BTreeSet<Enode> {
        self.peers.clone()
    }

    fn add_peer(&mut self, enode: &Enode) -> Result<(), NodeError> {
        if *enode == self.enode {
            return Err(NodeError::SelfPeer(enode.clone()));
        }
        enode_to_id(enode)?;
        if !self.peers.insert(enode.clone()) {
            return Err(NodeError::AlreadyPeered(enode.clone()));
        }
        Ok(())
    }

    fn remove_peer(&mut self, enode: &Enode) -> Result<(), NodeError> {
        if !self.peers.remove(enode) {
            return Err(NodeError::UnknownPeer(enode.clone()));
        }
        Ok(())
    }

    fn total_difficulty(&self) -> u64 {
        self.head().total_difficulty
    }

    fn mempool_hash(&self) -> MempoolHash {
        let mut ids: Vec<&TxId> = self.mempool.keys().collect();
        ids.sort();

        let mut hasher = blake3::Hasher::new();
        for id in ids {
            hasher.update(id);
        }
        MempoolHash(*hasher.finalize().as_bytes())
    }

    fn send_transaction(&mut self, tx: Transaction) {
        if self.tx_index.contains_key(&tx.id) || self.mempool.contains_key(&tx.id) {
            debug!("robot {} already holds {}", self.id, short_hex(&tx.id));
            return;
        }
        self.mempool.insert(tx.id, tx);
    }

    fn transaction_receipt(&self, tx_id: &TxId) -> Option<Receipt> {
        let height = *self.tx_index.get(tx_id)?;
        let block = self.chain.get(height as usize)?;
        Some(Receipt {
            tx_id: *tx_id,
            block_height: height,
            block_hash: block.hash,
        })
    }

    fn block(&self, selector: BlockSelector) -> Option<&Block> {
        match selector {
            BlockSelector::Last => self.chain.last(),
            BlockSelector::Height(height) => self.chain.get(height as usize),
        }
    }

    fn time(&self) -> SimTime {
        self.now
    }

    fn step(&mut self, now: SimTime) {
        self.now = now;
        self.block_timer.step();
        if self.config.mining && self.block_timer.query() {
            self.produce_block();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sw_interface::{TxBuilder, TxCall};

    fn params() -> ContractParams {
        ContractParams::new("hello_index", 100, 1, 2)
    }

    fn node(id: RobotId) -> ToyNode {
        ToyNode::new(
            id,
            NodeConfig {
                block_period: 3,
                ..Default::default()
            },
            &params(),
        )
    }

    #[test]
    fn test_genesis_shared() {
        let a = node(1);
        let b = node(2);
        assert_eq!(a.head().hash, b.head().hash);
        assert_eq!(a.total_difficulty(), 1);
        assert!(a.head().verify_hash());
    }

    #[test]
    fn test_receipt_after_inclusion() {
        let mut a = node(1);
        let mut txs = TxBuilder::new(1);
        let tx = txs.build(TxCall::Hello { neighbor: 2 }, 0);
        let id = tx.id;
        a.send_transaction(tx.clone());
        assert!(a.transaction_receipt(&id).is_none());
        assert_eq!(a.mempool_len(), 1);

        for now in 1..=3 {
            a.step(now);
        }

        let receipt = a.transaction_receipt(&id).unwrap();
        assert_eq!(receipt.block_height, 1);
        assert_eq!(receipt.block_hash, a.head().hash);
        assert_eq!(a.mempool_len(), 0);
        assert_eq!(a.state().ledger.hellos(2).len(), 1);

        // reward of one tx goes to the producer
        assert_eq!(a.state().balance(1), 1);

        // resubmitting an included tx is ignored
        a.send_transaction(tx);
        assert_eq!(a.mempool_len(), 0);
    }

    #[test]
    fn test_peer_table_errors() {
        let mut a = node(1);
        assert_eq!(
            a.add_peer(&gen_enode(1)),
            Err(NodeError::SelfPeer(gen_enode(1)))
        );
        assert!(a.add_peer(&gen_enode(2)).is_ok());
        assert_eq!(
            a.add_peer(&gen_enode(2)),
            Err(NodeError::AlreadyPeered(gen_enode(2)))
        );
        assert_eq!(
            a.remove_peer(&gen_enode(3)),
            Err(NodeError::UnknownPeer(gen_enode(3)))
        );
        assert!(matches!(
            a.add_peer(&"enode://nope".to_string()),
            Err(NodeError::MalformedEnode(_))
        ));
    }

    #[test]
    fn test_authority_turns() {
        let a = node(1);
        let b = node(2);
        // height 1 belongs to robot 1 when there are two robots
        assert_eq!(ConsensusKind::Authority.difficulty(a.head(), 1, 2), DIFF_IN_TURN);
        assert_eq!(ConsensusKind::Authority.difficulty(b.head(), 2, 2), DIFF_NO_TURN);
    }

    #[test]
    fn test_fork_choice_takes_heavier_chain() {
        let mut a = node(1);
        let mut b = node(2);
        a.produce_block();
        a.produce_block();

        let mut txs = TxBuilder::new(2);
        let tx = txs.build(TxCall::Hello { neighbor: 1 }, 0);
        let id = tx.id;
        b.send_transaction(tx);
        b.produce_block();
        assert!(b.transaction_receipt(&id).is_some());

        // a: 1 + 2 + 1, b: 1 + 1
        assert_eq!(a.total_difficulty(), 4);
        assert_eq!(b.total_difficulty(), 2);

        assert_eq!(a.sync_from(b.chain()), Ok(false));
        assert_eq!(b.sync_from(a.chain()), Ok(true));
        assert_eq!(b.head().hash, a.head().hash);

        // b's greeting was orphaned and is pending again
        assert!(b.transaction_receipt(&id).is_none());
        assert_eq!(b.mempool_len(), 1);
        assert_eq!(b.repeated_transactions(), 0);
    }

    #[test]
    fn test_tampered_state_rejected() {
        let mut a = node(1);
        let mut b = node(2);
        a.produce_block();
        a.produce_block();

        let mut forged: Vec<Block> = a.chain().to_vec();
        forged[2].state.credit(2, 1_000);

        let before = b.head().hash;
        assert_eq!(b.sync_from(&forged), Err(ChainError::InvalidBlock(2)));
        assert_eq!(b.head().hash, before);
    }

    #[test]
    fn test_resent_transaction_is_ignored() {
        let mut a = node(1);
        let mut txs = TxBuilder::new(2);
        let tx = txs.build(TxCall::Hello { neighbor: 1 }, 0);

        a.send_transaction(tx.clone());
        a.send_transaction(tx.clone());
        assert_eq!(a.mempool_len(), 1);

        a.produce_block();
        assert_eq!(a.mempool_len(), 0);
        a.send_transaction(tx);
        assert_eq!(a.mempool_len(), 0);
    }

    #[test]
    fn test_mempool_hash_order_independent() {
        let mut a = node(1);
        let mut b = node(2);
        let mut txs = TxBuilder::new(3);
        let t1 = txs.build(TxCall::Hello { neighbor: 1 }, 1);
        let t2 = txs.build(TxCall::Hello { neighbor: 2 }, 2);

        a.send_transaction(t1.clone());
        a.send_transaction(t2.clone());
        b.send_transaction(t2);
        assert_ne!(a.mempool_hash(), b.mempool_hash());
        b.send_transaction(t1);
        assert_eq!(a.mempool_hash(), b.mempool_hash());
    }

    #[test]
    fn test_connection_in_turn_is_most_connected() {
        let mut state_params = ContractParams::new("hello_index", 100, 1, 3);
        state_params.seed_lottery = false;
        let mut genesis = genesis_block(&state_params);
        genesis.state.connectivity.insert(gen_enode(2), 4);
        genesis.state.connectivity.insert(gen_enode(3), 4);

        assert_eq!(ConsensusKind::Connection.difficulty(&genesis, 2, 3), DIFF_IN_TURN);
        assert_eq!(ConsensusKind::Connection.difficulty(&genesis, 3, 3), DIFF_NO_TURN);
    }

    #[test]
    fn test_stake_follows_lottery() {
        let genesis = genesis_block(&ContractParams::new("market_share", 100, 1, 3));
        let winners: Vec<RobotId> = (1..=3)
            .filter(|id| ConsensusKind::Stake.difficulty(&genesis, *id, 3) == DIFF_IN_TURN)
            .collect();
        assert_eq!(winners.len(), 1);
    }
}
