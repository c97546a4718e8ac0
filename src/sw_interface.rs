use std::collections::BTreeSet;
use std::fmt;

use crate::sw_contract::Contract;

// all robots are numbered from 1 in the arena
pub type RobotId = u32;
pub type SimTime = u64;
pub type Enode = String;

pub type HashBytes = [u8; 32];
pub type TxId = HashBytes;

/// Ticks between two peering passes
pub const DEFAULT_PEERING_INTERVAL: SimTime = 10;

/// Ticks between two produced blocks
pub const DEFAULT_BLOCK_PERIOD: SimTime = 15;

/// LED colours saturate at this many peers
pub const MAX_LED_TIER: usize = 3;

pub const GENESIS_HASH: HashBytes = [0u8; 32];

/// Short hex rendering used in logs and csv rows
pub fn short_hex(hash: &HashBytes) -> String {
    let hex = blake3::Hash::from(*hash).to_hex();
    hex.as_str()[..16].to_string()
}

// ============================================================================
// Transactions
// ============================================================================

/// Contract entry points a transaction can call
///
/// The set is closed; a transaction naming anything else can not be built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxCall {
    /// Sender greeted `neighbor`
    Hello { neighbor: RobotId },
    /// Sender is connected to `peer` on its node
    AddPeer { peer: RobotId },
}

impl TxCall {
    pub fn name(&self) -> &'static str {
        match self {
            TxCall::Hello { .. } => "Hello",
            TxCall::AddPeer { .. } => "AddPeer",
        }
    }

    fn encode(&self) -> [u8; 5] {
        let (tag, arg) = match self {
            TxCall::Hello { neighbor } => (1u8, *neighbor),
            TxCall::AddPeer { peer } => (2u8, *peer),
        };
        let mut out = [0u8; 5];
        out[0] = tag;
        out[1..].copy_from_slice(&arg.to_le_bytes());
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub id: TxId,
    pub sender: RobotId,
    pub call: TxCall,
    pub timestamp: SimTime,
    pub nonce: u64,
}

impl Transaction {
    pub fn new(sender: RobotId, call: TxCall, timestamp: SimTime, nonce: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&sender.to_le_bytes());
        hasher.update(&call.encode());
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(&nonce.to_le_bytes());

        Self {
            id: *hasher.finalize().as_bytes(),
            sender,
            call,
            timestamp,
            nonce,
        }
    }
}

/// Stamps out transactions for one sender with increasing nonces
#[derive(Clone, Debug)]
pub struct TxBuilder {
    sender: RobotId,
    nonce: u64,
}

impl TxBuilder {
    pub fn new(sender: RobotId) -> Self {
        Self { sender, nonce: 0 }
    }

    pub fn sender(&self) -> RobotId {
        self.sender
    }

    pub fn build(&mut self, call: TxCall, timestamp: SimTime) -> Transaction {
        let tx = Transaction::new(self.sender, call, timestamp, self.nonce);
        self.nonce += 1;
        tx
    }
}

/// Proof that a transaction made it into the local chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_id: TxId,
    pub block_height: u64,
    pub block_hash: HashBytes,
}

// ============================================================================
// Blocks
// ============================================================================

/// The parts of a block a contract may look at while it is being applied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockContext {
    pub height: u64,
    pub timestamp: SimTime,
    pub miner: RobotId,
    pub tx_count: usize,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub height: u64,
    pub timestamp: SimTime,
    pub miner: RobotId,
    pub difficulty: u64,
    pub total_difficulty: u64,
    pub parent_hash: HashBytes,
    pub hash: HashBytes,
    pub data: Vec<Transaction>,

    // Not part of the hash: local time the block was accepted
    pub reception: SimTime,

    /// Contract state after applying this block
    pub state: Contract,
}

impl Block {
    pub fn context(&self) -> BlockContext {
        BlockContext {
            height: self.height,
            timestamp: self.timestamp,
            miner: self.miner,
            tx_count: self.data.len(),
        }
    }

    pub fn compute_hash(
        height: u64,
        timestamp: SimTime,
        miner: RobotId,
        difficulty: u64,
        parent_hash: &HashBytes,
        data: &[Transaction],
        state_hash: &HashBytes,
    ) -> HashBytes {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&height.to_le_bytes());
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(&miner.to_le_bytes());
        hasher.update(&difficulty.to_le_bytes());
        hasher.update(parent_hash);
        for tx in data {
            hasher.update(&tx.id);
        }
        hasher.update(state_hash);
        *hasher.finalize().as_bytes()
    }

    /// Recompute the hash from the header and the embedded state
    pub fn verify_hash(&self) -> bool {
        let expected = Self::compute_hash(
            self.height,
            self.timestamp,
            self.miner,
            self.difficulty,
            &self.parent_hash,
            &self.data,
            &self.state.state_hash(),
        );
        expected == self.hash
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSelector {
    Last,
    Height(u64),
}

/// Digest of the pending transaction pool
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MempoolHash(pub HashBytes);

impl MempoolHash {
    /// Integer form advertised over the radio
    pub fn digest(&self) -> u64 {
        u64::from_le_bytes(self.0[0..8].try_into().unwrap_or([0u8; 8]))
    }
}

// ============================================================================
// Radio
// ============================================================================

/// What a robot advertises to everybody in radio range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RadioBeacon {
    pub id: RobotId,
    pub total_difficulty: u64,
    pub mempool_digest: u64,
}

// ============================================================================
// Node interface
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// A node can not peer with itself
    SelfPeer(Enode),
    /// add_peer on an enode already in the peer table
    AlreadyPeered(Enode),
    /// remove_peer on an enode not in the peer table
    UnknownPeer(Enode),
    /// String does not decode to a robot id
    MalformedEnode(String),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::SelfPeer(enode) => write!(f, "refusing to peer with self ({})", enode),
            NodeError::AlreadyPeered(enode) => write!(f, "peer already connected: {}", enode),
            NodeError::UnknownPeer(enode) => write!(f, "peer not connected: {}", enode),
            NodeError::MalformedEnode(enode) => write!(f, "malformed enode: {}", enode),
        }
    }
}

impl std::error::Error for NodeError {}

/// The blockchain node a robot drives
///
/// Block production, fork choice and transaction execution live behind this
/// trait; the robot controller only peers, submits and reads.
pub trait ChainNode {
    fn enode(&self) -> &Enode;

    /// Currently connected peers, sorted
    fn peers(&self) -> BTreeSet<Enode>;

    fn add_peer(&mut self, enode: &Enode) -> Result<(), NodeError>;

    fn remove_peer(&mut self, enode: &Enode) -> Result<(), NodeError>;

    fn total_difficulty(&self) -> u64;

    fn mempool_hash(&self) -> MempoolHash;

    fn send_transaction(&mut self, tx: Transaction);

    fn transaction_receipt(&self, tx_id: &TxId) -> Option<Receipt>;

    fn block(&self, selector: BlockSelector) -> Option<&Block>;

    /// Local clock as seen by the node
    fn time(&self) -> SimTime;

    /// Advance the node by one tick
    fn step(&mut self, now: SimTime);
}
