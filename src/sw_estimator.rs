//! Connectivity / Reputation Estimator
//!
//! Recomputes per-robot scores from the interaction ledger each time a block
//! is applied. Which score is maintained is picked once, at contract
//! construction, by an [`UpdateStrategy`]:
//!
//! - `hello_index` / `peer_index` write a connectivity count per enode
//! - `market_share`, `market_fixed`, `hello_shares`, `hello_fixed` and
//!   `hello_fixed_last` move lottery ticket counts toward a target
//!
//! Every strategy is a pure function of the ledger, the balances, the block
//! timestamp and the contract parameters. Nothing here reads a clock and
//! nothing depends on map iteration order, so every node replaying the same
//! chain arrives at the same scores.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::sw_enode::gen_enode;
use crate::sw_interface::{BlockContext, Enode, RobotId, SimTime};
use crate::sw_ledger::{window_cutoff, InteractionLedger};

/// Window used by `hello_fixed_last`, independent of the contract decay
pub const HELLO_FIXED_LAST_WINDOW: SimTime = 200;

/// Units of balance (or greetings) per ticket in the fixed variants
pub const FIXED_TICKET_DIVISOR: u64 = 10;

/// Greetings per ticket in `hello_fixed_last`
pub const HELLO_FIXED_LAST_DIVISOR: u64 = 2;

pub type ConnectivityMap = BTreeMap<Enode, u64>;

// ============================================================================
// Strategy selection
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpdateStrategy {
    /// Explicitly disabled
    None,
    HelloIndex,
    PeerIndex,
    MarketShare,
    MarketFixed,
    HelloShares,
    HelloFixed,
    HelloFixedLast,
    /// Name from the configuration that matches no strategy
    Unrecognized(String),
}

impl UpdateStrategy {
    pub fn name(&self) -> &str {
        match self {
            UpdateStrategy::None => "none",
            UpdateStrategy::HelloIndex => "hello_index",
            UpdateStrategy::PeerIndex => "peer_index",
            UpdateStrategy::MarketShare => "market_share",
            UpdateStrategy::MarketFixed => "market_fixed",
            UpdateStrategy::HelloShares => "hello_shares",
            UpdateStrategy::HelloFixed => "hello_fixed",
            UpdateStrategy::HelloFixedLast => "hello_fixed_last",
            UpdateStrategy::Unrecognized(name) => name,
        }
    }

    /// Does this strategy maintain lottery tickets (as opposed to connectivity)?
    pub fn uses_lottery(&self) -> bool {
        matches!(
            self,
            UpdateStrategy::MarketShare
                | UpdateStrategy::MarketFixed
                | UpdateStrategy::HelloShares
                | UpdateStrategy::HelloFixed
                | UpdateStrategy::HelloFixedLast
        )
    }
}

impl From<&str> for UpdateStrategy {
    fn from(name: &str) -> Self {
        match name {
            "none" => UpdateStrategy::None,
            "hello_index" => UpdateStrategy::HelloIndex,
            "peer_index" => UpdateStrategy::PeerIndex,
            "market_share" => UpdateStrategy::MarketShare,
            "market_fixed" => UpdateStrategy::MarketFixed,
            "hello_shares" => UpdateStrategy::HelloShares,
            "hello_fixed" => UpdateStrategy::HelloFixed,
            "hello_fixed_last" => UpdateStrategy::HelloFixedLast,
            other => UpdateStrategy::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for UpdateStrategy {
    fn from(name: String) -> Self {
        UpdateStrategy::from(name.as_str())
    }
}

impl From<UpdateStrategy> for String {
    fn from(strategy: UpdateStrategy) -> Self {
        strategy.name().to_string()
    }
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Lottery
// ============================================================================

/// How far a single update may move a ticket count up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ratchet {
    /// Jump straight to the target
    Full,
    /// At most one ticket per update
    SingleStepUp,
}

/// Ticket count per enode
///
/// An enode that has been granted a ticket never drops below one; entries
/// are only created when a count becomes positive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lottery {
    tickets: BTreeMap<Enode, u64>,
}

impl Lottery {
    pub fn new() -> Self {
        Self::default()
    }

    /// One ticket for each of the given robots
    pub fn seeded(ids: impl IntoIterator<Item = RobotId>) -> Self {
        Self {
            tickets: ids.into_iter().map(|id| (gen_enode(id), 1)).collect(),
        }
    }

    pub fn tickets(&self, enode: &str) -> u64 {
        self.tickets.get(enode).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.tickets.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Enode, &u64)> {
        self.tickets.iter()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Move the count for `enode` toward `target`
    pub fn ratchet(&mut self, enode: &Enode, target: u64, mode: Ratchet) {
        let owned = self.tickets(enode);
        let mut next = owned;

        match mode {
            Ratchet::Full => {
                if next < target {
                    next = target;
                }
            }
            Ratchet::SingleStepUp => {
                if next < target {
                    next += 1;
                }
            }
        }

        // removal never takes the last ticket
        if next > target && next > 1 {
            next = target.max(1);
        }

        if next != owned {
            debug!("lottery {}: {} -> {} (target {})", enode, owned, next, target);
            self.tickets.insert(enode.clone(), next);
        }
    }

    /// Pick the ticket at position `seed % total`, walking enodes in order
    pub fn draw(&self, seed: u64) -> Option<&Enode> {
        let total = self.total();
        if total == 0 {
            return None;
        }

        let mut pick = seed % total;
        for (enode, count) in &self.tickets {
            if pick < *count {
                return Some(enode);
            }
            pick -= count;
        }
        None
    }

    pub(crate) fn feed_hash(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&(self.tickets.len() as u64).to_le_bytes());
        for (enode, count) in &self.tickets {
            hasher.update(enode.as_bytes());
            hasher.update(&count.to_le_bytes());
        }
    }
}

// ============================================================================
// Estimator
// ============================================================================

/// Read-only view of the contract state a strategy works from
pub struct Estimator<'a> {
    pub ledger: &'a InteractionLedger,
    pub balances: &'a BTreeMap<RobotId, u64>,
    pub decay: Option<SimTime>,
    pub trans_reward: Option<u64>,
}

/// floor(value / (total / participants)) without floating point
fn share_target(value: u64, participants: usize, total: u64) -> u64 {
    ((value as u128 * participants as u128) / total as u128) as u64
}

impl<'a> Estimator<'a> {
    /// Run `strategy` for the block being applied
    pub fn update(
        &self,
        strategy: &UpdateStrategy,
        block: &BlockContext,
        connectivity: &mut ConnectivityMap,
        lottery: &mut Lottery,
    ) {
        match strategy {
            UpdateStrategy::None => {}
            UpdateStrategy::HelloIndex => self.hello_index(block, connectivity),
            UpdateStrategy::PeerIndex => self.peer_index(block, connectivity),
            UpdateStrategy::MarketShare => self.market_share(lottery),
            UpdateStrategy::MarketFixed => self.market_fixed(lottery),
            UpdateStrategy::HelloShares => self.hello_shares(lottery),
            UpdateStrategy::HelloFixed => self.hello_fixed(lottery),
            UpdateStrategy::HelloFixedLast => self.hello_fixed_last(block, lottery),
            UpdateStrategy::Unrecognized(name) => {
                warn!("update strategy \"{}\" not allowed, skipping", name);
            }
        }
    }

    fn decay(&self, strategy: &str) -> Option<SimTime> {
        if self.decay.is_none() {
            warn!("{} needs a decay window, none configured", strategy);
        }
        self.decay
    }

    /// Greetings received inside the decay window
    pub fn hello_index(&self, block: &BlockContext, connectivity: &mut ConnectivityMap) {
        let Some(decay) = self.decay("hello_index") else {
            return;
        };
        let cutoff = window_cutoff(block.timestamp, decay);

        for id in self.ledger.hello_participants() {
            let valid = self.ledger.valid_hellos(id, cutoff) as u64;
            connectivity.insert(gen_enode(id), valid);
        }
    }

    /// Distinct other robots that listed this robot as a peer inside the window
    pub fn peer_index(&self, block: &BlockContext, connectivity: &mut ConnectivityMap) {
        let Some(decay) = self.decay("peer_index") else {
            return;
        };
        let cutoff = window_cutoff(block.timestamp, decay);

        let reporters: BTreeSet<RobotId> = self.ledger.peer_reporters().collect();

        // everyone who reported or was reported
        let mut subjects = reporters.clone();
        for reporter in &reporters {
            subjects.extend(self.ledger.peers_of(*reporter).iter().map(|p| p.peer));
        }

        for robot in subjects {
            let reciprocal: BTreeSet<RobotId> = reporters
                .iter()
                .copied()
                .filter(|other| *other != robot)
                .filter(|other| self.ledger.reported_peer_since(*other, robot, cutoff))
                .collect();

            connectivity.insert(gen_enode(robot), reciprocal.len() as u64);
        }
    }

    /// Tickets proportional to balance relative to the average balance
    pub fn market_share(&self, lottery: &mut Lottery) {
        let Some(trans_reward) = self.trans_reward else {
            warn!("market_share needs trans_reward, none configured");
            return;
        };

        let participants = self.balances.len();
        let total: u64 = self.balances.values().sum();
        if participants == 0 || total == 0 {
            debug!("market_share: empty market");
            return;
        }

        // average market value below one transaction reward
        if (total as u128) < trans_reward as u128 * participants as u128 {
            return;
        }

        for (id, balance) in self.balances {
            let target = share_target(*balance, participants, total);
            lottery.ratchet(&gen_enode(*id), target, Ratchet::Full);
        }
    }

    /// One ticket per ten units of balance, granted one at a time
    pub fn market_fixed(&self, lottery: &mut Lottery) {
        for (id, balance) in self.balances {
            let target = balance / FIXED_TICKET_DIVISOR;
            lottery.ratchet(&gen_enode(*id), target, Ratchet::SingleStepUp);
        }
    }

    /// Tickets proportional to greetings relative to the average greeting count
    pub fn hello_shares(&self, lottery: &mut Lottery) {
        let participants = self.ledger.hello_participant_count();
        let total = self.ledger.total_hellos() as u64;
        if participants == 0 {
            return;
        }

        // fewer than one greeting per participant
        if (total as usize) < participants {
            return;
        }

        for id in self.ledger.hello_participants() {
            let received = self.ledger.hellos(id).len() as u64;
            let target = share_target(received, participants, total);
            lottery.ratchet(&gen_enode(id), target, Ratchet::Full);
        }
    }

    /// One ticket per ten greetings, granted one at a time
    pub fn hello_fixed(&self, lottery: &mut Lottery) {
        for id in self.ledger.hello_participants() {
            let target = self.ledger.hellos(id).len() as u64 / FIXED_TICKET_DIVISOR;
            lottery.ratchet(&gen_enode(id), target, Ratchet::SingleStepUp);
        }
    }

    /// One ticket per two recent greetings
    pub fn hello_fixed_last(&self, block: &BlockContext, lottery: &mut Lottery) {
        let cutoff = window_cutoff(block.timestamp, HELLO_FIXED_LAST_WINDOW);

        for id in self.ledger.hello_participants() {
            let valid = self.ledger.valid_hellos(id, cutoff) as u64;
            let target = valid / HELLO_FIXED_LAST_DIVISOR;
            lottery.ratchet(&gen_enode(id), target, Ratchet::Full);
        }
    }
}
