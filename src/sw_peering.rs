//! Peering Controller
//!
//! Keeps the node's peer table equal to the set of radio neighbours that may
//! have something new to offer: a heavier chain or a different mempool.
//! Each pass applies the minimal diff and, for consensus kinds that track
//! connectivity on chain, reports the resulting peers as `AddPeer`
//! transactions.

use std::collections::BTreeSet;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::sw_enode::{enode_to_id, gen_enode};
use crate::sw_interface::{
    ChainNode, Enode, NodeError, RadioBeacon, SimTime, TxBuilder, TxCall,
    DEFAULT_PEERING_INTERVAL, MAX_LED_TIER,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeeringConfig {
    /// Ticks between passes
    pub interval: SimTime,

    /// Emit `AddPeer` transactions when the peer set changes
    pub track_observations: bool,
}

impl Default for PeeringConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PEERING_INTERVAL,
            track_observations: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedColor {
    Off,
    Green,
    Red,
}

/// Colours of the three status LEDs for a given peer count
pub fn led_preset(peer_count: usize) -> [LedColor; 3] {
    match peer_count.min(MAX_LED_TIER) {
        0 => [LedColor::Off; 3],
        1 => [LedColor::Green, LedColor::Off, LedColor::Off],
        2 => [LedColor::Green, LedColor::Green, LedColor::Off],
        _ => [LedColor::Red; 3],
    }
}

/// What one pass did to the peer table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeeringOutcome {
    pub added: Vec<Enode>,
    pub removed: Vec<Enode>,
    pub observations_sent: usize,
    pub led: [LedColor; 3],
}

impl PeeringOutcome {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Neighbours worth peering with: heavier chain or different mempool
pub fn eligible_enodes<N: ChainNode + ?Sized>(
    node: &N,
    neighbors: &[RadioBeacon],
) -> BTreeSet<Enode> {
    let local_difficulty = node.total_difficulty();
    let local_mempool = node.mempool_hash().digest();

    neighbors
        .iter()
        .filter(|b| b.total_difficulty > local_difficulty || b.mempool_digest != local_mempool)
        .map(|b| gen_enode(b.id))
        .collect()
}

pub struct PeeringController {
    config: PeeringConfig,
    passes: u64,
}

impl PeeringController {
    pub fn new(config: PeeringConfig) -> Self {
        Self { config, passes: 0 }
    }

    pub fn interval(&self) -> SimTime {
        self.config.interval
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Reconcile the node's peers with `neighbors`
    ///
    /// Errors from the peer table end the pass immediately and are handed to
    /// the caller untouched.
    pub fn pass<N: ChainNode + ?Sized>(
        &mut self,
        node: &mut N,
        neighbors: &[RadioBeacon],
        txs: &mut TxBuilder,
    ) -> Result<PeeringOutcome, NodeError> {
        self.passes += 1;

        let eligible = eligible_enodes(node, neighbors);
        let current = node.peers();

        let added: Vec<Enode> = eligible.difference(&current).cloned().collect();
        let removed: Vec<Enode> = current.difference(&eligible).cloned().collect();

        for enode in &added {
            node.add_peer(enode)?;
        }
        for enode in &removed {
            node.remove_peer(enode)?;
        }

        let mut observations_sent = 0;
        let changed = !added.is_empty() || !removed.is_empty();
        if self.config.track_observations && changed {
            let now = node.time();
            for enode in node.peers() {
                let peer = enode_to_id(&enode)?;
                node.send_transaction(txs.build(TxCall::AddPeer { peer }, now));
                observations_sent += 1;
            }
        }

        let peer_count = node.peers().len();
        if changed {
            debug!(
                "peering {}: +{} -{} -> {} peers",
                node.enode(),
                added.len(),
                removed.len(),
                peer_count
            );
        }

        Ok(PeeringOutcome {
            added,
            removed,
            observations_sent,
            led: led_preset(peer_count),
        })
    }
}
