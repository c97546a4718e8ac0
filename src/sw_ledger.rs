//! Interaction Ledger
//!
//! Append-only record of who greeted whom and who saw whom as a peer. Entries
//! are never edited or dropped; decay windows are applied when reading.

use indexmap::IndexMap;
use log::info;
use serde::{Deserialize, Serialize};

use crate::sw_interface::{RobotId, SimTime};

/// A greeting received by a robot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub sender: RobotId,
    pub timestamp: SimTime,
}

/// A peer connection reported by a robot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerObservation {
    pub peer: RobotId,
    pub timestamp: SimTime,
}

/// First timestamp that still counts for a window ending at `now`
///
/// Entries strictly newer than `now - window` are valid. Early in a run the
/// window reaches below zero and everything counts.
pub fn window_cutoff(now: SimTime, window: SimTime) -> Option<SimTime> {
    now.checked_sub(window)
}

fn inside(timestamp: SimTime, cutoff: Option<SimTime>) -> bool {
    match cutoff {
        Some(cutoff) => timestamp > cutoff,
        None => true,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionLedger {
    /// neighbor -> greetings it received
    all_hellos: IndexMap<RobotId, Vec<Interaction>>,
    /// sender -> peers it reported
    all_peers: IndexMap<RobotId, Vec<PeerObservation>>,
}

impl InteractionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hello(&mut self, neighbor: RobotId, sender: RobotId, timestamp: SimTime) {
        self.all_hellos
            .entry(neighbor)
            .or_default()
            .push(Interaction { sender, timestamp });

        info!("Robot {} greeted {} !", sender, neighbor);
    }

    pub fn record_peer(&mut self, sender: RobotId, peer: RobotId, timestamp: SimTime) {
        self.all_peers
            .entry(sender)
            .or_default()
            .push(PeerObservation { peer, timestamp });

        info!("Robot {} recorded peer {}", sender, peer);
    }

    pub fn hellos(&self, neighbor: RobotId) -> &[Interaction] {
        self.all_hellos
            .get(&neighbor)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn peers_of(&self, sender: RobotId) -> &[PeerObservation] {
        self.all_peers
            .get(&sender)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Robots that received at least one greeting, in first-seen order
    pub fn hello_participants(&self) -> impl Iterator<Item = RobotId> + '_ {
        self.all_hellos.keys().copied()
    }

    /// Robots that reported at least one peer, in first-seen order
    pub fn peer_reporters(&self) -> impl Iterator<Item = RobotId> + '_ {
        self.all_peers.keys().copied()
    }

    pub fn hello_participant_count(&self) -> usize {
        self.all_hellos.len()
    }

    pub fn total_hellos(&self) -> usize {
        self.all_hellos.values().map(Vec::len).sum()
    }

    /// Greetings received by `neighbor` that are newer than `cutoff`
    pub fn valid_hellos(&self, neighbor: RobotId, cutoff: Option<SimTime>) -> usize {
        self.hellos(neighbor)
            .iter()
            .filter(|h| inside(h.timestamp, cutoff))
            .count()
    }

    /// Did `reporter` list `peer` more recently than `cutoff`?
    pub fn reported_peer_since(
        &self,
        reporter: RobotId,
        peer: RobotId,
        cutoff: Option<SimTime>,
    ) -> bool {
        self.peers_of(reporter)
            .iter()
            .any(|p| p.peer == peer && inside(p.timestamp, cutoff))
    }

    pub(crate) fn feed_hash(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&(self.all_hellos.len() as u64).to_le_bytes());
        for (neighbor, hellos) in &self.all_hellos {
            hasher.update(&neighbor.to_le_bytes());
            hasher.update(&(hellos.len() as u64).to_le_bytes());
            for h in hellos {
                hasher.update(&h.sender.to_le_bytes());
                hasher.update(&h.timestamp.to_le_bytes());
            }
        }

        hasher.update(&(self.all_peers.len() as u64).to_le_bytes());
        for (sender, peers) in &self.all_peers {
            hasher.update(&sender.to_le_bytes());
            hasher.update(&(peers.len() as u64).to_le_bytes());
            for p in peers {
                hasher.update(&p.peer.to_le_bytes());
                hasher.update(&p.timestamp.to_le_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_hello_appends_in_order() {
        let mut ledger = InteractionLedger::new();
        ledger.record_hello(1, 2, 10);
        ledger.record_hello(1, 3, 12);
        ledger.record_hello(4, 2, 15);

        assert_eq!(
            ledger.hellos(1),
            &[
                Interaction { sender: 2, timestamp: 10 },
                Interaction { sender: 3, timestamp: 12 },
            ]
        );
        assert_eq!(ledger.hellos(4).len(), 1);
        assert!(ledger.hellos(9).is_empty());
        assert_eq!(ledger.total_hellos(), 3);
        assert_eq!(ledger.hello_participants().collect::<Vec<_>>(), vec![1, 4]);
    }

    #[test]
    fn test_record_peer_keyed_by_sender() {
        let mut ledger = InteractionLedger::new();
        ledger.record_peer(5, 6, 20);
        ledger.record_peer(5, 7, 21);

        assert_eq!(ledger.peers_of(5).len(), 2);
        assert!(ledger.peers_of(6).is_empty());
        assert!(ledger.reported_peer_since(5, 7, Some(20)));
        assert!(!ledger.reported_peer_since(5, 6, Some(20)));
    }

    #[test]
    fn test_valid_hellos_is_strictly_newer() {
        let mut ledger = InteractionLedger::new();
        ledger.record_hello(1, 2, 5);
        ledger.record_hello(1, 2, 6);

        assert_eq!(ledger.valid_hellos(1, Some(5)), 1);
        assert_eq!(ledger.valid_hellos(1, Some(4)), 2);
        assert_eq!(ledger.valid_hellos(1, None), 2);
    }

    #[test]
    fn test_window_cutoff_below_zero() {
        assert_eq!(window_cutoff(55, 30), Some(25));
        assert_eq!(window_cutoff(10, 50), None);
    }
}
