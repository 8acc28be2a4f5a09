//! Per-round bookkeeping: which events landed in the round, which of them
//! are witnesses, what fame each witness was given, and which events the
//! round received.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::event::EventHash;

/// Fame of a witness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trilean {
    #[default]
    Undefined,
    True,
    False,
}

impl From<bool> for Trilean {
    fn from(b: bool) -> Self {
        if b {
            Trilean::True
        } else {
            Trilean::False
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    /// Witnesses of the round and their fame.
    pub witnesses: BTreeMap<EventHash, Trilean>,
    /// Every event assigned to the round, in division order.
    pub events: Vec<EventHash>,
    /// Events whose round-received is this round, in consensus order once
    /// the block is built.
    pub received_events: Vec<EventHash>,
    /// All witnesses decided. Never unset.
    pub decided: bool,
}

impl RoundInfo {
    /// Record an event divided into this round. A witness whose fame was
    /// already known (carried in by a frame) keeps it.
    pub fn add_event(&mut self, hash: EventHash, witness: bool, fame: Trilean) {
        self.events.push(hash);
        if witness {
            self.witnesses.entry(hash).or_insert(fame);
        }
    }

    /// Record a fame decision. Decisions are final: a witness that already
    /// has one keeps it.
    pub fn set_fame(&mut self, witness: EventHash, famous: bool) {
        if let Some(fame) = self.witnesses.get_mut(&witness) {
            if *fame == Trilean::Undefined {
                *fame = famous.into();
            }
        }
    }

    pub fn witness_hashes(&self) -> Vec<EventHash> {
        self.witnesses.keys().copied().collect()
    }

    pub fn undecided_witnesses(&self) -> Vec<EventHash> {
        self.witnesses
            .iter()
            .filter(|(_, f)| **f == Trilean::Undefined)
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn famous_witnesses(&self) -> Vec<EventHash> {
        self.witnesses
            .iter()
            .filter(|(_, f)| **f == Trilean::True)
            .map(|(h, _)| *h)
            .collect()
    }

    /// At least one witness, and no witness left undecided.
    pub fn witnesses_decided(&self) -> bool {
        !self.witnesses.is_empty()
            && self.witnesses.values().all(|f| *f != Trilean::Undefined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fame_is_final() {
        let mut info = RoundInfo::default();
        let w = EventHash([1u8; 32]);
        info.add_event(w, true, Trilean::Undefined);
        assert!(!info.witnesses_decided());

        info.set_fame(w, true);
        info.set_fame(w, false);
        assert_eq!(info.witnesses[&w], Trilean::True);
        assert!(info.witnesses_decided());
        assert_eq!(info.famous_witnesses(), vec![w]);
    }

    #[test]
    fn known_fame_survives_late_division() {
        let mut info = RoundInfo::default();
        let w = EventHash([3u8; 32]);
        info.witnesses.insert(w, Trilean::True);
        info.add_event(w, true, Trilean::False);
        assert_eq!(info.witnesses[&w], Trilean::True);
        assert_eq!(info.events, vec![w]);
    }

    #[test]
    fn empty_round_is_not_decided() {
        let mut info = RoundInfo::default();
        assert!(!info.witnesses_decided());
        info.add_event(EventHash([2u8; 32]), false, Trilean::Undefined);
        assert!(!info.witnesses_decided());
        assert_eq!(info.events.len(), 1);
    }
}
