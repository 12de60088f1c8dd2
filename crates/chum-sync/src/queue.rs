//! Per-connection export/import state (spec §4.7).
//!
//! One `PeerSync` exists per connected peer. The export side tracks which
//! hashes have been announced and how many are currently in flight
//! (outstanding `REQUEST` not yet answered with `OBJECT`); the import side
//! tracks hashes it has asked for and the set of hashes it's still
//! missing to make sense of something it already received (e.g. a
//! `ChannelEntry` whose `prev` hasn't arrived yet).

use chum_types::Hash;
use std::collections::{HashSet, VecDeque};

/// Outstanding requests are capped so one peer can't walk the other's
/// backlog into memory it doesn't have.
pub const IN_FLIGHT_WINDOW: usize = 64;

#[derive(Debug, Default)]
pub struct ExportQueue {
    /// Hashes known exportable, not yet announced.
    pending: VecDeque<Hash>,
    /// Announced, not yet requested-and-sent.
    announced: HashSet<Hash>,
    /// Requested by the peer and currently being sent.
    in_flight: HashSet<Hash>,
}

impl ExportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `hash` for announcement unless it's already known to the
    /// peer in some state.
    pub fn offer(&mut self, hash: Hash) {
        if self.announced.contains(&hash) || self.in_flight.contains(&hash) || self.pending.contains(&hash) {
            return;
        }
        self.pending.push_back(hash);
    }

    /// Drains up to `max` pending hashes to announce, marking them
    /// announced.
    pub fn drain_for_announce(&mut self, max: usize) -> Vec<Hash> {
        let mut out = Vec::new();
        while out.len() < max {
            let Some(hash) = self.pending.pop_front() else { break };
            self.announced.insert(hash);
            out.push(hash);
        }
        out
    }

    /// The peer asked for `hash`. Admits it to the in-flight set if there
    /// is room; returns whether it was admitted (caller sends `OBJECT` on
    /// `true`, otherwise leaves it queued for a later drain).
    pub fn request(&mut self, hash: Hash) -> bool {
        self.announced.remove(&hash);
        if self.in_flight.len() >= IN_FLIGHT_WINDOW {
            self.pending.push_front(hash);
            return false;
        }
        self.in_flight.insert(hash);
        true
    }

    pub fn mark_sent(&mut self, hash: Hash) {
        self.in_flight.remove(&hash);
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[derive(Debug, Default)]
pub struct ImportSet {
    /// Hashes requested from the peer, awaiting `OBJECT`.
    requested: HashSet<Hash>,
    /// Hashes referenced by something already received but not yet on
    /// hand — chased down with a follow-up `REQUEST` once room opens up.
    missing: HashSet<Hash>,
    /// Hashes this node already holds, successfully imported this
    /// session, so a repeat `ANNOUNCE` (e.g. after a reconnect) isn't
    /// re-requested.
    have: HashSet<Hash>,
}

impl ImportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_have(&mut self, hash: Hash) {
        self.requested.remove(&hash);
        self.missing.remove(&hash);
        self.have.insert(hash);
    }

    pub fn has(&self, hash: Hash) -> bool {
        self.have.contains(&hash)
    }

    pub fn note_missing_dependency(&mut self, hash: Hash) {
        if !self.have.contains(&hash) {
            self.missing.insert(hash);
        }
    }

    /// Hashes worth requesting next: offered-but-unrequested announces
    /// plus chased-down dependencies, bounded by the remaining window.
    pub fn select_to_request<'a>(&mut self, announced: impl IntoIterator<Item = &'a Hash>) -> Vec<Hash> {
        let room = IN_FLIGHT_WINDOW.saturating_sub(self.requested.len());
        let mut out = Vec::new();
        for hash in self.missing.iter().copied().chain(announced.into_iter().copied()) {
            if out.len() >= room {
                break;
            }
            if self.have.contains(&hash) || self.requested.contains(&hash) {
                continue;
            }
            out.push(hash);
        }
        for hash in &out {
            self.requested.insert(*hash);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_queue_caps_in_flight_at_the_window() {
        let mut q = ExportQueue::new();
        for i in 0..(IN_FLIGHT_WINDOW + 1) {
            q.offer(Hash::of(format!("h{i}").as_bytes()));
        }
        let announced = q.drain_for_announce(usize::MAX);
        assert_eq!(announced.len(), IN_FLIGHT_WINDOW + 1);
        let mut admitted = 0;
        for hash in &announced {
            if q.request(*hash) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, IN_FLIGHT_WINDOW);
        assert_eq!(q.in_flight_count(), IN_FLIGHT_WINDOW);
    }

    #[test]
    fn import_set_does_not_re_request_what_it_already_has() {
        let mut set = ImportSet::new();
        let h = Hash::of(b"a");
        set.mark_have(h);
        let picked = set.select_to_request([&h]);
        assert!(picked.is_empty());
    }

    #[test]
    fn import_set_chases_missing_dependencies_first() {
        let mut set = ImportSet::new();
        let dep = Hash::of(b"dep");
        set.note_missing_dependency(dep);
        let picked = set.select_to_request(std::iter::empty());
        assert_eq!(picked, vec![dep]);
    }
}
