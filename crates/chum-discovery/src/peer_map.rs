//! The `peerId → {address, lastSeen}` map and its 60 s eviction rule
//! (spec §4.6, §5 timeout table).

use crate::announcement::Announcement;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;

pub const PEER_EXPIRY_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub address: SocketAddr,
    pub last_seen_millis: i64,
    pub announcement: Announcement,
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    Discovered(PeerInfo),
    Lost(String),
}

/// Shared, cheaply-cloned peer table. `DiscoveryService` owns the write
/// side (inserting on announcement receipt, evicting on the sweep
/// timer); consumers (the Pairing module) read snapshots.
#[derive(Clone, Default)]
pub struct PeerMap {
    peers: Arc<DashMap<String, PeerInfo>>,
}

impl PeerMap {
    pub fn new() -> Self {
        PeerMap::default()
    }

    /// Records an announcement from `address`, seen at `now_millis`.
    /// Returns `Some(PeerEvent::Discovered)` the first time this device
    /// id is seen; subsequent announcements just refresh `last_seen`.
    pub fn observe(&self, announcement: Announcement, address: SocketAddr, now_millis: i64) -> Option<PeerEvent> {
        let device_id = announcement.device_id.clone();
        let is_new = !self.peers.contains_key(&device_id);
        self.peers.insert(
            device_id.clone(),
            PeerInfo {
                address,
                last_seen_millis: now_millis,
                announcement: announcement.clone(),
            },
        );
        if is_new {
            Some(PeerEvent::Discovered(PeerInfo {
                address,
                last_seen_millis: now_millis,
                announcement,
            }))
        } else {
            None
        }
    }

    /// Removes every peer whose `last_seen` is older than
    /// [`PEER_EXPIRY_SECS`], returning a `Lost` event for each.
    pub fn evict_stale(&self, now_millis: i64) -> Vec<PeerEvent> {
        let threshold = PEER_EXPIRY_SECS * 1000;
        let stale: Vec<String> = self
            .peers
            .iter()
            .filter(|entry| now_millis - entry.value().last_seen_millis > threshold)
            .map(|entry| entry.key().clone())
            .collect();
        let mut events = Vec::with_capacity(stale.len());
        for device_id in stale {
            self.peers.remove(&device_id);
            events.push(PeerEvent::Lost(device_id));
        }
        events
    }

    pub fn get(&self, device_id: &str) -> Option<PeerInfo> {
        self.peers.get(device_id).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> Vec<PeerInfo> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(id: &str) -> Announcement {
        Announcement {
            device_id: id.to_string(),
            device_name: None,
            capabilities: vec![],
            port: 1234,
            timestamp: None,
        }
    }

    #[test]
    fn first_observation_emits_discovered() {
        let map = PeerMap::new();
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        let event = map.observe(announcement("peer-a"), addr, 0);
        assert!(matches!(event, Some(PeerEvent::Discovered(_))));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn repeated_observation_only_refreshes() {
        let map = PeerMap::new();
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        map.observe(announcement("peer-a"), addr, 0);
        let second = map.observe(announcement("peer-a"), addr, 1000);
        assert!(second.is_none());
        assert_eq!(map.get("peer-a").unwrap().last_seen_millis, 1000);
    }

    #[test]
    fn stale_peers_are_evicted_after_60s() {
        let map = PeerMap::new();
        let addr: SocketAddr = "127.0.0.1:1234".parse().unwrap();
        map.observe(announcement("peer-a"), addr, 0);
        assert!(map.evict_stale(30_000).is_empty());
        let events = map.evict_stale(61_000);
        assert!(matches!(events.as_slice(), [PeerEvent::Lost(id)] if id == "peer-a"));
        assert!(map.is_empty());
    }
}
