//! `PeerStatus`: the connection-state surface Discovery and Transport
//! jointly imply but neither names on its own (SPEC_FULL.md §3). Tracked
//! per device id so the node can emit `peer.discovered`/`peer.connected`/
//! `peer.lost` without either crate knowing about the other.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Discovered,
    Connecting,
    Connected,
    Lost,
}

/// `deviceId → (status, last known transport address)`. Cheaply cloned;
/// shared between the discovery loop and the transport loop.
#[derive(Clone, Default)]
pub struct PeerStatusTable {
    statuses: Arc<DashMap<String, (PeerStatus, Option<SocketAddr>)>>,
}

impl PeerStatusTable {
    pub fn new() -> Self {
        PeerStatusTable::default()
    }

    pub fn set(&self, device_id: &str, status: PeerStatus, addr: Option<SocketAddr>) {
        self.statuses.insert(device_id.to_string(), (status, addr));
    }

    pub fn get(&self, device_id: &str) -> Option<PeerStatus> {
        self.statuses.get(device_id).map(|entry| entry.value().0)
    }

    pub fn snapshot(&self) -> Vec<(String, PeerStatus)> {
        self.statuses.iter().map(|entry| (entry.key().clone(), entry.value().0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_reports_latest_status() {
        let table = PeerStatusTable::new();
        table.set("device-a", PeerStatus::Discovered, None);
        assert_eq!(table.get("device-a"), Some(PeerStatus::Discovered));
        table.set("device-a", PeerStatus::Connected, Some("127.0.0.1:1".parse().unwrap()));
        assert_eq!(table.get("device-a"), Some(PeerStatus::Connected));
    }

    #[test]
    fn unknown_device_reports_none() {
        let table = PeerStatusTable::new();
        assert!(table.get("nobody").is_none());
    }
}
