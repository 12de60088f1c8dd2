//! Runs the UDP broadcast announce/listen loop and the peer-expiry
//! sweep (spec §4.6). Mirrors `chum-transport::Endpoint`'s shape: bind,
//! get back an event receiver, and a cloneable handle to drive sends.

use crate::announcement::Announcement;
use crate::error::{Error, Result};
use crate::peer_map::{PeerEvent, PeerMap};
use chum_transport::{Frame, FrameType};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub const DISCOVERY_PORT: u16 = 49497;
pub const BROADCAST_INTERVAL_SECS: u64 = 5;
const MAX_DATAGRAM_SIZE: usize = 4096;

#[derive(Clone)]
pub struct DiscoveryService {
    socket: Arc<UdpSocket>,
    broadcast_addr: SocketAddr,
    self_device_id: String,
    announcement: Arc<tokio::sync::RwLock<Announcement>>,
    peers: PeerMap,
}

impl DiscoveryService {
    /// Binds a UDP socket at `bind_addr` (typically `0.0.0.0:49497`),
    /// enables broadcast, and spawns the announce/listen/sweep loops.
    /// `announcement.device_id` is this instance's self id, used to
    /// ignore our own broadcasts.
    pub async fn bind(
        bind_addr: SocketAddr,
        broadcast_addr: SocketAddr,
        announcement: Announcement,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>)> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let service = DiscoveryService {
            socket: Arc::new(socket),
            broadcast_addr,
            self_device_id: announcement.device_id.clone(),
            announcement: Arc::new(tokio::sync::RwLock::new(announcement)),
            peers: PeerMap::new(),
        };

        service.clone().spawn_broadcast_loop();
        service.clone().spawn_listen_loop(events_tx.clone());
        service.clone().spawn_sweep_loop(events_tx);

        Ok((service, events_rx))
    }

    pub fn peers(&self) -> &PeerMap {
        &self.peers
    }

    /// Updates the fields broadcast on the next tick (e.g. `port` after
    /// the QUIC-VC listener binds to its real ephemeral port).
    pub async fn set_announcement(&self, announcement: Announcement) {
        *self.announcement.write().await = announcement;
    }

    #[tracing::instrument(skip(self))]
    async fn send_announcement(&self) -> Result<()> {
        let announcement = self.announcement.read().await.clone();
        let bytes = announcement.to_json()?;
        self.socket.send_to(&bytes, self.broadcast_addr).await?;
        Ok(())
    }

    fn spawn_broadcast_loop(self) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(BROADCAST_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if let Err(e) = self.send_announcement().await {
                    tracing::warn!(error = %e, "failed to send discovery announcement");
                }
            }
        });
    }

    fn spawn_listen_loop(self, events_tx: mpsc::UnboundedSender<PeerEvent>) {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let (len, addr) = match self.socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "discovery recv_from failed, stopping listen loop");
                        return;
                    }
                };
                let announcement = match Announcement::from_json(&buf[..len]) {
                    Ok(a) => a,
                    Err(e) => {
                        tracing::debug!(%addr, error = %e, "ignoring malformed discovery datagram");
                        continue;
                    }
                };
                if announcement.device_id == self.self_device_id {
                    continue;
                }
                if let Some(event) = self.peers.observe(announcement, addr, now_millis()) {
                    let _ = events_tx.send(event);
                }
            }
        });
    }

    fn spawn_sweep_loop(self, events_tx: mpsc::UnboundedSender<PeerEvent>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(BROADCAST_INTERVAL_SECS));
            loop {
                interval.tick().await;
                for event in self.peers.evict_stale(now_millis()) {
                    let _ = events_tx.send(event);
                }
            }
        });
    }

    /// Feeds a QUIC-VC `Discovery` frame (received over an
    /// already-established transport connection, per §4.6's "also
    /// accepts binary QUIC-VC discovery frames") into the same peer map
    /// the UDP broadcast listener updates.
    pub fn observe_transport_frame(&self, frame: &Frame, from: SocketAddr) -> Result<Option<PeerEvent>> {
        if frame.frame_type != FrameType::Discovery {
            return Err(Error::MalformedAnnouncement("not a Discovery frame".into()));
        }
        let announcement = Announcement::decode_frame_payload(&frame.payload)?;
        if announcement.device_id == self.self_device_id {
            return Ok(None);
        }
        Ok(self.peers.observe(announcement, from, now_millis()))
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(id: &str, port: u16) -> Announcement {
        Announcement {
            device_id: id.to_string(),
            device_name: Some("test device".into()),
            capabilities: vec!["chum/1".into()],
            port,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn broadcast_announcement_is_discovered_by_peer() {
        let a_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let b_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        // Bind both ends first to learn their ephemeral ports, then use
        // loopback unicast (this harness has no real broadcast segment)
        // in place of `255.255.255.255` to exercise the same codec and
        // peer-map path the live broadcast loop uses.
        let (service_a, mut events_a) = DiscoveryService::bind(a_addr, "127.0.0.1:1".parse().unwrap(), announcement("device-a", 1111))
            .await
            .unwrap();
        let probe_target = service_a.socket.local_addr().unwrap();
        let (service_b, _events_b) = DiscoveryService::bind(b_addr, probe_target, announcement("device-b", 2222))
            .await
            .unwrap();

        service_b.send_announcement().await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), events_a.recv())
            .await
            .expect("event arrives")
            .expect("channel open");
        match event {
            PeerEvent::Discovered(info) => assert_eq!(info.announcement.device_id, "device-b"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
