//! UDP-socket-facing driver for [`crate::connection::Connection`].
//!
//! `Endpoint` owns one `UdpSocket` and fans inbound datagrams out to the
//! `Connection` keyed by peer address, drives outbound sends, and runs
//! the heartbeat/idle/handshake timers described in spec §5. Everything
//! cryptographic or handshake-shaped lives in `connection.rs`; this
//! module is just the tokio plumbing around it, mirroring the way
//! `chum-channel`'s managers stay free of socket code and leave it to
//! their injected transports.

use crate::connection::{CloseReason, Connection, ConnectionEvent, ConnectionState, CredentialVerifier, HEARTBEAT_INTERVAL_SECS};
use crate::error::{Error, Result};
use crate::frame::Frame;
use chum_types::VerifiableCredential;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// A frame addressed to or received from a specific peer.
#[derive(Debug)]
pub struct PeerFrame {
    pub peer: SocketAddr,
    pub frame: Frame,
}

/// Announces a newly `Established` connection, inbound or outbound.
#[derive(Debug)]
pub struct PeerConnected {
    pub peer: SocketAddr,
    pub remote_credential: VerifiableCredential,
}

#[derive(Debug)]
pub struct PeerClosed {
    pub peer: SocketAddr,
    pub reason: CloseReason,
}

struct PeerState {
    connection: Mutex<Connection>,
}

/// A running QUIC-VC endpoint. Cloneable handle around shared state; the
/// receive loop and timer loop are spawned tasks owned by the `Endpoint`
/// and stopped when it is dropped.
#[derive(Clone)]
pub struct Endpoint {
    socket: Arc<UdpSocket>,
    local_vc: VerifiableCredential,
    verifier: Arc<dyn CredentialVerifier>,
    peers: Arc<DashMap<SocketAddr, Arc<PeerState>>>,
    connected_tx: mpsc::UnboundedSender<PeerConnected>,
    closed_tx: mpsc::UnboundedSender<PeerClosed>,
    frames_tx: mpsc::UnboundedSender<PeerFrame>,
}

pub struct EndpointEvents {
    pub connected: mpsc::UnboundedReceiver<PeerConnected>,
    pub closed: mpsc::UnboundedReceiver<PeerClosed>,
    pub frames: mpsc::UnboundedReceiver<PeerFrame>,
}

impl Endpoint {
    /// Binds `bind_addr` and spawns the receive and heartbeat loops.
    /// `local_vc` is presented to every peer during the handshake;
    /// `verifier` decides whether a remote credential is acceptable.
    pub async fn bind(
        bind_addr: SocketAddr,
        local_vc: VerifiableCredential,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Result<(Self, EndpointEvents)> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await.map_err(chum_types::Error::Io)?);
        let (connected_tx, connected_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let endpoint = Endpoint {
            socket,
            local_vc,
            verifier,
            peers: Arc::new(DashMap::new()),
            connected_tx,
            closed_tx,
            frames_tx,
        };

        endpoint.clone().spawn_receive_loop();
        endpoint.clone().spawn_timer_loop();

        Ok((
            endpoint,
            EndpointEvents {
                connected: connected_rx,
                closed: closed_rx,
                frames: frames_rx,
            },
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|e| chum_types::Error::Io(e).into())
    }

    /// Initiates a client handshake toward `peer`. Completion is reported
    /// asynchronously through [`EndpointEvents::connected`]; this call
    /// only guarantees the `INITIAL` packet was sent.
    #[tracing::instrument(skip(self))]
    pub async fn connect(&self, peer: SocketAddr) -> Result<()> {
        let (connection, initial_packet) = Connection::initiate(self.local_vc.clone(), now_millis());
        self.peers.insert(
            peer,
            Arc::new(PeerState {
                connection: Mutex::new(connection),
            }),
        );
        self.send_raw(peer, &initial_packet).await
    }

    /// Sends application frames to an already-`Established` peer.
    #[tracing::instrument(skip(self, frames))]
    pub async fn send_frames(&self, peer: SocketAddr, frames: &[Frame]) -> Result<()> {
        let state = self.peers.get(&peer).ok_or_else(|| Error::Closed(format!("no connection to {peer}")))?.clone();
        let packet = {
            let mut conn = state.connection.lock().await;
            conn.seal_application_frames(frames)?
        };
        self.send_raw(peer, &packet).await
    }

    pub async fn close(&self, peer: SocketAddr) -> Result<()> {
        if let Some((_, state)) = self.peers.remove(&peer) {
            let packet = {
                let mut conn = state.connection.lock().await;
                conn.build_close_packet(CloseReason::Local)?
            };
            if !packet.is_empty() {
                self.send_raw(peer, &packet).await?;
            }
        }
        Ok(())
    }

    async fn send_raw(&self, peer: SocketAddr, bytes: &[u8]) -> Result<()> {
        self.socket.send_to(bytes, peer).await.map_err(chum_types::Error::Io)?;
        Ok(())
    }

    fn spawn_receive_loop(self) {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let (len, peer) = match self.socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "endpoint recv_from failed, stopping receive loop");
                        return;
                    }
                };
                self.handle_datagram(peer, &buf[..len]).await;
            }
        });
    }

    async fn handle_datagram(&self, peer: SocketAddr, raw: &[u8]) {
        let state = match self.peers.get(&peer) {
            Some(s) => s.clone(),
            None => match Connection::accept(raw, self.local_vc.clone(), self.verifier.as_ref(), now_millis()).await {
                Ok((connection, response)) => {
                    let state = Arc::new(PeerState {
                        connection: Mutex::new(connection),
                    });
                    self.peers.insert(peer, state.clone());
                    if self.send_raw(peer, &response).await.is_err() {
                        tracing::warn!(%peer, "failed to send HANDSHAKE response");
                    }
                    state
                }
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "rejecting inbound INITIAL");
                    return;
                }
            },
        };

        let events = {
            let mut conn = state.connection.lock().await;
            conn.handle_packet(raw, self.verifier.as_ref(), now_millis()).await
        };
        match events {
            Ok(events) => self.dispatch_events(peer, &state, events).await,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "packet rejected");
                if matches!(e, Error::DecryptionFailure) {
                    let closed = {
                        let conn = state.connection.lock().await;
                        conn.state == ConnectionState::Closed
                    };
                    if closed {
                        self.peers.remove(&peer);
                        let _ = self.closed_tx.send(PeerClosed {
                            peer,
                            reason: CloseReason::DecryptionFailure,
                        });
                    }
                }
            }
        }
    }

    async fn dispatch_events(&self, peer: SocketAddr, state: &Arc<PeerState>, events: Vec<ConnectionEvent>) {
        for event in events {
            match event {
                ConnectionEvent::Send(bytes) => {
                    if self.send_raw(peer, &bytes).await.is_err() {
                        tracing::warn!(%peer, "failed to send handshake reply");
                    }
                }
                ConnectionEvent::HandshakeComplete => {
                    let remote_credential = {
                        let conn = state.connection.lock().await;
                        conn.remote_credential().cloned()
                    };
                    if let Some(remote_credential) = remote_credential {
                        let _ = self.connected_tx.send(PeerConnected { peer, remote_credential });
                    }
                }
                ConnectionEvent::Frames(frames) => {
                    for frame in frames {
                        let _ = self.frames_tx.send(PeerFrame { peer, frame });
                    }
                }
                ConnectionEvent::Closed(reason) => {
                    self.peers.remove(&peer);
                    let _ = self.closed_tx.send(PeerClosed { peer, reason });
                }
            }
        }
    }

    fn spawn_timer_loop(self) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
            loop {
                interval.tick().await;
                self.run_timer_tick().await;
            }
        });
    }

    async fn run_timer_tick(&self) {
        let now = now_millis();
        let mut to_close = Vec::new();
        for entry in self.peers.iter() {
            let peer = *entry.key();
            let mut conn = entry.value().connection.lock().await;
            if conn.is_handshake_timed_out(now) {
                to_close.push((peer, CloseReason::HandshakeTimeout));
                continue;
            }
            if conn.is_idle_timed_out(now) {
                to_close.push((peer, CloseReason::IdleTimeout));
                continue;
            }
            if conn.state == ConnectionState::Established {
                if let Ok(packet) = conn.build_heartbeat_packet() {
                    drop(conn);
                    let _ = self.send_raw(peer, &packet).await;
                }
            }
        }
        for (peer, reason) in to_close {
            self.peers.remove(&peer);
            let _ = self.closed_tx.send(PeerClosed { peer, reason });
        }
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
    use crate::frame::FrameType;
    use async_trait::async_trait;
    use chum_types::Hash;

    struct AllowAll;

    #[async_trait]
    impl CredentialVerifier for AllowAll {
        async fn verify(&self, _vc: &VerifiableCredential) -> Result<bool> {
            Ok(true)
        }
        async fn issuer_trusted(&self, _issuer: chum_types::PersonId) -> Result<bool> {
            Ok(true)
        }
    }

    fn fake_vc(seed: &str) -> VerifiableCredential {
        VerifiableCredential {
            issuer: Hash::of(seed.as_bytes()),
            subject: Hash::of(seed.as_bytes()),
            instance_id: Hash::of(seed.as_bytes()),
            public_key: seed.as_bytes().to_vec(),
            capabilities: vec!["sync".into()],
            issued_at: 0,
            expires_at: i64::MAX / 2,
            signature: vec![],
        }
    }

    #[tokio::test]
    async fn loopback_handshake_and_frame_exchange() {
        let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (server, mut server_events) = Endpoint::bind(loopback, fake_vc("server"), Arc::new(AllowAll)).await.unwrap();
        let (client, mut client_events) = Endpoint::bind(loopback, fake_vc("client"), Arc::new(AllowAll)).await.unwrap();

        let server_addr = server.local_addr().unwrap();
        client.connect(server_addr).await.unwrap();

        let server_connected = server_events.connected.recv().await.expect("server sees connection");
        let client_connected = client_events.connected.recv().await.expect("client sees connection");
        assert_eq!(server_connected.remote_credential.issuer, fake_vc("client").issuer);
        assert_eq!(client_connected.remote_credential.issuer, fake_vc("server").issuer);

        let client_addr = server_connected.peer;
        server
            .send_frames(client_addr, &[Frame::new(FrameType::Stream, b"hello".to_vec())])
            .await
            .unwrap();

        let received = client_events.frames.recv().await.expect("client receives frame");
        assert_eq!(received.frame.payload, b"hello");
    }
}
