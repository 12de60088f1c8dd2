//! CHUM Sync Engine (spec §4.7): drives the ANNOUNCE/REQUEST/OBJECT/DONE/
//! DENY protocol over every connected peer, gated by the Access Engine.
//!
//! One `SyncEngine` is shared across all peers of an instance; per-peer
//! state (`PeerSync`) lives behind a `DashMap` keyed by the transport's
//! `SocketAddr`. The engine owns no socket itself — it is driven by
//! `chum_transport::EndpointEvents`, mirroring the way the Channel
//! Manager stays free of transport code and leaves delivery to whatever
//! drives its `append`/`ingest_remote_channel_info` calls.

use crate::error::Result;
use crate::message::SyncMessage;
use crate::queue::{ExportQueue, ImportSet};
use crate::registry;
use chum_channel::ChannelManager;
use chum_store::{AccessEngine, ObjectStore};
use chum_transport::{Endpoint, EndpointEvents, PeerClosed, PeerConnected, PeerFrame};
use chum_types::{AccessGrant, Group, Hash, PersonId};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How many hashes to announce in one `ANNOUNCE` message. Distinct from
/// `IN_FLIGHT_WINDOW`: a peer may announce more than it can serve at
/// once, and the receiver paces its own `REQUEST`s against that window.
const ANNOUNCE_BATCH: usize = 256;

struct PeerSync {
    remote_person: PersonId,
    export: ExportQueue,
    import: ImportSet,
}

/// Connection lifecycle notification for callers that need to know
/// which person a transport peer resolved to — `chum-node`'s peer
/// status table and Pairing delivery queue, in particular — without
/// depending on `chum-transport` themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLifecycleKind {
    Connected,
    Closed,
}

#[derive(Debug, Clone)]
pub struct PeerLifecycleEvent {
    pub peer: SocketAddr,
    pub remote_person: PersonId,
    pub kind: PeerLifecycleKind,
}

/// Drives CHUM object exchange for every connected peer of one instance.
/// Cheap to clone: all state is behind `Arc`.
#[derive(Clone)]
pub struct SyncEngine {
    endpoint: Endpoint,
    store: ObjectStore,
    access: AccessEngine,
    channels: ChannelManager,
    local_person: PersonId,
    peers: Arc<DashMap<SocketAddr, Arc<Mutex<PeerSync>>>>,
    /// Hash-to-type-name cache so a bare `REQUEST` hash can be dispatched
    /// without guessing. Content-addressing makes this safe to share
    /// across every peer: a hash never changes type.
    known_types: Arc<DashMap<Hash, String>>,
    lifecycle_tx: async_broadcast::Sender<PeerLifecycleEvent>,
    pairing_ack_tx: async_broadcast::Sender<PairingAckEvent>,
}

/// An opaque `PairingAck` payload received from a peer, alongside which
/// person it came from (resolved from the connection, not the payload).
#[derive(Debug, Clone)]
pub struct PairingAckEvent {
    pub remote_person: PersonId,
    pub payload: Vec<u8>,
}

impl SyncEngine {
    pub fn new(
        endpoint: Endpoint,
        store: ObjectStore,
        access: AccessEngine,
        channels: ChannelManager,
        local_person: PersonId,
    ) -> Self {
        let (lifecycle_tx, _rx) = async_broadcast::broadcast(64);
        let (pairing_ack_tx, _rx) = async_broadcast::broadcast(64);
        SyncEngine {
            endpoint,
            store,
            access,
            channels,
            local_person,
            peers: Arc::new(DashMap::new()),
            known_types: Arc::new(DashMap::new()),
            lifecycle_tx,
            pairing_ack_tx,
        }
    }

    /// Subscribes to `Connected`/`Closed` notifications for every peer
    /// this engine drives. Mirrors `ChannelManager::on_updated`'s
    /// broadcast-subscription shape.
    pub fn on_peer_lifecycle(&self) -> async_broadcast::Receiver<PeerLifecycleEvent> {
        self.lifecycle_tx.new_receiver()
    }

    /// Subscribes to `PairingAck` payloads arriving from any peer.
    pub fn on_pairing_ack(&self) -> async_broadcast::Receiver<PairingAckEvent> {
        self.pairing_ack_tx.new_receiver()
    }

    /// Sends an opaque Pairing acknowledgement to an already-connected
    /// peer. Returns an error if no connection to `peer` exists; the
    /// caller (`chum-node`'s `PairingTransport` impl) treats that as
    /// "not connected" and leaves the retry queue running.
    pub async fn send_pairing_ack(&self, peer: SocketAddr, payload: Vec<u8>) -> Result<()> {
        self.send(peer, SyncMessage::PairingAck { payload }).await
    }

    pub fn is_connected(&self, peer: SocketAddr) -> bool {
        self.peers.contains_key(&peer)
    }

    /// Spawns the event loop driving this engine off `events`. The
    /// returned handle finishes when every `EndpointEvents` channel
    /// closes (i.e. the `Endpoint` is dropped).
    pub fn spawn(self, mut events: EndpointEvents) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(connected) = events.connected.recv() => {
                        self.on_peer_connected(connected).await;
                    }
                    Some(closed) = events.closed.recv() => {
                        self.on_peer_closed(closed);
                    }
                    Some(frame) = events.frames.recv() => {
                        if let Err(err) = self.on_frame(frame).await {
                            tracing::warn!(%err, "dropping malformed sync frame");
                        }
                    }
                    else => break,
                }
            }
        })
    }

    #[tracing::instrument(skip(self, connected), fields(peer = %connected.peer))]
    async fn on_peer_connected(&self, connected: PeerConnected) {
        let remote_person = connected.remote_credential.subject;
        let peer_sync = Arc::new(Mutex::new(PeerSync {
            remote_person,
            export: ExportQueue::new(),
            import: ImportSet::new(),
        }));
        self.peers.insert(connected.peer, peer_sync);

        if let Err(err) = self.seed_export_queue(connected.peer, remote_person).await {
            tracing::warn!(%err, "failed to seed export queue for newly connected peer");
        }
        if let Err(err) = self.flush_announce(connected.peer).await {
            tracing::warn!(%err, "failed to announce to newly connected peer");
        }
        let _ = self.lifecycle_tx.try_broadcast(PeerLifecycleEvent {
            peer: connected.peer,
            remote_person,
            kind: PeerLifecycleKind::Connected,
        });
    }

    fn on_peer_closed(&self, closed: PeerClosed) {
        // Per-connection queues are abandoned, not persisted: everything
        // they were seeded from (grants, local writes) is recoverable
        // from the store on the next connection.
        let remote_person = self.peers.remove(&closed.peer).map(|(_, state)| state);
        tracing::debug!(peer = %closed.peer, reason = %closed.reason, "peer sync state dropped");
        if let Some(state) = remote_person {
            let lifecycle_tx = self.lifecycle_tx.clone();
            let peer = closed.peer;
            tokio::spawn(async move {
                let remote_person = state.lock().await.remote_person;
                let _ = lifecycle_tx.try_broadcast(PeerLifecycleEvent {
                    peer,
                    remote_person,
                    kind: PeerLifecycleKind::Closed,
                });
            });
        }
    }

    /// Scans existing `AccessGrant`s for ones naming the peer's person or
    /// a group it belongs to, and offers both the grant and its target
    /// for export. This is the only place sync state is seeded from
    /// storage rather than from a live `on_local_write` call, covering
    /// whatever was written before this peer ever connected.
    async fn seed_export_queue(&self, peer: SocketAddr, remote_person: PersonId) -> Result<()> {
        for grant_hash in self.store.list_by_type("AccessGrant").await? {
            let grant: AccessGrant = match self.store.get_by_content_hash(grant_hash).await {
                Ok(g) => g,
                Err(_) => continue,
            };
            if !self.grant_covers(&grant, remote_person).await {
                continue;
            }
            self.offer(peer, grant_hash, "AccessGrant").await;
            let target_hash = grant.target.hash();
            if let Some(type_name) = self.store.type_name_of(target_hash).await? {
                self.offer(peer, target_hash, &type_name).await;
            }
        }
        Ok(())
    }

    async fn grant_covers(&self, grant: &AccessGrant, person: PersonId) -> bool {
        if grant.persons.contains(&person) {
            return true;
        }
        for group_id in &grant.groups {
            if let Ok(group) = self.store.get_by_id_hash::<Group>(*group_id).await {
                if group.members.contains(&person) {
                    return true;
                }
            }
        }
        false
    }

    /// Re-derives whether `hash` (of `type_name`) is visible to
    /// `remote_person`, for the request-time re-check: an `AccessGrant`
    /// is visible to whoever it names, everything else goes through the
    /// Access Engine directly.
    async fn is_visible_to(&self, remote_person: PersonId, hash: Hash, type_name: &str) -> Result<bool> {
        if type_name == "AccessGrant" {
            let grant: AccessGrant = match self.store.get_by_content_hash(hash).await {
                Ok(g) => g,
                Err(_) => return Ok(false),
            };
            return Ok(self.grant_covers(&grant, remote_person).await);
        }
        Ok(self.access.can_read(remote_person, hash).await?)
    }

    /// Called by application code after writing something new so it can
    /// be offered to already-connected peers without waiting for them to
    /// reconnect. `type_name` must be one `registry::is_sync_eligible`
    /// accepts; anything else is silently not synced.
    pub async fn on_local_write(&self, hash: Hash, type_name: &str) -> Result<()> {
        if !registry::is_sync_eligible(type_name) {
            return Ok(());
        }
        let peers: Vec<SocketAddr> = self.peers.iter().map(|e| *e.key()).collect();
        for peer in peers {
            let remote_person = {
                let Some(state) = self.peers.get(&peer) else { continue };
                state.lock().await.remote_person
            };
            if self.is_visible_to(remote_person, hash, type_name).await? {
                self.offer(peer, hash, type_name).await;
            }
        }
        for peer in self.peers.iter().map(|e| *e.key()).collect::<Vec<_>>() {
            let _ = self.flush_announce(peer).await;
        }
        Ok(())
    }

    async fn offer(&self, peer: SocketAddr, hash: Hash, type_name: &str) {
        let Some(state) = self.peers.get(&peer) else { return };
        let mut state = state.lock().await;
        state.export.offer(hash);
        drop(state);
        self.known_types.insert(hash, type_name.to_string());
    }

    async fn flush_announce(&self, peer: SocketAddr) -> Result<()> {
        let hashes = {
            let Some(state) = self.peers.get(&peer) else { return Ok(()) };
            let mut state = state.lock().await;
            state.export.drain_for_announce(ANNOUNCE_BATCH)
        };
        if hashes.is_empty() {
            return Ok(());
        }
        self.send(peer, SyncMessage::Announce { hashes }).await
    }

    async fn send(&self, peer: SocketAddr, message: SyncMessage) -> Result<()> {
        let frame = message.to_frame()?;
        self.endpoint.send_frames(peer, &[frame]).await?;
        Ok(())
    }

    async fn on_frame(&self, frame: PeerFrame) -> Result<()> {
        let message = SyncMessage::from_frame(&frame.frame)?;
        match message {
            SyncMessage::Announce { hashes } => self.handle_announce(frame.peer, hashes).await,
            SyncMessage::Request { hashes } => self.handle_request(frame.peer, hashes).await,
            SyncMessage::Object { hash, type_name, payload } => {
                self.handle_object(frame.peer, hash, type_name, payload).await
            }
            SyncMessage::Done => Ok(()),
            SyncMessage::Deny { hash } => {
                tracing::debug!(%hash, peer = %frame.peer, "peer denied a requested object");
                Ok(())
            }
            SyncMessage::PairingAck { payload } => {
                if let Some(state) = self.peers.get(&frame.peer) {
                    let remote_person = state.lock().await.remote_person;
                    let _ = self.pairing_ack_tx.try_broadcast(PairingAckEvent { remote_person, payload });
                }
                Ok(())
            }
        }
    }

    async fn handle_announce(&self, peer: SocketAddr, hashes: Vec<Hash>) -> Result<()> {
        let to_request = {
            let Some(state) = self.peers.get(&peer) else { return Ok(()) };
            let mut state = state.lock().await;
            let wanted: Vec<Hash> = hashes.into_iter().filter(|h| !self.store.exists(*h)).collect();
            state.import.select_to_request(&wanted)
        };
        if to_request.is_empty() {
            return Ok(());
        }
        self.send(peer, SyncMessage::Request { hashes: to_request }).await
    }

    async fn handle_request(&self, peer: SocketAddr, hashes: Vec<Hash>) -> Result<()> {
        let remote_person = {
            let Some(state) = self.peers.get(&peer) else { return Ok(()) };
            state.lock().await.remote_person
        };
        for hash in hashes {
            let Some(type_name) = self.known_types.get(&hash).map(|e| e.clone()) else {
                continue;
            };
            let admitted = {
                let Some(state) = self.peers.get(&peer) else { continue };
                let mut state = state.lock().await;
                state.export.request(hash)
            };
            if !admitted {
                continue;
            }
            if !self.is_visible_to(remote_person, hash, &type_name).await? {
                self.send(peer, SyncMessage::Deny { hash }).await?;
                if let Some(state) = self.peers.get(&peer) {
                    state.lock().await.export.mark_sent(hash);
                }
                continue;
            }
            let payload = registry::export_payload(&self.store, hash, &type_name).await?;
            self.send(peer, SyncMessage::Object { hash, type_name, payload }).await?;
            if let Some(state) = self.peers.get(&peer) {
                state.lock().await.export.mark_sent(hash);
            }
        }
        self.send(peer, SyncMessage::Done).await
    }

    async fn handle_object(&self, peer: SocketAddr, hash: Hash, type_name: String, payload: serde_json::Value) -> Result<()> {
        let deps = match registry::ingest(&self.store, &self.channels, hash, &type_name, payload).await {
            Ok(deps) => deps,
            Err(crate::error::Error::HashMismatch(_)) => {
                tracing::warn!(%hash, peer = %peer, "discarding object with mismatched hash");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        self.known_types.insert(hash, type_name);
        if let Some(state) = self.peers.get(&peer) {
            let mut state = state.lock().await;
            state.import.mark_have(hash);
            for dep in &deps {
                if !self.store.exists(*dep) {
                    state.import.note_missing_dependency(*dep);
                }
            }
        }
        self.handle_announce(peer, vec![]).await
    }

    /// The local person this engine acts on behalf of, for callers
    /// building `AccessGrant`s against a peer discovered via
    /// `on_peer_connected`.
    pub fn local_person(&self) -> PersonId {
        self.local_person
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chum_transport::CredentialVerifier;
    use chum_types::{GrantMode, Target, VerifiableCredential};
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};

    struct AllowAll;
    #[async_trait]
    impl CredentialVerifier for AllowAll {
        async fn verify(&self, _vc: &VerifiableCredential) -> chum_transport::Result<bool> {
            Ok(true)
        }
        async fn issuer_trusted(&self, _issuer: PersonId) -> chum_transport::Result<bool> {
            Ok(true)
        }
    }

    fn fake_vc(subject: PersonId) -> VerifiableCredential {
        VerifiableCredential {
            issuer: subject,
            subject,
            instance_id: Hash::of(b"instance"),
            public_key: vec![1, 2, 3],
            capabilities: vec!["sync".to_string()],
            issued_at: 0,
            expires_at: i64::MAX,
            signature: vec![],
        }
    }

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn seed_export_queue_offers_grants_naming_the_peer() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let access = AccessEngine::new(store.clone());
        let channels = ChannelManager::new(store.clone());
        let remote_person = Hash::of(b"remote");
        let target = Hash::of(b"target-object");

        access
            .grant(AccessGrant {
                target: Target::Content(target),
                persons: vec![remote_person],
                groups: vec![],
                mode: GrantMode::Add,
            })
            .await
            .unwrap();

        let (endpoint, _events) = Endpoint::bind(loopback(0), fake_vc(Hash::of(b"me")), Arc::new(AllowAll))
            .await
            .unwrap();
        let engine = SyncEngine::new(endpoint, store, access, channels, Hash::of(b"me"));
        let peer = loopback(1);
        engine.peers.insert(
            peer,
            Arc::new(Mutex::new(PeerSync {
                remote_person,
                export: ExportQueue::new(),
                import: ImportSet::new(),
            })),
        );

        engine.seed_export_queue(peer, remote_person).await.unwrap();

        let state = engine.peers.get(&peer).unwrap();
        let announced = state.lock().await.export.drain_for_announce(usize::MAX);
        assert!(!announced.is_empty(), "expected at least the grant itself to be offered");
    }
}
