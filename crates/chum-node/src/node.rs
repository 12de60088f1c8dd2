//! Wiring: bootstraps one instance's Object Store, Identity & Keychain,
//! Channel/Topic/Pairing managers, QUIC-VC transport, Discovery, and
//! CHUM sync into a single handle the CLI commands drive.

use crate::config::Config;
use crate::events::{ChatMessageTurn, LlmRuntime, SettingsStore, UiEvent, UiEventSink};
use crate::status::{PeerStatus, PeerStatusTable};
use async_trait::async_trait;
use chum_channel::{ChannelManager, InvitationToken, PairingModule, PairingTransport, TopicGroupManager};
use chum_discovery::{Announcement, DiscoveryService, PeerEvent};
use chum_identity::{CredentialManager, Keychain, LeuteManager};
use chum_store::{AccessEngine, ObjectStore};
use chum_sync::{PeerLifecycleKind, SyncEngine};
use chum_transport::{CredentialVerifier, Endpoint};
use chum_types::{canonical, now_millis, ChatMessage, GroupId, Hash, Instance, PersonId, Someone};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const APP_ID: &str = "chum-node";

#[derive(Clone)]
pub struct Node {
    pub store: ObjectStore,
    pub access: AccessEngine,
    pub keychain: Keychain,
    pub credentials: CredentialManager,
    pub leute: LeuteManager,
    pub channels: ChannelManager,
    pub topics: TopicGroupManager,
    pub pairing: PairingModule,
    pub endpoint: Endpoint,
    pub sync: SyncEngine,
    pub discovery: DiscoveryService,
    pub peer_status: PeerStatusTable,
    pub ui: UiEventSink,
    pub llm: Arc<dyn LlmRuntime>,
    pub settings: Arc<dyn SettingsStore>,
    pub self_person: PersonId,
    peer_addrs: Arc<DashMap<PersonId, SocketAddr>>,
}

impl Node {
    /// Opens the store, provisions the local Person/Instance/keys if this
    /// is a first run, and starts the discovery, transport, and sync
    /// background tasks. Returns the handle plus the UI event stream.
    #[tracing::instrument(skip(config, llm, settings))]
    pub async fn bootstrap(
        config: Config,
        llm: Arc<dyn LlmRuntime>,
        settings: Arc<dyn SettingsStore>,
    ) -> anyhow::Result<(Node, mpsc::UnboundedReceiver<UiEvent>)> {
        let store = ObjectStore::open(config.storage.base_dir.clone()).await?;
        let access = AccessEngine::new(store.clone());
        let keychain = Keychain::new(store.clone());
        let self_person = keychain.ensure_person(&config.instance.owner_email).await?;
        let credentials = CredentialManager::new(store.clone(), keychain.clone());
        let leute = LeuteManager::new(store.clone());

        let self_someone = Someone {
            someone_id: self_person.to_hex(),
            main_identity: self_person,
            alternates: vec![],
            profiles: vec![],
        };
        let someone_write = store.store_versioned(&self_someone).await?;
        leute.ensure(APP_ID, someone_write.id_hash).await?;

        let channels = ChannelManager::new(store.clone());
        let topics = TopicGroupManager::new(store.clone(), access.clone(), channels.clone());
        let pairing = PairingModule::new(store.clone(), keychain.clone(), leute.clone(), channels.clone(), topics.clone());

        let instance = Instance { owner: self_person, name: config.instance.name.clone() };
        store.store_versioned(&instance).await?;
        let self_instance = canonical::id_hash(&instance);

        let sign_public = keychain.sign_public_key(self_person).await?;
        let local_vc = credentials
            .issue(self_person, self_person, self_instance, sign_public, vec!["sync".to_string()], i64::MAX / 2)
            .await?;

        let verifier: Arc<dyn CredentialVerifier> = Arc::new(credentials.clone());
        let (endpoint, endpoint_events) = Endpoint::bind(config.transport.bind_addr, local_vc, verifier).await?;

        let sync = SyncEngine::new(endpoint.clone(), store.clone(), access.clone(), channels.clone(), self_person);
        sync.clone().spawn(endpoint_events);

        let announcement = Announcement {
            device_id: self_person.to_hex(),
            device_name: Some(config.instance.name.clone()),
            capabilities: vec!["chum/1".to_string()],
            port: endpoint.local_addr()?.port(),
            timestamp: Some(now_millis()),
        };
        let (discovery, discovery_events) =
            DiscoveryService::bind(config.discovery.bind_addr, config.discovery.broadcast_addr, announcement).await?;

        let (ui, ui_rx) = UiEventSink::channel();

        let node = Node {
            store,
            access,
            keychain,
            credentials,
            leute,
            channels,
            topics,
            pairing,
            endpoint,
            sync,
            discovery,
            peer_status: PeerStatusTable::new(),
            ui,
            llm,
            settings,
            self_person,
            peer_addrs: Arc::new(DashMap::new()),
        };

        node.clone().spawn_discovery_bridge(discovery_events);
        node.clone().spawn_lifecycle_bridge();
        node.clone().spawn_pairing_ack_bridge();

        Ok((node, ui_rx))
    }

    fn pairing_transport(&self) -> Arc<dyn PairingTransport> {
        Arc::new(NodePairingTransport { sync: self.sync.clone(), peer_addrs: self.peer_addrs.clone() })
    }

    /// Bridges Discovery's peer events onto the status table, and
    /// attempts a QUIC-VC connection to anything announcing `chum/1`
    /// that isn't already connected.
    fn spawn_discovery_bridge(self, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PeerEvent::Discovered(info) => {
                        self.peer_status.set(&info.announcement.device_id, PeerStatus::Discovered, Some(info.address));
                        self.ui.emit(UiEvent::PeerDiscovered { device_id: info.announcement.device_id.clone() });
                        if !info.announcement.capabilities.iter().any(|c| c == "chum/1") {
                            continue;
                        }
                        self.peer_status.set(&info.announcement.device_id, PeerStatus::Connecting, Some(info.address));
                        if let Err(e) = self.endpoint.connect(info.address).await {
                            tracing::debug!(device_id = %info.announcement.device_id, error = %e, "auto-connect failed");
                        }
                    }
                    PeerEvent::Lost(device_id) => {
                        self.peer_status.set(&device_id, PeerStatus::Lost, None);
                        self.ui.emit(UiEvent::PeerLost { device_id });
                    }
                }
            }
        });
    }

    /// Bridges `SyncEngine`'s connection lifecycle onto the status
    /// table and the person→address map the Pairing transport needs.
    fn spawn_lifecycle_bridge(self) {
        tokio::spawn(async move {
            let mut events = self.sync.on_peer_lifecycle();
            loop {
                match events.recv().await {
                    Ok(event) => match event.kind {
                        PeerLifecycleKind::Connected => {
                            self.peer_addrs.insert(event.remote_person, event.peer);
                            self.peer_status.set(&event.remote_person.to_hex(), PeerStatus::Connected, Some(event.peer));
                            self.ui.emit(UiEvent::PeerConnected { device_id: event.remote_person.to_hex() });
                        }
                        PeerLifecycleKind::Closed => {
                            self.peer_addrs.remove(&event.remote_person);
                            self.peer_status.set(&event.remote_person.to_hex(), PeerStatus::Lost, None);
                            self.ui.emit(UiEvent::PeerLost { device_id: event.remote_person.to_hex() });
                        }
                    },
                    Err(async_broadcast::RecvError::Closed) => break,
                    Err(async_broadcast::RecvError::Overflowed(_)) => continue,
                }
            }
        });
    }

    fn spawn_pairing_ack_bridge(self) {
        tokio::spawn(async move {
            let mut events = self.sync.on_pairing_ack();
            loop {
                match events.recv().await {
                    Ok(event) => {
                        tracing::debug!(peer = %event.remote_person, "pairing ack received");
                        self.ui.emit(UiEvent::ContactAdded { person: event.remote_person.to_hex() });
                    }
                    Err(async_broadcast::RecvError::Closed) => break,
                    Err(async_broadcast::RecvError::Overflowed(_)) => continue,
                }
            }
        });
    }

    /// Builds a one-time invitation this instance's person issues (spec
    /// §4.9's Pairing collaborator).
    pub async fn create_invitation(&self, instance_endpoint: String, ttl_millis: i64) -> anyhow::Result<InvitationToken> {
        Ok(self.pairing.create_invitation(self.self_person, instance_endpoint, ttl_millis).await?)
    }

    /// Connects to `peer_addr`, waits for the QUIC-VC handshake to
    /// complete, then consumes `invitation` (S3). Queues a pairing
    /// acknowledgement for delivery once connected.
    #[tracing::instrument(skip(self, invitation))]
    pub async fn pair_with(&self, peer_addr: SocketAddr, invitation: &InvitationToken) -> anyhow::Result<PersonId> {
        self.endpoint.connect(peer_addr).await?;

        let mut lifecycle = self.sync.on_peer_lifecycle();
        let deadline = tokio::time::sleep(Duration::from_secs(5));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => anyhow::bail!("handshake with {peer_addr} timed out"),
                event = lifecycle.recv() => {
                    let event = event.map_err(|_| anyhow::anyhow!("lifecycle channel closed before handshake completed"))?;
                    if event.peer == peer_addr && event.kind == PeerLifecycleKind::Connected {
                        break;
                    }
                }
            }
        }

        let peer_person = self.pairing.consume_invitation(APP_ID, self.self_person, invitation).await?;
        self.peer_addrs.insert(peer_person, peer_addr);
        self.ui.emit(UiEvent::PairingSuccess { peer: peer_person.to_hex() });

        self.pairing.queue_ack(peer_person, invitation.token.to_vec(), self.pairing_transport());
        Ok(peer_person)
    }

    /// Publishes this instance's main Profile, readable by anyone it has
    /// paired with so far (see `PairingModule::publish_main_profile`'s
    /// doc comment on the "Everyone" grant).
    pub async fn publish_main_profile(&self, display_name: Option<String>, endpoints: Vec<String>) -> anyhow::Result<Hash> {
        let hash = self.pairing.publish_main_profile(self.self_person, display_name, endpoints).await?;
        self.sync.on_local_write(hash, "Profile").await?;
        Ok(hash)
    }

    pub async fn create_group_topic(&self, name: &str, topic_id: &str, participants: &[PersonId]) -> anyhow::Result<GroupId> {
        Ok(self.topics.create_group_topic(self.self_person, name, topic_id, participants).await?)
    }

    pub async fn create_one_to_one_topic(&self, other: PersonId) -> anyhow::Result<String> {
        Ok(self.topics.create_one_to_one_topic(self.self_person, other).await?)
    }

    /// Appends `text` to `topic_id` as `sender` and offers every object
    /// the append produced to already-connected peers.
    #[tracing::instrument(skip(self, text))]
    pub async fn send_message(&self, topic_id: &str, sender: PersonId, text: &str) -> anyhow::Result<Hash> {
        let owner = if topic_id.contains("<->") { None } else { Some(sender) };
        let message = ChatMessage { text: text.to_string(), sender, attachments: vec![] };
        let entry_hash = self.channels.append(topic_id, owner, &message).await?;

        let entry: chum_types::ChannelEntry = self.store.get_by_content_hash(entry_hash).await?;
        self.sync.on_local_write(entry.data_hash, "ChatMessage").await?;
        self.sync.on_local_write(entry.creation_time_hash, "CreationTime").await?;
        self.sync.on_local_write(entry_hash, "ChannelEntry").await?;
        let channel_info_hash = canonical::content_hash(&chum_types::ChannelInfo {
            channel_id: topic_id.to_string(),
            owner,
            head: Some(entry_hash),
        });
        self.sync.on_local_write(channel_info_hash, "ChannelInfo").await?;

        self.ui.emit(UiEvent::MessageUpdated { topic_id: topic_id.to_string(), entry_hash: entry_hash.to_hex() });
        Ok(entry_hash)
    }

    pub async fn iterate_topic(&self, topic_id: &str) -> anyhow::Result<Vec<chum_channel::MergedMessage>> {
        Ok(self.channels.iterate::<ChatMessage>(topic_id, None).await?)
    }

    pub async fn ensure_ai_persona(&self, email: &str) -> anyhow::Result<PersonId> {
        Ok(self.keychain.ensure_person(email).await?)
    }

    /// Drives the AI persona side of S2: asks the injected LLM runtime
    /// for a reply to what's on `topic_id` so far, then appends it owned
    /// by `ai_person`.
    #[tracing::instrument(skip(self))]
    pub async fn ai_persona_reply(&self, topic_id: &str, ai_person: PersonId, model_id: &str) -> anyhow::Result<Hash> {
        let merged = self.iterate_topic(topic_id).await?;
        let messages: Vec<ChatMessageTurn> = merged
            .iter()
            .map(|entry| ChatMessageTurn { role: "user".to_string(), content: entry.data.text.clone() })
            .collect();
        let reply = self.llm.chat(&messages, model_id, &serde_json::json!({})).await?;
        self.ui.emit(UiEvent::MessageStream { topic_id: topic_id.to_string(), token: reply.clone() });
        self.send_message(topic_id, ai_person, &reply).await
    }
}

/// Lets the Pairing module deliver its retry-queued acknowledgement over
/// an existing CHUM connection without depending on `chum-transport` or
/// `chum-sync` itself (see `chum_channel::pairing::PairingTransport`).
#[derive(Clone)]
struct NodePairingTransport {
    sync: SyncEngine,
    peer_addrs: Arc<DashMap<PersonId, SocketAddr>>,
}

#[async_trait]
impl PairingTransport for NodePairingTransport {
    async fn is_connected(&self, peer: PersonId) -> bool {
        match self.peer_addrs.get(&peer) {
            Some(addr) => self.sync.is_connected(*addr),
            None => false,
        }
    }

    async fn send_ack(&self, peer: PersonId, payload: Vec<u8>) -> std::result::Result<(), String> {
        let addr = self.peer_addrs.get(&peer).map(|e| *e).ok_or_else(|| "peer address unknown".to_string())?;
        self.sync.send_pairing_ack(addr, payload).await.map_err(|e| e.to_string())
    }
}
