//! Credential Manager: issues, verifies, and revokes Verifiable
//! Credentials, and tracks trust level per subject (spec §4.4).

use crate::keychain::Keychain;
use chum_store::ObjectStore;
use chum_types::canonical::{CanonicalValue, Identified};
use chum_types::{
    now_millis, Capability, Hash, InstanceId, PersonId, Result, Revocation, TrustLevel, VerifiableCredential,
};
use serde::{Deserialize, Serialize};

const ACCEPT_CAPABILITY: &str = "accept";

/// A locally-signed record that a Person is no longer trusted. Unlike a
/// `Revocation` (which targets a specific credential), a block applies to
/// every credential the subject has or will present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct BlockRecord {
    subject: PersonId,
    blocked_by: PersonId,
    blocked_at: i64,
    signature: Vec<u8>,
}

impl Identified for BlockRecord {
    const TYPE_NAME: &'static str = "BlockRecord";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("subject", CanonicalValue::Bytes(self.subject.as_bytes().to_vec())),
            ("blocked_by", CanonicalValue::Bytes(self.blocked_by.as_bytes().to_vec())),
            ("blocked_at", CanonicalValue::Int(self.blocked_at)),
            ("signature", CanonicalValue::Bytes(self.signature.clone())),
        ])
    }
}

#[derive(Clone)]
pub struct CredentialManager {
    store: ObjectStore,
    keychain: Keychain,
}

impl CredentialManager {
    pub fn new(store: ObjectStore, keychain: Keychain) -> Self {
        CredentialManager { store, keychain }
    }

    /// Issues and persists a VC: populates issuer/subject/capabilities/
    /// expiry and signs with the issuer's default sign key.
    #[tracing::instrument(skip(self, public_key, capabilities))]
    pub async fn issue(
        &self,
        issuer: PersonId,
        subject: PersonId,
        instance_id: InstanceId,
        public_key: Vec<u8>,
        capabilities: Vec<Capability>,
        validity_millis: i64,
    ) -> Result<VerifiableCredential> {
        let issued_at = now_millis();
        let unsigned = VerifiableCredential {
            issuer,
            subject,
            instance_id,
            public_key,
            capabilities,
            issued_at,
            expires_at: issued_at + validity_millis,
            signature: Vec::new(),
        };
        let signature = self.keychain.sign(&unsigned.signing_bytes(), issuer).await?;
        let vc = VerifiableCredential { signature, ..unsigned };
        self.store.store_unversioned(&vc, &[subject]).await?;
        Ok(vc)
    }

    /// Verifies signature, expiry, and revocation status. Does not check
    /// issuer trust — callers needing that should combine this with
    /// `trust_level` on the issuer.
    #[tracing::instrument(skip(self, vc))]
    pub async fn verify(&self, vc: &VerifiableCredential) -> Result<bool> {
        if vc.is_expired(now_millis()) {
            return Ok(false);
        }
        let issuer_key = self.keychain.sign_public_key(vc.issuer).await?;
        if !Keychain::verify(&vc.signing_bytes(), &vc.signature, &issuer_key) {
            return Ok(false);
        }
        let content_hash = chum_types::canonical::content_hash(vc);
        let revocations = self.store.reverse_lookup(content_hash, "Revocation").await?;
        Ok(revocations.is_empty())
    }

    /// Signs and stores a `Revocation` referencing `vc`'s content hash.
    /// Any verifier that later sees the revocation (itself a synced
    /// object, gated by whatever grant makes it visible) will honor it.
    #[tracing::instrument(skip(self, vc))]
    pub async fn revoke(&self, vc: &VerifiableCredential, revoked_by: PersonId) -> Result<Hash> {
        let credential_hash = chum_types::canonical::content_hash(vc);
        let unsigned = Revocation {
            credential_hash,
            revoked_by,
            revoked_at: now_millis(),
            signature: Vec::new(),
        };
        let signature = self.keychain.sign(&signing_bytes(&unsigned), revoked_by).await?;
        let revocation = Revocation { signature, ..unsigned };
        self.store.store_unversioned(&revocation, &[credential_hash]).await
    }

    /// Issues an Acceptance VC (capability `"accept"`) from `accepter` for
    /// `subject`, marking the subject's trust level `Accepted`.
    #[tracing::instrument(skip(self))]
    pub async fn accept(&self, accepter: PersonId, subject: PersonId, instance_id: InstanceId) -> Result<()> {
        let public_key = self.keychain.sign_public_key(subject).await.unwrap_or_default();
        self.issue(
            accepter,
            subject,
            instance_id,
            public_key,
            vec![ACCEPT_CAPABILITY.to_string()],
            i64::MAX / 2,
        )
        .await?;
        Ok(())
    }

    /// Records a local block of `subject`, signed by `blocked_by`.
    #[tracing::instrument(skip(self))]
    pub async fn block(&self, subject: PersonId, blocked_by: PersonId) -> Result<Hash> {
        let unsigned = BlockRecord {
            subject,
            blocked_by,
            blocked_at: now_millis(),
            signature: Vec::new(),
        };
        let signature = self.keychain.sign(&signing_bytes(&unsigned), blocked_by).await?;
        let record = BlockRecord { signature, ..unsigned };
        self.store.store_unversioned(&record, &[subject]).await
    }

    /// `Blocked` if a `BlockRecord` targets `subject`; `Accepted` if we
    /// have issued an acceptance VC for them; otherwise `Discovered`.
    #[tracing::instrument(skip(self))]
    pub async fn trust_level(&self, subject: PersonId) -> Result<TrustLevel> {
        if !self.store.reverse_lookup(subject, "BlockRecord").await?.is_empty() {
            return Ok(TrustLevel::Blocked);
        }
        for vc_hash in self.store.reverse_lookup(subject, "VerifiableCredential").await? {
            let vc: VerifiableCredential = match self.store.get_by_content_hash(vc_hash).await {
                Ok(vc) => vc,
                Err(_) => continue,
            };
            if vc.subject == subject && vc.has_capability(ACCEPT_CAPABILITY) && !vc.is_expired(now_millis()) {
                return Ok(TrustLevel::Accepted);
            }
        }
        Ok(TrustLevel::Discovered)
    }
}

fn signing_bytes<T: Identified>(obj: &T) -> Vec<u8> {
    chum_types::canonical::to_canonical_bytes(&obj.canonical_fields())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chum_store::ObjectStore;

    async fn setup() -> (ObjectStore, Keychain, CredentialManager, PersonId, PersonId) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let keychain = Keychain::new(store.clone());
        let manager = CredentialManager::new(store.clone(), keychain.clone());
        let alice = keychain.ensure_person("alice@example.com").await.unwrap();
        let bob = keychain.ensure_person("bob@example.com").await.unwrap();
        (store, keychain, manager, alice, bob)
    }

    #[tokio::test]
    async fn issued_credential_verifies() {
        let (_store, keychain, manager, alice, bob) = setup().await;
        let bob_key = keychain.sign_public_key(bob).await.unwrap();
        let vc = manager
            .issue(alice, bob, Hash::of(b"instance"), bob_key, vec!["sync".into()], 60_000)
            .await
            .unwrap();
        assert!(manager.verify(&vc).await.unwrap());
    }

    #[tokio::test]
    async fn expired_credential_fails_verification() {
        let (_store, keychain, manager, alice, bob) = setup().await;
        let bob_key = keychain.sign_public_key(bob).await.unwrap();
        let vc = manager
            .issue(alice, bob, Hash::of(b"instance"), bob_key, vec!["sync".into()], -1)
            .await
            .unwrap();
        assert!(!manager.verify(&vc).await.unwrap());
    }

    #[tokio::test]
    async fn revoked_credential_fails_verification() {
        let (_store, keychain, manager, alice, bob) = setup().await;
        let bob_key = keychain.sign_public_key(bob).await.unwrap();
        let vc = manager
            .issue(alice, bob, Hash::of(b"instance"), bob_key, vec!["sync".into()], 60_000)
            .await
            .unwrap();
        assert!(manager.verify(&vc).await.unwrap());
        manager.revoke(&vc, alice).await.unwrap();
        assert!(!manager.verify(&vc).await.unwrap());
    }

    #[tokio::test]
    async fn trust_level_progresses_discovered_to_accepted_to_blocked() {
        let (_store, keychain, manager, alice, bob) = setup().await;
        let bob_key = keychain.sign_public_key(bob).await.unwrap();
        manager
            .issue(alice, bob, Hash::of(b"instance"), bob_key, vec!["sync".into()], 60_000)
            .await
            .unwrap();
        assert!(matches!(manager.trust_level(bob).await.unwrap(), TrustLevel::Discovered));

        manager.accept(alice, bob, Hash::of(b"instance")).await.unwrap();
        assert!(matches!(manager.trust_level(bob).await.unwrap(), TrustLevel::Accepted));

        manager.block(bob, alice).await.unwrap();
        assert!(matches!(manager.trust_level(bob).await.unwrap(), TrustLevel::Blocked));
    }
}
