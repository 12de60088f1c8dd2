//! Identity & Keychain: `ensurePerson`, `createDefaultKeys`, `sign`,
//! `verify` (spec §4.3). Key storage is local-only: `Keys` is unversioned
//! and never given to `reverse_lookup`'s sync-facing callers, so nothing
//! about it ever reaches the CHUM export path.

use chum_types::canonical::{self, CanonicalValue, Identified};
use chum_types::{Hash, Keys, Person, PersonId, Result};
use chum_store::ObjectStore;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Points a Person (or Instance) at the content hash of its current
/// `Keys` record. Versioned so re-keying is a new pointer version rather
/// than a destructive overwrite of the old one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct DefaultKeyPointer {
    owner: PersonId,
    keys_hash: Hash,
}

impl Identified for DefaultKeyPointer {
    const TYPE_NAME: &'static str = "DefaultKeyPointer";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("owner", CanonicalValue::Bytes(self.owner.as_bytes().to_vec())),
            ("keys_hash", CanonicalValue::Bytes(self.keys_hash.as_bytes().to_vec())),
        ])
    }

    fn id_field_names() -> &'static [&'static str] {
        &["owner"]
    }
}

/// `DefaultKeyPointer`'s id hash depends only on `owner` (see
/// `id_field_names`), so it can be computed without knowing the current
/// `keys_hash` — needed to look a pointer up before fetching it.
fn pointer_id_hash(owner: PersonId) -> Hash {
    canonical::id_hash(&DefaultKeyPointer {
        owner,
        keys_hash: Hash::from_bytes([0u8; 32]),
    })
}

#[derive(Clone)]
pub struct Keychain {
    store: ObjectStore,
}

impl Keychain {
    pub fn new(store: ObjectStore) -> Self {
        Keychain { store }
    }

    /// Idempotent: creates the `Person` and its default keys on first
    /// encounter, returns the existing `PersonId` on subsequent calls.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_person(&self, email: &str) -> Result<PersonId> {
        let person = Person { email: email.to_string() };
        let id_hash = canonical::id_hash(&person);
        if self.store.get_by_id_hash::<Person>(id_hash).await.is_err() {
            self.store.store_versioned(&person).await?;
        }
        if self
            .store
            .get_by_id_hash::<DefaultKeyPointer>(pointer_id_hash(id_hash))
            .await
            .is_err()
        {
            self.create_default_keys(id_hash).await?;
        }
        Ok(id_hash)
    }

    /// Generates a sign + encrypt key pair for `owner` and records it as
    /// the default. Overwrites any prior default pointer — re-keying
    /// invalidates every credential `owner` previously issued, per §4.3.
    #[tracing::instrument(skip(self))]
    pub async fn create_default_keys(&self, owner: PersonId) -> Result<Hash> {
        let sign_key = SigningKey::generate(&mut OsRng);
        let encrypt_key = SigningKey::generate(&mut OsRng);

        let keys = Keys {
            sign_public: sign_key.verifying_key().to_bytes().to_vec(),
            encrypt_public: encrypt_key.verifying_key().to_bytes().to_vec(),
            sign_secret: Some(sign_key.to_bytes().to_vec()),
            encrypt_secret: Some(encrypt_key.to_bytes().to_vec()),
        };
        let keys_hash = self.store.store_unversioned(&keys, &[]).await?;

        let pointer = DefaultKeyPointer { owner, keys_hash };
        self.store.store_versioned(&pointer).await?;

        let mut sign_bytes = sign_key.to_bytes();
        let mut encrypt_bytes = encrypt_key.to_bytes();
        sign_bytes.zeroize();
        encrypt_bytes.zeroize();

        Ok(keys_hash)
    }

    async fn default_keys(&self, owner: PersonId) -> Result<Keys> {
        let pointer: DefaultKeyPointer = self.store.get_by_id_hash(pointer_id_hash(owner)).await?;
        self.store.get_by_content_hash(pointer.keys_hash).await
    }

    /// Signs `data` with `owner`'s default sign key.
    #[tracing::instrument(skip(self, data))]
    pub async fn sign(&self, data: &[u8], owner: PersonId) -> Result<Vec<u8>> {
        let keys = self.default_keys(owner).await?;
        let secret = keys
            .sign_secret
            .as_ref()
            .ok_or_else(|| chum_types::Error::InvalidCredential("no local sign key for this person".into()))?;
        let bytes: [u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| chum_types::Error::InvalidCredential("malformed sign key".into()))?;
        let signing_key = SigningKey::from_bytes(&bytes);
        Ok(signing_key.sign(data).to_bytes().to_vec())
    }

    /// Verifies a signature against a raw ed25519 public key, independent
    /// of whether that key belongs to any locally known Person.
    pub fn verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(key_bytes): std::result::Result<[u8; 32], _> = public_key.try_into() else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig_bytes): std::result::Result<[u8; 64], _> = signature.try_into() else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);
        verifying_key.verify(data, &signature).is_ok()
    }

    pub async fn sign_public_key(&self, owner: PersonId) -> Result<Vec<u8>> {
        Ok(self.default_keys(owner).await?.sign_public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_person_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let keychain = Keychain::new(store);
        let id1 = keychain.ensure_person("alice@example.com").await.unwrap();
        let id2 = keychain.ensure_person("alice@example.com").await.unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn sign_and_verify_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let keychain = Keychain::new(store);
        let alice = keychain.ensure_person("alice@example.com").await.unwrap();
        let pubkey = keychain.sign_public_key(alice).await.unwrap();

        let sig = keychain.sign(b"hello", alice).await.unwrap();
        assert!(Keychain::verify(b"hello", &sig, &pubkey));
        assert!(!Keychain::verify(b"tampered", &sig, &pubkey));
    }

    #[tokio::test]
    async fn rekeying_rotates_default_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let keychain = Keychain::new(store);
        let alice = keychain.ensure_person("alice@example.com").await.unwrap();
        let old_pubkey = keychain.sign_public_key(alice).await.unwrap();

        keychain.create_default_keys(alice).await.unwrap();
        let new_pubkey = keychain.sign_public_key(alice).await.unwrap();

        assert_ne!(old_pubkey, new_pubkey);
    }
}
