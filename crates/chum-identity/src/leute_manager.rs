//! Manages the singleton `Leute` contact book: `me`, `other`, and `group`
//! references (spec §3). `me` is set exactly once per `app_id`; later
//! calls to `ensure` are no-ops, honoring the "never reassigned" invariant.

use chum_store::ObjectStore;
use chum_types::canonical;
use chum_types::{Hash, Leute, Result};

#[derive(Clone)]
pub struct LeuteManager {
    store: ObjectStore,
}

impl LeuteManager {
    pub fn new(store: ObjectStore) -> Self {
        LeuteManager { store }
    }

    fn id_hash(app_id: &str) -> Hash {
        canonical::id_hash(&Leute {
            app_id: app_id.to_string(),
            me: Hash::from_bytes([0u8; 32]),
            other: Vec::new(),
            groups: Vec::new(),
        })
    }

    /// Creates the contact book with `me` on first call; returns the
    /// existing record unchanged on every later call, even if a different
    /// `me` is passed.
    #[tracing::instrument(skip(self))]
    pub async fn ensure(&self, app_id: &str, me_someone_hash: Hash) -> Result<Leute> {
        let id = Self::id_hash(app_id);
        if let Ok(existing) = self.store.get_by_id_hash::<Leute>(id).await {
            return Ok(existing);
        }
        let leute = Leute {
            app_id: app_id.to_string(),
            me: me_someone_hash,
            other: Vec::new(),
            groups: Vec::new(),
        };
        self.store.store_versioned(&leute).await?;
        Ok(leute)
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_other(&self, app_id: &str, someone_hash: Hash) -> Result<()> {
        let id = Self::id_hash(app_id);
        let mut leute: Leute = self.store.get_by_id_hash(id).await?;
        if !leute.other.contains(&someone_hash) {
            leute.other.push(someone_hash);
            self.store.store_versioned(&leute).await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_group(&self, app_id: &str, group_hash: Hash) -> Result<()> {
        let id = Self::id_hash(app_id);
        let mut leute: Leute = self.store.get_by_id_hash(id).await?;
        if !leute.groups.contains(&group_hash) {
            leute.groups.push(group_hash);
            self.store.store_versioned(&leute).await?;
        }
        Ok(())
    }

    pub async fn get(&self, app_id: &str) -> Result<Leute> {
        self.store.get_by_id_hash(Self::id_hash(app_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn me_is_never_reassigned() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let manager = LeuteManager::new(store);

        let first = manager.ensure("app", Hash::of(b"me-1")).await.unwrap();
        assert_eq!(first.me, Hash::of(b"me-1"));

        let second = manager.ensure("app", Hash::of(b"me-2")).await.unwrap();
        assert_eq!(second.me, Hash::of(b"me-1"));
    }

    #[tokio::test]
    async fn add_other_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let manager = LeuteManager::new(store);
        manager.ensure("app", Hash::of(b"me")).await.unwrap();

        manager.add_other("app", Hash::of(b"bob")).await.unwrap();
        manager.add_other("app", Hash::of(b"bob")).await.unwrap();

        let leute = manager.get("app").await.unwrap();
        assert_eq!(leute.other, vec![Hash::of(b"bob")]);
    }
}
