//! Channel Manager: per-owner append-only logs that merge into a topic on
//! read (spec §4.8).

use chum_store::ObjectStore;
use chum_types::canonical::{self, CanonicalValue, Identified};
use chum_types::{ChannelEntry, ChannelInfo, ChatMessage, CreationTime, Hash, PersonId, Result};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

/// Local bookkeeping of which owners have written to a `channel_id`. Not
/// itself part of the synced data model — the Object Store has no query
/// "all ChannelInfo with field X = Y", so the manager keeps this index
/// updated both on local appends and when CHUM sync ingests a remote
/// `ChannelInfo` for a known channel id (see `note_owner`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
struct ChannelOwners {
    channel_id: String,
    owners: Vec<Option<PersonId>>,
}

impl Identified for ChannelOwners {
    const TYPE_NAME: &'static str = "ChannelOwners";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("channel_id", CanonicalValue::Str(self.channel_id.clone())),
            (
                "owners",
                CanonicalValue::List(
                    self.owners
                        .iter()
                        .map(|o| match o {
                            Some(p) => CanonicalValue::Bytes(p.as_bytes().to_vec()),
                            None => CanonicalValue::Null,
                        })
                        .collect(),
                ),
            ),
        ])
    }

    fn id_field_names() -> &'static [&'static str] {
        &["channel_id"]
    }
}

/// A notification that a `ChannelInfo` received a new version, locally or
/// via CHUM ingestion.
#[derive(Debug, Clone)]
pub struct ChannelEvent {
    pub channel_id: String,
    pub owner: Option<PersonId>,
    pub entry_hash: Hash,
}

/// One merged entry of a topic: the decoded payload alongside the
/// metadata needed to reproduce the merge-sort deterministically.
#[derive(Debug, Clone)]
pub struct MergedEntry<T> {
    pub owner: Option<PersonId>,
    pub timestamp: i64,
    pub entry_hash: Hash,
    pub data: T,
}

#[derive(Clone)]
pub struct ChannelManager {
    store: ObjectStore,
    listeners: Arc<DashMap<String, async_broadcast::Sender<ChannelEvent>>>,
}

impl ChannelManager {
    pub fn new(store: ObjectStore) -> Self {
        ChannelManager {
            store,
            listeners: Arc::new(DashMap::new()),
        }
    }

    fn channel_info_id(channel_id: &str, owner: Option<PersonId>) -> Hash {
        canonical::id_hash(&ChannelInfo {
            channel_id: channel_id.to_string(),
            owner,
            head: None,
        })
    }

    fn owners_id(channel_id: &str) -> Hash {
        canonical::id_hash(&ChannelOwners {
            channel_id: channel_id.to_string(),
            owners: Vec::new(),
        })
    }

    /// Writes an empty `ChannelInfo` for `(channel_id, owner)` if one
    /// doesn't already exist. Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn create_channel(&self, channel_id: &str, owner: Option<PersonId>) -> Result<Hash> {
        let id = Self::channel_info_id(channel_id, owner);
        if self.store.get_by_id_hash::<ChannelInfo>(id).await.is_ok() {
            return Ok(id);
        }
        self.store
            .store_versioned(&ChannelInfo {
                channel_id: channel_id.to_string(),
                owner,
                head: None,
            })
            .await?;
        self.note_owner(channel_id, owner).await?;
        Ok(id)
    }

    /// Records that `owner` has a `ChannelInfo` for `channel_id`, whether
    /// created locally or observed via sync ingestion.
    #[tracing::instrument(skip(self))]
    pub async fn note_owner(&self, channel_id: &str, owner: Option<PersonId>) -> Result<()> {
        let mut owners = self
            .store
            .get_by_id_hash::<ChannelOwners>(Self::owners_id(channel_id))
            .await
            .unwrap_or_else(|_| ChannelOwners {
                channel_id: channel_id.to_string(),
                owners: Vec::new(),
            });
        if !owners.owners.contains(&owner) {
            owners.owners.push(owner);
            self.store.store_versioned(&owners).await?;
        }
        Ok(())
    }

    /// Writes `data` (unversioned), a `CreationTime`, a `ChannelEntry`
    /// chained to the previous head, and a new `ChannelInfo` version
    /// pointing at it. Auto-creates the channel if this is the first
    /// write. Returns the new entry's content hash.
    #[tracing::instrument(skip(self, data))]
    pub async fn append<T: Identified + Serialize>(
        &self,
        channel_id: &str,
        owner: Option<PersonId>,
        data: &T,
    ) -> Result<Hash> {
        let channel_id_hash = self.create_channel(channel_id, owner).await?;

        let data_hash = self.store.store_unversioned(data, &[]).await?;
        let creation_time = CreationTime {
            timestamp: chum_types::now_millis(),
            data_hash,
        };
        let creation_time_hash = self.store.store_unversioned(&creation_time, &[]).await?;

        let current: ChannelInfo = self.store.get_by_id_hash(channel_id_hash).await?;
        let entry = ChannelEntry {
            data_hash,
            creation_time_hash,
            prev: current.head,
        };
        let entry_hash = self.store.store_unversioned(&entry, &[]).await?;

        for referenced in [data_hash, creation_time_hash, entry_hash] {
            self.store.register_reference(referenced, "ChannelInfo", channel_id_hash).await?;
        }

        self.store
            .store_versioned(&ChannelInfo {
                channel_id: channel_id.to_string(),
                owner,
                head: Some(entry_hash),
            })
            .await?;

        self.publish(channel_id, ChannelEvent {
            channel_id: channel_id.to_string(),
            owner,
            entry_hash,
        });

        Ok(entry_hash)
    }

    /// Accepts a `ChannelInfo` version observed via CHUM sync rather than
    /// written locally: records the owner, stores the new version, and
    /// extends the `ChannelInfo` reverse-index registration the Access
    /// Engine relies on over whatever new `ChannelEntry`s the chain walk
    /// from `info.head` finds already present. Entries not yet received
    /// (sync delivers leaves before referrers, but an import can still be
    /// mid-flight) are picked up the next time this is called for a later
    /// version of the same channel.
    #[tracing::instrument(skip(self, info))]
    pub async fn ingest_remote_channel_info(&self, info: ChannelInfo) -> Result<Hash> {
        let channel_id_hash = canonical::id_hash(&info);
        self.note_owner(&info.channel_id, info.owner).await?;
        self.store.store_versioned(&info).await?;
        self.register_entry_chain(channel_id_hash, info.head).await?;
        if let Some(entry_hash) = info.head {
            self.publish(
                &info.channel_id,
                ChannelEvent {
                    channel_id: info.channel_id.clone(),
                    owner: info.owner,
                    entry_hash,
                },
            );
        }
        Ok(channel_id_hash)
    }

    /// Walks the `ChannelEntry` chain from `start`, registering each
    /// entry's `dataHash`/`creationTimeHash`/own hash against
    /// `channel_id_hash` until it reaches an entry already registered (or
    /// one not yet present locally).
    async fn register_entry_chain(&self, channel_id_hash: Hash, start: Option<Hash>) -> Result<()> {
        let mut cursor = start;
        while let Some(entry_hash) = cursor {
            let already_registered = self
                .store
                .reverse_lookup(entry_hash, "ChannelInfo")
                .await?
                .contains(&channel_id_hash);
            if already_registered {
                break;
            }
            let Ok(entry) = self.store.get_by_content_hash::<ChannelEntry>(entry_hash).await else {
                break;
            };
            for referenced in [entry.data_hash, entry.creation_time_hash, entry_hash] {
                self.store.register_reference(referenced, "ChannelInfo", channel_id_hash).await?;
            }
            cursor = entry.prev;
        }
        Ok(())
    }

    fn publish(&self, channel_id: &str, event: ChannelEvent) {
        if let Some(tx) = self.listeners.get(channel_id) {
            let _ = tx.try_broadcast(event);
        }
    }

    /// Subscribes to updates for `channel_id`: fires whenever any owner's
    /// `ChannelInfo` for this id receives a new version.
    pub fn on_updated(&self, channel_id: &str) -> async_broadcast::Receiver<ChannelEvent> {
        if let Some(tx) = self.listeners.get(channel_id) {
            return tx.new_receiver();
        }
        let (tx, rx) = async_broadcast::broadcast(64);
        self.listeners.insert(channel_id.to_string(), tx);
        rx
    }

    /// Merges entry streams from every locally known `ChannelInfo` owner
    /// for `channel_id`, newest-last, ordered by `CreationTime.timestamp`
    /// with `(owner, entryHash)` as tiebreak for determinism across peers.
    #[tracing::instrument(skip(self))]
    pub async fn iterate<T: Identified + DeserializeOwned>(
        &self,
        channel_id: &str,
        owner_filter: Option<PersonId>,
    ) -> Result<Vec<MergedEntry<T>>> {
        let owners = self
            .store
            .get_by_id_hash::<ChannelOwners>(Self::owners_id(channel_id))
            .await
            .map(|o| o.owners)
            .unwrap_or_default();

        let mut merged = Vec::new();
        for owner in owners {
            if let Some(wanted) = owner_filter {
                if owner != Some(wanted) {
                    continue;
                }
            }
            let id = Self::channel_info_id(channel_id, owner);
            let Ok(info) = self.store.get_by_id_hash::<ChannelInfo>(id).await else {
                continue;
            };
            let mut cursor = info.head;
            while let Some(entry_hash) = cursor {
                let entry: ChannelEntry = self.store.get_by_content_hash(entry_hash).await?;
                let creation_time: CreationTime = self.store.get_by_content_hash(entry.creation_time_hash).await?;
                let data: T = self.store.get_by_content_hash(entry.data_hash).await?;
                merged.push(MergedEntry {
                    owner,
                    timestamp: creation_time.timestamp,
                    entry_hash,
                    data,
                });
                cursor = entry.prev;
            }
        }

        merged.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| sort_key(a.owner).cmp(&sort_key(b.owner)))
                .then_with(|| a.entry_hash.to_hex().cmp(&b.entry_hash.to_hex()))
        });
        Ok(merged)
    }
}

fn sort_key(owner: Option<PersonId>) -> String {
    owner.map(|o| o.to_hex()).unwrap_or_default()
}

/// Convenience alias for the common case: iterating a topic of chat
/// messages.
pub type MergedMessage = MergedEntry<ChatMessage>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_iterate_single_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let manager = ChannelManager::new(store);
        let alice = Hash::of(b"alice");

        manager
            .append(
                "topic-1",
                Some(alice),
                &ChatMessage {
                    text: "hi".into(),
                    sender: alice,
                    attachments: vec![],
                },
            )
            .await
            .unwrap();

        let entries: Vec<MergedMessage> = manager.iterate("topic-1", None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data.text, "hi");
    }

    #[tokio::test]
    async fn append_chain_orders_by_creation_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let manager = ChannelManager::new(store);
        let alice = Hash::of(b"alice");

        manager
            .append(
                "topic-1",
                Some(alice),
                &ChatMessage {
                    text: "first".into(),
                    sender: alice,
                    attachments: vec![],
                },
            )
            .await
            .unwrap();
        manager
            .append(
                "topic-1",
                Some(alice),
                &ChatMessage {
                    text: "second".into(),
                    sender: alice,
                    attachments: vec![],
                },
            )
            .await
            .unwrap();

        let entries: Vec<MergedMessage> = manager.iterate("topic-1", None).await.unwrap();
        assert_eq!(entries.iter().map(|e| e.data.text.as_str()).collect::<Vec<_>>(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn merges_across_owners_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let manager = ChannelManager::new(store);
        let alice = Hash::of(b"alice");
        let bot = Hash::of(b"bot");

        manager
            .append(
                "topic-42",
                Some(alice),
                &ChatMessage {
                    text: "hello".into(),
                    sender: alice,
                    attachments: vec![],
                },
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        manager
            .append(
                "topic-42",
                Some(bot),
                &ChatMessage {
                    text: "hi".into(),
                    sender: bot,
                    attachments: vec![],
                },
            )
            .await
            .unwrap();

        let entries: Vec<MergedMessage> = manager.iterate("topic-42", None).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[tokio::test]
    async fn ingest_remote_channel_info_registers_entry_chain_for_access_checks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let remote_owner = Hash::of(b"remote-writer");

        let message = ChatMessage {
            text: "from another peer".into(),
            sender: remote_owner,
            attachments: vec![],
        };
        let data_hash = store.store_unversioned(&message, &[]).await.unwrap();
        let creation_time = CreationTime {
            timestamp: 1,
            data_hash,
        };
        let creation_time_hash = store.store_unversioned(&creation_time, &[]).await.unwrap();
        let entry = ChannelEntry {
            data_hash,
            creation_time_hash,
            prev: None,
        };
        let entry_hash = store.store_unversioned(&entry, &[]).await.unwrap();

        let manager = ChannelManager::new(store.clone());
        let info = ChannelInfo {
            channel_id: "topic-remote".into(),
            owner: Some(remote_owner),
            head: Some(entry_hash),
        };
        let channel_id_hash = manager.ingest_remote_channel_info(info).await.unwrap();

        let covering = store.reverse_lookup(data_hash, "ChannelInfo").await.unwrap();
        assert_eq!(covering, vec![channel_id_hash]);

        let entries: Vec<MergedMessage> = manager.iterate("topic-remote", None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data.text, "from another peer");
    }
}
