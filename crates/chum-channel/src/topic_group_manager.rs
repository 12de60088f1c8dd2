//! Topic & Group Manager: materializes topics out of channels and
//! manages the `Group` objects that gate group-topic access (spec §4.9).

use crate::channel_manager::ChannelManager;
use chum_store::{AccessEngine, ObjectStore};
use chum_types::canonical;
use chum_types::{one_to_one_topic_id, AccessGrant, Error, Group, GroupId, GrantMode, Hash, PersonId, Result, Target};

#[derive(Clone)]
pub struct TopicGroupManager {
    store: ObjectStore,
    access: AccessEngine,
    channels: ChannelManager,
}

impl TopicGroupManager {
    pub fn new(store: ObjectStore, access: AccessEngine, channels: ChannelManager) -> Self {
        TopicGroupManager { store, access, channels }
    }

    fn is_one_to_one(topic_id: &str) -> bool {
        topic_id.contains("<->")
    }

    /// Creates a `Group` containing `participants` (the caller should
    /// include themselves), a self-owned `ChannelInfo` with id `topic_id`,
    /// and an id-targeted grant on that channel referencing the group.
    #[tracing::instrument(skip(self, participants))]
    pub async fn create_group_topic(
        &self,
        self_person: PersonId,
        name: &str,
        topic_id: &str,
        participants: &[PersonId],
    ) -> Result<GroupId> {
        if Self::is_one_to_one(topic_id) {
            return Err(Error::InvalidGroupOperation);
        }
        let group = Group {
            name: name.to_string(),
            members: participants.to_vec(),
        };
        let write = self.store.store_versioned(&group).await?;

        let channel_id_hash = self.channels.create_channel(topic_id, Some(self_person)).await?;

        self.access
            .grant(AccessGrant {
                target: Target::Id(channel_id_hash),
                persons: vec![],
                groups: vec![write.id_hash],
                mode: GrantMode::Add,
            })
            .await?;

        Ok(write.id_hash)
    }

    /// `topicId = sort(a,b).join("<->")`; exactly one shared (owner=null)
    /// `ChannelInfo`, granted by person (never by group) per §4.9.
    /// Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn create_one_to_one_topic(&self, a: PersonId, b: PersonId) -> Result<String> {
        let topic_id = one_to_one_topic_id(&a, &b);
        let channel_id_hash = self.channels.create_channel(&topic_id, None).await?;

        self.access
            .grant(AccessGrant {
                target: Target::Id(channel_id_hash),
                persons: vec![a, b],
                groups: vec![],
                mode: GrantMode::Add,
            })
            .await?;

        Ok(topic_id)
    }

    /// Appends `new_persons` to the group backing `topic_id` and issues a
    /// fresh grant so the enlarged membership covers the self-owned
    /// channel. Errors on 1:1 topics.
    #[tracing::instrument(skip(self, new_persons))]
    pub async fn add_participants(&self, self_person: PersonId, topic_id: &str, new_persons: &[PersonId]) -> Result<()> {
        if Self::is_one_to_one(topic_id) {
            return Err(Error::InvalidGroupOperation);
        }
        let channel_id_hash = self.channels.create_channel(topic_id, Some(self_person)).await?;
        let group_id = self.get_group_for_topic(self_person, topic_id).await?;
        let mut group: Group = self.store.get_by_id_hash(group_id).await?;
        for person in new_persons {
            group = group.with_member_added(*person);
        }
        self.store.store_versioned(&group).await?;
        self.access.invalidate();

        self.access
            .grant(AccessGrant {
                target: Target::Id(channel_id_hash),
                persons: vec![],
                groups: vec![group_id],
                mode: GrantMode::Add,
            })
            .await?;
        Ok(())
    }

    /// Removes `removed_persons` from the group backing `topic_id` by
    /// storing a new `Group` version with the same id hash and fewer
    /// members (spec §9's frozen-array pitfall: a new array, not an
    /// in-place mutation). The existing grant already targets the group's
    /// id hash rather than a specific version, so no new grant is needed —
    /// `AccessEngine::groups_for` resolves group membership against the
    /// latest stored version, so removed persons lose read access to the
    /// self-owned channel (and anything it references) as soon as the
    /// cache is invalidated. Errors on 1:1 topics, which are never
    /// group-gated.
    #[tracing::instrument(skip(self, removed_persons))]
    pub async fn remove_participants(&self, self_person: PersonId, topic_id: &str, removed_persons: &[PersonId]) -> Result<()> {
        if Self::is_one_to_one(topic_id) {
            return Err(Error::InvalidGroupOperation);
        }
        let group_id = self.get_group_for_topic(self_person, topic_id).await?;
        let mut group: Group = self.store.get_by_id_hash(group_id).await?;
        for person in removed_persons {
            group = group.with_member_removed(person);
        }
        self.store.store_versioned(&group).await?;
        self.access.invalidate();
        Ok(())
    }

    /// Reverse-lookup: the `Group` id hash referenced by a grant on
    /// `self_person`'s own `ChannelInfo` for `topic_id`.
    #[tracing::instrument(skip(self))]
    pub async fn get_group_for_topic(&self, self_person: PersonId, topic_id: &str) -> Result<GroupId> {
        let channel_id_hash = canonical::id_hash(&chum_types::ChannelInfo {
            channel_id: topic_id.to_string(),
            owner: Some(self_person),
            head: None,
        });
        let grant_hashes = self.store.reverse_lookup(channel_id_hash, "AccessGrant").await?;
        for grant_hash in grant_hashes {
            let grant: AccessGrant = self.store.get_by_content_hash(grant_hash).await?;
            if grant.target == Target::Id(channel_id_hash) {
                if let Some(group_id) = grant.groups.first() {
                    return Ok(*group_id);
                }
            }
        }
        Err(Error::NotFound(channel_id_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_to_one_topic_grants_both_persons_directly() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let access = AccessEngine::new(store.clone());
        let channels = ChannelManager::new(store.clone());
        let manager = TopicGroupManager::new(store, access.clone(), channels);

        let a = Hash::of(b"a");
        let b = Hash::of(b"b");
        let topic_id = manager.create_one_to_one_topic(a, b).await.unwrap();
        assert_eq!(topic_id, one_to_one_topic_id(&a, &b));

        let channel_id_hash = canonical::id_hash(&chum_types::ChannelInfo {
            channel_id: topic_id,
            owner: None,
            head: None,
        });
        assert!(access.can_read(a, channel_id_hash).await.unwrap());
        assert!(access.can_read(b, channel_id_hash).await.unwrap());
    }

    #[tokio::test]
    async fn add_participants_extends_group_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let access = AccessEngine::new(store.clone());
        let channels = ChannelManager::new(store.clone());
        let manager = TopicGroupManager::new(store.clone(), access.clone(), channels.clone());

        let alice = Hash::of(b"alice");
        let bob = Hash::of(b"bob");
        let carol = Hash::of(b"carol");

        manager
            .create_group_topic(alice, "trio", "topic-1", &[alice, bob])
            .await
            .unwrap();

        let msg = chum_types::ChatMessage {
            text: "hi".into(),
            sender: alice,
            attachments: vec![],
        };
        let entry_hash = channels.append("topic-1", Some(alice), &msg).await.unwrap();
        let entry: chum_types::ChannelEntry = store.get_by_content_hash(entry_hash).await.unwrap();

        assert!(!access.can_read(carol, entry.data_hash).await.unwrap());

        manager.add_participants(alice, "topic-1", &[carol]).await.unwrap();
        assert!(access.can_read(carol, entry.data_hash).await.unwrap());
    }

    #[tokio::test]
    async fn remove_participants_revokes_access() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let access = AccessEngine::new(store.clone());
        let channels = ChannelManager::new(store.clone());
        let manager = TopicGroupManager::new(store.clone(), access.clone(), channels.clone());

        let alice = Hash::of(b"alice");
        let bob = Hash::of(b"bob");

        manager
            .create_group_topic(alice, "pair", "topic-4", &[alice, bob])
            .await
            .unwrap();

        let msg = chum_types::ChatMessage {
            text: "hi".into(),
            sender: alice,
            attachments: vec![],
        };
        let entry_hash = channels.append("topic-4", Some(alice), &msg).await.unwrap();
        let entry: chum_types::ChannelEntry = store.get_by_content_hash(entry_hash).await.unwrap();
        assert!(access.can_read(bob, entry.data_hash).await.unwrap());

        manager.remove_participants(alice, "topic-4", &[bob]).await.unwrap();
        assert!(!access.can_read(bob, entry.data_hash).await.unwrap());

        let later = chum_types::ChatMessage {
            text: "still here".into(),
            sender: alice,
            attachments: vec![],
        };
        let later_entry_hash = channels.append("topic-4", Some(alice), &later).await.unwrap();
        let later_entry: chum_types::ChannelEntry = store.get_by_content_hash(later_entry_hash).await.unwrap();
        assert!(access.can_read(alice, later_entry.data_hash).await.unwrap());
    }

    #[tokio::test]
    async fn add_participants_rejected_for_one_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let access = AccessEngine::new(store.clone());
        let channels = ChannelManager::new(store.clone());
        let manager = TopicGroupManager::new(store, access, channels);

        let a = Hash::of(b"a");
        let b = Hash::of(b"b");
        let topic_id = manager.create_one_to_one_topic(a, b).await.unwrap();
        let err = manager.add_participants(a, &topic_id, &[Hash::of(b"c")]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidGroupOperation));
    }
}
