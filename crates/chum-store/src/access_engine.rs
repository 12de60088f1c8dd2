//! Access Engine: evaluates `canRead(person, hash)` per spec §4.2.
//!
//! A hash is readable if the person (directly, or through group
//! membership) is named by an `AccessGrant` targeting that hash, the id
//! hash of a `ChannelInfo` whose chain contains an entry referencing it,
//! or the id hash of a `Someone` that lists it among its profiles. Results
//! are cached per `(person, hash)` and invalidated wholesale whenever a
//! grant or group changes, since both are cheap to recompute and rare to
//! write compared to `canRead` calls made on every sync export.

use crate::object_store::ObjectStore;
use chum_types::{AccessGrant, Group, GrantMode, GroupId, Hash, PersonId, Result, Target};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AccessEngine {
    store: ObjectStore,
    cache: Arc<DashMap<(PersonId, Hash), bool>>,
}

impl AccessEngine {
    pub fn new(store: ObjectStore) -> Self {
        AccessEngine {
            store,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Stores a grant and invalidates the read cache. `AccessGrant` is
    /// unversioned (a scope change is a new grant, per `chum_types::access`),
    /// so this always appends rather than superseding a prior write.
    #[tracing::instrument(skip(self, grant))]
    pub async fn grant(&self, grant: AccessGrant) -> Result<Hash> {
        let target_hash = grant.target.hash();
        let hash = self.store.store_unversioned(&grant, &[target_hash]).await?;
        self.cache.clear();
        Ok(hash)
    }

    /// Must be called whenever a `Group`'s membership changes, since group
    /// membership is not itself tracked by the reverse index the way grant
    /// targets are.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    #[tracing::instrument(skip(self))]
    pub async fn can_read(&self, person: PersonId, hash: Hash) -> Result<bool> {
        if let Some(cached) = self.cache.get(&(person, hash)) {
            return Ok(*cached);
        }
        let allowed = self.evaluate(person, hash).await?;
        self.cache.insert((person, hash), allowed);
        Ok(allowed)
    }

    async fn evaluate(&self, person: PersonId, hash: Hash) -> Result<bool> {
        let mut targets = vec![Target::Content(hash)];
        for channel_id in self.store.reverse_lookup(hash, "ChannelInfo").await? {
            targets.push(Target::Id(channel_id));
        }
        for someone_id in self.store.reverse_lookup(hash, "Someone").await? {
            targets.push(Target::Id(someone_id));
        }

        for target in targets {
            if self.target_covers(person, target).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Folds every grant written against `target`, in write order, into
    /// the persons/groups currently allowed: `Add` unions into the
    /// accumulator built so far, `Set` discards it and starts over from
    /// just this grant's own persons/groups, per spec §4.2.
    async fn target_covers(&self, person: PersonId, target: Target) -> Result<bool> {
        let grant_hashes = self.store.reverse_lookup(target.hash(), "AccessGrant").await?;
        let mut persons: Vec<PersonId> = Vec::new();
        let mut groups: Vec<GroupId> = Vec::new();
        for grant_hash in grant_hashes {
            let grant: AccessGrant = match self.store.get_by_content_hash(grant_hash).await {
                Ok(g) => g,
                Err(_) => continue,
            };
            if grant.target != target {
                continue;
            }
            match grant.mode {
                GrantMode::Set => {
                    persons = grant.persons.clone();
                    groups = grant.groups.clone();
                }
                GrantMode::Add => {
                    persons.extend(grant.persons.iter().copied());
                    groups.extend(grant.groups.iter().copied());
                }
            }
        }
        if persons.contains(&person) {
            return Ok(true);
        }
        Ok(!self.groups_for(person, &groups).await.is_empty())
    }

    /// Of the groups a grant names, the subset `person` actually belongs
    /// to. Groups never sync (§9), so this only ever resolves against
    /// locally-known `Group` objects; an unknown group id simply never
    /// matches, and a known group that doesn't list `person` among its
    /// members is excluded rather than treated as a match.
    async fn groups_for(&self, person: PersonId, candidate_groups: &[GroupId]) -> Vec<GroupId> {
        let mut member_of = Vec::new();
        for group_id in candidate_groups {
            if let Ok(group) = self.store.get_by_id_hash::<Group>(*group_id).await {
                if group.members.contains(&person) {
                    member_of.push(*group_id);
                }
            }
        }
        member_of
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chum_types::GrantMode;

    #[tokio::test]
    async fn direct_person_grant_allows_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let engine = AccessEngine::new(store);
        let alice = Hash::of(b"alice");
        let msg_hash = Hash::of(b"message");

        assert!(!engine.can_read(alice, msg_hash).await.unwrap());

        engine
            .grant(AccessGrant {
                target: Target::Content(msg_hash),
                persons: vec![alice],
                groups: vec![],
                mode: GrantMode::Add,
            })
            .await
            .unwrap();

        assert!(engine.can_read(alice, msg_hash).await.unwrap());
    }

    #[tokio::test]
    async fn group_membership_grants_transitively() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let engine = AccessEngine::new(store.clone());
        let bob = Hash::of(b"bob");
        let msg_hash = Hash::of(b"group-message");

        let group = Group {
            name: "friends".into(),
            members: vec![bob],
        };
        let write = store.store_versioned(&group).await.unwrap();

        engine
            .grant(AccessGrant {
                target: Target::Content(msg_hash),
                persons: vec![],
                groups: vec![write.id_hash],
                mode: GrantMode::Add,
            })
            .await
            .unwrap();

        assert!(engine.can_read(bob, msg_hash).await.unwrap());
    }

    #[tokio::test]
    async fn unrelated_person_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let engine = AccessEngine::new(store);
        let eve = Hash::of(b"eve");
        assert!(!engine.can_read(eve, Hash::of(b"secret")).await.unwrap());
    }

    #[tokio::test]
    async fn set_grant_replaces_earlier_add_grant() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let engine = AccessEngine::new(store);
        let alice = Hash::of(b"alice");
        let bob = Hash::of(b"bob");
        let msg_hash = Hash::of(b"message");

        engine
            .grant(AccessGrant {
                target: Target::Content(msg_hash),
                persons: vec![alice],
                groups: vec![],
                mode: GrantMode::Add,
            })
            .await
            .unwrap();
        assert!(engine.can_read(alice, msg_hash).await.unwrap());

        engine
            .grant(AccessGrant {
                target: Target::Content(msg_hash),
                persons: vec![bob],
                groups: vec![],
                mode: GrantMode::Set,
            })
            .await
            .unwrap();

        assert!(!engine.can_read(alice, msg_hash).await.unwrap());
        assert!(engine.can_read(bob, msg_hash).await.unwrap());
    }
}
