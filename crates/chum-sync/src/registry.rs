//! Type-directed dispatch for incoming CHUM objects (spec §4.7).
//!
//! Each sync-eligible type is deserialized from the wire payload, its
//! claimed hash is checked against the hash the object actually
//! canonicalizes to, and it is written through the appropriate store
//! entry point. `ingest` returns the hashes the object itself references,
//! so the engine can extend its pending-request set for anything not yet
//! on hand.
//!
//! `Group`, `Leute`, `ChannelOwners`, `BlockRecord`, `DefaultKeyPointer`
//! and `InvitationToken` are deliberately absent: groups never sync (to
//! avoid leaking membership), and the rest are local bookkeeping that has
//! no business leaving this instance. `Keys` is absent for the same
//! reason — see its doc comment in `chum-types`.

use crate::error::{Error, Result};
use chum_channel::ChannelManager;
use chum_store::ObjectStore;
use chum_types::{
    canonical, AccessGrant, ChannelEntry, ChannelInfo, ChatMessage, CreationTime, Hash, Instance,
    Person, Profile, Revocation, Someone, VerifiableCredential,
};

/// Every type name this node will accept over CHUM sync. Also used to
/// seed a new connection's export queue (`ObjectStore::list_by_type`).
pub const SYNC_ELIGIBLE_TYPES: &[&str] = &[
    "Person",
    "Instance",
    "Someone",
    "Profile",
    "ChannelInfo",
    "VerifiableCredential",
    "Revocation",
    "ChannelEntry",
    "CreationTime",
    "ChatMessage",
    "AccessGrant",
];

pub fn is_sync_eligible(type_name: &str) -> bool {
    SYNC_ELIGIBLE_TYPES.contains(&type_name)
}

/// Verifies `payload` hashes to `claimed`, stores it through the right
/// path for its type, and returns the hashes it references so the caller
/// can chase down anything missing.
pub async fn ingest(
    store: &ObjectStore,
    channels: &ChannelManager,
    claimed: Hash,
    type_name: &str,
    payload: serde_json::Value,
) -> Result<Vec<Hash>> {
    macro_rules! verified {
        ($ty:ty) => {{
            let obj: $ty = serde_json::from_value(payload)?;
            if canonical::content_hash(&obj) != claimed {
                return Err(Error::HashMismatch(claimed));
            }
            obj
        }};
    }

    match type_name {
        "Person" => {
            let obj = verified!(Person);
            store.store_versioned(&obj).await?;
            Ok(vec![])
        }
        "Instance" => {
            let obj = verified!(Instance);
            store.store_versioned(&obj).await?;
            Ok(vec![obj.owner])
        }
        "Someone" => {
            let obj = verified!(Someone);
            store.store_versioned(&obj).await?;
            let mut deps = obj.alternates.clone();
            deps.push(obj.main_identity);
            deps.extend(obj.profiles.iter().copied());
            Ok(deps)
        }
        "Profile" => {
            let obj = verified!(Profile);
            store.store_versioned(&obj).await?;
            Ok(vec![obj.person, obj.owner])
        }
        "ChannelInfo" => {
            let obj = verified!(ChannelInfo);
            let deps = obj.head.into_iter().collect();
            channels.ingest_remote_channel_info(obj).await?;
            Ok(deps)
        }
        "VerifiableCredential" => {
            let obj = verified!(VerifiableCredential);
            store.store_unversioned(&obj, &[]).await?;
            Ok(vec![])
        }
        "Revocation" => {
            let obj = verified!(Revocation);
            store
                .store_unversioned(&obj, &[obj.credential_hash])
                .await?;
            Ok(vec![obj.credential_hash])
        }
        "ChannelEntry" => {
            let obj = verified!(ChannelEntry);
            store.store_unversioned(&obj, &[]).await?;
            let mut deps = vec![obj.data_hash, obj.creation_time_hash];
            deps.extend(obj.prev);
            Ok(deps)
        }
        "CreationTime" => {
            let obj = verified!(CreationTime);
            store.store_unversioned(&obj, &[]).await?;
            Ok(vec![obj.data_hash])
        }
        "ChatMessage" => {
            let obj = verified!(ChatMessage);
            store.store_unversioned(&obj, &[]).await?;
            Ok(obj.attachments.iter().map(|a| a.content_hash).collect())
        }
        "AccessGrant" => {
            let obj = verified!(AccessGrant);
            let target_hash = obj.target.hash();
            store.store_unversioned(&obj, &[target_hash]).await?;
            Ok(vec![target_hash])
        }
        other => Err(Error::UnknownType(other.to_string())),
    }
}

/// The inverse of `ingest`: fetches an object this node already holds and
/// re-serializes it for the wire, re-verifying its hash on the way out so
/// a corrupted local copy is never forwarded to a peer.
pub async fn export_payload(store: &ObjectStore, hash: Hash, type_name: &str) -> Result<serde_json::Value> {
    macro_rules! fetched {
        ($ty:ty) => {
            serde_json::to_value(&store.get_by_content_hash::<$ty>(hash).await?)?
        };
    }

    let value = match type_name {
        "Person" => fetched!(Person),
        "Instance" => fetched!(Instance),
        "Someone" => fetched!(Someone),
        "Profile" => fetched!(Profile),
        "ChannelInfo" => fetched!(ChannelInfo),
        "VerifiableCredential" => fetched!(VerifiableCredential),
        "Revocation" => fetched!(Revocation),
        "ChannelEntry" => fetched!(ChannelEntry),
        "CreationTime" => fetched!(CreationTime),
        "ChatMessage" => fetched!(ChatMessage),
        "AccessGrant" => fetched!(AccessGrant),
        other => return Err(Error::UnknownType(other.to_string())),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chum_types::Target;

    #[tokio::test]
    async fn unknown_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let channels = ChannelManager::new(store.clone());
        let err = ingest(&store, &channels, Hash::of(b"x"), "Nonsense", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownType(t) if t == "Nonsense"));
    }

    #[tokio::test]
    async fn hash_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let channels = ChannelManager::new(store.clone());
        let person = Person { email: "a@example.com".into() };
        let payload = serde_json::to_value(&person).unwrap();
        let wrong = Hash::of(b"not-the-real-hash");
        let err = ingest(&store, &channels, wrong, "Person", payload).await.unwrap_err();
        assert!(matches!(err, Error::HashMismatch(h) if h == wrong));
    }

    #[tokio::test]
    async fn export_payload_round_trips_through_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let channels = ChannelManager::new(store.clone());
        let person = Person { email: "round@example.com".into() };
        let hash = canonical::content_hash(&person);
        let payload = serde_json::to_value(&person).unwrap();
        ingest(&store, &channels, hash, "Person", payload).await.unwrap();

        let exported = export_payload(&store, hash, "Person").await.unwrap();
        let roundtripped: Person = serde_json::from_value(exported).unwrap();
        assert_eq!(roundtripped, person);
    }

    #[tokio::test]
    async fn access_grant_ingest_reports_target_as_a_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).await.unwrap();
        let channels = ChannelManager::new(store.clone());
        let target = Hash::of(b"target-object");
        let grant = AccessGrant {
            target: Target::Content(target),
            persons: vec![],
            groups: vec![],
            mode: chum_types::GrantMode::Add,
        };
        let hash = canonical::content_hash(&grant);
        let payload = serde_json::to_value(&grant).unwrap();
        let deps = ingest(&store, &channels, hash, "AccessGrant", payload).await.unwrap();
        assert_eq!(deps, vec![target]);
        assert!(store.reverse_lookup(target, "AccessGrant").await.unwrap().contains(
            &canonical::content_hash(&grant)
        ));
    }
}
