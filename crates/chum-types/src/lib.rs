//! Shared data model, canonical serialization, and error kinds for the
//! federated peer-to-peer messaging core. Every other crate in the
//! workspace depends on this one; it has no knowledge of storage, access
//! control, transport or sync — those live in their own crates.

pub mod access;
pub mod canonical;
pub mod channel_model;
pub mod credential;
pub mod error;
pub mod hash;
pub mod identity_model;

pub use access::{AccessGrant, GrantMode, Target};
pub use canonical::{content_hash, id_hash, CanonicalValue, Identified};
pub use channel_model::{one_to_one_topic_id, Attachment, ChannelEntry, ChannelInfo, ChatMessage, CreationTime};
pub use credential::{Capability, Revocation, TrustLevel, VerifiableCredential};
pub use error::{Error, Result};
pub use hash::Hash;
pub use identity_model::{Group, GroupId, Instance, InstanceId, Keys, Leute, Person, PersonId, Profile, Someone};

/// Milliseconds since the Unix epoch, the timestamp unit used throughout
/// the data model (`CreationTime`, `VerifiableCredential`).
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
