use crate::canonical::{CanonicalValue, Identified};
use crate::hash::Hash;
use crate::identity_model::PersonId;
use serde::{Deserialize, Serialize};

/// Head of a per-owner append-only log. Versioned; id is
/// `(channel_id, owner)`. `owner = None` denotes a shared channel, used
/// exclusively for 1:1 topics (§3, §9 open question 1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub owner: Option<PersonId>,
    /// Content hash of the most recent `ChannelEntry`. `None` for a
    /// freshly created, still-empty channel.
    pub head: Option<Hash>,
}

impl Identified for ChannelInfo {
    const TYPE_NAME: &'static str = "ChannelInfo";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("channel_id", CanonicalValue::Str(self.channel_id.clone())),
            (
                "owner",
                match &self.owner {
                    Some(p) => CanonicalValue::Bytes(p.as_bytes().to_vec()),
                    None => CanonicalValue::Null,
                },
            ),
            (
                "head",
                match &self.head {
                    Some(h) => CanonicalValue::Bytes(h.as_bytes().to_vec()),
                    None => CanonicalValue::Null,
                },
            ),
        ])
    }

    fn id_field_names() -> &'static [&'static str] {
        &["channel_id", "owner"]
    }
}

/// One link in a channel's append-only chain. Unversioned: every append
/// produces a brand new entry that content-hashes to a new address;
/// `prev` is the content hash of the previous entry, so the chain is a
/// hash-linked list that can never be rewritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelEntry {
    pub data_hash: Hash,
    pub creation_time_hash: Hash,
    pub prev: Option<Hash>,
}

impl Identified for ChannelEntry {
    const TYPE_NAME: &'static str = "ChannelEntry";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("data_hash", CanonicalValue::Bytes(self.data_hash.as_bytes().to_vec())),
            (
                "creation_time_hash",
                CanonicalValue::Bytes(self.creation_time_hash.as_bytes().to_vec()),
            ),
            (
                "prev",
                match &self.prev {
                    Some(h) => CanonicalValue::Bytes(h.as_bytes().to_vec()),
                    None => CanonicalValue::Null,
                },
            ),
        ])
    }
}

/// Decouples a timestamp from the data it annotates, so the same payload
/// reused in two channels produces distinct entries (different
/// `CreationTime`s reference the same `data_hash`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreationTime {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub data_hash: Hash,
}

impl Identified for CreationTime {
    const TYPE_NAME: &'static str = "CreationTime";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("timestamp", CanonicalValue::Int(self.timestamp)),
            ("data_hash", CanonicalValue::Bytes(self.data_hash.as_bytes().to_vec())),
        ])
    }
}

/// An attachment reference carried on a `ChatMessage`: a content hash of
/// an unversioned blob stored separately in the Object Store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content_hash: Hash,
    pub mime_type: Option<String>,
}

/// A chat message. Unversioned: editing is not modeled as mutation — a
/// new message referencing the original via `replied`/metadata would be
/// the idiomatic way to layer that on top, consistent with no-deletion
/// non-goal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    pub sender: PersonId,
    pub attachments: Vec<Attachment>,
}

impl Identified for ChatMessage {
    const TYPE_NAME: &'static str = "ChatMessage";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("text", CanonicalValue::Str(self.text.clone())),
            ("sender", CanonicalValue::Bytes(self.sender.as_bytes().to_vec())),
            (
                "attachments",
                CanonicalValue::List(
                    self.attachments
                        .iter()
                        .map(|a| {
                            CanonicalValue::Map(vec![
                                ("name", CanonicalValue::Str(a.name.clone())),
                                (
                                    "content_hash",
                                    CanonicalValue::Bytes(a.content_hash.as_bytes().to_vec()),
                                ),
                                (
                                    "mime_type",
                                    match &a.mime_type {
                                        Some(m) => CanonicalValue::Str(m.clone()),
                                        None => CanonicalValue::Null,
                                    },
                                ),
                            ])
                        })
                        .collect(),
                ),
            ),
        ])
    }
}

/// Computes the 1:1 topic id for a pair of persons: lexicographically
/// sorted hex, joined by `<->`, independent of call order.
pub fn one_to_one_topic_id(a: &PersonId, b: &PersonId) -> String {
    let (a, b) = (a.to_hex(), b.to_hex());
    if a <= b {
        format!("{a}<->{b}")
    } else {
        format!("{b}<->{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::content_hash;

    #[test]
    fn one_to_one_topic_id_is_order_independent() {
        let a = Hash::of(b"aa");
        let b = Hash::of(b"bb");
        assert_eq!(one_to_one_topic_id(&a, &b), one_to_one_topic_id(&b, &a));
    }

    #[test]
    fn channel_entry_content_hash_changes_with_prev() {
        let base = ChannelEntry {
            data_hash: Hash::of(b"data"),
            creation_time_hash: Hash::of(b"ct"),
            prev: None,
        };
        let linked = ChannelEntry {
            prev: Some(Hash::of(b"previous-head")),
            ..base.clone()
        };
        assert_ne!(content_hash(&base), content_hash(&linked));
    }
}
