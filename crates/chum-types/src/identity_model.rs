use crate::canonical::{CanonicalValue, Identified};
use crate::hash::Hash;
use serde::{Deserialize, Serialize};

/// Id hash of a `Person` object: the stable handle used everywhere a
/// "who" is needed (grants, credentials, channel ownership, group
/// membership).
pub type PersonId = Hash;
/// Id hash of an `Instance` object.
pub type InstanceId = Hash;
/// Id hash of a `Group` object. Groups themselves never sync (§9); only
/// grants referencing this id do.
pub type GroupId = Hash;

/// Global identity for a human or AI persona. Versioned; id is the email.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Person {
    pub email: String,
}

impl Identified for Person {
    const TYPE_NAME: &'static str = "Person";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![("email", CanonicalValue::Str(self.email.clone()))])
    }

    fn id_field_names() -> &'static [&'static str] {
        &["email"]
    }
}

/// A running process belonging to a `Person`. Versioned; id is
/// `(owner, name)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub owner: PersonId,
    pub name: String,
}

impl Identified for Instance {
    const TYPE_NAME: &'static str = "Instance";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("owner", CanonicalValue::Bytes(self.owner.as_bytes().to_vec())),
            ("name", CanonicalValue::Str(self.name.clone())),
        ])
    }

    fn id_field_names() -> &'static [&'static str] {
        &["owner", "name"]
    }
}

/// Sign + encrypt key pair. Unversioned; never exported via CHUM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keys {
    pub sign_public: Vec<u8>,
    pub encrypt_public: Vec<u8>,
    /// Secret key material. `zeroize`d on drop by the keychain that holds
    /// it; stored here only long enough to persist to local-only storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_secret: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypt_secret: Option<Vec<u8>>,
}

impl Identified for Keys {
    const TYPE_NAME: &'static str = "Keys";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("sign_public", CanonicalValue::Bytes(self.sign_public.clone())),
            (
                "encrypt_public",
                CanonicalValue::Bytes(self.encrypt_public.clone()),
            ),
        ])
    }
}

/// Descriptive data about a `Person`, authored by another `Person`.
/// Versioned; id is `(person, owner, profile_id)` so multiple profiles per
/// person, authored by different people, can coexist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub person: PersonId,
    pub owner: PersonId,
    pub profile_id: String,
    pub display_name: Option<String>,
    pub endpoints: Vec<String>,
    pub main: bool,
}

impl Identified for Profile {
    const TYPE_NAME: &'static str = "Profile";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("person", CanonicalValue::Bytes(self.person.as_bytes().to_vec())),
            ("owner", CanonicalValue::Bytes(self.owner.as_bytes().to_vec())),
            ("profile_id", CanonicalValue::Str(self.profile_id.clone())),
            (
                "display_name",
                match &self.display_name {
                    Some(name) => CanonicalValue::Str(name.clone()),
                    None => CanonicalValue::Null,
                },
            ),
            (
                "endpoints",
                CanonicalValue::List(
                    self.endpoints
                        .iter()
                        .map(|e| CanonicalValue::Str(e.clone()))
                        .collect(),
                ),
            ),
            ("main", CanonicalValue::Bool(self.main)),
        ])
    }

    fn id_field_names() -> &'static [&'static str] {
        &["person", "owner", "profile_id"]
    }
}

/// Aggregates identities (main Person + alternates) and their profiles
/// into one contact-book entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Someone {
    pub someone_id: String,
    pub main_identity: PersonId,
    pub alternates: Vec<PersonId>,
    pub profiles: Vec<Hash>,
}

impl Identified for Someone {
    const TYPE_NAME: &'static str = "Someone";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("someone_id", CanonicalValue::Str(self.someone_id.clone())),
            (
                "main_identity",
                CanonicalValue::Bytes(self.main_identity.as_bytes().to_vec()),
            ),
            (
                "alternates",
                CanonicalValue::List(
                    self.alternates
                        .iter()
                        .map(|p| CanonicalValue::Bytes(p.as_bytes().to_vec()))
                        .collect(),
                ),
            ),
            (
                "profiles",
                CanonicalValue::List(
                    self.profiles
                        .iter()
                        .map(|p| CanonicalValue::Bytes(p.as_bytes().to_vec()))
                        .collect(),
                ),
            ),
        ])
    }

    fn id_field_names() -> &'static [&'static str] {
        &["someone_id"]
    }
}

/// Singleton contact book. `me` is never reassigned after first write
/// (enforced by the Leute manager, not by this type).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Leute {
    pub app_id: String,
    pub me: Hash,
    pub other: Vec<Hash>,
    pub groups: Vec<Hash>,
}

impl Identified for Leute {
    const TYPE_NAME: &'static str = "Leute";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("app_id", CanonicalValue::Str(self.app_id.clone())),
            ("me", CanonicalValue::Bytes(self.me.as_bytes().to_vec())),
            (
                "other",
                CanonicalValue::List(
                    self.other
                        .iter()
                        .map(|h| CanonicalValue::Bytes(h.as_bytes().to_vec()))
                        .collect(),
                ),
            ),
            (
                "groups",
                CanonicalValue::List(
                    self.groups
                        .iter()
                        .map(|h| CanonicalValue::Bytes(h.as_bytes().to_vec()))
                        .collect(),
                ),
            ),
        ])
    }

    fn id_field_names() -> &'static [&'static str] {
        &["app_id"]
    }
}

/// Ordered list of Person members, addressed by name. Never transmitted
/// via CHUM — only grants referencing `GroupId` are (§9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub members: Vec<PersonId>,
}

impl Identified for Group {
    const TYPE_NAME: &'static str = "Group";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("name", CanonicalValue::Str(self.name.clone())),
            (
                "members",
                CanonicalValue::List(
                    self.members
                        .iter()
                        .map(|p| CanonicalValue::Bytes(p.as_bytes().to_vec()))
                        .collect(),
                ),
            ),
        ])
    }

    fn id_field_names() -> &'static [&'static str] {
        &["name"]
    }
}

impl Group {
    /// Builds a new `Group` value with an added member. Per the
    /// frozen-array design note (§9), versioned objects are treated as
    /// immutable values: callers construct a new `Group` rather than
    /// mutating `members` in place before re-storing it.
    pub fn with_member_added(&self, member: PersonId) -> Self {
        let mut members = self.members.clone();
        if !members.contains(&member) {
            members.push(member);
        }
        Group {
            name: self.name.clone(),
            members,
        }
    }

    pub fn with_member_removed(&self, member: &PersonId) -> Self {
        let members = self.members.iter().filter(|m| *m != member).cloned().collect();
        Group {
            name: self.name.clone(),
            members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::id_hash;

    #[test]
    fn person_id_hash_stable_across_email_only() {
        let a = Person {
            email: "alice@example.com".into(),
        };
        let b = Person {
            email: "alice@example.com".into(),
        };
        assert_eq!(id_hash(&a), id_hash(&b));
    }

    #[test]
    fn group_member_add_is_immutable() {
        let g = Group {
            name: "team".into(),
            members: vec![],
        };
        let member = Hash::of(b"alice");
        let g2 = g.with_member_added(member);
        assert!(g.members.is_empty());
        assert_eq!(g2.members, vec![member]);
    }
}
