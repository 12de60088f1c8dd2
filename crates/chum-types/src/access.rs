use crate::canonical::{CanonicalValue, Identified};
use crate::hash::Hash;
use crate::identity_model::{GroupId, PersonId};
use serde::{Deserialize, Serialize};

/// What an access grant targets: one specific content-addressed object, or
/// every version (past and future) of a versioned object via its id hash.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Target {
    Content(Hash),
    Id(Hash),
}

impl Target {
    pub fn hash(&self) -> Hash {
        match self {
            Target::Content(h) | Target::Id(h) => *h,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Target::Content(_) => "content",
            Target::Id(_) => "id",
        }
    }
}

/// `Add` unions persons/groups with any existing grant on the same
/// target; `Set` replaces it outright.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GrantMode {
    Add,
    Set,
}

/// A signed-adjacent (not itself signed at this layer — see
/// `chum-identity` for issuer provenance on grants that need it) record
/// authorizing a set of persons/groups to read a hash or id hash.
/// Unversioned: a change in scope is a brand new grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessGrant {
    pub target: Target,
    pub persons: Vec<PersonId>,
    pub groups: Vec<GroupId>,
    pub mode: GrantMode,
}

impl Identified for AccessGrant {
    const TYPE_NAME: &'static str = "AccessGrant";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("target_kind", CanonicalValue::Str(self.target.tag().to_string())),
            (
                "target_hash",
                CanonicalValue::Bytes(self.target.hash().as_bytes().to_vec()),
            ),
            (
                "persons",
                CanonicalValue::List(
                    self.persons
                        .iter()
                        .map(|p| CanonicalValue::Bytes(p.as_bytes().to_vec()))
                        .collect(),
                ),
            ),
            (
                "groups",
                CanonicalValue::List(
                    self.groups
                        .iter()
                        .map(|g| CanonicalValue::Bytes(g.as_bytes().to_vec()))
                        .collect(),
                ),
            ),
            (
                "mode",
                CanonicalValue::Str(
                    match self.mode {
                        GrantMode::Add => "add",
                        GrantMode::Set => "set",
                    }
                    .to_string(),
                ),
            ),
        ])
    }
}

impl AccessGrant {
    pub fn covers(&self, person: &PersonId, member_of: &[GroupId]) -> bool {
        self.persons.contains(person) || self.groups.iter().any(|g| member_of.contains(g))
    }
}
