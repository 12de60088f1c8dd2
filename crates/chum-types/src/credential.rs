use crate::canonical::{CanonicalValue, Identified};
use crate::hash::Hash;
use crate::identity_model::{InstanceId, PersonId};
use serde::{Deserialize, Serialize};

/// A capability a Verifiable Credential can attest to. Kept as an open
/// string set rather than a closed enum: the QUIC-VC transport and the
/// CHUM sync engine both gate behavior on capability strings (e.g.
/// `"sync"`) without `chum-types` needing to know every consumer's
/// vocabulary.
pub type Capability = String;

/// Signed attestation used in lieu of a TLS certificate. Unversioned: a
/// renewed or amended credential is a new object with a new signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifiableCredential {
    pub issuer: PersonId,
    pub subject: PersonId,
    pub instance_id: InstanceId,
    pub public_key: Vec<u8>,
    pub capabilities: Vec<Capability>,
    /// Milliseconds since the Unix epoch.
    pub issued_at: i64,
    pub expires_at: i64,
    pub signature: Vec<u8>,
}

impl VerifiableCredential {
    /// The bytes the issuer's signature covers: every field except the
    /// signature itself.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let unsigned = UnsignedCredential {
            issuer: self.issuer,
            subject: self.subject,
            instance_id: self.instance_id,
            public_key: self.public_key.clone(),
            capabilities: self.capabilities.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
        };
        crate::canonical::to_canonical_bytes(&unsigned.canonical_fields())
    }

    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }
}

struct UnsignedCredential {
    issuer: PersonId,
    subject: PersonId,
    instance_id: InstanceId,
    public_key: Vec<u8>,
    capabilities: Vec<Capability>,
    issued_at: i64,
    expires_at: i64,
}

impl Identified for UnsignedCredential {
    const TYPE_NAME: &'static str = "VerifiableCredential";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("issuer", CanonicalValue::Bytes(self.issuer.as_bytes().to_vec())),
            ("subject", CanonicalValue::Bytes(self.subject.as_bytes().to_vec())),
            (
                "instance_id",
                CanonicalValue::Bytes(self.instance_id.as_bytes().to_vec()),
            ),
            ("public_key", CanonicalValue::Bytes(self.public_key.clone())),
            (
                "capabilities",
                CanonicalValue::List(
                    self.capabilities
                        .iter()
                        .map(|c| CanonicalValue::Str(c.clone()))
                        .collect(),
                ),
            ),
            ("issued_at", CanonicalValue::Int(self.issued_at)),
            ("expires_at", CanonicalValue::Int(self.expires_at)),
        ])
    }
}

impl Identified for VerifiableCredential {
    const TYPE_NAME: &'static str = "VerifiableCredential";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            ("issuer", CanonicalValue::Bytes(self.issuer.as_bytes().to_vec())),
            ("subject", CanonicalValue::Bytes(self.subject.as_bytes().to_vec())),
            (
                "instance_id",
                CanonicalValue::Bytes(self.instance_id.as_bytes().to_vec()),
            ),
            ("public_key", CanonicalValue::Bytes(self.public_key.clone())),
            (
                "capabilities",
                CanonicalValue::List(
                    self.capabilities
                        .iter()
                        .map(|c| CanonicalValue::Str(c.clone()))
                        .collect(),
                ),
            ),
            ("issued_at", CanonicalValue::Int(self.issued_at)),
            ("expires_at", CanonicalValue::Int(self.expires_at)),
            ("signature", CanonicalValue::Bytes(self.signature.clone())),
        ])
    }
}

/// A signed revocation referencing the content hash of the credential it
/// revokes. Presence of a `Revocation` for a VC's content hash revokes
/// it; per Open Question 3, gossip rules beyond "sync like any other
/// object a peer can already read" are deliberately minimal (see
/// DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Revocation {
    pub credential_hash: Hash,
    pub revoked_by: PersonId,
    pub revoked_at: i64,
    pub signature: Vec<u8>,
}

impl Identified for Revocation {
    const TYPE_NAME: &'static str = "Revocation";

    fn canonical_fields(&self) -> CanonicalValue {
        CanonicalValue::Map(vec![
            (
                "credential_hash",
                CanonicalValue::Bytes(self.credential_hash.as_bytes().to_vec()),
            ),
            (
                "revoked_by",
                CanonicalValue::Bytes(self.revoked_by.as_bytes().to_vec()),
            ),
            ("revoked_at", CanonicalValue::Int(self.revoked_at)),
            ("signature", CanonicalValue::Bytes(self.signature.clone())),
        ])
    }
}

/// Trust level a verifier assigns to a subject's credential.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrustLevel {
    /// Verified signature/expiry, but the local user hasn't accepted it.
    Discovered,
    /// The local user issued an Acceptance VC for this subject.
    Accepted,
    /// A Block record is present; sync and transport must refuse.
    Blocked,
}
