use thiserror::Error;

/// Error kinds the core distinguishes, per the recovery table in the spec:
/// transport/sync errors stay local to their connection, object-store and
/// credential errors are surfaced to the caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("object {0} not found")]
    NotFound(crate::hash::Hash),

    #[error("object {0} is corrupt: serialization hash mismatch")]
    CorruptObject(crate::hash::Hash),

    #[error("reference {0} is missing from the store")]
    MissingReference(crate::hash::Hash),

    #[error("peer lacks an access grant for {0}")]
    AccessDenied(crate::hash::Hash),

    #[error("credential invalid: {0}")]
    InvalidCredential(String),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("decryption failure")]
    DecryptionFailure,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("conflicting concurrent write on {0}")]
    Conflict(crate::hash::Hash),

    #[error("a 1:1 topic already has a shared channel")]
    DuplicateOneToOneChannel,

    #[error("group topics cannot use addParticipants before pairing completes")]
    InvalidGroupOperation,

    #[error("operation not valid on a 1:1 topic")]
    NotAGroupTopic,

    #[error("{0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
