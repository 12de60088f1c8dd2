use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("credential invalid: {0}")]
    InvalidCredential(String),

    #[error("decryption failure")]
    DecryptionFailure,

    #[error("handshake timeout")]
    HandshakeTimeout,

    #[error("idle timeout")]
    IdleTimeout,

    #[error("replayed packet number {0}")]
    Replayed(u64),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("{0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Types(#[from] chum_types::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
