use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("received object {0} does not match its claimed hash")]
    HashMismatch(chum_types::Hash),

    #[error("unknown object type \"{0}\"")]
    UnknownType(String),

    #[error("not a Stream frame")]
    NotAStreamFrame,

    #[error("{0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Types(#[from] chum_types::Error),

    #[error(transparent)]
    Transport(#[from] chum_transport::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
