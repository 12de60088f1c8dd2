use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed discovery announcement: {0}")]
    MalformedAnnouncement(String),

    #[error("{0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
