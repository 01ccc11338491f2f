use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid message identifier: {0}")]
    InvalidIdentifier(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("attachment is not an image: {0}")]
    NotAnImage(String),

    #[error("failed to store message: {0}")]
    StoreWrite(#[source] io::Error),

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("failed to render thumbnail: {0}")]
    Render(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<mailparse::MailParseError> for StoreError {
    fn from(err: mailparse::MailParseError) -> Self {
        StoreError::Parse(err.to_string())
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
