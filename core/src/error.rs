/// Error types for the messaging session
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("No signed-in user: {0}")]
    AuthMissing(String),

    #[error("No recipient selected")]
    RecipientMissing,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("History error: {0}")]
    History(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
