use thiserror::Error;

pub type Result<T> = std::result::Result<T, BoosterError>;

#[derive(Error, Debug)]
pub enum BoosterError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Page error: {0}")]
    PageError(#[from] booster_page::PageError),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("{0}")]
    Other(String),
}
