use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid entity id: {0}")]
    InvalidEntity(String),

    #[error("Unknown message state: {0}")]
    UnknownMessageState(String),

    #[error("Private chat must have exactly 2 participants, got {0}")]
    NotPrivate(usize),
}
