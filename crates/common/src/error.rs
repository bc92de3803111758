use thiserror::Error;

/// Common error types used across the workspace.
#[derive(Debug, Error)]
pub enum HareError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HareError>;
