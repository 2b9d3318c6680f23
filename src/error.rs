use thiserror::Error;

/// Failure taxonomy shared by every component. Each component reports its own
/// failures and returns an indicator; only path resolution and config loading
/// are hard stops for the whole run.
#[derive(Debug, Error)]
pub enum ResetError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("unsupported platform: {0}")]
    Unsupported(String),

    #[error("modify failed: {0}")]
    ModifyFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ResetError>;
