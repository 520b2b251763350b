use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown aggregation window: {0}")]
    UnknownWindow(String),

    #[error("unknown weight table: {0}")]
    UnknownWeightTable(String),

    #[error("invalid weight table {name}: {reason}")]
    InvalidWeights { name: String, reason: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("notification via {channel} failed: {reason}")]
    Notification { channel: String, reason: String },

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl EngineError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        EngineError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
