use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JsonDbError {
    /// The root directory or a collection file could not be created.
    #[error("Bootstrap error for {}: {source}", path.display())]
    Bootstrap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed collection file {}: {source}", path.display())]
    MalformedFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid document id: {0}")]
    InvalidId(String),

    #[error("Collection is closed: {}", path.display())]
    Closed { path: PathBuf },

    /// A watch-triggered load failed; flushing is refused until a load succeeds.
    #[error("Collection {} is faulted: {reason}", path.display())]
    Faulted { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, JsonDbError>;
