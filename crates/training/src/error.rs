//! Error type shared by the checkpoint, collation, experiment and snapshot helpers.

use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint not found: {path}")]
    NotFound { path: PathBuf },
    #[error("failed to encode checkpoint for {path}: {msg}")]
    Serialization { path: PathBuf, msg: String },
    #[error("failed to decode checkpoint {path}: {msg}")]
    Deserialization { path: PathBuf, msg: String },
    #[error("checkpoint parameters do not match model (missing: {missing:?}, unexpected: {unexpected:?})")]
    KeyMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("shape mismatch for {name}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("cannot inspect parameter state: {0}")]
    StateInspection(String),
    #[error("tensor readback failed: {0}")]
    Readback(String),
    #[error("cannot collate an empty batch")]
    EmptyBatch,
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid config {path}: {msg}")]
    Config { path: PathBuf, msg: String },
    #[error("render error: {0}")]
    Render(#[from] vision_core::panel::PanelError),
}

impl TrainingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainingError::Io {
            path: path.into(),
            source,
        }
    }
}
