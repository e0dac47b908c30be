//! Training-side helpers for burn segmentation models: checkpoints, batch collation,
//! experiment directories and prediction snapshots.

pub mod checkpoint;
pub mod collate;
pub mod config;
pub mod error;
pub mod experiment;
pub mod snapshot;
pub mod state;

pub use checkpoint::{
    load_checkpoint, load_model_checkpoint, save_checkpoint, Checkpoint, CheckpointItem,
    CheckpointStore, ModelCheckpoint, ModelCheckpointItem,
};
pub use collate::{collate, SegmentationBatch, SegmentationItem};
pub use config::ExperimentSettings;
pub use error::{TrainingError, TrainingResult};
pub use experiment::{metrics_line, ExperimentDir};
pub use snapshot::{render_batch_with_colorbar, save_predictions, PredictionView};
pub use state::{SignatureError, StateSignature};
