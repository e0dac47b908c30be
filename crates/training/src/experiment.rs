//! Experiment directory layout:
//!
//! ```text
//! <root>/
//!   config.json
//!   checkpoints/checkpoint_epoch_{epoch}.mpk
//!   logs/train.log
//!   results/epoch_{epoch}_sample_{i}.png
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use serde::Serialize;

use crate::checkpoint::CheckpointStore;
use crate::error::{TrainingError, TrainingResult};

const CONFIG_FILE: &str = "config.json";
const CHECKPOINTS_DIR: &str = "checkpoints";
const LOGS_DIR: &str = "logs";
const RESULTS_DIR: &str = "results";
const TRAIN_LOG: &str = "train.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentDir {
    root: PathBuf,
}

impl ExperimentDir {
    /// Refer to an experiment directory without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root and its `checkpoints/`, `logs/` and `results/` subdirectories.
    pub fn create(root: impl Into<PathBuf>) -> TrainingResult<Self> {
        let dir = Self::new(root);
        for sub in [dir.checkpoints_dir(), dir.logs_dir(), dir.results_dir()] {
            fs::create_dir_all(&sub).map_err(|e| TrainingError::io(&sub, e))?;
        }
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join(CHECKPOINTS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir().join(TRAIN_LOG)
    }

    pub fn checkpoint_path(&self, epoch: usize) -> PathBuf {
        self.checkpoints_dir()
            .join(format!("checkpoint_epoch_{epoch}.mpk"))
    }

    pub fn snapshot_path(&self, epoch: usize, sample: usize) -> PathBuf {
        self.results_dir()
            .join(format!("epoch_{epoch}_sample_{sample}.png"))
    }

    /// Write `config` verbatim to `config.json` as 4-space indented JSON.
    pub fn save_config<T: Serialize + ?Sized>(&self, config: &T) -> TrainingResult<PathBuf> {
        let path = self.config_path();
        let json = to_json_4space(config).map_err(|source| TrainingError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|e| TrainingError::io(&path, e))?;
        Ok(path)
    }

    /// Append one epoch line to `logs/train.log`.
    ///
    /// The `logs/` directory must already exist.
    pub fn log_metrics(&self, epoch: usize, train_loss: f64, val_loss: f64) -> TrainingResult<()> {
        let path = self.log_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TrainingError::io(&path, e))?;
        writeln!(file, "{}", metrics_line(epoch, train_loss, val_loss))
            .map_err(|e| TrainingError::io(&path, e))
    }

    /// Save a checkpoint at [`ExperimentDir::checkpoint_path`] for `epoch`.
    pub fn save_checkpoint<B, M, O>(
        &self,
        store: &CheckpointStore,
        model: &M,
        optim: &O,
        epoch: usize,
    ) -> TrainingResult<PathBuf>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let path = self.checkpoint_path(epoch);
        store.save::<B, M, O>(model, optim, epoch, &path)?;
        Ok(path)
    }
}

pub fn metrics_line(epoch: usize, train_loss: f64, val_loss: f64) -> String {
    format!("Epoch {epoch}: Train Loss = {train_loss:.4}, Val Loss = {val_loss:.4}")
}

fn to_json_4space<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_line_rounds_to_four_places() {
        assert_eq!(
            metrics_line(3, 0.123456, 2.0),
            "Epoch 3: Train Loss = 0.1235, Val Loss = 2.0000"
        );
    }

    #[test]
    fn layout_paths() {
        let dir = ExperimentDir::new("runs/exp");
        assert_eq!(dir.config_path(), Path::new("runs/exp/config.json"));
        assert_eq!(dir.log_path(), Path::new("runs/exp/logs/train.log"));
        assert_eq!(
            dir.checkpoint_path(7),
            Path::new("runs/exp/checkpoints/checkpoint_epoch_7.mpk")
        );
        assert_eq!(
            dir.snapshot_path(2, 4),
            Path::new("runs/exp/results/epoch_2_sample_4.png")
        );
    }
}
