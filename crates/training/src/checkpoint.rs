//! Checkpoint persistence: model record + optimizer record + epoch in one file.
//!
//! Files are written with burn's named MessagePack recorder at full precision, so the three
//! fields (`model_state_dict`, `optimizer_state_dict`, `epoch`) are addressable by name and a
//! model-only restore can skip the optimizer state without knowing its type.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use burn::module::{AutodiffModule, Module};
use burn::optim::Optimizer;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, PrecisionSettings, Record, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::{Deserialize, Serialize};

use crate::error::{TrainingError, TrainingResult};
use crate::state::StateSignature;

type CheckpointRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

/// On-disk layout of a full checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointItem<MI, OI> {
    pub model_state_dict: MI,
    pub optimizer_state_dict: OI,
    pub epoch: usize,
}

/// Subset of [`CheckpointItem`] read when only the model is restored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCheckpointItem<MI> {
    pub model_state_dict: MI,
    pub epoch: usize,
}

/// A decoded training snapshot.
///
/// Loading never touches a live model; call [`Checkpoint::restore`] (or
/// [`Checkpoint::restore_model`]) to apply it. Parameter names and shapes are checked against
/// the target model first and nothing is applied on mismatch.
pub struct Checkpoint<MR, OR> {
    epoch: usize,
    model: MR,
    optimizer: OR,
    signature: Result<StateSignature, String>,
}

/// Model-only view of a checkpoint file.
pub struct ModelCheckpoint<MR> {
    epoch: usize,
    model: MR,
    signature: Result<StateSignature, String>,
}

impl<B, MR, OR> Record<B> for Checkpoint<MR, OR>
where
    B: Backend,
    MR: Record<B>,
    OR: Record<B>,
{
    type Item<S: PrecisionSettings> = CheckpointItem<MR::Item<S>, OR::Item<S>>;

    fn into_item<S: PrecisionSettings>(self) -> Self::Item<S> {
        CheckpointItem {
            model_state_dict: <MR as Record<B>>::into_item::<S>(self.model),
            optimizer_state_dict: <OR as Record<B>>::into_item::<S>(self.optimizer),
            epoch: self.epoch,
        }
    }

    fn from_item<S: PrecisionSettings>(item: Self::Item<S>, device: &B::Device) -> Self {
        let signature =
            StateSignature::from_item(&item.model_state_dict).map_err(|e| e.to_string());
        Self {
            epoch: item.epoch,
            model: <MR as Record<B>>::from_item::<S>(item.model_state_dict, device),
            optimizer: <OR as Record<B>>::from_item::<S>(item.optimizer_state_dict, device),
            signature,
        }
    }
}

impl<B, MR> Record<B> for ModelCheckpoint<MR>
where
    B: Backend,
    MR: Record<B>,
{
    type Item<S: PrecisionSettings> = ModelCheckpointItem<MR::Item<S>>;

    fn into_item<S: PrecisionSettings>(self) -> Self::Item<S> {
        ModelCheckpointItem {
            model_state_dict: <MR as Record<B>>::into_item::<S>(self.model),
            epoch: self.epoch,
        }
    }

    fn from_item<S: PrecisionSettings>(item: Self::Item<S>, device: &B::Device) -> Self {
        let signature =
            StateSignature::from_item(&item.model_state_dict).map_err(|e| e.to_string());
        Self {
            epoch: item.epoch,
            model: <MR as Record<B>>::from_item::<S>(item.model_state_dict, device),
            signature,
        }
    }
}

fn stored_signature(signature: &Result<StateSignature, String>) -> TrainingResult<&StateSignature> {
    signature
        .as_ref()
        .map_err(|msg| TrainingError::StateInspection(msg.clone()))
}

fn ensure_compatible<B: Backend, M: Module<B>>(
    model: &M,
    stored: &Result<StateSignature, String>,
) -> TrainingResult<()> {
    let expected = StateSignature::of_module::<B, M>(model)
        .map_err(|e| TrainingError::StateInspection(e.to_string()))?;
    expected.ensure_matches(stored_signature(stored)?)
}

impl<MR, OR> Checkpoint<MR, OR> {
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Parameter names and shapes stored in the file.
    pub fn signature(&self) -> TrainingResult<&StateSignature> {
        stored_signature(&self.signature)
    }

    /// Check the stored model state against `model` without applying anything.
    pub fn validate<B, M>(&self, model: &M) -> TrainingResult<()>
    where
        B: Backend,
        M: Module<B, Record = MR>,
    {
        ensure_compatible::<B, M>(model, &self.signature)
    }

    /// Apply the stored state to `model` and, if given, `optim`.
    ///
    /// Returns the restored pair and the stored epoch. On error the inputs are dropped
    /// untouched; clone them beforehand if they are still needed.
    pub fn restore<B, M, O>(self, model: M, optim: Option<O>) -> TrainingResult<(M, Option<O>, usize)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + Module<B, Record = MR>,
        O: Optimizer<M, B, Record = OR>,
    {
        ensure_compatible::<B, M>(&model, &self.signature)?;
        let model = model.load_record(self.model);
        let optim = optim.map(|o| o.load_record(self.optimizer));
        Ok((model, optim, self.epoch))
    }

    /// Apply only the model state, discarding the optimizer record.
    pub fn restore_model<B, M>(self, model: M) -> TrainingResult<M>
    where
        B: Backend,
        M: Module<B, Record = MR>,
    {
        ensure_compatible::<B, M>(&model, &self.signature)?;
        Ok(model.load_record(self.model))
    }

    pub fn into_records(self) -> (MR, OR, usize) {
        (self.model, self.optimizer, self.epoch)
    }
}

impl<MR> ModelCheckpoint<MR> {
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn signature(&self) -> TrainingResult<&StateSignature> {
        stored_signature(&self.signature)
    }

    pub fn restore<B, M>(self, model: M) -> TrainingResult<(M, usize)>
    where
        B: Backend,
        M: Module<B, Record = MR>,
    {
        ensure_compatible::<B, M>(&model, &self.signature)?;
        Ok((model.load_record(self.model), self.epoch))
    }
}

/// Reads and writes checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    atomic: bool,
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self { atomic: true }
    }
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write through a sibling temp file and rename it over the target (default), or write the
    /// target in place.
    pub fn with_atomic_writes(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    /// Serialize `model`, `optim` and `epoch` to `path`, replacing any existing file.
    ///
    /// The parent directory must exist.
    pub fn save<B, M, O>(
        &self,
        model: &M,
        optim: &O,
        epoch: usize,
        path: impl AsRef<Path>,
    ) -> TrainingResult<()>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let checkpoint: Checkpoint<<M as Module<B>>::Record, O::Record> = Checkpoint {
            epoch,
            model: model.clone().into_record(),
            optimizer: optim.to_record(),
            signature: Ok(StateSignature::default()),
        };
        self.save_records::<B, _, _>(checkpoint, path.as_ref())
    }

    fn save_records<B, MR, OR>(&self, checkpoint: Checkpoint<MR, OR>, path: &Path) -> TrainingResult<()>
    where
        B: Backend,
        MR: Record<B>,
        OR: Record<B>,
    {
        let recorder = CheckpointRecorder::default();
        let bytes = Recorder::<B>::record(&recorder, checkpoint, ()).map_err(|e| {
            TrainingError::Serialization {
                path: path.to_path_buf(),
                msg: e.to_string(),
            }
        })?;
        if self.atomic {
            write_atomic(path, &bytes)?;
        } else {
            write_synced(path, &bytes).map_err(|e| TrainingError::io(path, e))?;
        }
        tracing::info!("Checkpoint saved to {}", path.display());
        Ok(())
    }

    /// Decode the checkpoint at `path` onto `device`.
    pub fn load<B, MR, OR>(
        &self,
        path: impl AsRef<Path>,
        device: &B::Device,
    ) -> TrainingResult<Checkpoint<MR, OR>>
    where
        B: Backend,
        MR: Record<B>,
        OR: Record<B>,
    {
        let path = path.as_ref();
        let bytes = read_checkpoint(path)?;
        let recorder = CheckpointRecorder::default();
        Recorder::<B>::load(&recorder, bytes, device).map_err(|e| TrainingError::Deserialization {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })
    }

    /// Decode only the model state and epoch of the checkpoint at `path`.
    pub fn load_model<B, MR>(
        &self,
        path: impl AsRef<Path>,
        device: &B::Device,
    ) -> TrainingResult<ModelCheckpoint<MR>>
    where
        B: Backend,
        MR: Record<B>,
    {
        let path = path.as_ref();
        let bytes = read_checkpoint(path)?;
        let recorder = CheckpointRecorder::default();
        Recorder::<B>::load(&recorder, bytes, device).map_err(|e| TrainingError::Deserialization {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })
    }
}

/// Save `model`, `optim` and `epoch` to `path` with the default store.
pub fn save_checkpoint<B, M, O>(
    model: &M,
    optim: &O,
    epoch: usize,
    path: impl AsRef<Path>,
) -> TrainingResult<()>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    CheckpointStore::default().save::<B, M, O>(model, optim, epoch, path)
}

/// Load the checkpoint at `path` and apply it to `model` (and `optim` when given).
pub fn load_checkpoint<B, M, O>(
    path: impl AsRef<Path>,
    model: M,
    optim: Option<O>,
    device: &B::Device,
) -> TrainingResult<(M, Option<O>, usize)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let path = path.as_ref();
    let checkpoint: Checkpoint<<M as Module<B>>::Record, O::Record> =
        CheckpointStore::default().load::<B, _, _>(path, device)?;
    let restored = checkpoint.restore::<B, M, O>(model, optim)?;
    tracing::info!(
        "Checkpoint loaded from {}, resuming at epoch {}",
        path.display(),
        restored.2
    );
    Ok(restored)
}

/// Load only the model state from a full checkpoint.
pub fn load_model_checkpoint<B, M>(
    path: impl AsRef<Path>,
    model: M,
    device: &B::Device,
) -> TrainingResult<(M, usize)>
where
    B: Backend,
    M: Module<B>,
{
    let path = path.as_ref();
    let checkpoint: ModelCheckpoint<M::Record> =
        CheckpointStore::default().load_model::<B, _>(path, device)?;
    let restored = checkpoint.restore::<B, M>(model)?;
    tracing::info!(
        "Checkpoint loaded from {}, resuming at epoch {}",
        path.display(),
        restored.1
    );
    Ok(restored)
}

fn read_checkpoint(path: &Path) -> TrainingResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            TrainingError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            TrainingError::io(path, e)
        }
    })
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Write through a uniquely named temp file in the target's directory, then rename it over
/// `path`. Concurrent writers each get their own temp file; the last rename wins.
fn write_atomic(path: &Path, bytes: &[u8]) -> TrainingResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".checkpoint")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| TrainingError::io(path, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| TrainingError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| TrainingError::io(path, e.error))?;
    Ok(())
}
