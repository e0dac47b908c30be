//! Diagnostic snapshots: input, ground truth and prediction side by side.

use std::path::PathBuf;

use burn::tensor::{backend::Backend, Int, Tensor};
use image::RgbImage;
use rayon::prelude::*;
use vision_core::panel::{
    compose_row, rgb_from_chw, rgb_from_hwc, scalar_panel, with_colorbar, Colormap, WHITE,
};

use crate::error::{TrainingError, TrainingResult};
use crate::experiment::ExperimentDir;

const PANEL_GUTTER: u32 = 8;

/// Model output to visualize next to the inputs.
#[derive(Debug, Clone)]
pub enum PredictionView<B: Backend> {
    /// Class index per pixel, shape [batch, height, width].
    Classes(Tensor<B, 3, Int>),
    /// RGB intensities in 0..1, shape [batch, height, width, 3].
    Rgb(Tensor<B, 4>),
}

/// Host copy of a batched tensor.
struct HostBatch {
    values: Vec<f32>,
    dims: Vec<usize>,
}

impl HostBatch {
    fn from_float<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> TrainingResult<Self> {
        let dims = tensor.dims().to_vec();
        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| TrainingError::Readback(format!("{e:?}")))?;
        Ok(Self { values, dims })
    }

    fn from_int<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> TrainingResult<Self> {
        Self::from_float(tensor.float())
    }

    fn len(&self) -> usize {
        self.dims[0]
    }

    fn sample(&self, index: usize) -> &[f32] {
        let stride: usize = self.dims[1..].iter().product();
        &self.values[index * stride..(index + 1) * stride]
    }

    /// (height, width) from the two trailing axes.
    fn plane(&self) -> (u32, u32) {
        let n = self.dims.len();
        (self.dims[n - 2] as u32, self.dims[n - 1] as u32)
    }
}

fn ensure_batch_len(name: &str, batch: &HostBatch, expected: usize) -> TrainingResult<()> {
    if batch.len() != expected {
        let mut expected_dims = batch.dims.clone();
        expected_dims[0] = expected;
        return Err(TrainingError::ShapeMismatch {
            name: name.to_string(),
            expected: expected_dims,
            found: batch.dims.clone(),
        });
    }
    Ok(())
}

fn input_panel(inputs: &HostBatch, index: usize) -> TrainingResult<RgbImage> {
    let channels = inputs.dims[1];
    let (height, width) = inputs.plane();
    Ok(rgb_from_chw(inputs.sample(index), channels, width, height)?)
}

fn mask_panel(masks: &HostBatch, index: usize, cmap: Colormap) -> TrainingResult<RgbImage> {
    let (height, width) = masks.plane();
    Ok(scalar_panel(masks.sample(index), width, height, cmap)?)
}

/// Write `epoch_{epoch}_sample_{i}.png` into the experiment's `results/` for the first
/// `min(batch, limit)` samples.
///
/// `inputs` is [N, C, H, W], `targets` is [N, H, W] class indices and `predictions` is
/// [N, K, H, W] per-class scores; the rendered prediction is the argmax over K.
/// The `results/` directory must already exist.
pub fn save_predictions<B: Backend>(
    inputs: Tensor<B, 4>,
    targets: Tensor<B, 3, Int>,
    predictions: Tensor<B, 4>,
    epoch: usize,
    experiment: &ExperimentDir,
    limit: usize,
) -> TrainingResult<Vec<PathBuf>> {
    let [n, _, h, w] = predictions.dims();
    let classes = predictions.argmax(1).reshape([n, h, w]);

    let inputs = HostBatch::from_float(inputs)?;
    let targets = HostBatch::from_int(targets)?;
    let classes = HostBatch::from_int(classes)?;
    let batch = inputs.len();
    ensure_batch_len("targets", &targets, batch)?;
    ensure_batch_len("predictions", &classes, batch)?;

    let count = batch.min(limit);
    let written = (0..count)
        .into_par_iter()
        .map(|i| {
            let row = compose_row(
                &[
                    input_panel(&inputs, i)?,
                    mask_panel(&targets, i, Colormap::Gray)?,
                    mask_panel(&classes, i, Colormap::Gray)?,
                ],
                PANEL_GUTTER,
                WHITE,
            );
            let path = experiment.snapshot_path(epoch, i);
            row.save(&path).map_err(|source| TrainingError::Image {
                path: path.clone(),
                source,
            })?;
            Ok(path)
        })
        .collect::<TrainingResult<Vec<_>>>()?;

    tracing::info!(
        epoch,
        count = written.len(),
        dir = %experiment.results_dir().display(),
        "saved prediction snapshots"
    );
    Ok(written)
}

/// Render up to `num_samples` rows of input | prediction | ground truth.
///
/// The input and class-prediction panels carry an intensity color bar; RGB predictions do not.
pub fn render_batch_with_colorbar<B: Backend>(
    inputs: Tensor<B, 4>,
    predictions: PredictionView<B>,
    targets: Tensor<B, 3, Int>,
    num_samples: usize,
) -> TrainingResult<Vec<RgbImage>> {
    let inputs = HostBatch::from_float(inputs)?;
    let targets = HostBatch::from_int(targets)?;
    let batch = inputs.len();
    ensure_batch_len("targets", &targets, batch)?;

    let (predictions, rgb) = match predictions {
        PredictionView::Classes(classes) => (HostBatch::from_int(classes)?, false),
        PredictionView::Rgb(rgb) => (HostBatch::from_float(rgb)?, true),
    };
    ensure_batch_len("predictions", &predictions, batch)?;

    (0..batch.min(num_samples))
        .map(|i| {
            let input = with_colorbar(input_panel(&inputs, i)?, Colormap::Viridis);
            let prediction = if rgb {
                let [height, width] = [predictions.dims[1] as u32, predictions.dims[2] as u32];
                rgb_from_hwc(predictions.sample(i), width, height)?
            } else {
                with_colorbar(mask_panel(&predictions, i, Colormap::Gray)?, Colormap::Gray)
            };
            let target = mask_panel(&targets, i, Colormap::Viridis)?;
            Ok(compose_row(&[input, prediction, target], PANEL_GUTTER, WHITE))
        })
        .collect()
}
