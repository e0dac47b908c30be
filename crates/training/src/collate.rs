use burn::tensor::{backend::Backend, Int, Tensor};

use crate::error::{TrainingError, TrainingResult};

/// One training example: a CHW image, an HW class mask and an opaque source label.
#[derive(Debug, Clone)]
pub struct SegmentationItem<B: Backend, S> {
    pub image: Tensor<B, 3>,
    pub mask: Tensor<B, 2, Int>,
    pub source: S,
}

impl<B: Backend, S> SegmentationItem<B, S> {
    pub fn new(image: Tensor<B, 3>, mask: Tensor<B, 2, Int>, source: S) -> Self {
        Self {
            image,
            mask,
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentationBatch<B: Backend, S> {
    /// Shape: [batch, channels, height, width].
    pub images: Tensor<B, 4>,
    /// Shape: [batch, height, width].
    pub masks: Tensor<B, 3, Int>,
    /// Source labels in input order.
    pub sources: Vec<S>,
}

impl<B: Backend, S> SegmentationBatch<B, S> {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Stack `items` into one batch on `device`.
///
/// Every image must share the first image's shape and every mask the first mask's shape.
/// Sources are passed through untouched.
pub fn collate<B: Backend, S>(
    items: Vec<SegmentationItem<B, S>>,
    device: &B::Device,
) -> TrainingResult<SegmentationBatch<B, S>> {
    let Some(first) = items.first() else {
        return Err(TrainingError::EmptyBatch);
    };
    let image_dims = first.image.dims();
    let mask_dims = first.mask.dims();

    let batch = items.len();
    let mut images = Vec::with_capacity(batch);
    let mut masks = Vec::with_capacity(batch);
    let mut sources = Vec::with_capacity(batch);

    for (idx, item) in items.into_iter().enumerate() {
        let dims = item.image.dims();
        if dims != image_dims {
            return Err(TrainingError::ShapeMismatch {
                name: format!("images[{idx}]"),
                expected: image_dims.to_vec(),
                found: dims.to_vec(),
            });
        }
        let dims = item.mask.dims();
        if dims != mask_dims {
            return Err(TrainingError::ShapeMismatch {
                name: format!("masks[{idx}]"),
                expected: mask_dims.to_vec(),
                found: dims.to_vec(),
            });
        }
        images.push(item.image.to_device(device));
        masks.push(item.mask.to_device(device));
        sources.push(item.source);
    }

    tracing::debug!(
        batch,
        image = ?image_dims,
        mask = ?mask_dims,
        "collated segmentation batch"
    );

    Ok(SegmentationBatch {
        images: Tensor::stack::<4>(images, 0),
        masks: Tensor::stack::<3>(masks, 0),
        sources,
    })
}
