use burn::backend::ndarray::NdArray;
use burn::tensor::{Int, Tensor};
use segtrain::{collate, SegmentationItem, TrainingError};

type B = NdArray<f32>;

fn item(value: f32, source: &str) -> SegmentationItem<B, String> {
    let device = Default::default();
    SegmentationItem::new(
        Tensor::<B, 3>::full([3, 4, 5], value, &device),
        Tensor::<B, 2, Int>::zeros([4, 5], &device),
        source.to_string(),
    )
}

#[test]
fn stacks_images_and_masks_along_a_new_batch_axis() {
    let device = Default::default();
    let items = vec![item(0.0, "a.png"), item(1.0, "b.png"), item(2.0, "c.png")];

    let batch = collate(items, &device).unwrap();

    assert_eq!(batch.len(), 3);
    assert_eq!(batch.images.dims(), [3, 3, 4, 5]);
    assert_eq!(batch.masks.dims(), [3, 4, 5]);
    assert_eq!(batch.sources, vec!["a.png", "b.png", "c.png"]);

    let second: Vec<f32> = batch
        .images
        .narrow(0, 1, 1)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert!(second.iter().all(|v| *v == 1.0));
}

#[test]
fn single_item_gets_a_batch_of_one() {
    let device = Default::default();
    let batch = collate(vec![item(0.5, "only")], &device).unwrap();
    assert_eq!(batch.images.dims(), [1, 3, 4, 5]);
    assert_eq!(batch.masks.dims(), [1, 4, 5]);
    assert!(!batch.is_empty());
}

#[test]
fn empty_input_is_rejected() {
    let device = Default::default();
    let err = collate(Vec::<SegmentationItem<B, String>>::new(), &device).unwrap_err();
    assert!(matches!(err, TrainingError::EmptyBatch));
}

#[test]
fn mismatched_image_shape_names_the_offending_item() {
    let device = Default::default();
    let odd = SegmentationItem::new(
        Tensor::<B, 3>::zeros([3, 8, 5], &device),
        Tensor::<B, 2, Int>::zeros([4, 5], &device),
        "odd".to_string(),
    );
    let err = collate(vec![item(0.0, "a"), odd], &device).unwrap_err();
    match err {
        TrainingError::ShapeMismatch {
            name,
            expected,
            found,
        } => {
            assert_eq!(name, "images[1]");
            assert_eq!(expected, vec![3, 4, 5]);
            assert_eq!(found, vec![3, 8, 5]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn mismatched_mask_shape_is_rejected() {
    let device = Default::default();
    let odd = SegmentationItem::new(
        Tensor::<B, 3>::zeros([3, 4, 5], &device),
        Tensor::<B, 2, Int>::zeros([5, 4], &device),
        "odd".to_string(),
    );
    let err = collate(vec![item(0.0, "a"), item(0.0, "b"), odd], &device).unwrap_err();
    assert!(
        matches!(&err, TrainingError::ShapeMismatch { name, .. } if name == "masks[2]"),
        "{err}"
    );
}
