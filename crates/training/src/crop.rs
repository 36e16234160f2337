//! Collates dataset batches into crop tensors for the model variants.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use cell_dataset::DatasetBatch;
use metadata::ColumnTarget;
use rand::prelude::SliceRandom;
use rand::Rng;

/// Crops plus one soft-label tensor per target head.
#[derive(Debug, Clone)]
pub struct CropBatch<B: Backend> {
    /// [crops, channels, box, box]
    pub crops: Tensor<B, 4>,
    /// labels[target]: [crops, classes]
    pub labels: Vec<Tensor<B, 2>>,
}

/// Sequence variant: [batch, seq, channels, box, box].
#[derive(Debug, Clone)]
pub struct SequenceBatch<B: Backend> {
    pub sequences: Tensor<B, 5>,
    pub labels: Vec<Tensor<B, 2>>,
}

fn one_hot_rows(
    targets: &[ColumnTarget],
    indices: &[usize],
    labels: &mut [Vec<f32>],
) {
    for (t, target) in targets.iter().enumerate() {
        let mut row = vec![0.0f32; target.len()];
        row[indices[t]] = 1.0;
        labels[t].extend_from_slice(&row);
    }
}

fn label_tensors<B: Backend>(
    targets: &[ColumnTarget],
    labels: Vec<Vec<f32>>,
    rows: usize,
    device: &B::Device,
) -> Vec<Tensor<B, 2>> {
    targets
        .iter()
        .zip(labels)
        .map(|(target, buf)| {
            Tensor::<B, 2>::from_data(TensorData::new(buf, [rows, target.len()]), device)
        })
        .collect()
}

/// Extracts one crop tensor per sampled location. Images with no sampled
/// locations contribute nothing; a batch with no crops at all is an
/// error.
pub fn collate_crops<B: Backend>(
    batch: &DatasetBatch,
    targets: &[ColumnTarget],
    box_size: usize,
    device: &B::Device,
) -> anyhow::Result<CropBatch<B>> {
    if batch.is_empty() {
        anyhow::bail!("cannot collate an empty batch");
    }
    let channels = batch.images[0].channels;
    let mut crop_buf: Vec<f32> = Vec::new();
    let mut labels: Vec<Vec<f32>> = vec![Vec::new(); targets.len()];
    let mut rows = 0usize;

    for ((image, locations), indices) in
        batch.images.iter().zip(&batch.locations).zip(&batch.targets)
    {
        for location in locations {
            crop_buf.extend(image.crop(location.x as u32, location.y as u32, box_size));
            one_hot_rows(targets, indices, &mut labels);
            rows += 1;
        }
    }
    if rows == 0 {
        anyhow::bail!("batch contains no sampled cell locations");
    }

    let crops = Tensor::<B, 1>::from_floats(crop_buf.as_slice(), device).reshape([
        rows, channels, box_size, box_size,
    ]);
    Ok(CropBatch {
        crops,
        labels: label_tensors(targets, labels, rows, device),
    })
}

/// Builds one fixed-length crop sequence per image, cycling through the
/// sampled locations when fewer than `sequence_length` are available.
/// Images without locations are skipped.
pub fn collate_sequences<B: Backend>(
    batch: &DatasetBatch,
    targets: &[ColumnTarget],
    box_size: usize,
    sequence_length: usize,
    device: &B::Device,
) -> anyhow::Result<SequenceBatch<B>> {
    if batch.is_empty() {
        anyhow::bail!("cannot collate an empty batch");
    }
    let channels = batch.images[0].channels;
    let mut crop_buf: Vec<f32> = Vec::new();
    let mut labels: Vec<Vec<f32>> = vec![Vec::new(); targets.len()];
    let mut rows = 0usize;

    for ((image, locations), indices) in
        batch.images.iter().zip(&batch.locations).zip(&batch.targets)
    {
        if locations.is_empty() {
            continue;
        }
        for step in 0..sequence_length {
            let location = locations[step % locations.len()];
            crop_buf.extend(image.crop(location.x as u32, location.y as u32, box_size));
        }
        one_hot_rows(targets, indices, &mut labels);
        rows += 1;
    }
    if rows == 0 {
        anyhow::bail!("batch contains no sampled cell locations");
    }

    let sequences = Tensor::<B, 1>::from_floats(crop_buf.as_slice(), device).reshape([
        rows,
        sequence_length,
        channels,
        box_size,
        box_size,
    ]);
    Ok(SequenceBatch {
        sequences,
        labels: label_tensors(targets, labels, rows, device),
    })
}

/// Mixup: pairs every crop with a shuffled partner and blends pixels and
/// soft labels with one lambda per batch. Lambda is drawn as
/// `alpha * U(0,1)` clamped to [0, 0.5] and mirrored at random, keeping
/// most of one parent in every mixed crop.
pub fn apply_mixup<B: Backend, R: Rng>(
    batch: CropBatch<B>,
    alpha: f32,
    rng: &mut R,
) -> CropBatch<B> {
    let rows = batch.crops.dims()[0];
    if rows < 2 {
        return batch;
    }
    let mut perm: Vec<i64> = (0..rows as i64).collect();
    perm.shuffle(rng);
    let lam = (alpha * rng.gen::<f32>()).clamp(0.0, 0.5);
    let lam = if rng.gen::<bool>() { lam } else { 1.0 - lam };

    let device = batch.crops.device();
    let indices = Tensor::<B, 1, Int>::from_data(TensorData::new(perm, [rows]), &device);

    let partner = batch.crops.clone().select(0, indices.clone());
    let crops = batch.crops.mul_scalar(lam) + partner.mul_scalar(1.0 - lam);
    let labels = batch
        .labels
        .into_iter()
        .map(|label| {
            let partner = label.clone().select(0, indices.clone());
            label.mul_scalar(lam) + partner.mul_scalar(1.0 - lam)
        })
        .collect();
    CropBatch { crops, labels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use cell_dataset::{ImagePixels, Location};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type B = NdArray<f32>;

    fn toy_batch() -> (DatasetBatch, Vec<ColumnTarget>) {
        let image = ImagePixels {
            width: 32,
            height: 32,
            channels: 2,
            data: vec![0.5; 2 * 32 * 32],
        };
        let batch = DatasetBatch {
            keys: vec!["p1/A01-1".into(), "p1/A02-1".into()],
            images: vec![image.clone(), image],
            targets: vec![vec![0], vec![1]],
            locations: vec![
                vec![Location { x: 8.0, y: 8.0 }, Location { x: 20.0, y: 20.0 }],
                vec![Location { x: 16.0, y: 16.0 }],
            ],
        };
        let targets = vec![ColumnTarget::new(
            "Compound",
            vec!["dmso".into(), "taxol".into()],
        )];
        (batch, targets)
    }

    #[test]
    fn collates_one_crop_per_location() {
        let (batch, targets) = toy_batch();
        let device = Default::default();
        let crops = collate_crops::<B>(&batch, &targets, 8, &device).unwrap();
        assert_eq!(crops.crops.dims(), [3, 2, 8, 8]);
        assert_eq!(crops.labels[0].dims(), [3, 2]);
        let labels = crops.labels[0].clone().into_data().to_vec::<f32>().unwrap();
        // Two crops of class 0, one of class 1.
        assert_eq!(labels, vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn sequences_cycle_short_location_lists() {
        let (batch, targets) = toy_batch();
        let device = Default::default();
        let sequences = collate_sequences::<B>(&batch, &targets, 8, 4, &device).unwrap();
        assert_eq!(sequences.sequences.dims(), [2, 4, 2, 8, 8]);
        assert_eq!(sequences.labels[0].dims(), [2, 2]);
    }

    #[test]
    fn empty_locations_fail_collation() {
        let (mut batch, targets) = toy_batch();
        batch.locations = vec![Vec::new(), Vec::new()];
        let device = Default::default();
        assert!(collate_crops::<B>(&batch, &targets, 8, &device).is_err());
    }

    #[test]
    fn mixup_preserves_label_mass() {
        let (batch, targets) = toy_batch();
        let device = Default::default();
        let crops = collate_crops::<B>(&batch, &targets, 8, &device).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mixed = apply_mixup(crops, 0.2, &mut rng);
        assert_eq!(mixed.crops.dims(), [3, 2, 8, 8]);
        let labels = mixed.labels[0].clone().into_data().to_vec::<f32>().unwrap();
        for row in labels.chunks(2) {
            let mass: f32 = row.iter().sum();
            assert!((mass - 1.0).abs() < 1e-5);
        }
    }
}
