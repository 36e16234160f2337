//! Epoch-driven training loop over the batch feed.

use crate::crop::{apply_mixup, collate_crops, collate_sequences};
use crate::logger::{EpochLog, EpochRow};
use crate::models::{
    checkpoint_file, load_checkpoint, save_checkpoint, CellCropNet, CellCropNetConfig,
};
use crate::schedule::{epoch_fraction, schedule_rate};
use crate::TrainBackend;
use burn::backend::Autodiff;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use cell_dataset::{BatchFeed, ImageDataset};
use metadata::{ArchKind, Config};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::sync::Arc;

type ADBackend = Autodiff<TrainBackend>;

/// Soft-target cross entropy, averaged over rows.
fn soft_cross_entropy<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_probs = log_softmax(logits, 1);
    (labels * log_probs).sum_dim(1).mean().neg()
}

fn head_loss<B: Backend>(
    logits: Vec<Tensor<B, 2>>,
    labels: &[Tensor<B, 2>],
) -> anyhow::Result<Tensor<B, 1>> {
    let mut total: Option<Tensor<B, 1>> = None;
    for (head_logits, head_labels) in logits.into_iter().zip(labels) {
        let loss = soft_cross_entropy(head_logits, head_labels.clone());
        total = Some(match total {
            Some(acc) => acc + loss,
            None => loss,
        });
    }
    total.ok_or_else(|| anyhow::anyhow!("model has no target heads"))
}

fn scalar_loss<B: Backend>(loss: &Tensor<B, 1>) -> f32 {
    loss.clone()
        .into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .first()
        .copied()
        .unwrap_or(0.0)
}

/// Trains from `start_epoch` through the configured epoch count, pulling
/// batches from a worker feed. Warm-starts from the previous epoch's
/// checkpoint when present; writes one checkpoint and one log row per
/// epoch. Any construction or I/O error aborts the run; the feed is shut
/// down either way.
pub fn learn_model(
    config: &Config,
    dataset: Arc<ImageDataset>,
    start_epoch: usize,
) -> anyhow::Result<()> {
    anyhow::ensure!(start_epoch >= 1, "start_epoch is 1-based");
    anyhow::ensure!(
        start_epoch <= config.training.epochs,
        "start_epoch {} beyond configured epochs {}",
        start_epoch,
        config.training.epochs
    );

    let feed = BatchFeed::start(
        dataset.clone(),
        config.sampling.workers,
        config.sampling.queue_size,
    );
    let result = run_epochs(config, &dataset, start_epoch, &feed);
    feed.stop();
    result
}

fn run_epochs(
    config: &Config,
    dataset: &ImageDataset,
    start_epoch: usize,
    feed: &BatchFeed,
) -> anyhow::Result<()> {
    let device = <ADBackend as Backend>::Device::default();
    let head_sizes: Vec<usize> = dataset.targets().iter().map(|t| t.len()).collect();
    let model_config = CellCropNetConfig::new(dataset.channels().len(), head_sizes);
    let mut model = CellCropNet::<ADBackend>::new(&model_config, &device);

    fs::create_dir_all(&config.paths.checkpoints)?;
    let previous = checkpoint_file(&config.paths.checkpoints, start_epoch - 1);
    if previous.is_file() {
        model = load_checkpoint(model, &config.paths.checkpoints, start_epoch - 1, &device)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", previous.display()))?;
        println!("[train] warm start from {}", previous.display());
    } else {
        println!(
            "[train] no previous checkpoint {}, starting fresh",
            previous.display()
        );
    }

    let log = EpochLog::prepare(&config.paths.log, start_epoch)?;
    let mut optim = AdamConfig::new().init();
    let mut rng = match config.sampling.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let arch = config.training.arch;
    let box_size = config.sampling.box_size;
    let epochs = config.training.epochs;

    for epoch in start_epoch..=epochs {
        let lr = schedule_rate(
            config.training.learning_rate,
            epoch_fraction(epoch, epochs),
        );
        println!("[train] epoch {epoch}/{epochs}, learning rate {lr}");

        let mut losses = Vec::with_capacity(config.training.steps);
        for _ in 0..config.training.steps {
            let batch = feed.next()?;
            let loss = match arch {
                ArchKind::Convnet => {
                    let crops =
                        collate_crops::<ADBackend>(&batch, dataset.targets(), box_size, &device)?;
                    head_loss(model.forward(crops.crops), &crops.labels)?
                }
                ArchKind::Mixup => {
                    let crops =
                        collate_crops::<ADBackend>(&batch, dataset.targets(), box_size, &device)?;
                    let mixed = apply_mixup(crops, config.training.mixup_alpha, &mut rng);
                    head_loss(model.forward(mixed.crops), &mixed.labels)?
                }
                ArchKind::Recurrent => {
                    let sequences = collate_sequences::<ADBackend>(
                        &batch,
                        dataset.targets(),
                        box_size,
                        config.training.sequence_length,
                        &device,
                    )?;
                    head_loss(model.forward_sequence(sequences.sequences), &sequences.labels)?
                }
            };
            let loss_detached = loss.clone().detach();
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);
            losses.push(scalar_loss(&loss_detached));
        }

        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f32>() / losses.len() as f32
        };
        println!("[train] epoch {epoch}: avg loss {avg_loss:.4}");

        save_checkpoint(&model, &config.paths.checkpoints, epoch)
            .map_err(|e| anyhow::anyhow!("failed to save checkpoint for epoch {epoch}: {e}"))?;
        log.append(&EpochRow {
            epoch,
            learning_rate: lr,
            loss: avg_loss,
        })?;
    }

    println!("[train] complete, stopping batch feed");
    Ok(())
}
