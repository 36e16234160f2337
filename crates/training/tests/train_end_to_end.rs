//! End-to-end training runs over a synthetic plate: checkpoints on disk,
//! epoch log contents, warm restarts, and the non-convnet model variants.

use cell_dataset::load_dataset;
use image::{ImageBuffer, Luma};
use metadata::{
    ArchKind, Config, DatasetConfig, PartitionConfig, PathsConfig, SamplingConfig, TrainingConfig,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use training::{checkpoint_file, learn_model, EpochLog};

const CHANNELS: [&str; 3] = ["DNA", "RNA", "ER"];

fn write_plane(path: &Path, size: u32, shade: u8) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let img: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::from_pixel(size, size, Luma([shade]));
    img.save(path).unwrap();
}

fn write_locations(root: &Path, key: &str, cells: usize) {
    let path = root.join(format!("{key}-DNA.csv"));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut body = String::from("DNA_Location_Center_X,DNA_Location_Center_Y\n");
    for i in 0..cells {
        body.push_str(&format!("{}.0,{}.0\n", 20 + i * 7, 20 + i * 5));
    }
    fs::write(path, body).unwrap();
}

/// Synthetic plate with two balanced compounds, split 6/6 across
/// training and validation.
fn synthetic_config(root: &Path, arch: ArchKind) -> Config {
    let images = root.join("images");
    let locations = root.join("locations");
    let index = root.join("index.csv");

    let mut csv = String::from("Metadata_Plate,Metadata_Well,Metadata_Site,Split,Compound");
    for ch in CHANNELS {
        csv.push_str(&format!(",{ch}"));
    }
    csv.push('\n');

    for i in 0..12 {
        let well = format!("A{:02}", i + 1);
        let split = if i % 2 == 0 { "Training" } else { "Validation" };
        let compound = if (i / 2) % 2 == 0 { "dmso" } else { "taxol" };
        let key = format!("p1/{well}-1");
        csv.push_str(&format!("p1,{well},1,{split},{compound}"));
        for (c, ch) in CHANNELS.iter().enumerate() {
            let rel = format!("p1/{well}-1-{ch}.png");
            write_plane(&images.join(&rel), 128, (40 * (c + 1)) as u8);
            csv.push_str(&format!(",{rel}"));
        }
        csv.push('\n');
        if split == "Training" {
            write_locations(&locations, &key, 6);
        }
    }
    fs::write(&index, csv).unwrap();

    Config {
        paths: PathsConfig {
            index,
            images,
            locations,
            checkpoints: root.join("checkpoints"),
            log: root.join("log.csv"),
        },
        dataset: DatasetConfig {
            channels: CHANNELS.iter().map(|s| s.to_string()).collect(),
            key_columns: [
                "Metadata_Plate".into(),
                "Metadata_Well".into(),
                "Metadata_Site".into(),
            ],
            outlines: None,
        },
        partition: PartitionConfig {
            split_field: "Split".into(),
            training_values: vec!["Training".into()],
            validation_values: vec!["Validation".into()],
            targets: vec!["Compound".into()],
        },
        sampling: SamplingConfig {
            field: "Compound".into(),
            workers: 2,
            queue_size: 4,
            box_size: 16,
            mask_objects: false,
            seed: Some(7),
        },
        training: TrainingConfig {
            arch,
            learning_rate: 1e-3,
            epochs: 2,
            steps: 2,
            batch_size: 4,
            sequence_length: 3,
            mixup_alpha: 0.2,
        },
    }
}

fn run(config: &Config, start_epoch: usize) {
    let dataset = load_dataset(config).unwrap();
    learn_model(config, Arc::new(dataset), start_epoch).unwrap();
}

#[test]
fn trains_two_epochs_and_writes_checkpoints_and_log() {
    let tmp = tempfile::tempdir().unwrap();
    let config = synthetic_config(tmp.path(), ArchKind::Convnet);
    run(&config, 1);

    assert!(checkpoint_file(&config.paths.checkpoints, 1).is_file());
    assert!(checkpoint_file(&config.paths.checkpoints, 2).is_file());
    assert!(!checkpoint_file(&config.paths.checkpoints, 3).exists());

    let rows = EpochLog::rows(&config.paths.log).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].epoch, 1);
    assert_eq!(rows[1].epoch, 2);
    // Two-epoch run: the second epoch sits at 50% and drops a decade.
    assert_eq!(rows[0].learning_rate, 1e-3);
    assert_eq!(rows[1].learning_rate, 1e-4);
    for row in &rows {
        assert!(row.loss.is_finite());
    }
}

#[test]
fn restart_warm_starts_without_duplicating_log_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let config = synthetic_config(tmp.path(), ArchKind::Convnet);
    run(&config, 1);

    // Re-run epoch 2 from the epoch-1 checkpoint.
    run(&config, 2);

    let rows = EpochLog::rows(&config.paths.log).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].epoch, 1);
    assert_eq!(rows[1].epoch, 2);
    assert!(checkpoint_file(&config.paths.checkpoints, 2).is_file());
}

#[test]
fn start_epoch_past_configured_total_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let config = synthetic_config(tmp.path(), ArchKind::Convnet);
    let dataset = load_dataset(&config).unwrap();
    assert!(learn_model(&config, Arc::new(dataset), 3).is_err());
    assert!(learn_model(&config, Arc::new(load_dataset(&config).unwrap()), 0).is_err());
}

#[test]
fn mixup_variant_trains_to_completion() {
    let tmp = tempfile::tempdir().unwrap();
    let config = synthetic_config(tmp.path(), ArchKind::Mixup);
    run(&config, 1);
    assert!(checkpoint_file(&config.paths.checkpoints, 2).is_file());
    assert_eq!(EpochLog::rows(&config.paths.log).unwrap().len(), 2);
}

#[test]
fn recurrent_variant_trains_on_crop_sequences() {
    let tmp = tempfile::tempdir().unwrap();
    let config = synthetic_config(tmp.path(), ArchKind::Recurrent);
    run(&config, 1);
    assert!(checkpoint_file(&config.paths.checkpoints, 2).is_file());
    assert_eq!(EpochLog::rows(&config.paths.log).unwrap().len(), 2);
}
