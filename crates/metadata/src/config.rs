//! Configuration surface consumed by the dataset and training crates.

use crate::types::{MetadataError, MetadataResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Model architecture variants. A closed set: each kind implies the input
/// tensor shape the crop collator must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchKind {
    Convnet,
    Recurrent,
    Mixup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Metadata index CSV.
    pub index: PathBuf,
    /// Root directory of channel image files.
    pub images: PathBuf,
    /// Root directory of per-image location CSV files.
    pub locations: PathBuf,
    /// Directory receiving per-epoch checkpoints.
    pub checkpoints: PathBuf,
    /// Epoch metric log CSV.
    pub log: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Metadata columns holding per-channel file paths (relative to the
    /// images root).
    pub channels: Vec<String>,
    /// Columns forming the image key, joined as "{0}/{1}-{2}".
    pub key_columns: [String; 3],
    /// Optional root of per-image outline masks.
    #[serde(default)]
    pub outlines: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Column deciding the train/validation split.
    pub split_field: String,
    pub training_values: Vec<String>,
    pub validation_values: Vec<String>,
    /// Label columns registered as training targets.
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Column used to stratify image sampling per epoch.
    pub field: String,
    pub workers: usize,
    pub queue_size: usize,
    /// Side length of the square crop around each cell center.
    pub box_size: usize,
    /// Apply outline masks to loaded pixels.
    #[serde(default)]
    pub mask_objects: bool,
    /// RNG seed for reproducible sampling; fresh entropy when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub arch: ArchKind,
    pub learning_rate: f64,
    pub epochs: usize,
    pub steps: usize,
    pub batch_size: usize,
    /// Crops per sequence for the recurrent variant.
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,
    /// Mixing strength for the mixup variant.
    #[serde(default = "default_mixup_alpha")]
    pub mixup_alpha: f32,
}

fn default_sequence_length() -> usize {
    5
}

fn default_mixup_alpha() -> f32 {
    0.2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub dataset: DatasetConfig,
    pub partition: PartitionConfig,
    pub sampling: SamplingConfig,
    pub training: TrainingConfig,
}

impl Config {
    pub fn load(path: &Path) -> MetadataResult<Self> {
        let raw = fs::read(path).map_err(|e| MetadataError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = serde_json::from_slice(&raw).map_err(|e| MetadataError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MetadataResult<()> {
        if self.dataset.channels.is_empty() {
            return Err(MetadataError::Config("dataset.channels is empty".into()));
        }
        if self.partition.targets.is_empty() {
            return Err(MetadataError::Config("partition.targets is empty".into()));
        }
        if self.sampling.workers == 0 {
            return Err(MetadataError::Config("sampling.workers must be >= 1".into()));
        }
        if self.sampling.queue_size == 0 {
            return Err(MetadataError::Config(
                "sampling.queue_size must be >= 1".into(),
            ));
        }
        if self.sampling.box_size == 0 {
            return Err(MetadataError::Config("sampling.box_size must be >= 1".into()));
        }
        if self.training.epochs == 0 || self.training.steps == 0 {
            return Err(MetadataError::Config(
                "training.epochs and training.steps must be >= 1".into(),
            ));
        }
        if self.training.batch_size < self.sampling.workers {
            return Err(MetadataError::Config(format!(
                "training.batch_size {} smaller than sampling.workers {}",
                self.training.batch_size, self.sampling.workers
            )));
        }
        if !(self.training.learning_rate > 0.0) {
            return Err(MetadataError::Config(
                "training.learning_rate must be positive".into(),
            ));
        }
        if self.training.arch == ArchKind::Recurrent && self.training.sequence_length == 0 {
            return Err(MetadataError::Config(
                "training.sequence_length must be >= 1 for the recurrent variant".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            paths: PathsConfig {
                index: "index.csv".into(),
                images: "images".into(),
                locations: "locations".into(),
                checkpoints: "checkpoints".into(),
                log: "log.csv".into(),
            },
            dataset: DatasetConfig {
                channels: vec!["DNA".into(), "RNA".into()],
                key_columns: ["Plate".into(), "Well".into(), "Site".into()],
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
                queue_size: 8,
                box_size: 16,
                mask_objects: false,
                seed: Some(7),
            },
            training: TrainingConfig {
                arch: ArchKind::Convnet,
                learning_rate: 1e-3,
                epochs: 4,
                steps: 10,
                batch_size: 8,
                sequence_length: 5,
                mixup_alpha: 0.2,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn batch_smaller_than_workers_fails() {
        let mut config = base_config();
        config.training.batch_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_and_validates_a_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, serde_json::to_string(&base_config()).unwrap()).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.training.epochs, 4);
        assert_eq!(config.dataset.channels.len(), 2);
    }

    #[test]
    fn malformed_json_is_reported_with_its_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "{").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, MetadataError::Json { .. }));
    }

    #[test]
    fn arch_tag_round_trips_snake_case() {
        let json = serde_json::to_string(&ArchKind::Recurrent).unwrap();
        assert_eq!(json, "\"recurrent\"");
        let kind: ArchKind = serde_json::from_str("\"mixup\"").unwrap();
        assert_eq!(kind, ArchKind::Mixup);
    }
}
