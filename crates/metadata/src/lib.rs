//! Data contracts for the cellcrop training pipeline: the tabular image
//! index, train/validation partitioning, label targets, and the
//! configuration surface shared by the dataset and training crates.

pub mod config;
pub mod table;
pub mod target;
pub mod types;

pub use config::{
    ArchKind, Config, DatasetConfig, PartitionConfig, PathsConfig, SamplingConfig, TrainingConfig,
};
pub use table::{field, MetadataSplit, MetadataTable, Record};
pub use target::ColumnTarget;
pub use types::{MetadataError, MetadataResult};
