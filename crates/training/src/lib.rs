#![recursion_limit = "256"]

//! Model construction, crop collation, and the epoch training driver for
//! cellcrop.

pub mod crop;
pub mod driver;
pub mod logger;
pub mod models;
pub mod schedule;

pub use crop::{apply_mixup, collate_crops, collate_sequences, CropBatch, SequenceBatch};
pub use driver::learn_model;
pub use logger::{EpochLog, EpochRow};
pub use models::{
    checkpoint_file, checkpoint_stem, load_checkpoint, save_checkpoint, CellCropNet,
    CellCropNetConfig,
};
pub use schedule::{epoch_fraction, schedule_rate};

/// Backend used for training and evaluation (CPU ndarray).
pub type TrainBackend = burn_ndarray::NdArray<f32>;
