//! Single-cell image dataset plumbing for cellcrop.
//!
//! This crate provides:
//! - Pixel and location I/O behind capability traits
//! - The image dataset with its stratified sampling plan
//! - The locked batch cursor and the worker batch feed
//! - Partition scanning for inspection passes

pub mod dataset;
pub mod feed;
pub mod locations;
pub mod pixels;
pub mod types;

pub use dataset::{load_dataset, ImageDataset, SamplingPlan};
pub use feed::BatchFeed;
pub use locations::{CsvLocationSource, LocationSource};
pub use pixels::{FileImageReader, PixelSource};
pub use types::{
    DatasetBatch, DatasetError, DatasetResult, Frame, ImagePaths, ImagePixels, Location,
};
