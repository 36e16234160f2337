//! Convolutional crop classifier and checkpoint persistence.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CellCropNetConfig {
    /// Image channels per crop.
    pub channels: usize,
    /// Embedding width shared by all heads.
    pub embedding: usize,
    /// Output cardinality per target head.
    pub head_sizes: Vec<usize>,
}

impl CellCropNetConfig {
    pub fn new(channels: usize, head_sizes: Vec<usize>) -> Self {
        CellCropNetConfig {
            channels,
            embedding: 64,
            head_sizes,
        }
    }
}

/// Small convolutional backbone over single-cell crops with one linear
/// classification head per registered target. The recurrent variant runs
/// the same backbone per timestep and mean-pools the embeddings.
#[derive(Module, Debug)]
pub struct CellCropNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    avg: AdaptiveAvgPool2d,
    embed: Linear<B>,
    heads: Vec<Linear<B>>,
}

impl<B: Backend> CellCropNet<B> {
    pub fn new(config: &CellCropNetConfig, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([config.channels, 16], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conv2 = Conv2dConfig::new([16, 32], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        let avg = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let embed = LinearConfig::new(32, config.embedding).init(device);
        let heads = config
            .head_sizes
            .iter()
            .map(|classes| LinearConfig::new(config.embedding, *classes).init(device))
            .collect();
        CellCropNet {
            conv1,
            conv2,
            pool,
            avg,
            embed,
            heads,
        }
    }

    /// Backbone embedding for a batch of crops [batch, channels, h, w].
    pub fn features(&self, crops: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.conv1.forward(crops));
        let x = self.pool.forward(x);
        let x = relu(self.conv2.forward(x));
        let x = self.avg.forward(x);
        let x = x.flatten::<2>(1, 3);
        relu(self.embed.forward(x))
    }

    /// Per-target logits for a batch of crops.
    pub fn forward(&self, crops: Tensor<B, 4>) -> Vec<Tensor<B, 2>> {
        let embedding = self.features(crops);
        self.heads
            .iter()
            .map(|head| head.forward(embedding.clone()))
            .collect()
    }

    /// Per-target logits for crop sequences [batch, seq, channels, h, w]:
    /// backbone per timestep, embeddings mean-pooled over time.
    pub fn forward_sequence(&self, sequences: Tensor<B, 5>) -> Vec<Tensor<B, 2>> {
        let [batch, seq, channels, height, width] = sequences.dims();
        let flat = sequences.reshape([batch * seq, channels, height, width]);
        let embedding = self.features(flat);
        let width_e = embedding.dims()[1];
        let pooled = embedding
            .reshape([batch, seq, width_e])
            .mean_dim(1)
            .squeeze::<2>(1);
        self.heads
            .iter()
            .map(|head| head.forward(pooled.clone()))
            .collect()
    }
}

/// Checkpoint path template: `checkpoint_{epoch:04}` (the recorder adds
/// its `.bin` extension).
pub fn checkpoint_stem(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("checkpoint_{epoch:04}"))
}

/// The on-disk file the recorder actually writes.
pub fn checkpoint_file(dir: &Path, epoch: usize) -> PathBuf {
    checkpoint_stem(dir, epoch).with_extension("bin")
}

pub fn save_checkpoint<B: Backend>(
    model: &CellCropNet<B>,
    dir: &Path,
    epoch: usize,
) -> Result<(), RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model.clone().save_file(checkpoint_stem(dir, epoch), &recorder)
}

pub fn load_checkpoint<B: Backend>(
    model: CellCropNet<B>,
    dir: &Path,
    epoch: usize,
    device: &B::Device,
) -> Result<CellCropNet<B>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model.load_file(checkpoint_stem(dir, epoch), &recorder, device)
}
