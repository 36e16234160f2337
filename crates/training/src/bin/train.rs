use std::path::PathBuf;
use std::sync::Arc;

use cell_dataset::load_dataset;
use clap::Parser;
use metadata::Config;
use training::learn_model;

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train a cell-crop model from an image index and location tables"
)]
struct Args {
    /// JSON configuration file.
    #[arg(long)]
    config: PathBuf,
    /// Epoch to start from (1-based). Earlier epochs keep their
    /// checkpoints and log rows; warm-starts from the previous epoch's
    /// checkpoint when one exists.
    #[arg(long, default_value_t = 1)]
    epoch: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", args.config.display()))?;
    let dataset = load_dataset(&config)?;
    learn_model(&config, Arc::new(dataset), args.epoch)
}
