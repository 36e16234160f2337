use std::path::PathBuf;

use cell_dataset::{load_dataset, CsvLocationSource, Frame, LocationSource};
use clap::Parser;
use metadata::{field, Config};

#[derive(Parser, Debug)]
#[command(
    name = "inspect",
    about = "Scan a dataset partition and report per-image cell counts and pixel stats"
)]
struct Args {
    /// JSON configuration file.
    #[arg(long)]
    config: PathBuf,
    /// Partition to scan: all, train, or val.
    #[arg(long, default_value = "all")]
    frame: String,
    /// Only visit rows where this column has this value, as "Column=value".
    #[arg(long)]
    filter: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", args.config.display()))?;
    let frame = Frame::parse(&args.frame)
        .ok_or_else(|| anyhow::anyhow!("unknown frame {:?}, expected all/train/val", args.frame))?;
    let filter = match &args.filter {
        Some(raw) => {
            let (column, value) = raw
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("filter must look like Column=value"))?;
            Some((column.to_string(), value.to_string()))
        }
        None => None,
    };

    let dataset = load_dataset(&config)?;
    let locations = CsvLocationSource::new(
        &config.paths.locations,
        config.dataset.channels[0].clone(),
        config.sampling.seed,
    );

    let mut visited = 0usize;
    let mut total_cells = 0usize;
    dataset.scan(
        frame,
        |record| match &filter {
            Some((column, value)) => field(record, column).map(|v| v == value).unwrap_or(false),
            None => true,
        },
        |index, pixels, record| {
            let paths = dataset.get_image_paths(record)?;
            let cells = locations.get_locations(&paths.key, None)?.len();
            let (mut min, mut max, mut sum) = (f32::MAX, f32::MIN, 0.0f64);
            for &v in &pixels.data {
                min = min.min(v);
                max = max.max(v);
                sum += v as f64;
            }
            let mean = sum / pixels.data.len().max(1) as f64;
            println!(
                "[inspect] {index:>5} {key} cells={cells} {w}x{h}x{c} min={min:.4} max={max:.4} mean={mean:.4}",
                key = paths.key,
                w = pixels.width,
                h = pixels.height,
                c = pixels.channels,
            );
            visited += 1;
            total_cells += cells;
            Ok(())
        },
    )?;
    println!("[inspect] visited {visited} images, {total_cells} cells total");
    Ok(())
}
