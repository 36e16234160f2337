//! Image dataset: couples metadata rows to channel files and single-cell
//! locations, and serves stratified training batches.

use crate::locations::{CsvLocationSource, LocationSource};
use crate::pixels::{FileImageReader, PixelSource};
use crate::types::{
    DatasetBatch, DatasetError, DatasetResult, Frame, ImagePaths, ImagePixels,
};
use metadata::{field, ColumnTarget, Config, MetadataSplit, MetadataTable, Record};
use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Sampling parameters derived from the per-image cell counts.
#[derive(Debug, Clone, Copy)]
pub struct SamplingPlan {
    /// Images drawn per sampling class on each reshuffle.
    pub sample_images: usize,
    /// Locations drawn per image in a batch.
    pub sample_locations: usize,
    /// Rows served per `get_train_batch` call.
    pub images_per_worker: usize,
}

/// Shared mutable sampling state. The batch cursor read-modify-write is
/// the only cross-worker state and lives behind one mutex; pixel and
/// location I/O happens outside it.
struct SamplerState {
    training_sample: Vec<Record>,
    cursor: usize,
    plan: Option<SamplingPlan>,
    rng: StdRng,
}

pub struct ImageDataset {
    split: MetadataSplit,
    channels: Vec<String>,
    images_root: PathBuf,
    key_gen: Arc<dyn Fn(&Record) -> DatasetResult<String> + Send + Sync>,
    sampling_field: String,
    targets: Vec<ColumnTarget>,
    outlines: Option<PathBuf>,
    pixel_source: Arc<dyn PixelSource>,
    location_source: Arc<dyn LocationSource>,
    batch_size: usize,
    workers: usize,
    queue_size: usize,
    box_size: usize,
    state: Mutex<SamplerState>,
}

impl std::fmt::Debug for ImageDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDataset").finish_non_exhaustive()
    }
}

impl ImageDataset {
    pub fn with_sources(
        split: MetadataSplit,
        config: &Config,
        pixel_source: Arc<dyn PixelSource>,
        location_source: Arc<dyn LocationSource>,
    ) -> Self {
        let key_columns = config.dataset.key_columns.clone();
        let key_gen = Arc::new(move |record: &Record| -> DatasetResult<String> {
            let plate = field(record, &key_columns[0])?;
            let well = field(record, &key_columns[1])?;
            let site = field(record, &key_columns[2])?;
            Ok(format!("{plate}/{well}-{site}"))
        });
        let rng = match config.sampling.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        ImageDataset {
            split,
            channels: config.dataset.channels.clone(),
            images_root: config.paths.images.clone(),
            key_gen,
            sampling_field: config.sampling.field.clone(),
            targets: Vec::new(),
            outlines: None,
            pixel_source,
            location_source,
            batch_size: config.training.batch_size,
            workers: config.sampling.workers,
            queue_size: config.sampling.queue_size,
            box_size: config.sampling.box_size,
            state: Mutex::new(SamplerState {
                training_sample: Vec::new(),
                cursor: 0,
                plan: None,
                rng,
            }),
        }
    }

    /// Registers one more label target. The first target drives the
    /// per-class cell-count aggregation.
    pub fn add_target(&mut self, target: ColumnTarget) {
        self.targets.push(target);
    }

    /// Activates outline masking rooted at `root`; records then need an
    /// `Outlines` column naming their mask file.
    pub fn set_outlines(&mut self, root: PathBuf) {
        self.outlines = Some(root);
    }

    pub fn targets(&self) -> &[ColumnTarget] {
        &self.targets
    }

    pub fn box_size(&self) -> usize {
        self.box_size
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn sampling_plan(&self) -> Option<SamplingPlan> {
        self.state.lock().ok().and_then(|state| state.plan)
    }

    /// Copy of the current stratified training sample, mostly useful for
    /// inspection and tests.
    pub fn training_sample_snapshot(&self) -> DatasetResult<Vec<Record>> {
        Ok(self.lock_state()?.training_sample.clone())
    }

    fn frame_rows(&self, frame: Frame) -> &[Record] {
        match frame {
            Frame::All => &self.split.data,
            Frame::Train => &self.split.train,
            Frame::Val => &self.split.val,
        }
    }

    pub fn number_of_records(&self, frame: Frame) -> usize {
        self.frame_rows(frame).len()
    }

    /// Resolves the key, per-channel absolute paths, and the optional
    /// outline path for one record. Pure path construction, no I/O.
    pub fn get_image_paths(&self, record: &Record) -> DatasetResult<ImagePaths> {
        let key = (self.key_gen)(record)?;
        let mut channels = Vec::with_capacity(self.channels.len());
        for column in &self.channels {
            channels.push(self.images_root.join(field(record, column)?));
        }
        let outline = match &self.outlines {
            Some(root) => Some(root.join(field(record, "Outlines")?)),
            None => None,
        };
        Ok(ImagePaths {
            key,
            channels,
            outline,
        })
    }

    /// Preprocessing pass over the training partition: counts detected
    /// cells per image, aggregates per (image, first-target class), and
    /// derives the sampling plan. Images with zero detected cells are
    /// excluded with a warning; a class left without any usable image is
    /// an error, as is an entirely empty aggregate.
    pub fn prepare_training_locations(&self) -> DatasetResult<SamplingPlan> {
        let first_target = self.targets.first().ok_or_else(|| {
            DatasetError::Other("prepare_training_locations requires at least one target".into())
        })?;

        println!("[dataset] reading single-cell locations");
        let mut cells_per_image: Vec<usize> = Vec::new();
        let mut images_per_class: BTreeMap<usize, usize> = BTreeMap::new();
        let mut total_cells = 0usize;
        let mut zero_cell_images = 0usize;

        for record in &self.split.train {
            let paths = self.get_image_paths(record)?;
            let count = self.location_source.get_locations(&paths.key, None)?.len();
            if count == 0 {
                println!("[dataset] warning: no cells detected in {}, excluded", paths.key);
                zero_cell_images += 1;
                continue;
            }
            let class = first_target.index_of(record)?;
            *images_per_class.entry(class).or_insert(0) += 1;
            cells_per_image.push(count);
            total_cells += count;
        }

        if cells_per_image.is_empty() {
            return Err(DatasetError::NoCells);
        }
        for class in 0..first_target.len() {
            let present = self
                .split
                .train
                .iter()
                .any(|r| first_target.index_of(r).map(|c| c == class).unwrap_or(false));
            if present && !images_per_class.contains_key(&class) {
                return Err(DatasetError::EmptyClass {
                    class: format!("{}[{class}]", first_target.column()),
                });
            }
        }

        let class_counts: Vec<usize> = images_per_class.values().copied().collect();
        let sample_images = median(&class_counts).max(1.0) as usize;
        // Median cells per image, halved as a safety margin against
        // sparse images starving the crop queue.
        let sample_locations = ((median(&cells_per_image) / 2.0) as usize).max(1);
        let images_per_worker = (self.batch_size / self.workers).max(1);
        let classes = images_per_class.len();
        let cells_per_epoch = classes * sample_images * sample_locations;

        println!("[dataset] total single cells: {total_cells}");
        if zero_cell_images > 0 {
            println!("[dataset] excluded {zero_cell_images} images with zero cells");
        }
        println!("[dataset] median images per class: {sample_images}");
        println!("[dataset] classes: {classes}");
        println!("[dataset] locations sampled per image: {sample_locations}");
        println!("[dataset] sampling {cells_per_epoch} single cells per epoch");
        println!("[dataset] images per worker batch: {images_per_worker}");
        let coverage = 100.0 * self.queue_size as f64 / cells_per_epoch.max(1) as f64;
        println!("[dataset] queue data coverage: {}%", coverage as usize);

        let plan = SamplingPlan {
            sample_images,
            sample_locations,
            images_per_worker,
        };
        let mut state = self.lock_state()?;
        state.plan = Some(plan);
        self.reshuffle(&mut state)?;
        Ok(plan)
    }

    /// Redraws the stratified training sample and resets the cursor.
    pub fn shuffle_training_images(&self) -> DatasetResult<()> {
        let mut state = self.lock_state()?;
        self.reshuffle(&mut state)
    }

    fn lock_state(&self) -> DatasetResult<MutexGuard<'_, SamplerState>> {
        self.state
            .lock()
            .map_err(|_| DatasetError::Other("sampler state lock poisoned".into()))
    }

    fn reshuffle(&self, state: &mut SamplerState) -> DatasetResult<()> {
        let plan = state.plan.ok_or_else(|| {
            DatasetError::Other("sampling plan missing; run prepare_training_locations".into())
        })?;
        let mut values: Vec<String> = Vec::new();
        for record in &self.split.train {
            let value = field(record, &self.sampling_field)?;
            if !values.iter().any(|v| v == value) {
                values.push(value.to_string());
            }
        }

        let mut sample: Vec<Record> = Vec::with_capacity(values.len() * plan.sample_images);
        for value in &values {
            let pool: Vec<&Record> = self
                .split
                .train
                .iter()
                .filter(|r| field(r, &self.sampling_field).map(|v| v == value).unwrap_or(false))
                .collect();
            if pool.is_empty() {
                continue;
            }
            if pool.len() < plan.sample_images {
                // Short pool: draw with replacement to keep classes even.
                for _ in 0..plan.sample_images {
                    let pick = state.rng.gen_range(0..pool.len());
                    sample.push(pool[pick].clone());
                }
            } else {
                sample.extend(
                    pool.choose_multiple(&mut state.rng, plan.sample_images)
                        .map(|r| (*r).clone()),
                );
            }
        }
        sample.shuffle(&mut state.rng);
        state.training_sample = sample;
        state.cursor = 0;
        Ok(())
    }

    /// Pulls the next worker batch. The cursor slice/advance/reshuffle is
    /// serialized behind the state lock; pixel and location reads run
    /// outside it. Never returns more than `images_per_worker` rows, and
    /// read errors propagate without retry.
    pub fn get_train_batch(&self) -> DatasetResult<DatasetBatch> {
        let (rows, plan) = {
            let mut state = self.lock_state()?;
            let plan = state.plan.ok_or_else(|| {
                DatasetError::Other("sampling plan missing; run prepare_training_locations".into())
            })?;
            let start = state.cursor;
            let end = (start + plan.images_per_worker).min(state.training_sample.len());
            let mut rows: Vec<Record> = state.training_sample[start.min(end)..end].to_vec();
            state.cursor = start + plan.images_per_worker;
            if state.cursor > state.training_sample.len() {
                self.reshuffle(&mut state)?;
                if rows.is_empty() {
                    // The previous slice consumed the sample exactly; serve
                    // the head of the fresh one instead of an empty batch.
                    let end = plan.images_per_worker.min(state.training_sample.len());
                    rows = state.training_sample[..end].to_vec();
                    state.cursor = plan.images_per_worker;
                }
            }
            (rows, plan)
        };

        let mut batch = DatasetBatch {
            keys: Vec::with_capacity(rows.len()),
            images: Vec::with_capacity(rows.len()),
            targets: Vec::with_capacity(rows.len()),
            locations: Vec::with_capacity(rows.len()),
        };
        for record in &rows {
            let paths = self.get_image_paths(record)?;
            let pixels = self
                .pixel_source
                .read(&paths.channels, paths.outline.as_deref())?;
            let locations = self
                .location_source
                .get_locations(&paths.key, Some(plan.sample_locations))?;
            let mut indices = Vec::with_capacity(self.targets.len());
            for target in &self.targets {
                indices.push(target.index_of(record)?);
            }
            batch.keys.push(paths.key);
            batch.images.push(pixels);
            batch.targets.push(indices);
            batch.locations.push(locations);
        }
        Ok(batch)
    }

    /// Iterates one partition, opening each image and invoking the
    /// visitor. Used for non-training inspection passes; a decode error
    /// aborts the scan.
    pub fn scan<P, V>(&self, frame: Frame, predicate: P, mut visit: V) -> DatasetResult<()>
    where
        P: Fn(&Record) -> bool,
        V: FnMut(usize, &ImagePixels, &Record) -> DatasetResult<()>,
    {
        for (index, record) in self.frame_rows(frame).iter().enumerate() {
            if !predicate(record) {
                continue;
            }
            let paths = self.get_image_paths(record)?;
            let pixels = self
                .pixel_source
                .read(&paths.channels, paths.outline.as_deref())?;
            visit(index, &pixels, record)?;
        }
        Ok(())
    }
}

/// Median with the usual even-length average.
fn median(values: &[usize]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    }
}

/// Loads the index, splits it, registers targets, wires the file-backed
/// pixel and location sources, and runs the sampling preprocessing pass.
pub fn load_dataset(config: &Config) -> DatasetResult<ImageDataset> {
    let table = MetadataTable::load_csv(&config.paths.index)?;
    let split_field = config.partition.split_field.clone();
    let training_values = config.partition.training_values.clone();
    let validation_values = config.partition.validation_values.clone();
    let split = table.split(
        |r| {
            field(r, &split_field)
                .map(|v| training_values.iter().any(|t| t == v))
                .unwrap_or(false)
        },
        |r| {
            field(r, &split_field)
                .map(|v| validation_values.iter().any(|t| t == v))
                .unwrap_or(false)
        },
    )?;
    println!(
        "[dataset] split {}: {} train / {} val / {} uncovered",
        config.paths.index.display(),
        split.train.len(),
        split.val.len(),
        split.uncovered
    );

    // Location tables are keyed by the first channel.
    let location_channel = config.dataset.channels[0].clone();
    let location_source = Arc::new(CsvLocationSource::new(
        config.paths.locations.clone(),
        location_channel,
        config.sampling.seed,
    ));
    let mut dataset = ImageDataset::with_sources(
        split,
        config,
        Arc::new(FileImageReader),
        location_source,
    );

    for column in &config.partition.targets {
        let values = table.distinct(column)?;
        dataset.add_target(ColumnTarget::new(column.clone(), values));
    }
    if config.sampling.mask_objects {
        if let Some(root) = &config.dataset.outlines {
            dataset.set_outlines(root.clone());
        }
    }

    dataset.prepare_training_locations()?;
    Ok(dataset)
}
