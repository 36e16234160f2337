//! Single-cell location tables, one CSV per image.

use crate::types::{DatasetError, DatasetResult, Location};
use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Capability seam for the location collaborator. Contract: an image with
/// zero detected cells yields an empty vec, never an error; when
/// `random_sample` is smaller than the pool the result is a subsample
/// without replacement.
pub trait LocationSource: Send + Sync {
    fn get_locations(&self, key: &str, random_sample: Option<usize>)
        -> DatasetResult<Vec<Location>>;
}

/// Reads `<root>/<key>-<channel>.csv` with columns
/// `<channel>_Location_Center_X` / `<channel>_Location_Center_Y`, one row
/// per detected cell. A missing file counts as zero cells.
pub struct CsvLocationSource {
    root: PathBuf,
    channel: String,
    rng: Mutex<StdRng>,
}

impl CsvLocationSource {
    pub fn new(root: impl Into<PathBuf>, channel: impl Into<String>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        CsvLocationSource {
            root: root.into(),
            channel: channel.into(),
            rng: Mutex::new(rng),
        }
    }

    fn table_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}-{channel}.csv", channel = self.channel))
    }

    fn read_table(&self, path: &Path) -> DatasetResult<Vec<Location>> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| DatasetError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        let x_column = format!("{}_Location_Center_X", self.channel);
        let y_column = format!("{}_Location_Center_Y", self.channel);

        let mut locations = Vec::new();
        for result in reader.deserialize::<BTreeMap<String, String>>() {
            let row = result.map_err(|e| DatasetError::Csv {
                path: path.to_path_buf(),
                source: e,
            })?;
            let x = parse_coordinate(&row, &x_column, path)?;
            let y = parse_coordinate(&row, &y_column, path)?;
            locations.push(Location { x, y });
        }
        Ok(locations)
    }
}

fn parse_coordinate(
    row: &BTreeMap<String, String>,
    column: &str,
    path: &Path,
) -> DatasetResult<f32> {
    let raw = row.get(column).ok_or_else(|| {
        DatasetError::Other(format!("{}: missing column {column}", path.display()))
    })?;
    raw.trim().parse::<f32>().map_err(|_| {
        DatasetError::Other(format!(
            "{}: column {column} holds non-numeric value {raw:?}",
            path.display()
        ))
    })
}

impl LocationSource for CsvLocationSource {
    fn get_locations(
        &self,
        key: &str,
        random_sample: Option<usize>,
    ) -> DatasetResult<Vec<Location>> {
        let path = self.table_path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut locations = self.read_table(&path)?;

        if let Some(n) = random_sample {
            if n < locations.len() {
                let mut rng = self
                    .rng
                    .lock()
                    .map_err(|_| DatasetError::Other("location rng poisoned".to_string()))?;
                locations = locations
                    .choose_multiple(&mut *rng, n)
                    .copied()
                    .collect();
            }
        }
        Ok(locations)
    }
}
