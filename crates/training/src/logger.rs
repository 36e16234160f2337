//! Append-only epoch metric log.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochRow {
    pub epoch: usize,
    pub learning_rate: f64,
    pub loss: f32,
}

/// One CSV row per trained epoch. Restarting from epoch N prunes any
/// rows for N and later first, so re-run epochs overwrite instead of
/// duplicating.
#[derive(Debug, Clone)]
pub struct EpochLog {
    path: PathBuf,
}

impl EpochLog {
    pub fn prepare(path: &Path, start_epoch: usize) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            let kept: Vec<EpochRow> = Self::rows(path)?
                .into_iter()
                .filter(|row| row.epoch < start_epoch)
                .collect();
            let mut writer = csv::Writer::from_path(path)?;
            for row in &kept {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        Ok(EpochLog {
            path: path.to_path_buf(),
        })
    }

    pub fn append(&self, row: &EpochRow) -> anyhow::Result<()> {
        let write_header = !self.path.exists()
            || fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }

    pub fn rows(path: &Path) -> anyhow::Result<Vec<EpochRow>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for result in reader.deserialize::<EpochRow>() {
            rows.push(result?);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_row_per_epoch() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.csv");
        let log = EpochLog::prepare(&path, 1).unwrap();
        for epoch in 1..=3 {
            log.append(&EpochRow {
                epoch,
                learning_rate: 1e-3,
                loss: 0.5,
            })
            .unwrap();
        }
        let rows = EpochLog::rows(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].epoch, 3);
    }

    #[test]
    fn restart_overwrites_instead_of_duplicating() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.csv");
        let log = EpochLog::prepare(&path, 1).unwrap();
        for epoch in 1..=3 {
            log.append(&EpochRow {
                epoch,
                learning_rate: 1e-3,
                loss: 0.5,
            })
            .unwrap();
        }

        // Restart from epoch 2: rows 2 and 3 are replaced, not repeated.
        let log = EpochLog::prepare(&path, 2).unwrap();
        for epoch in 2..=3 {
            log.append(&EpochRow {
                epoch,
                learning_rate: 1e-4,
                loss: 0.25,
            })
            .unwrap();
        }
        let rows = EpochLog::rows(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].learning_rate, 1e-3);
        assert_eq!(rows[1].learning_rate, 1e-4);
        assert_eq!(rows[1].epoch, 2);
    }
}
