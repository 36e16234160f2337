//! Tabular image index: CSV loading and train/validation partitioning.

use crate::types::{MetadataError, MetadataResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One image record: column name -> raw string value. Columns are
/// configuration-driven, so records stay schemaless at this layer.
pub type Record = BTreeMap<String, String>;

/// Typed accessor for a record column.
pub fn field<'a>(record: &'a Record, column: &str) -> MetadataResult<&'a str> {
    record
        .get(column)
        .map(|v| v.as_str())
        .ok_or_else(|| MetadataError::MissingColumn {
            column: column.to_string(),
        })
}

#[derive(Debug, Clone)]
pub struct MetadataTable {
    pub path: PathBuf,
    pub rows: Vec<Record>,
}

/// Disjoint partition of the table into training and validation rows.
/// Rows matched by neither predicate are kept in `data` but excluded from
/// both partitions; `uncovered` counts them for the caller to report.
#[derive(Debug, Clone)]
pub struct MetadataSplit {
    pub data: Vec<Record>,
    pub train: Vec<Record>,
    pub val: Vec<Record>,
    pub uncovered: usize,
}

impl MetadataTable {
    pub fn load_csv(path: &Path) -> MetadataResult<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| MetadataError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut rows = Vec::new();
        for result in reader.deserialize::<Record>() {
            let record = result.map_err(|e| MetadataError::Csv {
                path: path.to_path_buf(),
                source: e,
            })?;
            rows.push(record);
        }
        if rows.is_empty() {
            return Err(MetadataError::EmptyTable {
                path: path.to_path_buf(),
            });
        }
        Ok(MetadataTable {
            path: path.to_path_buf(),
            rows,
        })
    }

    /// Distinct values of one column, in first-seen order.
    pub fn distinct(&self, column: &str) -> MetadataResult<Vec<String>> {
        let mut seen = Vec::new();
        for row in &self.rows {
            let value = field(row, column)?;
            if !seen.iter().any(|v: &String| v == value) {
                seen.push(value.to_string());
            }
        }
        Ok(seen)
    }

    /// Splits rows by the two predicates. A row matched by both is an
    /// error: the partitions must be disjoint.
    pub fn split<F, G>(&self, train_predicate: F, val_predicate: G) -> MetadataResult<MetadataSplit>
    where
        F: Fn(&Record) -> bool,
        G: Fn(&Record) -> bool,
    {
        let mut train = Vec::new();
        let mut val = Vec::new();
        let mut overlapping = 0usize;
        let mut uncovered = 0usize;
        for row in &self.rows {
            match (train_predicate(row), val_predicate(row)) {
                (true, true) => overlapping += 1,
                (true, false) => train.push(row.clone()),
                (false, true) => val.push(row.clone()),
                (false, false) => uncovered += 1,
            }
        }
        if overlapping > 0 {
            return Err(MetadataError::OverlappingSplit { rows: overlapping });
        }
        Ok(MetadataSplit {
            data: self.rows.clone(),
            train,
            val,
            uncovered,
        })
    }
}
