//! Error definitions for the metadata crate.

use std::path::PathBuf;
use thiserror::Error;

pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv parse error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing column {column} in metadata record")]
    MissingColumn { column: String },
    #[error("value {value} not among the known categories of column {column}")]
    UnknownCategory { column: String, value: String },
    #[error("{rows} rows matched by both the training and validation predicates")]
    OverlappingSplit { rows: usize },
    #[error("metadata table at {path} contains no rows")]
    EmptyTable { path: PathBuf },
    #[error("invalid configuration: {0}")]
    Config(String),
}
