//! Label-encoded training targets over metadata columns.

use crate::table::{field, Record};
use crate::types::{MetadataError, MetadataResult};

/// A supervised target derived from one metadata column: holds the column
/// name and its distinct category values, and maps records to class
/// indices or one-hot vectors.
#[derive(Debug, Clone)]
pub struct ColumnTarget {
    column: String,
    values: Vec<String>,
}

impl ColumnTarget {
    pub fn new(column: impl Into<String>, values: Vec<String>) -> Self {
        ColumnTarget {
            column: column.into(),
            values,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Number of distinct categories.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Class index for one record; unseen categories are an error.
    pub fn index_of(&self, record: &Record) -> MetadataResult<usize> {
        let value = field(record, &self.column)?;
        self.values
            .iter()
            .position(|v| v == value)
            .ok_or_else(|| MetadataError::UnknownCategory {
                column: self.column.clone(),
                value: value.to_string(),
            })
    }

    pub fn one_hot(&self, record: &Record) -> MetadataResult<Vec<f32>> {
        let index = self.index_of(record)?;
        let mut encoding = vec![0.0; self.values.len()];
        encoding[index] = 1.0;
        Ok(encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(value: &str) -> Record {
        let mut r = BTreeMap::new();
        r.insert("Compound".to_string(), value.to_string());
        r
    }

    #[test]
    fn encodes_known_categories() {
        let target = ColumnTarget::new("Compound", vec!["dmso".into(), "taxol".into()]);
        assert_eq!(target.index_of(&record("taxol")).unwrap(), 1);
        assert_eq!(target.one_hot(&record("dmso")).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn unseen_category_fails() {
        let target = ColumnTarget::new("Compound", vec!["dmso".into()]);
        let err = target.index_of(&record("unknown")).unwrap_err();
        assert!(matches!(err, MetadataError::UnknownCategory { .. }));
    }
}
