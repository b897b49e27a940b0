use indexmap::IndexMap;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::features::{FEATURE_COUNT, ROW_WIDTH};
use crate::types::{ColumnName, FeatureValue, SourceId};

/// Raw record as delivered by an upstream source.
///
/// Field values keep their source representation: CSV cells arrive as strings,
/// documents arrive typed. Coercion happens in [`crate::transform`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source that produced this record.
    pub source: SourceId,
    /// Named field values in source order.
    pub fields: IndexMap<ColumnName, Value>,
}

impl RawRecord {
    /// Create an empty record attributed to `source`.
    pub fn new(source: impl Into<SourceId>) -> Self {
        Self {
            source: source.into(),
            fields: IndexMap::new(),
        }
    }

    /// Builder-style field insert.
    pub fn with_field(mut self, name: impl Into<ColumnName>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Field value, treating JSON `null` as absent.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|value| !value.is_null())
    }

    /// Drop a field if present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }
}

/// Fixed-width processed row: features followed by the target.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedRecord {
    values: Vec<FeatureValue>,
}

impl ProcessedRecord {
    /// Wrap `values`, returning `None` unless the width is exactly [`ROW_WIDTH`].
    pub fn from_values(values: Vec<FeatureValue>) -> Option<Self> {
        (values.len() == ROW_WIDTH).then_some(Self { values })
    }

    /// Every value, target last.
    pub fn values(&self) -> &[FeatureValue] {
        &self.values
    }

    /// Feature columns only.
    pub fn features(&self) -> &[FeatureValue] {
        &self.values[..FEATURE_COUNT]
    }

    /// Target value.
    pub fn target(&self) -> FeatureValue {
        self.values[FEATURE_COUNT]
    }
}

/// Train/validation pair shared by the accumulation buffer and published versions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DatasetPair {
    /// Training rows.
    pub train: Vec<ProcessedRecord>,
    /// Validation rows.
    pub valid: Vec<ProcessedRecord>,
}

impl DatasetPair {
    /// Build a pair from explicit partitions.
    pub fn new(train: Vec<ProcessedRecord>, valid: Vec<ProcessedRecord>) -> Self {
        Self { train, valid }
    }

    /// True when both partitions are empty.
    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.valid.is_empty()
    }

    /// Total rows across both partitions.
    pub fn len(&self) -> usize {
        self.train.len() + self.valid.len()
    }

    /// Append `other` after the existing rows of each partition.
    pub fn extend(&mut self, other: DatasetPair) {
        self.train.extend(other.train);
        self.valid.extend(other.valid);
    }
}

/// A partition split into an `n x 52` feature matrix and its target column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureMatrix {
    /// One row per record, one column per feature.
    pub features: Array2<FeatureValue>,
    /// Target per row.
    pub targets: Array1<FeatureValue>,
}

impl FeatureMatrix {
    /// Split processed rows into features and target.
    pub fn from_records(records: &[ProcessedRecord]) -> Self {
        let features = Array2::from_shape_fn((records.len(), FEATURE_COUNT), |(i, j)| {
            records[i].features()[j]
        });
        let targets = records.iter().map(ProcessedRecord::target).collect();
        Self { features, targets }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(seed: f64) -> ProcessedRecord {
        let mut values = vec![seed; ROW_WIDTH];
        values[FEATURE_COUNT] = seed * 100.0;
        ProcessedRecord::from_values(values).unwrap()
    }

    #[test]
    fn processed_record_rejects_wrong_width() {
        assert!(ProcessedRecord::from_values(vec![0.0; ROW_WIDTH - 1]).is_none());
        assert!(ProcessedRecord::from_values(vec![0.0; ROW_WIDTH + 1]).is_none());
        let record = row(2.0);
        assert_eq!(record.features().len(), FEATURE_COUNT);
        assert_eq!(record.target(), 200.0);
    }

    #[test]
    fn dataset_pair_extend_keeps_existing_rows_first() {
        let mut pair = DatasetPair::new(vec![row(1.0)], vec![row(2.0)]);
        pair.extend(DatasetPair::new(vec![row(3.0)], Vec::new()));
        assert_eq!(pair.train, vec![row(1.0), row(3.0)]);
        assert_eq!(pair.valid, vec![row(2.0)]);
        assert_eq!(pair.len(), 3);
        assert!(!pair.is_empty());
        assert!(DatasetPair::default().is_empty());
    }

    #[test]
    fn raw_record_treats_null_as_absent() {
        let record = RawRecord::new("blob")
            .with_field("city", Value::Null)
            .with_field("price", 10);
        assert!(record.get("city").is_none());
        assert!(record.get("price").is_some());
    }

    #[test]
    fn feature_matrix_separates_target() {
        let matrix = FeatureMatrix::from_records(&[row(1.0), row(2.0)]);
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.targets, Array1::from(vec![100.0, 200.0]));
        assert_eq!(matrix.features.dim(), (2, FEATURE_COUNT));
        assert_eq!(matrix.features[[1, 0]], 2.0);
    }
}
