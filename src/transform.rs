//! Stateless raw-record to fixed-width feature transform.

use serde_json::Value;

use crate::constants::features::{
    CATEGORICAL_COLUMNS, HASH_COLUMN_INFIX, HASH_SLOTS, NUMERIC_COLUMNS, ROW_WIDTH, TARGET_COLUMN,
    UNKNOWN_CATEGORY,
};
use crate::data::{ProcessedRecord, RawRecord};
use crate::errors::PipelineError;
use crate::hash::hashed_slots;
use crate::types::{ColumnName, FeatureValue};

/// Processed column names in output order (the CSV header).
pub fn column_names() -> Vec<ColumnName> {
    let mut names = Vec::with_capacity(ROW_WIDTH);
    names.extend(NUMERIC_COLUMNS.iter().map(|name| name.to_string()));
    for column in CATEGORICAL_COLUMNS {
        names.extend((0..HASH_SLOTS).map(|slot| format!("{column}{HASH_COLUMN_INFIX}{slot}")));
    }
    names.push(TARGET_COLUMN.to_string());
    names
}

/// Transform a single record. `row` is only used for error reporting.
pub fn transform(raw: &RawRecord, row: usize) -> Result<ProcessedRecord, PipelineError> {
    let target = raw
        .get(TARGET_COLUMN)
        .and_then(coerce_number)
        .ok_or_else(|| PipelineError::MissingTarget {
            row,
            field: TARGET_COLUMN.to_string(),
        })?;

    let mut values = Vec::with_capacity(ROW_WIDTH);
    for column in NUMERIC_COLUMNS {
        values.push(raw.get(column).and_then(coerce_number).unwrap_or(0.0));
    }
    for column in CATEGORICAL_COLUMNS {
        let category = coerce_category(raw.get(column));
        let slots: [FeatureValue; HASH_SLOTS] = hashed_slots(&[category]);
        values.extend_from_slice(&slots);
    }
    values.push(target);

    ProcessedRecord::from_values(values).ok_or_else(|| {
        PipelineError::Configuration("feature schema constants are inconsistent".into())
    })
}

/// Transform every record, aborting on the first failure.
pub fn transform_batch(raw: &[RawRecord]) -> Result<Vec<ProcessedRecord>, PipelineError> {
    raw.iter()
        .enumerate()
        .map(|(row, record)| transform(record, row))
        .collect()
}

/// Best-effort numeric coercion; `None` when the value is not a finite number.
pub fn coerce_number(value: &Value) -> Option<FeatureValue> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// String form of a categorical value, `"unknown"` when absent.
pub fn coerce_category(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => UNKNOWN_CATEGORY.to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
