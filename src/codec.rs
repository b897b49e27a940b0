//! CSV encoding for buffer/version parts and raw blob decoding.

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde_json::Value;

use crate::constants::features::ROW_WIDTH;
use crate::data::{ProcessedRecord, RawRecord};
use crate::errors::PipelineError;
use crate::transform::column_names;
use crate::types::FeatureValue;

/// Encode processed rows as CSV with the fixed 53-column header.
pub fn encode_rows(rows: &[ProcessedRecord]) -> Result<Vec<u8>, PipelineError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(column_names())?;
    for row in rows {
        writer.write_record(row.values().iter().map(|value| value.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| PipelineError::Io(err.into_error()))
}

/// Decode a processed CSV part read from `key`, enforcing width and column order.
pub fn decode_rows(key: &str, bytes: &[u8]) -> Result<Vec<ProcessedRecord>, PipelineError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    check_header(key, &headers)?;

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != ROW_WIDTH {
            return Err(PipelineError::SchemaWidthMismatch {
                key: key.to_string(),
                expected: ROW_WIDTH,
                found: record.len(),
            });
        }
        let mut values = Vec::with_capacity(ROW_WIDTH);
        for (column, cell) in record.iter().enumerate() {
            values.push(parse_cell(key, row, &headers[column], cell)?);
        }
        if let Some(processed) = ProcessedRecord::from_values(values) {
            rows.push(processed);
        }
    }
    Ok(rows)
}

fn check_header(key: &str, headers: &StringRecord) -> Result<(), PipelineError> {
    if headers.len() != ROW_WIDTH {
        return Err(PipelineError::SchemaWidthMismatch {
            key: key.to_string(),
            expected: ROW_WIDTH,
            found: headers.len(),
        });
    }
    for (column, (expected, found)) in column_names().iter().zip(headers.iter()).enumerate() {
        if expected != found.trim() {
            return Err(PipelineError::SchemaHeaderMismatch {
                key: key.to_string(),
                column,
                expected: expected.clone(),
                found: found.to_string(),
            });
        }
    }
    Ok(())
}

fn parse_cell(key: &str, row: usize, column: &str, cell: &str) -> Result<FeatureValue, PipelineError> {
    cell.trim()
        .parse::<FeatureValue>()
        .map_err(|_| PipelineError::InvalidCell {
            key: key.to_string(),
            row,
            column: column.to_string(),
            value: cell.to_string(),
        })
}

/// Decode a raw CSV blob into records attributed to `source`.
///
/// Cells stay strings; empty cells are left out so they read as absent.
pub fn decode_raw_csv(source: &str, bytes: &[u8]) -> Result<Vec<RawRecord>, PipelineError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|name| name.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut raw = RawRecord::new(source);
        for (name, cell) in headers.iter().zip(record.iter()) {
            if cell.trim().is_empty() {
                continue;
            }
            raw.fields.insert(name.clone(), Value::String(cell.to_string()));
        }
        records.push(raw);
    }
    Ok(records)
}
