//! The `instream/` accumulation buffer and the deterministic train/valid split.

use std::sync::Arc;

use rand::RngCore;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::codec::{decode_rows, encode_rows};
use crate::constants::split::SPLITMIX_INCREMENT;
use crate::constants::store::{INSTREAM_PREFIX, TRAIN_FILE, VALID_FILE};
use crate::data::{DatasetPair, ProcessedRecord};
use crate::errors::PipelineError;
use crate::store::{ObjectStore, join_key};
use crate::types::ObjectKey;

/// Splitmix64 stream driving the split shuffle.
///
/// Fixed here so a seed keeps producing the same partition whatever `StdRng` becomes.
#[derive(Debug)]
struct SplitMix64(u64);

impl RngCore for SplitMix64 {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(SPLITMIX_INCREMENT);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand::rand_core::impls::fill_bytes_via_next(self, dest)
    }
}

/// Order rows by their bit patterns so the shuffle sees the same input however
/// the sources happened to hand the rows over.
fn canonical_order(rows: &mut [ProcessedRecord]) {
    rows.sort_by(|a, b| {
        a.values()
            .iter()
            .map(|v| v.to_bits())
            .cmp(b.values().iter().map(|v| v.to_bits()))
    });
}

/// Shuffle `rows` with `seed` and cut the first `floor(n * train_fraction)` into train.
///
/// The partition depends on the set of rows and the seed, not on the input order.
pub fn split_rows(mut rows: Vec<ProcessedRecord>, train_fraction: f64, seed: u64) -> DatasetPair {
    canonical_order(&mut rows);
    rows.shuffle(&mut SplitMix64(seed));
    let train_len = ((rows.len() as f64) * train_fraction).floor() as usize;
    let valid = rows.split_off(train_len.min(rows.len()));
    DatasetPair::new(rows, valid)
}

/// Existing rows first, then incoming rows, per partition.
pub fn merge(existing: DatasetPair, incoming: DatasetPair) -> DatasetPair {
    let mut merged = existing;
    merged.extend(incoming);
    merged
}

/// Accumulation buffer stored under `instream/` in a dataset store.
pub struct AccumulationBuffer {
    store: Arc<dyn ObjectStore>,
}

impl AccumulationBuffer {
    /// Bind the buffer to `store`.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Key of the buffer's train part.
    pub fn train_key() -> ObjectKey {
        join_key(&[INSTREAM_PREFIX, TRAIN_FILE])
    }

    /// Key of the buffer's valid part.
    pub fn valid_key() -> ObjectKey {
        join_key(&[INSTREAM_PREFIX, VALID_FILE])
    }

    /// Load the buffer. Absent or unreadable parts load as empty; malformed parts fail.
    pub fn load(&self) -> Result<DatasetPair, PipelineError> {
        let train = self.load_part(&Self::train_key())?;
        let valid = self.load_part(&Self::valid_key())?;
        debug!(train = train.len(), valid = valid.len(), "loaded instream buffer");
        Ok(DatasetPair::new(train, valid))
    }

    fn load_part(&self, key: &str) -> Result<Vec<ProcessedRecord>, PipelineError> {
        match self.store.get(key) {
            Ok(Some(bytes)) => decode_rows(key, &bytes),
            Ok(None) => Ok(Vec::new()),
            Err(err) => {
                warn!(key, error = %err, "instream part unreadable; treating as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Delete both buffer parts.
    pub fn clear(&self) -> Result<(), PipelineError> {
        self.store.delete(&Self::train_key())?;
        self.store.delete(&Self::valid_key())?;
        Ok(())
    }

    /// Replace the buffer with `pair` (valid part first, train part last).
    pub fn store(&self, pair: &DatasetPair) -> Result<(), PipelineError> {
        self.store.put(&Self::valid_key(), &encode_rows(&pair.valid)?)?;
        self.store.put(&Self::train_key(), &encode_rows(&pair.train)?)?;
        Ok(())
    }
}
