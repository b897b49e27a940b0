use std::sync::Arc;

use serde_json::json;

use featurestream::codec::{decode_rows, encode_rows};
use featurestream::constants::features::{FEATURE_COUNT, HASH_SLOTS, ROW_WIDTH};
use featurestream::constants::store::{TRAIN_FILE, VALID_FILE};
use featurestream::publisher::part_key;
use featurestream::{
    DatasetPair, MemoryObjectStore, ObjectStore, PipelineError, ProcessedRecord, RawRecord,
    VersionPublisher, VersionState, column_names, split_rows, transform, transform_batch,
};

fn house(id: u32, city: &str) -> RawRecord {
    RawRecord::new("test")
        .with_field("bedrooms", json!(3))
        .with_field("bathrooms", json!("2.5"))
        .with_field("sqft_living", json!(1200 + id))
        .with_field("yr_built", json!(1990))
        .with_field("street", json!(format!("{id} Main St")))
        .with_field("city", json!(city))
        .with_field("statezip", json!("WA 98103"))
        .with_field("country", json!("USA"))
        .with_field("price", json!(300_000 + id * 1_000))
}

fn rows(count: usize) -> Vec<ProcessedRecord> {
    let raw: Vec<RawRecord> = (0..count as u32).map(|id| house(id, "Seattle")).collect();
    transform_batch(&raw).unwrap()
}

#[test]
fn transform_is_deterministic_and_fixed_width() {
    let record = house(7, "Kirkland");
    let first = transform(&record, 0).unwrap();
    let second = transform(&record, 0).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.values().len(), ROW_WIDTH);
    assert_eq!(column_names().len(), ROW_WIDTH);
    assert_eq!(first.target(), 307_000.0);

    // Each categorical column contributes exactly one signed unit.
    for block in first.features()[12..FEATURE_COUNT].chunks(HASH_SLOTS) {
        let nonzero: Vec<f64> = block.iter().copied().filter(|v| *v != 0.0).collect();
        assert_eq!(nonzero.len(), 1);
        assert_eq!(nonzero[0].abs(), 1.0);
    }
}

#[test]
fn unknown_fields_are_ignored_and_missing_categories_hash_as_unknown() {
    let mut bare = RawRecord::new("test").with_field("price", json!(1.0));
    let baseline = transform(&bare, 0).unwrap();
    bare = bare.with_field("garage", json!("yes"));
    assert_eq!(transform(&bare, 0).unwrap(), baseline);

    let explicit = RawRecord::new("test")
        .with_field("price", json!(1.0))
        .with_field("street", json!("unknown"))
        .with_field("city", json!("unknown"))
        .with_field("statezip", json!("unknown"))
        .with_field("country", json!("unknown"));
    assert_eq!(transform(&explicit, 0).unwrap(), baseline);
}

#[test]
fn missing_target_names_the_row() {
    let raw = vec![
        house(1, "Seattle"),
        RawRecord::new("test").with_field("bedrooms", json!(2)),
    ];
    let err = transform_batch(&raw).unwrap_err();
    assert!(matches!(err, PipelineError::MissingTarget { row: 1, ref field } if field == "price"));
}

#[test]
fn split_is_reproducible_and_seed_sensitive() {
    let a = split_rows(rows(40), 0.8, 42);
    let b = split_rows(rows(40), 0.8, 42);
    let c = split_rows(rows(40), 0.8, 43);
    assert_eq!(a, b);
    assert_eq!((a.train.len(), a.valid.len()), (32, 8));
    assert_ne!(a.train, c.train);
}

#[test]
fn encoded_rows_decode_to_the_same_values() {
    let original = rows(5);
    let decoded = decode_rows("instream/train.csv", &encode_rows(&original).unwrap()).unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn versions_stay_monotonic_after_partial_writes() {
    let store = Arc::new(MemoryObjectStore::new());
    let publisher = VersionPublisher::new(store.clone());
    let pair = DatasetPair::new(rows(4), rows(1));

    assert_eq!(publisher.publish(&pair).unwrap(), 1);
    // Crash after the valid part of v2.
    store
        .put(&part_key(2, VALID_FILE), &encode_rows(&pair.valid).unwrap())
        .unwrap();
    assert_eq!(
        publisher.version_state(2).unwrap(),
        VersionState::Partial {
            missing: part_key(2, TRAIN_FILE)
        }
    );
    assert!(matches!(
        publisher.read_version(2).unwrap_err(),
        PipelineError::PartialVersionWrite { version: 2, .. }
    ));

    assert_eq!(publisher.publish(&pair).unwrap(), 3);
    assert_eq!(publisher.latest_version().unwrap(), 3);
    assert_eq!(publisher.read_version(1).unwrap(), pair);
    assert_eq!(publisher.read_version(3).unwrap(), pair);
}
