use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use featurestream::constants::store::{REJECTED_PREFIX, TRAIN_FILE, VALID_FILE};
use featurestream::publisher::part_key;
use featurestream::{
    AccumulationBuffer, FileObjectStore, JsonDirCollection, ObjectStore, PipelineConfig,
    PipelineError, Producer, ProducerOutcome, SourceCollector, VersionPublisher,
};

const HEADER: &str = "date,price,bedrooms,bathrooms,sqft_living,sqft_lot,floors,waterfront,view,condition,sqft_above,sqft_basement,yr_built,yr_renovated,street,city,statezip,country";

fn blob(rows: std::ops::Range<u32>) -> Vec<u8> {
    let mut csv = format!("{HEADER}\n");
    for id in rows {
        csv.push_str(&format!(
            "2014-05-02 00:00:00,{},3,1.5,{},7912,1.5,0,0,3,1340,0,1955,2005,{} Oak Ave,Shoreline,WA 98133,USA\n",
            300_000 + id * 1_000,
            1_000 + id * 10,
            id
        ));
    }
    csv.into_bytes()
}

struct Harness {
    _dir: tempfile::TempDir,
    datasets: Arc<FileObjectStore>,
    blobs: Arc<FileObjectStore>,
    collection: Arc<JsonDirCollection>,
    producer: Producer,
}

fn harness(batch_size: usize) -> Harness {
    let dir = tempdir().unwrap();
    let datasets = Arc::new(FileObjectStore::open(dir.path().join("datasets")).unwrap());
    let blobs = Arc::new(FileObjectStore::open(dir.path().join("incoming")).unwrap());
    let collection = Arc::new(JsonDirCollection::open(dir.path().join("collection")).unwrap());
    let config = PipelineConfig {
        batch_size,
        train_fraction: 0.8,
        ..PipelineConfig::default()
    }
    .validated()
    .unwrap();
    let collector =
        SourceCollector::blob_and_collection(blobs.clone(), "data.csv", collection.clone());
    let producer = Producer::new(config, datasets.clone(), collector);
    Harness {
        _dir: dir,
        datasets,
        blobs,
        collection,
        producer,
    }
}

#[test]
fn buffers_then_publishes_and_clears() {
    let h = harness(10);

    h.blobs.put("data.csv", &blob(0..12)).unwrap();
    assert_eq!(
        h.producer.run().unwrap(),
        ProducerOutcome::Buffered {
            new_rows: 12,
            train: 9,
            valid: 3
        }
    );
    assert!(!h.blobs.exists("data.csv").unwrap());
    let buffered = AccumulationBuffer::new(h.datasets.clone()).load().unwrap();
    assert_eq!((buffered.train.len(), buffered.valid.len()), (9, 3));

    for id in 12..17u32 {
        let serde_json::Value::Object(document) = json!({
            "_id": format!("doc-{id}"),
            "price": 300_000 + id * 1_000,
            "sqft_living": 1_000 + id * 10,
            "city": "Shoreline",
        }) else {
            unreachable!()
        };
        h.collection.insert(&document).unwrap();
    }
    assert_eq!(
        h.producer.run().unwrap(),
        ProducerOutcome::Published {
            version: 1,
            train: 13,
            valid: 4
        }
    );
    assert!(!h.datasets.exists(&AccumulationBuffer::train_key()).unwrap());
    assert!(!h.datasets.exists(&AccumulationBuffer::valid_key()).unwrap());
    assert!(h.datasets.exists(&part_key(1, TRAIN_FILE)).unwrap());
    assert!(h.datasets.exists(&part_key(1, VALID_FILE)).unwrap());

    let published = VersionPublisher::new(h.datasets.clone())
        .read_version(1)
        .unwrap();
    assert_eq!(published.train[..9], buffered.train[..]);
    assert_eq!(published.valid[..3], buffered.valid[..]);

    assert_eq!(
        h.producer.run().unwrap(),
        ProducerOutcome::NoNewData { train: 0, valid: 0 }
    );
}

#[test]
fn one_row_short_of_the_batch_does_not_publish() {
    let h = harness(8);
    // 9 rows at 0.8 give 7 train rows, one short of the batch.
    h.blobs.put("data.csv", &blob(0..9)).unwrap();
    assert!(matches!(
        h.producer.run().unwrap(),
        ProducerOutcome::Buffered { train: 7, .. }
    ));
    assert_eq!(VersionPublisher::new(h.datasets.clone()).latest_version().unwrap(), 0);

    h.blobs.put("data.csv", &blob(9..11)).unwrap();
    assert!(matches!(
        h.producer.run().unwrap(),
        ProducerOutcome::Published { version: 1, train: 8, .. }
    ));
}

#[test]
fn identical_inputs_produce_identical_versions() {
    let first = harness(5);
    let second = harness(5);
    first.blobs.put("data.csv", &blob(0..10)).unwrap();
    second.blobs.put("data.csv", &blob(0..10)).unwrap();
    first.producer.run().unwrap();
    second.producer.run().unwrap();
    assert_eq!(
        first.datasets.get(&part_key(1, TRAIN_FILE)).unwrap(),
        second.datasets.get(&part_key(1, TRAIN_FILE)).unwrap()
    );
}

#[test]
fn collection_drain_order_does_not_change_the_version() {
    let first = harness(5);
    let second = harness(5);
    let documents: Vec<_> = (0..10u32)
        .map(|id| {
            let serde_json::Value::Object(document) = json!({
                "price": 250_000 + id * 7_000,
                "sqft_living": 900 + id * 35,
                "city": if id % 2 == 0 { "Seattle" } else { "Renton" },
            }) else {
                unreachable!()
            };
            document
        })
        .collect();
    for document in &documents {
        first.collection.insert(document).unwrap();
    }
    for document in documents.iter().rev() {
        second.collection.insert(document).unwrap();
    }

    first.producer.run().unwrap();
    second.producer.run().unwrap();
    for part in [TRAIN_FILE, VALID_FILE] {
        assert_eq!(
            first.datasets.get(&part_key(1, part)).unwrap(),
            second.datasets.get(&part_key(1, part)).unwrap()
        );
    }
}

#[test]
fn publishing_after_a_partial_version_skips_its_number() {
    let h = harness(4);
    h.datasets.put(&part_key(1, VALID_FILE), b"").unwrap();
    h.blobs.put("data.csv", &blob(0..5)).unwrap();
    assert!(matches!(
        h.producer.run().unwrap(),
        ProducerOutcome::Published { version: 2, .. }
    ));
}

#[test]
fn malformed_buffer_aborts_before_sources_are_drained() {
    let h = harness(100);
    h.datasets
        .put(&AccumulationBuffer::train_key(), b"not,the,schema\n1,2,3\n")
        .unwrap();
    h.blobs.put("data.csv", &blob(0..3)).unwrap();
    assert!(matches!(
        h.producer.run().unwrap_err(),
        PipelineError::SchemaWidthMismatch { .. }
    ));
    assert!(h.blobs.exists("data.csv").unwrap());
}

#[test]
fn rows_without_target_are_kept_under_rejected() {
    let h = harness(100);
    let mut csv = String::from_utf8(blob(0..2)).unwrap();
    csv.push_str("2014-05-02 00:00:00,,2,1,900,5000,1,0,0,3,900,0,1960,0,1 Elm St,Seattle,WA 98103,USA\n");
    h.blobs.put("data.csv", csv.as_bytes()).unwrap();

    assert!(matches!(
        h.producer.run().unwrap_err(),
        PipelineError::MissingTarget { row: 2, .. }
    ));
    assert!(!h.blobs.exists("data.csv").unwrap());
    assert_eq!(h.datasets.list(REJECTED_PREFIX).unwrap().len(), 1);
    assert!(h.datasets.list("instream/").unwrap().is_empty());
}
