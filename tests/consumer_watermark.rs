use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::tempdir;

use featurestream::constants::features::{FEATURE_COUNT, ROW_WIDTH};
use featurestream::constants::store::{TRAIN_FILE, VALID_FILE};
use featurestream::publisher::part_key;
use featurestream::{
    ArtifactLog, ConsumerOutcome, DatasetPair, FeatureMatrix, FileObjectStore, IncrementalConsumer,
    LinearModel, MemoryObjectStore, ModelArtifact, ModelKind, ObjectStore, PipelineError,
    ProcessedRecord, StoreArtifactLog, StoreWatermarkStore, Trainer, VersionPublisher, Watermark,
    WatermarkStore,
};

fn row(x: f64) -> ProcessedRecord {
    let mut values = vec![0.0; ROW_WIDTH];
    values[2] = x;
    values[FEATURE_COUNT] = 150.0 * x + 20_000.0;
    ProcessedRecord::from_values(values).unwrap()
}

fn pair(offset: f64) -> DatasetPair {
    DatasetPair::new(
        (0..8).map(|i| row(offset + i as f64)).collect(),
        (8..10).map(|i| row(offset + i as f64)).collect(),
    )
}

fn publish_versions(store: Arc<dyn ObjectStore>, count: usize) {
    let publisher = VersionPublisher::new(store);
    for i in 0..count {
        publisher.publish(&pair(100.0 * i as f64)).unwrap();
    }
}

/// Linear regression that counts how often it is asked to fit.
#[derive(Default)]
struct CountingTrainer {
    fits: AtomicUsize,
    warm_starts: AtomicUsize,
}

impl Trainer for CountingTrainer {
    fn kind(&self) -> ModelKind {
        ModelKind::LinearRegression
    }

    fn fit(
        &self,
        warm_start: Option<&LinearModel>,
        data: &FeatureMatrix,
    ) -> Result<LinearModel, PipelineError> {
        self.fits.fetch_add(1, Ordering::SeqCst);
        if warm_start.is_some() {
            self.warm_starts.fetch_add(1, Ordering::SeqCst);
        }
        ModelKind::LinearRegression.fit(warm_start, data)
    }
}

struct FailingArtifactLog;

impl ArtifactLog for FailingArtifactLog {
    fn log(&self, _artifact: &ModelArtifact) -> Result<(), PipelineError> {
        Err(PipelineError::ArtifactLog("tracking server unreachable".into()))
    }

    fn runs(&self, _experiment: &str) -> Result<Vec<ModelArtifact>, PipelineError> {
        Ok(Vec::new())
    }
}

struct FailingWatermarkStore;

impl WatermarkStore for FailingWatermarkStore {
    fn read(&self, _experiment: &str) -> Result<Watermark, PipelineError> {
        Ok(Watermark(0))
    }

    fn advance(&self, _experiment: &str, _watermark: Watermark) -> Result<(), PipelineError> {
        Err(PipelineError::Store("disk full".into()))
    }
}

#[test]
fn consumes_all_versions_once_then_noops() {
    let dir = tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FileObjectStore::open(dir.path()).unwrap());
    publish_versions(store.clone(), 3);

    let watermarks = Arc::new(StoreWatermarkStore::new(store.clone()));
    let artifacts = Arc::new(StoreArtifactLog::new(store.clone()));
    let trainer = Arc::new(CountingTrainer::default());
    let consumer = IncrementalConsumer::new(
        "linear_regression",
        store.clone(),
        watermarks.clone(),
        artifacts.clone(),
        trainer.clone(),
    );

    let ConsumerOutcome::Trained(report) = consumer.run().unwrap() else {
        panic!("expected a training run");
    };
    assert_eq!(report.previous, Watermark(0));
    assert_eq!(report.committed, Watermark(3));
    assert_eq!(report.loaded_versions, vec![1, 2, 3]);
    assert_eq!((report.train_rows, report.valid_rows), (24, 6));
    assert!(report.run_id.starts_with("train_v1_to_v3-"));
    assert!(report.metrics.valid.r2 > 0.999);
    assert_eq!(watermarks.read("linear_regression").unwrap(), Watermark(3));
    assert_eq!(
        store
            .get("experiments/linear_regression/trained_till_version")
            .unwrap()
            .unwrap(),
        b"v3"
    );

    let logged = artifacts.latest("linear_regression").unwrap().unwrap();
    assert_eq!(logged.trained_till_version, "v3");
    assert_eq!(logged.params.trained_from_version, 1);
    assert_eq!(logged.params.n_train_samples, 24);

    assert_eq!(
        consumer.run().unwrap(),
        ConsumerOutcome::UpToDate {
            watermark: Watermark(3),
            latest: 3
        }
    );
    assert_eq!(trainer.fits.load(Ordering::SeqCst), 1);
}

#[test]
fn later_runs_only_read_new_versions_and_warm_start() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    publish_versions(store.clone(), 2);
    let trainer = Arc::new(CountingTrainer::default());
    let artifacts = Arc::new(StoreArtifactLog::new(store.clone()));
    let consumer = IncrementalConsumer::new(
        "exp",
        store.clone(),
        Arc::new(StoreWatermarkStore::new(store.clone())),
        artifacts.clone(),
        trainer.clone(),
    );
    consumer.run().unwrap();

    VersionPublisher::new(store.clone())
        .publish(&pair(1_000.0))
        .unwrap();
    let ConsumerOutcome::Trained(report) = consumer.run().unwrap() else {
        panic!("expected a training run");
    };
    assert_eq!(report.loaded_versions, vec![3]);
    assert_eq!(report.committed, Watermark(3));
    assert_eq!(trainer.fits.load(Ordering::SeqCst), 2);
    assert_eq!(trainer.warm_starts.load(Ordering::SeqCst), 1);

    let latest = artifacts.latest("exp").unwrap().unwrap();
    assert_eq!(latest.run_name, "train_v3_to_v3");
    assert!(latest.params.previous_run_id.unwrap().starts_with("train_v1_to_v2-"));
}

#[test]
fn artifact_failure_leaves_watermark_untouched() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    publish_versions(store.clone(), 2);
    let watermarks = Arc::new(StoreWatermarkStore::new(store.clone()));
    let consumer = IncrementalConsumer::new(
        "exp",
        store.clone(),
        watermarks.clone(),
        Arc::new(FailingArtifactLog),
        Arc::new(ModelKind::LinearRegression),
    );
    assert!(matches!(
        consumer.run().unwrap_err(),
        PipelineError::ArtifactLog(_)
    ));
    assert_eq!(watermarks.read("exp").unwrap(), Watermark(0));
    assert_eq!(consumer.pending_range().unwrap(), Some(1..=2));
}

#[test]
fn watermark_failure_after_logging_is_reported_and_retried() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    publish_versions(store.clone(), 1);
    let artifacts = Arc::new(StoreArtifactLog::new(store.clone()));
    let consumer = IncrementalConsumer::new(
        "exp",
        store.clone(),
        Arc::new(FailingWatermarkStore),
        artifacts.clone(),
        Arc::new(ModelKind::LinearRegression),
    );
    let err = consumer.run().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::WatermarkAdvance { ref experiment, .. } if experiment == "exp"
    ));
    assert_eq!(artifacts.runs("exp").unwrap().len(), 1);

    // At-least-once: the same range is trained again on retry.
    assert!(consumer.run().is_err());
    assert_eq!(artifacts.runs("exp").unwrap().len(), 2);
}

#[test]
fn width_mismatch_aborts_the_run() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    publish_versions(store.clone(), 1);
    store.put(&part_key(2, VALID_FILE), b"a,b\n1,2\n").unwrap();
    store.put(&part_key(2, TRAIN_FILE), b"a,b\n1,2\n").unwrap();
    let trainer = Arc::new(CountingTrainer::default());
    let watermarks = Arc::new(StoreWatermarkStore::new(store.clone()));
    let consumer = IncrementalConsumer::new(
        "exp",
        store.clone(),
        watermarks.clone(),
        Arc::new(StoreArtifactLog::new(store.clone())),
        trainer.clone(),
    );
    assert!(matches!(
        consumer.run().unwrap_err(),
        PipelineError::SchemaWidthMismatch { expected: 53, found: 2, .. }
    ));
    assert_eq!(trainer.fits.load(Ordering::SeqCst), 0);
    assert_eq!(watermarks.read("exp").unwrap(), Watermark(0));
}

#[test]
fn trailing_partial_version_is_not_committed() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    publish_versions(store.clone(), 2);
    // A publish in progress: valid part written, train part not yet.
    store.put(&part_key(3, VALID_FILE), b"").unwrap();
    let watermarks = Arc::new(StoreWatermarkStore::new(store.clone()));
    let consumer = IncrementalConsumer::new(
        "exp",
        store.clone(),
        watermarks.clone(),
        Arc::new(StoreArtifactLog::new(store.clone())),
        Arc::new(ModelKind::Ridge { alpha: 0.1 }),
    );
    let ConsumerOutcome::Trained(report) = consumer.run().unwrap() else {
        panic!("expected a training run");
    };
    assert_eq!(report.committed, Watermark(2));
    assert_eq!(report.deferred_versions, vec![3]);

    // The publish completes; the next run picks v3 up.
    store
        .put(
            &part_key(3, TRAIN_FILE),
            &featurestream::codec::encode_rows(&pair(500.0).train).unwrap(),
        )
        .unwrap();
    store
        .put(
            &part_key(3, VALID_FILE),
            &featurestream::codec::encode_rows(&pair(500.0).valid).unwrap(),
        )
        .unwrap();
    let ConsumerOutcome::Trained(report) = consumer.run().unwrap() else {
        panic!("expected a training run");
    };
    assert_eq!(report.loaded_versions, vec![3]);
    assert_eq!(watermarks.read("exp").unwrap(), Watermark(3));
}

#[test]
fn independent_experiments_keep_separate_watermarks() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    publish_versions(store.clone(), 2);
    let watermarks = Arc::new(StoreWatermarkStore::new(store.clone()));
    for experiment in ["linear_regression", "ridge"] {
        let consumer = IncrementalConsumer::new(
            experiment,
            store.clone(),
            watermarks.clone(),
            Arc::new(StoreArtifactLog::new(store.clone())),
            Arc::new(ModelKind::LinearRegression),
        );
        assert!(matches!(
            consumer.run().unwrap(),
            ConsumerOutcome::Trained(_)
        ));
    }
    assert_eq!(watermarks.read("linear_regression").unwrap(), Watermark(2));
    assert_eq!(watermarks.read("ridge").unwrap(), Watermark(2));
}
