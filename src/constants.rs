/// Constants describing the fixed feature schema shared by producer and consumer.
pub mod features {
    /// Numeric attributes, in output order.
    pub const NUMERIC_COLUMNS: [&str; 12] = [
        "bedrooms",
        "bathrooms",
        "sqft_living",
        "sqft_lot",
        "floors",
        "waterfront",
        "view",
        "condition",
        "sqft_above",
        "sqft_basement",
        "yr_built",
        "yr_renovated",
    ];
    /// Categorical attributes, in output order.
    pub const CATEGORICAL_COLUMNS: [&str; 4] = ["street", "city", "statezip", "country"];
    /// Hash slots emitted per categorical attribute.
    pub const HASH_SLOTS: usize = 10;
    /// Target column, always the last value of a processed row.
    pub const TARGET_COLUMN: &str = "price";
    /// Number of feature columns (everything but the target).
    pub const FEATURE_COUNT: usize = NUMERIC_COLUMNS.len() + CATEGORICAL_COLUMNS.len() * HASH_SLOTS;
    /// Total processed row width (features plus target).
    pub const ROW_WIDTH: usize = FEATURE_COUNT + 1;
    /// Substitute for absent categorical values.
    pub const UNKNOWN_CATEGORY: &str = "unknown";
    /// Infix used for hashed column names (`city_hash_3`).
    pub const HASH_COLUMN_INFIX: &str = "_hash_";
    /// Seed used by the categorical MurmurHash3.
    pub const HASH_SEED: u32 = 0;
}

/// Constants describing the durable dataset store layout.
pub mod store {
    /// Namespace holding the accumulation buffer.
    pub const INSTREAM_PREFIX: &str = "instream/";
    /// Namespace holding published versions.
    pub const VERSIONED_PREFIX: &str = "versioned/";
    /// Train part file name.
    pub const TRAIN_FILE: &str = "train.csv";
    /// Validation part file name.
    pub const VALID_FILE: &str = "valid.csv";
    /// Prefix preceding a version number in keys and tags.
    pub const VERSION_TAG_PREFIX: char = 'v';
    /// Namespace holding drained batches that failed to transform.
    pub const REJECTED_PREFIX: &str = "rejected/";
    /// Separator used in object keys.
    pub const KEY_SEPARATOR: char = '/';
}

/// Constants describing experiment tracking records.
pub mod experiments {
    /// Namespace holding per-experiment watermarks and runs.
    pub const EXPERIMENTS_PREFIX: &str = "experiments/";
    /// Watermark key name under an experiment.
    pub const WATERMARK_KEY: &str = "trained_till_version";
    /// Run namespace under an experiment.
    pub const RUNS_DIR: &str = "runs";
    /// Artifact file name under a run.
    pub const ARTIFACT_FILE: &str = "model.json";
    /// Version tag for persisted artifact payloads.
    pub const ARTIFACT_RECORD_VERSION: u8 = 1;
}

/// Constants used by the source collector.
pub mod sources {
    /// Source id reported for the blob-backed CSV source.
    pub const BLOB_SOURCE_ID: &str = "blob";
    /// Source id reported for the document collection source.
    pub const COLLECTION_SOURCE_ID: &str = "collection";
    /// Blob column dropped before transformation.
    pub const DROPPED_BLOB_COLUMN: &str = "date";
    /// Document field dropped before transformation.
    pub const DOCUMENT_ID_FIELD: &str = "_id";
    /// File extension of documents in a directory-backed collection.
    pub const DOCUMENT_EXTENSION: &str = "json";
}

/// Defaults and environment keys for pipeline configuration.
pub mod config {
    /// Default train-row threshold that triggers a publish.
    pub const DEFAULT_BATCH_SIZE: usize = 1000;
    /// Default fraction of new rows assigned to train.
    pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;
    /// Default shuffle seed for the train/valid split.
    pub const DEFAULT_SPLIT_SEED: u64 = 42;
    /// Default directory for the dataset store.
    pub const DEFAULT_DATASET_STORE: &str = ".featurestream/datasets";
    /// Default directory for the incoming blob store.
    pub const DEFAULT_SOURCE_STORE: &str = ".featurestream/incoming";
    /// Default blob key drained from the source store.
    pub const DEFAULT_SOURCE_BLOB: &str = "data.csv";
    /// Default directory for the document collection.
    pub const DEFAULT_COLLECTION_DIR: &str = ".featurestream/collection";
    /// Default experiment name.
    pub const DEFAULT_EXPERIMENT: &str = "linear_regression";

    /// Env key for the batch size.
    pub const ENV_BATCH_SIZE: &str = "BATCH_SIZE";
    /// Env key for the train fraction.
    pub const ENV_TRAIN_FRACTION: &str = "TRAIN_TEST_SPLIT";
    /// Env key for the split seed.
    pub const ENV_SPLIT_SEED: &str = "SPLIT_SEED";
    /// Env key for the dataset store directory.
    pub const ENV_DATASET_STORE: &str = "DATASET_STORE";
    /// Env key for the source store directory.
    pub const ENV_SOURCE_STORE: &str = "SOURCE_STORE";
    /// Env key for the source blob key.
    pub const ENV_SOURCE_BLOB: &str = "SOURCE_BLOB";
    /// Env key for the collection directory.
    pub const ENV_COLLECTION_DIR: &str = "COLLECTION_DIR";
    /// Env key for the experiment name.
    pub const ENV_EXPERIMENT: &str = "EXPERIMENT";
    /// Env key for the model kind.
    pub const ENV_MODEL_KIND: &str = "MODEL_KIND";
}

/// Constants used by the splitmix-based shuffle.
pub mod split {
    /// Golden-ratio increment of splitmix64.
    pub const SPLITMIX_INCREMENT: u64 = 0x9E37_79B9_7F4A_7C15;
}
