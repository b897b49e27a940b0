/// Path-like key addressing an object in a store.
/// Examples: `instream/train.csv`, `versioned/v3/valid.csv`
pub type ObjectKey = String;
/// Identifier for the source that produced raw records.
/// Examples: `blob`, `collection`
pub type SourceId = String;
/// Name of a raw record field or CSV column.
/// Examples: `sqft_living`, `city_hash_4`, `price`
pub type ColumnName = String;
/// Experiment whose model consumes published versions.
/// Example: `linear_regression`
pub type ExperimentName = String;
/// Published dataset version number (`0` means "none").
/// Example: `3` for `versioned/v3/`
pub type VersionNumber = u64;
/// Identifier assigned to a logged training run.
/// Example: `train_v1_to_v3-20250101T120000.000000Z-9f86d081`
pub type RunId = String;
/// Single processed feature value.
pub type FeatureValue = f64;
