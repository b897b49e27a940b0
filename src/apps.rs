use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, error::ErrorKind};

use crate::config::PipelineConfig;
use crate::consumer::{ConsumerOutcome, IncrementalConsumer};
use crate::model::ModelKind;
use crate::producer::{Producer, ProducerOutcome};
use crate::registry::StoreArtifactLog;
use crate::source::{JsonDirCollection, SourceCollector};
use crate::store::{FileObjectStore, ObjectStore};
use crate::watermark::StoreWatermarkStore;

#[derive(Debug, Parser)]
#[command(
    name = "featurestream-produce",
    disable_help_subcommand = true,
    about = "Collect new records and publish dataset versions",
    long_about = "Drain the CSV blob and document collection, transform and split the rows, merge them into the instream buffer, and publish a new version once the buffered train partition reaches the batch size.",
    after_help = "Every flag falls back to its environment variable (BATCH_SIZE, TRAIN_TEST_SPLIT, SPLIT_SEED, DATASET_STORE, SOURCE_STORE, SOURCE_BLOB, COLLECTION_DIR), then to the built-in default."
)]
struct ProduceCli {
    #[arg(long, help = "Train rows required before a version is published")]
    batch_size: Option<usize>,
    #[arg(long, help = "Fraction of new rows assigned to train, in (0, 1]")]
    train_fraction: Option<f64>,
    #[arg(long, help = "Deterministic seed used for the train/valid shuffle")]
    split_seed: Option<u64>,
    #[arg(long, value_name = "DIR", help = "Dataset store directory")]
    dataset_store: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "Directory holding the incoming CSV blob")]
    source_store: Option<PathBuf>,
    #[arg(long, value_name = "KEY", help = "Key of the CSV blob inside the source store")]
    source_blob: Option<String>,
    #[arg(long, value_name = "DIR", help = "Directory of JSON documents to drain")]
    collection_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(
    name = "featurestream-consume",
    disable_help_subcommand = true,
    about = "Train on dataset versions above the watermark",
    long_about = "Load every published version above the experiment's watermark, fit a model warm-started from the latest logged run, log the artifact, and advance the watermark.",
    after_help = "Every flag falls back to its environment variable (DATASET_STORE, EXPERIMENT, MODEL_KIND), then to the built-in default."
)]
struct ConsumeCli {
    #[arg(long, value_name = "DIR", help = "Dataset store directory")]
    dataset_store: Option<PathBuf>,
    #[arg(long, help = "Experiment whose watermark and runs are used")]
    experiment: Option<String>,
    #[arg(
        long,
        value_name = "KIND",
        value_parser = parse_model_kind_arg,
        help = "Model to fit: linear_regression or ridge:<alpha>"
    )]
    model_kind: Option<ModelKind>,
}

/// Run one producer pass with CLI args layered over the environment.
pub fn run_producer<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();

    let Some(cli) = parse_cli::<ProduceCli, _>(
        std::iter::once("featurestream-produce".to_string()).chain(args_iter),
    )?
    else {
        return Ok(());
    };

    let mut config = PipelineConfig::from_env()?;
    config.batch_size = cli.batch_size.unwrap_or(config.batch_size);
    config.train_fraction = cli.train_fraction.unwrap_or(config.train_fraction);
    config.split_seed = cli.split_seed.unwrap_or(config.split_seed);
    if let Some(dir) = cli.dataset_store {
        config.dataset_store = dir;
    }
    if let Some(dir) = cli.source_store {
        config.source_store = dir;
    }
    if let Some(key) = cli.source_blob {
        config.source_blob = key;
    }
    if let Some(dir) = cli.collection_dir {
        config.collection_dir = dir;
    }
    let config = config.validated()?;

    let datasets: Arc<dyn ObjectStore> = Arc::new(FileObjectStore::open(&config.dataset_store)?);
    let blobs: Arc<dyn ObjectStore> = Arc::new(FileObjectStore::open(&config.source_store)?);
    let collection = Arc::new(JsonDirCollection::open(&config.collection_dir)?);
    let collector =
        SourceCollector::blob_and_collection(blobs, config.source_blob.clone(), collection);

    let producer = Producer::new(config, datasets, collector);
    match producer.run()? {
        ProducerOutcome::NoNewData { train, valid } => {
            println!("no new data (buffer: train={train}, valid={valid})");
        }
        ProducerOutcome::Buffered {
            new_rows,
            train,
            valid,
        } => {
            println!(
                "buffered {new_rows} new rows (buffer: train={train}, valid={valid}, batch size={})",
                producer.config().batch_size
            );
        }
        ProducerOutcome::Published {
            version,
            train,
            valid,
        } => {
            println!("published v{version} (train={train}, valid={valid})");
        }
    }
    Ok(())
}

/// Run one consumer pass with CLI args layered over the environment.
pub fn run_consumer<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    init_tracing();

    let Some(cli) = parse_cli::<ConsumeCli, _>(
        std::iter::once("featurestream-consume".to_string()).chain(args_iter),
    )?
    else {
        return Ok(());
    };

    let mut config = PipelineConfig::from_env()?;
    if let Some(dir) = cli.dataset_store {
        config.dataset_store = dir;
    }
    if let Some(experiment) = cli.experiment {
        config.experiment = experiment;
    }
    config.model_kind = cli.model_kind.unwrap_or(config.model_kind);
    let config = config.validated()?;

    let datasets: Arc<dyn ObjectStore> = Arc::new(FileObjectStore::open(&config.dataset_store)?);
    let consumer = IncrementalConsumer::new(
        config.experiment.clone(),
        datasets.clone(),
        Arc::new(StoreWatermarkStore::new(datasets.clone())),
        Arc::new(StoreArtifactLog::new(datasets)),
        Arc::new(config.model_kind),
    );

    match consumer.run()? {
        ConsumerOutcome::UpToDate { watermark, latest } => {
            println!(
                "[{}] up to date (watermark={watermark}, latest=v{latest})",
                consumer.experiment()
            );
        }
        ConsumerOutcome::Trained(report) => {
            println!("[{}] run {}", consumer.experiment(), report.run_id);
            println!("  watermark: {} -> {}", report.previous, report.committed);
            println!(
                "  rows: train={}, valid={}",
                report.train_rows, report.valid_rows
            );
            if !report.skipped_versions.is_empty() {
                println!("  skipped versions: {:?}", report.skipped_versions);
            }
            if !report.deferred_versions.is_empty() {
                println!("  deferred versions: {:?}", report.deferred_versions);
            }
            println!(
                "  valid: rmse={:.4}, mae={:.4}, r2={:.4}, accuracy={:.4}",
                report.metrics.valid.rmse,
                report.metrics.valid.mae,
                report.metrics.valid.r2,
                report.metrics.accuracy
            );
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

fn parse_model_kind_arg(raw: &str) -> Result<ModelKind, String> {
    raw.parse::<ModelKind>().map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produce_flags_parse() {
        let cli = parse_cli::<ProduceCli, _>([
            "featurestream-produce",
            "--batch-size",
            "10",
            "--train-fraction",
            "0.5",
            "--dataset-store",
            "/tmp/ds",
        ])
        .unwrap()
        .unwrap();
        assert_eq!(cli.batch_size, Some(10));
        assert_eq!(cli.train_fraction, Some(0.5));
        assert_eq!(cli.dataset_store, Some(PathBuf::from("/tmp/ds")));
        assert_eq!(cli.source_blob, None);
    }

    #[test]
    fn consume_flags_parse_model_kind() {
        let cli = parse_cli::<ConsumeCli, _>([
            "featurestream-consume",
            "--experiment",
            "ridge_prices",
            "--model-kind",
            "ridge:0.5",
        ])
        .unwrap()
        .unwrap();
        assert_eq!(cli.experiment.as_deref(), Some("ridge_prices"));
        assert_eq!(cli.model_kind, Some(ModelKind::Ridge { alpha: 0.5 }));

        assert!(
            parse_cli::<ConsumeCli, _>(["featurestream-consume", "--model-kind", "forest"])
                .is_err()
        );
    }

    #[test]
    fn help_is_not_an_error() {
        assert!(
            parse_cli::<ProduceCli, _>(["featurestream-produce", "--help"])
                .unwrap()
                .is_none()
        );
    }
}
