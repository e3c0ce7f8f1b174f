//! Local dataset loader that writes trainer-ready JSON Lines.
//!
//! Output layout under the prepared directory:
//!
//! ```text
//! <dataset_prepared_path>/<fingerprint>/
//!     train.jsonl
//!     eval.jsonl      (only when records were held out)
//!     metadata.json   (written last; its presence marks a complete dataset)
//! ```

use crate::cache::is_dataset_caching_enabled;
use crate::chat_templates::{resolve_template, ChatTemplateType};
use crate::convert::TabularToJsonlConverter;
use crate::dataset::{read_records, to_preference_samples, to_text_samples, DatasetFormat};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tessera_core::{
    DatasetDescriptor, DatasetLoader, PreparedDataset, PreprocessArgs, Result, RlType, RunConfig,
    TesseraError, DEFAULT_DATASET_PREPARED_PATH,
};

const METADATA_FILE: &str = "metadata.json";
const TRAIN_FILE: &str = "train.jsonl";
const EVAL_FILE: &str = "eval.jsonl";

/// Which loader entry point produced a prepared dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Supervised fine-tuning samples.
    Supervised,
    /// Preference samples.
    Preference,
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedMetadata {
    /// Fingerprint the directory is named after.
    pub fingerprint: String,
    /// Loader entry point.
    pub kind: DatasetKind,
    /// Preference style, for preference datasets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rl: Option<RlType>,
    /// Source files in load order.
    pub sources: Vec<String>,
    /// Chat template used to format conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_template: Option<String>,
    /// Number of training records.
    pub num_train: usize,
    /// Number of evaluation records.
    pub num_eval: usize,
}

/// Loads datasets from local files.
#[derive(Debug, Clone, Default)]
pub struct LocalDatasetLoader {
    base_dir: Option<PathBuf>,
}

impl LocalDatasetLoader {
    /// Create a loader that resolves relative paths against the working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative dataset paths against `dir`.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn materialize<T, F>(
        &self,
        config: &RunConfig,
        kind: DatasetKind,
        args: &PreprocessArgs,
        shape: F,
    ) -> Result<PreparedDataset>
    where
        T: Serialize,
        F: Fn(Vec<serde_json::Value>, &DatasetDescriptor) -> Result<Vec<T>>,
    {
        let prepared_root = config
            .prepared_path()
            .unwrap_or_else(|| Path::new(DEFAULT_DATASET_PREPARED_PATH));
        let fingerprint = fingerprint(config, kind)?;
        let dir = prepared_root.join(&fingerprint);

        if is_dataset_caching_enabled() {
            if let Some(metadata) = read_metadata(&dir)? {
                tracing::info!(
                    fingerprint = %fingerprint,
                    "Reusing prepared dataset at {}",
                    dir.display()
                );
                return Ok(PreparedDataset {
                    dir,
                    fingerprint,
                    num_train: metadata.num_train,
                    num_eval: metadata.num_eval,
                    reused_cache: true,
                });
            }
        }

        let converter = TabularToJsonlConverter::for_config(config);
        let mut samples = Vec::new();
        for descriptor in &config.datasets {
            let path = self.resolve_source(&descriptor.path);
            let records = read_records(&path, &converter)?;
            let shaped = shape(records, descriptor)?;
            if config.is_preprocess {
                tracing::info!(records = shaped.len(), "Loaded {}", path.display());
            } else {
                tracing::debug!(records = shaped.len(), "Loaded {}", path.display());
            }
            samples.extend(shaped);
        }

        if samples.is_empty() {
            return Err(TesseraError::DatasetMaterialization(
                "configured datasets contain no records".into(),
            ));
        }

        let (train, eval) = split_eval(samples, config.val_set_size, config.seed);
        tracing::debug!(
            download = args.download,
            train = train.len(),
            eval = eval.len(),
            "Writing prepared dataset"
        );

        fs::create_dir_all(&dir).map_err(|e| {
            TesseraError::DatasetMaterialization(format!(
                "cannot create {}: {}",
                dir.display(),
                e
            ))
        })?;
        // A stale marker must not survive a rebuild that fails halfway.
        remove_if_exists(&dir.join(METADATA_FILE))?;
        write_jsonl(&dir.join(TRAIN_FILE), &train)?;
        if eval.is_empty() {
            remove_if_exists(&dir.join(EVAL_FILE))?;
        } else {
            write_jsonl(&dir.join(EVAL_FILE), &eval)?;
        }

        let metadata = PreparedMetadata {
            fingerprint: fingerprint.clone(),
            kind,
            rl: config.rl.filter(|_| kind == DatasetKind::Preference),
            sources: config.datasets.iter().map(|d| d.path.clone()).collect(),
            chat_template: config.chat_template.clone(),
            num_train: train.len(),
            num_eval: eval.len(),
        };
        write_atomic(&dir.join(METADATA_FILE), |w| {
            serde_json::to_writer_pretty(&mut *w, &metadata)?;
            w.write_all(b"\n")?;
            Ok(())
        })?;

        tracing::info!(
            train = metadata.num_train,
            eval = metadata.num_eval,
            "Prepared dataset at {}",
            dir.display()
        );
        Ok(PreparedDataset {
            dir,
            fingerprint,
            num_train: metadata.num_train,
            num_eval: metadata.num_eval,
            reused_cache: false,
        })
    }
}

impl DatasetLoader for LocalDatasetLoader {
    fn load_datasets(&self, config: &RunConfig, args: &PreprocessArgs) -> Result<PreparedDataset> {
        let template = config
            .chat_template
            .as_deref()
            .and_then(ChatTemplateType::from_name)
            .map(resolve_template);

        self.materialize(config, DatasetKind::Supervised, args, |records, descriptor| {
            let format = match descriptor.format.as_deref() {
                Some(hint) => DatasetFormat::from_hint(hint)?,
                None => DatasetFormat::Auto,
            };
            to_text_samples(records, format, template.as_ref()).map_err(|e| match e {
                TesseraError::DatasetMaterialization(msg) => TesseraError::DatasetMaterialization(
                    format!("{}: {}", descriptor.path, msg),
                ),
                other => other,
            })
        })
    }

    fn load_rl_datasets(
        &self,
        config: &RunConfig,
        args: &PreprocessArgs,
    ) -> Result<PreparedDataset> {
        let rl = config.rl.ok_or_else(|| {
            TesseraError::DatasetMaterialization(
                "preference datasets requested but `rl` is not set".into(),
            )
        })?;

        self.materialize(config, DatasetKind::Preference, args, |records, descriptor| {
            to_preference_samples(records, rl).map_err(|e| match e {
                TesseraError::DatasetMaterialization(msg) => TesseraError::DatasetMaterialization(
                    format!("{}: {}", descriptor.path, msg),
                ),
                other => other,
            })
        })
    }

    fn resolve_source(&self, path: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) if Path::new(path).is_relative() => base.join(path),
            _ => PathBuf::from(path),
        }
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    kind: DatasetKind,
    datasets: &'a [DatasetDescriptor],
    chat_template: Option<&'a str>,
    default_system_message: Option<&'a str>,
    rl: Option<RlType>,
    val_set_size: f64,
    seed: u64,
    pad_ragged_rows: bool,
}

/// SHA-256 (hex) of the configuration fields that shape the prepared dataset.
pub fn fingerprint(config: &RunConfig, kind: DatasetKind) -> Result<String> {
    let input = FingerprintInput {
        kind,
        datasets: &config.datasets,
        chat_template: config.chat_template.as_deref(),
        default_system_message: config.default_system_message.as_deref(),
        rl: config.rl,
        val_set_size: config.val_set_size,
        seed: config.seed,
        pad_ragged_rows: config.pad_ragged_rows,
    };
    let bytes = serde_json::to_vec(&input)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Shuffle with `seed` and hold out `ratio` of the samples.
///
/// Order is preserved when nothing is held out, and at least one training
/// sample always remains.
fn split_eval<T>(mut samples: Vec<T>, ratio: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    if ratio <= 0.0 {
        return (samples, Vec::new());
    }
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);
    let eval_size = ((samples.len() as f64 * ratio).round() as usize).min(samples.len() - 1);
    let eval = samples.split_off(samples.len() - eval_size);
    (samples, eval)
}

fn read_metadata(dir: &Path) -> Result<Option<PreparedMetadata>> {
    let path = dir.join(METADATA_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    match serde_json::from_str(&content) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) => {
            tracing::warn!("Ignoring unreadable {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn write_jsonl<T: Serialize>(path: &Path, samples: &[T]) -> Result<()> {
    write_atomic(path, |w| {
        for sample in samples {
            serde_json::to_writer(&mut *w, sample)?;
            w.write_all(b"\n")?;
        }
        Ok(())
    })
}

fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<tempfile::NamedTempFile>) -> Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut writer = BufWriter::new(tempfile::NamedTempFile::new_in(dir)?);
    write(&mut writer)?;
    let tmp = writer.into_inner().map_err(|e| e.into_error())?;
    tmp.persist(path).map_err(|e| {
        TesseraError::DatasetMaterialization(format!(
            "cannot write {}: {}",
            path.display(),
            e.error
        ))
    })?;
    Ok(())
}
