//! Run configuration for Tessera.

use crate::{Result, SecretString, TesseraError};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prepared-dataset location used when a config does not set `dataset_prepared_path`.
pub const DEFAULT_DATASET_PREPARED_PATH: &str = "last_run_prepared";

/// File extensions treated as delimited tabular text (compared case-insensitively).
pub const TABULAR_EXTENSIONS: &[&str] = &["csv", "tsv"];

/// Reinforcement-learning style used to load preference datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RlType {
    /// Direct preference optimization.
    Dpo,
    /// Identity preference optimization.
    Ipo,
    /// Odds-ratio preference optimization.
    Orpo,
    /// Simple preference optimization.
    Simpo,
    /// Kahneman-Tversky optimization (unpaired, labelled completions).
    Kto,
}

impl RlType {
    /// Whether records carry a `chosen`/`rejected` pair.
    pub fn is_pairwise(&self) -> bool {
        !matches!(self, Self::Kto)
    }
}

/// One entry of the `datasets` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Local path to the dataset file.
    pub path: String,

    /// Format hint (`completion`, `alpaca`, `sharegpt`, `chat_template`, `input_output`).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Split name, informational for local files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,
}

impl DatasetDescriptor {
    /// Create a descriptor for a path with no format hint.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: None,
            split: None,
        }
    }

    /// Whether the path ends in a tabular extension.
    pub fn is_tabular(&self) -> bool {
        is_tabular_path(Path::new(&self.path))
    }
}

/// Whether a path ends in one of [`TABULAR_EXTENSIONS`].
pub fn is_tabular_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| TABULAR_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)))
        .unwrap_or(false)
}

/// Fully resolved configuration for one preprocessing run.
///
/// Owned by the coordinator for the duration of the run and mutated in place as
/// defaults are filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Base model identifier (HuggingFace repo ID or local path).
    #[serde(default)]
    pub base_model: String,

    /// Chat template name. Only `chatml` and `llama3` are registered.
    #[serde(default)]
    pub chat_template: Option<String>,

    /// Default system message for the chat template.
    #[serde(default)]
    pub default_system_message: Option<String>,

    /// Directory that receives the prepared dataset.
    #[serde(default)]
    pub dataset_prepared_path: Option<PathBuf>,

    /// Datasets to prepare, in order.
    #[serde(default)]
    pub datasets: Vec<DatasetDescriptor>,

    /// Set by the preprocess command; changes loader behavior.
    #[serde(default)]
    pub is_preprocess: bool,

    /// Preference-dataset style. `None` selects standard loading.
    #[serde(default)]
    pub rl: Option<RlType>,

    /// Active dataset file once a tabular source has been converted.
    #[serde(default)]
    pub dataset_file: Option<PathBuf>,

    /// Pad short tabular rows and truncate long ones instead of rejecting them.
    #[serde(default)]
    pub pad_ragged_rows: bool,

    /// Fraction of records held out for evaluation.
    #[serde(default)]
    pub val_set_size: f64,

    /// Seed for the evaluation split shuffle.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// HuggingFace token for gated models.
    #[serde(default, skip_serializing)]
    pub hf_token: Option<SecretString>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_model: String::new(),
            chat_template: None,
            default_system_message: None,
            dataset_prepared_path: None,
            datasets: Vec::new(),
            is_preprocess: false,
            rl: None,
            dataset_file: None,
            pad_ragged_rows: false,
            val_set_size: 0.0,
            seed: default_seed(),
            hf_token: None,
        }
    }
}

impl RunConfig {
    /// Load a config from a YAML file, apply overrides, and validate it.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P, overrides: &[ConfigOverride]) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content, overrides)
    }

    /// Parse a config from YAML text, apply overrides, and validate it.
    pub fn from_yaml_str(yaml: &str, overrides: &[ConfigOverride]) -> Result<Self> {
        let mut root: Value = serde_yaml::from_str(yaml)
            .map_err(|e| TesseraError::Config(format!("invalid YAML: {}", e)))?;

        if root.is_null() {
            root = Value::Mapping(Mapping::new());
        }
        let mapping = root.as_mapping_mut().ok_or_else(|| {
            TesseraError::Config("config root must be a mapping of keys to values".into())
        })?;
        for o in overrides {
            mapping.insert(Value::String(o.key.clone()), o.value.clone());
        }

        let config: Self = serde_yaml::from_value(root)
            .map_err(|e| TesseraError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.base_model.trim().is_empty() {
            return Err(TesseraError::Config("`base_model` must be set".into()));
        }
        if self.datasets.is_empty() {
            return Err(TesseraError::Config(
                "at least one entry is required under `datasets`".into(),
            ));
        }
        if let Some(i) = self.datasets.iter().position(|d| d.path.trim().is_empty()) {
            return Err(TesseraError::Config(format!("`datasets[{}].path` is empty", i)));
        }
        if !(0.0..1.0).contains(&self.val_set_size) {
            return Err(TesseraError::Config(format!(
                "`val_set_size` must be in [0, 1), got {}",
                self.val_set_size
            )));
        }
        Ok(())
    }

    /// The prepared-dataset directory, if set and non-empty.
    pub fn prepared_path(&self) -> Option<&Path> {
        self.dataset_prepared_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// The file downstream consumers should read: the converted artifact if any,
    /// otherwise the first configured dataset.
    pub fn active_dataset_file(&self) -> Option<PathBuf> {
        self.dataset_file
            .clone()
            .or_else(|| self.datasets.first().map(|d| PathBuf::from(&d.path)))
    }
}

/// A `key=value` override applied on top of the YAML config.
///
/// The value is parsed as a YAML scalar, so `rl=dpo`, `val_set_size=0.1` and
/// `download=true` get their natural types.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigOverride {
    /// Top-level config key.
    pub key: String,
    /// Parsed value.
    pub value: Value,
}

impl FromStr for ConfigOverride {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self> {
        let (key, raw) = s.split_once('=').ok_or_else(|| {
            TesseraError::InvalidArgument(format!("override `{}` is not in key=value form", s))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(TesseraError::InvalidArgument(format!(
                "override `{}` has an empty key",
                s
            )));
        }
        let value = serde_yaml::from_str(raw.trim()).map_err(|e| {
            TesseraError::InvalidArgument(format!("override `{}` has an invalid value: {}", s, e))
        })?;
        Ok(Self {
            key: key.to_string(),
            value,
        })
    }
}

fn default_seed() -> u64 {
    42
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
base_model: NousResearch/Llama-3.2-1B
datasets:
  - path: data/train.csv
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = RunConfig::from_yaml_str(MINIMAL, &[]).unwrap();
        assert_eq!(config.base_model, "NousResearch/Llama-3.2-1B");
        assert!(config.chat_template.is_none());
        assert!(config.prepared_path().is_none());
        assert!(!config.is_preprocess);
        assert!(config.rl.is_none());
        assert_eq!(config.seed, 42);
        assert!(!config.pad_ragged_rows);
        assert!(config.datasets[0].is_tabular());
    }

    #[test]
    fn test_overrides_are_typed() {
        let overrides: Vec<ConfigOverride> = [
            "rl=dpo",
            "val_set_size=0.25",
            "chat_template=chatml",
            "pad_ragged_rows=true",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
        let config = RunConfig::from_yaml_str(MINIMAL, &overrides).unwrap();
        assert_eq!(config.rl, Some(RlType::Dpo));
        assert!(config.pad_ragged_rows);
        assert_eq!(config.val_set_size, 0.25);
        assert_eq!(config.chat_template.as_deref(), Some("chatml"));
    }

    #[test]
    fn test_override_requires_equals() {
        assert!("download".parse::<ConfigOverride>().is_err());
        assert!("=x".parse::<ConfigOverride>().is_err());
    }

    #[test]
    fn test_missing_base_model_is_config_error() {
        let err = RunConfig::from_yaml_str("datasets:\n  - path: a.jsonl\n", &[]).unwrap_err();
        assert!(matches!(err, TesseraError::Config(_)));
        assert!(err.to_string().contains("base_model"));
    }

    #[test]
    fn test_missing_datasets_is_config_error() {
        let err = RunConfig::from_yaml_str("base_model: m\n", &[]).unwrap_err();
        assert!(matches!(err, TesseraError::Config(_)));
    }

    #[test]
    fn test_empty_dataset_path_rejected() {
        let err =
            RunConfig::from_yaml_str("base_model: m\ndatasets:\n  - path: ''\n", &[]).unwrap_err();
        assert!(err.to_string().contains("datasets[0].path"));
    }

    #[test]
    fn test_val_set_size_range() {
        let err = RunConfig::from_yaml_str(&format!("{}val_set_size: 1.0\n", MINIMAL), &[])
            .unwrap_err();
        assert!(matches!(err, TesseraError::Config(_)));
    }

    #[test]
    fn test_empty_prepared_path_counts_as_unset() {
        let config =
            RunConfig::from_yaml_str(&format!("{}dataset_prepared_path: ''\n", MINIMAL), &[])
                .unwrap();
        assert!(config.prepared_path().is_none());
    }

    #[test]
    fn test_tabular_extension_case_insensitive() {
        assert!(is_tabular_path(Path::new("a/b/TRAIN.CSV")));
        assert!(is_tabular_path(Path::new("rows.tsv")));
        assert!(!is_tabular_path(Path::new("rows.jsonl")));
        assert!(!is_tabular_path(Path::new("csv")));
    }

    #[test]
    fn test_active_dataset_file_prefers_converted() {
        let mut config = RunConfig::from_yaml_str(MINIMAL, &[]).unwrap();
        assert_eq!(config.active_dataset_file(), Some(PathBuf::from("data/train.csv")));
        config.dataset_file = Some(PathBuf::from("prepared/train.jsonl"));
        assert_eq!(
            config.active_dataset_file(),
            Some(PathBuf::from("prepared/train.jsonl"))
        );
    }

    #[test]
    fn test_token_is_not_serialized() {
        let yaml = format!("{}hf_token: hf_secret\n", MINIMAL);
        let config = RunConfig::from_yaml_str(&yaml, &[]).unwrap();
        assert!(config.hf_token.is_some());
        let out = serde_yaml::to_string(&config).unwrap();
        assert!(!out.contains("hf_secret"));
        assert!(!format!("{:?}", config).contains("hf_secret"));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = RunConfig::from_yaml_file(&path, &[]).unwrap();
        assert_eq!(config.datasets.len(), 1);

        let missing = RunConfig::from_yaml_file(dir.path().join("nope.yaml"), &[]);
        assert!(matches!(missing, Err(TesseraError::Config(_))));
    }
}
