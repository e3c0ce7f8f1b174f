//! Best-effort resolution of pretrained weights.
//!
//! The probe fetches `config.json` and the model weights into the HuggingFace
//! cache without loading any tensors, so a training job started later finds
//! them locally. Safetensors are preferred; repositories that only ship
//! PyTorch `.bin` checkpoints resolve too.

use crate::env::is_offline;
use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Cache, Repo, RepoType};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tessera_core::{ProbeOutcome, Result, SecretString, TesseraError, WeightProbe};

const CONFIG_FILE: &str = "config.json";
const SINGLE_WEIGHTS: &str = "model.safetensors";
const WEIGHTS_INDEX: &str = "model.safetensors.index.json";
const BIN_WEIGHTS: &str = "pytorch_model.bin";
const BIN_WEIGHTS_INDEX: &str = "pytorch_model.bin.index.json";

/// Weight layouts in preference order: a single file, then a sharded index.
const WEIGHT_LAYOUTS: &[(&str, &str)] = &[
    (SINGLE_WEIGHTS, WEIGHTS_INDEX),
    (BIN_WEIGHTS, BIN_WEIGHTS_INDEX),
];

/// Probes HuggingFace Hub (or a local directory) for model weights.
#[derive(Debug, Clone)]
pub struct HubWeightProbe {
    token: Option<SecretString>,
    revision: Option<String>,
    cache_dir: Option<PathBuf>,
    offline: bool,
}

impl Default for HubWeightProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HubWeightProbe {
    /// Create a probe. Offline mode follows `HF_HUB_OFFLINE`.
    pub fn new() -> Self {
        Self {
            token: None,
            revision: None,
            cache_dir: None,
            offline: is_offline(),
        }
    }

    /// Authenticate with `token` for gated models.
    pub fn with_token(mut self, token: Option<SecretString>) -> Self {
        self.token = token;
        self
    }

    /// Probe a specific revision instead of `main`.
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Use `dir` as the hub cache instead of the default location.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Only consult the local cache.
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    fn repo_spec(&self, model_id: &str) -> Repo {
        match &self.revision {
            Some(rev) => Repo::with_revision(model_id.to_string(), RepoType::Model, rev.clone()),
            None => Repo::model(model_id.to_string()),
        }
    }

    /// Build API with optional token authentication.
    fn build_api(&self) -> Result<Api> {
        let mut builder = ApiBuilder::new().with_progress(false);

        if let Some(secret) = &self.token {
            builder = builder.with_token(Some(secret.expose_secret().to_string()));
        }
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }

        builder.build().map_err(|e| TesseraError::Hub(e.to_string()))
    }

    /// Resolve the model directory, downloading missing files.
    pub async fn resolve(&self, model_id: &str) -> Result<PathBuf> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return if local.join(CONFIG_FILE).is_file() {
                Ok(local.to_path_buf())
            } else {
                Err(TesseraError::Hub(format!(
                    "local model directory {} has no {}",
                    local.display(),
                    CONFIG_FILE
                )))
            };
        }

        if self.offline {
            return self.lookup_cached(model_id);
        }

        let api = self.build_api()?;
        let repo = api.repo(self.repo_spec(model_id));

        let config_path = fetch(&repo, CONFIG_FILE).await?;
        tracing::info!("Downloading weights for {}...", model_id);
        let weights = fetch_weights(&repo).await?;
        tracing::debug!(files = weights.len(), "Cached weights for {}", model_id);

        Ok(parent_dir(&config_path))
    }

    fn lookup_cached(&self, model_id: &str) -> Result<PathBuf> {
        let cache = match &self.cache_dir {
            Some(dir) => Cache::new(dir.clone()),
            None => Cache::default(),
        };
        let repo = cache.repo(self.repo_spec(model_id));
        let missing = |file: &str| {
            TesseraError::Hub(format!(
                "{} for {} is not in the local cache and the hub is offline",
                file, model_id
            ))
        };

        let config_path = repo.get(CONFIG_FILE).ok_or_else(|| missing(CONFIG_FILE))?;
        for (single, index) in WEIGHT_LAYOUTS {
            if repo.get(single).is_some() {
                return Ok(parent_dir(&config_path));
            }
            if let Some(index) = repo.get(index) {
                for shard in shard_names(&index)? {
                    repo.get(&shard).ok_or_else(|| missing(&shard))?;
                }
                return Ok(parent_dir(&config_path));
            }
        }
        Err(missing(&weight_file_names()))
    }
}

impl WeightProbe for HubWeightProbe {
    async fn probe(&self, model_id: &str) -> ProbeOutcome {
        match self.resolve(model_id).await {
            Ok(path) => ProbeOutcome::Resolved { path },
            Err(e) => ProbeOutcome::Unavailable {
                reason: e.to_string(),
            },
        }
    }
}

async fn fetch(repo: &ApiRepo, filename: &str) -> Result<PathBuf> {
    repo.get(filename)
        .await
        .map_err(|e| TesseraError::Hub(format!("{}: {}", filename, e)))
}

/// Download the weight files for a model, using the first layout the repo has.
async fn fetch_weights(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    for (single, index) in WEIGHT_LAYOUTS {
        // Single file models first
        if let Ok(path) = repo.get(single).await {
            return Ok(vec![path]);
        }
        if let Ok(index_path) = repo.get(index).await {
            let mut paths = Vec::new();
            for shard in shard_names(&index_path)? {
                paths.push(fetch(repo, &shard).await?);
            }
            return Ok(paths);
        }
    }
    Err(TesseraError::Hub(format!(
        "no weights found, expected {}",
        weight_file_names()
    )))
}

fn weight_file_names() -> String {
    WEIGHT_LAYOUTS
        .iter()
        .map(|(single, _)| *single)
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Shard file names listed in a weight index's `weight_map`.
fn shard_names(index_path: &Path) -> Result<BTreeSet<String>> {
    let content = std::fs::read_to_string(index_path)?;
    let index: serde_json::Value = serde_json::from_str(&content)?;
    let weight_map = index
        .get("weight_map")
        .and_then(|v| v.as_object())
        .ok_or_else(|| {
            TesseraError::Hub(format!("{} has no weight_map", index_path.display()))
        })?;
    Ok(weight_map
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    /// Lay out a hub cache entry the way hf-hub stores snapshots.
    fn cached_snapshot(cache: &Path, model_id: &str, files: &[(&str, &str)]) -> PathBuf {
        let repo_dir = cache.join(format!("models--{}", model_id.replace('/', "--")));
        fs::create_dir_all(repo_dir.join("refs")).unwrap();
        fs::write(repo_dir.join("refs/main"), COMMIT).unwrap();
        let snapshot = repo_dir.join("snapshots").join(COMMIT);
        fs::create_dir_all(&snapshot).unwrap();
        for (name, content) in files {
            fs::write(snapshot.join(name), content).unwrap();
        }
        snapshot
    }

    #[tokio::test]
    async fn test_local_directory_resolves() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        let model_id = dir.path().to_string_lossy().into_owned();

        let outcome = HubWeightProbe::new().with_offline(true).probe(&model_id).await;
        assert_eq!(
            outcome,
            ProbeOutcome::Resolved {
                path: dir.path().to_path_buf()
            }
        );
    }

    #[tokio::test]
    async fn test_local_directory_without_config_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let model_id = dir.path().to_string_lossy().into_owned();

        let outcome = HubWeightProbe::new().with_offline(true).probe(&model_id).await;
        assert!(!outcome.is_resolved());
        assert!(outcome.to_string().contains(CONFIG_FILE));
    }

    #[tokio::test]
    async fn test_offline_cache_miss_is_unavailable() {
        let cache = TempDir::new().unwrap();
        let outcome = HubWeightProbe::new()
            .with_offline(true)
            .with_cache_dir(cache.path())
            .probe("org/missing-model")
            .await;
        match outcome {
            ProbeOutcome::Unavailable { reason } => assert!(reason.contains("org/missing-model")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offline_cache_hit_single_file() {
        let cache = TempDir::new().unwrap();
        let snapshot = cached_snapshot(
            cache.path(),
            "org/tiny",
            &[(CONFIG_FILE, "{}"), (SINGLE_WEIGHTS, "weights")],
        );

        let outcome = HubWeightProbe::new()
            .with_offline(true)
            .with_cache_dir(cache.path())
            .probe("org/tiny")
            .await;
        assert_eq!(outcome, ProbeOutcome::Resolved { path: snapshot });
    }

    #[tokio::test]
    async fn test_offline_sharded_requires_every_shard() {
        let cache = TempDir::new().unwrap();
        let index = r#"{"weight_map": {
            "a": "model-00001-of-00002.safetensors",
            "b": "model-00002-of-00002.safetensors"
        }}"#;
        let snapshot = cached_snapshot(
            cache.path(),
            "org/sharded",
            &[
                (CONFIG_FILE, "{}"),
                (WEIGHTS_INDEX, index),
                ("model-00001-of-00002.safetensors", "w1"),
            ],
        );
        let probe = HubWeightProbe::new()
            .with_offline(true)
            .with_cache_dir(cache.path());

        let outcome = probe.probe("org/sharded").await;
        assert!(outcome.to_string().contains("model-00002-of-00002"));

        fs::write(snapshot.join("model-00002-of-00002.safetensors"), "w2").unwrap();
        assert!(probe.probe("org/sharded").await.is_resolved());
    }

    #[tokio::test]
    async fn test_offline_pytorch_bin_only_resolves() {
        let cache = TempDir::new().unwrap();
        let snapshot = cached_snapshot(
            cache.path(),
            "org/legacy",
            &[(CONFIG_FILE, "{}"), (BIN_WEIGHTS, "weights")],
        );

        let outcome = HubWeightProbe::new()
            .with_offline(true)
            .with_cache_dir(cache.path())
            .probe("org/legacy")
            .await;
        assert_eq!(outcome, ProbeOutcome::Resolved { path: snapshot });
    }

    #[tokio::test]
    async fn test_offline_sharded_pytorch_bin() {
        let cache = TempDir::new().unwrap();
        let index = r#"{"weight_map": {
            "a": "pytorch_model-00001-of-00002.bin",
            "b": "pytorch_model-00002-of-00002.bin"
        }}"#;
        cached_snapshot(
            cache.path(),
            "org/legacy-sharded",
            &[
                (CONFIG_FILE, "{}"),
                (BIN_WEIGHTS_INDEX, index),
                ("pytorch_model-00001-of-00002.bin", "w1"),
                ("pytorch_model-00002-of-00002.bin", "w2"),
            ],
        );

        let outcome = HubWeightProbe::new()
            .with_offline(true)
            .with_cache_dir(cache.path())
            .probe("org/legacy-sharded")
            .await;
        assert!(outcome.is_resolved());
    }

    #[tokio::test]
    async fn test_offline_config_without_weights_names_expected_files() {
        let cache = TempDir::new().unwrap();
        cached_snapshot(cache.path(), "org/no-weights", &[(CONFIG_FILE, "{}")]);

        let outcome = HubWeightProbe::new()
            .with_offline(true)
            .with_cache_dir(cache.path())
            .probe("org/no-weights")
            .await;
        let reason = outcome.to_string();
        assert!(reason.contains(SINGLE_WEIGHTS));
        assert!(reason.contains(BIN_WEIGHTS));
    }

    #[test]
    fn test_shard_names_deduplicated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(WEIGHTS_INDEX);
        fs::write(
            &path,
            r#"{"weight_map": {"x": "b.safetensors", "y": "a.safetensors", "z": "b.safetensors"}}"#,
        )
        .unwrap();
        let names: Vec<_> = shard_names(&path).unwrap().into_iter().collect();
        assert_eq!(names, vec!["a.safetensors", "b.safetensors"]);

        fs::write(&path, "{}").unwrap();
        assert!(shard_names(&path).is_err());
    }
}
