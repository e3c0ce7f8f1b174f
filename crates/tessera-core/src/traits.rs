//! Collaborator traits used by the preprocessing coordinator.
//!
//! Each trait is a seam between the coordinator and a subsystem it drives but
//! does not own. Production implementations live in `tessera-data` and
//! `tessera-hub`; tests substitute recording fakes.

use crate::{PreparedDataset, PreprocessArgs, ProbeOutcome, Result, RunConfig};
use std::future::Future;
use std::path::PathBuf;

/// Builds a trainer-ready dataset under `config.dataset_prepared_path`.
pub trait DatasetLoader {
    /// Materialize the configured supervised datasets.
    fn load_datasets(&self, config: &RunConfig, args: &PreprocessArgs) -> Result<PreparedDataset>;

    /// Materialize the configured preference (reinforcement-learning) datasets.
    fn load_rl_datasets(
        &self,
        config: &RunConfig,
        args: &PreprocessArgs,
    ) -> Result<PreparedDataset>;

    /// The file a dataset `path` from the config is read from.
    fn resolve_source(&self, path: &str) -> PathBuf {
        PathBuf::from(path)
    }
}

/// Checks that the pretrained weights for a model can be resolved.
///
/// Implementations must not load tensors; resolving and caching files is enough.
pub trait WeightProbe {
    /// Probe `model_id`. Failures are reported through [`ProbeOutcome::Unavailable`].
    fn probe(&self, model_id: &str) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Host environment sanity checks run before any dataset work.
pub trait EnvironmentCheck {
    /// Inspect distributed launcher configuration.
    fn check_distributed_config(&self) -> Result<()>;

    /// Inspect hub authentication.
    fn check_auth_token(&self) -> Result<()>;
}
