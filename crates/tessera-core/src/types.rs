//! Common type definitions.

use std::fmt;
use std::path::PathBuf;

/// Run-time flags for a preprocessing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessArgs {
    /// Probe that the base model weights are resolvable after the dataset is prepared.
    pub download: bool,
}

/// Summary of a materialized dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDataset {
    /// Directory holding the prepared files.
    pub dir: PathBuf,
    /// Fingerprint of the dataset-relevant configuration.
    pub fingerprint: String,
    /// Number of training records.
    pub num_train: usize,
    /// Number of evaluation records.
    pub num_eval: usize,
    /// Whether an existing prepared dataset was reused instead of rebuilt.
    pub reused_cache: bool,
}

/// Result of the best-effort weight resolution probe.
///
/// The probe has no error path: an unreachable model is a warning, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The weights were resolved (and cached, for hub models).
    Resolved {
        /// Local directory holding the model files.
        path: PathBuf,
    },
    /// The weights could not be resolved.
    Unavailable {
        /// Human-readable cause.
        reason: String,
    },
}

impl ProbeOutcome {
    /// Whether the probe resolved the weights.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved { path } => write!(f, "resolved at {}", path.display()),
            Self::Unavailable { reason } => write!(f, "unavailable: {}", reason),
        }
    }
}
