//! Dataset preparation coordinator.
//!
//! Runs the preprocessing steps in a fixed order: environment checks, chat
//! template registration, prepared-path defaulting, dataset materialization,
//! tabular conversion and the optional weight probe. Every step before the probe
//! is fatal; the probe only ever produces a warning.

use std::fmt;
use std::path::PathBuf;
use tessera_core::{
    DatasetLoader, EnvironmentCheck, PreparedDataset, PreprocessArgs, ProbeOutcome, RunConfig,
    TesseraError, WeightProbe, DEFAULT_DATASET_PREPARED_PATH,
};
use tessera_data::{
    artifact_path, disable_dataset_caching, register_template, ChatTemplateType,
    ConversionReport, TabularToJsonlConverter,
};
use thiserror::Error;

/// A fallible step of a preprocessing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreprocessStep {
    /// Distributed launcher and hub token checks.
    Environment,
    /// Building the prepared dataset through the loader.
    Materialization,
    /// Converting a tabular source to JSON Lines.
    Conversion,
}

impl fmt::Display for PreprocessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Environment => "environment check",
            Self::Materialization => "dataset materialization",
            Self::Conversion => "tabular conversion",
        })
    }
}

/// A fatal preprocessing failure, tagged with the step that raised it.
#[derive(Debug, Error)]
#[error("{step} failed: {source}")]
pub struct StepError {
    /// Step that failed.
    pub step: PreprocessStep,
    /// The underlying error, unchanged.
    #[source]
    pub source: TesseraError,
}

impl StepError {
    fn at(step: PreprocessStep) -> impl FnOnce(TesseraError) -> StepError {
        move |source| StepError { step, source }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessOutcome {
    /// Directory the prepared dataset was written under.
    pub dataset_prepared_path: PathBuf,
    /// Loader result.
    pub prepared: PreparedDataset,
    /// Conversion result, when the first dataset was tabular.
    pub converted: Option<ConversionReport>,
    /// Probe result, when weights were requested.
    pub probe: Option<ProbeOutcome>,
    /// Non-fatal findings, in the order they were raised.
    pub warnings: Vec<String>,
}

/// Drives one preprocessing run against its collaborators.
#[derive(Debug)]
pub struct Preprocessor<L, P, E> {
    loader: L,
    probe: P,
    env: E,
}

impl<L, P, E> Preprocessor<L, P, E>
where
    L: DatasetLoader,
    P: WeightProbe,
    E: EnvironmentCheck,
{
    /// Create a coordinator.
    pub fn new(loader: L, probe: P, env: E) -> Self {
        Self { loader, probe, env }
    }

    /// The dataset loader.
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// The weight probe.
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Prepare the dataset described by `config`.
    ///
    /// `config` is updated in place: `is_preprocess` is set, an unset
    /// `dataset_prepared_path` is defaulted and `dataset_file` points at the
    /// converted artifact when one is produced.
    pub async fn run(
        &self,
        config: &mut RunConfig,
        args: &PreprocessArgs,
    ) -> Result<PreprocessOutcome, StepError> {
        config.is_preprocess = true;
        let mut warnings = Vec::new();

        self.env
            .check_distributed_config()
            .map_err(StepError::at(PreprocessStep::Environment))?;
        self.env
            .check_auth_token()
            .map_err(StepError::at(PreprocessStep::Environment))?;

        // Unrecognized or absent template names leave the registry untouched.
        if let Some(kind) = config
            .chat_template
            .as_deref()
            .and_then(ChatTemplateType::from_name)
        {
            if let Some(message) = &config.default_system_message {
                tracing::info!(
                    template = kind.name(),
                    "Using default system message: {}",
                    message
                );
            }
            register_template(kind, config.default_system_message.as_deref());
        }

        let prepared_dir = match config.prepared_path() {
            Some(path) => path.to_path_buf(),
            None => {
                let message = format!(
                    "`dataset_prepared_path` is not set, defaulting to `{}`",
                    DEFAULT_DATASET_PREPARED_PATH
                );
                tracing::warn!("{}", message);
                warnings.push(message);
                let path = PathBuf::from(DEFAULT_DATASET_PREPARED_PATH);
                config.dataset_prepared_path = Some(path.clone());
                path
            }
        };

        let prepared = {
            let _caching = disable_dataset_caching();
            match config.rl {
                Some(rl) => {
                    tracing::info!(rl = ?rl, "Loading preference datasets");
                    self.loader.load_rl_datasets(config, args)
                }
                None => self.loader.load_datasets(config, args),
            }
        }
        .map_err(StepError::at(PreprocessStep::Materialization))?;

        let converted = match config.datasets.first() {
            Some(first) if first.is_tabular() => {
                // Same file and ragged-row policy the loader just read.
                let source = self.loader.resolve_source(&first.path);
                let converter = TabularToJsonlConverter::for_config(config);
                let report = artifact_path(&prepared_dir, &source)
                    .and_then(|target| converter.convert(&source, &target))
                    .map_err(StepError::at(PreprocessStep::Conversion))?;
                config.dataset_file = Some(report.target.clone());
                Some(report)
            }
            _ => None,
        };

        let probe = if args.download {
            let outcome = self.probe.probe(&config.base_model).await;
            match &outcome {
                ProbeOutcome::Resolved { path } => {
                    tracing::info!(
                        "Weights for {} resolved at {}",
                        config.base_model,
                        path.display()
                    );
                }
                ProbeOutcome::Unavailable { reason } => {
                    let message = format!(
                        "could not resolve weights for {}: {}",
                        config.base_model, reason
                    );
                    tracing::warn!("{}", message);
                    warnings.push(message);
                }
            }
            Some(outcome)
        } else {
            None
        };

        tracing::info!(
            "Success! Preprocessed data path: `dataset_prepared_path: {}`",
            prepared_dir.display()
        );

        Ok(PreprocessOutcome {
            dataset_prepared_path: prepared_dir,
            prepared,
            converted,
            probe,
            warnings,
        })
    }
}
