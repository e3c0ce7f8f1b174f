//! Host environment checks and token discovery.

use std::path::{Path, PathBuf};
use tessera_core::{EnvironmentCheck, Result, SecretString, TesseraError};

/// Environment variable holding a hub access token.
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";
/// Environment variable overriding the HuggingFace home directory.
pub const HF_HOME_ENV: &str = "HF_HOME";
/// Environment variable that disables hub network access.
pub const HF_HUB_OFFLINE_ENV: &str = "HF_HUB_OFFLINE";

/// The HuggingFace home directory: `$HF_HOME`, else `~/.cache/huggingface`.
pub fn hf_home() -> PathBuf {
    match std::env::var_os(HF_HOME_ENV) {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => dirs::home_dir()
            .map(|p| p.join(".cache").join("huggingface"))
            .unwrap_or_else(|| PathBuf::from(".cache/huggingface")),
    }
}

/// Whether `HF_HUB_OFFLINE` is set to a truthy value.
pub fn is_offline() -> bool {
    std::env::var(HF_HUB_OFFLINE_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Checks against the real host: launcher config and hub credentials.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    hf_home: PathBuf,
    offline: bool,
    env_token: Option<String>,
}

impl HostEnvironment {
    /// Read `HF_HOME`, `HF_HUB_OFFLINE` and `HF_TOKEN` from the process environment.
    pub fn from_env() -> Self {
        Self {
            hf_home: hf_home(),
            offline: is_offline(),
            env_token: std::env::var(HF_TOKEN_ENV).ok(),
        }
    }

    /// An environment rooted at `hf_home` with no token variable, online.
    pub fn new(hf_home: impl Into<PathBuf>) -> Self {
        Self {
            hf_home: hf_home.into(),
            offline: false,
            env_token: None,
        }
    }

    /// Override offline mode.
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Override the `HF_TOKEN` value.
    pub fn with_env_token(mut self, token: Option<String>) -> Self {
        self.env_token = token;
        self
    }

    /// HuggingFace home directory in use.
    pub fn hf_home(&self) -> &Path {
        &self.hf_home
    }

    /// Location of the accelerate launcher's default config.
    pub fn accelerate_config_path(&self) -> PathBuf {
        self.hf_home.join("accelerate").join("default_config.yaml")
    }

    /// Location of the token written by `huggingface-cli login`.
    pub fn token_path(&self) -> PathBuf {
        self.hf_home.join("token")
    }

    /// Find a hub token: `HF_TOKEN` first, then the stored login token.
    ///
    /// An empty `HF_TOKEN` or an unreadable token file is an error; no token at
    /// all is `Ok(None)`.
    pub fn discover_token(&self) -> Result<Option<SecretString>> {
        if let Some(token) = &self.env_token {
            if token.trim().is_empty() {
                return Err(TesseraError::Environment(format!(
                    "{} is set but empty",
                    HF_TOKEN_ENV
                )));
            }
            return Ok(Some(SecretString::new(token.trim())));
        }

        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            TesseraError::Environment(format!("cannot read token file {}: {}", path.display(), e))
        })?;
        let token = SecretString::new(content.trim());
        Ok((!token.is_blank()).then_some(token))
    }
}

impl EnvironmentCheck for HostEnvironment {
    fn check_distributed_config(&self) -> Result<()> {
        let path = self.accelerate_config_path();
        if !path.is_file() {
            return Ok(());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            TesseraError::Environment(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str::<serde_yaml::Value>(&content).map_err(|e| {
            TesseraError::Environment(format!("{} is not valid YAML: {}", path.display(), e))
        })?;

        tracing::warn!(
            "{} found. This may cause unexpected errors; remove it unless the run needs it.",
            path.display()
        );
        Ok(())
    }

    fn check_auth_token(&self) -> Result<()> {
        if self.offline {
            tracing::info!("{} is set, skipping hub token check", HF_HUB_OFFLINE_ENV);
            return Ok(());
        }

        match self.discover_token()? {
            Some(_) => {
                tracing::debug!("Found HuggingFace Hub token");
            }
            None => {
                tracing::warn!(
                    "No HuggingFace Hub token found. Gated models will be unavailable; \
                     run `huggingface-cli login` or set {}.",
                    HF_TOKEN_ENV
                );
            }
        }
        Ok(())
    }
}
