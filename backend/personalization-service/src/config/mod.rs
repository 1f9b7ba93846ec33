use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{PersonalizationError, Result};
use crate::models::PersonalizationSettings;

pub const ENV_PREFIX: &str = "PERSONALIZATION_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    File,
    Redis,
}

/// Job configuration, read from `PERSONALIZATION_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Remote settings base URL; records are read from `remote_settings_dir` when unset
    #[serde(default)]
    pub remote_settings_url: Option<String>,
    #[serde(default = "default_remote_settings_dir")]
    pub remote_settings_dir: PathBuf,
    #[serde(default = "default_remote_settings_timeout")]
    pub remote_settings_timeout_secs: u64,

    /// JSON export of the user's history
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,

    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default)]
    pub redis_ttl_secs: Option<u64>,

    /// Time segments and parameter sets; built-in defaults when unset
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
    /// Overrides the active parameter set of the settings file
    #[serde(default)]
    pub parameter_set: Option<String>,

    /// Candidate items to score once the interest vector is ready
    #[serde(default)]
    pub items_path: Option<PathBuf>,
}

fn default_remote_settings_dir() -> PathBuf {
    PathBuf::from("./settings")
}

fn default_remote_settings_timeout() -> u64 {
    10
}

fn default_history_path() -> PathBuf {
    PathBuf::from("./history.json")
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::File
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Parse `value` as a URL with a host and one of `schemes`.
fn check_url(name: &str, value: &str, schemes: &[&str]) -> Result<Url> {
    let url = Url::parse(value).map_err(|e| {
        PersonalizationError::Configuration(format!("{} is not a valid URL ({}): {}", name, e, value))
    })?;

    if !schemes.contains(&url.scheme()) {
        return Err(PersonalizationError::Configuration(format!(
            "{} must use one of {:?}, got {}",
            name,
            schemes,
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(PersonalizationError::Configuration(format!(
            "{} has no host: {}",
            name, value
        )));
    }

    Ok(url)
}

impl Config {
    /// Load configuration from `.env` and the environment
    pub fn from_env() -> std::result::Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed(ENV_PREFIX).from_env()
    }

    pub fn from_vars<I>(vars: I) -> std::result::Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(vars)
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote_settings_timeout_secs == 0 {
            return Err(PersonalizationError::Configuration(
                "remote_settings_timeout_secs must be > 0".to_string(),
            ));
        }

        if let Some(url) = &self.remote_settings_url {
            check_url("remote_settings_url", url, &["http", "https"])?;
        }

        if self.store_backend == StoreBackend::Redis {
            check_url("redis_url", &self.redis_url, &["redis", "rediss"])?;
        }

        if self.redis_ttl_secs == Some(0) {
            return Err(PersonalizationError::Configuration(
                "redis_ttl_secs must be > 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    pub fn remote_settings_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_settings_timeout_secs)
    }

    /// Scoring settings from `settings_path` (or defaults), with the
    /// `parameter_set` override applied.
    pub async fn load_settings(&self) -> Result<PersonalizationSettings> {
        let mut settings = match &self.settings_path {
            Some(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    PersonalizationError::Configuration(format!(
                        "failed to read {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                serde_json::from_slice(&bytes).map_err(|e| {
                    PersonalizationError::Configuration(format!(
                        "invalid settings in {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            None => PersonalizationSettings::default(),
        };

        if let Some(name) = &self.parameter_set {
            settings.parameter_set = name.clone();
        }

        Ok(settings)
    }
}
