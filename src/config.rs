//! Updater configuration
//!
//! [`UpdaterConfig::load`] reads the `[updater]` section of
//! `config/config.toml` (optional) and `SYSUPDATER__UPDATER__*` environment
//! variables, e.g. `SYSUPDATER__UPDATER__DIALECT=mysql`.

use crate::dialect::{ConstraintNaming, DatabaseSupport, Dialect};
use crate::update::{RunOptions, UpdateRegistry};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

const CONFIG_FILE: &str = "config/config.toml";
const ENV_PREFIX: &str = "SYSUPDATER";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UpdaterConfig {
    #[serde(default = "default_dialect")]
    pub dialect: Dialect,
    #[serde(default)]
    pub database_url: Option<String>,
    /// Per-entry timeout; 0 or absent waits indefinitely
    #[serde(default)]
    pub entry_timeout_seconds: u64,
    #[serde(default)]
    pub parallel_regions: bool,
    #[serde(default)]
    pub strict_dates: bool,
    #[serde(default = "default_unique_name_attempts")]
    pub unique_name_attempts: u32,
    #[serde(default = "default_column_prefix_len")]
    pub column_prefix_len: usize,
}

fn default_dialect() -> Dialect {
    Dialect::Postgres
}

fn default_unique_name_attempts() -> u32 {
    1000
}

fn default_column_prefix_len() -> usize {
    8
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            database_url: None,
            entry_timeout_seconds: 0,
            parallel_regions: false,
            strict_dates: false,
            unique_name_attempts: default_unique_name_attempts(),
            column_prefix_len: default_column_prefix_len(),
        }
    }
}

impl UpdaterConfig {
    /// Load the updater configuration from `config/config.toml`, falling back to env vars.
    ///
    /// A missing `[updater]` section yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(CONFIG_FILE)
    }

    /// Same as [`Self::load`] with an explicit configuration file path
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if std::path::Path::new(path).exists() {
                    log::warn!(
                        "Failed to load config file {}, falling back to env. Error: {}",
                        path,
                        err
                    );
                }
                Config::builder()
                    .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {}, then env-only error: {}",
                            err, env_err
                        ))
                    })?
            }
        };

        let config = match settings.get::<UpdaterConfig>("updater") {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => UpdaterConfig::default(),
            Err(e) => {
                return Err(ConfigError::Message(format!(
                    "Updater configuration could not be loaded from file or environment: {}",
                    e
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the updater cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unique_name_attempts == 0 {
            return Err(ConfigError::Message(
                "updater.unique_name_attempts must be at least 1".to_string(),
            ));
        }
        if self.column_prefix_len == 0 {
            return Err(ConfigError::Message(
                "updater.column_prefix_len must be at least 1".to_string(),
            ));
        }
        if !self.naming().fits(self.dialect) {
            return Err(ConfigError::Message(format!(
                "updater.column_prefix_len {} leaves no room for a {} constraint name",
                self.column_prefix_len, self.dialect
            )));
        }
        Ok(())
    }

    pub fn entry_timeout(&self) -> Option<Duration> {
        (self.entry_timeout_seconds > 0).then(|| Duration::from_secs(self.entry_timeout_seconds))
    }

    pub fn naming(&self) -> ConstraintNaming {
        ConstraintNaming {
            column_prefix_len: self.column_prefix_len,
            max_attempts: self.unique_name_attempts,
        }
    }

    /// The dialect support for this process
    pub fn database_support(&self) -> DatabaseSupport {
        DatabaseSupport::with_naming(self.dialect, self.naming())
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions::from_config(self)
    }

    /// An empty registry honouring the date policy
    pub fn registry(&self) -> UpdateRegistry {
        UpdateRegistry::new().with_strict_dates(self.strict_dates)
    }
}
