use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::sys::LOCALE_USER_DEFAULT;

pub const DEFAULT_CONFIG_PATH: &str = "config/autocom.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub dispatch: DispatchConfig,
    pub activation: ActivationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// LCID passed to name resolution and invocation.
    pub locale: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationConfig {
    pub context: ActivationContext,
    pub apartment: ApartmentModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Where a server may be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationContext {
    InprocServer,
    LocalServer,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApartmentModel {
    SingleThreaded,
    MultiThreaded,
}

impl Config {
    /// Loads `path` over the defaults, then applies `AUTOCOM_` environment overrides
    /// (`AUTOCOM_DISPATCH__LOCALE=1033`).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("AUTOCOM_").split("__"))
            .extract()
            .with_context(|| format!("Failed to parse configuration from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the default location. A missing file just means defaults plus environment.
    pub fn load() -> Result<Self> {
        if !Path::new(DEFAULT_CONFIG_PATH).exists() {
            log::debug!("{} not found, using defaults", DEFAULT_CONFIG_PATH);
        }
        Self::load_from_file(DEFAULT_CONFIG_PATH)
    }

    pub fn validate(&self) -> Result<()> {
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<log::LevelFilter> {
        self.logging
            .level
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown log level '{}'", self.logging.level))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dispatch: DispatchConfig {
                locale: LOCALE_USER_DEFAULT,
            },
            activation: ActivationConfig {
                context: ActivationContext::Any,
                apartment: ApartmentModel::SingleThreaded,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}
