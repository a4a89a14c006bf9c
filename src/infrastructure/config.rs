use std::path::{Path, PathBuf};

use config::ConfigError;
use serde::Deserialize;

use crate::{core::union::ArrayMerge, utils};

const CONFIG: &str = include_str!("../../.config/config.json5");

const CONFIG_FILES: [(&str, config::FileFormat); 5] = [
    ("config.json5", config::FileFormat::Json5),
    ("config.json", config::FileFormat::Json),
    ("config.yaml", config::FileFormat::Yaml),
    ("config.toml", config::FileFormat::Toml),
    ("config.ini", config::FileFormat::Ini),
];

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub _data_dir: PathBuf,
    #[serde(default)]
    pub _config_dir: PathBuf,
}

/// Scheduling and merge settings of a runtime instance
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound of messages per tick; `None` drains everything queued
    pub max_batch: Option<usize>,
    pub array_merge: ArrayMerge,
    /// Log every dispatch and update at trace level
    pub trace_messages: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_batch: None,
            array_merge: ArrayMerge::Replace,
            trace_messages: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub tick_ms: u64,
    /// Stop after this many ticks
    pub ticks: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            tick_ms: 250,
            ticks: 8,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default, flatten)]
    pub config: AppConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub demo: DemoConfig,
}

impl Config {
    /// Load the embedded defaults, then any config file in the config directory,
    /// then `TEALOOP_*` environment variables (`TEALOOP_RUNTIME__MAX_BATCH=16`).
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_from(&utils::get_data_dir(), &utils::get_config_dir())
    }

    /// The embedded defaults only
    pub fn defaults() -> Result<Self, ConfigError> {
        json5::from_str(CONFIG)
            .map_err(|e| ConfigError::Message(format!("Failed to load default config: {e}")))
    }

    pub fn load_from(data_dir: &Path, config_dir: &Path) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(CONFIG, config::FileFormat::Json5))
            .set_default("_data_dir", data_dir.to_string_lossy().into_owned())?
            .set_default("_config_dir", config_dir.to_string_lossy().into_owned())?;

        let mut found_config = false;
        for (file, format) in &CONFIG_FILES {
            let path = config_dir.join(file);
            found_config |= path.exists();
            builder = builder.add_source(config::File::from(path).format(*format).required(false));
        }
        if !found_config {
            tracing::debug!(dir = %config_dir.display(), "no configuration file found; using defaults");
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TEALOOP")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.max_batch == Some(0) {
            return Err(ConfigError::Message(String::from(
                "runtime.max_batch must be at least 1",
            )));
        }
        if self.demo.tick_ms == 0 {
            return Err(ConfigError::Message(String::from(
                "demo.tick_ms must be at least 1",
            )));
        }
        Ok(())
    }
}
