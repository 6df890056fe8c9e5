//! # Configuration
//!
//! Plugins receive their init arguments as a JSON-like key/value map
//! ([`PluginArgs`]). Unknown keys are ignored; a missing or malformed required
//! key is a [`PipelineError::Config`] raised at init.
//!
//! A whole pipeline is described by a [`PipelineConfig`], read from TOML with
//! environment overrides:
//!
//! ```toml
//! max_batch_size = 8
//!
//! [converter]
//! name = "json_fields"
//!
//! [inferer]
//! name = "sum"
//! device = "cpu"
//! ```
//!
//! Every key can be overridden from the environment with the `SKEWER` prefix
//! and `__` as separator, e.g. `SKEWER__INFERER__ARGS__PRED_LENGTH=16`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use config::{Config, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::error::{PipelineError, Result};

const ENV_PREFIX: &str = "SKEWER";
const ENV_SEPARATOR: &str = "__";

fn default_max_batch_size() -> usize {
    8
}

/// Init arguments of one plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginArgs(Map<String, Value>);

impl PluginArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn required<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.optional(key)?
            .ok_or_else(|| PipelineError::config(format!("missing required arg `{}`", key)))
    }

    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.0.get(key) else {
            return Ok(None);
        };
        match serde_json::from_value::<T>(value.clone()) {
            Ok(parsed) => Ok(Some(parsed)),
            // values coming from the environment arrive as strings
            Err(err) => match value {
                Value::String(raw) => serde_json::from_str::<T>(raw)
                    .map(Some)
                    .map_err(|_| malformed(key, err)),
                _ => Err(malformed(key, err)),
            },
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.optional(key)?.unwrap_or(default))
    }
}

fn malformed(key: &str, err: serde_json::Error) -> PipelineError {
    PipelineError::config(format!("arg `{}` is malformed: {}", key, err))
}

impl From<Map<String, Value>> for PluginArgs {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Where an inferer runs its model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl FromStr for Device {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|ordinal| ordinal.parse().ok())
                .map(Device::Cuda)
                .ok_or_else(|| PipelineError::config(format!("unknown device `{}`", s))),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterConfig {
    pub name: String,
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub args: PluginArgs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfererConfig {
    pub name: String,
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub device: Device,
    #[serde(default)]
    pub args: PluginArgs,
}

/// Description of one converter / inferer pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Largest group [`Pipeline::handle_batch`](crate::Pipeline::handle_batch) hands to a converter at once.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Without a converter the inferer handles wire messages itself.
    #[serde(default)]
    pub converter: Option<ConverterConfig>,
    pub inferer: InfererConfig,
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::load(File::from(path).format(FileFormat::Toml))
            .map_err(|err| PipelineError::config(format!("{}: {}", path.display(), err)))
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::load(File::from_str(toml, FileFormat::Toml))
            .map_err(PipelineError::config)
    }

    fn load<S>(source: S) -> std::result::Result<Self, config::ConfigError>
    where S: config::Source + Send + Sync + 'static
    {
        let config: PipelineConfig = Config::builder()
            .add_source(source)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?
            .try_deserialize()?;
        if config.max_batch_size == 0 {
            return Err(config::ConfigError::Message("max_batch_size must be at least 1".into()));
        }
        Ok(config)
    }
}
