//! Particle filter configuration and its file formats.
//!
//! Configuration types implement [`ConfigFile`] to be stored as JSON, YAML or TOML;
//! [`ConfigFile::to_file`] and [`ConfigFile::from_file`] pick the format from the file extension.
use crate::error::Result;
use crate::recovery::RecoveryConfig;
use crate::sampler::ResamplingStrategy;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleFilterConfig {
    /// Strategy used for both the propagation draw and the final resampling step.
    pub resampling_strategy: ResamplingStrategy,
    /// How a fully depleted population is rebuilt.
    pub recovery: RecoveryConfig,
}

impl ParticleFilterConfig {
    pub fn validate(&self) -> Result<()> {
        self.recovery.validate()
    }
}

impl ConfigFile for ParticleFilterConfig {}
impl ConfigFile for RecoveryConfig {}

/// On-disk configuration formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}
impl ConfigFormat {
    /// Format implied by the file extension (.json/.yaml/.yml/.toml, case-insensitive).
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase);
        match extension.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported configuration file: {}", path.display()),
            )),
        }
    }
}

/// Serialization of a configuration type to and from files.
///
/// Every method has a default implementation, so an empty `impl` is enough for any serde type.
/// Serialization errors surface as [`io::Error`]s with [`io::ErrorKind::Other`].
pub trait ConfigFile: Serialize + DeserializeOwned {
    fn to_string_as(&self, format: ConfigFormat) -> io::Result<String> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(io::Error::other),
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(io::Error::other),
            ConfigFormat::Toml => toml::to_string(self).map_err(io::Error::other),
        }
    }
    fn from_str_as(contents: &str, format: ConfigFormat) -> io::Result<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(contents).map_err(io::Error::other),
            ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(io::Error::other),
            ConfigFormat::Toml => toml::from_str(contents).map_err(io::Error::other),
        }
    }

    fn write_as<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> io::Result<()> {
        fs::write(path, self.to_string_as(format)?)
    }
    fn read_as<P: AsRef<Path>>(path: P, format: ConfigFormat) -> io::Result<Self> {
        Self::from_str_as(&fs::read_to_string(path)?, format)
    }

    fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.write_as(path, ConfigFormat::Json)
    }
    fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::read_as(path, ConfigFormat::Json)
    }
    fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.write_as(path, ConfigFormat::Yaml)
    }
    fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::read_as(path, ConfigFormat::Yaml)
    }
    fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        self.write_as(path, ConfigFormat::Toml)
    }
    fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::read_as(path, ConfigFormat::Toml)
    }

    /// Write in the format implied by the file extension.
    fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let format = ConfigFormat::from_path(path.as_ref())?;
        self.write_as(path, format)
    }
    /// Read in the format implied by the file extension.
    fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let format = ConfigFormat::from_path(path.as_ref())?;
        Self::read_as(path, format)
    }
}
