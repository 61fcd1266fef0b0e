//! Reading config files.
//!
//! The format follows the file extension: `.toml`, `.yaml`/`.yml` or `.json`/`.jsonc`.
//! JSON files may carry `//` and `/* */` comments.

use std::{fs, path::Path};

use crate::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format, expected .toml, .yaml, .yml, .json or .jsonc")]
    UnsupportedFormat,
    #[error("invalid config: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" | "jsonc" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

/// Load and deserialize a config file. Missing fields take their defaults.
///
/// The extension is checked before the file is read.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let format = Format::from_path(path).ok_or(ConfigError::UnsupportedFormat)?;
    let data = fs::read_to_string(path)?;
    parse(&data, format)
}

fn parse(data: &str, format: Format) -> Result<Config, ConfigError> {
    let config = match format {
        Format::Json => {
            serde_json::from_reader(json_comments::StripComments::new(data.as_bytes()))?
        }
        Format::Yaml => serde_yaml::from_str(data)?,
        Format::Toml => toml::from_str(data)?,
    };
    Ok(config)
}
