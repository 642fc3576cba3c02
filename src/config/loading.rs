//! Support for loading configs from multiple formats.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use snafu::{ResultExt, Snafu};

use super::TransformationConfig;

/// The format used to represent the configuration data.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Format {
    #[default]
    Toml,
    Json,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "toml" => Ok(Format::Toml),
            "json" => Ok(Format::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format = match self {
            Format::Toml => "toml",
            Format::Json => "json",
        };
        write!(f, "{format}")
    }
}

impl Format {
    /// Obtain the format from the file path using extension as a hint.
    pub fn from_path<T: AsRef<Path>>(path: T) -> Result<Self, T> {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(Format::Toml),
            Some("json") => Ok(Format::Json),
            _ => Err(path),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("Could not read {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Could not detect the format of {}; expected a .toml or .json file",
        path.display()
    ))]
    UnknownFormat { path: PathBuf },
    #[snafu(display("Invalid TOML: {source}"))]
    Toml { source: toml::de::Error },
    #[snafu(display("Invalid JSON: {source}"))]
    Json { source: serde_json::Error },
}

pub fn load_from_str(input: &str, format: Format) -> Result<TransformationConfig, ConfigError> {
    match format {
        Format::Toml => toml::from_str(input).context(TomlSnafu),
        Format::Json => serde_json::from_str(input).context(JsonSnafu),
    }
}

pub fn load_from_path(path: &Path) -> Result<TransformationConfig, ConfigError> {
    let format = Format::from_path(path).map_err(|path| ConfigError::UnknownFormat {
        path: path.to_owned(),
    })?;
    let input = fs::read_to_string(path).context(ReadSnafu { path })?;
    let config = load_from_str(&input, format)?;
    debug!(message = "Loaded configuration.", path = %path.display(), %format, steps = config.steps.len());
    Ok(config)
}
