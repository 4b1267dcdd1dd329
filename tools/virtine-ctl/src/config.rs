use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use virtine_coproc::{CoprocConfig, CoprocError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Invalid(#[from] CoprocError),
}

/// Values given on the command line (or through their environment variables); they take
/// precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub batch_factor: Option<u64>,
    pub memory_size: Option<u64>,
}

pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<CoprocConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => CoprocConfig::default(),
    };

    if let Some(batch_factor) = overrides.batch_factor {
        config.batch_factor = batch_factor;
    }
    if let Some(memory_size) = overrides.memory_size {
        config.memory_size = memory_size;
    }

    config.validate()?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<CoprocConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
