//! Configuration loading.

use std::path::Path;

use thiserror::Error;

use crate::WebrunnerConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Load a configuration file. A missing file yields the default
/// configuration; a present but invalid file is an error.
pub fn load_config(path: impl AsRef<Path>) -> Result<WebrunnerConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(WebrunnerConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config("/nonexistent/webrunner.yaml").expect("defaults");
        assert_eq!(config.executor.max_retries, 2);
    }
}
