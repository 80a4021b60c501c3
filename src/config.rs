// src/config.rs

//! Configuration loading utilities.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file is absent; a present but
/// malformed file is an error so typos do not silently vanish.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }

    let raw = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate, mapping any failure to a configuration error.
///
/// Used by the CLI so that every startup problem surfaces as exit code 1.
pub fn load_required(path: &Path) -> Result<Config> {
    load_config(path).map_err(|e| match e {
        AppError::Config(_) => e,
        other => AppError::config(format!("failed to load {}: {other}", path.display())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/stockwatch.toml")).unwrap();
        assert_eq!(config.scheduler.check_interval, 180);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile_path("bad.toml");
        writeln!(file.1, "[scheduler\ncheck_interval = 60").unwrap();
        assert!(load_config(&file.0).is_err());
        let _ = std::fs::remove_file(&file.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile_path("invalid.toml");
        writeln!(file.1, "[scheduler]\nmax_workers = 0").unwrap();
        assert!(load_config(&file.0).is_err());
        let _ = std::fs::remove_file(&file.0);
    }

    fn tempfile_path(name: &str) -> (std::path::PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!("stockwatch-test-{}-{name}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
