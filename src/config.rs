//! Evaluation configuration
//!
//! Settings shared by every evaluation an [`crate::interp::Interpreter`]
//! performs. Loaded from JSON by the CLI, constructed directly by embedders.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Configuration for evaluating programs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Maximum nesting of recursive node visits before evaluation aborts
    /// with a fatal `RecursionLimit`.
    pub max_recursion_depth: usize,

    /// Keep polling detached race/timeout losers after the result is known,
    /// returning only once they have all finished.
    pub drain_detached: bool,

    /// Enable the per-evaluation memo cache.
    pub cache: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 10_000,
            drain_detached: false,
            cache: true,
        }
    }
}

impl EvalConfig {
    /// Load configuration from a JSON file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Write configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EvalConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EvalConfig::default());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("eval.json");
        std::fs::write(&path, br#"{"drain_detached": true}"#).unwrap();
        let config = EvalConfig::load(&path).unwrap();
        assert!(config.drain_detached);
        assert_eq!(config.max_recursion_depth, 10_000);

        let saved = dir.path().join("nested/out.json");
        config.save(&saved).unwrap();
        assert_eq!(EvalConfig::load(&saved).unwrap(), config);
    }
}
