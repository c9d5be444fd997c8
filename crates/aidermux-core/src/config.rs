//! Configuration for the multiplexer
//!
//! Loaded from a TOML file when present, otherwise defaults. Model-name
//! selection is intentionally absent; the assistant command line is passed
//! through as-is.

use std::path::Path;

use serde::Deserialize;

use crate::error::{MuxError, Result};

/// Default guard for "add every file under a directory" requests.
const DEFAULT_MAX_DIR_FILES: usize = 100;

/// Pattern matching the assistant's input prompt at the tail of output.
/// A bare `>` or a mode-prefixed one (`ask>`, `architect>`).
const DEFAULT_PROMPT_PATTERN: &str = r"(?m)^[a-z-]*>\s?$";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Assistant executable.
    pub command: String,
    /// Arguments always passed to the assistant.
    pub args: Vec<String>,
    /// Regex that marks end-of-response on the output stream.
    pub prompt_pattern: String,
    /// Reject directory adds with more candidate files than this.
    pub max_dir_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: "aider".to_string(),
            args: Vec::new(),
            prompt_pattern: DEFAULT_PROMPT_PATTERN.to_string(),
            max_dir_files: DEFAULT_MAX_DIR_FILES,
        }
    }
}

impl Config {
    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| MuxError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.command, "aider");
        assert!(config.args.is_empty());
        assert_eq!(config.max_dir_files, 100);
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aidermux.toml");
        std::fs::write(&path, "command = \"aider\"\nmax_dir_files = 12\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_dir_files, 12);
        // Unspecified keys keep their defaults
        assert_eq!(config.prompt_pattern, Config::default().prompt_pattern);
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aidermux.toml");
        std::fs::write(&path, "modle = \"gpt\"\n").unwrap();

        assert!(Config::load(&path).is_err());
    }
}
