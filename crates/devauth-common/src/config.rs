//! Runtime configuration for the protocol core.
//!
//! Loaded from a JSON file; every field has a default so a partial file
//! (or none at all) is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{PakeAlg, DEFAULT_KEY_LENGTH, MAX_KEY_LENGTH, MIN_KEY_LENGTH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevAuthConfig {
    /// Maximum number of in-flight exchanges in a task table.
    pub max_tasks: usize,
    /// Exchanges idle for longer than this are evicted.
    pub task_timeout_secs: u64,
    /// Session key length used when the caller does not request one.
    pub default_key_length: usize,
    /// PAKE algorithm families offered or accepted, by name.
    pub pake_algorithms: Vec<String>,
}

impl Default for DevAuthConfig {
    fn default() -> Self {
        Self {
            max_tasks: 64,
            task_timeout_secs: 60,
            default_key_length: DEFAULT_KEY_LENGTH,
            pake_algorithms: vec!["EC_SPEKE".to_string(), "PSK_SPEKE".to_string()],
        }
    }
}

impl DevAuthConfig {
    /// Read and validate a configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tasks == 0 {
            return Err(Error::config("max_tasks must be non-zero"));
        }
        if self.task_timeout_secs == 0 {
            return Err(Error::config("task_timeout_secs must be non-zero"));
        }
        if !(MIN_KEY_LENGTH..=MAX_KEY_LENGTH).contains(&self.default_key_length) {
            return Err(Error::config(format!(
                "default_key_length must be within {MIN_KEY_LENGTH}..={MAX_KEY_LENGTH}, got {}",
                self.default_key_length
            )));
        }
        let algs = self.pake_alg()?;
        if !algs.contains(PakeAlg::EC_SPEKE) {
            return Err(Error::config("pake_algorithms must include EC_SPEKE"));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Configured algorithm names folded into a flag set. Names are the
    /// flag identifiers (`EC_SPEKE`, `PSK_SPEKE`).
    pub fn pake_alg(&self) -> Result<PakeAlg> {
        self.pake_algorithms
            .iter()
            .try_fold(PakeAlg::empty(), |acc, name| {
                let alg = PakeAlg::from_name(name)
                    .ok_or_else(|| Error::unknown_value(format!("pake algorithm {name}")))?;
                Ok(acc | alg)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = DevAuthConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.pake_alg().unwrap(),
            PakeAlg::EC_SPEKE | PakeAlg::PSK_SPEKE
        );
        assert_eq!(config.task_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_tasks": 8}}"#).unwrap();

        let config = DevAuthConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_tasks, 8);
        assert_eq!(config.default_key_length, DEFAULT_KEY_LENGTH);
    }

    #[test]
    fn test_rejects_out_of_range_key_length() {
        let config = DevAuthConfig {
            default_key_length: MAX_KEY_LENGTH + 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_missing_ec_speke() {
        let config = DevAuthConfig {
            pake_algorithms: vec!["PSK_SPEKE".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let config = DevAuthConfig {
            pake_algorithms: vec!["EC_SPEKE".to_string(), "DL_SPEKE".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::UnknownValue(_))));
    }

    #[test]
    fn test_malformed_file_is_serialization_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            DevAuthConfig::from_json_file(file.path()),
            Err(Error::Serialization(_))
        ));
    }
}
