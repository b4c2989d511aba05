//! Configuration
//!
//! Sources, later ones win:
//!
//! 1. Built-in defaults
//! 2. A TOML file: `$CERTMAN_CONFIG`, or `certman.toml` in the working
//!    directory if it exists
//! 3. Environment variables `CERTMAN_STORE_PATH`, `CERTMAN_LOG_LEVEL`,
//!    `CERTMAN_SCHEME`, `CERTMAN_KEM`, `CERTMAN_OPERATOR_SERIAL`
//!
//! ```toml
//! store_path = "/var/lib/certman/certman.store"
//! log_level = "debug"
//! scheme = "ed25519"
//! kem = "x25519"
//! operator_serial = 3
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use certman_core::{KemKind, SchemeKind};
use serde::Deserialize;
use thiserror::Error;
use tracing::Level;

pub const CONFIG_PATH_VAR: &str = "CERTMAN_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "certman.toml";
pub const DEFAULT_STORE_FILE: &str = "certman.store";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Raw file contents; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    store_path: Option<PathBuf>,
    log_level: Option<String>,
    scheme: Option<String>,
    kem: Option<String>,
    operator_serial: Option<u64>,
}

/// One layer of settings before validation
#[derive(Debug, Default)]
struct Overrides {
    store_path: Option<PathBuf>,
    log_level: Option<String>,
    scheme: Option<String>,
    kem: Option<String>,
    operator_serial: Option<String>,
}

impl From<FileConfig> for Overrides {
    fn from(file: FileConfig) -> Self {
        Self {
            store_path: file.store_path,
            log_level: file.log_level,
            scheme: file.scheme,
            kem: file.kem,
            operator_serial: file.operator_serial.map(|s| s.to_string()),
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertmanConfig {
    /// Store file location
    pub store_path: PathBuf,
    /// Log verbosity
    pub log_level: Level,
    /// Signature scheme for new keys
    pub scheme: SchemeKind,
    /// Key agreement scheme for new encryption certificates
    pub kem: KemKind,
    /// Certificate the operator acts as; commands are checked against its
    /// `no-read` / `no-write` flags when set
    pub operator_serial: Option<u64>,
}

impl Default for CertmanConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_FILE),
            log_level: Level::INFO,
            scheme: SchemeKind::Ed25519,
            kem: KemKind::X25519,
            operator_serial: None,
        }
    }
}

impl CertmanConfig {
    /// Load from the process environment and the config file it points at
    pub fn load() -> Result<Self, ConfigError> {
        let file = match env::var_os(CONFIG_PATH_VAR) {
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };
        Self::from_sources(file.as_deref(), |key| env::var(key).ok())
    }

    /// Build from an optional file plus a variable lookup
    pub fn from_sources(
        file: Option<&Path>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = file {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let parsed: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            config.apply(parsed.into())?;
        }

        config.apply(Overrides {
            store_path: var("CERTMAN_STORE_PATH").map(PathBuf::from),
            log_level: var("CERTMAN_LOG_LEVEL"),
            scheme: var("CERTMAN_SCHEME"),
            kem: var("CERTMAN_KEM"),
            operator_serial: var("CERTMAN_OPERATOR_SERIAL"),
        })?;
        Ok(config)
    }

    fn apply(&mut self, overrides: Overrides) -> Result<(), ConfigError> {
        let Overrides {
            store_path,
            log_level,
            scheme,
            kem,
            operator_serial,
        } = overrides;

        if let Some(path) = store_path {
            self.store_path = path;
        }
        if let Some(level) = log_level {
            self.log_level = level.parse().map_err(|_| ConfigError::InvalidValue {
                key: "log_level",
                value: level,
            })?;
        }
        if let Some(scheme) = scheme {
            self.scheme = scheme.parse().map_err(|_| ConfigError::InvalidValue {
                key: "scheme",
                value: scheme,
            })?;
        }
        if let Some(kem) = kem {
            self.kem = kem.parse().map_err(|_| ConfigError::InvalidValue {
                key: "kem",
                value: kem,
            })?;
        }
        if let Some(serial) = operator_serial {
            self.operator_serial = Some(serial.trim().parse().map_err(|_| {
                ConfigError::InvalidValue {
                    key: "operator_serial",
                    value: serial,
                }
            })?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CertmanConfig::from_sources(None, vars(&[])).unwrap();

        assert_eq!(config, CertmanConfig::default());
        assert_eq!(config.store_path, PathBuf::from("certman.store"));
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.scheme, SchemeKind::Ed25519);
        assert_eq!(config.kem, KemKind::X25519);
        assert_eq!(config.operator_serial, None);
    }

    #[test]
    fn test_file_then_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certman.toml");
        fs::write(
            &path,
            "store_path = \"/srv/ca.store\"\nlog_level = \"debug\"\nkem = \"x25519\"\noperator_serial = 3\n",
        )
        .unwrap();

        let config = CertmanConfig::from_sources(
            Some(&path),
            vars(&[("CERTMAN_OPERATOR_SERIAL", "5"), ("CERTMAN_KEM", "kyber1024")]),
        )
        .unwrap();

        assert_eq!(config.store_path, PathBuf::from("/srv/ca.store"));
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.kem, KemKind::Kyber1024);
        assert_eq!(config.operator_serial, Some(5));
    }

    #[test]
    fn test_invalid_values() {
        let err = CertmanConfig::from_sources(None, vars(&[("CERTMAN_SCHEME", "rsa")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "scheme", .. }));

        let err = CertmanConfig::from_sources(None, vars(&[("CERTMAN_KEM", "rsa")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "kem", .. }));

        let err = CertmanConfig::from_sources(None, vars(&[("CERTMAN_LOG_LEVEL", "loud")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "log_level", .. }));

        let err = CertmanConfig::from_sources(None, vars(&[("CERTMAN_OPERATOR_SERIAL", "-1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "operator_serial", .. }));
    }

    #[test]
    fn test_unknown_file_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certman.toml");
        fs::write(&path, "port = 8080\n").unwrap();

        let err = CertmanConfig::from_sources(Some(&path), vars(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = CertmanConfig::from_sources(Some(Path::new("/nonexistent/certman.toml")), vars(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
