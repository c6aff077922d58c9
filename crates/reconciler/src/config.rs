//! Provider configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::r#loop::LoopConfig;
use crate::reconciler::ReconcilerConfig;

/// Environment variable overriding the provider endpoint.
pub const ENV_ENDPOINT: &str = "GRPC_ENDPOINT";
/// Environment variable enabling transport security.
pub const ENV_USE_TLS: &str = "GRPC_USE_TLS";
/// Environment variable naming the certificate file.
pub const ENV_TLS_CERT_PATH: &str = "GRPC_TLS_CERT_PATH";
/// Environment variable naming the private key file.
pub const ENV_TLS_KEY_PATH: &str = "GRPC_TLS_KEY_PATH";

/// Transport security material for the provider endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

/// Configuration for the provider process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Seconds between steady-state reconciles of one resource.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum concurrent reconciles.
    #[serde(default = "default_max_reconcile_rate")]
    pub max_reconcile_rate: usize,

    /// Whether only the elected leader reconciles.
    #[serde(default = "default_leader_election")]
    pub leader_election: bool,

    /// Address of the external-collaborator endpoint.
    #[serde(default = "default_provider_endpoint")]
    pub provider_endpoint: String,

    #[serde(default)]
    pub tls: TlsConfig,

    /// Deadline for one reconcile attempt, in seconds.
    #[serde(default = "default_reconcile_timeout_secs")]
    pub reconcile_timeout_secs: u64,

    /// Delay after the first failure, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on the failure delay, in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_reconcile_rate: default_max_reconcile_rate(),
            leader_election: default_leader_election(),
            provider_endpoint: default_provider_endpoint(),
            tls: TlsConfig::default(),
            reconcile_timeout_secs: default_reconcile_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl ProviderConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the file cannot be read or
    /// parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on malformed TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `GRPC_USE_TLS` is not a boolean.
    pub fn with_env(self) -> Result<Self> {
        self.with_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `GRPC_USE_TLS` is not a boolean.
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|v| !v.is_empty()) {
            self.provider_endpoint = endpoint;
        }
        if let Some(value) = lookup(ENV_USE_TLS).filter(|v| !v.is_empty()) {
            self.tls.use_tls = parse_bool(&value).ok_or_else(|| {
                Error::invalid_config(format!("{ENV_USE_TLS} must be a boolean, got {value:?}"))
            })?;
        }
        if let Some(path) = lookup(ENV_TLS_CERT_PATH).filter(|v| !v.is_empty()) {
            self.tls.cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(ENV_TLS_KEY_PATH).filter(|v| !v.is_empty()) {
            self.tls.key_path = Some(PathBuf::from(path));
        }
        Ok(self)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.max_reconcile_rate == 0 {
            return Err(Error::invalid_config("max_reconcile_rate must be at least 1"));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::invalid_config("poll_interval_secs must be positive"));
        }
        if self.reconcile_timeout_secs == 0 {
            return Err(Error::invalid_config("reconcile_timeout_secs must be positive"));
        }
        if self.backoff_base_ms == 0 {
            return Err(Error::invalid_config("backoff_base_ms must be positive"));
        }
        if Duration::from_secs(self.max_backoff_secs) < self.backoff_base() {
            return Err(Error::invalid_config(
                "max_backoff_secs must not be shorter than backoff_base_ms",
            ));
        }
        if self.provider_endpoint.trim().is_empty() {
            return Err(Error::invalid_config("provider_endpoint must not be empty"));
        }
        if self.tls.use_tls && (self.tls.cert_path.is_none() || self.tls.key_path.is_none()) {
            return Err(Error::invalid_config(
                "TLS requires both a certificate and a key path",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub const fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Loop settings derived from this configuration.
    #[must_use]
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            poll_interval: self.poll_interval(),
            max_concurrent: self.max_reconcile_rate,
            backoff_base: self.backoff_base(),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            ..LoopConfig::default()
        }
    }

    /// Reconciler settings derived from this configuration.
    #[must_use]
    pub const fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

const fn default_poll_interval_secs() -> u64 {
    60
}

const fn default_max_reconcile_rate() -> usize {
    10
}

const fn default_leader_election() -> bool {
    true
}

fn default_provider_endpoint() -> String {
    ":50051".to_string()
}

const fn default_reconcile_timeout_secs() -> u64 {
    30
}

const fn default_backoff_base_ms() -> u64 {
    500
}

const fn default_max_backoff_secs() -> u64 {
    300
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.max_reconcile_rate, 10);
        assert!(config.leader_election);
        assert_eq!(config.provider_endpoint, ":50051");
        assert!(!config.tls.use_tls);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let config = ProviderConfig::from_toml(
            r#"
poll_interval_secs = 5
provider_endpoint = "localhost:9000"

[tls]
use_tls = false
"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.provider_endpoint, "localhost:9000");
        assert_eq!(config.max_reconcile_rate, 10);
        assert_eq!(config.reconcile_timeout_secs, 30);
    }

    #[test]
    fn test_malformed_toml() {
        let result = ProviderConfig::from_toml("poll_interval_secs = \"soon\"");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_reconcile_rate = 3").unwrap();
        let config = ProviderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_reconcile_rate, 3);
        assert_eq!(config.loop_config().max_concurrent, 3);
    }

    #[test]
    fn test_env_overrides() {
        let config = ProviderConfig::default()
            .with_env_from(env(&[
                (ENV_ENDPOINT, "provider:443"),
                (ENV_USE_TLS, "true"),
                (ENV_TLS_CERT_PATH, "/tls/tls.crt"),
                (ENV_TLS_KEY_PATH, "/tls/tls.key"),
            ]))
            .unwrap();
        assert_eq!(config.provider_endpoint, "provider:443");
        assert!(config.tls.use_tls);
        assert_eq!(config.tls.cert_path, Some(PathBuf::from("/tls/tls.crt")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_rejects_bad_bool() {
        let result = ProviderConfig::default().with_env_from(env(&[(ENV_USE_TLS, "sometimes")]));
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects() {
        let zero_rate = ProviderConfig {
            max_reconcile_rate: 0,
            ..ProviderConfig::default()
        };
        assert!(zero_rate.validate().is_err());

        let zero_poll = ProviderConfig {
            poll_interval_secs: 0,
            ..ProviderConfig::default()
        };
        assert!(zero_poll.validate().is_err());

        let tls_without_key = ProviderConfig {
            tls: TlsConfig {
                use_tls: true,
                cert_path: Some(PathBuf::from("/tls/tls.crt")),
                key_path: None,
            },
            ..ProviderConfig::default()
        };
        assert!(tls_without_key.validate().is_err());
    }

    #[test]
    fn test_derived_settings() {
        let config = ProviderConfig::default();
        let loop_config = config.loop_config();
        assert_eq!(loop_config.poll_interval, Duration::from_secs(60));
        assert_eq!(loop_config.backoff_base, Duration::from_millis(500));
        assert_eq!(loop_config.max_backoff, Duration::from_secs(300));
        assert_eq!(
            config.reconciler_config().reconcile_timeout,
            Duration::from_secs(30)
        );
    }
}
