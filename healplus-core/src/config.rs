//! Configuration loading for HealPlus clients.
//!
//! Every value has a local-development default. A TOML file (from
//! `--config <path>` or `HEALPLUS_CONFIG`) overrides the defaults, and the
//! `HEALPLUS_*` endpoint variables override the file.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "HEALPLUS_CONFIG";
pub const ENV_API_BASE: &str = "HEALPLUS_API_BASE";
pub const ENV_AI_BASE: &str = "HEALPLUS_AI_BASE";
pub const ENV_FHIR_BASE: &str = "HEALPLUS_FHIR_BASE";
pub const ENV_STORE_BASE: &str = "HEALPLUS_STORE_BASE";
pub const ENV_STORE_WS: &str = "HEALPLUS_STORE_WS";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub endpoints: EndpointConfig,
    pub cache: CacheSettings,
    pub analysis_poll: PollConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    /// Assessment backend.
    pub api_base: String,
    /// AI analysis service.
    pub ai_base: String,
    /// FHIR gateway; served by the assessment backend when unset.
    pub fhir_base: Option<String>,
    /// Document store HTTP endpoint.
    pub store_base: String,
    /// Document store push endpoint.
    pub store_ws: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:4000".to_string(),
            ai_base: "http://localhost:5000".to_string(),
            fhir_base: None,
            store_base: "http://localhost:8080".to_string(),
            store_ws: "ws://localhost:8080".to_string(),
        }
    }
}

impl EndpointConfig {
    pub fn fhir_base(&self) -> &str {
        self.fhir_base.as_deref().unwrap_or(&self.api_base)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// Default staleness tolerance for collection reads.
    pub stale_time_ms: u64,
    /// Capacity before least-recently-set eviction; unbounded when unset.
    pub max_entries: Option<usize>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            stale_time_ms: 5 * 60 * 1000,
            max_entries: None,
        }
    }
}

impl CacheSettings {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// Fixed delay between analysis polls.
    pub interval_ms: u64,
    /// Give up on the analysis after this long.
    pub max_wait_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            max_wait_ms: 60_000,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl ClientConfig {
    /// Defaults, then the config file if one was named, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_path_from_args().or_else(config_path_from_env) {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Override endpoints from `HEALPLUS_*` variables resolved by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = value;
            }
        };
        set(&mut self.endpoints.api_base, ENV_API_BASE);
        set(&mut self.endpoints.ai_base, ENV_AI_BASE);
        set(&mut self.endpoints.store_base, ENV_STORE_BASE);
        set(&mut self.endpoints.store_ws, ENV_STORE_WS);
        if let Some(value) = lookup(ENV_FHIR_BASE).filter(|v| !v.trim().is_empty()) {
            self.endpoints.fhir_base = Some(value);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let http_fields = [
            ("endpoints.api_base", self.endpoints.api_base.as_str()),
            ("endpoints.ai_base", self.endpoints.ai_base.as_str()),
            ("endpoints.fhir_base", self.endpoints.fhir_base()),
            ("endpoints.store_base", self.endpoints.store_base.as_str()),
        ];
        for (field, value) in http_fields {
            require_scheme(field, value, &["http://", "https://"])?;
        }
        require_scheme(
            "endpoints.store_ws",
            &self.endpoints.store_ws,
            &["ws://", "wss://"],
        )?;
        if self.cache.stale_time_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.stale_time_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.max_entries == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_entries",
                reason: "must be > 0 when set".to_string(),
            });
        }
        if self.analysis_poll.interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "analysis_poll.interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.analysis_poll.max_wait_ms < self.analysis_poll.interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "analysis_poll.max_wait_ms",
                reason: "must be >= interval_ms".to_string(),
            });
        }
        Ok(())
    }
}

fn require_scheme(field: &'static str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if !schemes.iter().any(|scheme| value.starts_with(scheme)) {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("must start with one of {:?}", schemes),
        });
    }
    Ok(())
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_point_at_local_services() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoints.api_base, "http://localhost:4000");
        assert_eq!(config.endpoints.ai_base, "http://localhost:5000");
        assert_eq!(config.endpoints.fhir_base(), "http://localhost:4000");
        assert_eq!(config.cache.stale_time(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_endpoints() {
        let env: HashMap<&str, &str> = [
            (ENV_API_BASE, "https://api.healplus.app"),
            (ENV_AI_BASE, "https://ai.healplus.app"),
            (ENV_STORE_WS, ""),
        ]
        .into_iter()
        .collect();
        let mut config = ClientConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.endpoints.api_base, "https://api.healplus.app");
        assert_eq!(config.endpoints.ai_base, "https://ai.healplus.app");
        // FHIR follows the API base unless set explicitly.
        assert_eq!(config.endpoints.fhir_base(), "https://api.healplus.app");
        // Empty variables are ignored.
        assert_eq!(config.endpoints.store_ws, "ws://localhost:8080");
    }

    #[test]
    fn test_from_path_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[cache]\nstale_time_ms = 1000\nmax_entries = 100\n\n[analysis_poll]\ninterval_ms = 500\nmax_wait_ms = 5000"
        )
        .unwrap();
        let config = ClientConfig::from_path(file.path()).unwrap();
        assert_eq!(config.cache.max_entries, Some(100));
        assert_eq!(config.analysis_poll.interval(), Duration::from_millis(500));
        assert_eq!(config.endpoints, EndpointConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nttl = 5").unwrap();
        assert!(matches!(
            ClientConfig::from_path(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.endpoints.store_ws = "http://localhost:8080".to_string();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.analysis_poll.max_wait_ms = 10;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.cache.max_entries = Some(0);
        assert!(config.validate().is_err());
    }
}
