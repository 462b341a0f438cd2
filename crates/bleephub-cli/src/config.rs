//! Server configuration.
//!
//! Layered lowest to highest: built-in defaults, an optional config file,
//! `BPH_*` environment variables, then command-line flags.

use bleephub_scheduler::SchedulerConfig;
use bleephub_scheduler::actions::DEFAULT_GITHUB_API_URL;
use bleephub_scheduler::message::FALLBACK_IMAGE;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "BPH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub addr: String,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Zero means unlimited.
    pub max_concurrent_workflows: usize,
    pub timeout_sweep_secs: u64,
    pub default_timeout_minutes: u32,
    pub default_image: String,
    /// Upstream for action tarballs.
    pub github_api_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5555".to_string(),
            tls_cert: None,
            tls_key: None,
            max_concurrent_workflows: 0,
            timeout_sweep_secs: 30,
            default_timeout_minutes: 360,
            default_image: FALLBACK_IMAGE.to_string(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
        }
    }
}

/// Values given on the command line; each one beats every other layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub addr: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl ServerConfig {
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        Self::load_with_env(overrides, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(overrides: &Overrides, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = &overrides.config_file {
            builder = builder.add_source(File::from(path.as_path()));
        }
        builder = builder.add_source(env.try_parsing(true));

        let mut config: ServerConfig = builder.build()?.try_deserialize()?;
        if let Some(addr) = &overrides.addr {
            config.addr = addr.clone();
        }
        if let Some(cert) = &overrides.tls_cert {
            config.tls_cert = Some(cert.clone());
        }
        if let Some(key) = &overrides.tls_key {
            config.tls_key = Some(key.clone());
        }
        Ok(config)
    }

    /// Certificate and key, when both are configured.
    pub fn tls_files(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_cert.as_ref().zip(self.tls_key.as_ref())
    }

    pub fn timeout_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_sweep_secs.max(1))
    }
}

impl From<&ServerConfig> for SchedulerConfig {
    fn from(config: &ServerConfig) -> Self {
        SchedulerConfig {
            max_concurrent_workflows: config.max_concurrent_workflows,
            default_timeout_minutes: config.default_timeout_minutes,
            default_image: config.default_image.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn defaults_without_any_source() {
        let config = ServerConfig::load_with_env(&Overrides::default(), env(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.addr, "0.0.0.0:5555");
        assert!(config.tls_files().is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = ServerConfig::load_with_env(
            &Overrides::default(),
            env(&[
                ("BPH_ADDR", "127.0.0.1:6000"),
                ("BPH_MAX_CONCURRENT_WORKFLOWS", "4"),
                ("BPH_TLS_CERT", "/certs/tls.crt"),
                ("BPH_TLS_KEY", "/certs/tls.key"),
            ]),
        )
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:6000");
        assert_eq!(config.max_concurrent_workflows, 4);
        assert!(config.tls_files().is_some());
    }

    #[test]
    fn flags_beat_environment() {
        let overrides = Overrides {
            addr: Some("127.0.0.1:7000".to_string()),
            ..Default::default()
        };
        let config =
            ServerConfig::load_with_env(&overrides, env(&[("BPH_ADDR", "127.0.0.1:6000")]))
                .unwrap();
        assert_eq!(config.addr, "127.0.0.1:7000");
    }

    #[test]
    fn tls_needs_both_files() {
        let config = ServerConfig {
            tls_cert: Some(PathBuf::from("/certs/tls.crt")),
            ..Default::default()
        };
        assert!(config.tls_files().is_none());
    }

    #[test]
    fn scheduler_settings_carry_over() {
        let config = ServerConfig {
            max_concurrent_workflows: 2,
            default_timeout_minutes: 5,
            ..Default::default()
        };
        let scheduler = SchedulerConfig::from(&config);
        assert_eq!(scheduler.max_concurrent_workflows, 2);
        assert_eq!(scheduler.default_timeout_minutes, 5);
        assert_eq!(scheduler.default_image, FALLBACK_IMAGE);
    }
}
