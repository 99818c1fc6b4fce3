//! `flowgate.toml` configuration parser.
//!
//! The file is read once at startup and the resulting [`BrokerConfig`] is
//! passed by value into the store, platform, and broker constructors.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::Catalog;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub broker: BrokerSection,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub backends: BackendPoolConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(rename = "services", default)]
    pub catalog: Catalog,
}

/// Credentials and local storage for the broker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    pub username: String,
    pub password: String,
    pub data_dir: PathBuf,
    /// Static files copied into every staging directory before upload.
    pub assets_dir: Option<PathBuf>,
}

/// Whether callers may pass parameters to each lifecycle verb.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub allow_user_provision_parameters: bool,
    pub allow_user_update_parameters: bool,
    pub allow_user_bind_parameters: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_user_provision_parameters: true,
            allow_user_update_parameters: true,
            allow_user_bind_parameters: true,
        }
    }
}

/// Port pool handed out to bound backends, `[port_base, port_base + pool_size)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendPoolConfig {
    pub port_base: u16,
    pub pool_size: u16,
}

impl Default for BackendPoolConfig {
    fn default() -> Self {
        Self {
            port_base: 8001,
            pool_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Platform application name is `{app_name_prefix}{instance_id}`.
    pub app_name_prefix: String,
    /// Scope reference used by plans with `use_system_space`.
    pub system_scope: String,
    /// Deadline for a blue-green candidate to reach `Running`.
    pub health_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            app_name_prefix: "nginx-flow-".to_string(),
            system_scope: "system".to_string(),
            health_timeout_secs: 90,
            poll_interval_ms: 2000,
        }
    }
}

impl DeploymentConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn app_name(&self, instance_id: &str) -> String {
        format!("{}{instance_id}", self.app_name_prefix)
    }
}

/// Seed data for the in-process simulated platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub shared_domains: Vec<String>,
    pub scopes: Vec<ScopeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub guid: String,
    pub name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BrokerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BrokerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.username.is_empty() {
            return Err(ConfigError::Invalid("broker.username must not be empty".into()));
        }
        if self.broker.password.is_empty() {
            return Err(ConfigError::Invalid("broker.password must not be empty".into()));
        }
        if self.backends.pool_size == 0 {
            return Err(ConfigError::Invalid("backends.pool_size must be positive".into()));
        }
        if u32::from(self.backends.port_base) + u32::from(self.backends.pool_size) > 65536 {
            return Err(ConfigError::Invalid(format!(
                "backend pool {}+{} exceeds the port range",
                self.backends.port_base, self.backends.pool_size
            )));
        }
        if self.deployment.health_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "deployment.health_timeout_secs must be positive".into(),
            ));
        }
        if self.deployment.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "deployment.poll_interval_ms must be positive".into(),
            ));
        }

        let mut service_ids = HashSet::new();
        for service in self.catalog.services() {
            if !service_ids.insert(service.id.to_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate service id {}",
                    service.id
                )));
            }
            let mut plan_ids = HashSet::new();
            for plan in &service.plans {
                if !plan_ids.insert(plan.id.to_lowercase()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate plan id {} in service {}",
                        plan.id, service.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Path of the redb file holding instance records.
    pub fn database_path(&self) -> PathBuf {
        self.broker.data_dir.join("flowgate.redb")
    }

    /// Root under which each instance gets its own staging directory.
    pub fn staging_root(&self) -> PathBuf {
        self.broker.data_dir.join("staging")
    }
}
