//! Root config for the control plane binary, composed from each
//! subsystem's own config fragments the way `cloud_service::config::
//! CloudServiceConfig` composes `DbConfig`/`RemoteServiceConfig`/
//! `TracingConfig`. Loaded through [`hexabase_common::config::ConfigLoader`]
//! (TOML file, then `HEXABASE_`-prefixed env vars).

use hexabase_common::config::{ConfigLoader, DbConfig, RemoteServiceConfig, TracingConfig};
use hexabase_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HexabaseServerConfig {
    pub tracing: TracingConfig,
    pub db: DbConfig,
    pub cache: RemoteServiceConfig,
    pub bus: RemoteServiceConfig,
    pub oidc_providers: HashMap<String, OidcProviderConfig>,
    pub worker: WorkerConfig,
}

impl Default for HexabaseServerConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("hexabase-server"),
            db: DbConfig::default(),
            cache: RemoteServiceConfig {
                host: "localhost".to_string(),
                port: 6379,
                ..RemoteServiceConfig::default()
            },
            bus: RemoteServiceConfig {
                host: "localhost".to_string(),
                port: 6379,
                ..RemoteServiceConfig::default()
            },
            oidc_providers: HashMap::new(),
            worker: WorkerConfig::default(),
        }
    }
}

impl SafeDisplay for HexabaseServerConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "db:");
        let _ = writeln!(&mut result, "{}", self.db.to_safe_string_indented());
        let _ = writeln!(&mut result, "cache:");
        let _ = writeln!(&mut result, "{}", self.cache.to_safe_string_indented());
        let _ = writeln!(&mut result, "bus:");
        let _ = writeln!(&mut result, "{}", self.bus.to_safe_string_indented());
        let _ = writeln!(&mut result, "oidc_providers: {} configured", self.oidc_providers.len());
        let _ = writeln!(&mut result, "worker:");
        let _ = writeln!(&mut result, "{}", self.worker.to_safe_string_indented());
        result
    }
}

/// Mirrors [`hexabase_identity::oidc::ExternalProviderConfig`], kept as a
/// separate (de)serializable type since that one deliberately isn't —
/// bootstrap converts one into the other.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OidcProviderConfig {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl SafeDisplay for OidcProviderConfig {
    fn to_safe_string(&self) -> String {
        format!("issuer_url: {}\nclient_id: {}\nclient_secret: ****", self.issuer_url, self.client_id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "hexabase-server".to_string(),
            concurrency: 4,
            poll_interval: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(20),
        }
    }
}

impl SafeDisplay for WorkerConfig {
    fn to_safe_string(&self) -> String {
        format!(
            "worker_id: {}\nconcurrency: {}\npoll_interval: {:?}\nheartbeat_interval: {:?}",
            self.worker_id, self.concurrency, self.poll_interval, self.heartbeat_interval
        )
    }
}

pub fn make_config_loader() -> ConfigLoader<HexabaseServerConfig> {
    ConfigLoader::new(Path::new(
        &std::env::var("HEXABASE_CONFIG_FILE").unwrap_or_else(|_| "config/hexabase-server.toml".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn default_config_redacts_db_password() {
        let cfg = HexabaseServerConfig::default();
        assert!(!cfg.to_safe_string().contains(&cfg.db.password));
    }
}
