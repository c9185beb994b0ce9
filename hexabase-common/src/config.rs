use crate::safe_display::SafeDisplay;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Marker bound every config root must satisfy to go through [`ConfigLoader`].
pub trait ConfigLoaderConfig: Serialize + DeserializeOwned + Default {}
impl<T: Serialize + DeserializeOwned + Default> ConfigLoaderConfig for T {}

pub struct ConfigExample<T>(pub &'static str, pub T);

/// Self-documenting default configs a binary can print with `--dump-config`,
/// mirroring the teacher's `HasConfigExamples`.
pub trait HasConfigExamples<T> {
    fn examples() -> Vec<ConfigExample<T>>;
}

/// Loads `T` by layering, in increasing priority: `T::default()`, the TOML
/// file at `config_file_name`, then environment variables prefixed
/// `HEXABASE_` (double-underscore separated for nesting, e.g.
/// `HEXABASE_DB__HOST`). Matches `golem_common::config::ConfigLoader` as
/// used throughout the teacher (`cloud_service::config::make_config_loader`).
pub struct ConfigLoader<T> {
    pub config_file_name: PathBuf,
    _marker: std::marker::PhantomData<T>,
}

impl<T: ConfigLoaderConfig> ConfigLoader<T> {
    pub fn new(config_file_name: &Path) -> Self {
        Self {
            config_file_name: config_file_name.to_path_buf(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn load(&self) -> figment::Result<T> {
        Figment::new()
            .merge(Serialized::defaults(T::default()))
            .merge(Toml::file(&self.config_file_name))
            .merge(Env::prefixed("HEXABASE_").split("__"))
            .extract()
    }

    /// If `--dump-config` (or `HEXABASE_DUMP_CONFIG=1`) is set, prints the
    /// effective config as TOML and returns `None`; otherwise loads and
    /// returns `Some`. Panics on load failure, matching the teacher's
    /// startup-time config validation.
    pub fn load_or_dump_config(&self) -> Option<T> {
        if std::env::args().any(|a| a == "--dump-config")
            || std::env::var("HEXABASE_DUMP_CONFIG").is_ok()
        {
            let config = self.load().expect("failed to load config for dumping");
            println!(
                "{}",
                toml::to_string_pretty(&config).expect("failed to serialize config")
            );
            None
        } else {
            Some(self.load().expect("failed to load config"))
        }
    }
}

#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
    pub schema: Option<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "hexabase".to_string(),
            username: "hexabase".to_string(),
            password: "hexabase".to_string(),
            max_connections: 10,
            schema: None,
        }
    }
}

impl SafeDisplay for DbConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "host: {}", self.host);
        let _ = writeln!(&mut result, "port: {}", self.port);
        let _ = writeln!(&mut result, "database: {}", self.database);
        let _ = writeln!(&mut result, "username: {}", self.username);
        let _ = writeln!(&mut result, "password: ****");
        let _ = writeln!(&mut result, "max_connections: {}", self.max_connections);
        result
    }
}

impl DbConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

/// Config for an external HTTP/gRPC collaborator (virtualization API, host
/// cluster proxy, ...), matching `cloud_common::clients::RemoteServiceConfig`.
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct RemoteServiceConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: std::time::Duration,
    pub retries: crate::retry::RetryConfig,
}

impl Default for RemoteServiceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8443,
            connect_timeout: std::time::Duration::from_secs(10),
            request_timeout: std::time::Duration::from_secs(30),
            retries: crate::retry::RetryConfig::default(),
        }
    }
}

impl SafeDisplay for RemoteServiceConfig {
    fn to_safe_string(&self) -> String {
        format!(
            "host: {}\nport: {}\nconnect_timeout: {:?}\nrequest_timeout: {:?}",
            self.host, self.port, self.connect_timeout, self.request_timeout
        )
    }
}

#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    pub json: bool,
    pub otlp_endpoint: Option<String>,
}

impl TracingConfig {
    pub fn local_dev(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            json: false,
            otlp_endpoint: None,
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::local_dev("hexabase-service")
    }
}

impl SafeDisplay for TracingConfig {
    fn to_safe_string(&self) -> String {
        format!(
            "service_name: {}\njson: {}\notlp_endpoint: {:?}",
            self.service_name, self.json, self.otlp_endpoint
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn db_config_safe_string_redacts_password() {
        let cfg = DbConfig::default();
        assert!(!cfg.to_safe_string().contains(&cfg.password));
    }
}
