//! Server configuration loaded from a TOML file.
//!
//! Every field has a default, so an absent file or a partial file is valid.
//!
//! ```toml
//! [app]
//! name = "hiroba"
//! advertise_host = "10.0.0.1"
//!
//! [store]
//! kind = "redis"
//! redis_url = "redis://127.0.0.1:6379/0"
//!
//! [directory]
//! kind = "consul"
//! consul_addr = "http://127.0.0.1:8500"
//! ```

use std::{path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    infrastructure::directory::ConsulSettings,
    usecase::{HubSettings, ProxySettings},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub store: StoreConfig,
    pub directory: DirectoryConfig,
    pub jwt: JwtConfig,
    pub relay: RelayConfig,
    pub node: NodeConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load from `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Prefix of the generated instance id
    pub name: String,
    /// Address peers and the directory use to reach this instance
    pub advertise_host: String,
    /// Accept a `user_id` query parameter instead of a token (development only)
    pub debug_user_id_auth: bool,
    /// Call users without a stored display name `user-<id>`
    pub anonymous_names: bool,
    /// Display names kept in the in-process cache
    pub name_cache_capacity: u64,
    pub name_cache_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "hiroba".to_string(),
            advertise_host: "127.0.0.1".to_string(),
            debug_user_id_auth: false,
            anonymous_names: false,
            name_cache_capacity: 1000,
            name_cache_ttl_secs: 600,
        }
    }
}

impl AppConfig {
    pub fn name_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.name_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Redis,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryKind {
    Consul,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub kind: DirectoryKind,
    pub consul_addr: String,
    pub service_name: String,
    pub tags: Vec<String>,
    pub check_interval: String,
    pub check_timeout: String,
    pub deregister_after: String,
    pub watch_wait: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            kind: DirectoryKind::Consul,
            consul_addr: "http://127.0.0.1:8500".to_string(),
            service_name: "hiroba-im".to_string(),
            tags: vec!["im".to_string()],
            check_interval: "10s".to_string(),
            check_timeout: "5s".to_string(),
            deregister_after: "1m".to_string(),
            watch_wait: "30s".to_string(),
        }
    }
}

impl DirectoryConfig {
    pub fn consul_settings(&self) -> ConsulSettings {
        ConsulSettings {
            addr: self.consul_addr.clone(),
            service_name: self.service_name.clone(),
            tags: self.tags.clone(),
            check_interval: self.check_interval.clone(),
            check_timeout: self.check_timeout.clone(),
            deregister_after: self.deregister_after.clone(),
            watch_wait: self.watch_wait.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Query parameter carrying the shared secret on `/gateway`
    pub auth_key: String,
    pub auth_secret: String,
    pub ping_interval_secs: u64,
    pub max_ping_failures: u32,
    pub queue_capacity: usize,
    /// Upper bound for dialing a peer
    pub connect_timeout_secs: u64,
    /// Upper bound for one frame write to a peer
    pub write_wait_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            auth_key: "key".to_string(),
            auth_secret: "hiroba-relay".to_string(),
            ping_interval_secs: 60,
            max_ping_failures: 3,
            queue_capacity: 1000,
            connect_timeout_secs: 5,
            write_wait_secs: 10,
        }
    }
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs.max(1))
    }

    pub fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            max_ping_failures: self.max_ping_failures,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub queue_capacity: usize,
    pub ping_interval_secs: u64,
    pub write_wait_secs: u64,
    pub max_heartbeat_failures: u32,
    pub push_timeout_millis: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            ping_interval_secs: 60,
            write_wait_secs: 10,
            max_heartbeat_failures: 2,
            push_timeout_millis: 5000,
        }
    }
}

impl NodeConfig {
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            queue_capacity: self.queue_capacity.max(1),
            push_timeout: Duration::from_millis(self.push_timeout_millis),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        // テスト項目: 空の設定ファイルはすべてデフォルト値になる
        // when (操作):
        let config = Config::from_toml_str("").unwrap();

        // then (期待する結果):
        assert_eq!(config.app.name, "hiroba");
        assert_eq!(config.app.name_cache_capacity, 1000);
        assert_eq!(config.app.name_cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.store.kind, StoreKind::Redis);
        assert_eq!(config.directory.kind, DirectoryKind::Consul);
        assert_eq!(config.node.queue_capacity, 1000);
        assert_eq!(config.node.max_heartbeat_failures, 2);
        assert_eq!(config.relay.max_ping_failures, 3);
        assert_eq!(config.relay.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.relay.write_wait(), Duration::from_secs(10));
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_partial_config_overrides_only_given_fields() {
        // テスト項目: 指定したフィールドだけが上書きされる
        // given (前提条件):
        let text = r#"
            [app]
            name = "im"
            debug_user_id_auth = true

            [store]
            kind = "memory"

            [relay]
            auth_secret = "s3cret"
            ping_interval_secs = 5
            write_wait_secs = 3
        "#;

        // when (操作):
        let config = Config::from_toml_str(text).unwrap();

        // then (期待する結果):
        assert_eq!(config.app.name, "im");
        assert!(config.app.debug_user_id_auth);
        assert_eq!(config.app.advertise_host, "127.0.0.1");
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.relay.auth_secret, "s3cret");
        assert_eq!(config.relay.auth_key, "key");
        assert_eq!(config.relay.write_wait(), Duration::from_secs(3));
        assert_eq!(
            config.relay.proxy_settings().ping_interval,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_unknown_store_kind_is_rejected() {
        // テスト項目: 不正な store.kind はパースエラー
        let result = Config::from_toml_str("[store]\nkind = \"etcd\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        // テスト項目: 存在しないファイルは Read エラー
        let result = Config::load(Some(Path::new("/nonexistent/hiroba.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_no_path_means_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.jwt.secret, "");
    }
}
