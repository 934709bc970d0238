use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::ThreadCache;
use crate::runtime::CallPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat_lifecycle.json";

/// Overrides `database_path` when set.
pub const DATABASE_ENV: &str = "CHAT_LIFECYCLE_DB";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: String,
    pub busy_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub thread_cache_ttl_secs: u64,
    pub thread_cache_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "data/chat_lifecycle.db".to_string(),
            busy_timeout_ms: 5_000,
            operation_timeout_ms: 10_000,
            max_retries: 3,
            retry_backoff_ms: 50,
            thread_cache_ttl_secs: 60,
            thread_cache_capacity: 256,
        }
    }
}

impl AppConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(self.operation_timeout_ms),
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn thread_cache(&self) -> ThreadCache {
        ThreadCache::new(
            Duration::from_secs(self.thread_cache_ttl_secs),
            self.thread_cache_capacity,
        )
    }
}

/// Read the config file, falling back to defaults when it is missing or
/// malformed, then apply the environment override.
pub fn load_config(path: &str) -> AppConfig {
    let mut config = read_config_file(Path::new(path));
    if let Ok(database_path) = env::var(DATABASE_ENV) {
        if !database_path.is_empty() {
            log::info!("Using database {database_path} from {DATABASE_ENV}");
            config.database_path = database_path;
        }
    }
    config
}

fn read_config_file(path: &Path) -> AppConfig {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = read_config_file(&path);
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "max_retries": 7, "thread_cache_ttl_secs": 5 }"#).unwrap();

        let config = read_config_file(&path);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.thread_cache_ttl_secs, 5);
        assert_eq!(config.busy_timeout_ms, AppConfig::default().busy_timeout_ms);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(read_config_file(&path), AppConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let config = AppConfig {
            database_path: "elsewhere.db".to_string(),
            operation_timeout_ms: 250,
            ..AppConfig::default()
        };
        save_config(path.to_str().unwrap(), &config).unwrap();
        assert_eq!(read_config_file(&path), config);
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
        let policy = config.call_policy();
        assert_eq!(policy.timeout, Duration::from_secs(10));
        assert_eq!(policy.max_retries, 3);
        assert!(config.thread_cache().is_empty());
    }
}
