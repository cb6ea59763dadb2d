//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The login password is read from `API_PASSWORD` and never stored in the TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use api_client::ClientConfig;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub credentials: CredentialsConfig,
}

/// Backend connection settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_rate_limit_backoff")]
    pub rate_limit_backoff_ms: u64,
}

/// Where the credential pair is persisted between runs
#[derive(Debug, Deserialize)]
pub struct CredentialsConfig {
    pub path: PathBuf,
}

fn default_timeout() -> u64 {
    15
}

fn default_rate_limit_backoff() -> u64 {
    2000
}

impl Config {
    /// Load configuration from a TOML file, then overlay `API_BASE_URL`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("API_BASE_URL") {
            config.api.base_url = url;
        }

        if !config.api.base_url.starts_with("http://")
            && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::InvalidUrl {
                url: config.api.base_url,
                reason: "must start with http:// or https://".into(),
            });
        }

        if config.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("api-cli.toml")
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new(self.api.base_url.clone());
        client.timeout = Duration::from_secs(self.api.timeout_secs);
        client.rate_limit_backoff = Duration::from_millis(self.api.rate_limit_backoff_ms);
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch process environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("api-cli.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn valid_toml() -> &'static str {
        r#"
[api]
base_url = "https://api.example.com/api"

[credentials]
path = "/var/lib/api-cli/credentials.json"
"#
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("API_BASE_URL") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        let config = Config::load(&path).unwrap();

        assert_eq!(config.api.base_url, "https://api.example.com/api");
        assert_eq!(config.api.timeout_secs, 15);
        assert_eq!(config.api.rate_limit_backoff_ms, 2000);
        assert_eq!(
            config.credentials.path,
            PathBuf::from("/var/lib/api-cli/credentials.json")
        );
    }

    #[test]
    fn test_client_config_carries_durations() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("API_BASE_URL") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[api]
base_url = "http://localhost:3000/api/"
timeout_secs = 5
rate_limit_backoff_ms = 250

[credentials]
path = "creds.json"
"#,
        );

        let client = Config::load(&path).unwrap().client_config();

        assert_eq!(client.timeout, Duration::from_secs(5));
        assert_eq!(client.rate_limit_backoff, Duration::from_millis(250));
        assert_eq!(
            client.url_for("/bookings"),
            "http://localhost:3000/api/bookings"
        );
    }

    #[test]
    fn test_env_overrides_base_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env("API_BASE_URL", "http://127.0.0.1:9000") };
        let config = Config::load(&path);
        unsafe { remove_env("API_BASE_URL") };

        assert_eq!(config.unwrap().api.base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("API_BASE_URL") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[api]
base_url = "ftp://api.example.com"

[credentials]
path = "creds.json"
"#,
        );

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, common::Error::InvalidUrl { .. }), "{err}");
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("API_BASE_URL") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[api]
base_url = "https://api.example.com"
timeout_secs = 0

[credentials]
path = "creds.json"
"#,
        );

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/api-cli.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");

        let result = Config::load(&path);
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_missing_credentials_section_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[api]\nbase_url = \"https://api.example.com\"\n");

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { set_env("CONFIG_PATH", "/etc/api-cli/env.toml") };
        assert_eq!(
            Config::resolve_path(Some("/tmp/cli.toml")),
            PathBuf::from("/tmp/cli.toml")
        );
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("/etc/api-cli/env.toml")
        );

        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("api-cli.toml"));
    }
}
