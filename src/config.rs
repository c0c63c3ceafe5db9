//! Configuration for citygate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// SQLite database URL (e.g. `sqlite://citygate.db`).
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Apple receipt verification configuration.
    #[serde(default)]
    pub apple: AppleConfig,

    /// Google Play verification configuration.
    #[serde(default)]
    pub google: GoogleConfig,

    /// YooKassa webhook configuration.
    #[serde(default)]
    pub yookassa: YookassaConfig,

    /// Push-queue configuration for async jobs.
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Apple verifyReceipt configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppleConfig {
    /// Production verification endpoint.
    #[serde(default = "default_apple_production_url")]
    pub production_url: String,

    /// Sandbox verification endpoint, used once on status 21007.
    #[serde(default = "default_apple_sandbox_url")]
    pub sandbox_url: String,

    /// App-specific shared secret sent as `password`.
    #[serde(default)]
    pub shared_secret: Option<String>,

    /// Accept grants from sandbox-environment receipts. Off in production;
    /// sandbox proof is only honored when this is explicitly enabled.
    #[serde(default)]
    pub accept_sandbox: bool,

    /// Timeout for verification calls, in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

/// Google Play Developer API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    /// Path to the service-account key JSON.
    #[serde(default)]
    pub service_account_key: Option<PathBuf>,

    /// Play Developer API base URL.
    #[serde(default = "default_google_api_base")]
    pub api_base: String,

    /// OAuth2 token endpoint.
    #[serde(default = "default_google_token_url")]
    pub token_url: String,

    /// Timeout for verification calls, in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

/// YooKassa webhook configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YookassaConfig {
    /// Shared secret expected in the webhook signature header. A missing
    /// secret means the webhook endpoint reports "not configured".
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

/// Push-queue configuration for the async job ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// URL jobs are published to.
    #[serde(default)]
    pub publish_url: Option<String>,

    /// Secret used to sign and verify job callbacks (HMAC-SHA256).
    #[serde(default)]
    pub callback_secret: Option<String>,

    /// Timeout for publish calls, in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_url: default_database_url(),
            log_level: default_log_level(),
            apple: AppleConfig::default(),
            google: GoogleConfig::default(),
            yookassa: YookassaConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Default for AppleConfig {
    fn default() -> Self {
        Self {
            production_url: default_apple_production_url(),
            sandbox_url: default_apple_sandbox_url(),
            shared_secret: None,
            accept_sandbox: false,
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            service_account_key: None,
            api_base: default_google_api_base(),
            token_url: default_google_token_url(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl AppleConfig {
    /// Provider call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl GoogleConfig {
    /// Provider call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl QueueConfig {
    /// Publish call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_database_url() -> String {
    let dir = directories::ProjectDirs::from("", "", "citygate")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".citygate"));
    format!("sqlite://{}", dir.join("citygate.db").display())
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_apple_production_url() -> String {
    "https://buy.itunes.apple.com/verifyReceipt".to_string()
}

fn default_apple_sandbox_url() -> String {
    "https://sandbox.itunes.apple.com/verifyReceipt".to_string()
}

fn default_google_api_base() -> String {
    "https://androidpublisher.googleapis.com/androidpublisher/v3".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

const fn default_provider_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert!(config.apple.production_url.contains("buy.itunes.apple.com"));
        assert!(config.apple.sandbox_url.contains("sandbox"));
        assert!(!config.apple.accept_sandbox);
        assert!(config.yookassa.webhook_secret.is_none());
        assert_eq!(config.apple.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn roundtrip_through_toml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("citygate.toml");

        let mut config = AppConfig::default();
        config.yookassa.webhook_secret = Some("s3cret".to_string());
        config.apple.accept_sandbox = true;
        config.to_file(&path).expect("save");

        let loaded = AppConfig::from_file(&path).expect("load");
        assert_eq!(loaded.yookassa.webhook_secret.as_deref(), Some("s3cret"));
        assert!(loaded.apple.accept_sandbox);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: AppConfig = toml::from_str("[apple]\naccept_sandbox = true\n").expect("parse");
        assert!(parsed.apple.accept_sandbox);
        assert!(parsed.apple.production_url.contains("verifyReceipt"));
        assert_eq!(parsed.log_level, "info");
    }
}
