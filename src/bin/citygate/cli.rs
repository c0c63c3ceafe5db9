//! Command-line interface definition.

use citygate::AppConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Purchase verification and entitlement gating service for paid tourism
/// content.
#[derive(Parser, Debug)]
#[command(name = "citygate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, env = "CITYGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to.
    #[arg(long, env = "CITYGATE_BIND_ADDR")]
    pub bind_addr: Option<SocketAddr>,

    /// SQLite database URL.
    #[arg(long, env = "CITYGATE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// YooKassa webhook shared secret.
    #[arg(long, env = "CITYGATE_YOOKASSA_SECRET", hide_env_values = true)]
    pub yookassa_secret: Option<String>,

    /// Queue callback secret.
    #[arg(long, env = "CITYGATE_QUEUE_SECRET", hide_env_values = true)]
    pub queue_secret: Option<String>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

impl Cli {
    /// Build the effective configuration: file (when given) overridden by
    /// explicit flags/env values.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<AppConfig> {
        let mut config = match self.config {
            Some(ref path) => AppConfig::from_file(path)?,
            None => AppConfig::default(),
        };

        if let Some(bind_addr) = self.bind_addr {
            config.bind_addr = bind_addr;
        }
        if let Some(database_url) = self.database_url {
            config.database_url = database_url;
        }
        if let Some(secret) = self.yookassa_secret {
            config.yookassa.webhook_secret = Some(secret);
        }
        if let Some(secret) = self.queue_secret {
            config.queue.callback_secret = Some(secret);
        }
        config.log_level = self.log_level;

        Ok(config)
    }
}
