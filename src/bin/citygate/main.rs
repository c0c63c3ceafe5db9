//! citygate CLI entry point.

mod cli;

use citygate::access::AccessResolver;
use citygate::catalog::Catalog;
use citygate::grant::GrantService;
use citygate::http::{router, AppState};
use citygate::jobs::{HttpJobQueue, JobLedger, JobQueue, RestoreWorker, UnconfiguredQueue};
use citygate::verify::{
    AppleVerifyClient, GoogleVerifyClient, ServiceAccountKey, ServiceAccountTokenSource,
    TokenSource, UnconfiguredTokenSource,
};
use citygate::webhook::WebhookHandler;
use citygate::Store;
use clap::Parser;
use cli::Cli;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("citygate v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.into_config()?;

    let store = Store::connect(&config.database_url).await?;
    let catalog = Catalog::new(store.clone());
    let grants = GrantService::new(store.clone(), catalog.clone());
    let access = AccessResolver::new(store.clone(), catalog.clone());
    let webhook = WebhookHandler::new(store.clone(), catalog.clone());

    let apple = Arc::new(AppleVerifyClient::new(config.apple.clone())?);

    let tokens: Arc<dyn TokenSource> = match config.google.service_account_key {
        Some(ref path) => {
            let key = ServiceAccountKey::from_file(path)?;
            Arc::new(ServiceAccountTokenSource::new(key, &config.google)?)
        }
        None => {
            warn!("No Google service account key configured - Google verification disabled");
            Arc::new(UnconfiguredTokenSource)
        }
    };
    let google = Arc::new(GoogleVerifyClient::new(&config.google, tokens)?);

    let queue: Arc<dyn JobQueue> = match HttpJobQueue::new(&config.queue) {
        Ok(queue) => Arc::new(queue),
        Err(citygate::Error::NotConfigured(reason)) => {
            warn!("Push queue not configured ({reason}) - restore jobs will fail at enqueue");
            Arc::new(UnconfiguredQueue)
        }
        Err(e) => return Err(e.into()),
    };
    let ledger = JobLedger::new(store.clone(), queue);

    let restore = Arc::new(RestoreWorker::new(
        apple.clone(),
        google.clone(),
        grants.clone(),
        config.apple.clone(),
    ));

    let state = AppState {
        store,
        catalog,
        grants,
        access,
        ledger,
        webhook,
        restore,
        apple,
        google,
        config: Arc::new(config.clone()),
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Goodbye!");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Ctrl-C received, shutting down");
}
