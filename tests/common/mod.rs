//! Shared test harness: seeded in-memory store, mock adapters, mock queue.

#![allow(dead_code)]

use async_trait::async_trait;
use citygate::access::AccessResolver;
use citygate::catalog::Catalog;
use citygate::config::AppConfig;
use citygate::grant::GrantService;
use citygate::http::{router, AppState};
use citygate::jobs::{JobLedger, JobQueue, RestoreWorker};
use citygate::store::Store;
use citygate::verify::{
    AppleReceiptVerifier, Environment, GooglePurchaseVerifier, ReceiptTransaction, Verification,
};
use citygate::webhook::WebhookHandler;
use citygate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Store with a small entitlement catalog seeded.
pub async fn seeded_store() -> Store {
    let store = Store::in_memory().await.expect("store");
    sqlx::query(
        r"
        INSERT INTO entitlements (slug, scope, ref_id, price_amount, is_active) VALUES
            ('city-saint-petersburg', 'city', 'saint-petersburg', 49900, 1),
            ('city-moscow', 'city', 'moscow', 39900, 1),
            ('tour-hermitage', 'tour', 'hermitage', 19900, 1),
            ('tour-free-walk', 'tour', 'free-walk', 0, 1),
            ('sku1', 'city', 'city-one', 9900, 1),
            ('sku2', 'city', 'city-two', 9900, 1)
        ",
    )
    .execute(store.pool())
    .await
    .expect("seed entitlements");
    store
}

/// Apple adapter mock: a fixed environment and receipt content.
pub struct MockApple {
    pub environment: Environment,
    pub transactions: Vec<ReceiptTransaction>,
    /// When set, every call fails with a provider error.
    pub provider_error: Option<String>,
}

impl MockApple {
    pub fn with_transactions(transactions: Vec<ReceiptTransaction>) -> Self {
        Self {
            environment: Environment::Production,
            transactions,
            provider_error: None,
        }
    }

    pub fn single(product_id: &str, transaction_id: &str) -> Self {
        Self::with_transactions(vec![ReceiptTransaction {
            product_id: product_id.to_string(),
            transaction_id: transaction_id.to_string(),
            original_transaction_id: None,
        }])
    }
}

#[async_trait]
impl AppleReceiptVerifier for MockApple {
    async fn verify(&self, _receipt: &str, product_id: &str) -> Result<Verification> {
        if let Some(ref msg) = self.provider_error {
            return Err(Error::Provider(msg.clone()));
        }
        match self
            .transactions
            .iter()
            .find(|tx| tx.product_id == product_id)
        {
            Some(tx) => Ok(Verification {
                verified: true,
                transaction_id: Some(tx.transaction_id.clone()),
                original_transaction_id: tx.original_transaction_id.clone(),
                environment: self.environment,
                error: None,
            }),
            None => Ok(Verification::rejected(
                self.environment,
                "Product ID not found",
            )),
        }
    }

    async fn list_transactions(
        &self,
        _receipt: &str,
    ) -> Result<(Environment, Vec<ReceiptTransaction>)> {
        if let Some(ref msg) = self.provider_error {
            return Err(Error::Provider(msg.clone()));
        }
        Ok((self.environment, self.transactions.clone()))
    }
}

/// Scripted outcome for one Google purchase token.
pub enum GoogleOutcome {
    Purchased { order_id: String },
    Rejected(String),
    ProviderError(String),
}

/// Google adapter mock: per-token scripted outcomes.
pub struct MockGoogle {
    pub outcomes: HashMap<String, GoogleOutcome>,
}

impl MockGoogle {
    pub fn new(outcomes: HashMap<String, GoogleOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn purchased(token: &str, order_id: &str) -> Self {
        let mut outcomes = HashMap::new();
        outcomes.insert(
            token.to_string(),
            GoogleOutcome::Purchased {
                order_id: order_id.to_string(),
            },
        );
        Self { outcomes }
    }
}

#[async_trait]
impl GooglePurchaseVerifier for MockGoogle {
    async fn verify(
        &self,
        _package_name: &str,
        _product_id: &str,
        token: &str,
    ) -> Result<Verification> {
        match self.outcomes.get(token) {
            Some(GoogleOutcome::Purchased { order_id }) => Ok(Verification {
                verified: true,
                transaction_id: Some(order_id.clone()),
                original_transaction_id: None,
                environment: Environment::Production,
                error: None,
            }),
            Some(GoogleOutcome::Rejected(reason)) => {
                Ok(Verification::rejected(Environment::Production, reason.clone()))
            }
            Some(GoogleOutcome::ProviderError(msg)) => Err(Error::Provider(msg.clone())),
            None => Ok(Verification::rejected(
                Environment::Production,
                "Play API status 404",
            )),
        }
    }
}

/// Queue mock recording published job ids; optionally failing every push.
#[derive(Default)]
pub struct MockQueue {
    pub published: Mutex<Vec<String>>,
    pub fail_publish: bool,
}

impl MockQueue {
    pub fn failing() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail_publish: true,
        }
    }
}

#[async_trait]
impl JobQueue for MockQueue {
    async fn publish(&self, job_id: &str) -> Result<()> {
        if self.fail_publish {
            return Err(Error::QueuePublish("queue unreachable".to_string()));
        }
        self.published.lock().push(job_id.to_string());
        Ok(())
    }
}

/// Everything a test needs to drive the service.
pub struct Harness {
    pub store: Store,
    pub catalog: Catalog,
    pub grants: GrantService,
    pub access: AccessResolver,
    pub ledger: JobLedger,
    pub webhook: WebhookHandler,
    pub restore: Arc<RestoreWorker>,
    pub queue: Arc<MockQueue>,
    pub state: AppState,
}

impl Harness {
    pub fn router(&self) -> axum::Router {
        router(self.state.clone())
    }
}

/// Build a harness with the given adapters and config.
pub async fn harness_with(
    apple: MockApple,
    google: MockGoogle,
    queue: MockQueue,
    config: AppConfig,
) -> Harness {
    let store = seeded_store().await;
    let catalog = Catalog::new(store.clone());
    let grants = GrantService::new(store.clone(), catalog.clone());
    let access = AccessResolver::new(store.clone(), catalog.clone());
    let webhook = WebhookHandler::new(store.clone(), catalog.clone());

    let apple: Arc<dyn AppleReceiptVerifier> = Arc::new(apple);
    let google: Arc<dyn GooglePurchaseVerifier> = Arc::new(google);
    let queue = Arc::new(queue);
    let ledger = JobLedger::new(store.clone(), queue.clone());
    let restore = Arc::new(RestoreWorker::new(
        apple.clone(),
        google.clone(),
        grants.clone(),
        config.apple.clone(),
    ));

    let state = AppState {
        store: store.clone(),
        catalog: catalog.clone(),
        grants: grants.clone(),
        access: access.clone(),
        ledger: ledger.clone(),
        webhook: webhook.clone(),
        restore: restore.clone(),
        apple,
        google,
        config: Arc::new(config),
    };

    Harness {
        store,
        catalog,
        grants,
        access,
        ledger,
        webhook,
        restore,
        queue,
        state,
    }
}

/// Harness with benign defaults: production Apple mock for `city-moscow`,
/// one purchased Google token, a working queue, secrets configured.
pub async fn default_harness() -> Harness {
    let mut config = AppConfig::default();
    config.yookassa.webhook_secret = Some("hook-secret".to_string());
    config.queue.callback_secret = Some("queue-secret".to_string());

    harness_with(
        MockApple::single("city-moscow", "apple-tx-1"),
        MockGoogle::purchased("tokA", "GPA.1111"),
        MockQueue::default(),
        config,
    )
    .await
}
