//! Apple verifyReceipt fallback against a local stand-in server.

use axum::routing::post;
use axum::{Json, Router};
use citygate::config::AppleConfig;
use citygate::verify::{AppleReceiptVerifier, AppleVerifyClient, Environment};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct CallCounts {
    production: AtomicUsize,
    sandbox: AtomicUsize,
}

/// Serve 21007 on the production path and a valid sandbox receipt on the
/// sandbox path, counting calls to each.
async fn spawn_apple_stub(counts: Arc<CallCounts>) -> String {
    let production_counts = counts.clone();
    let sandbox_counts = counts;

    let app = Router::new()
        .route(
            "/production/verifyReceipt",
            post(move || {
                production_counts.production.fetch_add(1, Ordering::SeqCst);
                async { Json(serde_json::json!({ "status": 21007 })) }
            }),
        )
        .route(
            "/sandbox/verifyReceipt",
            post(move || {
                sandbox_counts.sandbox.fetch_add(1, Ordering::SeqCst);
                async {
                    Json(serde_json::json!({
                        "status": 0,
                        "receipt": { "in_app": [
                            { "product_id": "city-moscow",
                              "transaction_id": "sbx-tx-1",
                              "original_transaction_id": "sbx-tx-0" }
                        ]}
                    }))
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn status_21007_falls_back_to_sandbox_exactly_once() {
    let counts = Arc::new(CallCounts::default());
    let base = spawn_apple_stub(counts.clone()).await;

    let client = AppleVerifyClient::new(AppleConfig {
        production_url: format!("{base}/production/verifyReceipt"),
        sandbox_url: format!("{base}/sandbox/verifyReceipt"),
        shared_secret: Some("apple-secret".to_string()),
        accept_sandbox: true,
        timeout_secs: 5,
    })
    .expect("client");

    let verification = client.verify("b64==", "city-moscow").await.expect("verify");
    assert!(verification.verified);
    assert_eq!(verification.environment, Environment::Sandbox);
    assert_eq!(verification.transaction_id.as_deref(), Some("sbx-tx-1"));
    assert_eq!(
        verification.original_transaction_id.as_deref(),
        Some("sbx-tx-0")
    );

    assert_eq!(counts.production.load(Ordering::SeqCst), 1);
    assert_eq!(counts.sandbox.load(Ordering::SeqCst), 1);

    // A listing over the same receipt performs the same single fallback.
    let (environment, transactions) =
        client.list_transactions("b64==").await.expect("list");
    assert_eq!(environment, Environment::Sandbox);
    assert_eq!(transactions.len(), 1);
    assert_eq!(counts.production.load(Ordering::SeqCst), 2);
    assert_eq!(counts.sandbox.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn production_receipt_never_touches_the_sandbox_endpoint() {
    let counts = Arc::new(CallCounts::default());
    let base = spawn_apple_stub(counts.clone()).await;

    // Point "production" at the stub's sandbox route, which answers status 0.
    let client = AppleVerifyClient::new(AppleConfig {
        production_url: format!("{base}/sandbox/verifyReceipt"),
        sandbox_url: format!("{base}/production/verifyReceipt"),
        shared_secret: None,
        accept_sandbox: false,
        timeout_secs: 5,
    })
    .expect("client");

    let verification = client.verify("b64==", "city-moscow").await.expect("verify");
    assert!(verification.verified);
    assert_eq!(verification.environment, Environment::Production);
    assert_eq!(counts.production.load(Ordering::SeqCst), 0);
    assert_eq!(counts.sandbox.load(Ordering::SeqCst), 1);
}
