//! YooKassa webhook processing and replay safety.

mod common;

use citygate::store::{intents, IntentStatus, NewIntent};
use citygate::webhook::{WebhookAck, YookassaEvent};

async fn seed_intent(h: &common::Harness) -> i64 {
    let mut conn = h.store.pool().acquire().await.expect("conn");
    let intent = intents::create(
        &mut conn,
        &NewIntent {
            city_slug: Some("moscow".to_string()),
            tour_id: None,
            device_anon_id: "dev-hook".to_string(),
            platform: "web".to_string(),
            idempotency_key: "intent-key-1".to_string(),
        },
    )
    .await
    .expect("intent");
    intent.id
}

fn succeeded_event(intent_id: i64, payment_id: &str) -> YookassaEvent {
    serde_json::from_value(serde_json::json!({
        "event": "payment.succeeded",
        "object": {
            "id": payment_id,
            "metadata": { "intent_id": intent_id.to_string() }
        }
    }))
    .expect("event")
}

#[tokio::test]
async fn replayed_webhook_produces_one_purchase_and_one_grant() {
    let h = common::default_harness().await;
    let intent_id = seed_intent(&h).await;
    let event = succeeded_event(intent_id, "pay-123");

    let first = h.webhook.handle_event(&event, "trace-a").await.expect("first");
    assert!(matches!(first, WebhookAck::Processed { .. }));

    let second = h.webhook.handle_event(&event, "trace-b").await.expect("second");
    assert_eq!(second, WebhookAck::AlreadyProcessed);

    let mut conn = h.store.pool().acquire().await.expect("conn");
    let intent = intents::by_id(&mut conn, intent_id)
        .await
        .expect("query")
        .expect("intent");
    assert_eq!(intent.status, IntentStatus::Succeeded);

    let purchases = intents::purchase_count(&mut conn, intent_id)
        .await
        .expect("count");
    assert_eq!(purchases, 1);
    drop(conn);

    let grant_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM entitlement_grants WHERE source = 'yookassa' AND source_ref = 'pay-123'",
    )
    .fetch_one(h.store.pool())
    .await
    .expect("grants");
    assert_eq!(grant_count, 1);
}

#[tokio::test]
async fn webhook_grant_is_visible_to_the_intent_device() {
    let h = common::default_harness().await;
    let intent_id = seed_intent(&h).await;

    h.webhook
        .handle_event(&succeeded_event(intent_id, "pay-456"), "trace")
        .await
        .expect("process");

    let owns = h
        .access
        .has_access("moscow", "dev-hook", None, None)
        .await
        .expect("access");
    assert!(owns);
}

#[tokio::test]
async fn missing_or_invalid_metadata_is_acknowledged_without_effect() {
    let h = common::default_harness().await;

    let no_metadata: YookassaEvent = serde_json::from_value(serde_json::json!({
        "event": "payment.succeeded",
        "object": { "id": "pay-x" }
    }))
    .expect("event");
    assert_eq!(
        h.webhook.handle_event(&no_metadata, "t").await.expect("ack"),
        WebhookAck::Ignored
    );

    let unknown_intent = succeeded_event(999_999, "pay-y");
    assert_eq!(
        h.webhook.handle_event(&unknown_intent, "t").await.expect("ack"),
        WebhookAck::Ignored
    );

    let other_event: YookassaEvent = serde_json::from_value(serde_json::json!({
        "event": "payment.canceled",
        "object": { "id": "pay-z", "metadata": { "intent_id": "1" } }
    }))
    .expect("event");
    assert_eq!(
        h.webhook.handle_event(&other_event, "t").await.expect("ack"),
        WebhookAck::Ignored
    );

    let grant_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entitlement_grants")
        .fetch_one(h.store.pool())
        .await
        .expect("count");
    assert_eq!(grant_count, 0);
}

#[tokio::test]
async fn failed_intent_is_not_reprocessed_by_a_late_webhook() {
    let h = common::default_harness().await;
    let intent_id = seed_intent(&h).await;
    {
        let mut conn = h.store.pool().acquire().await.expect("conn");
        assert!(intents::finish(&mut conn, intent_id, IntentStatus::Failed)
            .await
            .expect("finish"));
    }

    let ack = h
        .webhook
        .handle_event(&succeeded_event(intent_id, "pay-late"), "t")
        .await
        .expect("ack");
    assert_eq!(ack, WebhookAck::Ignored);

    let mut conn = h.store.pool().acquire().await.expect("conn");
    let intent = intents::by_id(&mut conn, intent_id)
        .await
        .expect("query")
        .expect("intent");
    assert_eq!(intent.status, IntentStatus::Failed);
    assert_eq!(
        intents::purchase_count(&mut conn, intent_id).await.expect("count"),
        0
    );
    drop(conn);

    let grant_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entitlement_grants")
        .fetch_one(h.store.pool())
        .await
        .expect("count");
    assert_eq!(grant_count, 0);
}

#[tokio::test]
async fn duplicate_intent_creation_returns_existing_row() {
    let h = common::default_harness().await;
    let first = seed_intent(&h).await;
    let second = seed_intent(&h).await;
    assert_eq!(first, second);
}
