//! Integration tests for the PostgreSQL storage layer.
//!
//! Runs the production repositories against a real database so the SQL
//! itself is exercised: the locking claim transaction, the counter updates,
//! the retention filters, and the fan-out lookup.

use std::collections::HashMap;

use chrono::{TimeDelta, Utc};
use hookrelay_core::{
    error::CoreError,
    models::{NewQueueItem, QueueStatus, SubscriptionId},
    storage::{delivery_logs::NewLogEntry, subscriptions::SubscriptionConfig, Storage},
};
use hookrelay_testing::TestDatabase;

async fn test_storage() -> (TestDatabase, Storage) {
    let db = TestDatabase::new().await.unwrap();
    let storage = Storage::new(db.pool());
    (db, storage)
}

fn config(url: &str, events: &[&str], is_active: bool) -> SubscriptionConfig {
    SubscriptionConfig {
        url: url.to_string(),
        secret: Some("s3cr3t".to_string()),
        headers: HashMap::new(),
        events: events.iter().map(|e| (*e).to_string()).collect(),
        is_active,
    }
}

fn new_item(subscription_id: SubscriptionId, event: &str) -> NewQueueItem {
    NewQueueItem {
        subscription_id,
        event: event.to_string(),
        payload: serde_json::json!({"event": event, "id": "abc"}),
        scheduled_for: None,
    }
}

#[tokio::test]
async fn health_check_succeeds() {
    let (_db, storage) = test_storage().await;
    assert!(storage.health_check().await.is_ok());
}

#[tokio::test]
async fn claim_moves_due_items_to_processing_in_fifo_order() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();
    let sub = storage
        .subscriptions
        .create(&config("https://example.com/hooks", &["TASK_CREATED"], true), now)
        .await
        .unwrap();

    let first = storage
        .queue
        .enqueue(&new_item(sub.id, "TASK_CREATED"), now - TimeDelta::try_seconds(30).unwrap())
        .await
        .unwrap();
    let second = storage
        .queue
        .enqueue(&new_item(sub.id, "TASK_CREATED"), now - TimeDelta::try_seconds(20).unwrap())
        .await
        .unwrap();
    let third = storage
        .queue
        .enqueue(&new_item(sub.id, "TASK_CREATED"), now - TimeDelta::try_seconds(10).unwrap())
        .await
        .unwrap();

    let claimed = storage.queue.claim_due(2, now).await.unwrap();
    assert_eq!(claimed.len(), 2);
    assert_eq!(claimed[0].id, first);
    assert_eq!(claimed[1].id, second);
    for item in &claimed {
        assert_eq!(item.status, QueueStatus::Processing);
        assert!(item.started_at.is_some());
    }

    let rest = storage.queue.claim_due(10, now).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, third);

    // Everything is processing; nothing left to claim.
    assert!(storage.queue.claim_due(10, now).await.unwrap().is_empty());
}

#[tokio::test]
async fn overlapping_claims_never_hand_out_the_same_item() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();
    let sub = storage
        .subscriptions
        .create(&config("https://example.com/hooks", &["TASK_CREATED"], true), now)
        .await
        .unwrap();

    for _ in 0..4 {
        storage.queue.enqueue(&new_item(sub.id, "TASK_CREATED"), now).await.unwrap();
    }

    let (a, b) = tokio::join!(storage.queue.claim_due(10, now), storage.queue.claim_due(10, now));
    let a = a.unwrap();
    let b = b.unwrap();

    // SKIP LOCKED hands every item to exactly one claimer.
    assert_eq!(a.len() + b.len(), 4);
    let mut ids: Vec<_> = a.iter().chain(b.iter()).map(|item| item.id.0).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    for item in a.iter().chain(b.iter()) {
        assert_eq!(item.status, QueueStatus::Processing);
    }
}

#[tokio::test]
async fn future_scheduled_item_is_not_claimed() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();
    let sub = storage
        .subscriptions
        .create(&config("https://example.com/hooks", &["TASK_CREATED"], true), now)
        .await
        .unwrap();

    let mut item = new_item(sub.id, "TASK_CREATED");
    item.scheduled_for = Some(now + TimeDelta::try_hours(1).unwrap());
    storage.queue.enqueue(&item, now).await.unwrap();

    assert!(storage.queue.claim_due(10, now).await.unwrap().is_empty());
}

#[tokio::test]
async fn terminal_updates_apply_only_to_processing_items() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();
    let sub = storage
        .subscriptions
        .create(&config("https://example.com/hooks", &["TASK_CREATED"], true), now)
        .await
        .unwrap();
    let id = storage.queue.enqueue(&new_item(sub.id, "TASK_CREATED"), now).await.unwrap();

    // Not yet claimed: the transition must not apply.
    storage.queue.mark_completed(id, 200, now).await.unwrap();
    let item = storage.queue.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Pending);

    storage.queue.claim_due(10, now).await.unwrap();
    storage.queue.mark_completed(id, 200, now).await.unwrap();
    let item = storage.queue.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert_eq!(item.status_code, Some(200));
    assert!(item.completed_at.is_some());

    // Terminal states are absorbing.
    storage.queue.mark_failed(id, 500, "HTTP 500", now).await.unwrap();
    let item = storage.queue.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
}

#[tokio::test]
async fn record_attempt_keeps_counters_consistent() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();
    let sub = storage
        .subscriptions
        .create(&config("https://example.com/hooks", &["TASK_CREATED"], true), now)
        .await
        .unwrap();

    storage.subscriptions.record_attempt(sub.id, true, now).await.unwrap();
    storage.subscriptions.record_attempt(sub.id, false, now).await.unwrap();
    storage.subscriptions.record_attempt(sub.id, true, now).await.unwrap();

    let sub = storage.subscriptions.find_by_id(sub.id).await.unwrap().unwrap();
    assert_eq!(sub.total_calls, 3);
    assert_eq!(sub.successful_calls, 2);
    assert_eq!(sub.failed_calls, 1);
    assert_eq!(sub.total_calls, sub.successful_calls + sub.failed_calls);
    assert!(sub.last_called_at.is_some());
}

#[tokio::test]
async fn purge_deletes_only_old_terminal_items() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();
    let old = now - TimeDelta::try_days(8).unwrap();
    let sub = storage
        .subscriptions
        .create(&config("https://example.com/hooks", &["TASK_CREATED"], true), now)
        .await
        .unwrap();

    let old_completed = storage.queue.enqueue(&new_item(sub.id, "TASK_CREATED"), old).await.unwrap();
    let fresh_completed =
        storage.queue.enqueue(&new_item(sub.id, "TASK_CREATED"), now).await.unwrap();
    storage.queue.claim_due(10, now).await.unwrap();
    storage.queue.mark_completed(old_completed, 200, now).await.unwrap();
    storage.queue.mark_completed(fresh_completed, 200, now).await.unwrap();

    let old_pending = storage.queue.enqueue(&new_item(sub.id, "TASK_CREATED"), old).await.unwrap();

    let purged =
        storage.queue.purge_terminal_before(now - TimeDelta::try_days(7).unwrap()).await.unwrap();
    assert_eq!(purged, 1);

    assert!(storage.queue.find_by_id(old_completed).await.unwrap().is_none());
    assert!(storage.queue.find_by_id(fresh_completed).await.unwrap().is_some());
    assert_eq!(
        storage.queue.find_by_id(old_pending).await.unwrap().unwrap().status,
        QueueStatus::Pending
    );
}

#[tokio::test]
async fn reclaim_resets_stale_processing_claims() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();
    let stale_claim = now - TimeDelta::try_minutes(10).unwrap();
    let sub = storage
        .subscriptions
        .create(&config("https://example.com/hooks", &["TASK_CREATED"], true), now)
        .await
        .unwrap();

    // Claimed ten minutes ago and never settled.
    let stranded =
        storage.queue.enqueue(&new_item(sub.id, "TASK_CREATED"), stale_claim).await.unwrap();
    storage.queue.claim_due(10, stale_claim).await.unwrap();

    // Claimed just now, still within the delivery budget.
    let in_flight = storage.queue.enqueue(&new_item(sub.id, "TASK_CREATED"), now).await.unwrap();
    storage.queue.claim_due(10, now).await.unwrap();

    let reclaimed =
        storage.queue.reclaim_stuck(now - TimeDelta::try_seconds(90).unwrap()).await.unwrap();
    assert_eq!(reclaimed, vec![stranded]);

    let item = storage.queue.find_by_id(stranded).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    assert!(item.started_at.is_none());

    assert_eq!(
        storage.queue.find_by_id(in_flight).await.unwrap().unwrap().status,
        QueueStatus::Processing
    );
}

#[tokio::test]
async fn enqueue_event_fans_out_to_active_matching_subscriptions() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();

    let hits = storage
        .subscriptions
        .create(&config("https://a.example.com", &["CONTACT_CREATED"], true), now)
        .await
        .unwrap();
    let also_hits = storage
        .subscriptions
        .create(&config("https://b.example.com", &["TASK_CREATED", "CONTACT_CREATED"], true), now)
        .await
        .unwrap();
    let inactive = storage
        .subscriptions
        .create(&config("https://c.example.com", &["CONTACT_CREATED"], false), now)
        .await
        .unwrap();
    let other_event = storage
        .subscriptions
        .create(&config("https://d.example.com", &["TASK_CREATED"], true), now)
        .await
        .unwrap();

    let ids = storage
        .enqueue_event("CONTACT_CREATED", &serde_json::json!({"id": "42"}), now)
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);

    let mut targets = Vec::new();
    for id in ids {
        targets.push(storage.queue.find_by_id(id).await.unwrap().unwrap().subscription_id);
    }
    assert!(targets.contains(&hits.id));
    assert!(targets.contains(&also_hits.id));
    assert!(!targets.contains(&inactive.id));
    assert!(!targets.contains(&other_event.id));

    assert_eq!(storage.queue.count_by_status(QueueStatus::Pending).await.unwrap(), 2);
}

#[tokio::test]
async fn duplicate_subscription_url_is_rejected() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();

    storage
        .subscriptions
        .create(&config("https://example.com/hooks", &[], true), now)
        .await
        .unwrap();
    let err = storage
        .subscriptions
        .create(&config("https://example.com/hooks", &[], true), now)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ConstraintViolation(_)));
}

#[tokio::test]
async fn subscription_with_queue_items_cannot_be_deleted() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();
    let sub = storage
        .subscriptions
        .create(&config("https://example.com/hooks", &["TASK_CREATED"], true), now)
        .await
        .unwrap();
    storage.queue.enqueue(&new_item(sub.id, "TASK_CREATED"), now).await.unwrap();

    let err = storage.subscriptions.delete(sub.id).await.unwrap_err();
    assert!(matches!(err, CoreError::ConstraintViolation(_)));
}

#[tokio::test]
async fn delivery_log_history_is_paginated_newest_first() {
    let (_db, storage) = test_storage().await;
    let now = Utc::now();
    let sub = storage
        .subscriptions
        .create(&config("https://example.com/hooks", &["TASK_CREATED"], true), now)
        .await
        .unwrap();

    for (age_secs, status_code) in [(30, 200), (20, 500), (10, 204)] {
        let entry = NewLogEntry {
            subscription_id: sub.id,
            event: "TASK_CREATED".to_string(),
            url: sub.url.clone(),
            payload: serde_json::json!({"id": "abc"}),
            status_code,
            succeeded: status_code != 500,
            error: (status_code == 500).then(|| "HTTP 500".to_string()),
            duration_ms: 12,
        };
        storage
            .delivery_logs
            .create(&entry, now - TimeDelta::try_seconds(age_secs).unwrap())
            .await
            .unwrap();
    }

    let page = storage.delivery_logs.find_by_subscription(sub.id, 2, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].status_code, 204);
    assert_eq!(page[1].status_code, 500);

    let rest = storage.delivery_logs.find_by_subscription(sub.id, 2, 2).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].status_code, 200);

    assert_eq!(storage.delivery_logs.count_by_subscription(sub.id).await.unwrap(), 3);
}
