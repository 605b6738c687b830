//! Integration tests for the retention sweeper.

use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use hookrelay_core::{
    models::{QueueItem, QueueItemId, QueueStatus, SubscriptionId},
    time::TestClock,
};
use hookrelay_delivery::{
    storage::mock::MockDeliveryStorage, RetentionSweeper, SweeperConfig,
};
use sqlx::types::Json;
use tokio_util::sync::CancellationToken;

fn item_with_age(status: QueueStatus, age_days: i64) -> QueueItem {
    let created_at = Utc::now() - TimeDelta::try_days(age_days).unwrap();
    QueueItem {
        id: QueueItemId::new(),
        subscription_id: SubscriptionId::new(),
        event: "CONTACT_CREATED".to_string(),
        payload: Json(serde_json::json!({"id": "42"})),
        status,
        scheduled_for: created_at,
        created_at,
        started_at: matches!(status, QueueStatus::Processing).then(|| created_at),
        completed_at: status.is_terminal().then(|| created_at),
        status_code: None,
        error: None,
    }
}

fn sweeper(storage: Arc<MockDeliveryStorage>) -> RetentionSweeper {
    RetentionSweeper::new(
        storage,
        SweeperConfig {
            sweep_interval: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            stuck_after: Duration::from_secs(90),
        },
        Arc::new(TestClock::new()),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn purges_old_terminal_items_only() {
    let storage = Arc::new(MockDeliveryStorage::new());

    let old_completed = item_with_age(QueueStatus::Completed, 8);
    let old_failed = item_with_age(QueueStatus::Failed, 8);
    let old_cancelled = item_with_age(QueueStatus::Cancelled, 8);
    let fresh_completed = item_with_age(QueueStatus::Completed, 2);
    let ids_purged = [old_completed.id, old_failed.id, old_cancelled.id];
    let fresh_id = fresh_completed.id;

    for item in [old_completed, old_failed, old_cancelled, fresh_completed] {
        storage.add_item(item).await;
    }

    let report = sweeper(storage.clone()).sweep_once().await.unwrap();
    assert_eq!(report.purged, 3);

    for id in ids_purged {
        assert!(storage.item(id).await.is_none());
    }
    assert!(storage.item(fresh_id).await.is_some());
}

#[tokio::test]
async fn old_pending_item_is_left_untouched() {
    let storage = Arc::new(MockDeliveryStorage::new());

    let old_pending = item_with_age(QueueStatus::Pending, 8);
    let pending_id = old_pending.id;
    storage.add_item(old_pending).await;

    let report = sweeper(storage.clone()).sweep_once().await.unwrap();
    assert_eq!(report.purged, 0);
    assert!(storage.verify_item_status(pending_id, QueueStatus::Pending).await);
}

#[tokio::test]
async fn reclaims_items_stranded_in_processing() {
    let storage = Arc::new(MockDeliveryStorage::new());

    // Stranded: claimed days ago, the claiming task never settled it.
    let stranded = item_with_age(QueueStatus::Processing, 1);
    let stranded_id = stranded.id;
    storage.add_item(stranded).await;

    // In-flight: claimed seconds ago, still within the delivery budget.
    let mut in_flight = item_with_age(QueueStatus::Processing, 0);
    in_flight.started_at = Some(Utc::now() - TimeDelta::try_seconds(5).unwrap());
    let in_flight_id = in_flight.id;
    storage.add_item(in_flight).await;

    let report = sweeper(storage.clone()).sweep_once().await.unwrap();
    assert_eq!(report.reclaimed, 1);

    let reclaimed = storage.item(stranded_id).await.unwrap();
    assert_eq!(reclaimed.status, QueueStatus::Pending);
    assert!(reclaimed.started_at.is_none());

    assert!(storage.verify_item_status(in_flight_id, QueueStatus::Processing).await);
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let storage = Arc::new(MockDeliveryStorage::new());
    storage.add_item(item_with_age(QueueStatus::Completed, 10)).await;

    let sweeper = sweeper(storage.clone());
    let first = sweeper.sweep_once().await.unwrap();
    assert_eq!(first.purged, 1);

    let second = sweeper.sweep_once().await.unwrap();
    assert_eq!(second.purged, 0);
    assert_eq!(second.reclaimed, 0);
}
