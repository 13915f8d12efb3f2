//! Scheduled publisher integration

mod common;

use std::time::Duration;

use common::{harness, single_round_config, wait_for_status};
use groupcast::clock::now_ms;
use groupcast::engine::JobStatus;
use groupcast::publisher::ScheduledPublisher;
use groupcast::types::AdStatus;

#[tokio::test]
async fn test_tick_publishes_due_ad() {
    let h = harness(single_round_config()).await;
    let tenant = h.tenant("acme").await;
    h.session_with_groups(tenant, 2, -100).await;
    let ad = h.active_ad(tenant, "scheduled content").await;
    h.db.set_ad_schedule(ad, now_ms() - 1_000).await.unwrap();

    let publisher = ScheduledPublisher::new(h.db.clone(), h.engine.clone());
    publisher.tick().await.unwrap();

    let jobs = h.engine.tenant_jobs(tenant).await;
    assert_eq!(jobs.len(), 1);

    let refreshed = h.db.get_ad(ad).await.unwrap().unwrap();
    assert_eq!(refreshed.status, AdStatus::Active);
    assert!(!refreshed.is_scheduled);
    assert!(refreshed.last_scheduled_at.is_some());
    assert!(refreshed.last_error.is_none());

    h.engine.stop_job(&jobs[0].id).await.unwrap();
    wait_for_status(&jobs[0], JobStatus::Stopped, Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_tick_skips_future_and_draft_ads() {
    let h = harness(single_round_config()).await;
    let tenant = h.tenant("acme").await;
    h.session_with_groups(tenant, 2, -100).await;

    let future_ad = h.active_ad(tenant, "later").await;
    h.db.set_ad_schedule(future_ad, now_ms() + 3_600_000)
        .await
        .unwrap();

    // Draft status is not publishable even when due
    let draft_ad = h.db.create_ad(tenant, "draft", "draft content").await.unwrap();
    h.db.set_ad_schedule(draft_ad, now_ms() - 1_000).await.unwrap();

    let publisher = ScheduledPublisher::new(h.db.clone(), h.engine.clone());
    publisher.tick().await.unwrap();

    assert!(h.engine.tenant_jobs(tenant).await.is_empty());

    // The future ad keeps its schedule
    let refreshed = h.db.get_ad(future_ad).await.unwrap().unwrap();
    assert!(refreshed.is_scheduled);
}

#[tokio::test]
async fn test_tick_parks_ad_when_start_fails() {
    let h = harness(single_round_config()).await;
    let tenant = h.tenant("acme").await;
    // No sessions at all: StartPosting must fail
    let ad = h.active_ad(tenant, "content").await;
    h.db.set_ad_schedule(ad, now_ms() - 1_000).await.unwrap();

    let publisher = ScheduledPublisher::new(h.db.clone(), h.engine.clone());
    publisher.tick().await.unwrap();

    let refreshed = h.db.get_ad(ad).await.unwrap().unwrap();
    assert_eq!(refreshed.status, AdStatus::Paused);
    assert!(!refreshed.is_scheduled);
    assert!(refreshed
        .last_error
        .as_deref()
        .unwrap()
        .contains("no usable session"));
}

#[tokio::test]
async fn test_paused_scheduled_ad_is_published() {
    let h = harness(single_round_config()).await;
    let tenant = h.tenant("acme").await;
    h.session_with_groups(tenant, 1, -100).await;

    let ad = h.active_ad(tenant, "content").await;
    h.db.update_ad_status(ad, AdStatus::Paused).await.unwrap();
    h.db.set_ad_schedule(ad, now_ms() - 1_000).await.unwrap();

    let publisher = ScheduledPublisher::new(h.db.clone(), h.engine.clone());
    publisher.tick().await.unwrap();

    let refreshed = h.db.get_ad(ad).await.unwrap().unwrap();
    assert_eq!(refreshed.status, AdStatus::Active);

    let jobs = h.engine.tenant_jobs(tenant).await;
    assert_eq!(jobs.len(), 1);
    h.engine.stop_job(&jobs[0].id).await.unwrap();
    wait_for_status(&jobs[0], JobStatus::Stopped, Duration::from_secs(2)).await;
}
