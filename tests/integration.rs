// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for Outbound Sync
//!
//! Every test runs against a throwaway SQLite file and mock destinations, so
//! nothing here needs Docker. Redis-backed lock tests live in `redis_lock.rs`.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//!
//! # Run specific group
//! cargo test --test integration staleness_
//! ```
//!
//! # Test Organization
//! - `staleness_*` - Threshold boundary, dependencies, destination isolation
//! - `sync_*` - Synchronizer round trip and failure handling
//! - `batch_*` - Paging in both modes
//! - `enqueue_*` - Dedup lock and retry
//! - `hook_*` - Change hooks on the service facade
//! - `sweep_*` - Periodic sweep

mod common;

use common::{Fixture, T0};
use outbound_sync::batch::{BatchDriver, BatchMode, BatchOptions};
use outbound_sync::config::{JobSettings, SweepConfig, SyncConfig};
use outbound_sync::jobs::{ChannelQueue, EnqueueGuard, JobOutcome, MemoryLockCache, ScheduleOutcome, SyncJob};
use outbound_sync::service::{HookOutcome, SyncService};
use outbound_sync::{DeleteOutcome, Record, SyncError, SyncOutcome, Synchronizer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

async fn load(fx: &Fixture, entity_type: &str, id: i64) -> Record {
    let entity = fx.registry.entity(entity_type).unwrap();
    Record::load(fx.pool(), entity, id).await.unwrap().unwrap()
}

fn service(fx: &Fixture) -> SyncService {
    SyncService::new(fx.registry.clone(), fx.store.clone())
}

fn queued_service(fx: &Fixture) -> (SyncService, mpsc::Receiver<SyncJob>) {
    let (queue, rx) = ChannelQueue::new(64);
    let service = service(fx).with_enqueue(
        Arc::new(MemoryLockCache::new()),
        Arc::new(queue),
        &SyncConfig::for_testing().jobs,
    );
    (service, rx)
}

// =============================================================================
// Staleness
// =============================================================================

#[tokio::test]
async fn staleness_threshold_is_strict() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;

    fx.mark_synced("Company", 1, "crm", T0 - 1_000).await;
    assert_eq!(fx.stale_ids("Company", "crm").await, vec![1]);

    fx.mark_synced("Company", 1, "crm", T0).await;
    assert!(fx.stale_ids("Company", "crm").await.is_empty());

    fx.mark_synced("Company", 1, "crm", T0 + 1_000).await;
    assert!(fx.stale_ids("Company", "crm").await.is_empty());
}

#[tokio::test]
async fn staleness_never_synced_and_failed_first_sync_are_stale() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    fx.insert_company(2, "globex", T0).await;
    assert_eq!(fx.stale_ids("Company", "crm").await, vec![1, 2]);

    // A state row that only ever recorded an error has no last_synced_at
    let mut failed = fx.store.find_or_init("Company", 2, "crm").await.unwrap();
    failed.record_failure("boom");
    fx.store.save(&mut failed).await.unwrap();
    assert_eq!(fx.stale_ids("Company", "crm").await, vec![1, 2]);
}

#[tokio::test]
async fn staleness_has_many_dependency_propagates() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0 - 10_000).await;
    fx.insert_company(2, "globex", T0 - 10_000).await;
    fx.insert_contact(1, 1, T0 - 5_000).await;
    fx.insert_contact(2, 2, T0 - 5_000).await;
    for id in [1, 2] {
        fx.mark_synced("Company", id, "crm", T0).await;
        fx.mark_synced("Company", id, "billing", T0).await;
    }
    assert!(fx.stale_ids("Company", "crm").await.is_empty());

    fx.exec(&format!("UPDATE contacts SET updated_at = {} WHERE id = 1", T0 + 5_000)).await;
    assert_eq!(fx.stale_ids("Company", "crm").await, vec![1]);
    // contacts are not a billing dependency
    assert!(fx.stale_ids("Company", "billing").await.is_empty());
}

#[tokio::test]
async fn staleness_destination_isolation() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0 - 10_000).await;
    fx.insert_deal(1, 1, T0 - 10_000).await;
    fx.mark_synced("Company", 1, "crm", T0).await;
    fx.mark_synced("Company", 1, "billing", T0).await;

    fx.exec(&format!("UPDATE deals SET updated_at = {} WHERE id = 1", T0 + 5_000)).await;
    assert_eq!(fx.stale_ids("Company", "billing").await, vec![1]);
    assert!(fx.stale_ids("Company", "crm").await.is_empty());

    // Refreshing billing leaves crm's state alone
    fx.mark_synced("Company", 1, "billing", T0 + 10_000).await;
    assert!(fx.stale_ids("Company", "billing").await.is_empty());
    let crm = fx.state("Company", 1, "crm").await.unwrap();
    assert_eq!(crm.last_synced_at.unwrap().timestamp_millis(), T0);
}

#[tokio::test]
async fn staleness_through_dependency_honours_owner_type() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0 - 10_000).await;
    fx.insert_company(2, "globex", T0 - 10_000).await;
    fx.exec(&format!("INSERT INTO tags (id, name, updated_at) VALUES (1, 'vip', {})", T0 - 10_000)).await;
    // Company 1 is tagged; a Contact with id 2 is tagged, not Company 2
    fx.exec("INSERT INTO taggings (id, taggable_type, taggable_id, tag_id, updated_at) VALUES (1, 'Company', 1, 1, 0), (2, 'Contact', 2, 1, 0)").await;
    for id in [1, 2] {
        fx.mark_synced("Company", id, "crm", T0).await;
    }
    assert!(fx.stale_ids("Company", "crm").await.is_empty());

    fx.exec(&format!("UPDATE tags SET updated_at = {} WHERE id = 1", T0 + 5_000)).await;
    assert_eq!(fx.stale_ids("Company", "crm").await, vec![1]);
}

#[tokio::test]
async fn staleness_polymorphic_skips_unknown_types() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0 - 10_000).await;
    fx.insert_note(1, Some("Company"), 1, T0 - 10_000).await;
    fx.insert_note(2, Some("Ghost"), 1, T0 - 10_000).await;
    fx.insert_note(3, None, 1, T0 - 10_000).await;
    for id in [1, 2, 3] {
        fx.mark_synced("Note", id, "crm", T0).await;
    }
    assert!(fx.stale_ids("Note", "crm").await.is_empty());

    fx.exec(&format!("UPDATE companies SET updated_at = {} WHERE id = 1", T0 + 5_000)).await;
    assert_eq!(fx.stale_ids("Note", "crm").await, vec![1]);
}

#[tokio::test]
async fn staleness_find_filters_and_rejects_unknown_types() {
    let fx = Fixture::new().await;
    let finder = fx.finder();

    let all = finder.find(None, None).await.unwrap();
    assert_eq!(all.keys().map(String::as_str).collect::<Vec<_>>(), vec!["Company", "Contact", "Note"]);
    assert_eq!(all["Company"].len(), 2);

    let billing = finder.find(None, Some("billing")).await.unwrap();
    assert_eq!(billing.keys().map(String::as_str).collect::<Vec<_>>(), vec!["Company"]);

    assert!(matches!(finder.find(Some(&["Invoice"][..]), None).await, Err(SyncError::Config(_))));
}

// =============================================================================
// Synchronizer
// =============================================================================

#[tokio::test]
async fn sync_round_trip_then_not_modified() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    let service = service(&fx);
    let record = load(&fx, "Company", 1).await;

    let first = service.sync(&record, "crm").await.unwrap();
    assert!(matches!(&first, SyncOutcome::Synced { remote_id: Some(id), .. } if id == "companies-1"));
    let after_first = fx.state("Company", 1, "crm").await.unwrap();
    assert!(after_first.last_digest.is_some());
    assert_eq!(fx.crm.upserts()[0].identity_property.as_deref(), Some("domain"));

    let second = service.sync(&record, "crm").await.unwrap();
    assert_eq!(second, SyncOutcome::NotModified);
    let after_second = fx.state("Company", 1, "crm").await.unwrap();
    assert_eq!(after_second.remote_id, after_first.remote_id);
    assert_eq!(after_second.last_digest, after_first.last_digest);
    assert!(after_second.last_synced_at >= after_first.last_synced_at);
    assert_eq!(fx.crm.upsert_count(), 1);
}

#[tokio::test]
async fn sync_failure_preserves_prior_success() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    let service = service(&fx);
    let record = load(&fx, "Company", 1).await;
    service.sync(&record, "crm").await.unwrap();
    let before = fx.state("Company", 1, "crm").await.unwrap();

    fx.exec("UPDATE companies SET name = 'acme-renamed' WHERE id = 1").await;
    fx.crm.set_failing(true);
    let outcome = service.sync(&record, "crm").await.unwrap();
    assert!(matches!(&outcome, SyncOutcome::Error { message } if message.contains("mock destination failure")));

    let after = fx.state("Company", 1, "crm").await.unwrap();
    assert_eq!(after.remote_id, before.remote_id);
    assert_eq!(after.last_digest, before.last_digest);
    assert_eq!(after.last_synced_at, before.last_synced_at);
    assert!(after.last_error.is_some());

    // Next success clears the error
    fx.crm.set_failing(false);
    assert!(matches!(service.sync(&record, "crm").await.unwrap(), SyncOutcome::Synced { .. }));
    assert!(fx.state("Company", 1, "crm").await.unwrap().last_error.is_none());
}

#[tokio::test]
async fn sync_uses_current_row_not_stale_record() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    let record = load(&fx, "Company", 1).await;
    fx.exec("UPDATE companies SET name = 'acme-new' WHERE id = 1").await;

    service(&fx).sync(&record, "crm").await.unwrap();
    assert_eq!(fx.crm.upserts()[0].payload["name"], "acme-new");
}

// =============================================================================
// Batch
// =============================================================================

async fn five_stale_companies(fx: &Fixture) {
    for id in 1..=5 {
        fx.insert_company(id, &format!("co{}", id), T0).await;
    }
}

#[tokio::test]
async fn batch_pages_are_two_two_one() {
    let fx = Fixture::new().await;
    five_stale_companies(&fx).await;
    let entity = fx.registry.entity("Company").unwrap();
    let query = fx.finder().query_for(entity, "crm").await.unwrap();

    let mut sizes = Vec::new();
    let mut after = None;
    loop {
        let page = query.fetch_page(fx.pool(), after, 2).await.unwrap();
        sizes.push(page.len());
        if page.len() < 2 {
            break;
        }
        after = page.last().copied();
    }
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn batch_inline_processes_each_exactly_once() {
    let fx = Fixture::new().await;
    five_stale_companies(&fx).await;
    let driver = BatchDriver::new(fx.finder(), Synchronizer::new(fx.registry.clone(), fx.store.clone()));

    let options = BatchOptions::default()
        .entity_types(["Company"])
        .destination("crm")
        .page_size(2);
    let stats = driver.run(&options).await.unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.per_entity_type["Company"], 5);
    assert_eq!(stats.errors, 0);

    let mut pushed: Vec<String> = fx.crm.upserts().into_iter().map(|c| c.payload["name"].to_string()).collect();
    pushed.sort();
    pushed.dedup();
    assert_eq!(pushed.len(), 5);
    assert!(fx.billing.upserts().is_empty());

    // Everything is fresh now
    assert_eq!(driver.run(&options).await.unwrap().total, 0);
}

#[tokio::test]
async fn batch_inline_counts_errors_and_continues() {
    let fx = Fixture::new().await;
    five_stale_companies(&fx).await;
    fx.crm.set_failing(true);
    let driver = BatchDriver::new(fx.finder(), Synchronizer::new(fx.registry.clone(), fx.store.clone()));

    let stats = driver
        .run(&BatchOptions::default().destination("crm").entity_types(["Company"]).page_size(2))
        .await
        .unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.errors, 5);
}

#[tokio::test]
async fn batch_enqueue_schedules_each_exactly_once() {
    let fx = Fixture::new().await;
    five_stale_companies(&fx).await;
    let (service, mut rx) = queued_service(&fx);

    let options = BatchOptions::default()
        .entity_types(["Company"])
        .destination("crm")
        .mode(BatchMode::Enqueue)
        .page_size(2);
    let stats = service.batch_driver().run(&options).await.unwrap();
    assert_eq!(stats.total, 5);

    let mut ids = Vec::new();
    while let Ok(job) = rx.try_recv() {
        assert_eq!(job.destination, "crm");
        ids.push(job.id);
    }
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    // Enqueue mode never touches the destination itself
    assert_eq!(fx.crm.upsert_count(), 0);
}

#[tokio::test]
async fn batch_enqueue_schedules_every_destination() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    let (service, mut rx) = queued_service(&fx);

    let options = BatchOptions::default().entity_types(["Company"]).mode(BatchMode::Enqueue);
    let stats = service.batch_driver().run(&options).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.duplicates, 0);

    let mut jobs = Vec::new();
    while let Ok(job) = rx.try_recv() {
        jobs.push((job.destination, job.queue));
    }
    assert_eq!(
        jobs,
        vec![
            ("billing".to_string(), "billing_sync".to_string()),
            ("crm".to_string(), "outbound_sync".to_string()),
        ]
    );
}

#[tokio::test]
async fn batch_enqueue_counts_pending_duplicates_apart() {
    let fx = Fixture::new().await;
    five_stale_companies(&fx).await;
    let (service, mut rx) = queued_service(&fx);
    let guard = service.enqueue_guard().unwrap().clone();

    // Company 3 already has a crm job waiting
    assert_eq!(guard.schedule("Company", 3, "crm").await.unwrap(), ScheduleOutcome::Enqueued);
    assert_eq!(rx.recv().await.unwrap().id, 3);

    let options = BatchOptions::default()
        .entity_types(["Company"])
        .destination("crm")
        .mode(BatchMode::Enqueue)
        .page_size(2);
    let stats = service.batch_driver().run(&options).await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.per_entity_type.get("Company"), Some(&4));
    assert_eq!(stats.duplicates, 1);

    let mut ids = Vec::new();
    while let Ok(job) = rx.try_recv() {
        ids.push(job.id);
    }
    assert_eq!(ids, vec![1, 2, 4, 5]);
}

#[tokio::test]
async fn batch_enqueue_without_queue_is_config_error() {
    let fx = Fixture::new().await;
    let driver = service(&fx).batch_driver();
    let err = driver
        .run(&BatchOptions::default().mode(BatchMode::Enqueue))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

// =============================================================================
// Enqueue dedup
// =============================================================================

#[tokio::test]
async fn enqueue_dedups_until_performed() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    let (service, mut rx) = queued_service(&fx);
    let guard = service.enqueue_guard().unwrap().clone();

    assert_eq!(guard.schedule("Company", 1, "crm").await.unwrap(), ScheduleOutcome::Enqueued);
    assert_eq!(guard.schedule("Company", 1, "crm").await.unwrap(), ScheduleOutcome::Duplicate);
    // Each destination holds its own lock
    assert_eq!(guard.schedule("Company", 1, "billing").await.unwrap(), ScheduleOutcome::Enqueued);
    assert_eq!(guard.schedule("Company", 1, "billing").await.unwrap(), ScheduleOutcome::Duplicate);

    let crm_job = rx.recv().await.unwrap();
    let billing_job = rx.recv().await.unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(crm_job.queue, "outbound_sync");
    assert_eq!(billing_job.queue, "billing_sync");

    let outcome = guard.perform(crm_job).await.unwrap();
    assert!(matches!(outcome, JobOutcome::Completed(SyncOutcome::Synced { .. })));

    assert_eq!(guard.schedule("Company", 1, "crm").await.unwrap(), ScheduleOutcome::Enqueued);
    assert_eq!(guard.schedule("Company", 1, "billing").await.unwrap(), ScheduleOutcome::Duplicate);
    assert_eq!(rx.recv().await.unwrap().destination, "crm");
}

#[tokio::test]
async fn enqueue_lock_released_after_permanent_failure() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    let (service, mut rx) = queued_service(&fx);
    let guard = service.enqueue_guard().unwrap().clone();

    guard.schedule("Company", 1, "crm").await.unwrap();
    let job = rx.recv().await.unwrap();
    fx.exec("DROP TABLE companies").await;

    let err = guard.perform(job).await.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(guard.schedule("Company", 1, "crm").await.unwrap(), ScheduleOutcome::Enqueued);
}

#[tokio::test]
async fn enqueue_vanished_entity_is_skipped() {
    let fx = Fixture::new().await;
    let (service, mut rx) = queued_service(&fx);
    let guard = service.enqueue_guard().unwrap().clone();

    guard.schedule("Company", 42, "crm").await.unwrap();
    let job = rx.recv().await.unwrap();
    assert_eq!(guard.perform(job).await.unwrap(), JobOutcome::Skipped);
}

#[tokio::test]
async fn enqueue_transient_failure_is_retried_with_backoff() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    let (queue, mut rx) = ChannelQueue::new(8);
    let jobs = JobSettings {
        max_attempts: 2,
        initial_backoff_ms: 20,
        ..SyncConfig::for_testing().jobs
    };
    let guard = EnqueueGuard::new(
        Synchronizer::new(fx.registry.clone(), fx.store.clone()),
        Arc::new(MemoryLockCache::new()),
        Arc::new(queue),
    )
    .with_lock_ttl(jobs.lock_ttl())
    .with_retry(jobs.retry());

    guard.schedule("Company", 1, "crm").await.unwrap();
    let job = rx.recv().await.unwrap();
    fx.store.close().await;

    let outcome = guard.perform(job).await.unwrap();
    let JobOutcome::Retrying { next_attempt, delay } = outcome else {
        panic!("expected retry, got {:?}", outcome);
    };
    assert_eq!(next_attempt, 2);
    assert_eq!(delay.as_millis(), 20);
    let retry = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(retry.attempt, 2);

    // Out of attempts: the error comes back
    let err = guard.perform(retry).await.unwrap_err();
    assert!(err.is_retryable());
}

// =============================================================================
// Hooks
// =============================================================================

#[tokio::test]
async fn hook_after_commit_schedules_every_admitted_binding() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    fx.insert_contact(1, 1, T0).await;
    fx.exec("INSERT INTO contacts (id, company_id, email, updated_at) VALUES (2, 1, NULL, 0)").await;
    let (service, mut rx) = queued_service(&fx);

    let company = load(&fx, "Company", 1).await;
    let outcomes = service.after_commit(&company).await.unwrap();
    assert_eq!(
        outcomes,
        vec![
            ("billing".to_string(), HookOutcome::Scheduled(ScheduleOutcome::Enqueued)),
            ("crm".to_string(), HookOutcome::Scheduled(ScheduleOutcome::Enqueued)),
        ]
    );
    assert_eq!(rx.recv().await.unwrap().destination, "billing");
    assert_eq!(rx.recv().await.unwrap().destination, "crm");
    assert!(rx.try_recv().is_err());

    let guarded = load(&fx, "Contact", 2).await;
    assert_eq!(
        service.after_commit(&guarded).await.unwrap(),
        vec![("crm".to_string(), HookOutcome::Filtered)]
    );
    let admitted = load(&fx, "Contact", 1).await;
    assert_eq!(
        service.after_commit(&admitted).await.unwrap()[0].1,
        HookOutcome::Scheduled(ScheduleOutcome::Enqueued)
    );
}

#[tokio::test]
async fn hook_after_destroy_deletes_remotely_then_purges() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    let service = service(&fx);
    let record = load(&fx, "Company", 1).await;
    service.sync(&record, "crm").await.unwrap();
    service.sync(&record, "billing").await.unwrap();
    fx.exec("DELETE FROM companies WHERE id = 1").await;

    let outcomes = service.after_destroy(&record).await.unwrap();
    assert_eq!(
        outcomes,
        vec![
            ("billing".to_string(), DeleteOutcome::Deleted { confirmed: true }),
            ("crm".to_string(), DeleteOutcome::Deleted { confirmed: true }),
        ]
    );
    assert_eq!(fx.crm.deletes()[0].remote_id, "companies-1");
    assert_eq!(fx.billing.deletes()[0].object_type, "accounts");
    assert!(fx.store.list_for_resource("Company", 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn hook_after_destroy_failure_keeps_states() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    let service = service(&fx);
    let record = load(&fx, "Company", 1).await;
    service.sync(&record, "crm").await.unwrap();

    fx.crm.set_failing(true);
    let err = service.after_destroy(&record).await.unwrap_err();
    assert!(matches!(err, SyncError::Synchronization { .. }));
    assert!(fx.state("Company", 1, "crm").await.unwrap().remote_id.is_some());
}

// =============================================================================
// Boot and sweep
// =============================================================================

#[tokio::test]
async fn sweep_converges_and_stops_on_shutdown() {
    let fx = Fixture::new().await;
    fx.insert_company(1, "acme", T0).await;
    fx.insert_company(2, "globex", T0).await;
    let driver = service(&fx).batch_driver();
    let options = BatchOptions::default().destination("crm").entity_types(["Company"]);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(outbound_sync::sweep::run_sweep(
        driver,
        options,
        SweepConfig {
            enabled: true,
            interval_sec: 1,
        },
        shutdown_rx,
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while fx.crm.upsert_count() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    let cycles = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(cycles >= 1);
    assert!(fx.stale_ids("Company", "crm").await.is_empty());
}

#[tokio::test]
async fn boot_connect_runs_worker_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SyncConfig::for_testing();
    config.store.sqlite_path = dir.path().join("app.db").to_string_lossy().into_owned();

    let crm = Arc::new(common::MockDestination::new());
    let registry = Arc::new(common::fixture_registry(crm.clone(), Arc::new(common::MockDestination::new())));
    let (service, worker) = SyncService::connect(&config, registry).await.unwrap();
    sqlx::query("CREATE TABLE companies (id INTEGER PRIMARY KEY, name TEXT NOT NULL, domain TEXT, updated_at INTEGER)")
        .execute(service.store().pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO companies VALUES (1, 'acme', 'acme.example.com', 0)")
        .execute(service.store().pool())
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    let record = Record::load(service.store().pool(), service.registry().entity("Company").unwrap(), 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        service.sync_later(&record, "crm").await.unwrap(),
        Some(ScheduleOutcome::Enqueued)
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        while crm.upsert_count() < 1 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    assert_eq!(handle.await.unwrap(), 1);
}

#[tokio::test]
async fn boot_connect_rejects_state_table_without_destination() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SyncConfig::for_testing();
    config.store.sqlite_path = dir.path().join("legacy.db").to_string_lossy().into_owned();

    // A state table from before per-destination rows
    let legacy = outbound_sync::SyncStateStore::connect(&config.store.sqlite_path, 1).await.unwrap();
    sqlx::query(
        "CREATE TABLE sync_states (id INTEGER PRIMARY KEY, resource_type TEXT NOT NULL, \
         resource_id INTEGER NOT NULL, remote_id TEXT, last_synced_at INTEGER)",
    )
    .execute(legacy.pool())
    .await
    .unwrap();
    legacy.close().await;

    let registry = Arc::new(common::fixture_registry(
        Arc::new(common::MockDestination::new()),
        Arc::new(common::MockDestination::new()),
    ));
    let err = SyncService::connect(&config, registry).await.unwrap_err();
    assert!(
        matches!(&err, SyncError::Config(msg) if msg.contains("destination_name")),
        "unexpected error: {:?}",
        err
    );
}
