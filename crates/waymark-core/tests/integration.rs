//! End-to-end tests: tracker and sync engine sharing one store.
//!
//! Everything runs on a paused tokio clock with mock collaborators, so
//! multi-minute scenarios complete instantly and deterministically.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use waymark_core::mock::MockTransport;
use waymark_core::{
    Clock, DeliveryState, EntrySource, PerformanceMode, SettingsHandle, SyncEngine, TrackingState,
};
use waymark_store::{QueueQuery, Store};

use common::{Rig, T0, fix, memory_store};

// =============================================================================
// Acquisition to delivery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_end_to_end_threshold_then_delivery() {
    let rig = Rig::active(PerformanceMode::High).await;

    // A: baseline
    let a = rig.emit(0.0, 10.0).await;
    assert_eq!(rig.rows().await, 1);

    // B: 20 m away after 3 minutes, time threshold not met
    tokio::time::sleep(Duration::from_secs(180)).await;
    rig.emit(20.0, 15.0).await;
    assert_eq!(rig.rows().await, 1);

    // C: 20 m from A after 6 minutes
    tokio::time::sleep(Duration::from_secs(180)).await;
    let c = rig.emit(20.0, 15.0).await;
    assert_eq!(rig.rows().await, 2);

    let rows = rig
        .store
        .lock()
        .await
        .query(&QueueQuery::new().oldest_first())
        .unwrap();
    assert_eq!(rows[0].latitude, a.latitude);
    assert_eq!(rows[1].latitude, c.latitude);
    assert_eq!(rows[1].accuracy, 15.0);
    assert_eq!(rows[1].delivery_state, DeliveryState::Pending);
    let c_id = rows[1].id;

    let transport = Arc::new(MockTransport::new());
    let mut engine = SyncEngine::new(rig.store.clone(), transport.clone(), rig.settings.clone())
        .with_clock(rig.clock);
    let report = engine.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.synced, 2);

    let row = rig.store.lock().await.get(c_id).unwrap().unwrap();
    assert_eq!(row.delivery_state, DeliveryState::Synced);
    assert_eq!(row.attempt_count, 1);

    let payload = &transport.submissions()[1];
    assert_eq!(payload.latitude, c.latitude);
    assert!(payload.automatic);
}

#[tokio::test(start_paused = true)]
async fn test_manual_entry_is_delivered_as_user_initiated() {
    let rig = Rig::active(PerformanceMode::High).await;
    rig.emit(0.0, 10.0).await;

    // Seconds later: below both thresholds, but manual entries bypass them
    tokio::time::sleep(Duration::from_secs(5)).await;
    rig.emit(2.0, 10.0).await;
    let id = rig.handle.log_now().await.unwrap();

    let transport = Arc::new(MockTransport::new());
    let mut engine = SyncEngine::new(rig.store.clone(), transport.clone(), rig.settings.clone())
        .with_clock(rig.clock);
    engine.drain(&CancellationToken::new()).await.unwrap();

    let row = rig.store.lock().await.get(id).unwrap().unwrap();
    assert_eq!(row.source, EntrySource::Manual);
    assert_eq!(row.delivery_state, DeliveryState::Synced);
    assert!(!transport.submissions()[1].automatic);
}

#[tokio::test(start_paused = true)]
async fn test_settings_change_applies_without_restart() {
    let rig = Rig::active(PerformanceMode::High).await;
    rig.emit(0.0, 10.0).await;

    rig.settings
        .update(|s| s.distance_threshold_m = 100.0)
        .unwrap();

    // 6 minutes and 50 m: enough under the old threshold, not the new one
    tokio::time::sleep(Duration::from_secs(360)).await;
    let kept = rig.emit(50.0, 10.0).await;
    assert_eq!(rig.rows().await, 1);

    // Tighter ceiling: the next fix never reaches the tracker's state
    rig.settings.update(|s| s.accuracy_ceiling_m = 5.0).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    rig.emit(150.0, 10.0).await;
    assert_eq!(rig.rows().await, 1);
    assert_eq!(rig.handle.status().last_fix, Some(kept));
}

// =============================================================================
// Delivery behavior
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_backlog_respects_rate_limit() {
    let store = memory_store();
    let clock = Clock::starting_at(T0);
    {
        let store = store.lock().await;
        for i in 0..5 {
            let at = T0 + time::Duration::minutes(i * 6);
            let fix = waymark_core::LocationFix::builder(52.52 + i as f64 * 0.001, 13.405)
                .accuracy(10.0)
                .timestamp(at)
                .build();
            store.insert(&fix, EntrySource::Automatic, at).unwrap();
        }
    }

    let transport = Arc::new(MockTransport::new());
    let cancel = CancellationToken::new();
    let task = SyncEngine::new(store.clone(), transport.clone(), SettingsHandle::default())
        .with_clock(clock)
        .spawn(cancel.clone());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        store.lock().await.count(Some(DeliveryState::Synced)).unwrap(),
        5
    );

    let times = transport.submission_times();
    assert_eq!(times.len(), 5);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(12));
    }

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_crash_recovery_reclaims_syncing_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    let id = {
        let store = Store::open(&path).unwrap();
        let fix = common::fix(&Clock::starting_at(T0), 0.0, 10.0);
        let id = store.insert(&fix, EntrySource::Automatic, T0).unwrap();
        let claimed = store.claim_next(T0).unwrap().unwrap();
        assert_eq!(claimed.delivery_state, DeliveryState::Syncing);
        id
        // Dropped mid-attempt
    };

    let store = Arc::new(Mutex::new(Store::open(&path).unwrap()));
    assert_eq!(
        store.lock().await.get(id).unwrap().unwrap().delivery_state,
        DeliveryState::Pending
    );

    let mut engine = SyncEngine::new(
        store.clone(),
        Arc::new(MockTransport::new()),
        SettingsHandle::default(),
    )
    .with_clock(Clock::starting_at(T0 + time::Duration::minutes(1)));
    let report = engine.drain(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.synced, 1);

    let row = store.lock().await.get(id).unwrap().unwrap();
    assert_eq!(row.delivery_state, DeliveryState::Synced);
    assert_eq!(row.attempt_count, 2);
}

// =============================================================================
// Independent lifecycles
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stopping_tracker_does_not_interrupt_delivery() {
    let rig = Rig::active(PerformanceMode::High).await;
    rig.emit(0.0, 10.0).await;

    let transport = Arc::new(MockTransport::new());
    transport.set_latency(Duration::from_secs(5));
    let sync_cancel = CancellationToken::new();
    let engine = SyncEngine::new(rig.store.clone(), transport.clone(), rig.settings.clone())
        .with_clock(rig.clock);
    let sync = engine.handle();
    let sync_task = engine.spawn(sync_cancel.clone());
    sync.trigger();

    // Submission in flight; stop and tear down acquisition
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.submission_count(), 1);
    assert_eq!(rig.handle.stop().await.unwrap(), TrackingState::Stopped);
    rig.cancel.cancel();
    rig.task.await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(
        rig.store
            .lock()
            .await
            .count(Some(DeliveryState::Synced))
            .unwrap(),
        1
    );

    sync_cancel.cancel();
    sync_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_settles_in_flight_submission() {
    let store = memory_store();
    let clock = Clock::starting_at(T0);
    let id = store
        .lock()
        .await
        .insert(&fix(&clock, 0.0, 10.0), EntrySource::Automatic, T0)
        .unwrap();

    let transport = Arc::new(MockTransport::new());
    transport.set_latency(Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let task = SyncEngine::new(store.clone(), transport.clone(), SettingsHandle::default())
        .with_clock(clock)
        .spawn(cancel.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    task.await.unwrap();

    let store = store.lock().await;
    assert_eq!(
        store.get(id).unwrap().unwrap().delivery_state,
        DeliveryState::Synced
    );
    assert_eq!(store.count(Some(DeliveryState::Syncing)).unwrap(), 0);
}
