//! Shared fixtures for the waymark-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use time::OffsetDateTime;
use time::macros::datetime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use waymark_core::mock::{MockPositioning, RecordingIndicator};
use waymark_core::{
    Clock, LocationFix, PerformanceMode, SettingsHandle, SharedStore, Tracker, TrackerEvent,
    TrackerHandle, TrackingState,
};
use waymark_store::Store;

pub const T0: OffsetDateTime = datetime!(2024-05-01 08:00 UTC);
pub const ORIGIN: (f64, f64) = (52.52, 13.405);

pub fn memory_store() -> SharedStore {
    Arc::new(Mutex::new(Store::open_in_memory().unwrap()))
}

/// A fix `north_m` meters north of [`ORIGIN`], captured now.
pub fn fix(clock: &Clock, north_m: f64, accuracy: f64) -> LocationFix {
    let (lat, lon) = waymark_types::offset_meters(ORIGIN.0, ORIGIN.1, north_m, 0.0);
    LocationFix::builder(lat, lon)
        .accuracy(accuracy)
        .timestamp(clock.now())
        .build()
}

pub struct Rig {
    pub handle: TrackerHandle,
    pub positioning: Arc<MockPositioning>,
    pub indicator: Arc<RecordingIndicator>,
    pub store: SharedStore,
    pub settings: SettingsHandle,
    pub clock: Clock,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl Rig {
    /// Spawn a tracker in `mode` and bring it to `active`.
    pub async fn active(mode: PerformanceMode) -> Self {
        Self::active_with(mode, memory_store(), SettingsHandle::default()).await
    }

    pub async fn active_with(
        mode: PerformanceMode,
        store: SharedStore,
        settings: SettingsHandle,
    ) -> Self {
        let positioning = Arc::new(MockPositioning::new());
        let indicator = Arc::new(RecordingIndicator::new());
        let clock = Clock::starting_at(T0);
        let cancel = CancellationToken::new();

        let (tracker, handle) = Tracker::new(
            positioning.clone(),
            indicator.clone(),
            store.clone(),
            settings.clone(),
        );
        let task = tracker
            .with_clock(clock)
            .with_mode(mode)
            .spawn(cancel.child_token());

        handle.activate().await.unwrap();
        handle.grant_permissions().await.unwrap();
        assert_eq!(handle.start().await.unwrap(), TrackingState::Active);

        Self {
            handle,
            positioning,
            indicator,
            store,
            settings,
            clock,
            cancel,
            task,
        }
    }

    /// Emit a fix and wait until the tracker has handled it.
    pub async fn emit(&self, north_m: f64, accuracy: f64) -> LocationFix {
        let fix = fix(&self.clock, north_m, accuracy);
        self.positioning.emit_fix(fix.clone());
        self.settle().await;
        fix
    }

    /// Round-trip a no-op command; fixes already emitted are handled first.
    pub async fn settle(&self) {
        let logging = self.handle.status().timeline_logging;
        self.handle.set_timeline_logging(logging).await.unwrap();
    }

    pub async fn rows(&self) -> u64 {
        self.store.lock().await.count(None).unwrap()
    }
}

/// Drain every event currently buffered.
pub fn drain_events(rx: &mut waymark_core::EventReceiver) -> Vec<TrackerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
