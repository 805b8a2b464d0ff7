use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use local_notifier::model::{NotificationKind, SCHEDULED_TEXT_CATEGORY};
use local_notifier::orchestrator::{Clock, NotificationOrchestrator, NudgeStatus};
use local_notifier::platform::{NotificationPlatform, PermissionStatus};
use local_notifier::store::{HandleStore, KeyValueStore, MemoryKvStore, BATCH_DATE_KEY, BATCH_HANDLES_KEY};
use local_notifier::windows::Window;
use local_notifier::{NotificationHandle, NotificationPayload, PendingNotification, ScheduleError, Scheduler};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct PlatformState {
    next_id: u64,
    pending: Vec<PendingNotification>,
    scheduled: Vec<NotificationHandle>,
    cancel_calls: Vec<NotificationHandle>,
    denied: bool,
    fail_schedule_at_call: Option<usize>,
    fail_cancel: HashSet<NotificationHandle>,
}

#[derive(Clone, Default)]
struct RecordingPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl RecordingPlatform {
    async fn pending(&self) -> Vec<PendingNotification> {
        self.state.lock().await.pending.clone()
    }

    async fn schedule_calls(&self) -> usize {
        self.state.lock().await.scheduled.len()
    }

    async fn cancel_calls(&self) -> Vec<NotificationHandle> {
        self.state.lock().await.cancel_calls.clone()
    }

    /// Drop a notification as if it fired or the OS discarded it.
    async fn forget(&self, handle: &NotificationHandle) {
        self.state.lock().await.pending.retain(|p| &p.handle != handle);
    }

    async fn deny(&self) {
        self.state.lock().await.denied = true;
    }
}

#[async_trait::async_trait]
impl NotificationPlatform for RecordingPlatform {
    async fn permission_status(&self) -> Result<PermissionStatus> {
        Ok(if self.state.lock().await.denied {
            PermissionStatus::Denied
        } else {
            PermissionStatus::Granted
        })
    }

    async fn request_permission(&self) -> Result<PermissionStatus> {
        self.permission_status().await
    }

    async fn schedule_at(
        &self,
        payload: &NotificationPayload,
        fire_at: DateTime<Utc>,
        category: Option<&str>,
    ) -> Result<NotificationHandle> {
        let mut state = self.state.lock().await;
        let call = state.scheduled.len() + 1;
        if state.fail_schedule_at_call == Some(call) {
            return Err(anyhow!("platform busy"));
        }
        state.next_id += 1;
        let handle = NotificationHandle::new(format!("n-{}", state.next_id));
        state.scheduled.push(handle.clone());
        state.pending.push(PendingNotification {
            handle: handle.clone(),
            payload: payload.clone(),
            fire_at,
            category: category.map(str::to_string),
        });
        Ok(handle)
    }

    async fn cancel(&self, handle: &NotificationHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        state.cancel_calls.push(handle.clone());
        if state.fail_cancel.contains(handle) {
            return Err(anyhow!("cancel failed"));
        }
        state.pending.retain(|p| &p.handle != handle);
        Ok(())
    }

    async fn list_scheduled(&self) -> Result<Vec<PendingNotification>> {
        Ok(self.state.lock().await.pending.clone())
    }
}

struct TestClock(std::sync::Mutex<DateTime<Utc>>);

impl TestClock {
    fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

fn zone() -> FixedOffset {
    FixedOffset::east_opt(2 * 3600).unwrap()
}

fn local(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    zone()
        .with_ymd_and_hms(2025, 6, d, h, m, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
}

struct Harness {
    platform: RecordingPlatform,
    kv: MemoryKvStore,
    clock: Arc<TestClock>,
    orch: NotificationOrchestrator<FixedOffset>,
}

impl Harness {
    fn new(now: DateTime<Utc>) -> Self {
        let platform = RecordingPlatform::default();
        let kv = MemoryKvStore::new();
        let clock = Arc::new(TestClock(std::sync::Mutex::new(now)));
        let orch = Self::orchestrator(&platform, &kv, &clock, 7);
        Self {
            platform,
            kv,
            clock,
            orch,
        }
    }

    /// A fresh orchestrator over the same device and persistence, as after a restart.
    fn restart(&self) -> NotificationOrchestrator<FixedOffset> {
        Self::orchestrator(&self.platform, &self.kv, &self.clock, 99)
    }

    fn orchestrator(
        platform: &RecordingPlatform,
        kv: &MemoryKvStore,
        clock: &Arc<TestClock>,
        seed: u64,
    ) -> NotificationOrchestrator<FixedOffset> {
        NotificationOrchestrator::new(
            Scheduler::new(Arc::new(platform.clone())),
            HandleStore::new(Arc::new(kv.clone())),
            clock.clone(),
            zone(),
            StdRng::seed_from_u64(seed),
        )
    }

    async fn stored_date(&self) -> Option<String> {
        self.kv.get(BATCH_DATE_KEY).await.unwrap()
    }
}

fn scheduled(status: NudgeStatus) -> local_notifier::ScheduledBatch {
    match status {
        NudgeStatus::Scheduled(batch) => batch,
        other => panic!("expected Scheduled, got {:?}", other),
    }
}

#[tokio::test]
async fn early_morning_start_schedules_both_slots_today() {
    let h = Harness::new(local(1, 8, 0));
    let batch = scheduled(h.orch.start().await);

    assert_eq!(batch.date, day(1));
    assert_eq!(batch.handles.len(), 2);
    assert_eq!(h.stored_date().await.as_deref(), Some("2025-06-01"));

    let pending = h.platform.pending().await;
    assert_eq!(pending.len(), 2);
    let morning = pending.iter().find(|p| p.handle == batch.handles[0]).unwrap();
    let evening = pending.iter().find(|p| p.handle == batch.handles[1]).unwrap();

    let m = morning.fire_at.with_timezone(&zone());
    let e = evening.fire_at.with_timezone(&zone());
    assert_eq!(m.date_naive(), day(1));
    assert_eq!(e.date_naive(), day(1));
    assert!(Window::morning().contains(m.time()));
    assert!(Window::evening().contains(e.time()));

    assert_eq!(morning.payload.kind(), Some(NotificationKind::DailyNudge));
    assert_eq!(morning.payload.field("slot"), Some("am"));
    assert_eq!(evening.payload.field("slot"), Some("pm"));
    assert!(!morning.payload.title().is_empty());
}

#[tokio::test]
async fn second_start_same_day_is_a_no_op() {
    let h = Harness::new(local(1, 8, 0));
    let first = scheduled(h.orch.start().await);

    h.clock.set(local(1, 18, 0));
    match h.orch.start().await {
        NudgeStatus::AlreadyScheduled(batch) => assert_eq!(batch, first),
        other => panic!("expected AlreadyScheduled, got {:?}", other),
    }
    assert_eq!(h.platform.schedule_calls().await, 2);
    assert_eq!(h.platform.pending().await.len(), 2);
}

#[tokio::test]
async fn restart_same_day_reuses_persisted_batch() {
    let h = Harness::new(local(1, 8, 0));
    scheduled(h.orch.start().await);

    let after_restart = h.restart();
    assert!(matches!(
        after_restart.start().await,
        NudgeStatus::AlreadyScheduled(_)
    ));
    assert_eq!(h.platform.schedule_calls().await, 2);
}

#[tokio::test]
async fn missing_handle_replaces_whole_batch() {
    let h = Harness::new(local(1, 8, 0));
    let old = scheduled(h.orch.start().await);
    h.platform.forget(&old.handles[0]).await;

    let new = scheduled(h.orch.start().await);
    assert_eq!(new.date, day(1));
    assert_eq!(new.handles.len(), 2);
    assert!(new.handles.iter().all(|n| !old.handles.contains(n)));

    // The surviving old handle was cancelled, not kept alongside the new pair.
    assert!(h.platform.cancel_calls().await.contains(&old.handles[1]));
    let pending: Vec<_> = h.platform.pending().await.into_iter().map(|p| p.handle).collect();
    assert_eq!(pending.len(), 2);
    assert!(new.handles.iter().all(|n| pending.contains(n)));
    assert_eq!(h.platform.schedule_calls().await, 4);
}

#[tokio::test]
async fn yesterdays_batch_is_always_replaced() {
    let h = Harness::new(local(1, 8, 0));
    let old = scheduled(h.orch.start().await);

    h.clock.set(local(2, 7, 0));
    let new = scheduled(h.orch.start().await);
    assert_eq!(new.date, day(2));
    assert_eq!(h.stored_date().await.as_deref(), Some("2025-06-02"));
    assert_eq!(h.platform.schedule_calls().await, 4);

    let pending: Vec<_> = h.platform.pending().await.into_iter().map(|p| p.handle).collect();
    assert_eq!(pending.len(), 2);
    assert!(old.handles.iter().all(|o| !pending.contains(o)));
}

#[tokio::test]
async fn near_end_of_morning_window_pushes_morning_to_tomorrow() {
    let h = Harness::new(local(1, 10, 25));
    let batch = scheduled(h.orch.start().await);
    let pending = h.platform.pending().await;
    let morning = pending.iter().find(|p| p.handle == batch.handles[0]).unwrap();
    let m = morning.fire_at.with_timezone(&zone());

    // Every morning draw today is at or before now + 5 minutes (10:30).
    assert!(Window::morning().contains(m.time()));
    assert_eq!(m.date_naive(), day(2));
    assert_eq!(batch.date, day(1));
}

#[tokio::test]
async fn stop_cancels_batch_and_clears_store_even_when_a_cancel_fails() {
    let h = Harness::new(local(1, 8, 0));
    let batch = scheduled(h.orch.start().await);
    h.platform
        .state
        .lock()
        .await
        .fail_cancel
        .insert(batch.handles[0].clone());

    h.orch.stop().await;

    assert!(h.stored_date().await.is_none());
    assert!(h.kv.get(BATCH_HANDLES_KEY).await.unwrap().is_none());
    let cancelled = h.platform.cancel_calls().await;
    assert!(batch.handles.iter().all(|b| cancelled.contains(b)));
    let pending: Vec<_> = h.platform.pending().await.into_iter().map(|p| p.handle).collect();
    assert_eq!(pending, vec![batch.handles[0].clone()]);
}

#[tokio::test]
async fn permission_denied_degrades_without_state() {
    let h = Harness::new(local(1, 8, 0));
    h.platform.deny().await;

    match h.orch.start().await {
        NudgeStatus::Failed(ScheduleError::PermissionDenied) => {}
        other => panic!("expected permission failure, got {:?}", other),
    }
    assert!(h.platform.pending().await.is_empty());
    assert!(h.stored_date().await.is_none());
}

#[tokio::test]
async fn failed_second_slot_rolls_back_first() {
    let h = Harness::new(local(1, 8, 0));
    h.platform.state.lock().await.fail_schedule_at_call = Some(2);

    assert!(matches!(
        h.orch.start().await,
        NudgeStatus::Failed(ScheduleError::Unavailable(_))
    ));
    assert!(h.platform.pending().await.is_empty());
    assert!(h.stored_date().await.is_none());

    // Next launch retries from scratch.
    h.platform.state.lock().await.fail_schedule_at_call = None;
    assert_eq!(scheduled(h.orch.start().await).handles.len(), 2);
}

#[tokio::test]
async fn stray_pending_nudges_are_pruned_on_replace() {
    let h = Harness::new(local(1, 8, 0));
    let stray = h
        .platform
        .schedule_at(
            &NotificationPayload::new(NotificationKind::DailyNudge, "old", "leaked"),
            local(1, 9, 45),
            None,
        )
        .await
        .unwrap();
    let reminder = h
        .platform
        .schedule_at(&NotificationPayload::reminder(1, "keep", "me"), local(1, 12, 0), None)
        .await
        .unwrap();

    scheduled(h.orch.start().await);

    let pending: Vec<_> = h.platform.pending().await.into_iter().map(|p| p.handle).collect();
    assert!(!pending.contains(&stray));
    assert!(pending.contains(&reminder));
    assert_eq!(pending.len(), 3);
}

#[tokio::test]
async fn corrupt_store_fails_open() {
    let h = Harness::new(local(1, 8, 0));
    h.kv.set(BATCH_DATE_KEY, "2025-06-01").await.unwrap();
    h.kv.set(BATCH_HANDLES_KEY, "not-json").await.unwrap();

    let batch = scheduled(h.orch.start().await);
    assert_eq!(batch.handles.len(), 2);
}

#[tokio::test]
async fn interleaved_starts_schedule_once() {
    let h = Harness::new(local(1, 8, 0));
    let (a, b) = tokio::join!(h.orch.start(), h.orch.start());

    let outcomes = [a, b];
    assert_eq!(
        outcomes
            .iter()
            .filter(|s| matches!(s, NudgeStatus::Scheduled(_)))
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|s| matches!(s, NudgeStatus::AlreadyScheduled(_)))
            .count(),
        1
    );
    assert_eq!(h.platform.schedule_calls().await, 2);
}

#[tokio::test]
async fn disabled_nudges_touch_nothing() {
    let h = Harness::new(local(1, 8, 0));
    let orch = h.restart().with_nudges_enabled(false);
    assert!(matches!(orch.start().await, NudgeStatus::Disabled));
    assert_eq!(h.platform.schedule_calls().await, 0);
}

#[tokio::test]
async fn past_reminder_is_rejected_before_platform_call() {
    let h = Harness::new(local(1, 8, 0));
    let payload = NotificationPayload::reminder(5, "Call", "now");

    let err = h
        .orch
        .schedule_reminder(payload.clone(), local(1, 8, 0) - Duration::seconds(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ScheduleError::InvalidSchedule { .. }));

    let err = h.orch.schedule_reminder(payload, local(1, 8, 0)).await.unwrap_err();
    assert!(matches!(err, ScheduleError::InvalidSchedule { .. }));
    assert_eq!(h.platform.schedule_calls().await, 0);
}

#[tokio::test]
async fn domain_linked_notifications_are_tagged() {
    let h = Harness::new(local(1, 8, 0));
    let reminder = h
        .orch
        .schedule_reminder(NotificationPayload::reminder(5, "Call", "Sam"), local(1, 9, 0))
        .await
        .unwrap();
    let text = h
        .orch
        .schedule_scheduled_text(
            NotificationPayload::scheduled_text(9, "Ana", "+15550100", "hi"),
            local(1, 9, 0),
        )
        .await
        .unwrap();

    let pending = h.orch.pending().await.unwrap();
    let r = pending.iter().find(|p| p.handle == reminder).unwrap();
    let t = pending.iter().find(|p| p.handle == text).unwrap();
    assert_eq!(r.category, None);
    assert_eq!(r.payload.field("reminderId"), Some("5"));
    assert_eq!(t.category.as_deref(), Some(SCHEDULED_TEXT_CATEGORY));
    assert_eq!(t.payload.field("messageId"), Some("9"));
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let h = Harness::new(local(1, 8, 0));
    let handle = h
        .orch
        .schedule_reminder(NotificationPayload::reminder(1, "a", "b"), local(1, 9, 0))
        .await
        .unwrap();

    h.orch.cancel(&handle).await.unwrap();
    h.orch.cancel(&handle).await.unwrap();
    assert!(h.platform.pending().await.is_empty());
}

#[tokio::test]
async fn cancel_all_clears_everything() {
    let h = Harness::new(local(1, 8, 0));
    scheduled(h.orch.start().await);
    h.orch
        .schedule_reminder(NotificationPayload::reminder(1, "a", "b"), local(1, 9, 0))
        .await
        .unwrap();

    h.orch.cancel_all().await.unwrap();
    assert!(h.platform.pending().await.is_empty());
    assert!(h.stored_date().await.is_none());
}
