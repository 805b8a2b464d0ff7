//! Scheduling policy on top of [`Scheduler`]: the self-managing daily nudge
//! batch and future-only domain-linked notifications.
use crate::model::{
    NotificationHandle, NotificationKind, NotificationPayload, NudgeSlot, PendingNotification,
    ScheduleRequest, ScheduledBatch, SCHEDULED_TEXT_CATEGORY,
};
use crate::scheduler::{ScheduleError, Scheduler};
use crate::store::HandleStore;
use crate::windows::{local_day, pick_daily_times};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NudgeMessage {
    pub title: String,
    pub body: String,
}

impl NudgeMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

pub fn default_messages() -> Vec<NudgeMessage> {
    vec![
        NudgeMessage::new(
            "Have you met anyone new recently?",
            "Add them to your profiles so you never forget the important details.",
        ),
        NudgeMessage::new(
            "A quick hello can go a long way",
            "Double check your profiles so you can get the details right.",
        ),
        NudgeMessage::new(
            "Don't let your roster go quiet",
            "Check upcoming reminders, add new people, and check in with people you haven't spoken to in a while.",
        ),
        NudgeMessage::new(
            "Are your profiles up to date?",
            "Review notes, update last contact, and keep your roster fresh.",
        ),
        NudgeMessage::new(
            "Check in with your people",
            "Don't forget the important details. Your reminders have your back.",
        ),
    ]
}

/// Result of [`NotificationOrchestrator::start`]. Failures are reported here
/// rather than as an `Err` so app startup never aborts on them.
#[derive(Debug)]
pub enum NudgeStatus {
    Disabled,
    AlreadyScheduled(ScheduledBatch),
    Scheduled(ScheduledBatch),
    Failed(ScheduleError),
}

pub struct NotificationOrchestrator<Tz: TimeZone = Local> {
    scheduler: Scheduler,
    store: HandleStore,
    clock: Arc<dyn Clock>,
    tz: Tz,
    messages: Vec<NudgeMessage>,
    nudges_enabled: bool,
    // Held for the whole load -> decide -> schedule -> save sequence.
    batch_guard: Mutex<StdRng>,
}

impl<Tz> NotificationOrchestrator<Tz>
where
    Tz: TimeZone + Send + Sync,
    Tz::Offset: Send + Sync,
{
    pub fn new(
        scheduler: Scheduler,
        store: HandleStore,
        clock: Arc<dyn Clock>,
        tz: Tz,
        rng: StdRng,
    ) -> Self {
        Self {
            scheduler,
            store,
            clock,
            tz,
            messages: default_messages(),
            nudges_enabled: true,
            batch_guard: Mutex::new(rng),
        }
    }

    /// Replace the nudge message pool. An empty pool keeps the defaults.
    pub fn with_messages(mut self, messages: Vec<NudgeMessage>) -> Self {
        if messages.is_empty() {
            warn!("empty nudge message pool; keeping defaults");
        } else {
            self.messages = messages;
        }
        self
    }

    pub fn with_nudges_enabled(mut self, enabled: bool) -> Self {
        self.nudges_enabled = enabled;
        self
    }

    pub fn today(&self) -> NaiveDate {
        local_day(&self.tz, self.clock.now())
    }

    /// Make sure today's nudge batch is pending, scheduling it if needed.
    ///
    /// Same-day calls verify the stored handles against the platform and do
    /// nothing when all of them are still pending.
    #[instrument(skip_all)]
    pub async fn start(&self) -> NudgeStatus {
        if !self.nudges_enabled {
            info!("daily nudges disabled");
            return NudgeStatus::Disabled;
        }

        let mut rng = self.batch_guard.lock().await;
        let today = self.today();
        let previous = self.store.load().await;

        if let Some(batch) = previous.as_ref().filter(|b| b.is_for(today)) {
            match self.scheduler.list_pending().await {
                Ok(pending) if all_pending(batch, &pending) => {
                    info!(date = %today, "nudge batch already scheduled for today");
                    return NudgeStatus::AlreadyScheduled(batch.clone());
                }
                Ok(_) => {
                    warn!(date = %today, "nudge batch lost handles; replacing it");
                }
                Err(err) => {
                    warn!(%err, "could not verify nudge batch");
                    return NudgeStatus::Failed(err);
                }
            }
        }

        self.retire(previous.as_ref()).await;

        match self.schedule_batch(today, &mut rng).await {
            Ok(batch) => {
                info!(date = %batch.date, handles = ?batch.handles, "scheduled daily nudges");
                NudgeStatus::Scheduled(batch)
            }
            Err(err) if err.is_degraded_mode() => {
                warn!(%err, "daily nudges skipped; continuing without notifications");
                NudgeStatus::Failed(err)
            }
            Err(err) => {
                error!(%err, "failed to schedule daily nudges");
                NudgeStatus::Failed(err)
            }
        }
    }

    /// Cancel the persisted batch (best effort) and forget it.
    #[instrument(skip_all)]
    pub async fn stop(&self) {
        let _guard = self.batch_guard.lock().await;
        let previous = self.store.load().await;
        self.retire(previous.as_ref()).await;
        info!("daily nudges stopped");
    }

    /// Schedule the notification for a reminder. `fire_at` must lie in the
    /// future. The caller persists the returned handle on its reminder.
    pub async fn schedule_reminder(
        &self,
        payload: NotificationPayload,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationHandle, ScheduleError> {
        self.schedule_linked(ScheduleRequest::new(payload, fire_at))
            .await
    }

    /// Like [`Self::schedule_reminder`], tagged with the scheduled-text category.
    pub async fn schedule_scheduled_text(
        &self,
        payload: NotificationPayload,
        fire_at: DateTime<Utc>,
    ) -> Result<NotificationHandle, ScheduleError> {
        self.schedule_linked(
            ScheduleRequest::new(payload, fire_at).with_category(SCHEDULED_TEXT_CATEGORY),
        )
        .await
    }

    pub async fn cancel(&self, handle: &NotificationHandle) -> Result<(), ScheduleError> {
        self.scheduler.cancel(handle).await?;
        info!(%handle, "cancelled notification");
        Ok(())
    }

    /// Cancel everything still pending, nudges and domain-linked alike.
    #[instrument(skip_all)]
    pub async fn cancel_all(&self) -> Result<(), ScheduleError> {
        let _guard = self.batch_guard.lock().await;
        let pending = self.scheduler.list_pending().await?;
        for item in &pending {
            self.scheduler.cancel(&item.handle).await?;
        }
        if let Err(err) = self.store.clear().await {
            warn!(?err, "failed to clear nudge batch store");
        }
        info!(count = pending.len(), "cancelled all notifications");
        Ok(())
    }

    pub async fn pending(&self) -> Result<Vec<PendingNotification>, ScheduleError> {
        self.scheduler.list_pending().await
    }

    /// Reject instants at or before now. Domain services call this before
    /// writing their entity so a past time never reaches the database.
    pub fn ensure_future(&self, fire_at: DateTime<Utc>) -> Result<(), ScheduleError> {
        let now = self.clock.now();
        if fire_at <= now {
            return Err(ScheduleError::InvalidSchedule { fire_at, now });
        }
        Ok(())
    }

    async fn schedule_linked(&self, req: ScheduleRequest) -> Result<NotificationHandle, ScheduleError> {
        self.ensure_future(req.fire_at)?;
        self.scheduler.schedule(&req).await
    }

    async fn schedule_batch(
        &self,
        today: NaiveDate,
        rng: &mut StdRng,
    ) -> Result<ScheduledBatch, ScheduleError> {
        let now = self.clock.now().with_timezone(&self.tz);
        let times = pick_daily_times(&now, &mut *rng);
        let slots = [
            (NudgeSlot::Morning, times.morning),
            (NudgeSlot::Evening, times.evening),
        ];

        let mut handles = Vec::with_capacity(slots.len());
        for (slot, fire_at) in slots {
            let message = self.pick_message(rng);
            let payload =
                NotificationPayload::daily_nudge(&message.title, &message.body, slot, fire_at);
            match self.scheduler.schedule(&ScheduleRequest::new(payload, fire_at)).await {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    self.cancel_quietly(&handles).await;
                    return Err(err);
                }
            }
        }

        let batch = ScheduledBatch {
            date: today,
            handles,
        };
        if let Err(err) = self.store.save(&batch).await {
            self.cancel_quietly(&batch.handles).await;
            if let Err(clear_err) = self.store.clear().await {
                warn!(?clear_err, "failed to clear nudge batch store");
            }
            return Err(ScheduleError::Unavailable(err.context("persist nudge batch")));
        }
        Ok(batch)
    }

    fn pick_message(&self, rng: &mut StdRng) -> NudgeMessage {
        self.messages
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| default_messages().swap_remove(0))
    }

    /// Cancel the stored handles plus any stray pending nudge, then clear the
    /// store. Individual failures are logged and skipped.
    async fn retire(&self, previous: Option<&ScheduledBatch>) {
        let mut handles: Vec<NotificationHandle> =
            previous.map(|b| b.handles.clone()).unwrap_or_default();

        match self.scheduler.list_pending().await {
            Ok(pending) => {
                let known: HashSet<NotificationHandle> = handles.iter().cloned().collect();
                handles.extend(
                    pending
                        .into_iter()
                        .filter(|p| p.payload.kind() == Some(NotificationKind::DailyNudge))
                        .map(|p| p.handle)
                        .filter(|h| !known.contains(h)),
                );
            }
            Err(err) => warn!(%err, "could not list pending nudges to prune"),
        }

        self.cancel_quietly(&handles).await;
        if let Err(err) = self.store.clear().await {
            warn!(?err, "failed to clear nudge batch store");
        }
    }

    async fn cancel_quietly(&self, handles: &[NotificationHandle]) {
        let results = join_all(handles.iter().map(|h| self.scheduler.cancel(h))).await;
        for (handle, result) in handles.iter().zip(results) {
            if let Err(err) = result {
                warn!(%handle, %err, "failed to cancel nudge");
            }
        }
    }
}

fn all_pending(batch: &ScheduledBatch, pending: &[PendingNotification]) -> bool {
    !batch.handles.is_empty()
        && batch
            .handles
            .iter()
            .all(|h| pending.iter().any(|p| &p.handle == h))
}
