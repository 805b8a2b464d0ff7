//! Reminder and scheduled-text flows.
//!
//! Entity rows and their notifications are committed independently: a failed
//! notification leaves `notification_id` null instead of undoing the row.
//! Handles are always cancelled before the owning row is changed or removed.
use crate::db::{self, Pool, Reminder, ScheduledText};
use crate::model::{NotificationHandle, NotificationPayload};
use crate::orchestrator::NotificationOrchestrator;
use crate::scheduler::ScheduleError;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

/// A committed entity plus how its notification fared.
#[derive(Debug)]
pub struct Saved<T> {
    pub record: T,
    pub notification: Result<NotificationHandle, ScheduleError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReminder {
    pub title: String,
    pub description: Option<String>,
    pub profile_name: Option<String>,
    pub profile_id: Option<i64>,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewScheduledText {
    pub phone_number: String,
    pub message: String,
    pub profile_name: Option<String>,
    pub profile_id: Option<i64>,
    pub scheduled_for: DateTime<Utc>,
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn reminder_body(description: &Option<String>, profile_name: &Option<String>) -> String {
    match (non_empty(description), non_empty(profile_name)) {
        (Some(description), _) => description.to_string(),
        (None, Some(profile)) => format!("Reminder about {}", profile),
        (None, None) => "You have a reminder".to_string(),
    }
}

fn reminder_payload(reminder: &Reminder) -> NotificationPayload {
    NotificationPayload::reminder(
        reminder.id,
        &reminder.title,
        &reminder_body(&reminder.description, &reminder.profile_name),
    )
}

fn scheduled_text_payload(text: &ScheduledText) -> NotificationPayload {
    let recipient = non_empty(&text.profile_name).unwrap_or(&text.phone_number);
    NotificationPayload::scheduled_text(text.id, recipient, &text.phone_number, &text.message)
}

pub struct ReminderService<Tz: TimeZone = Local> {
    pool: Pool,
    notifier: Arc<NotificationOrchestrator<Tz>>,
}

impl<Tz> ReminderService<Tz>
where
    Tz: TimeZone + Send + Sync,
    Tz::Offset: Send + Sync,
{
    pub fn new(pool: Pool, notifier: Arc<NotificationOrchestrator<Tz>>) -> Self {
        Self { pool, notifier }
    }

    #[instrument(skip_all)]
    pub async fn create(&self, new: NewReminder) -> Result<Saved<Reminder>, DomainError> {
        self.notifier.ensure_future(new.scheduled_for)?;
        let id = db::insert_reminder(
            &self.pool,
            &new.title,
            new.description.as_deref(),
            new.profile_name.as_deref(),
            new.profile_id,
            new.scheduled_for,
        )
        .await?;
        let reminder = self.get(id).await?;
        let notification = self.attach_notification(&reminder).await?;
        info!(id, "reminder created");
        Ok(Saved {
            record: self.get(id).await?,
            notification,
        })
    }

    #[instrument(skip_all)]
    pub async fn reschedule(
        &self,
        id: i64,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Saved<Reminder>, DomainError> {
        self.notifier.ensure_future(scheduled_for)?;
        let reminder = self.get(id).await?;
        if let Some(handle) = &reminder.notification_id {
            self.notifier.cancel(handle).await?;
            db::set_reminder_notification_id(&self.pool, id, None).await?;
        }
        db::set_reminder_time(&self.pool, id, scheduled_for).await?;
        let reminder = self.get(id).await?;
        let notification = self.attach_notification(&reminder).await?;
        Ok(Saved {
            record: self.get(id).await?,
            notification,
        })
    }

    /// Cancel the pending notification, then remove the row. A failed cancel
    /// keeps the row so the handle is not orphaned.
    #[instrument(skip_all)]
    pub async fn delete(&self, id: i64) -> Result<(), DomainError> {
        let reminder = self.get(id).await?;
        if let Some(handle) = &reminder.notification_id {
            self.notifier.cancel(handle).await?;
        }
        db::delete_reminder(&self.pool, id).await?;
        info!(id, "reminder deleted");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Reminder, DomainError> {
        db::get_reminder(&self.pool, id)
            .await?
            .ok_or(DomainError::NotFound {
                entity: "reminder",
                id,
            })
    }

    pub async fn list(&self) -> Result<Vec<Reminder>, DomainError> {
        Ok(db::list_reminders(&self.pool).await?)
    }

    async fn attach_notification(
        &self,
        reminder: &Reminder,
    ) -> Result<Result<NotificationHandle, ScheduleError>, DomainError> {
        let notification = self
            .notifier
            .schedule_reminder(reminder_payload(reminder), reminder.scheduled_for)
            .await;
        match &notification {
            Ok(handle) => {
                if let Err(err) =
                    db::set_reminder_notification_id(&self.pool, reminder.id, Some(handle)).await
                {
                    if let Err(cancel_err) = self.notifier.cancel(handle).await {
                        warn!(%cancel_err, %handle, "failed to cancel unrecorded notification");
                    }
                    return Err(err.into());
                }
            }
            Err(err) => warn!(id = reminder.id, %err, "reminder saved without notification"),
        }
        Ok(notification)
    }
}

pub struct ScheduledTextService<Tz: TimeZone = Local> {
    pool: Pool,
    notifier: Arc<NotificationOrchestrator<Tz>>,
}

impl<Tz> ScheduledTextService<Tz>
where
    Tz: TimeZone + Send + Sync,
    Tz::Offset: Send + Sync,
{
    pub fn new(pool: Pool, notifier: Arc<NotificationOrchestrator<Tz>>) -> Self {
        Self { pool, notifier }
    }

    #[instrument(skip_all)]
    pub async fn create(&self, new: NewScheduledText) -> Result<Saved<ScheduledText>, DomainError> {
        self.notifier.ensure_future(new.scheduled_for)?;
        let id = db::insert_scheduled_text(
            &self.pool,
            &new.phone_number,
            &new.message,
            new.profile_name.as_deref(),
            new.profile_id,
            new.scheduled_for,
        )
        .await?;
        let text = self.get(id).await?;
        let notification = self.attach_notification(&text).await?;
        info!(id, "scheduled text created");
        Ok(Saved {
            record: self.get(id).await?,
            notification,
        })
    }

    #[instrument(skip_all)]
    pub async fn reschedule(
        &self,
        id: i64,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Saved<ScheduledText>, DomainError> {
        self.notifier.ensure_future(scheduled_for)?;
        let text = self.get(id).await?;
        if let Some(handle) = &text.notification_id {
            self.notifier.cancel(handle).await?;
            db::set_scheduled_text_notification_id(&self.pool, id, None).await?;
        }
        db::set_scheduled_text_time(&self.pool, id, scheduled_for).await?;
        let text = self.get(id).await?;
        let notification = self.attach_notification(&text).await?;
        Ok(Saved {
            record: self.get(id).await?,
            notification,
        })
    }

    #[instrument(skip_all)]
    pub async fn delete(&self, id: i64) -> Result<(), DomainError> {
        let text = self.get(id).await?;
        if let Some(handle) = &text.notification_id {
            self.notifier.cancel(handle).await?;
        }
        db::delete_scheduled_text(&self.pool, id).await?;
        info!(id, "scheduled text deleted");
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<ScheduledText, DomainError> {
        db::get_scheduled_text(&self.pool, id)
            .await?
            .ok_or(DomainError::NotFound {
                entity: "scheduled text",
                id,
            })
    }

    pub async fn list(&self) -> Result<Vec<ScheduledText>, DomainError> {
        Ok(db::list_scheduled_texts(&self.pool).await?)
    }

    async fn attach_notification(
        &self,
        text: &ScheduledText,
    ) -> Result<Result<NotificationHandle, ScheduleError>, DomainError> {
        let notification = self
            .notifier
            .schedule_scheduled_text(scheduled_text_payload(text), text.scheduled_for)
            .await;
        match &notification {
            Ok(handle) => {
                if let Err(err) =
                    db::set_scheduled_text_notification_id(&self.pool, text.id, Some(handle)).await
                {
                    if let Err(cancel_err) = self.notifier.cancel(handle).await {
                        warn!(%cancel_err, %handle, "failed to cancel unrecorded notification");
                    }
                    return Err(err.into());
                }
            }
            Err(err) => warn!(id = text.id, %err, "scheduled text saved without notification"),
        }
        Ok(notification)
    }
}
