//! Thin policy-free wrapper over the platform primitive.
//!
//! The scheduler accepts any instant, past ones included; future-only rules
//! belong to the orchestrator.
use crate::model::{NotificationHandle, PendingNotification, ScheduleRequest};
use crate::platform::{NotificationPlatform, PermissionStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("notification permission not granted")]
    PermissionDenied,
    #[error("cannot schedule for {fire_at}: not after {now}")]
    InvalidSchedule {
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    #[error("notification platform unavailable: {0:#}")]
    Unavailable(anyhow::Error),
}

impl ScheduleError {
    /// Errors the app keeps running through without notifications.
    pub fn is_degraded_mode(&self) -> bool {
        matches!(self, ScheduleError::PermissionDenied)
    }
}

#[derive(Clone)]
pub struct Scheduler {
    platform: Arc<dyn NotificationPlatform>,
}

impl Scheduler {
    pub fn new(platform: Arc<dyn NotificationPlatform>) -> Self {
        Self { platform }
    }

    #[instrument(skip_all, fields(fire_at = %req.fire_at))]
    pub async fn schedule(&self, req: &ScheduleRequest) -> Result<NotificationHandle, ScheduleError> {
        self.ensure_permission().await?;
        let handle = self
            .platform
            .schedule_at(&req.payload, req.fire_at, req.category.as_deref())
            .await
            .map_err(ScheduleError::Unavailable)?;
        debug!(%handle, kind = ?req.payload.kind(), "scheduled notification");
        Ok(handle)
    }

    /// Idempotent: an already fired or cancelled handle cancels cleanly.
    #[instrument(skip_all, fields(handle = %handle))]
    pub async fn cancel(&self, handle: &NotificationHandle) -> Result<(), ScheduleError> {
        self.platform
            .cancel(handle)
            .await
            .map_err(ScheduleError::Unavailable)
    }

    pub async fn list_pending(&self) -> Result<Vec<PendingNotification>, ScheduleError> {
        self.platform
            .list_scheduled()
            .await
            .map_err(ScheduleError::Unavailable)
    }

    async fn ensure_permission(&self) -> Result<(), ScheduleError> {
        let status = self
            .platform
            .permission_status()
            .await
            .map_err(ScheduleError::Unavailable)?;
        if status == PermissionStatus::Granted {
            return Ok(());
        }
        let status = self
            .platform
            .request_permission()
            .await
            .map_err(ScheduleError::Unavailable)?;
        if status == PermissionStatus::Granted {
            Ok(())
        } else {
            warn!("notification permission not granted");
            Err(ScheduleError::PermissionDenied)
        }
    }
}
