//! The device notification primitive and its sqlite-backed implementation.
use crate::db::{self, Pool};
use crate::model::{NotificationHandle, NotificationPayload, PendingNotification};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// What the operating system offers for local notifications: fire a payload
/// at an instant, cancel by handle, enumerate what is still pending.
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    async fn permission_status(&self) -> Result<PermissionStatus>;

    /// Ask the user for permission. Returns the status after the prompt.
    async fn request_permission(&self) -> Result<PermissionStatus>;

    async fn schedule_at(
        &self,
        payload: &NotificationPayload,
        fire_at: DateTime<Utc>,
        category: Option<&str>,
    ) -> Result<NotificationHandle>;

    /// Cancelling an unknown, fired or already cancelled handle is not an error.
    async fn cancel(&self, handle: &NotificationHandle) -> Result<()>;

    async fn list_scheduled(&self) -> Result<Vec<PendingNotification>>;
}

/// Local device whose pending notifications live in the
/// `pending_notifications` table and are fired by the delivery worker.
pub struct SqlitePlatform {
    pool: Pool,
    granted: AtomicBool,
    grant_on_request: bool,
}

impl SqlitePlatform {
    /// `permission_granted` is the initial state; with `grant_on_request` a
    /// permission prompt is answered with a grant.
    pub fn new(pool: Pool, permission_granted: bool, grant_on_request: bool) -> Self {
        Self {
            pool,
            granted: AtomicBool::new(permission_granted),
            grant_on_request,
        }
    }

    fn status(&self) -> PermissionStatus {
        if self.granted.load(Ordering::SeqCst) {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }
}

impl std::fmt::Debug for SqlitePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePlatform")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NotificationPlatform for SqlitePlatform {
    async fn permission_status(&self) -> Result<PermissionStatus> {
        Ok(self.status())
    }

    async fn request_permission(&self) -> Result<PermissionStatus> {
        if self.grant_on_request {
            self.granted.store(true, Ordering::SeqCst);
            info!("notification permission granted");
        } else {
            warn!("notification permission request declined");
        }
        Ok(self.status())
    }

    async fn schedule_at(
        &self,
        payload: &NotificationPayload,
        fire_at: DateTime<Utc>,
        category: Option<&str>,
    ) -> Result<NotificationHandle> {
        let handle = NotificationHandle::new(Uuid::new_v4().to_string());
        db::insert_pending(&self.pool, &handle, payload, fire_at, category).await?;
        Ok(handle)
    }

    async fn cancel(&self, handle: &NotificationHandle) -> Result<()> {
        db::delete_pending(&self.pool, handle).await?;
        Ok(())
    }

    async fn list_scheduled(&self) -> Result<Vec<PendingNotification>> {
        db::list_pending(&self.pool).await
    }
}
