//! Fires due notifications held by the sqlite device.
use crate::db::{self, Pool};
use crate::model::PendingNotification;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

/// Where a fired notification ends up (banner, terminal, log...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &PendingNotification) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &PendingNotification) -> Result<()> {
        info!(
            handle = %notification.handle,
            kind = ?notification.payload.kind(),
            title = notification.payload.title(),
            body = notification.payload.body(),
            "notification fired"
        );
        Ok(())
    }
}

/// Deliver the earliest due notification, if any. Returns whether one was
/// processed; a sink failure backs the notification off instead of dropping it.
#[instrument(skip_all)]
pub async fn deliver_next_due(
    pool: &Pool,
    sink: &dyn NotificationSink,
    now: DateTime<Utc>,
    max_backoff_secs: i64,
) -> Result<bool> {
    let Some((notification, attempt)) = db::next_due_pending(pool, now).await? else {
        return Ok(false);
    };
    match sink.deliver(&notification).await {
        Ok(()) => {
            db::delete_pending(pool, &notification.handle).await?;
            info!(handle = %notification.handle, attempt, "notification delivered");
        }
        Err(err) => {
            warn!(?err, handle = %notification.handle, attempt, "delivery failed; backoff");
            db::backoff_pending_with_cap(pool, &notification.handle, attempt, now, max_backoff_secs)
                .await?;
        }
    }
    Ok(true)
}
