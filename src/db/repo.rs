use super::model::{Reminder, ScheduledText};
use crate::model::{NotificationHandle, NotificationPayload, PendingNotification};
use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), %err, "failed to create database directory");
            }
        }
    }

    // Always create the file; sqlx refuses to open a missing one otherwise.
    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

// ---------------------------------------------------------------------------
// key-value pairs

#[instrument(skip_all)]
pub async fn kv_get(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn kv_set(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO kv_store (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn kv_remove(pool: &Pool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM kv_store WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// pending notifications (sqlite device)

#[instrument(skip_all)]
pub async fn insert_pending(
    pool: &Pool,
    handle: &NotificationHandle,
    payload: &NotificationPayload,
    fire_at: DateTime<Utc>,
    category: Option<&str>,
) -> Result<()> {
    let metadata = serde_json::to_string(payload.metadata())?;
    sqlx::query(
        "INSERT INTO pending_notifications (handle, title, body, metadata, category, fire_at_ms, attempt, due_at_ms) \
         VALUES (?, ?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(handle.as_str())
    .bind(payload.title())
    .bind(payload.body())
    .bind(metadata)
    .bind(category)
    .bind(fire_at.timestamp_millis())
    .bind(fire_at.timestamp_millis())
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns whether a row was removed; an unknown handle is not an error.
#[instrument(skip_all)]
pub async fn delete_pending(pool: &Pool, handle: &NotificationHandle) -> Result<bool> {
    let res = sqlx::query("DELETE FROM pending_notifications WHERE handle = ?")
        .bind(handle.as_str())
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Unreadable metadata degrades to an empty map so one bad row cannot block
/// listing, cancellation or delivery of the others.
fn pending_from_row(row: &SqliteRow) -> Result<PendingNotification> {
    let handle: String = row.get("handle");
    let raw: String = row.get("metadata");
    let metadata: Map<String, Value> = match serde_json::from_str(&raw) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(%handle, %err, "unreadable pending notification metadata; ignoring it");
            Map::new()
        }
    };
    Ok(PendingNotification {
        handle: NotificationHandle::new(handle),
        payload: NotificationPayload::from_parts(row.get("title"), row.get("body"), metadata),
        fire_at: from_millis(row.get("fire_at_ms"))?,
        category: row.get("category"),
    })
}

#[instrument(skip_all)]
pub async fn list_pending(pool: &Pool) -> Result<Vec<PendingNotification>> {
    let rows = sqlx::query(
        "SELECT handle, title, body, metadata, category, fire_at_ms FROM pending_notifications ORDER BY fire_at_ms ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(pending_from_row).collect()
}

/// Earliest pending notification whose due time has passed, with its attempt count.
#[instrument(skip_all)]
pub async fn next_due_pending(
    pool: &Pool,
    now: DateTime<Utc>,
) -> Result<Option<(PendingNotification, i32)>> {
    let row = sqlx::query(
        "SELECT handle, title, body, metadata, category, fire_at_ms, attempt FROM pending_notifications \
         WHERE due_at_ms <= ? ORDER BY due_at_ms ASC LIMIT 1",
    )
    .bind(now.timestamp_millis())
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => {
            let attempt: i32 = row.get("attempt");
            Ok(Some((pending_from_row(&row)?, attempt)))
        }
        None => Ok(None),
    }
}

/// Push a failed delivery back: 5s * 2^attempt, capped at `max_cap_secs`
/// (no cap when `max_cap_secs <= 0`).
#[instrument(skip_all)]
pub async fn backoff_pending_with_cap(
    pool: &Pool,
    handle: &NotificationHandle,
    attempt: i32,
    now: DateTime<Utc>,
    max_cap_secs: i64,
) -> Result<()> {
    let secs = 5_i64 * (1_i64 << attempt.clamp(0, 10));
    let secs = if max_cap_secs <= 0 {
        secs
    } else {
        secs.min(max_cap_secs)
    };
    sqlx::query("UPDATE pending_notifications SET attempt = ?, due_at_ms = ? WHERE handle = ?")
        .bind(attempt + 1)
        .bind(now.timestamp_millis() + secs * 1000)
        .bind(handle.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// reminders

fn reminder_from_row(row: &SqliteRow) -> Result<Reminder> {
    let notification_id: Option<String> = row.get("notification_id");
    Ok(Reminder {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        profile_name: row.get("profile_name"),
        profile_id: row.get("profile_id"),
        scheduled_for: from_millis(row.get("scheduled_for_ms"))?,
        notification_id: notification_id.map(NotificationHandle::new),
    })
}

#[instrument(skip_all)]
pub async fn insert_reminder(
    pool: &Pool,
    title: &str,
    description: Option<&str>,
    profile_name: Option<&str>,
    profile_id: Option<i64>,
    scheduled_for: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO reminders (title, description, profile_name, profile_id, scheduled_for_ms) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(title)
    .bind(description)
    .bind(profile_name)
    .bind(profile_id)
    .bind(scheduled_for.timestamp_millis())
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn get_reminder(pool: &Pool, id: i64) -> Result<Option<Reminder>> {
    let row = sqlx::query(
        "SELECT id, title, description, profile_name, profile_id, scheduled_for_ms, notification_id FROM reminders WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(reminder_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn list_reminders(pool: &Pool) -> Result<Vec<Reminder>> {
    let rows = sqlx::query(
        "SELECT id, title, description, profile_name, profile_id, scheduled_for_ms, notification_id FROM reminders ORDER BY scheduled_for_ms ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(reminder_from_row).collect()
}

#[instrument(skip_all)]
pub async fn set_reminder_notification_id(
    pool: &Pool,
    id: i64,
    handle: Option<&NotificationHandle>,
) -> Result<()> {
    sqlx::query("UPDATE reminders SET notification_id = ? WHERE id = ?")
        .bind(handle.map(NotificationHandle::as_str))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_reminder_time(pool: &Pool, id: i64, scheduled_for: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE reminders SET scheduled_for_ms = ? WHERE id = ?")
        .bind(scheduled_for.timestamp_millis())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_reminder(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM reminders WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// scheduled texts

fn scheduled_text_from_row(row: &SqliteRow) -> Result<ScheduledText> {
    let notification_id: Option<String> = row.get("notification_id");
    Ok(ScheduledText {
        id: row.get("id"),
        phone_number: row.get("phone_number"),
        message: row.get("message"),
        profile_name: row.get("profile_name"),
        profile_id: row.get("profile_id"),
        scheduled_for: from_millis(row.get("scheduled_for_ms"))?,
        notification_id: notification_id.map(NotificationHandle::new),
    })
}

#[instrument(skip_all)]
pub async fn insert_scheduled_text(
    pool: &Pool,
    phone_number: &str,
    message: &str,
    profile_name: Option<&str>,
    profile_id: Option<i64>,
    scheduled_for: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO scheduled_texts (phone_number, message, profile_name, profile_id, scheduled_for_ms) VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(phone_number)
    .bind(message)
    .bind(profile_name)
    .bind(profile_id)
    .bind(scheduled_for.timestamp_millis())
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn get_scheduled_text(pool: &Pool, id: i64) -> Result<Option<ScheduledText>> {
    let row = sqlx::query(
        "SELECT id, phone_number, message, profile_name, profile_id, scheduled_for_ms, notification_id FROM scheduled_texts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(scheduled_text_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn list_scheduled_texts(pool: &Pool) -> Result<Vec<ScheduledText>> {
    let rows = sqlx::query(
        "SELECT id, phone_number, message, profile_name, profile_id, scheduled_for_ms, notification_id FROM scheduled_texts ORDER BY scheduled_for_ms ASC",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(scheduled_text_from_row).collect()
}

#[instrument(skip_all)]
pub async fn set_scheduled_text_notification_id(
    pool: &Pool,
    id: i64,
    handle: Option<&NotificationHandle>,
) -> Result<()> {
    sqlx::query("UPDATE scheduled_texts SET notification_id = ? WHERE id = ?")
        .bind(handle.map(NotificationHandle::as_str))
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_scheduled_text_time(
    pool: &Pool,
    id: i64,
    scheduled_for: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE scheduled_texts SET scheduled_for_ms = ? WHERE id = ?")
        .bind(scheduled_for.timestamp_millis())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_scheduled_text(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM scheduled_texts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
