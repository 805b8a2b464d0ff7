use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Metadata key carrying the [`NotificationKind`] discriminator.
pub const KIND_KEY: &str = "type";

/// Category hint attached to scheduled-text notifications so the platform can
/// offer the "edit" action.
pub const SCHEDULED_TEXT_CATEGORY: &str = "scheduled-text-category";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    DailyNudge,
    Reminder,
    ScheduledText,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DailyNudge => "daily_nudge",
            NotificationKind::Reminder => "reminder",
            NotificationKind::ScheduledText => "scheduled_text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily_nudge" => Some(NotificationKind::DailyNudge),
            "reminder" => Some(NotificationKind::Reminder),
            "scheduled_text" => Some(NotificationKind::ScheduledText),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NudgeSlot {
    Morning,
    Evening,
}

impl NudgeSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            NudgeSlot::Morning => "am",
            NudgeSlot::Evening => "pm",
        }
    }
}

/// Opaque identifier handed out by the platform for a scheduled notification.
///
/// Possession allows cancellation; the contents are never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationHandle(String);

impl NotificationHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Title, body and correlation metadata of a notification.
///
/// Built once through the constructors below; there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    title: String,
    body: String,
    metadata: Map<String, Value>,
}

impl NotificationPayload {
    pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert(KIND_KEY.to_string(), Value::from(kind.as_str()));
        Self {
            title: title.into(),
            body: body.into(),
            metadata,
        }
    }

    /// Rebuild a payload read back from the platform. The metadata is taken as
    /// stored, including whatever discriminator it carries.
    pub fn from_parts(title: String, body: String, metadata: Map<String, Value>) -> Self {
        Self {
            title,
            body,
            metadata,
        }
    }

    /// Add a correlation field. The `type` discriminator cannot be overwritten.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key != KIND_KEY {
            self.metadata.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn daily_nudge(
        title: &str,
        body: &str,
        slot: NudgeSlot,
        fire_at: DateTime<Utc>,
    ) -> Self {
        Self::new(NotificationKind::DailyNudge, title, body)
            .with_field("slot", slot.as_str())
            .with_field(
                "scheduledFor",
                fire_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
    }

    pub fn reminder(reminder_id: i64, title: &str, body: &str) -> Self {
        Self::new(NotificationKind::Reminder, title, body)
            .with_field("reminderId", reminder_id.to_string())
    }

    pub fn scheduled_text(
        message_id: i64,
        recipient: &str,
        phone_number: &str,
        message: &str,
    ) -> Self {
        Self::new(
            NotificationKind::ScheduledText,
            format!("Time to text {}", recipient),
            message,
        )
        .with_field("messageId", message_id.to_string())
        .with_field("phoneNumber", phone_number)
        .with_field("message", message)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn kind(&self) -> Option<NotificationKind> {
        self.field(KIND_KEY).and_then(NotificationKind::parse)
    }
}

/// A payload bound to an absolute instant. Relative times never reach this type.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRequest {
    pub payload: NotificationPayload,
    pub fire_at: DateTime<Utc>,
    pub category: Option<String>,
}

impl ScheduleRequest {
    pub fn new(payload: NotificationPayload, fire_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            fire_at,
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// The daily nudge pair, keyed by the local calendar day it was scheduled on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledBatch {
    pub date: NaiveDate,
    pub handles: Vec<NotificationHandle>,
}

impl ScheduledBatch {
    pub fn is_for(&self, day: NaiveDate) -> bool {
        self.date == day
    }
}

/// A notification the platform still holds.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNotification {
    pub handle: NotificationHandle,
    pub payload: NotificationPayload,
    pub fire_at: DateTime<Utc>,
    pub category: Option<String>,
}
