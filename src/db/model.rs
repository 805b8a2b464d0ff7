//! Rows owned by the domain layer. Each carries at most one notification
//! handle; scheduling mechanics stay in the orchestrator.

use crate::model::NotificationHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub profile_name: Option<String>,
    pub profile_id: Option<i64>,
    pub scheduled_for: DateTime<Utc>,
    pub notification_id: Option<NotificationHandle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledText {
    pub id: i64,
    pub phone_number: String,
    pub message: String,
    pub profile_name: Option<String>,
    pub profile_id: Option<i64>,
    pub scheduled_for: DateTime<Utc>,
    pub notification_id: Option<NotificationHandle>,
}
