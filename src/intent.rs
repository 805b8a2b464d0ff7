//! Turns the intent endpoint's JSON answer into scheduling actions.
//!
//! Only resolved timestamps are accepted; natural-language times never reach
//! this layer.
use crate::domain::{NewReminder, NewScheduledText};
use crate::windows::resolve_local;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntentError {
    #[error("malformed intent: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid `when` timestamp {0:?}; expected ISO-8601")]
    InvalidWhen(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntentAction {
    Reminder(NewReminder),
    ScheduledText(NewScheduledText),
    /// The endpoint declined with an explanation.
    NoAction(String),
    /// A recognised intent that does not schedule anything (e.g. profile edits).
    NotSchedulable(String),
}

#[derive(Debug, Deserialize)]
struct RawIntent {
    intent: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReminderArgs {
    when: String,
    profile_name: Option<String>,
    profile_id: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextArgs {
    when: String,
    message: String,
    profile_name: Option<String>,
    profile_id: Option<String>,
    phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NoneArgs {
    #[serde(default)]
    explanation: String,
}

/// Profile ids arrive as strings; anything that is not an integer id is dropped.
fn profile_id(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|id| id.trim().parse().ok())
}

/// Decode `{"intent": ..., "args": {...}}`. Offset-less timestamps are read
/// as wall-clock time in `tz`.
pub fn decode<Tz: TimeZone>(json: &str, tz: &Tz) -> Result<IntentAction, IntentError> {
    let raw: RawIntent = serde_json::from_str(json)?;
    match raw.intent.as_str() {
        "schedule_reminder" => {
            let args: ReminderArgs = serde_json::from_value(raw.args)?;
            let scheduled_for = parse_when(&args.when, tz)?;
            let profile = args.profile_name.filter(|p| !p.trim().is_empty());
            let reason = args.reason.filter(|r| !r.trim().is_empty());
            let title = reason.clone().unwrap_or_else(|| {
                format!("Reminder about {}", profile.as_deref().unwrap_or("contact"))
            });
            Ok(IntentAction::Reminder(NewReminder {
                title,
                description: reason,
                profile_name: profile,
                profile_id: profile_id(args.profile_id.as_deref()),
                scheduled_for,
            }))
        }
        "schedule_text" => {
            let args: TextArgs = serde_json::from_value(raw.args)?;
            let scheduled_for = parse_when(&args.when, tz)?;
            let phone_number = args
                .phone_number
                .filter(|p| !p.trim().is_empty())
                .ok_or(IntentError::MissingField("phoneNumber"))?;
            Ok(IntentAction::ScheduledText(NewScheduledText {
                phone_number,
                message: args.message,
                profile_name: args.profile_name.filter(|p| !p.trim().is_empty()),
                profile_id: profile_id(args.profile_id.as_deref()),
                scheduled_for,
            }))
        }
        "none" => {
            let args: NoneArgs = serde_json::from_value(raw.args)?;
            Ok(IntentAction::NoAction(args.explanation))
        }
        other => Ok(IntentAction::NotSchedulable(other.to_string())),
    }
}

/// RFC 3339, or `YYYY-MM-DDTHH:MM[:SS]` interpreted in `tz`.
pub fn parse_when<Tz: TimeZone>(when: &str, tz: &Tz) -> Result<DateTime<Utc>, IntentError> {
    let when = when.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(when) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(when, fmt).ok())
        .map(|naive| resolve_local(tz, naive))
        .ok_or_else(|| IntentError::InvalidWhen(when.to_string()))
}
