//! Durable local notification scheduling: the self-managing daily nudge batch,
//! reminder and scheduled-text notifications, and the bookkeeping that maps
//! them to platform handles across restarts.

pub mod config;
pub mod db;
pub mod delivery;
pub mod domain;
pub mod intent;
pub mod model;
pub mod orchestrator;
pub mod platform;
pub mod scheduler;
pub mod store;
pub mod windows;

pub use model::{
    NotificationHandle, NotificationKind, NotificationPayload, PendingNotification,
    ScheduleRequest, ScheduledBatch,
};
pub use orchestrator::{Clock, NotificationOrchestrator, NudgeStatus, SystemClock};
pub use platform::{NotificationPlatform, PermissionStatus};
pub use scheduler::{ScheduleError, Scheduler};
pub use store::{HandleStore, KeyValueStore};
