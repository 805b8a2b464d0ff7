//! Database module: entity models and SQL repositories.
//!
//! - `model`: rows returned by repositories (reminders, scheduled texts).
//! - `repo`: SQL-only functions over the sqlite pool.
//!
//! The repository API is re-exported at `crate::db::*`.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{Reminder, ScheduledText};
