//! Interval scheduler for background jobs with persisted payloads.

pub mod schedule;
pub mod scheduler;

pub use schedule::{CronSchedule, CronScheduleError};
pub use scheduler::{CronHandler, CronHandlerRef, CronScheduler};
