//! Background processing of manual reminders and document schedules.

pub mod runner;
pub mod tasks;

pub use runner::{
    DOCUMENT_STATES_JOB, DocumentWorkflowJob, TickReport, USER_REMINDERS_JOB, UserReminderJob,
    WorkflowRunner, register_workflow_jobs,
};
pub use tasks::WorkflowTaskExecutor;
