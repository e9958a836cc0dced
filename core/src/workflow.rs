//! Workflow configuration and state for document reminders and auto-close.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DocumentId, UserId};

pub const DEFAULT_REMINDER_MESSAGE: &str = "This document is waiting for your attention.";
pub const DEFAULT_AUTO_CLOSE_MESSAGE: &str = "This document was closed automatically.";

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSetting {
    #[serde(with = "duration_secs", rename = "durationSecs")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoCloseSetting {
    #[serde(with = "duration_secs", rename = "durationSecs")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Attached to a template and inherited by the documents created from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    #[serde(default)]
    pub reminder: bool,
    #[serde(default)]
    pub reminder_settings: Vec<ReminderSetting>,
    #[serde(default)]
    pub auto_close: bool,
    #[serde(default)]
    pub auto_close_settings: AutoCloseSetting,
}

impl WorkflowConfig {
    /// Schedule for a freshly created document, `None` when nothing is enabled.
    pub fn initial_state(&self, document_id: DocumentId, now: DateTime<Utc>) -> Option<WorkflowState> {
        let state = WorkflowState {
            document_id,
            next_reminder_time: self.reminder_time(0, now),
            next_reminder_count: 0,
            auto_close_time: self.auto_close_time(now),
        };

        (!state.is_idle()).then_some(state)
    }

    /// When reminder number `index` fires, counting from `from`.
    pub fn reminder_time(&self, index: usize, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.reminder {
            return None;
        }
        let setting = self.reminder_settings.get(index)?;
        add_duration(from, setting.duration)
    }

    pub fn auto_close_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.auto_close || self.auto_close_settings.duration.is_zero() {
            return None;
        }
        add_duration(from, self.auto_close_settings.duration)
    }

    pub fn reminder_message(&self, index: usize) -> Option<&str> {
        self.reminder_settings
            .get(index)
            .and_then(|setting| setting.message.as_deref())
    }

    pub fn auto_close_message(&self) -> Option<&str> {
        self.auto_close_settings.message.as_deref()
    }
}

fn add_duration(from: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(duration).ok()?;
    from.checked_add_signed(delta)
}

/// A pending manual reminder for one user on one document. The row exists
/// only until the reminder fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowUserState {
    pub document_id: DocumentId,
    pub user_id: UserId,
    pub manual_reminder_time: DateTime<Utc>,
    pub manual_reminder_message: Option<String>,
}

/// Scheduled reminder and auto-close timers of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowState {
    pub document_id: DocumentId,
    pub next_reminder_time: Option<DateTime<Utc>>,
    pub next_reminder_count: i32,
    pub auto_close_time: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn is_idle(&self) -> bool {
        self.next_reminder_time.is_none() && self.auto_close_time.is_none()
    }

    pub fn reminder_due(&self, now: DateTime<Utc>) -> bool {
        self.next_reminder_time.is_some_and(|time| time <= now)
    }

    pub fn auto_close_due(&self, now: DateTime<Utc>) -> bool {
        self.auto_close_time.is_some_and(|time| time <= now)
    }
}

/// Due manual reminder joined with its document and template.
#[derive(Debug, Clone, PartialEq)]
pub struct DueUserReminder {
    pub state: WorkflowUserState,
    pub document_title: String,
    pub workflow: Option<WorkflowConfig>,
}

impl DueUserReminder {
    pub fn into_task(self) -> WorkflowTask {
        let message = self
            .state
            .manual_reminder_message
            .clone()
            .or_else(|| {
                self.workflow
                    .as_ref()
                    .and_then(|workflow| workflow.reminder_message(0))
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| DEFAULT_REMINDER_MESSAGE.to_owned());

        WorkflowTask::ReminderDue(ReminderDue {
            document_id: self.state.document_id,
            document_title: self.document_title,
            recipient: Some(self.state.user_id),
            message,
            kind: ReminderKind::Manual,
        })
    }
}

/// Due document-level workflow state joined with its document and template.
#[derive(Debug, Clone, PartialEq)]
pub struct DueDocumentWorkflow {
    pub state: WorkflowState,
    pub document_title: String,
    pub creator_id: Option<UserId>,
    pub workflow: Option<WorkflowConfig>,
}

impl DueDocumentWorkflow {
    /// Auto-close takes precedence over a reminder that is due at the same
    /// time.
    pub fn into_task(self, now: DateTime<Utc>) -> Option<WorkflowTask> {
        let workflow = self.workflow.unwrap_or_default();

        if self.state.auto_close_due(now) {
            let mut remaining = self.state.clone();
            remaining.auto_close_time = None;
            remaining.next_reminder_time = None;
            return Some(WorkflowTask::AutoCloseDue(AutoCloseDue {
                document_id: self.state.document_id,
                document_title: self.document_title,
                creator_id: self.creator_id,
                message: workflow
                    .auto_close_message()
                    .unwrap_or(DEFAULT_AUTO_CLOSE_MESSAGE)
                    .to_owned(),
                remaining,
            }));
        }

        if !self.state.reminder_due(now) {
            return None;
        }

        let index = usize::try_from(self.state.next_reminder_count).unwrap_or_default();
        let message = workflow
            .reminder_message(index)
            .unwrap_or(DEFAULT_REMINDER_MESSAGE)
            .to_owned();
        let mut next = self.state.clone();
        next.next_reminder_count = self.state.next_reminder_count.saturating_add(1);
        next.next_reminder_time = workflow.reminder_time(index + 1, now);

        Some(WorkflowTask::ReminderDue(ReminderDue {
            document_id: self.state.document_id,
            document_title: self.document_title,
            recipient: self.creator_id,
            message,
            kind: ReminderKind::Scheduled { next },
        }))
    }
}

/// One unit of scheduler work, dispatched by exhaustive match.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowTask {
    ReminderDue(ReminderDue),
    AutoCloseDue(AutoCloseDue),
}

impl WorkflowTask {
    pub fn document_id(&self) -> DocumentId {
        match self {
            WorkflowTask::ReminderDue(reminder) => reminder.document_id,
            WorkflowTask::AutoCloseDue(close) => close.document_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowTask::ReminderDue(ReminderDue {
                kind: ReminderKind::Manual,
                ..
            }) => "manual_reminder",
            WorkflowTask::ReminderDue(_) => "scheduled_reminder",
            WorkflowTask::AutoCloseDue(_) => "auto_close",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderDue {
    pub document_id: DocumentId,
    pub document_title: String,
    /// `None` when a scheduled reminder's document has no creator left to notify.
    pub recipient: Option<UserId>,
    pub message: String,
    pub kind: ReminderKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReminderKind {
    /// Delete the user's state row once sent.
    Manual,
    /// Persist `next` once sent.
    Scheduled { next: WorkflowState },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoCloseDue {
    pub document_id: DocumentId,
    pub document_title: String,
    pub creator_id: Option<UserId>,
    pub message: String,
    /// State to persist after closing; idle states are deleted instead.
    pub remaining: WorkflowState,
}

/// Cursor carried between scheduler ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCronData {
    #[serde(default)]
    pub last_doc_id: u64,
}

impl WorkflowCronData {
    pub fn after(&self) -> DocumentId {
        DocumentId::new(self.last_doc_id)
    }

    /// Cursor for the next tick. `fetched` are the batch's document ids in
    /// ascending order, `unfinished` the ids whose work failed or was never
    /// dispatched. A short batch means the table was exhausted and the scan
    /// wraps to the start; otherwise the cursor stops just before the first
    /// unfinished row (or the last fetched document, whose remaining rows may
    /// not have fit in the batch).
    pub fn advance(fetched: &[DocumentId], unfinished: &[DocumentId], limit: usize) -> Self {
        if fetched.len() < limit {
            return Self::default();
        }

        let Some(last) = fetched.last().copied() else {
            return Self::default();
        };
        let stop = unfinished.iter().copied().min().map_or(last, |first| first.min(last));

        Self {
            last_doc_id: stop.get().saturating_sub(1),
        }
    }
}
