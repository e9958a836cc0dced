use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use crate::ids::{DocumentId, UserId};

pub const WORKFLOW_REMINDER_KIND: &str = "document.workflow.reminder";
pub const WORKFLOW_AUTO_CLOSE_KIND: &str = "document.workflow.auto_close";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: UserId,
    pub kind: String,
    pub payload: JsonValue,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn new(user_id: UserId, kind: impl Into<String>, payload: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            kind: kind.into(),
            payload,
            read: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Notification about a document workflow event.
    pub fn workflow(
        user_id: UserId,
        kind: &str,
        document_id: DocumentId,
        document_title: &str,
        message: &str,
    ) -> Self {
        Self::new(
            user_id,
            kind,
            json!({
                "documentId": document_id,
                "documentTitle": document_title,
                "message": message,
            }),
        )
    }
}

#[async_trait]
pub trait NotificationCenter: Send + Sync {
    async fn enqueue(&self, notification: NotificationRecord) -> Result<()>;
    /// Newest first.
    async fn list_for_user(&self, user_id: UserId, limit: i64) -> Result<Vec<NotificationRecord>>;
    async fn count_unread(&self, user_id: UserId) -> Result<i64>;
}

pub type NotificationCenterRef = Arc<dyn NotificationCenter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_payload_carries_document_and_message() {
        let record = NotificationRecord::workflow(
            UserId::new(3),
            WORKFLOW_REMINDER_KIND,
            DocumentId::new(12),
            "Incident report",
            "please review",
        );

        assert_eq!(record.kind, WORKFLOW_REMINDER_KIND);
        assert_eq!(record.payload["documentId"], 12);
        assert_eq!(record.payload["documentTitle"], "Incident report");
        assert_eq!(record.payload["message"], "please review");
        assert!(!record.read);
    }
}
