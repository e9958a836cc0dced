use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    access::AccessControlled,
    ids::{DocumentId, TemplateId, UserId},
    workflow::WorkflowConfig,
};

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub template_id: Option<TemplateId>,
    pub creator_id: Option<UserId>,
    pub creator_job: String,
    pub title: String,
    pub public: bool,
    pub closed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccessControlled for DocumentRecord {
    fn creator_id(&self) -> Option<UserId> {
        self.creator_id
    }

    fn is_public(&self) -> bool {
        self.public
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRecord {
    pub id: TemplateId,
    pub title: String,
    pub creator_id: Option<UserId>,
    pub creator_job: String,
    pub workflow: Option<WorkflowConfig>,
    pub created_at: DateTime<Utc>,
}

impl AccessControlled for TemplateRecord {
    fn creator_id(&self) -> Option<UserId> {
        self.creator_id
    }
}

/// Insert payload for a document; ids and timestamps are assigned on write.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub template_id: Option<TemplateId>,
    pub creator_id: Option<UserId>,
    pub creator_job: String,
    pub title: String,
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTemplate {
    pub title: String,
    pub creator_id: Option<UserId>,
    pub creator_job: String,
    pub workflow: Option<WorkflowConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentActivityKind {
    Created,
    AccessUpdated,
    AutoClosed,
}

impl DocumentActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentActivityKind::Created => "created",
            DocumentActivityKind::AccessUpdated => "access_updated",
            DocumentActivityKind::AutoClosed => "auto_closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(DocumentActivityKind::Created),
            "access_updated" => Some(DocumentActivityKind::AccessUpdated),
            "auto_closed" => Some(DocumentActivityKind::AutoClosed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentActivityRecord {
    pub document_id: DocumentId,
    pub kind: DocumentActivityKind,
    /// `None` for system-initiated activity such as auto-close.
    pub creator_id: Option<UserId>,
    pub data: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl DocumentActivityRecord {
    pub fn new(
        document_id: DocumentId,
        kind: DocumentActivityKind,
        creator_id: Option<UserId>,
        data: JsonValue,
    ) -> Self {
        Self {
            document_id,
            kind,
            creator_id,
            data,
            created_at: Utc::now(),
        }
    }
}
