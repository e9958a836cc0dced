//! Access model shared by documents and templates.
//!
//! Grants come in two categories: job grants (a job name plus a minimum grade)
//! and user grants (exactly one user). A user grant, when present, fully
//! overrides any job grant for that user, including an explicit `Blocked`.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{Database, Decode, Encode, Type};

use crate::ids::{DocumentId, GrantId, TemplateId, UserId};

pub mod reconciler;
pub mod requirements;
pub mod resolver;

pub use reconciler::{AccessDelta, AccessReconciler};
pub use requirements::{TemplateRequirementValidator, UnmetRequirement, UnmetRequirements};
pub use resolver::{AccessControlled, AccessDecision, AccessResolver, Principal};

/// Ordered permission rank. The discriminants are wire values shared with
/// other services and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum AccessLevel {
    Unspecified = 0,
    Blocked = 1,
    View = 2,
    Comment = 3,
    Status = 4,
    Access = 5,
    Edit = 6,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 7] = [
        AccessLevel::Unspecified,
        AccessLevel::Blocked,
        AccessLevel::View,
        AccessLevel::Comment,
        AccessLevel::Status,
        AccessLevel::Access,
        AccessLevel::Edit,
    ];

    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// `true` when a grant of this level satisfies `required`.
    pub fn satisfies(self, required: AccessLevel) -> bool {
        self >= required
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Unspecified => "unspecified",
            AccessLevel::Blocked => "blocked",
            AccessLevel::View => "view",
            AccessLevel::Comment => "comment",
            AccessLevel::Status => "status",
            AccessLevel::Access => "access",
            AccessLevel::Edit => "edit",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i32> for AccessLevel {
    type Error = AccessListError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        AccessLevel::ALL
            .into_iter()
            .find(|level| level.as_i32() == value)
            .ok_or(AccessListError::LevelOutOfRange(value))
    }
}

impl<DB> Type<DB> for AccessLevel
where
    DB: Database,
    i32: Type<DB>,
{
    fn type_info() -> DB::TypeInfo {
        <i32 as Type<DB>>::type_info()
    }

    fn compatible(ty: &DB::TypeInfo) -> bool {
        <i32 as Type<DB>>::compatible(ty)
    }
}

impl<'q, DB> Encode<'q, DB> for AccessLevel
where
    DB: Database,
    i32: Encode<'q, DB>,
{
    fn encode_by_ref(
        &self,
        buf: &mut <DB as Database>::ArgumentBuffer<'q>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        self.as_i32().encode_by_ref(buf)
    }
}

impl<'r, DB> Decode<'r, DB> for AccessLevel
where
    DB: Database,
    i32: Decode<'r, DB>,
{
    fn decode(value: <DB as Database>::ValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <i32 as Decode<DB>>::decode(value)?;
        Ok(AccessLevel::try_from(raw)?)
    }
}

/// How a caller-supplied access list is applied to a target. Wire values are
/// fixed for interoperability with existing callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum AccessUpdateMode {
    Unspecified = 0,
    /// Merge through reconciliation.
    Update = 1,
    /// Remove only the named grants.
    Delete = 2,
    /// Remove every grant of the target.
    Clear = 3,
}

impl TryFrom<i32> for AccessUpdateMode {
    type Error = AccessListError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AccessUpdateMode::Unspecified),
            1 => Ok(AccessUpdateMode::Update),
            2 => Ok(AccessUpdateMode::Delete),
            3 => Ok(AccessUpdateMode::Clear),
            other => Err(AccessListError::ModeOutOfRange(other)),
        }
    }
}

/// The document or template a grant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AccessTarget {
    Document(DocumentId),
    Template(TemplateId),
}

impl AccessTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            AccessTarget::Document(_) => "document",
            AccessTarget::Template(_) => "template",
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            AccessTarget::Document(id) => id.get(),
            AccessTarget::Template(id) => id.get(),
        }
    }
}

impl fmt::Display for AccessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobGrant {
    /// Persisted row id; `None` for grants that have not been stored yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<GrantId>,
    pub job: String,
    pub minimum_grade: i32,
    pub level: AccessLevel,
    /// Only meaningful on template grants.
    #[serde(default)]
    pub required: bool,
}

impl JobGrant {
    pub fn new(job: impl Into<String>, minimum_grade: i32, level: AccessLevel) -> Self {
        Self {
            id: None,
            job: job.into(),
            minimum_grade,
            level,
            required: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<GrantId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn key(&self) -> (&str, i32) {
        (self.job.as_str(), self.minimum_grade)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGrant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<GrantId>,
    pub user_id: UserId,
    pub level: AccessLevel,
    #[serde(default)]
    pub required: bool,
}

impl UserGrant {
    pub fn new(user_id: impl Into<UserId>, level: AccessLevel) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            level,
            required: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<GrantId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn key(&self) -> UserId {
        self.user_id
    }
}

/// Full grant set of one document or template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessList {
    #[serde(default)]
    pub jobs: Vec<JobGrant>,
    #[serde(default)]
    pub users: Vec<UserGrant>,
}

impl AccessList {
    pub fn new(jobs: Vec<JobGrant>, users: Vec<UserGrant>) -> Self {
        Self { jobs, users }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len() + self.users.len()
    }

    pub fn user_grant(&self, user_id: UserId) -> Option<&UserGrant> {
        self.users.iter().find(|grant| grant.user_id == user_id)
    }

    /// Grants flagged as template requirements.
    pub fn required_only(&self) -> AccessList {
        AccessList {
            jobs: self.jobs.iter().filter(|g| g.required).cloned().collect(),
            users: self.users.iter().filter(|g| g.required).cloned().collect(),
        }
    }

    /// Rejects duplicate natural keys within a category and grants without a
    /// usable level.
    pub fn validate(&self) -> Result<(), AccessListError> {
        let mut job_keys = std::collections::HashSet::new();
        for grant in &self.jobs {
            if grant.level == AccessLevel::Unspecified {
                return Err(AccessListError::UnspecifiedLevel);
            }
            if !job_keys.insert(grant.key()) {
                return Err(AccessListError::DuplicateJobGrant {
                    job: grant.job.clone(),
                    minimum_grade: grant.minimum_grade,
                });
            }
        }

        let mut user_keys = std::collections::HashSet::new();
        for grant in &self.users {
            if grant.level == AccessLevel::Unspecified {
                return Err(AccessListError::UnspecifiedLevel);
            }
            if !user_keys.insert(grant.key()) {
                return Err(AccessListError::DuplicateUserGrant {
                    user_id: grant.user_id,
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessListError {
    #[error("duplicate job grant for {job} with minimum grade {minimum_grade}")]
    DuplicateJobGrant { job: String, minimum_grade: i32 },
    #[error("duplicate user grant for user {user_id}")]
    DuplicateUserGrant { user_id: UserId },
    #[error("grant access level must be specified")]
    UnspecifiedLevel,
    #[error("access level {0} is out of range")]
    LevelOutOfRange(i32),
    #[error("access update mode {0} is out of range")]
    ModeOutOfRange(i32),
}
