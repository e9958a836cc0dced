use serde::{Deserialize, Serialize};

use super::{AccessLevel, AccessList, JobGrant};
use crate::ids::UserId;

/// The caller a decision is made for. Authentication happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: UserId,
    pub job: String,
    pub job_grade: i32,
    #[serde(default)]
    pub is_super_user: bool,
}

impl Principal {
    pub fn new(user_id: impl Into<UserId>, job: impl Into<String>, job_grade: i32) -> Self {
        Self {
            user_id: user_id.into(),
            job: job.into(),
            job_grade,
            is_super_user: false,
        }
    }

    pub fn super_user(mut self) -> Self {
        self.is_super_user = true;
        self
    }
}

/// A record whose access is governed by grants: documents and templates.
pub trait AccessControlled {
    fn creator_id(&self) -> Option<UserId>;

    fn is_public(&self) -> bool {
        false
    }
}

/// Which rule decided access, and at what level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    SuperUser,
    Creator,
    UserGrant(AccessLevel),
    JobGrant(AccessLevel),
    Public,
    NoGrant,
}

impl AccessDecision {
    pub fn allows(self, required: AccessLevel) -> bool {
        match self {
            AccessDecision::SuperUser | AccessDecision::Creator => true,
            AccessDecision::UserGrant(level) | AccessDecision::JobGrant(level) => {
                level.satisfies(required)
            }
            AccessDecision::Public => required <= AccessLevel::View,
            AccessDecision::NoGrant => false,
        }
    }
}

pub struct AccessResolver;

impl AccessResolver {
    pub fn can_access<T>(
        principal: &Principal,
        record: &T,
        access: &AccessList,
        required: AccessLevel,
    ) -> bool
    where
        T: AccessControlled + ?Sized,
    {
        Self::resolve(principal, record, access).allows(required)
    }

    /// Evaluates the override chain: super user and creator first, then the
    /// principal's user grant (which short-circuits job grants, `Blocked`
    /// included), then the closest matching job grant, then public fallback.
    pub fn resolve<T>(principal: &Principal, record: &T, access: &AccessList) -> AccessDecision
    where
        T: AccessControlled + ?Sized,
    {
        if principal.is_super_user {
            return AccessDecision::SuperUser;
        }

        if record.creator_id() == Some(principal.user_id) {
            return AccessDecision::Creator;
        }

        if let Some(grant) = access.user_grant(principal.user_id) {
            return AccessDecision::UserGrant(grant.level);
        }

        if let Some(grant) = Self::best_job_grant(principal, &access.jobs) {
            return AccessDecision::JobGrant(grant.level);
        }

        if record.is_public() {
            AccessDecision::Public
        } else {
            AccessDecision::NoGrant
        }
    }

    /// Job grant for the principal's job with the highest minimum grade not
    /// exceeding the principal's grade.
    pub fn best_job_grant<'a>(principal: &Principal, jobs: &'a [JobGrant]) -> Option<&'a JobGrant> {
        jobs.iter()
            .filter(|grant| grant.job == principal.job && grant.minimum_grade <= principal.job_grade)
            .max_by_key(|grant| grant.minimum_grade)
    }
}
