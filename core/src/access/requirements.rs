use std::fmt;

use super::{AccessLevel, AccessList};
use crate::ids::UserId;

/// A template requirement missing from a proposed access list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmetRequirement {
    Job {
        job: String,
        minimum_grade: i32,
        level: AccessLevel,
    },
    User {
        user_id: UserId,
        level: AccessLevel,
    },
}

impl fmt::Display for UnmetRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmetRequirement::Job {
                job,
                minimum_grade,
                level,
            } => write!(f, "job {job} (grade >= {minimum_grade}) with {level} access"),
            UnmetRequirement::User { user_id, level } => {
                write!(f, "user {user_id} with {level} access")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} template requirement(s) not met", .0.len())]
pub struct UnmetRequirements(pub Vec<UnmetRequirement>);

pub struct TemplateRequirementValidator;

impl TemplateRequirementValidator {
    /// Every `required` grant of the template must appear verbatim in the
    /// proposed list: same job, minimum grade and level, or same user and
    /// level. Non-required template grants are ignored.
    pub fn check(template_access: &AccessList, proposed: &AccessList) -> Result<(), UnmetRequirements> {
        let mut unmet = Vec::new();

        for requirement in template_access.jobs.iter().filter(|grant| grant.required) {
            let satisfied = proposed.jobs.iter().any(|grant| {
                grant.job == requirement.job
                    && grant.minimum_grade == requirement.minimum_grade
                    && grant.level == requirement.level
            });
            if !satisfied {
                unmet.push(UnmetRequirement::Job {
                    job: requirement.job.clone(),
                    minimum_grade: requirement.minimum_grade,
                    level: requirement.level,
                });
            }
        }

        for requirement in template_access.users.iter().filter(|grant| grant.required) {
            let satisfied = proposed
                .users
                .iter()
                .any(|grant| grant.user_id == requirement.user_id && grant.level == requirement.level);
            if !satisfied {
                unmet.push(UnmetRequirement::User {
                    user_id: requirement.user_id,
                    level: requirement.level,
                });
            }
        }

        if unmet.is_empty() {
            Ok(())
        } else {
            Err(UnmetRequirements(unmet))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{JobGrant, UserGrant};

    fn template() -> AccessList {
        AccessList::new(
            vec![
                JobGrant::new("fire", 2, AccessLevel::View).required(),
                JobGrant::new("police", 0, AccessLevel::Edit),
            ],
            vec![UserGrant::new(12, AccessLevel::Comment).required()],
        )
    }

    #[test]
    fn missing_required_job_grant_fails() {
        let proposed = AccessList::new(
            vec![JobGrant::new("fire", 3, AccessLevel::View)],
            vec![UserGrant::new(12, AccessLevel::Comment)],
        );

        let err = TemplateRequirementValidator::check(&template(), &proposed).unwrap_err();

        assert_eq!(
            err.0,
            vec![UnmetRequirement::Job {
                job: "fire".into(),
                minimum_grade: 2,
                level: AccessLevel::View,
            }]
        );
    }

    #[test]
    fn stronger_level_does_not_count_as_exact_match() {
        let proposed = AccessList::new(
            vec![JobGrant::new("fire", 2, AccessLevel::Edit)],
            vec![UserGrant::new(12, AccessLevel::Edit)],
        );

        let err = TemplateRequirementValidator::check(&template(), &proposed).unwrap_err();

        assert_eq!(err.0.len(), 2);
        assert_eq!(err.to_string(), "2 template requirement(s) not met");
    }

    #[test]
    fn exact_matches_pass_and_optional_grants_are_ignored() {
        let proposed = AccessList::new(
            vec![JobGrant::new("fire", 2, AccessLevel::View)],
            vec![
                UserGrant::new(12, AccessLevel::Comment),
                UserGrant::new(13, AccessLevel::Edit),
            ],
        );

        assert!(TemplateRequirementValidator::check(&template(), &proposed).is_ok());
    }

    #[test]
    fn template_without_requirements_accepts_anything() {
        let optional = AccessList::new(vec![JobGrant::new("police", 0, AccessLevel::Edit)], vec![]);

        assert!(TemplateRequirementValidator::check(&optional, &AccessList::default()).is_ok());
    }
}
