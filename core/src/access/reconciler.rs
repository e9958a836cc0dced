use std::collections::BTreeMap;

use anyhow::{Context, Result};

use super::{AccessList, AccessListError, AccessTarget, JobGrant, UserGrant};
use crate::{db::transaction::WriteTransaction, ids::GrantId};

/// Grant rows to create, update and delete to turn a persisted access list
/// into a desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessDelta {
    pub to_create: AccessList,
    pub to_update: AccessList,
    pub to_delete: AccessList,
}

impl AccessDelta {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Delta that deletes every grant in `grants`.
    pub fn deleting(grants: AccessList) -> Self {
        Self {
            to_delete: grants,
            ..Self::default()
        }
    }

    /// Delta that creates every grant in `grants`, dropping any ids they carry.
    pub fn creating(grants: &AccessList) -> Self {
        let mut to_create = grants.clone();
        to_create.jobs.iter_mut().for_each(|grant| grant.id = None);
        to_create.users.iter_mut().for_each(|grant| grant.id = None);
        Self {
            to_create,
            ..Self::default()
        }
    }
}

/// Common shape of job and user grants for diffing.
trait Grant: Clone {
    type Key: Ord + Clone;

    fn natural_key(&self) -> Self::Key;
    fn grant_id(&self) -> Option<GrantId>;
    fn set_grant_id(&mut self, id: Option<GrantId>);
    /// Copies the mutable fields of `desired` onto `self`.
    fn take_fields(&mut self, desired: &Self);
    fn fields_differ(&self, desired: &Self) -> bool;
}

impl Grant for JobGrant {
    type Key = (String, i32);

    fn natural_key(&self) -> Self::Key {
        (self.job.clone(), self.minimum_grade)
    }

    fn grant_id(&self) -> Option<GrantId> {
        self.id
    }

    fn set_grant_id(&mut self, id: Option<GrantId>) {
        self.id = id;
    }

    fn take_fields(&mut self, desired: &Self) {
        self.minimum_grade = desired.minimum_grade;
        self.level = desired.level;
        self.required = desired.required;
    }

    fn fields_differ(&self, desired: &Self) -> bool {
        self.minimum_grade != desired.minimum_grade
            || self.level != desired.level
            || self.required != desired.required
    }
}

impl Grant for UserGrant {
    type Key = crate::ids::UserId;

    fn natural_key(&self) -> Self::Key {
        self.user_id
    }

    fn grant_id(&self) -> Option<GrantId> {
        self.id
    }

    fn set_grant_id(&mut self, id: Option<GrantId>) {
        self.id = id;
    }

    fn take_fields(&mut self, desired: &Self) {
        self.level = desired.level;
        self.required = desired.required;
    }

    fn fields_differ(&self, desired: &Self) -> bool {
        self.level != desired.level || self.required != desired.required
    }
}

struct Changes<G> {
    create: Vec<G>,
    update: Vec<G>,
    delete: Vec<G>,
}

fn diff<G: Grant>(current: &[G], desired: &[G]) -> Changes<G> {
    let mut ordered: Vec<&G> = current.iter().collect();
    ordered.sort_by_key(|grant| (grant.grant_id(), grant.natural_key()));

    // Keys are unique in `desired` (checked by the caller), so removing from
    // the map is what marks an entry as claimed.
    let mut unclaimed: BTreeMap<G::Key, &G> = desired
        .iter()
        .map(|grant| (grant.natural_key(), grant))
        .collect();

    let mut update = Vec::new();
    let mut delete = Vec::new();
    for persisted in ordered {
        match unclaimed.remove(&persisted.natural_key()) {
            None => delete.push(persisted.clone()),
            Some(wanted) if persisted.fields_differ(wanted) => {
                let mut updated = persisted.clone();
                updated.take_fields(wanted);
                update.push(updated);
            }
            Some(_) => {}
        }
    }

    let create = unclaimed
        .into_values()
        .map(|grant| {
            let mut grant = grant.clone();
            grant.set_grant_id(None);
            grant
        })
        .collect();

    Changes {
        create,
        update,
        delete,
    }
}

fn names<G: Grant>(named: &G, persisted: &G) -> bool {
    match named.grant_id() {
        Some(id) => persisted.grant_id() == Some(id),
        None => named.natural_key() == persisted.natural_key(),
    }
}

pub struct AccessReconciler;

impl AccessReconciler {
    /// Classifies every persisted and desired grant into create, update or
    /// delete sets. Unchanged grants appear in none of them. The result
    /// depends only on the grant values, not on list order.
    pub fn compare(current: &AccessList, desired: &AccessList) -> Result<AccessDelta, AccessListError> {
        desired.validate()?;

        let jobs = diff(&current.jobs, &desired.jobs);
        let users = diff(&current.users, &desired.users);

        Ok(AccessDelta {
            to_create: AccessList::new(jobs.create, users.create),
            to_update: AccessList::new(jobs.update, users.update),
            to_delete: AccessList::new(jobs.delete, users.delete),
        })
    }

    /// Persisted grants named by `named`: by id when the named grant carries
    /// one, by natural key otherwise.
    pub fn select_named(current: &AccessList, named: &AccessList) -> AccessList {
        AccessList {
            jobs: current
                .jobs
                .iter()
                .filter(|persisted| named.jobs.iter().any(|grant| names(grant, *persisted)))
                .cloned()
                .collect(),
            users: current
                .users
                .iter()
                .filter(|persisted| named.users.iter().any(|grant| names(grant, *persisted)))
                .cloned()
                .collect(),
        }
    }

    /// Writes a delta inside the caller's transaction: creates, then updates,
    /// then deletes. The caller owns commit and rollback.
    pub async fn apply(
        tx: &mut dyn WriteTransaction,
        target: AccessTarget,
        delta: &AccessDelta,
    ) -> Result<()> {
        tracing::debug!(
            %target,
            created = delta.to_create.len(),
            updated = delta.to_update.len(),
            deleted = delta.to_delete.len(),
            "applying access delta"
        );

        for grant in &delta.to_create.jobs {
            tx.insert_job_grant(target, grant).await?;
        }
        for grant in &delta.to_create.users {
            tx.insert_user_grant(target, grant).await?;
        }

        for grant in &delta.to_update.jobs {
            let id = grant
                .id
                .with_context(|| format!("job grant {} has no id to update", grant.job))?;
            tx.update_job_grant(id, grant).await?;
        }
        for grant in &delta.to_update.users {
            let id = grant
                .id
                .with_context(|| format!("user grant {} has no id to update", grant.user_id))?;
            tx.update_user_grant(id, grant).await?;
        }

        for grant in &delta.to_delete.jobs {
            let id = grant
                .id
                .with_context(|| format!("job grant {} has no id to delete", grant.job))?;
            tx.delete_job_grant(id).await?;
        }
        for grant in &delta.to_delete.users {
            let id = grant
                .id
                .with_context(|| format!("user grant {} has no id to delete", grant.user_id))?;
            tx.delete_user_grant(id).await?;
        }

        Ok(())
    }
}
