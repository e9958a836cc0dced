use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite, SqliteConnection, sqlite::SqliteRow};

use super::util::target_columns;
use crate::{
    access::{AccessList, AccessTarget, JobGrant, UserGrant},
    db::access_repo::AccessRepository,
};

pub struct SqliteAccessRepository {
    pool: Pool<Sqlite>,
}

impl SqliteAccessRepository {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessRepository for SqliteAccessRepository {
    async fn load_access(&self, target: AccessTarget) -> Result<AccessList> {
        let mut conn = self.pool.acquire().await?;
        load_access(&mut conn, target).await
    }
}

fn map_job_row(row: &SqliteRow) -> Result<JobGrant> {
    Ok(JobGrant {
        id: Some(row.try_get("id")?),
        job: row.try_get("job")?,
        minimum_grade: row.try_get("minimum_grade")?,
        level: row.try_get("access")?,
        required: row.try_get("required")?,
    })
}

fn map_user_row(row: &SqliteRow) -> Result<UserGrant> {
    Ok(UserGrant {
        id: Some(row.try_get("id")?),
        user_id: row.try_get("user_id")?,
        level: row.try_get("access")?,
        required: row.try_get("required")?,
    })
}

pub(crate) async fn load_access(
    conn: &mut SqliteConnection,
    target: AccessTarget,
) -> Result<AccessList> {
    let (kind, id) = target_columns(target)?;

    let job_rows = sqlx::query(
        "SELECT id, job, minimum_grade, access, required
         FROM job_access
         WHERE target_kind = ? AND target_id = ?
         ORDER BY id ASC",
    )
    .bind(kind)
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let user_rows = sqlx::query(
        "SELECT id, user_id, access, required
         FROM user_access
         WHERE target_kind = ? AND target_id = ?
         ORDER BY id ASC",
    )
    .bind(kind)
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(AccessList {
        jobs: job_rows.iter().map(map_job_row).collect::<Result<_>>()?,
        users: user_rows.iter().map(map_user_row).collect::<Result<_>>()?,
    })
}
