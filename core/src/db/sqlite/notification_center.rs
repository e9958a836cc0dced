use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite, sqlite::SqliteRow};

use super::util::{bool_to_i64, json_column, timestamp};
use crate::{
    ids::UserId,
    notification::{NotificationCenter, NotificationRecord},
};

pub struct SqliteNotificationCenter {
    pool: Pool<Sqlite>,
}

impl SqliteNotificationCenter {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<NotificationRecord> {
        Ok(NotificationRecord {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind: row.try_get("kind")?,
            payload: json_column(row, "payload")?,
            read: row.try_get("read")?,
            created_at: timestamp(row, "created_at")?,
            updated_at: timestamp(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl NotificationCenter for SqliteNotificationCenter {
    async fn enqueue(&self, notification: NotificationRecord) -> Result<()> {
        let payload = serde_json::to_string(&notification.payload)?;

        sqlx::query(
            "INSERT INTO notifications (id, user_id, kind, payload, read, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&notification.id)
        .bind(notification.user_id)
        .bind(&notification.kind)
        .bind(payload)
        .bind(bool_to_i64(notification.read))
        .bind(notification.created_at.timestamp())
        .bind(notification.updated_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId, limit: i64) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, payload, read, created_at, updated_at
             FROM notifications
             WHERE user_id = ?
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn count_unread(&self, user_id: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) as count FROM notifications WHERE user_id = ? AND read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
