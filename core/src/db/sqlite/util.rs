use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Row, sqlite::SqliteRow};

use crate::access::AccessTarget;

pub(crate) fn bool_to_i64(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

pub(crate) fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = row.try_get(column)?;
    DateTime::<Utc>::from_timestamp(secs, 0)
        .with_context(|| format!("invalid timestamp in {column}: {secs}"))
}

pub(crate) fn optional_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let secs: Option<i64> = row.try_get(column)?;
    secs.map(|secs| {
        DateTime::<Utc>::from_timestamp(secs, 0)
            .with_context(|| format!("invalid timestamp in {column}: {secs}"))
    })
    .transpose()
}

pub(crate) fn json_column(row: &SqliteRow, column: &str) -> Result<JsonValue> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).with_context(|| format!("invalid json in {column}"))
}

/// `(target_kind, target_id)` column values of an access target.
pub(crate) fn target_columns(target: AccessTarget) -> Result<(&'static str, i64)> {
    let id = i64::try_from(target.id()).with_context(|| format!("{target} id out of range"))?;
    Ok((target.kind(), id))
}

pub(crate) fn limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
