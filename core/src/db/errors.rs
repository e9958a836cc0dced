use anyhow::Error as AnyError;
use sqlx::{Error as SqlxError, error::DatabaseError};
use std::error::Error as StdError;

const POSTGRES_UNIQUE_VIOLATION: &str = "23505";
const SQLITE_UNIQUE_VIOLATION: &str = "2067";
const SQLITE_PRIMARY_KEY_VIOLATION: &str = "1555";

/// Returns `true` if any cause in the chain is a uniqueness constraint
/// violation, such as two grants racing for the same natural key.
pub fn is_unique_violation(err: &AnyError) -> bool {
    err.chain().any(is_unique_violation_cause)
}

fn is_unique_violation_cause(cause: &(dyn StdError + 'static)) -> bool {
    match cause.downcast_ref::<SqlxError>() {
        Some(SqlxError::Database(db_err)) if database_error_is_unique(db_err.as_ref()) => true,
        _ => message_is_unique(&cause.to_string()),
    }
}

fn database_error_is_unique(err: &(dyn DatabaseError + 'static)) -> bool {
    let code_matches = err.code().is_some_and(|code| {
        matches!(
            code.as_ref(),
            POSTGRES_UNIQUE_VIOLATION | SQLITE_UNIQUE_VIOLATION | SQLITE_PRIMARY_KEY_VIOLATION
        )
    });

    code_matches || message_is_unique(err.message())
}

fn message_is_unique(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("unique constraint") || message.contains("duplicate key")
}
