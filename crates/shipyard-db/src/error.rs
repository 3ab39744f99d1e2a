//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for shipyard_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => shipyard_core::Error::NotFound(what),
            DbError::Duplicate(what) => shipyard_core::Error::Conflict(what),
            other => shipyard_core::Error::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maps_to_core_errors() {
        let err: shipyard_core::Error = DbError::NotFound("run 1".into()).into();
        assert!(matches!(err, shipyard_core::Error::NotFound(m) if m == "run 1"));

        let err: shipyard_core::Error = DbError::Duplicate("run 1".into()).into();
        assert!(matches!(err, shipyard_core::Error::Conflict(_)));

        let err: shipyard_core::Error = DbError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(err, shipyard_core::Error::Storage(_)));
    }
}
