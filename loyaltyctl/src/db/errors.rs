use thiserror::Error;

// Postgres SQLSTATE codes we care about
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Entity not found")]
    NotFound,

    #[error("Unique constraint violation: {constraint:?}")]
    UniqueViolation { constraint: Option<String>, table: Option<String> },

    #[error("Foreign key violation: {constraint:?}")]
    ForeignKeyViolation { constraint: Option<String>, table: Option<String> },

    #[error("Check constraint violation: {constraint:?}")]
    CheckViolation { constraint: Option<String>, table: Option<String> },

    /// Lock timeout, deadlock or serialization failure. Safe to retry.
    #[error("Transaction conflict: {message}")]
    TransactionConflict { message: String },

    #[error("Insufficient points: required {required}, available {available}")]
    InsufficientPoints { required: i64, available: i64 },

    #[error("Invalid request: {message}")]
    Validation { message: String },

    /// The entity is in a state that does not allow the requested change
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::TransactionConflict { .. })
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                let constraint = db_err.constraint().map(str::to_string);
                let table = db_err.table().map(str::to_string);
                match code.as_deref() {
                    Some(UNIQUE_VIOLATION) => DbError::UniqueViolation { constraint, table },
                    Some(FOREIGN_KEY_VIOLATION) => DbError::ForeignKeyViolation { constraint, table },
                    Some(CHECK_VIOLATION) => DbError::CheckViolation { constraint, table },
                    Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE | QUERY_CANCELED) => {
                        DbError::TransactionConflict {
                            message: db_err.message().to_string(),
                        }
                    }
                    _ => DbError::Other(sqlx::Error::Database(db_err).into()),
                }
            }
            sqlx::Error::PoolTimedOut => DbError::TransactionConflict {
                message: "timed out waiting for a database connection".to_string(),
            },
            other => DbError::Other(other.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
