use crate::{
    db::errors::DbError,
    types::{Operation, Permission},
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication required")]
    Unauthenticated { message: Option<String> },

    #[error("Insufficient permissions to {action} {resource}")]
    InsufficientPermissions {
        required: Permission,
        action: Operation,
        resource: String,
    },

    #[error("{resource} with id {id} not found")]
    NotFound { resource: String, id: String },

    #[error("{message}")]
    BadRequest { message: String },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db) => match db {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } | DbError::ForeignKeyViolation { .. } | DbError::Conflict { .. } => StatusCode::CONFLICT,
                DbError::CheckViolation { .. } | DbError::Validation { .. } => StatusCode::BAD_REQUEST,
                DbError::InsufficientPoints { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                DbError::TransactionConflict { .. } => StatusCode::SERVICE_UNAVAILABLE,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable machine-readable kind, rendered as the `error` field of the body
    fn kind(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "unauthenticated",
            Error::InsufficientPermissions { .. } => "forbidden",
            Error::NotFound { .. } | Error::Database(DbError::NotFound) => "not_found",
            Error::BadRequest { .. } | Error::Database(DbError::Validation { .. } | DbError::CheckViolation { .. }) => {
                "validation_error"
            }
            Error::Database(DbError::UniqueViolation { .. } | DbError::ForeignKeyViolation { .. } | DbError::Conflict { .. }) => "conflict",
            Error::Database(DbError::InsufficientPoints { .. }) => "insufficient_points",
            Error::Database(DbError::TransactionConflict { .. }) => "transaction_failure",
            Error::Other(_) | Error::Database(DbError::Other(_)) => "internal_error",
        }
    }

    /// Message safe to show to the caller. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Database(db) => match db {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::ForeignKeyViolation { .. } => "Resource is referenced by, or references, another resource".to_string(),
                DbError::CheckViolation { .. } => "Request violates a data constraint".to_string(),
                DbError::Validation { message } | DbError::Conflict { message } => message.clone(),
                DbError::InsufficientPoints { required, available } => {
                    format!("Insufficient points: {required} required, {available} available")
                }
                DbError::TransactionConflict { .. } => "The request conflicted with a concurrent update, please retry".to_string(),
                DbError::Other(_) => "Internal server error".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!("Request failed: {:?}", self);
        }

        let mut body = json!({
            "error": self.kind(),
            "message": self.user_message(),
        });

        match &self {
            Error::Database(DbError::InsufficientPoints { required, available }) => {
                body["required"] = json!(required);
                body["available"] = json!(available);
            }
            Error::Database(DbError::TransactionConflict { .. }) => {
                body["retryable"] = json!(true);
            }
            Error::InsufficientPermissions { required, .. } => {
                body["required"] = json!(required.to_string());
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}
