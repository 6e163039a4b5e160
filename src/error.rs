//! Error taxonomy for the Payroll Engine.
//!
//! Every failure raised by the validation rules, the repositories or the
//! payroll service is a [`PayrollError`].  Each variant carries a stable,
//! machine-readable code and maps to an HTTP status when surfaced by the
//! API.  Clients should match on `code`, never on the message text.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Stable error code constants returned in `{"code": ..., "message": ...}`.
pub mod error_code {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const DUPLICATE_KEY: &str = "DUPLICATE_KEY";
    pub const INVALID_DEDUCTION: &str = "INVALID_DEDUCTION";
    pub const INVALID_PERIOD: &str = "INVALID_PERIOD";
    pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const REFERENTIAL_CONFLICT: &str = "REFERENTIAL_CONFLICT";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayrollError {
    /// A referenced record does not exist. HTTP 404.
    #[error("{0}")]
    NotFound(String),

    /// Unique constraint on code, employee number or (employee, month, year). HTTP 409.
    #[error("{0}")]
    DuplicateKey(String),

    /// Deduction is negative or larger than the gross salary. HTTP 422.
    #[error("invalid deduction: {0}")]
    InvalidDeduction(String),

    /// A `YYYY-MM` period string could not be parsed. HTTP 400.
    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    /// No session principal. HTTP 401.
    #[error("not authenticated")]
    Unauthenticated,

    /// Generic field constraint violation. HTTP 400.
    #[error("{0}")]
    ValidationFailed(String),

    /// Deleting a record that other records still reference. HTTP 409.
    #[error("{0}")]
    ReferentialConflict(String),

    /// Backing store failure. HTTP 500.
    #[error("storage error: {0}")]
    Storage(String),

    /// Unexpected internal error. HTTP 500.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type PayrollResult<T> = Result<T, PayrollError>;

impl PayrollError {
    pub fn error_code(&self) -> &'static str {
        match self {
            PayrollError::NotFound(_) => error_code::NOT_FOUND,
            PayrollError::DuplicateKey(_) => error_code::DUPLICATE_KEY,
            PayrollError::InvalidDeduction(_) => error_code::INVALID_DEDUCTION,
            PayrollError::InvalidPeriod(_) => error_code::INVALID_PERIOD,
            PayrollError::Unauthenticated => error_code::UNAUTHENTICATED,
            PayrollError::ValidationFailed(_) => error_code::VALIDATION_FAILED,
            PayrollError::ReferentialConflict(_) => error_code::REFERENTIAL_CONFLICT,
            PayrollError::Storage(_) => error_code::STORAGE_ERROR,
            PayrollError::Internal(_) => error_code::INTERNAL,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PayrollError::NotFound(_) => StatusCode::NOT_FOUND,
            PayrollError::DuplicateKey(_) => StatusCode::CONFLICT,
            PayrollError::InvalidDeduction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PayrollError::InvalidPeriod(_) => StatusCode::BAD_REQUEST,
            PayrollError::Unauthenticated => StatusCode::UNAUTHORIZED,
            PayrollError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            PayrollError::ReferentialConflict(_) => StatusCode::CONFLICT,
            PayrollError::Storage(_) | PayrollError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show to a client.  Storage and internal failures
    /// are reduced to a generic text; the detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            PayrollError::Storage(_) | PayrollError::Internal(_) => {
                "something went wrong".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for PayrollError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), "{}", self);
        }
        let body = serde_json::json!({
            "code": self.error_code(),
            "message": self.public_message(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(PayrollError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(PayrollError::DuplicateKey("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            PayrollError::InvalidDeduction("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(PayrollError::InvalidPeriod("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(PayrollError::Unauthenticated.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            PayrollError::ReferentialConflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PayrollError::Storage("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn error_codes_are_distinct() {
        let errors = [
            PayrollError::NotFound("x".into()),
            PayrollError::DuplicateKey("x".into()),
            PayrollError::InvalidDeduction("x".into()),
            PayrollError::InvalidPeriod("x".into()),
            PayrollError::Unauthenticated,
            PayrollError::ValidationFailed("x".into()),
            PayrollError::ReferentialConflict("x".into()),
            PayrollError::Storage("x".into()),
            PayrollError::Internal("x".into()),
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.error_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let err = PayrollError::Storage("lock poisoned on salaries".into());
        assert_eq!(err.public_message(), "something went wrong");
        let err = PayrollError::NotFound("employee 'abc' not found".into());
        assert_eq!(err.public_message(), "employee 'abc' not found");
    }
}
