use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ReminderStatus, Tier};
use crate::validation::ValidationError;

/// Errors raised by the reminder engine.
#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("A pending {tier} reminder already exists for order {order_ref} ({existing})")]
    DuplicatePending {
        order_ref: String,
        tier: Tier,
        existing: Uuid,
    },

    #[error("Reminder {0} has already been claimed for dispatch")]
    AlreadyExecuted(Uuid),

    #[error("Invalid transition for reminder {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: ReminderStatus,
        to: ReminderStatus,
    },

    #[error("Reminder {id} cannot become {status} without a delivery result")]
    MissingDeliveryResult { id: Uuid, status: ReminderStatus },

    #[error("Reminder {0} not found")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type ReminderResult<T> = Result<T, ReminderError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<ReminderError> for AppError {
    fn from(err: ReminderError) -> Self {
        match err {
            ReminderError::Validation(e) => AppError::Validation(e.to_string()),
            ReminderError::NotFound(_) => AppError::NotFound(err.to_string()),
            ReminderError::DuplicatePending { .. } | ReminderError::AlreadyExecuted(_) => {
                AppError::Conflict(err.to_string())
            }
            ReminderError::InvalidTransition { .. } | ReminderError::MissingDeliveryResult { .. } => {
                tracing::error!(error = %err, "state machine violation surfaced to caller");
                AppError::Internal(err.to_string())
            }
            ReminderError::Database(e) => AppError::DatabaseError(e.to_string()),
            ReminderError::Storage(message) => AppError::DatabaseError(message),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("Invalid input".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error_status_code() {
        let error = AppError::from(ReminderError::NotFound(Uuid::new_v4()));
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_duplicate_pending_maps_to_conflict() {
        let error = AppError::from(ReminderError::DuplicatePending {
            order_ref: "ORD-1".to_string(),
            tier: Tier::Gentle,
            existing: Uuid::new_v4(),
        });
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_already_executed_maps_to_conflict() {
        let error = AppError::from(ReminderError::AlreadyExecuted(Uuid::new_v4()));
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_invalid_transition_is_internal() {
        let error = AppError::from(ReminderError::InvalidTransition {
            id: Uuid::new_v4(),
            from: ReminderStatus::Sent,
            to: ReminderStatus::Pending,
        });
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_missing_delivery_result_is_internal() {
        let error = AppError::from(ReminderError::MissingDeliveryResult {
            id: Uuid::new_v4(),
            status: ReminderStatus::Sent,
        });
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_database_error_status_code() {
        let error = AppError::from(ReminderError::Database(sqlx::Error::RowNotFound));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_validation_message_names_field() {
        let error = AppError::from(ValidationError::new("channels", "must not be empty"));
        assert_eq!(error.to_string(), "Validation error: channels: must not be empty");
    }

    #[tokio::test]
    async fn test_conflict_error_response() {
        let error = AppError::Conflict("already pending".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_validation_error_response() {
        let error = AppError::Validation("Invalid email format".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
