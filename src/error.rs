use actix_web::{error, http::StatusCode, HttpResponse, ResponseError};
use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::models::ApiResponse;
use crate::rules::BookingRule;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Rule(#[from] BookingRule),

    #[error("{0}")]
    Validation(String),

    #[error("You must be logged in")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] DieselError),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("blocking task failed: {0}")]
    Blocking(#[from] error::BlockingError),
}

impl ServiceError {
    pub fn not_found(what: &str) -> Self {
        ServiceError::NotFound(format!("{} not found", what))
    }

    fn client_message(&self) -> String {
        match self {
            ServiceError::Database(DieselError::NotFound) => "Record not found".to_string(),
            ServiceError::Database(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                "Record already exists".to_string()
            }
            ServiceError::Database(_) | ServiceError::Pool(_) | ServiceError::Blocking(_) => {
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Rule(_) | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Database(DieselError::NotFound) => StatusCode::NOT_FOUND,
            ServiceError::Database(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                StatusCode::CONFLICT
            }
            ServiceError::Database(_) | ServiceError::Pool(_) | ServiceError::Blocking(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {:?}", self);
        } else if let ServiceError::Rule(rule) = self {
            log::warn!("Business rule violation: {}", rule);
        }

        HttpResponse::build(status).json(ApiResponse { message: self.client_message() })
    }
}
