//! Error types for the registry

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use uuid::Uuid;

use crate::delegation::Scope;
use crate::models::LifecycleState;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parent agent {agent_id} is {state}, not active")]
    InactiveParent {
        agent_id: Uuid,
        state: LifecycleState,
    },

    #[error("Scope attenuation violation: {offending} not in parent scope")]
    InvalidScope { offending: Scope },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Delegation chain for agent {agent_id} exceeds {max_hops} hops")]
    ChainTooLong { agent_id: Uuid, max_hops: usize },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::InactiveParent { .. } => "inactive_parent",
            AppError::InvalidScope { .. } => "invalid_scope",
            AppError::Validation(_) => "validation_error",
            AppError::ChainTooLong { .. } => "chain_too_long",
            AppError::Database(_) => "database_error",
            AppError::Migration(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InactiveParent { .. } => StatusCode::CONFLICT,
            AppError::InvalidScope { .. } | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::ChainTooLong { .. }
            | AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            AppError::Migration(e) => {
                tracing::error!("Migration error: {}", e);
                "Database error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                e.clone()
            }
            AppError::ChainTooLong { .. } => {
                tracing::error!("{}", self);
                self.to_string()
            }
            _ => self.to_string(),
        };

        let mut body = serde_json::json!({
            "error": self.kind(),
            "detail": detail,
        });
        if let AppError::InvalidScope { offending } = &self {
            body["offending"] = serde_json::json!(offending);
        }

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
