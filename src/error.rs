use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::billing::BillingError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Billing(err) => match err {
                BillingError::EmptyRequest(_)
                | BillingError::InvalidPeriod { .. }
                | BillingError::NonPositiveAmount(_) => StatusCode::BAD_REQUEST,
                BillingError::InvalidPlan(_) | BillingError::OverpaymentRejected { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                BillingError::InvoiceNotFound(_) => StatusCode::NOT_FOUND,
                BillingError::AlreadyExists { .. } | BillingError::ConcurrencyConflict(_) => {
                    StatusCode::CONFLICT
                }
                BillingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Billing(err) => err.kind(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            AppError::Billing(err) => err.is_transient(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::warn!(error = %self, kind = self.kind(), "request rejected");
        }
        let body = Json(json!({
            "success": false,
            "error": self.kind(),
            "message": self.to_string(),
            "retryable": self.retryable(),
        }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
