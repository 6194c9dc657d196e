//! Error responses for the audit routes

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::error;

use crate::error::AuditError;

#[derive(Debug)]
pub struct AppError(pub AuditError);

impl From<AuditError> for AppError {
    fn from(err: AuditError) -> Self {
        AppError(err)
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AuditError::InvalidEvent(_) | AuditError::EncodingError(_) => StatusCode::BAD_REQUEST,
            AuditError::StoreUnavailable(_) | AuditError::ConcurrentAppendConflict(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AuditError::CorruptEntry { .. } | AuditError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Audit request failed: {}", self.0);
        }

        let payload = json!({
            "error": self.0.to_string()
        });

        (status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError(AuditError::missing_field("action")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError(AuditError::EncodingError("NaN".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError(AuditError::StoreUnavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError(AuditError::ConcurrentAppendConflict("tail moved".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError(AuditError::corrupt_entry(4, "bad hash")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
