use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::de::DeserializeOwned;
use thiserror::Error as ThisError;

/// Application error taxonomy. Every store or workflow failure is folded
/// into one of these before it reaches the HTTP layer.
#[derive(Debug, ThisError)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NotFound",
            AppError::Conflict(_) => "Conflict",
            AppError::Validation(_) => "Validation",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::Forbidden(_) => "Forbidden",
            AppError::Internal(_) => "InternalError",
        }
    }

    /// Render the error as a JSON response. Internal failures keep their
    /// detail in the server logs only.
    pub fn into_response(self) -> Result<Response<Body>, Error> {
        let message = match &self {
            AppError::Internal(detail) => {
                tracing::error!("internal error: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        Ok(Response::builder()
            .status(self.status_code())
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(
                serde_json::json!({"error": self.kind(), "message": message})
                    .to_string()
                    .into(),
            )
            .map_err(Box::new)?)
    }
}

/// Parse a JSON request body, mapping failures to a Validation error.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("failed to parse request body: {}", e);
        AppError::Validation(format!("Invalid request body: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_not_leaked() {
        let resp = AppError::Internal("connection string leaked".into())
            .into_response()
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = match resp.body() {
            Body::Text(t) => t.clone(),
            _ => panic!("expected text body"),
        };
        assert!(!body.contains("connection string"));
        assert!(body.contains("Internal server error"));
    }

    #[test]
    fn parse_body_rejects_malformed_json() {
        let err = parse_body::<crate::types::LoginRequest>(b"{not json").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
