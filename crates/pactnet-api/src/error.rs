//! Mapping from [`PactError`] to HTTP responses.
//!
//! Every failure surfaces as `{error: CODE, message}` with a status chosen
//! by the code. Internal detail never leaks past the message string, which
//! is written for humans, not debuggers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use pactnet_core::PactError;

pub struct ApiError(pub PactError);

impl From<PactError> for ApiError {
    fn from(e: PactError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match code {
            "UNAUTHENTICATED" | "TOKEN_EXPIRED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "WALLET_NOT_FOUND" | "SESSION_NOT_FOUND" => StatusCode::NOT_FOUND,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
            "PERSISTENCE_ERROR" | "INTERNAL_ERROR" => StatusCode::INTERNAL_SERVER_ERROR,
            // Protocol, session, wallet and contract violations are client
            // errors.
            _ => StatusCode::BAD_REQUEST,
        };
        // Server-side failure detail stays in the logs only.
        let message = match code {
            "PERSISTENCE_ERROR" | "INTERNAL_ERROR" => {
                tracing::error!(code, detail = %self.0, "internal failure");
                "internal failure".to_string()
            }
            _ => self.0.to_string(),
        };
        let body = Json(serde_json::json!({
            "error": code,
            "message": message,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (PactError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (PactError::Forbidden, StatusCode::FORBIDDEN),
            (PactError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (PactError::WalletNotFound("x".into()), StatusCode::NOT_FOUND),
            (PactError::InvalidSignature, StatusCode::BAD_REQUEST),
            (
                PactError::Persistence("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let resp = ApiError(err).into_response();
            assert_eq!(resp.status(), status);
        }
    }
}
