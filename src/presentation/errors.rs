// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::utils::errors::GenflowError;

/// 应用错误类型
///
/// 封装所有可能的应用层错误，提供统一的错误处理接口
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl AppError {
    /// 错误对应的 HTTP 状态码
    pub fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<GenflowError>() {
            Some(GenflowError::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(GenflowError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(GenflowError::InvalidStateTransition(_)) => StatusCode::CONFLICT,
            Some(GenflowError::CircuitOpen { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Some(GenflowError::Authentication(_))
            | Some(GenflowError::RemoteRejected(_))
            | Some(GenflowError::TransientNetwork(_)) => StatusCode::BAD_GATEWAY,
            Some(GenflowError::Persistence(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = self.0.to_string();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %error_message, "Request failed");
        }

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy_maps_to_status_codes() {
        let cases = [
            (GenflowError::Validation("empty".into()), StatusCode::BAD_REQUEST),
            (GenflowError::NotFound("task x".into()), StatusCode::NOT_FOUND),
            (GenflowError::InvalidStateTransition("done".into()), StatusCode::CONFLICT),
            (
                GenflowError::CircuitOpen {
                    resource: "remote_api".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (GenflowError::Authentication("401".into()), StatusCode::BAD_GATEWAY),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status(), expected);
        }
        assert_eq!(
            AppError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
