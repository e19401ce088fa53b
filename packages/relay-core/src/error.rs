use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::CredentialField;

/**
 * \brief 中继错误分类，统一序列化为 `{"error": "..."}`。
 */
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid provider")]
    InvalidProvider,

    /** \brief 完整解析链之后仍缺少必需字段。 */
    #[error("{message}")]
    MissingCredential {
        field: CredentialField,
        message: &'static str,
    },

    #[error("{0}")]
    BadRequest(String),

    /** \brief 上游返回非 2xx，状态码与原始响应体原样透传。 */
    #[error("{body}")]
    Upstream { status: StatusCode, body: String },

    #[error("{0}")]
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidProvider
            | RelayError::MissingCredential { .. }
            | RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream { status, .. } => *status,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Internal(err.to_string())
    }
}

impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        RelayError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(RelayError::InvalidProvider.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            RelayError::MissingCredential {
                field: CredentialField::ApiKey,
                message: "API key is required",
            }
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::Upstream {
                status: StatusCode::TOO_MANY_REQUESTS,
                body: "slow down".into(),
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            RelayError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn upstream_message_is_raw_body() {
        let err = RelayError::Upstream {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: r#"{"error":"rate limited"}"#.into(),
        };
        assert_eq!(err.to_string(), r#"{"error":"rate limited"}"#);
    }
}
