//! JSON/binary response helpers for the HTTP surface. Per-request errors
//! render as `{error:true, msg, not_found?}`; successes are JSON by
//! default, indented when `pretty=1`, or raw bytes when `binary=1`.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use mvkv::error::Error;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::InvalidKey(_) => StatusCode::BAD_REQUEST,
            Error::DeepCas => StatusCode::CONFLICT,
            Error::TimeSkew { .. } | Error::Corruption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Transient(_) | Error::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) | Error::Lock => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let mut body = json!({ "error": true, "msg": self.0.to_string() });
        if matches!(self.0, Error::NotFound) {
            body["not_found"] = json!(true);
        }
        (status, Json(body)).into_response()
    }
}

/// Renders `value` as JSON, indented if `pretty` is set.
pub fn json_response<T: Serialize>(value: &T, pretty: bool) -> Response {
    let body = if pretty {
        serde_json::to_string_pretty(value).unwrap_or_default()
    } else {
        serde_json::to_string(value).unwrap_or_default()
    };
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

pub fn binary_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
}
