//! JSON bodies for every non-stream route.
//!
//! Success: `{"status":"success","data":...}` (`data` omitted when empty).
//! Failure: `{"status":"error","code":"...","message":"..."}`.

use std::convert::Infallible;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode, header};
use serde::Serialize;
use shared::types::ErrorResponse;
use tracing::{debug, warn};

pub type HubResponse = Response<BoxBody<Bytes, Infallible>>;

#[derive(Serialize)]
struct Success<T> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

pub fn deliver_serialized_json<T: Serialize>(data: &T, status: StatusCode) -> Result<HubResponse> {
    let body = serde_json::to_vec(data).context("Failed to serialize response")?;
    debug!("{} JSON response, {} bytes", status.as_u16(), body.len());

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)).boxed())
        .context("Failed to build JSON response")
}

pub fn deliver_error_json(code: &str, message: &str, status: StatusCode) -> Result<HubResponse> {
    warn!("Rejecting request: {} {} ({})", status.as_u16(), code, message);
    deliver_serialized_json(&ErrorResponse::new(code, message), status)
}

pub fn deliver_success_json<T: Serialize>(data: Option<T>) -> Result<HubResponse> {
    deliver_serialized_json(
        &Success {
            status: "success",
            data,
        },
        StatusCode::OK,
    )
}

/// Fixed 500 used when even the error body could not be built.
pub fn internal_error() -> HubResponse {
    let mut response = Response::new(
        Full::new(Bytes::from_static(
            br#"{"status":"error","code":"INTERNAL","message":"Internal server error"}"#,
        ))
        .boxed(),
    );
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
