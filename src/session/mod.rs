pub mod auth;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod refresh;

pub use client::{ApiRequest, SessionClient};
pub use error::{ApiError, RefreshError};
pub use refresh::RefreshGate;

use reqwest::{RequestBuilder, StatusCode, header};

use crate::{
    config::{constants::TEST_MODE_HEADER, user_agent},
    models::TestMode,
};

/// Attaches the bearer credential and the test mode flag. Shared by REST
/// calls and the streaming call.
pub(crate) fn decorate(
    mut builder: RequestBuilder,
    token: Option<&str>,
    test_mode: Option<TestMode>,
) -> RequestBuilder {
    builder = builder.header(header::USER_AGENT, user_agent());
    if let Some(token) = token {
        builder = builder.bearer_auth(token);
    }
    if let Some(mode) = test_mode {
        builder = builder.header(TEST_MODE_HEADER, mode.header_value());
    }
    builder
}

/// Human readable message of a failed response. Prefers the backend's
/// `{"detail": ...}` envelope.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned())
        .map(|detail| match detail {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        });

    detail.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    })
}

pub(crate) fn trim_endpoint(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}
