#[cfg(test)]
#[path = "client_test.rs"]
mod tests;

use std::{fmt::Display, time};

use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::{
    models::{ArcEventTx, AuthResponse, Event, TestMode, event::publish},
    storage::ArcCredentialStore,
};

use super::{ApiError, RefreshError, RefreshGate, decorate, error_message, trim_endpoint};

pub const REFRESH_PATH: &str = "/auth/refresh";

/// A REST call relative to the API endpoint.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    auth_flow: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: vec![],
            body: None,
            auth_flow: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a query parameter, skipped when `value` is `None`.
    pub fn with_query(mut self, key: &str, value: Option<impl ToString>) -> Self {
        if let Some(value) = value {
            self.query.push((key.to_string(), value.to_string()));
        }
        self
    }

    /// Marks a login, registration or refresh call. A `401` on these is a
    /// plain failure and never starts a refresh.
    pub fn auth_flow(mut self) -> Self {
        self.auth_flow = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_auth_flow(&self) -> bool {
        self.auth_flow
    }
}

impl Display for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Authenticated REST client.
///
/// Every request carries the stored access token and the test mode header.
/// A `401` triggers one single-flight refresh through [`RefreshGate`] and the
/// request is replayed once with the new token. When the refresh is rejected
/// the credential store is cleared and [`Event::SessionExpired`] is published.
pub struct SessionClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Option<time::Duration>,
    test_mode: Option<TestMode>,
    store: ArcCredentialStore,
    refresh_gate: RefreshGate,
    event_tx: Option<ArcEventTx>,
}

impl SessionClient {
    pub fn new(endpoint: &str, store: ArcCredentialStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: trim_endpoint(endpoint),
            timeout: None,
            test_mode: None,
            store,
            refresh_gate: RefreshGate::new(),
            event_tx: None,
        }
    }

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_test_mode(mut self, test_mode: Option<TestMode>) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn with_event_tx(mut self, event_tx: ArcEventTx) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn test_mode(&self) -> Option<TestMode> {
        self.test_mode
    }

    pub fn store(&self) -> &ArcCredentialStore {
        &self.store
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_gate.is_in_flight()
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    pub async fn send_empty(&self, request: ApiRequest) -> Result<(), ApiError> {
        self.send(request).await?;
        Ok(())
    }

    /// Sends `request` and returns the successful response.
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let sent_token = self.store.get().access_token;
        let response = self.execute(&request, sent_token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED || request.auth_flow {
            return check_status(response, request.auth_flow).await;
        }

        let stored = self.store.get();
        let token = if stored.access_token.is_some() && stored.access_token != sent_token {
            log::debug!("{} was rejected with a stale token, replaying", request);
            stored.access_token
        } else if let Some(refresh_token) = stored.refresh_token {
            log::debug!("{} was rejected, refreshing the access token", request);
            Some(self.refresh_access_token(refresh_token).await?)
        } else {
            return check_status(response, false).await;
        };

        let response = self.execute(&request, token.as_deref()).await?;
        check_status(response, false).await
    }

    async fn execute(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.endpoint, request.path);
        let mut builder = self.http.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        log::trace!("{} {}", request.method, url);
        let response = decorate(builder, token, self.test_mode).send().await?;
        log::trace!("{} {} -> {}", request.method, url, response.status());
        Ok(response)
    }

    async fn refresh_access_token(&self, refresh_token: String) -> Result<String, RefreshError> {
        self.refresh_gate
            .run(async move {
                match self.request_refresh(refresh_token).await {
                    Ok(auth) => {
                        let token = auth.access_token.clone();
                        self.store.set(self.store.get().refreshed(auth));
                        log::debug!("Access token refreshed");
                        Ok(token)
                    }
                    Err(err) => {
                        log::warn!("Token refresh failed, signing out: {}", err);
                        self.store.clear();
                        publish(self.event_tx.as_ref(), Event::SessionExpired).await;
                        Err(RefreshError::Rejected(err.to_string()))
                    }
                }
            })
            .await
    }

    async fn request_refresh(&self, refresh_token: String) -> Result<AuthResponse, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH)
            .with_json(json!({ "refresh_token": refresh_token }))
            .auth_flow();
        let response = self.execute(&request, None).await?;
        let response = check_status(response, true).await?;
        response
            .json::<AuthResponse>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }
}

/// Maps a non-2xx response to [`ApiError`]. A `401` on an auth flow call keeps
/// the backend's message since it describes bad input, not an expired session.
pub(crate) async fn check_status(response: Response, auth_flow: bool) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED && !auth_flow {
        return Err(ApiError::Unauthorized);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Http {
        status: status.as_u16(),
        message: error_message(status, &body),
    })
}
