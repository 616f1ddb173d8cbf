use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mta_sync_core::{ApplicationSource, RemoteApplicationRecord, SourceError};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, LOCATION, RETRY_AFTER};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::token::TokenSource;

/// Longest slice of an error body copied into an error message.
const ERROR_BODY_LIMIT: usize = 256;

/// Reads the application inventory from the MTA hub REST API.
pub struct MtaClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
}

impl MtaClient {
    /// Redirects are never followed: the hub answers an expired session with
    /// a redirect to its login page, which must surface as `Unauthorized`.
    pub fn new(
        base_url: Url,
        tokens: Arc<dyn TokenSource>,
        request_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(request_timeout)
            .user_agent(concat!("mta-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::unreachable(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    fn applications_url(&self) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("applications");
        }
        url
    }
}

#[async_trait]
impl ApplicationSource for MtaClient {
    async fn fetch_applications(&self) -> Result<Vec<RemoteApplicationRecord>, SourceError> {
        let url = self.applications_url();
        let mut request = self.http.get(url.clone()).header(ACCEPT, "application/json");
        if let Some(token) = self.tokens.token().await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        debug!(url = %url, status = response.status().as_u16(), "MTA hub responded");

        let body = handle_response(response).await?;
        decode_inventory(&body)
    }
}

fn transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::unreachable("request timed out")
    } else {
        SourceError::unreachable(e.to_string())
    }
}

async fn handle_response(response: reqwest::Response) -> Result<String, SourceError> {
    let status = response.status();
    if status.is_success() {
        return response.text().await.map_err(transport_error);
    }

    if status.is_redirection() {
        let login_url = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        return Err(SourceError::Unauthorized { login_url });
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            let body = response.text().await.unwrap_or_default();
            Err(SourceError::Unauthorized {
                login_url: login_hint(&body),
            })
        }
        StatusCode::TOO_MANY_REQUESTS => Err(SourceError::RateLimited {
            retry_after: retry_after(response.headers()),
        }),
        _ => {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            Err(SourceError::unreachable(format!("HTTP {status}: {snippet}")))
        }
    }
}

/// The hub puts its login redirect in a `loginURL` field of the 401 body.
fn login_hint(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("loginURL")?
        .as_str()
        .map(str::to_string)
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Decodes an inventory response body.
///
/// The body must be a JSON array. Elements are decoded one by one so a single
/// odd record does not discard the rest of the inventory.
pub fn decode_inventory(body: &str) -> Result<Vec<RemoteApplicationRecord>, SourceError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| SourceError::malformed(format!("invalid JSON: {e}")))?;

    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .map(RemoteApplicationRecord::from_value)
            .collect()),
        other => Err(SourceError::malformed(format!(
            "expected a JSON array of applications, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
