//! Shared HTTP plumbing for platform clients.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::traits::PlatformError;
use crate::constants::USER_AGENT;

/// Build the HTTP client shared by all platform clients.
pub fn build_client(timeout: Duration) -> Result<Client, PlatformError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .gzip(true)
        .build()
        .map_err(PlatformError::from)
}

/// Turn a non-success response into a classified error.
pub async fn check(resp: Response) -> Result<Response, PlatformError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify(status, body))
}

/// Check the response and decode its JSON body.
pub async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, PlatformError> {
    let resp = check(resp).await?;
    resp.json::<T>()
        .await
        .map_err(|e| PlatformError::Http(format!("invalid response body: {e}")))
}

/// Map a failed status and its body onto a platform error.
pub fn classify(status: StatusCode, body: String) -> PlatformError {
    let message = extract_message(&body).unwrap_or(body);
    if status == StatusCode::UNAUTHORIZED || is_graph_token_error(&message) {
        PlatformError::Auth(message)
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        PlatformError::RateLimited(message)
    } else if status.is_client_error() {
        PlatformError::Rejected(message)
    } else {
        PlatformError::Http(format!("{status}: {message}"))
    }
}

/// Pull a human-readable message out of the usual error envelopes.
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = &value["error"];
    if error.is_object() {
        let message = error["message"].as_str()?;
        // Meta: {"error": {"message", "type": "OAuthException", "code": 190}}
        if error["code"].as_i64() == Some(190) {
            return Some(format!("OAuthException: {message}"));
        }
        return Some(message.to_string());
    }
    value["detail"]
        .as_str()
        .or_else(|| value["message"].as_str())
        .or_else(|| value["error_description"].as_str())
        .or_else(|| error.as_str())
        .map(ToString::to_string)
}

fn is_graph_token_error(message: &str) -> bool {
    message.starts_with("OAuthException")
}

/// Absolute expiry from an `expires_in` seconds value. A value too large
/// to represent is treated as no expiry.
pub fn expires_at(expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in
        .and_then(chrono::Duration::try_seconds)
        .and_then(|d| Utc::now().checked_add_signed(d))
}
