/*
[INPUT]:  HTTP configuration (base URL, timeouts, bearer token)
[OUTPUT]: Configured reqwest client ready for API calls
[POS]:    HTTP layer - core client implementation
[UPDATE]: When adding connection options or changing client behavior
*/

use crate::http::{Result, TaskwatchError};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Default API base URL
const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;
const ERROR_BODY_MAX_BYTES: usize = 512;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client for the task service
#[derive(Debug, Clone)]
pub struct TaskwatchClient {
    http_client: Client,
    base_url: Url,
    token: Option<String>,
}

impl TaskwatchClient {
    /// Create a new client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        Self::with_config_and_base_url(config, DEFAULT_BASE_URL)
    }

    /// Create a new client pointing at a specific API base URL
    pub fn with_config_and_base_url(config: ClientConfig, base_url: &str) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: parse_base_url(base_url)?,
            token: None,
        })
    }

    /// Set the bearer token sent with every request
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    /// Get the bearer token if set
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build request builder for an API endpoint, resolved under the base URL's path
    pub(crate) fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let url = self.base_url.join(endpoint.trim_start_matches('/'))?;
        let builder = self.http_client.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    /// Send a request and decode a JSON body, mapping non-2xx statuses to errors
    pub(crate) async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(TaskwatchError::RateLimit { retry_after });
        }

        let body = response.text().await?;
        if !status.is_success() {
            debug!(status = status.as_u16(), bytes = body.len(), "api request failed");
            return Err(TaskwatchError::api_error(
                status,
                truncate_body(&body, ERROR_BODY_MAX_BYTES),
            ));
        }

        serde_json::from_str(&body).map_err(TaskwatchError::from)
    }
}

/// Parses the base URL so that its path always ends with `/` and endpoints nest under it.
fn parse_base_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn truncate_body(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        return body.to_string();
    }
    let mut end = max_len;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        let body = "é".repeat(10);
        let out = truncate_body(&body, 5);
        assert!(out.ends_with("..."));
        assert_eq!(out, format!("{}...", "é".repeat(2)));
    }

    #[test]
    fn test_request_joins_base_url() {
        let client =
            TaskwatchClient::with_config_and_base_url(ClientConfig::default(), "http://api.local")
                .unwrap();
        let request = client
            .request(Method::GET, "/v1/tasks/abc")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().as_str(), "http://api.local/v1/tasks/abc");
        assert!(request.headers().get("authorization").is_none());
    }

    #[test]
    fn test_request_keeps_base_url_path_prefix() {
        let client = TaskwatchClient::with_config_and_base_url(
            ClientConfig::default(),
            "http://api.local/api",
        )
        .unwrap();
        assert_eq!(client.base_url().as_str(), "http://api.local/api/");
        let request = client
            .request(Method::GET, "/v1/tasks/abc")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.url().as_str(), "http://api.local/api/v1/tasks/abc");
    }

    #[test]
    fn test_request_sets_bearer_token() {
        let mut client =
            TaskwatchClient::with_config_and_base_url(ClientConfig::default(), "http://api.local")
                .unwrap();
        client.set_token("secret");
        let request = client
            .request(Method::GET, "/v1/tasks")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer secret"
        );
    }
}
