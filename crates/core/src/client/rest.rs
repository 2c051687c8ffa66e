//! REST client
//!
//! Thin wrapper over `reqwest` holding a base URL, default headers and an
//! authentication scheme. Sources talk to it through [`PageFetcher`] so that
//! tests can substitute canned pages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use super::error::ClientError;
use crate::config::Secret;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request authentication
#[derive(Debug, Clone, Default)]
pub enum Auth {
    /// No authentication
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer(Secret),
    /// Raw token in a named header
    ApiKey { name: String, value: Secret },
}

/// Fetches one JSON page for a path and query parameters
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, path: &str, params: &[(String, String)]) -> Result<Value, ClientError>;
}

/// Builder for [`RestClient`]
#[derive(Debug, Clone)]
pub struct RestClientBuilder {
    base_url: String,
    auth: Auth,
    headers: Vec<(String, String)>,
    timeout: Duration,
    accept_invalid_certs: bool,
}

impl RestClientBuilder {
    /// Set request authentication
    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Add a default header sent with every request
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Skip TLS certificate verification
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Build the client
    pub fn build(self) -> Result<RestClient, ClientError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::Build(format!("header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::Build(format!("header '{name}': {e}")))?;
            headers.insert(name, value);
        }

        if self.accept_invalid_certs {
            tracing::warn!(base_url = %self.base_url, "TLS certificate verification is disabled");
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(RestClient {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            auth: self.auth,
            client,
        })
    }
}

/// JSON REST client bound to one base URL
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    auth: Auth,
    client: reqwest::Client,
}

impl RestClient {
    /// Start building a client for `base_url`
    pub fn builder(base_url: impl Into<String>) -> RestClientBuilder {
        RestClientBuilder {
            base_url: base_url.into(),
            auth: Auth::None,
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            accept_invalid_certs: false,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path relative to the base
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn build_request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, url);
        match &self.auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token.expose()),
            Auth::ApiKey { name, value } => request.header(name.as_str(), value.expose()),
        }
    }

    /// GET a JSON document
    pub async fn get_json(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<Value, ClientError> {
        let url = self.url(path);
        tracing::debug!(url = %url, params = ?params, "GET");

        let response = self
            .build_request(reqwest::Method::GET, &url)
            .query(params)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url,
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ClientError::InvalidResponse {
                url,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl PageFetcher for RestClient {
    async fn fetch(&self, path: &str, params: &[(String, String)]) -> Result<Value, ClientError> {
        self.get_json(path, params).await
    }
}

/// Shorten a response body for error messages
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_base_and_path() {
        let client = RestClient::builder("https://api.listenbrainz.org/")
            .build()
            .unwrap();
        assert_eq!(
            client.url("/1/user/alice/listens"),
            "https://api.listenbrainz.org/1/user/alice/listens"
        );
        assert_eq!(client.url("rental/closed"), "https://api.listenbrainz.org/rental/closed");
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let result = RestClient::builder("https://example.com")
            .header("bad header", "x")
            .build();
        assert!(matches!(result, Err(ClientError::Build(_))));
    }

    #[test]
    fn test_debug_hides_credentials() {
        let client = RestClient::builder("https://example.com")
            .auth(Auth::Bearer(Secret::new("s3cr3t-token")))
            .build()
            .unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("s3cr3t-token"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
