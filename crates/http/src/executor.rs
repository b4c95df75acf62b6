use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

use crate::error::HttpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![("content-type".into(), "application/json".into())],
            body: Some(body.to_string()),
        }
    }

    /// Identity used for caching and in-flight de-duplication.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn is_idempotent_read(&self) -> bool {
        self.method == HttpMethod::Get
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_str(&self.body).map_err(|e| HttpError::Decode(e.to_string()))
    }
}

/// Performs exactly one network attempt. Retries, timeouts and caching are
/// layered on top by [`crate::HttpClient`].
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

pub struct ReqwestExecutor {
    client: Client,
}

impl ReqwestExecutor {
    /// `timeout` is a transport-level backstop; the client enforces the
    /// policy timeout itself.
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build HTTP client, using default");
            Client::new()
        });
        Self { client }
    }
}

#[async_trait]
impl RequestExecutor for ReqwestExecutor {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout { after_ms: 0 }
            } else {
                HttpError::Transport(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_includes_method() {
        let get = HttpRequest::get("https://example.com/a");
        let post = HttpRequest::post_json("https://example.com/a", &serde_json::json!({}));
        assert_eq!(get.key(), "GET https://example.com/a");
        assert_ne!(get.key(), post.key());
        assert!(get.is_idempotent_read());
        assert!(!post.is_idempotent_read());
    }

    #[test]
    fn test_response_json_decode_error() {
        let resp = HttpResponse {
            status: 200,
            body: "not json".into(),
        };
        let parsed: Result<serde_json::Value, _> = resp.json();
        assert!(matches!(parsed, Err(HttpError::Decode(_))));
    }
}
