//! Network transport for the storefront API.

use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use serde_json::Value;
use turbo_query::QueryError;

use crate::config::ApiConfig;
use crate::error::StorefrontError;

/// Prefix of every storefront API path.
pub const API_PREFIX: &str = "/api/v1";

/// Sends JSON requests to the storefront API.
///
/// Paths are relative to [`API_PREFIX`], e.g. `/products/tee`. Failures are
/// classified as [`QueryError`] so the query layer can decide on retries.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET` a JSON document.
    async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, QueryError>;

    /// Send a JSON body and return the JSON response.
    async fn send_json(&self, method: Method, path: &str, body: Value) -> Result<Value, QueryError>;
}

/// [`Transport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StorefrontError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("turbo-storefront/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorefrontError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, StorefrontError> {
        Self::new(&config.base_url, config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    async fn execute(&self, request: reqwest::RequestBuilder, path: &str) -> Result<Value, QueryError> {
        let response = request.send().await.map_err(|e| network_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(path, status = status.as_u16(), "api request failed");
            return Err(QueryError::from_status(status.as_u16(), body));
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| QueryError::Decode(e.to_string()))
    }
}

fn network_error(error: &reqwest::Error) -> QueryError {
    if error.is_timeout() {
        QueryError::Network(format!("timed out: {}", error))
    } else {
        QueryError::Network(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, QueryError> {
        tracing::trace!(path, "GET");
        let request = self.client.get(self.url(path)).query(query);
        self.execute(request, path).await
    }

    async fn send_json(&self, method: Method, path: &str, body: Value) -> Result<Value, QueryError> {
        tracing::trace!(path, %method, "send");
        let request = self.client.request(method, self.url(path)).json(&body);
        self.execute(request, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_prefix() {
        let transport = HttpTransport::new("https://shop.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.base_url(), "https://shop.example.com");
        assert_eq!(
            transport.url("/products/tee"),
            "https://shop.example.com/api/v1/products/tee"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let transport = HttpTransport::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let error = transport.get_json("/products", &[]).await.unwrap_err();
        assert!(error.is_transient());
    }
}
