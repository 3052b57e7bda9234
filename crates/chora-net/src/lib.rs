//! # Chora Net
//!
//! HTTP client shared by the retrieval strategies, the install-time cache
//! population and the background prefetcher.
//!
//! Transport failures (refused connection, DNS, timeout) surface as
//! [`FetchError`]; an HTTP response of any status is returned as a
//! [`FetchedResponse`] and callers decide what a non-2xx status means for
//! their strategy.

use std::time::Duration;

use bytes::Bytes;
use hashbrown::HashMap;
use http::Method;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

/// Errors that can occur while fetching.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("ChoraPlanner/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// A fetched HTTP response with the body fully read.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// Status code.
    pub status: u16,

    /// Response headers (values that are valid UTF-8).
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Bytes,
}

impl FetchedResponse {
    /// Whether the response status is 2xx.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client wrapper. Cloning shares the underlying connection pool.
#[derive(Clone)]
pub struct NetworkClient {
    client: reqwest::Client,
}

impl NetworkClient {
    /// Create a client with the given configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client })
    }

    /// Create a client with default configuration.
    pub fn with_defaults() -> Result<Self, FetchError> {
        Self::new(&ClientConfig::default())
    }

    /// Issue a GET request.
    pub async fn get(&self, url: &Url) -> Result<FetchedResponse, FetchError> {
        self.execute(Method::GET, url).await
    }

    /// Issue a request with an arbitrary method (router pass-through path).
    pub async fn execute(&self, method: Method, url: &Url) -> Result<FetchedResponse, FetchError> {
        debug!(%url, %method, "fetching");

        let response = self.client.request(method, url.clone()).send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        trace!(%url, status, body_len = body.len(), "response received");

        Ok(FetchedResponse {
            status,
            headers,
            body,
        })
    }
}
