//! # Upstream HTTP Client
//!
//! This module provides a resilient, asynchronous client wrapper around `reqwest`.
//! Requests go through `reqwest-middleware` with a retry layer that only treats
//! network failures and rate limiting (HTTP 429) as transient. Every other
//! status is surfaced to the caller immediately.
//!
//! The client holds no mutable state, so one instance is shared (`Arc`) by all
//! concurrent partition fetches of a generation.

use std::time::Duration;

use reqwest::{header::AUTHORIZATION, Method, StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    default_on_request_failure, policies::ExponentialBackoff, Retryable, RetryableStrategy,
    RetryTransientMiddleware,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors surfaced by the upstream client once retries are exhausted.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The base URL or a joined path is not a valid URL.
    #[error("Invalid upstream URL: {0}")]
    Url(#[from] url::ParseError),

    /// Network-level failure (after retries).
    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),

    /// The server answered with a non-success status.
    #[error("Upstream returned HTTP {status} for {path}")]
    Status {
        /// The numeric HTTP status code.
        status: u16,
        /// The relative path that was requested.
        path: String,
        /// The raw error body, when it could be read.
        body: Option<String>,
    },

    /// A success response whose body did not match the expected shape.
    #[error("Failed to decode upstream response for {path}: {source}")]
    Decode {
        /// The relative path that was requested.
        path: String,
        /// The underlying decode error.
        source: reqwest::Error,
    },
}

impl UpstreamError {
    /// Whether the final failure was a rate-limit response.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, UpstreamError::Status { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS.as_u16())
    }
}

/// Retry policy knobs for the upstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Lower bound of the exponential backoff.
    pub min_backoff: Duration,
    /// Upper bound of the exponential backoff.
    pub max_backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 10,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetrySettings {
    /// Longest total backoff one request can sleep through before giving up.
    ///
    /// Sums the nominal exponential steps, each capped at `max_backoff`.
    /// Jitter only ever shortens a step.
    pub fn worst_case_backoff(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| {
                self.min_backoff
                    .saturating_mul(2u32.saturating_pow(attempt))
                    .min(self.max_backoff)
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Retries network errors and 429 responses, nothing else.
struct NetworkOrRateLimited;

impl RetryableStrategy for NetworkOrRateLimited {
    fn handle(&self, res: &Result<reqwest::Response, reqwest_middleware::Error>) -> Option<Retryable> {
        match res {
            Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                Some(Retryable::Transient)
            }
            Ok(_) => None,
            Err(error) => default_on_request_failure(error),
        }
    }
}

/// A flexible asynchronous HTTP client for the upstream game API.
///
/// Built on top of `reqwest_middleware`, it handles the base URL, the bearer
/// token, and automatic retries.
pub struct UpstreamClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl UpstreamClient {
    /// Creates a new `UpstreamClient` with the given retry policy.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL for the API (e.g., "https://api.spacetraders.io/").
    /// * `auth_token` - An optional string for the Authorization header.
    /// * `retry` - Retry cap and backoff bounds.
    ///
    /// # Errors
    /// Returns `UpstreamError::Url` if `base_url` is not a valid absolute URL.
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        retry: &RetrySettings,
    ) -> Result<Self, UpstreamError> {
        // Relative paths only join under the base when it ends with a slash
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(retry.min_backoff, retry.max_backoff)
            .build_with_max_retries(retry.max_retries);

        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                NetworkOrRateLimited,
            ))
            .build();

        Ok(Self {
            inner: client,
            base_url,
            auth_token,
        })
    }

    /// The base URL all paths are joined to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a GET request and deserializes the JSON body.
    ///
    /// # Errors
    /// Returns an `UpstreamError` if URL joining fails, the network keeps
    /// failing past the retry cap, the final status is not 2xx, or the body
    /// does not decode into `T`.
    pub async fn get_json<T>(&self, path: &str) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned,
    {
        self.request_json(Method::GET, path).await
    }

    async fn request_json<T>(&self, method: Method, path: &str) -> Result<T, UpstreamError>
    where
        T: DeserializeOwned,
    {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.ok();
            log::debug!("Upstream {} answered {}: {:?}", path, status, body);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                path: path.to_string(),
                body,
            });
        }

        response.json::<T>().await.map_err(|source| UpstreamError::Decode {
            path: path.to_string(),
            source,
        })
    }
}
