//! HTTP transport with rate limiting for the accounts and web APIs.
//!
//! This module provides:
//! * The [`Transport`] trait: the two request shapes the client needs,
//!   bearer-authenticated GETs and form-encoded POSTs
//! * [`Client`], a `reqwest`-based implementation with request throttling,
//!   keep-alive and consistent timeouts
//!
//! Responses are returned with their status and body regardless of the
//! status code. Deciding what a non-success status means is left to the
//! caller, because the same status maps to different errors during a token
//! exchange and during a resource read.
//!
//! # Example
//!
//! ```rust
//! use cadenza::http::{Client, Transport};
//!
//! let client = Client::new(&config)?;
//! let response = client.get_with_bearer(&url, &token).await?;
//! if response.is_success() {
//!     let page: Page<Playlist> = response.json()?;
//! }
//! ```

use std::{num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode, Url,
};
use serde::Deserialize;

use crate::{config::Config, error::Result, protocol};

/// A response with its status and complete body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub body: String,
}

impl Response {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an invalid data error if the body does not deserialize into `T`.
    pub fn json<T>(&self) -> Result<T>
    where
        T: for<'de> Deserialize<'de> + std::fmt::Debug,
    {
        protocol::json(&self.body, self.url.path())
    }
}

/// The remote HTTP boundary.
///
/// Implemented by [`Client`] for real traffic and by scripted doubles in
/// tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a GET request carrying `Authorization: Bearer {token}`.
    async fn get_with_bearer(&self, url: &Url, token: &str) -> Result<Response>;

    /// Issues a POST request with an `application/x-www-form-urlencoded` body.
    async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> Result<Response>;
}

/// HTTP client with built-in rate limiting.
pub struct Client {
    inner: reqwest::Client,
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window during which at most
    /// [`RATE_LIMIT_CALLS_PER_INTERVAL`](Self::RATE_LIMIT_CALLS_PER_INTERVAL)
    /// calls are made.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(30);

    /// Maximum allowed API calls per interval. Requests beyond this limit
    /// are delayed, not rejected.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 100;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for a complete response.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    const FORM_CONTENT: HeaderValue = HeaderValue::from_static("application/x-www-form-urlencoded");
    const JSON_CONTENT: HeaderValue = HeaderValue::from_static("application/json");

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying HTTP client cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(&config.user_agent)
            .build()?;

        // Rate limit own requests as to not hit the service's quota during
        // long pagination runs.
        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            inner,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Executes a request after waiting for the rate limiter, and reads the
    /// complete body.
    async fn execute(&self, request: reqwest::Request) -> Result<Response> {
        self.rate_limiter.until_ready().await;

        let method = request.method().clone();
        let url = request.url().clone();
        let response = self.inner.execute(request).await?;

        let status = response.status();
        let body = response.text().await?;
        debug!("{method} {} -> {status}", url.path());

        Ok(Response { url, status, body })
    }
}

#[async_trait]
impl Transport for Client {
    async fn get_with_bearer(&self, url: &Url, token: &str) -> Result<Response> {
        let mut request = reqwest::Request::new(Method::GET, url.clone());
        let headers = request.headers_mut();
        headers.insert(ACCEPT, Self::JSON_CONTENT);

        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        self.execute(request).await
    }

    async fn post_form(&self, url: &Url, form: &[(&str, &str)]) -> Result<Response> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();

        let mut request = reqwest::Request::new(Method::POST, url.clone());
        let headers = request.headers_mut();
        headers.insert(CONTENT_TYPE, Self::FORM_CONTENT);
        headers.insert(ACCEPT, Self::JSON_CONTENT);
        *request.body_mut() = Some(body.into());

        self.execute(request).await
    }
}
