//! HTTP client with rate limiting for metadata lookups.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting, so a burst of queued links does not hammer
//!   public endpoints
//! * Consistent timeouts and headers
//! * A size cap when reading response bodies
//!
//! # Example
//!
//! ```rust,no_run
//! # use audictl::{config::Config, http::Client};
//! # async fn example(config: &Config, url: reqwest::Url) -> audictl::error::Result<()> {
//! let client = Client::new(&config)?;
//! let request = client.get(url);
//! let response = client.execute(request).await?;
//! let body = Client::read_limited(response, 16 * 1024).await?;
//! # Ok(())
//! # }
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{Method, Url};

use crate::{
    config::Config,
    error::{Error, Result},
};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Direct access to the underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window for the rate limiter.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum calls per [`Self::RATE_LIMIT_INTERVAL`]. Calls beyond this
    /// limit are delayed, not rejected.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 20;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// Upper bound for a whole request including the body.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

    /// Creates a new client identifying itself with the configured user
    /// agent.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built, e.g. because the
    /// TLS backend fails to initialize.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a GET request for `url`.
    #[must_use]
    pub fn get(&self, url: Url) -> reqwest::Request {
        reqwest::Request::new(Method::GET, url)
    }

    /// Executes a request after waiting for the rate limiter.
    ///
    /// # Errors
    ///
    /// Returns a provider error on network failures and timeouts.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }

    /// Reads the body of a successful `response`, failing when it is larger
    /// than `limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns a provider error on non-success status codes, and an invalid
    /// data error when the body exceeds `limit`.
    pub async fn read_limited(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::provider(format!(
                "{} returned status {status}",
                response.url()
            )));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(Error::invalid_data(format!(
                    "response body exceeds {limit} bytes"
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}
