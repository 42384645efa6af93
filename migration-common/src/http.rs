use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Method, RequestBuilder, Response, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::retry::RetryPolicy;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Knobs shared by every flag service client.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub requests_per_second: u32,
    pub page_size: usize,
    pub retry_policy: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            requests_per_second: 10,
            page_size: 100,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// A JSON-over-HTTP client rooted at one base URL.
///
/// Every request waits on a process-local token bucket first. Responses with
/// `429` are retried following the configured `RetryPolicy`, as are `5xx`
/// responses to idempotent methods.
#[derive(Clone)]
pub struct ApiClient {
    base_url: Url,
    client: reqwest::Client,
    limiter: Arc<DirectRateLimiter>,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        mut headers: HeaderMap,
        user_agent: &str,
        settings: &ClientSettings,
    ) -> Result<Self, ClientError> {
        // Url::join drops the last path segment unless the base ends with a slash
        let normalized = if base_url.ends_with('/') {
            base_url.to_owned()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| ClientError::InvalidUrl(format!("{e} {normalized}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(normalized));
        }

        let rate = NonZeroU32::new(settings.requests_per_second).ok_or_else(|| {
            ClientError::InvalidConfig("requests per second must be greater than 0".to_owned())
        })?;
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate)));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            base_url,
            client,
            limiter,
            retry_policy: settings.retry_policy,
        })
    }

    /// Build an endpoint URL from raw path segments. Segments are percent-encoded,
    /// so keys containing `/` or spaces stay a single segment.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request, retrying rate limits, and server errors for idempotent
    /// methods. Any other non-success status is returned as `ClientError::ApiError`.
    pub async fn send<F>(
        &self,
        method: Method,
        url: Url,
        build: F,
    ) -> Result<Response, ClientError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            self.limiter.until_ready().await;
            debug!("sending {method} {url} (attempt {attempt})");

            let request = build(self.client.request(method.clone(), url.clone()));
            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            // A 5xx on a create may still have been applied, so only idempotent
            // requests are replayed after one. A 429 was never processed.
            let retryable = status == StatusCode::TOO_MANY_REQUESTS
                || (status.is_server_error() && method.is_idempotent());
            if retryable && self.retry_policy.should_retry(attempt) {
                let wait = self
                    .retry_policy
                    .time_until_next_retry(attempt - 1, retry_after(&response));
                warn!(
                    "{method} {url} returned {status}, retrying in {}ms",
                    wait.as_millis()
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
                continue;
            }

            let box_url = Box::new(response.url().clone());
            let body = response.text().await?;
            return Err(ClientError::ApiError(status.as_u16(), box_url, body));
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let response = self.send(Method::GET, url, |r| r.query(query)).await?;
        parse_json(response).await
    }

    pub async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(Method::POST, url, |r| r.json(body)).await?;
        parse_json(response).await
    }

    /// POST where the response body is not needed.
    pub async fn post<B>(&self, url: Url, body: &B) -> Result<(), ClientError>
    where
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, url, |r| r.json(body)).await?;
        Ok(())
    }

    pub async fn delete(&self, url: Url) -> Result<(), ClientError> {
        self.send(Method::DELETE, url, |r| r).await?;
        Ok(())
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let url = Box::new(response.url().clone());
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ClientError::ParseError(url, e))
}

/// Only the delay-seconds form of `Retry-After` is honoured; HTTP dates fall back to backoff.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
