//! Shared HTTP fetching
//!
//! Every non-probe network call goes through [`HttpFetcher`] so the same
//! [`RetryPolicy`] applies to catalog downloads, playlist sources, scraping,
//! logo search and classification requests.

use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;

/// Errors from the HTTP layer
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS, timeout or body read failure
    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// Non-2xx status after retries
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    /// Body was not the JSON we expected
    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("empty response from {url}")]
    EmptyResponse { url: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Retry schedule shared by every fetch call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retries.saturating_add(1),
            base_delay: Duration::from_millis(config.retry_base_ms),
            max_delay: Duration::from_millis(config.retry_max_ms),
        }
    }

    /// No retries at all
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt` (0-based): base * 2^attempt, capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn should_retry_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }
}

/// HTTP client wrapper with retry and JSON helpers
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client, retry })
    }

    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Self::new(
            &config.user_agent,
            Duration::from_millis(config.fetch_timeout_ms),
            RetryPolicy::from_config(config),
        )
    }

    /// Send a request built by `build`, retrying on network errors, 429 and 5xx
    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<Response, FetchError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let attempts = self.retry.max_attempts.max(1);

        for attempt in 0..attempts {
            let is_last = attempt + 1 >= attempts;

            match build(&self.client).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }

                    if RetryPolicy::should_retry_status(status) && !is_last {
                        let backoff = self.retry.delay_for(attempt);
                        warn!(
                            url = url,
                            status = status.as_u16(),
                            fetch_retry = attempt + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            "retrying request"
                        );
                        sleep(backoff).await;
                        continue;
                    }

                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                Err(err) => {
                    if is_last {
                        return Err(FetchError::Network {
                            url: url.to_string(),
                            source: err,
                        });
                    }
                    let backoff = self.retry.delay_for(attempt);
                    warn!(
                        url = url,
                        error = %err,
                        fetch_retry = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying request"
                    );
                    sleep(backoff).await;
                }
            }
        }

        // attempts >= 1 so the loop always returns
        Err(FetchError::EmptyResponse {
            url: url.to_string(),
        })
    }

    /// GET returning the raw response (for streamed bodies)
    pub async fn get(&self, url: &str) -> Result<Response, FetchError> {
        self.get_with_headers(url, HeaderMap::new()).await
    }

    pub async fn get_with_headers(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<Response, FetchError> {
        self.send_with_retry(url, |client| client.get(url).headers(headers.clone()))
            .await
    }

    /// GET a body as text
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.get(url).await?;
        read_text(url, resp).await
    }

    pub async fn get_text_with_headers(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<String, FetchError> {
        let resp = self.get_with_headers(url, headers).await?;
        read_text(url, resp).await
    }

    /// GET and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let text = self.get_text(url).await?;
        decode_json(url, &text)
    }

    /// POST a JSON body and decode the JSON reply
    pub async fn post_json<B, T>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &B,
    ) -> Result<T, FetchError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .send_with_retry(url, |client| client.post(url).headers(headers.clone()).json(body))
            .await?;
        let text = read_text(url, resp).await?;
        decode_json(url, &text)
    }
}

async fn read_text(url: &str, resp: Response) -> Result<String, FetchError> {
    let text = resp.text().await.map_err(|e| FetchError::Network {
        url: url.to_string(),
        source: e,
    })?;

    if text.trim().is_empty() {
        return Err(FetchError::EmptyResponse {
            url: url.to_string(),
        });
    }
    Ok(text)
}

fn decode_json<T: DeserializeOwned>(url: &str, text: &str) -> Result<T, FetchError> {
    serde_json::from_str(text).map_err(|e| {
        let preview: String = text.chars().take(500).collect();
        debug!("Response text: {}", preview);
        FetchError::Decode {
            url: url.to_string(),
            source: e,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode as AxumStatus, routing::get, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_for_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(RetryPolicy::should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(RetryPolicy::should_retry_status(StatusCode::BAD_GATEWAY));
        assert!(!RetryPolicy::should_retry_status(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_get_json_retries_after_503() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/data",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AxumStatus::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(vec![1, 2, 3]))
                    }
                }),
            )
            .with_state(hits.clone());
        let base = serve(app).await;

        let fetcher = HttpFetcher::new("test", Duration::from_secs(5), fast_retry(3)).unwrap();
        let data: Vec<u32> = fetcher.get_json(&format!("{}/data", base)).await.unwrap();

        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/missing",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::NOT_FOUND
                }),
            )
            .with_state(hits.clone());
        let base = serve(app).await;

        let fetcher = HttpFetcher::new("test", Duration::from_secs(5), fast_retry(3)).unwrap();
        let err = fetcher
            .get_text(&format!("{}/missing", base))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_json_is_decode_error() {
        let app = Router::new().route("/bad", get(|| async { "{not json" }));
        let base = serve(app).await;

        let fetcher = HttpFetcher::new("test", Duration::from_secs(5), RetryPolicy::none()).unwrap();
        let err = fetcher
            .get_json::<Vec<u32>>(&format!("{}/bad", base))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpFetcher::new("test", Duration::from_secs(2), fast_retry(2)).unwrap();
        let err = fetcher
            .get_text(&format!("http://{}/x", addr))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Network { .. }));
    }
}
