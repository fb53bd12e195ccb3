use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_partner_concurrency: usize,
    pub backoff: BackoffPolicy,
    /// Minimum spacing between two calls to the same partner.
    pub min_call_interval: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 8,
            per_partner_concurrency: 2,
            backoff: BackoffPolicy::default(),
            min_call_interval: Duration::from_millis(1000),
        }
    }
}

/// Hands out call slots per partner, each at least `interval` after the previous one.
#[derive(Debug)]
pub struct CallPacer {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl CallPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    pub async fn wait_turn(&self, partner: &str) {
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots
                .get(partner)
                .copied()
                .map_or(now, |next| next.max(now));
            slots.insert(partner.to_string(), slot + self.interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("http fetcher is shutting down")]
    Closed,
}

/// Outbound HTTP client for partner APIs: bounded concurrency, pacing and retry.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_partner_limit: usize,
    per_partner: Mutex<HashMap<String, Arc<Semaphore>>>,
    pacer: CallPacer,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_partner_limit: config.per_partner_concurrency.max(1),
            per_partner: Mutex::new(HashMap::new()),
            pacer: CallPacer::new(config.min_call_interval),
            backoff: config.backoff,
        })
    }

    async fn partner_semaphore(&self, partner: &str) -> Arc<Semaphore> {
        let mut map = self.per_partner.lock().await;
        map.entry(partner.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_partner_limit)))
            .clone()
    }

    /// GET `url` and decode a JSON body, retrying transient failures.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        partner: &str,
        url: &str,
        bearer: Option<&SecretString>,
    ) -> Result<T, FetchError> {
        let _global = self.global_limit.acquire().await.map_err(|_| FetchError::Closed)?;
        let per_partner = self.partner_semaphore(partner).await;
        let _partner = per_partner.acquire().await.map_err(|_| FetchError::Closed)?;

        let span = info_span!("partner_fetch", partner, url);
        async {
            let mut attempt = 0usize;
            loop {
                self.pacer.wait_turn(partner).await;
                let mut request = self.client.get(url);
                if let Some(token) = bearer {
                    request = request.bearer_auth(token.expose_secret());
                }

                let err = match request.send().await {
                    Ok(resp) if resp.status().is_success() => {
                        let bytes = match resp.bytes().await {
                            Ok(bytes) => bytes,
                            Err(e) => return Err(FetchError::Request(e)),
                        };
                        return serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode {
                            url: url.to_string(),
                            message: e.to_string(),
                        });
                    }
                    Ok(resp) => {
                        let status = resp.status();
                        let err = FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        };
                        (classify_status(status), err)
                    }
                    Err(err) => (classify_reqwest_error(&err), FetchError::Request(err)),
                };

                match err {
                    (RetryDisposition::Retryable, e) if attempt < self.backoff.max_retries => {
                        debug!(attempt, error = %e, "retrying partner call");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                    }
                    (_, e) => return Err(e),
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), RetryDisposition::NonRetryable);
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_spaces_calls_to_the_same_partner() {
        let pacer = CallPacer::new(Duration::from_millis(500));
        let start = Instant::now();
        pacer.wait_turn("hotels").await;
        pacer.wait_turn("hotels").await;
        pacer.wait_turn("other").await;
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(1000));
    }
}
