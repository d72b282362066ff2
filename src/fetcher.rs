//! Confluence REST client with retry/backoff and offset pagination.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::sleep;
use url::Url;

use crate::debug_log;

const USER_AGENT: &str = "confqa/0.1 (+https://github.com/aaronlifton/confqa)";

/// Backoff tuning applied to transient wiki API failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: usize,
    /// Seed delay for the exponential backoff ladder.
    pub initial_delay: Duration,
    /// Upper bound for doubled delays (`Retry-After` overrides are not capped).
    pub max_delay: Duration,
    /// Multiplicative jitter range sampled uniformly before each sleep.
    pub jitter: (f64, f64),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(5000),
            max_delay: Duration::from_millis(30000),
            jitter: (0.7, 1.3),
        }
    }
}

impl RetryPolicy {
    /// Computes the next backoff delay.
    ///
    /// A server-provided `Retry-After` (seconds) wins outright; otherwise the
    /// previous delay doubles, capped at `max_delay`.
    pub fn next_delay(&self, previous: Duration, retry_after_secs: Option<u64>) -> Duration {
        match retry_after_secs {
            Some(secs) => Duration::from_secs(secs),
            None => (previous * 2).min(self.max_delay),
        }
    }

    /// Applies multiplicative jitter so concurrent fetchers desynchronize.
    pub fn jittered<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let (low, high) = self.jitter;
        delay.mul_f64(rng.random_range(low..=high))
    }
}

/// Errors surfaced by wiki API calls.
#[derive(Debug)]
pub enum FetchError {
    /// Retryable failure: network blip, 5xx, or rate limiting.
    Transient {
        /// HTTP status when one was received.
        status: Option<StatusCode>,
        /// Parsed `Retry-After` header in seconds, when the server sent one.
        retry_after_secs: Option<u64>,
        /// Human-readable failure description.
        message: String,
    },
    /// Non-retryable failure: other 4xx, malformed payloads, retries exhausted.
    Fatal {
        /// HTTP status when one was received.
        status: Option<StatusCode>,
        /// Human-readable failure description.
        message: String,
    },
}

impl FetchError {
    fn network(err: reqwest::Error) -> Self {
        Self::Transient {
            status: None,
            retry_after_secs: None,
            message: format!("network error: {err}"),
        }
    }

    fn rate_limited(retry_after_secs: Option<u64>) -> Self {
        Self::Transient {
            status: Some(StatusCode::TOO_MANY_REQUESTS),
            retry_after_secs,
            message: "rate limited".to_string(),
        }
    }

    fn server(status: StatusCode) -> Self {
        Self::Transient {
            status: Some(status),
            retry_after_secs: None,
            message: format!("server error: {status}"),
        }
    }

    fn http(status: StatusCode) -> Self {
        Self::Fatal {
            status: Some(status),
            message: format!("unexpected status: {status}"),
        }
    }

    fn malformed(status: StatusCode, err: reqwest::Error) -> Self {
        Self::Fatal {
            status: Some(status),
            message: format!("malformed response: {err}"),
        }
    }

    fn exhausted(self, attempts: usize) -> Self {
        match self {
            Self::Transient {
                status, message, ..
            } => Self::Fatal {
                status,
                message: format!("retries exhausted after {attempts} attempts: {message}"),
            },
            fatal => fatal,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient {
                status, message, ..
            } => match status {
                Some(status) => write!(f, "transient fetch error ({status}): {message}"),
                None => write!(f, "transient fetch error: {message}"),
            },
            Self::Fatal { status, message } => match status {
                Some(status) => write!(f, "fatal fetch error ({status}): {message}"),
                None => write!(f, "fatal fetch error: {message}"),
            },
        }
    }
}

impl std::error::Error for FetchError {}

/// Read access to the wiki, abstracted so workflows can run against fakes.
#[async_trait]
pub trait WikiSource: Send + Sync {
    /// Lists every space key visible to the configured credentials.
    async fn spaces(&self) -> Result<Vec<String>, FetchError>;
    /// Lists every page id in the given space.
    async fn page_ids(&self, space_key: &str) -> Result<Vec<String>, FetchError>;
    /// Fetches the storage-format body of a page; absent bodies come back empty.
    async fn page_content(&self, page_id: &str) -> Result<String, FetchError>;
}

/// HTTP client for the Confluence REST API.
///
/// Owns its `reqwest::Client` and credentials; construct one and pass it where
/// it is needed rather than sharing ambient globals.
#[derive(Clone)]
pub struct ConfluenceClient {
    client: Client,
    base_url: String,
    username: String,
    api_token: String,
    policy: RetryPolicy,
    page_limit: usize,
}

impl ConfluenceClient {
    /// Builds a new client against the given REST base URL.
    pub fn new(
        base_url: &str,
        username: String,
        api_token: String,
        policy: RetryPolicy,
        page_limit: usize,
        timeout: Duration,
    ) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("invalid wiki base URL {base_url:?}"))?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build wiki HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            api_token,
            policy,
            page_limit: page_limit.max(1),
        })
    }

    /// Fetches and deserializes a URL, retrying transient failures with
    /// exponential backoff and jitter.
    pub async fn fetch_with_retry<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let mut delay = self.policy.initial_delay;
        let mut attempt = 0usize;
        loop {
            let err = match self.try_fetch::<T>(url).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let FetchError::Transient {
                retry_after_secs, ..
            } = err
            else {
                return Err(err);
            };
            if attempt >= self.policy.max_retries {
                return Err(err.exhausted(attempt + 1));
            }
            delay = self.policy.next_delay(delay, retry_after_secs);
            let wait = self.policy.jittered(delay, &mut rand::rng());
            eprintln!(
                "fetch {url} failed ({err}); retrying in {:.2}s",
                wait.as_secs_f64()
            );
            // tokio sleep: backing off one page never stalls sibling fetches
            sleep(wait).await;
            attempt += 1;
        }
    }

    async fn try_fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        debug_log!("GET {url}");
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.api_token))
            .send()
            .await
            .map_err(FetchError::network)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok());
            return Err(FetchError::rate_limited(retry_after));
        }
        if status.is_server_error() {
            return Err(FetchError::server(status));
        }
        if !status.is_success() {
            return Err(FetchError::http(status));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| FetchError::malformed(status, err))
    }

    /// Walks an offset-paginated listing endpoint to completion.
    ///
    /// The API signals the last page inconsistently per endpoint: some omit
    /// the `_links.next` entry, others just return a short page. Either signal
    /// terminates the walk.
    async fn collect_paged<T, F>(&self, make_url: F) -> Result<Vec<T>, FetchError>
    where
        T: DeserializeOwned,
        F: Fn(usize, usize) -> String,
    {
        let limit = self.page_limit;
        let mut start = 0usize;
        let mut collected = Vec::new();
        loop {
            let page: PagedResponse<T> = self.fetch_with_retry(&make_url(start, limit)).await?;
            let count = page.results.len();
            collected.extend(page.results);
            let next_absent = page
                .links
                .as_ref()
                .map(|links| links.next.is_none())
                .unwrap_or(false);
            if count < limit || next_absent {
                break;
            }
            start += limit;
        }
        Ok(collected)
    }
}

#[async_trait]
impl WikiSource for ConfluenceClient {
    async fn spaces(&self) -> Result<Vec<String>, FetchError> {
        let base = &self.base_url;
        let entries: Vec<SpaceEntry> = self
            .collect_paged(|start, limit| format!("{base}/space?start={start}&limit={limit}"))
            .await?;
        Ok(entries.into_iter().map(|entry| entry.key).collect())
    }

    async fn page_ids(&self, space_key: &str) -> Result<Vec<String>, FetchError> {
        let base = &self.base_url;
        let entries: Vec<ContentEntry> = self
            .collect_paged(|start, limit| {
                format!("{base}/content/?spaceKey={space_key}&start={start}&limit={limit}")
            })
            .await?;
        Ok(entries.into_iter().map(|entry| entry.id).collect())
    }

    async fn page_content(&self, page_id: &str) -> Result<String, FetchError> {
        let url = format!("{}/content/{page_id}?expand=body.storage", self.base_url);
        let content: ContentBody = self.fetch_with_retry(&url).await?;
        Ok(content.body.storage.value)
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct PagedResponse<T> {
    #[serde(default)]
    results: Vec<T>,
    #[serde(rename = "_links")]
    links: Option<PageLinks>,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpaceEntry {
    key: String,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ContentBody {
    #[serde(default)]
    body: BodyNode,
}

#[derive(Debug, Default, Deserialize)]
struct BodyNode {
    #[serde(default)]
    storage: StorageNode,
}

#[derive(Debug, Default, Deserialize)]
struct StorageNode {
    #[serde(default)]
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            jitter: (0.7, 1.3),
        }
    }

    #[test]
    fn delay_doubles_until_capped() {
        let policy = fast_policy();
        let first = policy.next_delay(policy.initial_delay, None);
        assert_eq!(first, Duration::from_millis(200));
        let second = policy.next_delay(first, None);
        assert_eq!(second, Duration::from_millis(400));
        let third = policy.next_delay(second, None);
        assert_eq!(third, Duration::from_millis(400));
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let policy = fast_policy();
        let delay = policy.next_delay(Duration::from_millis(100), Some(3));
        assert_eq!(delay, Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_within_multiplier_range() {
        let policy = fast_policy();
        let base = Duration::from_millis(1000);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let jittered = policy.jittered(base, &mut rng);
            assert!(jittered >= Duration::from_millis(700), "{jittered:?}");
            assert!(jittered <= Duration::from_millis(1300), "{jittered:?}");
        }
    }

    #[test]
    fn transient_escalates_to_fatal() {
        let err = FetchError::server(StatusCode::BAD_GATEWAY).exhausted(5);
        match err {
            FetchError::Fatal { status, message } => {
                assert_eq!(status, Some(StatusCode::BAD_GATEWAY));
                assert!(message.contains("5 attempts"), "{message}");
            }
            other => panic!("expected fatal error, got {other:?}"),
        }
    }

    #[test]
    fn content_body_tolerates_missing_paths() {
        let parsed: ContentBody = serde_json::from_str("{}").expect("parse");
        assert_eq!(parsed.body.storage.value, "");
        let parsed: ContentBody =
            serde_json::from_str(r#"{"body":{"storage":{"value":"<p>hi</p>"}}}"#).expect("parse");
        assert_eq!(parsed.body.storage.value, "<p>hi</p>");
    }
}
