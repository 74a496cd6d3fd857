use crate::spider::config::{BasicAuth, SpiderConfig};
use crate::spider::error::{FetchError, SpiderError};
use crate::spider::frontier::CrawlTask;
use log::{debug, warn};
use reqwest::{Client, Response, StatusCode};
use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

/// A page the server answered with a reachable status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final HTTP status
    pub status: u16,

    /// URL after following redirects
    pub final_url: String,

    /// Body, when it is markup worth scanning for links
    pub body: Option<String>,
}

/// Anything that can fetch a single URL once
///
/// Implementations classify the outcome; retrying is handled by
/// [`fetch_with_retry`].
pub trait PageSource: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedPage, FetchError>> + Send;
}

/// HTTP client used for crawling
pub struct NetworkClient {
    client: Client,
    basic_auth: Option<BasicAuth>,
    transient_statuses: Vec<u16>,
}

impl NetworkClient {
    /// Create a new network client with the given configuration
    pub fn new(config: &SpiderConfig) -> Result<Self, SpiderError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::ACCEPT,
                    reqwest::header::HeaderValue::from_static(
                        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                    ),
                );
                headers
            })
            .build()
            .map_err(|e| SpiderError::HttpClient(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            basic_auth: config.basic_auth.clone(),
            transient_statuses: config.transient_statuses.clone(),
        })
    }

    async fn send(&self, url: &str) -> Result<Response, reqwest::Error> {
        let mut request = self.client.get(url);
        if let Some(auth) = &self.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        request.send().await
    }

    /// Sort a response status into reachable, broken or retryable
    fn classify_status(&self, status: StatusCode) -> Result<(), FetchError> {
        if self.transient_statuses.contains(&status.as_u16()) {
            return Err(FetchError::Transient {
                status: Some(status.as_u16()),
                detail: format!("HTTP {}", status),
            });
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(FetchError::Permanent {
                status: Some(status.as_u16()),
                detail: format!("HTTP {}", status),
            });
        }
        Ok(())
    }
}

impl PageSource for NetworkClient {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self.send(url).await.map_err(|e| classify_error(&e))?;
        let status = response.status();
        self.classify_status(status)?;

        let final_url = response.url().to_string();
        let body = if is_markup(&response) {
            Some(response.text().await.map_err(|e| classify_error(&e))?)
        } else {
            debug!("Not scanning non-HTML content at {}", url);
            None
        };

        Ok(FetchedPage {
            status: status.as_u16(),
            final_url,
            body,
        })
    }
}

/// Only HTML-ish bodies are scanned; a missing content type gets the benefit
/// of the doubt.
fn is_markup(response: &Response) -> bool {
    match response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        Some(content_type) => {
            let content_type = content_type.to_ascii_lowercase();
            content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
        }
        None => true,
    }
}

/// Sort a transport error into retryable or not
fn classify_error(error: &reqwest::Error) -> FetchError {
    let detail = describe(error);

    if error.is_redirect() {
        FetchError::Permanent {
            status: None,
            detail: format!("too many redirects: {}", detail),
        }
    } else if error.is_builder() {
        FetchError::Permanent {
            status: None,
            detail,
        }
    } else if error.is_timeout() {
        FetchError::transient(format!("timed out: {}", detail))
    } else {
        FetchError::transient(detail)
    }
}

/// reqwest hides the interesting part (refused, DNS) in the source chain
fn describe(error: &reqwest::Error) -> String {
    let mut detail = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}

/// Exponential retry delay capped at a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn from_config(config: &SpiderConfig) -> Self {
        Self {
            base: Duration::from_millis(config.retry_base_delay_ms),
            max: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (0 for the first retry)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Final result of fetching one task with its retry budget
#[derive(Debug)]
pub struct FetchAttempt {
    /// Task as it stood after the last attempt
    pub task: CrawlTask,

    /// Number of requests made
    pub attempts: u32,

    pub outcome: Result<FetchedPage, FetchError>,
}

/// Fetch a task, retrying transient failures while its budget lasts
pub async fn fetch_with_retry<S: PageSource>(
    source: &S,
    task: CrawlTask,
    backoff: &Backoff,
) -> FetchAttempt {
    let mut task = task;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let (status, detail) = match source.fetch(&task.url).await {
            Err(FetchError::Transient { status, detail }) => (status, detail),
            outcome => {
                return FetchAttempt {
                    task,
                    attempts,
                    outcome,
                }
            }
        };

        match task.retry() {
            Some(next) => {
                let delay = backoff.delay(attempts - 1);
                debug!(
                    "Attempt {} for {} failed ({}), retrying in {:?} ({} retries left)",
                    attempts, task.url, detail, delay, next.retries_remaining
                );
                tokio::time::sleep(delay).await;
                task = next;
            }
            None => {
                warn!(
                    "Giving up on {} after {} attempts: {}",
                    task.url, attempts, detail
                );
                return FetchAttempt {
                    task,
                    attempts,
                    outcome: Err(FetchError::Transient {
                        status,
                        detail: format!(
                            "retries exhausted after {} attempts: {}",
                            attempts, detail
                        ),
                    }),
                };
            }
        }
    }
}
