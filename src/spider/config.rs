use crate::spider::error::SpiderError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default configuration constants
pub mod defaults {
    /// Default maximum link distance from the seed
    pub const MAX_DEPTH: usize = 1;

    /// Default number of retries for transient fetch failures
    pub const FAIL_TOLERANCE: u32 = 1;

    /// Default number of workers. 0 selects adaptive sizing.
    pub const MAX_WORKERS: usize = 1;

    /// Upper bound on workers when sizing adaptively
    pub const ADAPTIVE_MAX_WORKERS: usize = 16;

    /// How long an adaptive worker waits for work before retiring
    pub const IDLE_WORKER_TIMEOUT_MS: u64 = 500;

    /// Default per-request timeout in milliseconds
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

    /// Default number of redirect hops followed
    pub const MAX_REDIRECTS: usize = 5;

    /// Backoff before the first retry
    pub const RETRY_BASE_DELAY_MS: u64 = 250;

    /// Ceiling for the backoff delay
    pub const RETRY_MAX_DELAY_MS: u64 = 4_000;

    /// Default user agent
    pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
}

/// Basic authentication credentials in `username:password` form
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl FromStr for BasicAuth {
    type Err = SpiderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (username, password) = raw.split_once(':').ok_or_else(|| {
            SpiderError::InvalidConfig("basic auth must be given as username:password".to_string())
        })?;

        if username.is_empty() {
            return Err(SpiderError::InvalidConfig(
                "basic auth username is empty".to_string(),
            ));
        }

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Configuration for the spider
#[derive(Debug, Clone)]
pub struct SpiderConfig {
    /// Maximum link distance from the seed; the seed itself is depth 0
    pub max_depth: usize,

    /// Number of retries granted to each page for transient failures
    pub fail_tolerance: u32,

    /// Fixed number of workers, or 0 for adaptive sizing
    pub max_workers: usize,

    /// Ceiling for adaptive sizing
    pub adaptive_max_workers: usize,

    /// How long an idle adaptive worker lingers before retiring
    pub idle_worker_timeout_ms: u64,

    /// Patterns matched against URL paths; matching pages are never fetched
    pub exclusion_patterns: Vec<String>,

    /// Credentials sent with every request
    pub basic_auth: Option<BasicAuth>,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Maximum redirect hops followed for a single fetch
    pub max_redirects: usize,

    /// Delay before the first retry in milliseconds
    pub retry_base_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    pub retry_max_delay_ms: u64,

    /// HTTP statuses treated as transient instead of broken (e.g. 503)
    pub transient_statuses: Vec<u16>,

    /// Also expand links found on pages of other hosts
    pub follow_external: bool,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        use defaults::*;

        Self {
            max_depth: MAX_DEPTH,
            fail_tolerance: FAIL_TOLERANCE,
            max_workers: MAX_WORKERS,
            adaptive_max_workers: ADAPTIVE_MAX_WORKERS,
            idle_worker_timeout_ms: IDLE_WORKER_TIMEOUT_MS,
            exclusion_patterns: Vec::new(),
            basic_auth: None,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            max_redirects: MAX_REDIRECTS,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: RETRY_MAX_DELAY_MS,
            transient_statuses: Vec::new(),
            follow_external: false,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl SpiderConfig {
    /// Create a builder for more granular configuration
    pub fn builder() -> SpiderConfigBuilder {
        SpiderConfigBuilder::default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn idle_worker_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_worker_timeout_ms)
    }

    /// Reject settings that could never produce a sensible crawl
    pub fn validate(&self) -> Result<(), SpiderError> {
        if self.adaptive_max_workers == 0 {
            return Err(SpiderError::InvalidConfig(
                "adaptive_max_workers must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(SpiderError::InvalidConfig(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(SpiderError::InvalidConfig(format!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        if let Some(status) = self
            .transient_statuses
            .iter()
            .find(|status| !(100..=599).contains(*status))
        {
            return Err(SpiderError::InvalidConfig(format!(
                "{} is not an HTTP status code",
                status
            )));
        }
        Ok(())
    }
}

/// Builder for SpiderConfig to allow for more granular configuration
#[derive(Default)]
pub struct SpiderConfigBuilder {
    config: SpiderConfig,
}

impl SpiderConfigBuilder {
    /// Set the maximum crawl depth
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    /// Set the retry budget for transient failures
    pub fn fail_tolerance(mut self, fail_tolerance: u32) -> Self {
        self.config.fail_tolerance = fail_tolerance;
        self
    }

    /// Set the number of workers (0 sizes the pool adaptively)
    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    /// Set the ceiling used by adaptive sizing
    pub fn adaptive_max_workers(mut self, ceiling: usize) -> Self {
        self.config.adaptive_max_workers = ceiling;
        self
    }

    pub fn idle_worker_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.idle_worker_timeout_ms = timeout;
        self
    }

    /// Replace all exclusion patterns
    pub fn exclusion_patterns(mut self, patterns: &[&str]) -> Self {
        self.config.exclusion_patterns = patterns.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Set basic auth credentials
    pub fn basic_auth(mut self, auth: BasicAuth) -> Self {
        self.config.basic_auth = Some(auth);
        self
    }

    /// Set the per-request timeout in milliseconds
    pub fn request_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.request_timeout_ms = timeout;
        self
    }

    /// Set the maximum number of redirect hops
    pub fn max_redirects(mut self, hops: usize) -> Self {
        self.config.max_redirects = hops;
        self
    }

    /// Set the delay before the first retry in milliseconds
    pub fn retry_base_delay_ms(mut self, delay: u64) -> Self {
        self.config.retry_base_delay_ms = delay;
        self
    }

    /// Set the retry delay ceiling in milliseconds
    pub fn retry_max_delay_ms(mut self, delay: u64) -> Self {
        self.config.retry_max_delay_ms = delay;
        self
    }

    /// Replace the statuses treated as transient
    pub fn transient_statuses(mut self, statuses: &[u16]) -> Self {
        self.config.transient_statuses = statuses.to_vec();
        self
    }

    pub fn follow_external(mut self, follow: bool) -> Self {
        self.config.follow_external = follow;
        self
    }

    pub fn user_agent(mut self, agent: &str) -> Self {
        self.config.user_agent = agent.to_string();
        self
    }

    /// Build the final SpiderConfig
    pub fn build(self) -> SpiderConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_command_line_defaults() {
        let config = SpiderConfig::default();
        assert_eq!(config.max_depth, 1);
        assert_eq!(config.fail_tolerance, 1);
        assert_eq!(config.max_workers, 1);
        assert!(config.exclusion_patterns.is_empty());
        assert!(config.basic_auth.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = SpiderConfig::builder()
            .max_depth(3)
            .fail_tolerance(2)
            .max_workers(0)
            .exclusion_patterns(&["/login.*", "/private"])
            .transient_statuses(&[503])
            .build();

        assert_eq!(config.max_depth, 3);
        assert_eq!(config.fail_tolerance, 2);
        assert_eq!(config.max_workers, 0);
        assert_eq!(config.exclusion_patterns, vec!["/login.*", "/private"]);
        assert_eq!(config.transient_statuses, vec![503]);
    }

    #[test]
    fn test_basic_auth_parse() {
        let auth: BasicAuth = "admin:s3cr:et".parse().unwrap();
        assert_eq!(auth.username, "admin");
        assert_eq!(auth.password, "s3cr:et");
    }

    #[test]
    fn test_basic_auth_requires_separator() {
        assert!("admin".parse::<BasicAuth>().is_err());
        assert!(":secret".parse::<BasicAuth>().is_err());
    }

    #[test]
    fn test_basic_auth_debug_hides_password() {
        let auth: BasicAuth = "admin:secret".parse().unwrap();
        let printed = format!("{:?}", auth);
        assert!(printed.contains("admin"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SpiderConfig::builder().adaptive_max_workers(0).build();
        assert!(config.validate().is_err());

        let config = SpiderConfig::builder()
            .retry_base_delay_ms(10)
            .retry_max_delay_ms(5)
            .build();
        assert!(config.validate().is_err());

        let config = SpiderConfig::builder().transient_statuses(&[42]).build();
        assert!(config.validate().is_err());
    }
}
