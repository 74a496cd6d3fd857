use crate::spider::config::SpiderConfig;
use crate::spider::error::{FetchError, SpiderError};
use crate::spider::frontier::{CrawlTask, Frontier};
use crate::spider::network::{Backoff, FetchedPage, NetworkClient, PageSource};
use crate::spider::pool::{sizing_for, CrawlContext, WorkerPool};
use crate::spider::utils::{normalize_seed, ExclusionFilter};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Outcome for one crawled URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Canonical URL as admitted to the crawl
    pub url: String,

    /// HTTP status, `None` when the server never answered
    pub status_code: Option<u16>,

    pub broken: bool,

    /// Link distance from the seed
    pub depth: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    /// Where the URL redirected to, if anywhere
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,

    /// Number of fetch attempts made
    pub attempts: u32,

    /// Links found on the page, in document order
    pub outgoing_links: Vec<String>,
}

impl PageRecord {
    pub(crate) fn reachable(
        task: CrawlTask,
        page: FetchedPage,
        outgoing_links: Vec<String>,
        attempts: u32,
    ) -> Self {
        let final_url = (page.final_url != task.url).then_some(page.final_url);
        Self {
            url: task.url,
            status_code: Some(page.status),
            broken: false,
            depth: task.depth,
            error_detail: None,
            final_url,
            attempts,
            outgoing_links,
        }
    }

    pub(crate) fn broken(task: CrawlTask, error: FetchError, attempts: u32) -> Self {
        Self {
            url: task.url,
            status_code: error.status(),
            broken: true,
            depth: task.depth,
            error_detail: Some(error.to_string()),
            final_url: None,
            attempts,
            outgoing_links: Vec::new(),
        }
    }

    pub(crate) fn internal_failure(url: String, depth: usize, reason: String) -> Self {
        Self {
            url,
            status_code: None,
            broken: true,
            depth,
            error_detail: Some(reason),
            final_url: None,
            attempts: 0,
            outgoing_links: Vec::new(),
        }
    }

    /// Result ordering: by URL string
    pub fn cmp_by_url(a: &PageRecord, b: &PageRecord) -> Ordering {
        a.url.cmp(&b.url)
    }
}

/// Lifecycle of a crawl controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Running,
    Draining,
    Done,
}

/// Counters describing a finished crawl
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub pages: usize,
    pub broken: usize,
    pub max_depth_reached: usize,
    pub workers_started: usize,
    pub elapsed_ms: u128,
}

/// Crawl controller
///
/// Owns the frontier and worker pool for one crawl of one seed. Construct,
/// call [`Spider::crawl`] once, then read [`Spider::results`].
pub struct Spider<S: PageSource = NetworkClient> {
    seed: Url,
    config: SpiderConfig,
    exclusions: ExclusionFilter,
    source: Arc<S>,
    state: CrawlState,
    results: Vec<PageRecord>,
    summary: CrawlSummary,
}

impl Spider<NetworkClient> {
    /// Create a spider for `seed` that fetches over HTTP
    pub fn new(seed: &str, config: SpiderConfig) -> Result<Self, SpiderError> {
        config.validate()?;
        let network = NetworkClient::new(&config)?;
        Self::with_source(seed, config, network)
    }
}

impl<S: PageSource> Spider<S> {
    /// Create a spider with a custom page source
    pub fn with_source(seed: &str, config: SpiderConfig, source: S) -> Result<Self, SpiderError> {
        config.validate()?;
        let seed = normalize_seed(seed)?;
        let exclusions = ExclusionFilter::new(config.exclusion_patterns.as_slice())?;

        Ok(Self {
            seed,
            config,
            exclusions,
            source: Arc::new(source),
            state: CrawlState::Idle,
            results: Vec::new(),
            summary: CrawlSummary::default(),
        })
    }

    pub fn seed(&self) -> &str {
        self.seed.as_str()
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// Crawl from the seed until no work is left
    ///
    /// Individual page failures never make this fail; they are recorded as
    /// broken pages.
    pub async fn crawl(&mut self) -> Result<&[PageRecord], SpiderError> {
        if self.state != CrawlState::Idle {
            return Err(SpiderError::InvalidState(format!(
                "crawl already started (state {:?})",
                self.state
            )));
        }

        info!("Spider configuration:");
        info!("  seed: {}", self.seed);
        info!("  max_depth: {}", self.config.max_depth);
        info!("  fail_tolerance: {}", self.config.fail_tolerance);
        if self.config.max_workers == 0 {
            info!(
                "  workers: adaptive (up to {})",
                self.config.adaptive_max_workers
            );
        } else {
            info!("  workers: {}", self.config.max_workers);
        }
        info!("  exclusion_patterns: {:?}", self.config.exclusion_patterns);
        info!("  basic_auth: {}", self.config.basic_auth.is_some());

        let start = Instant::now();
        self.state = CrawlState::Running;

        let frontier = Arc::new(Frontier::new(
            self.config.max_depth,
            self.exclusions.clone(),
        ));
        frontier.seed(CrawlTask::new(
            self.seed.as_str(),
            0,
            self.config.fail_tolerance,
        ));

        let context = Arc::new(CrawlContext::new(
            frontier.clone(),
            self.source.clone(),
            Backoff::from_config(&self.config),
            self.config.fail_tolerance,
            self.seed.as_str(),
            self.config.follow_external,
        ));

        let sizing = sizing_for(
            self.config.max_workers,
            self.config.adaptive_max_workers,
            self.config.idle_worker_timeout(),
        );
        let mut pool = WorkerPool::new(context.clone(), sizing);
        pool.run_until_drained().await;

        self.state = CrawlState::Draining;
        debug!("Frontier drained, stopping workers");
        frontier.close();
        let workers_started = pool.shutdown().await;

        let mut results = context.take_records();
        results.sort_by(PageRecord::cmp_by_url);

        self.summary = summarize(&results, workers_started, start.elapsed());
        self.results = results;
        self.state = CrawlState::Done;

        info!("=== Final crawl statistics ===");
        info!("  Pages: {}", self.summary.pages);
        info!("  Broken: {}", self.summary.broken);
        info!("  Visited: {}", frontier.visited().len());
        info!("  Deepest level: {}", self.summary.max_depth_reached);
        info!("  Workers started: {}", self.summary.workers_started);
        info!("  Elapsed: {:?}", start.elapsed());

        Ok(&self.results)
    }

    /// Records sorted by URL; `None` until the crawl is done
    pub fn results(&self) -> Option<&[PageRecord]> {
        (self.state == CrawlState::Done).then_some(self.results.as_slice())
    }

    /// Consume the spider, keeping only the sorted records
    pub fn into_results(self) -> Vec<PageRecord> {
        self.results
    }

    pub fn summary(&self) -> &CrawlSummary {
        &self.summary
    }
}

fn summarize(records: &[PageRecord], workers_started: usize, elapsed: Duration) -> CrawlSummary {
    CrawlSummary {
        pages: records.len(),
        broken: records.iter().filter(|r| r.broken).count(),
        max_depth_reached: records.iter().map(|r| r.depth).max().unwrap_or(0),
        workers_started,
        elapsed_ms: elapsed.as_millis(),
    }
}
