use crate::spider::crawler::PageRecord;
use crate::spider::extract::extract_links;
use crate::spider::frontier::{Admission, CrawlTask, Frontier};
use crate::spider::network::{fetch_with_retry, Backoff, FetchAttempt, PageSource};
use crate::spider::utils::site_key;
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;

/// How often the pool re-evaluates its size
const SUPERVISOR_TICK: Duration = Duration::from_millis(50);

/// Decides how many workers should be running
pub trait PoolSizing: Send + Sync {
    /// Desired worker count given the live workers and queued tasks
    fn target_workers(&self, active: usize, backlog: usize) -> usize;

    /// How long a worker waits for a task before retiring, if ever
    fn idle_timeout(&self) -> Option<Duration>;
}

/// Exactly `workers` workers for the whole crawl
#[derive(Debug, Clone, Copy)]
pub struct FixedPool {
    pub workers: usize,
}

impl PoolSizing for FixedPool {
    fn target_workers(&self, _active: usize, _backlog: usize) -> usize {
        self.workers
    }

    fn idle_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Grows with the backlog up to `ceiling`, idle workers retire
#[derive(Debug, Clone, Copy)]
pub struct AdaptivePool {
    pub ceiling: usize,
    pub idle_timeout: Duration,
}

impl PoolSizing for AdaptivePool {
    fn target_workers(&self, active: usize, backlog: usize) -> usize {
        if backlog == 0 {
            return active;
        }
        (active + backlog).min(self.ceiling).max(active)
    }

    fn idle_timeout(&self) -> Option<Duration> {
        Some(self.idle_timeout)
    }
}

/// Pick fixed sizing for an explicit worker count, adaptive for 0
pub fn sizing_for(max_workers: usize, ceiling: usize, idle_timeout: Duration) -> Box<dyn PoolSizing> {
    if max_workers == 0 {
        Box::new(AdaptivePool {
            ceiling,
            idle_timeout,
        })
    } else {
        Box::new(FixedPool {
            workers: max_workers,
        })
    }
}

/// State shared by all workers of one crawl
pub struct CrawlContext<S> {
    pub frontier: Arc<Frontier>,
    pub source: Arc<S>,
    pub backoff: Backoff,
    pub fail_tolerance: u32,
    pub follow_external: bool,

    /// Sites whose pages are expanded: the seed's, plus wherever the seed
    /// redirected to
    sites: Mutex<HashSet<String>>,
    records: Mutex<Vec<PageRecord>>,
}

impl<S: PageSource> CrawlContext<S> {
    pub fn new(
        frontier: Arc<Frontier>,
        source: Arc<S>,
        backoff: Backoff,
        fail_tolerance: u32,
        seed_url: &str,
        follow_external: bool,
    ) -> Self {
        Self {
            frontier,
            source,
            backoff,
            fail_tolerance,
            follow_external,
            sites: Mutex::new(site_key(seed_url).into_iter().collect()),
            records: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, record: PageRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Take every record published so far
    pub fn take_records(&self) -> Vec<PageRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// A seed that redirects elsewhere makes the target part of the site
    fn adopt_site(&self, final_url: &str) {
        if let Some(site) = site_key(final_url) {
            let mut sites = self.sites.lock().unwrap_or_else(PoisonError::into_inner);
            if sites.insert(site.clone()) {
                info!("Seed redirected, also crawling {}", site);
            }
        }
    }

    /// Links of off-site pages are checked but not followed
    fn should_expand(&self, page_url: &str) -> bool {
        if self.follow_external {
            return true;
        }
        match site_key(page_url) {
            Some(site) => self
                .sites
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&site),
            None => false,
        }
    }
}

/// Set of workers draining a frontier
pub struct WorkerPool<S: PageSource> {
    context: Arc<CrawlContext<S>>,
    sizing: Box<dyn PoolSizing>,
    workers: JoinSet<()>,
    active: Arc<AtomicUsize>,
    spawned: usize,
}

/// Keeps the live worker count honest however a worker exits
struct ActiveWorker(Arc<AtomicUsize>);

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<S: PageSource> WorkerPool<S> {
    pub fn new(context: Arc<CrawlContext<S>>, sizing: Box<dyn PoolSizing>) -> Self {
        Self {
            context,
            sizing,
            workers: JoinSet::new(),
            active: Arc::new(AtomicUsize::new(0)),
            spawned: 0,
        }
    }

    /// Run workers until nothing is queued or in flight
    pub async fn run_until_drained(&mut self) {
        loop {
            self.scale();

            tokio::select! {
                _ = self.context.frontier.wait_drained() => break,
                _ = tokio::time::sleep(SUPERVISOR_TICK) => {}
            }
        }
    }

    fn scale(&mut self) {
        let active = self.active.load(Ordering::SeqCst);
        let target = self
            .sizing
            .target_workers(active, self.context.frontier.backlog());

        if target > active {
            debug!("Scaling worker pool from {} to {}", active, target);
        }
        for _ in active..target {
            self.spawn_worker();
        }
    }

    fn spawn_worker(&mut self) {
        self.spawned += 1;
        let id = self.spawned;
        self.active.fetch_add(1, Ordering::SeqCst);

        let guard = ActiveWorker(self.active.clone());
        let context = self.context.clone();
        let idle_timeout = self.sizing.idle_timeout();

        self.workers.spawn(async move {
            let _guard = guard;
            run_worker(id, context, idle_timeout).await;
        });
    }

    /// Wait for every worker to exit; returns how many were ever started
    pub async fn shutdown(mut self) -> usize {
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker terminated abnormally: {}", e);
            }
        }
        info!("Worker pool stopped after starting {} workers", self.spawned);
        self.spawned
    }
}

async fn run_worker<S: PageSource>(
    id: usize,
    context: Arc<CrawlContext<S>>,
    idle_timeout: Option<Duration>,
) {
    debug!("Worker {} started", id);

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, context.frontier.pop()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!("Worker {} idle, retiring", id);
                    return;
                }
            },
            None => context.frontier.pop().await,
        };

        let Some(task) = next else {
            break;
        };

        let url = task.url.clone();
        let depth = task.depth;

        let record = match AssertUnwindSafe(process_task(&context, task))
            .catch_unwind()
            .await
        {
            Ok(record) => record,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!("Worker {} failed while processing {}: {}", id, url, reason);
                PageRecord::internal_failure(url, depth, reason)
            }
        };

        if record.broken {
            warn!(
                "Broken: {} ({})",
                record.url,
                record.error_detail.as_deref().unwrap_or("no detail")
            );
        } else {
            debug!("Reachable: {} [{:?}]", record.url, record.status_code);
        }

        context.record(record);
        context.frontier.complete();
    }

    debug!("Worker {} finished", id);
}

/// Fetch one task, queue the links it reveals and describe the page
async fn process_task<S: PageSource>(context: &CrawlContext<S>, task: CrawlTask) -> PageRecord {
    let FetchAttempt {
        task,
        attempts,
        outcome,
    } = fetch_with_retry(context.source.as_ref(), task, &context.backoff).await;

    let page = match outcome {
        Ok(page) => page,
        Err(error) => return PageRecord::broken(task, error, attempts),
    };

    if task.depth == 0 {
        context.adopt_site(&page.final_url);
    }

    let links = page
        .body
        .as_deref()
        .map(|body| extract_links(body, &page.final_url))
        .unwrap_or_default();

    if task.depth < context.frontier.max_depth() && context.should_expand(&page.final_url) {
        let mut admitted = 0;
        for link in &links {
            if context.frontier.push(task.child(link.as_str(), context.fail_tolerance))
                == Admission::Admitted
            {
                admitted += 1;
            }
        }
        debug!(
            "{}: {} links, {} newly queued",
            task.url,
            links.len(),
            admitted
        );
    }

    PageRecord::reachable(task, page, links, attempts)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("internal error: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("internal error: {}", message)
    } else {
        "internal error".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_pool_ignores_backlog() {
        let sizing = FixedPool { workers: 4 };
        assert_eq!(sizing.target_workers(0, 0), 4);
        assert_eq!(sizing.target_workers(4, 100), 4);
        assert_eq!(sizing.idle_timeout(), None);
    }

    #[test]
    fn test_adaptive_pool_follows_backlog() {
        let sizing = AdaptivePool {
            ceiling: 8,
            idle_timeout: Duration::from_millis(10),
        };
        assert_eq!(sizing.target_workers(0, 1), 1);
        assert_eq!(sizing.target_workers(2, 3), 5);
        assert_eq!(sizing.target_workers(2, 100), 8);
        assert_eq!(sizing.target_workers(3, 0), 3);
        assert!(sizing.idle_timeout().is_some());
    }

    #[test]
    fn test_adaptive_pool_never_shrinks_live_workers() {
        let sizing = AdaptivePool {
            ceiling: 2,
            idle_timeout: Duration::from_millis(10),
        };
        assert_eq!(sizing.target_workers(2, 5), 2);
    }

    #[test]
    fn test_sizing_for_selects_strategy() {
        let idle = Duration::from_millis(100);
        assert_eq!(sizing_for(3, 16, idle).idle_timeout(), None);
        assert_eq!(sizing_for(0, 16, idle).idle_timeout(), Some(idle));
        assert_eq!(sizing_for(0, 16, idle).target_workers(0, 40), 16);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "internal error: boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bad page"));
        assert_eq!(panic_message(payload.as_ref()), "internal error: bad page");

        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "internal error");
    }
}
