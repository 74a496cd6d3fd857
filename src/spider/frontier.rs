use crate::spider::utils::ExclusionFilter;
use log::debug;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// A unit of pending work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    /// Canonical URL
    pub url: String,

    /// Link distance from the seed
    pub depth: usize,

    /// Retries left for transient failures
    pub retries_remaining: u32,
}

impl CrawlTask {
    pub fn new(url: impl Into<String>, depth: usize, retries_remaining: u32) -> Self {
        Self {
            url: url.into(),
            depth,
            retries_remaining,
        }
    }

    /// The same task with one retry spent, or `None` once the budget is gone
    pub fn retry(&self) -> Option<CrawlTask> {
        let retries_remaining = self.retries_remaining.checked_sub(1)?;
        Some(CrawlTask {
            url: self.url.clone(),
            depth: self.depth,
            retries_remaining,
        })
    }

    /// A task for a link discovered on this task's page
    pub fn child(&self, url: impl Into<String>, retries: u32) -> CrawlTask {
        CrawlTask::new(url, self.depth + 1, retries)
    }
}

/// Set of URLs already admitted to the crawl
#[derive(Debug, Default)]
pub struct VisitedRegistry {
    urls: Mutex<HashSet<String>>,
}

impl VisitedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `url`, returning true only for the first caller to admit it
    pub fn try_admit(&self, url: &str) -> bool {
        let mut urls = lock(&self.urls);
        if urls.contains(url) {
            return false;
        }
        urls.insert(url.to_string())
    }

    pub fn contains(&self, url: &str) -> bool {
        lock(&self.urls).contains(url)
    }

    pub fn len(&self) -> usize {
        lock(&self.urls).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of offering a task to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    TooDeep,
    Excluded,
    Duplicate,
    Closed,
}

#[derive(Debug, Default)]
struct FrontierState {
    queue: VecDeque<CrawlTask>,

    /// Admitted tasks not yet completed, queued or in flight
    outstanding: usize,
}

/// Depth-gated, deduplicating work queue shared by all workers
#[derive(Debug)]
pub struct Frontier {
    max_depth: usize,
    exclusions: ExclusionFilter,
    visited: VisitedRegistry,
    state: Mutex<FrontierState>,
    closed: AtomicBool,

    /// Signalled when a task is queued
    available: Notify,

    /// Signalled when the outstanding count drops to zero
    drained: Notify,
}

impl Frontier {
    pub fn new(max_depth: usize, exclusions: ExclusionFilter) -> Self {
        Self {
            max_depth,
            exclusions,
            visited: VisitedRegistry::new(),
            state: Mutex::new(FrontierState::default()),
            closed: AtomicBool::new(false),
            available: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Admit the seed task. The seed is never subject to exclusion patterns.
    pub fn seed(&self, task: CrawlTask) -> Admission {
        self.admit(task, false)
    }

    /// Offer a discovered task; rejected tasks are dropped
    pub fn push(&self, task: CrawlTask) -> Admission {
        self.admit(task, true)
    }

    fn admit(&self, task: CrawlTask, apply_exclusions: bool) -> Admission {
        if self.closed.load(Ordering::Acquire) {
            return Admission::Closed;
        }
        if task.depth > self.max_depth {
            return Admission::TooDeep;
        }
        if apply_exclusions && self.exclusions.is_excluded(&task.url) {
            debug!("Excluded by pattern: {}", task.url);
            return Admission::Excluded;
        }
        if !self.visited.try_admit(&task.url) {
            return Admission::Duplicate;
        }

        debug!("Queued {} (depth {})", task.url, task.depth);
        {
            let mut state = lock(&self.state);
            state.outstanding += 1;
            state.queue.push_back(task);
        }
        self.available.notify_one();
        Admission::Admitted
    }

    /// Wait for the next task; `None` once the crawl has drained
    pub async fn pop(&self) -> Option<CrawlTask> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = lock(&self.state);
                if let Some(task) = state.queue.pop_front() {
                    return Some(task);
                }
                if state.outstanding == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark a popped task as finished
    pub fn complete(&self) {
        let drained = {
            let mut state = lock(&self.state);
            state.outstanding = state.outstanding.saturating_sub(1);
            state.outstanding == 0
        };

        if drained {
            self.drained.notify_waiters();
            // Wake idle workers so they observe the drained state and exit
            self.available.notify_waiters();
        }
    }

    /// Resolve once no task is queued or in flight
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_drained() {
                return;
            }

            notified.await;
        }
    }

    pub fn is_drained(&self) -> bool {
        lock(&self.state).outstanding == 0
    }

    /// Refuse all further tasks
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Number of tasks waiting to be picked up
    pub fn backlog(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn outstanding(&self) -> usize {
        lock(&self.state).outstanding
    }

    pub fn visited(&self) -> &VisitedRegistry {
        &self.visited
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

/// Worker panics are caught per task, so a poisoned lock still holds
/// consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn frontier(max_depth: usize, patterns: &[&str]) -> Frontier {
        Frontier::new(max_depth, ExclusionFilter::new(patterns).unwrap())
    }

    #[test]
    fn test_task_retry_produces_new_task() {
        let task = CrawlTask::new("https://example.com/", 2, 1);
        let retried = task.retry().unwrap();

        assert_eq!(retried.retries_remaining, 0);
        assert_eq!(retried.depth, 2);
        assert_eq!(task.retries_remaining, 1);
        assert!(retried.retry().is_none());
    }

    #[test]
    fn test_registry_admits_once() {
        let registry = VisitedRegistry::new();
        assert!(registry.try_admit("https://example.com/a"));
        assert!(!registry.try_admit("https://example.com/a"));
        assert!(registry.contains("https://example.com/a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_single_winner_under_contention() {
        let registry = Arc::new(VisitedRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|i| registry.try_admit(&format!("https://example.com/{}", i)))
                        .count()
                })
            })
            .collect();

        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(wins, 100);
        assert_eq!(registry.len(), 100);
    }

    #[test]
    fn test_push_gates() {
        let frontier = frontier(1, &["/private.*"]);

        assert_eq!(
            frontier.push(CrawlTask::new("https://example.com/a", 1, 1)),
            Admission::Admitted
        );
        assert_eq!(
            frontier.push(CrawlTask::new("https://example.com/a", 1, 1)),
            Admission::Duplicate
        );
        assert_eq!(
            frontier.push(CrawlTask::new("https://example.com/b", 2, 1)),
            Admission::TooDeep
        );
        assert_eq!(
            frontier.push(CrawlTask::new("https://example.com/private/x", 1, 1)),
            Admission::Excluded
        );

        assert!(!frontier.visited().contains("https://example.com/private/x"));
        assert!(!frontier.visited().contains("https://example.com/b"));
        assert_eq!(frontier.outstanding(), 1);
        assert_eq!(frontier.backlog(), 1);
    }

    #[test]
    fn test_seed_is_exempt_from_exclusions() {
        let frontier = frontier(0, &["/private.*"]);
        assert_eq!(
            frontier.seed(CrawlTask::new("https://example.com/private/", 0, 1)),
            Admission::Admitted
        );
    }

    #[test]
    fn test_closed_frontier_rejects() {
        let frontier = frontier(1, &[]);
        frontier.close();
        assert_eq!(
            frontier.push(CrawlTask::new("https://example.com/", 0, 1)),
            Admission::Closed
        );
        assert!(frontier.visited().is_empty());
    }

    #[tokio::test]
    async fn test_pop_returns_none_when_drained() {
        let frontier = frontier(1, &[]);
        frontier.seed(CrawlTask::new("https://example.com/", 0, 1));

        let task = frontier.pop().await.unwrap();
        assert_eq!(task.url, "https://example.com/");
        assert!(!frontier.is_drained());

        frontier.complete();
        assert!(frontier.is_drained());
        assert_eq!(frontier.pop().await, None);
    }

    #[tokio::test]
    async fn test_pop_waits_for_in_flight_work() {
        let frontier = Arc::new(frontier(2, &[]));
        frontier.seed(CrawlTask::new("https://example.com/", 0, 1));
        let parent = frontier.pop().await.unwrap();

        let waiter = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        frontier.push(parent.child("https://example.com/next", 1));
        let next = waiter.await.unwrap().unwrap();
        assert_eq!(next.url, "https://example.com/next");
        assert_eq!(next.depth, 1);
    }

    #[tokio::test]
    async fn test_idle_pop_released_on_drain() {
        let frontier = Arc::new(frontier(1, &[]));
        frontier.seed(CrawlTask::new("https://example.com/", 0, 1));
        frontier.pop().await.unwrap();

        let waiter = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.pop().await })
        };
        let drained = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.wait_drained().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        frontier.complete();
        assert_eq!(waiter.await.unwrap(), None);
        drained.await.unwrap();
    }
}
