//! Task-level types shared between the pipeline stages and the request
//! interception handler.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::cache::SmartCache;
use crate::config::{ScanConfig, SiteConfig};
use crate::logging::ScanLogs;
use crate::nettools::WhoisServerPicker;
use crate::rules::MatchedDomains;

/// One unit of work: a URL plus the site configuration it came from.
#[derive(Debug, Clone)]
pub struct UrlTask {
    pub task_id: usize,
    pub url: String,
    pub site: Arc<SiteConfig>,
}

/// Why a task failed. Partial matches are preserved for every kind except
/// `Skipped`.
#[derive(Debug, Clone, Error)]
pub enum TaskFailure {
    #[error("skipped: both first-party and third-party disabled")]
    Skipped,
    #[error("redirect loop detected: {0} already visited")]
    RedirectLoop(String),
    #[error("redirect depth {0} exceeds maximum {1}")]
    RedirectDepthExceeded(u32, u32),
    #[error("page {0} loaded {1} times; reload loop")]
    SamePageRepeat(String, u32),
    #[error("final URL is invalid: {0}")]
    InvalidFinalUrl(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("challenge handler gave up after {0} attempts")]
    ChallengeMaxRetries(u32),
    #[error("challenge loop detected")]
    ChallengeLoop,
    #[error("challenge requires human interaction")]
    ChallengeRequiresHuman,
    #[error("critical browser error: {0}")]
    Critical(String),
}

impl TaskFailure {
    /// Whether this failure must trigger a browser restart before the next
    /// batch.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical(_))
    }
}

/// Redirect bookkeeping for one task.
///
/// Invariants: a loop is detected iff the destination is already in
/// `visited`; `depth` never exceeds the site's `max_redirects` on the
/// success path; the same URL is never loaded more than
/// [`RedirectState::MAX_SAME_PAGE_LOADS`] times.
#[derive(Debug)]
pub struct RedirectState {
    chain: Vec<String>,
    visited: HashSet<String>,
    depth: u32,
    load_counts: HashMap<String, u32>,
}

impl RedirectState {
    pub const MAX_SAME_PAGE_LOADS: u32 = 3;

    #[must_use]
    pub fn new(initial_url: &str) -> Self {
        let mut visited = HashSet::new();
        visited.insert(initial_url.to_string());
        Self {
            chain: vec![initial_url.to_string()],
            visited,
            depth: 0,
            load_counts: HashMap::new(),
        }
    }

    /// Register a redirect hop. Rejects loops and depth overruns; on
    /// rejection the task fails but keeps any matches gathered so far.
    pub fn register_redirect(
        &mut self,
        destination: &str,
        max_redirects: u32,
    ) -> Result<(), TaskFailure> {
        if self.visited.contains(destination) {
            return Err(TaskFailure::RedirectLoop(destination.to_string()));
        }
        if self.depth + 1 > max_redirects {
            return Err(TaskFailure::RedirectDepthExceeded(
                self.depth + 1,
                max_redirects,
            ));
        }
        self.depth += 1;
        self.visited.insert(destination.to_string());
        self.chain.push(destination.to_string());
        Ok(())
    }

    /// Count a page load of `url`. Errors once the same URL has loaded
    /// [`Self::MAX_SAME_PAGE_LOADS`] times. This only guards against
    /// reload loops on the page the chain sits on; a redirect that
    /// re-enters `visited` is caught by the visited check on the
    /// document-request path, not by this counter.
    pub fn note_page_load(&mut self, url: &str) -> Result<u32, TaskFailure> {
        let count = self.load_counts.entry(url.to_string()).or_insert(0);
        *count += 1;
        if *count > Self::MAX_SAME_PAGE_LOADS {
            return Err(TaskFailure::SamePageRepeat(url.to_string(), *count));
        }
        Ok(*count)
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// The URL the chain currently sits on (its last hop).
    #[must_use]
    pub fn current_url(&self) -> Option<&str> {
        self.chain.last().map(String::as_str)
    }

    #[must_use]
    pub fn was_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }
}

/// Run-wide knobs that reach into the pipeline (CLI-derived).
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Emit full subdomains instead of registrable roots.
    pub sub_domains: bool,
    /// Log every observed request URL, matched or not.
    pub dump_urls: bool,
    /// Suppress page interactions regardless of site config.
    pub no_interact: bool,
}

/// Everything a task shares with its interception handler and deferred
/// verification jobs. Cheap to clone via `Arc`.
pub struct TaskEnv {
    pub global: Arc<ScanConfig>,
    pub site: Arc<SiteConfig>,
    pub cache: Arc<SmartCache>,
    pub logs: Arc<ScanLogs>,
    pub whois_picker: Arc<WhoisServerPicker>,
    pub options: PipelineOptions,
    pub task_url: String,
    pub task_id: usize,
}

/// Mutable per-task state. The request handler is the single writer for
/// `matched` within the browser's serialized dispatch; deferred jobs go
/// through the same locked methods.
pub struct TaskState {
    pub matched: Mutex<MatchedDomains>,
    /// Registrable domains considered first-party: the original target
    /// plus every redirect hop. Extended monotonically.
    pub first_party: Mutex<HashSet<String>>,
    /// Registrable domains of intermediate redirect hosts, excluded from
    /// matching.
    pub redirect_excluded: Mutex<HashSet<String>>,
    pub redirect: Mutex<RedirectState>,
    /// First fatal failure wins; later ones are dropped.
    pub failure: Mutex<Option<TaskFailure>>,
    pub needs_restart: AtomicBool,
    /// In-flight deferred verification jobs, awaited at settle.
    pub deferred: Mutex<Vec<JoinHandle<()>>>,
    /// Main frame id, learned from the first document request.
    pub main_frame: Mutex<Option<String>>,
}

impl TaskState {
    #[must_use]
    pub fn new(task_url: &str) -> Self {
        let mut first_party = HashSet::new();
        let root = crate::domain::registrable_domain(task_url);
        if !root.is_empty() {
            first_party.insert(root);
        }
        Self {
            matched: Mutex::new(MatchedDomains::new()),
            first_party: Mutex::new(first_party),
            redirect_excluded: Mutex::new(HashSet::new()),
            redirect: Mutex::new(RedirectState::new(task_url)),
            failure: Mutex::new(None),
            needs_restart: AtomicBool::new(false),
            deferred: Mutex::new(Vec::new()),
            main_frame: Mutex::new(None),
        }
    }

    /// Record a fatal failure unless one is already set.
    pub fn fail(&self, failure: TaskFailure) {
        if failure.is_critical() {
            self.needs_restart.store(true, Ordering::SeqCst);
        }
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some(failure);
        }
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    #[must_use]
    pub fn take_failure(&self) -> Option<TaskFailure> {
        self.failure.lock().take()
    }

    /// Drain deferred jobs for awaiting at settle.
    #[must_use]
    pub fn take_deferred(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.deferred.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_loop_detected_on_revisit() {
        let mut state = RedirectState::new("https://a.test/");
        state.register_redirect("https://b.test/", 10).expect("first hop");
        let err = state
            .register_redirect("https://a.test/", 10)
            .expect_err("revisit must fail");
        assert!(matches!(err, TaskFailure::RedirectLoop(_)));
    }

    #[test]
    fn redirect_depth_bounded() {
        let mut state = RedirectState::new("https://a.test/");
        state.register_redirect("https://b.test/", 2).expect("hop 1");
        state.register_redirect("https://c.test/", 2).expect("hop 2");
        let err = state
            .register_redirect("https://d.test/", 2)
            .expect_err("hop 3 exceeds depth");
        assert!(matches!(err, TaskFailure::RedirectDepthExceeded(3, 2)));
        assert_eq!(state.depth(), 2);
    }

    #[test]
    fn same_page_load_counter() {
        let mut state = RedirectState::new("https://a.test/");
        for _ in 0..RedirectState::MAX_SAME_PAGE_LOADS {
            state.note_page_load("https://a.test/").expect("allowed load");
        }
        let err = state
            .note_page_load("https://a.test/")
            .expect_err("fourth load is a reload loop");
        assert!(matches!(err, TaskFailure::SamePageRepeat(_, 4)));
    }

    #[test]
    fn task_state_seeds_first_party_with_target_root() {
        let state = TaskState::new("https://sub.host.test/page");
        assert!(state.first_party.lock().contains("host.test"));
    }

    #[test]
    fn first_failure_wins_and_critical_flags_restart() {
        let state = TaskState::new("https://a.test/");
        state.fail(TaskFailure::Critical("Target closed".into()));
        state.fail(TaskFailure::Navigation("later".into()));
        assert!(state.needs_restart.load(Ordering::SeqCst));
        assert!(matches!(
            state.take_failure(),
            Some(TaskFailure::Critical(_))
        ));
    }
}
