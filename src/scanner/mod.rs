//! Scan orchestration: task flattening, batched execution under a
//! concurrency limit, browser restart policy, post-processing, and output.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::Semaphore;

use crate::browser::{sweep_chromium_temp_dirs, BrowserSession};
use crate::cache::{CacheStats, SmartCache};
use crate::config::ScanConfig;
use crate::domain::ignore_match;
use crate::logging::ScanLogs;
use crate::nettools::WhoisServerPicker;
use crate::pipeline::{process_url_task, PipelineOptions, TaskEnv, UrlTask};
use crate::rules::{write_rules, OutputOptions, RuleSink, RuleStore, UrlResult};

/// Minimum sample before the failure-rate restart trigger applies.
const FAILURE_RATE_MIN_SAMPLE: usize = 6;
/// Restart when more than this share of the recent sample failed.
const FAILURE_RATE_THRESHOLD: f64 = 0.75;
/// Health probe only fires the restart trigger after this many URLs.
const HEALTH_PROBE_MIN_URLS: usize = 15;
/// Hang-detector tick interval.
const HANG_TICK: Duration = Duration::from_secs(30);
/// Drain budget for in-flight tasks after SIGINT/SIGTERM.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Run-level options assembled from the CLI.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub pipeline: PipelineOptions,
    pub output: OutputOptions,
    pub headful: bool,
    pub dry_run: bool,
    pub debug: bool,
}

/// End-of-run accounting.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub total_urls: usize,
    pub successful_loads: usize,
    pub failed: usize,
    /// Failed tasks that still produced rules.
    pub partial: usize,
    pub skipped: usize,
    pub rules_emitted: usize,
    pub browser_restarts: usize,
    pub cache: CacheStats,
}

impl std::fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "scanned {} URLs: {} loaded, {} failed ({} with partial matches), {} skipped",
            self.total_urls, self.successful_loads, self.failed, self.partial, self.skipped
        )?;
        writeln!(
            f,
            "emitted {} rules, restarted browser {} times",
            self.rules_emitted, self.browser_restarts
        )?;
        write!(
            f,
            "cache: seen {}/{} hits, similarity {}/{} hits, bodies {}/{} hits",
            self.cache.seen_hits,
            self.cache.seen_hits + self.cache.seen_misses,
            self.cache.similarity_hits,
            self.cache.similarity_hits + self.cache.similarity_misses,
            self.cache.response_hits,
            self.cache.response_hits + self.cache.response_misses,
        )
    }
}

/// Observed-only progress shared with the hang detector.
#[derive(Debug, Default)]
struct ScanProgress {
    batch: AtomicUsize,
    position: AtomicUsize,
    completed: AtomicUsize,
    restarts: AtomicUsize,
}

/// Owns the run: the config, the shared cache, the log set, and the
/// browser lifecycle.
pub struct ScanOrchestrator {
    config: Arc<ScanConfig>,
    cache: Arc<SmartCache>,
    logs: Arc<ScanLogs>,
    options: ScanOptions,
    whois_picker: Arc<WhoisServerPicker>,
    sink: RuleSink,
}

impl ScanOrchestrator {
    #[must_use]
    pub fn new(
        config: ScanConfig,
        cache: Arc<SmartCache>,
        logs: Arc<ScanLogs>,
        options: ScanOptions,
        sink: RuleSink,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cache,
            logs,
            options,
            whois_picker: Arc::new(WhoisServerPicker::new()),
            sink,
        }
    }

    /// Flatten the site tree into URL tasks, preserving insertion order.
    #[must_use]
    pub fn flatten_tasks(config: &ScanConfig) -> Vec<UrlTask> {
        let mut tasks = Vec::new();
        for site in &config.sites {
            let site = Arc::new(site.clone());
            for url in site.urls() {
                tasks.push(UrlTask {
                    task_id: tasks.len(),
                    url,
                    site: Arc::clone(&site),
                });
            }
        }
        tasks
    }

    /// Execute the full scan and emit output.
    pub async fn run(&self) -> Result<ScanSummary> {
        let tasks = Self::flatten_tasks(&self.config);
        let total_urls = tasks.len();
        info!("scan starting: {total_urls} URLs across {} sites", self.config.sites.len());

        let shutdown = Arc::new(AtomicBool::new(false));
        spawn_signal_listener(Arc::clone(&shutdown));

        let progress = Arc::new(ScanProgress::default());
        let hang_detector = if self.options.debug {
            Some(spawn_hang_detector(Arc::clone(&progress), total_urls))
        } else {
            None
        };

        let headful = self.options.headful
            || self.config.sites.iter().any(|s| s.headful.unwrap_or(false));
        let mut session = Arc::new(
            BrowserSession::launch(!headful)
                .await
                .context("initial browser launch failed")?,
        );

        let mut store = RuleStore::new();
        let mut recent_outcomes: Vec<bool> = Vec::new();
        let mut urls_since_restart = 0usize;
        let mut restarts = 0usize;

        let cleanup_interval = self.config.resource_cleanup_interval();
        let batches: Vec<&[UrlTask]> = tasks.chunks(cleanup_interval).collect();
        let batch_count = batches.len();

        for (batch_idx, batch) in batches.iter().enumerate() {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, not dispatching batch {}", batch_idx + 1);
                break;
            }
            progress.batch.store(batch_idx + 1, Ordering::Relaxed);

            let (results, emergency_hits) = self
                .run_batch(&session, batch, &shutdown, &progress)
                .await;

            urls_since_restart += results.len();
            for result in &results {
                recent_outcomes.push(result.success);
            }
            for result in results {
                store.push(result);
            }

            let is_last = batch_idx + 1 == batch_count;
            if is_last || shutdown.load(Ordering::SeqCst) {
                continue;
            }

            let next_batch_len = batches[batch_idx + 1].len();
            let should_restart = self
                .restart_decision(
                    &session,
                    urls_since_restart,
                    next_batch_len,
                    cleanup_interval,
                    &recent_outcomes,
                    emergency_hits,
                    batch.len(),
                )
                .await;

            if should_restart {
                info!("restarting browser between batches ({urls_since_restart} URLs since last)");
                session = self.restart_browser(session, headful).await?;
                restarts += 1;
                progress.restarts.store(restarts, Ordering::Relaxed);
                urls_since_restart = 0;
                recent_outcomes.clear();
            }
        }

        // teardown before output so a write failure cannot leak the browser
        if let Ok(session) = Arc::try_unwrap(session).map_err(|_| ()) {
            session.shutdown().await;
        }
        let swept = sweep_chromium_temp_dirs();
        if swept > 0 {
            debug!("swept {swept} leftover chromium temp dirs");
        }
        if let Some(handle) = hang_detector {
            handle.abort();
        }

        if !self.options.dry_run {
            self.post_process(&mut store);
        }

        let rules_emitted = if self.options.dry_run {
            store.total_rules()
        } else {
            write_rules(&store, &self.options.output, &self.sink)
                .context("failed to write rule output")?
        };

        let mut summary = self.summarize(&store, total_urls, restarts);
        summary.rules_emitted = rules_emitted;
        Ok(summary)
    }

    /// Run one batch under the concurrency limit. Returns results in task
    /// order plus the number of immediate-restart hits.
    async fn run_batch(
        &self,
        session: &Arc<BrowserSession>,
        batch: &[UrlTask],
        shutdown: &Arc<AtomicBool>,
        progress: &Arc<ScanProgress>,
    ) -> (Vec<UrlResult>, usize) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sites()));
        let mut futures = FuturesUnordered::new();

        for task in batch {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let semaphore = Arc::clone(&semaphore);
            let env = Arc::new(TaskEnv {
                global: Arc::clone(&self.config),
                site: Arc::clone(&task.site),
                cache: Arc::clone(&self.cache),
                logs: Arc::clone(&self.logs),
                whois_picker: Arc::clone(&self.whois_picker),
                options: self.options.pipeline.clone(),
                task_url: task.url.clone(),
                task_id: task.task_id,
            });
            let session = Arc::clone(session);
            let task = task.clone();
            let progress = Arc::clone(progress);

            futures.push(async move {
                let permit = semaphore.acquire_owned().await;
                let result = match permit {
                    Ok(_permit) => {
                        progress.position.store(task.task_id, Ordering::Relaxed);
                        process_url_task(&session, &task, env).await
                    }
                    Err(_) => UrlResult::skipped(&task.url),
                };
                progress.completed.fetch_add(1, Ordering::Relaxed);
                (task.task_id, result)
            });
        }

        let mut collected: Vec<(usize, UrlResult)> = Vec::new();
        while let Some(item) = futures.next().await {
            collected.push(item);
            if shutdown.load(Ordering::SeqCst) {
                // give in-flight tasks a short drain, then abandon the rest
                let drained = tokio::time::timeout(SHUTDOWN_DRAIN, async {
                    while let Some(item) = futures.next().await {
                        collected.push(item);
                    }
                })
                .await;
                if drained.is_err() {
                    warn!("in-flight tasks abandoned after {SHUTDOWN_DRAIN:?} drain");
                }
                break;
            }
        }

        collected.sort_by_key(|(id, _)| *id);
        let emergency_hits = collected
            .iter()
            .filter(|(_, r)| r.needs_immediate_restart)
            .count();
        (collected.into_iter().map(|(_, r)| r).collect(), emergency_hits)
    }

    /// The between-batch restart decision.
    #[allow(clippy::too_many_arguments)]
    async fn restart_decision(
        &self,
        session: &Arc<BrowserSession>,
        urls_since_restart: usize,
        next_batch_len: usize,
        cleanup_interval: usize,
        recent: &[bool],
        emergency_hits: usize,
        batch_len: usize,
    ) -> bool {
        // emergency: enough broken tasks in the batch just finished
        let emergency_threshold =
            std::cmp::max(3, batch_len / 2).min(std::cmp::max(2, batch_len));
        if emergency_hits >= emergency_threshold {
            warn!("{emergency_hits} immediate-restart results in batch, restarting browser");
            return true;
        }

        // volume: next batch would overrun the cleanup interval
        if urls_since_restart + next_batch_len >= cleanup_interval {
            debug!("cleanup interval reached ({urls_since_restart} + {next_batch_len})");
            return true;
        }

        // failure rate over the recent window
        let window = &recent[recent.len().saturating_sub(8)..];
        if window.len() >= FAILURE_RATE_MIN_SAMPLE {
            let failures = window.iter().filter(|ok| !**ok).count();
            let rate = failures as f64 / window.len() as f64;
            if rate > FAILURE_RATE_THRESHOLD {
                warn!(
                    "failure rate {:.0}% over last {} tasks, restarting browser",
                    rate * 100.0,
                    window.len()
                );
                return true;
            }
        }

        // health probe, only meaningful once the browser has real mileage
        if urls_since_restart > HEALTH_PROBE_MIN_URLS
            && !session.is_responsive(Duration::from_secs(5)).await
        {
            warn!("browser failed health probe, restarting");
            return true;
        }

        false
    }

    async fn restart_browser(
        &self,
        session: Arc<BrowserSession>,
        headful: bool,
    ) -> Result<Arc<BrowserSession>> {
        match Arc::try_unwrap(session) {
            Ok(owned) => owned.shutdown().await,
            Err(stuck) => {
                // a straggler still holds a clone; the old browser dies
                // when the last reference drops
                warn!(
                    "browser still referenced by {} tasks at restart",
                    Arc::strong_count(&stuck)
                );
            }
        }
        // stale bodies must not satisfy searches in the new session
        self.cache.clear_response_bodies();

        let fresh = BrowserSession::launch(!headful)
            .await
            .context("browser relaunch failed")?;
        Ok(Arc::new(fresh))
    }

    /// Safety net: re-filter emitted rules against `ignoreDomains`, and
    /// for sites that disable first-party drop rules matching the task's
    /// own first-party set.
    fn post_process(&self, store: &mut RuleStore) {
        let ignore = self.config.ignore_domains.clone();
        let tasks = Self::flatten_tasks(&self.config);

        for result in store.results_mut() {
            let task = tasks.iter().find(|t| t.url == result.url);

            let mut first_party: HashSet<String> = HashSet::new();
            let origin_root = crate::domain::registrable_domain(&result.url);
            if !origin_root.is_empty() {
                first_party.insert(origin_root);
            }
            for hop in &result.redirect_domains {
                first_party.insert(hop.clone());
            }

            let drop_first_party = task.is_some_and(|t| !t.site.first_party);
            result.rules.retain(|rule| {
                if ignore.iter().any(|p| ignore_match(p, &rule.domain)) {
                    debug!("post-filter dropped ignored domain {}", rule.domain);
                    return false;
                }
                if drop_first_party {
                    let root = crate::domain::host_registrable(&rule.domain);
                    let key = if root.is_empty() { rule.domain.clone() } else { root };
                    if first_party.contains(&key) {
                        debug!("post-filter dropped first-party {}", rule.domain);
                        return false;
                    }
                }
                true
            });
            result.has_matches = !result.rules.is_empty();
        }
    }

    fn summarize(&self, store: &RuleStore, total_urls: usize, restarts: usize) -> ScanSummary {
        let mut summary = ScanSummary {
            total_urls,
            browser_restarts: restarts,
            cache: self.cache.stats(),
            ..ScanSummary::default()
        };
        for result in store.results() {
            if result.success {
                summary.successful_loads += 1;
            } else if result.error.as_deref().is_some_and(|e| e.starts_with("skipped")) {
                summary.skipped += 1;
            } else {
                summary.failed += 1;
                if result.has_matches {
                    summary.partial += 1;
                }
            }
        }
        summary
    }
}

fn spawn_signal_listener(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    warn!("cannot install SIGTERM handler: {e}");
                    if ctrl_c.await.is_ok() {
                        shutdown.store(true, Ordering::SeqCst);
                    }
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("termination signal received, finishing in-flight work");
        shutdown.store(true, Ordering::SeqCst);
    });
}

/// Observe-only ticker: prints batch/position/counters while debugging.
/// It never cancels work.
fn spawn_hang_detector(
    progress: Arc<ScanProgress>,
    total_urls: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HANG_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            debug!(
                "progress: batch {} position {} completed {}/{} restarts {}",
                progress.batch.load(Ordering::Relaxed),
                progress.position.load(Ordering::Relaxed),
                progress.completed.load(Ordering::Relaxed),
                total_urls,
                progress.restarts.load(Ordering::Relaxed),
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::FormattedRule;

    fn config(json: &str) -> ScanConfig {
        serde_json::from_str(json).expect("config parses")
    }

    #[test]
    fn flatten_preserves_insertion_order() {
        let cfg = config(
            r#"{ "sites": [
                { "url": ["https://a.test/", "https://b.test/"] },
                { "url": "https://c.test/" }
            ] }"#,
        );
        let tasks = ScanOrchestrator::flatten_tasks(&cfg);
        let urls: Vec<&str> = tasks.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test/", "https://b.test/", "https://c.test/"]);
        assert_eq!(tasks[2].task_id, 2);
    }

    fn orchestrator(cfg: ScanConfig) -> ScanOrchestrator {
        ScanOrchestrator::new(
            cfg,
            Arc::new(SmartCache::new(false)),
            Arc::new(ScanLogs::disabled()),
            ScanOptions::default(),
            RuleSink::Stdout,
        )
    }

    fn result_with_rules(url: &str, domains: &[&str]) -> UrlResult {
        UrlResult {
            url: url.to_string(),
            final_url: url.to_string(),
            success: true,
            needs_immediate_restart: false,
            has_matches: !domains.is_empty(),
            rules: domains.iter().map(|d| FormattedRule::plain(*d)).collect(),
            redirect_domains: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn post_process_refilters_ignored_domains() {
        let cfg = config(
            r#"{ "ignoreDomains": ["cdn.test"],
                 "sites": [ { "url": "https://host.test/", "filterRegex": "x" } ] }"#,
        );
        let orch = orchestrator(cfg);
        let mut store = RuleStore::new();
        store.push(result_with_rules(
            "https://host.test/",
            &["ads.other", "img.cdn.test"],
        ));
        orch.post_process(&mut store);
        let rules: Vec<&str> = store.results()[0]
            .rules
            .iter()
            .map(|r| r.domain.as_str())
            .collect();
        assert_eq!(rules, vec!["ads.other"]);
    }

    #[test]
    fn post_process_drops_first_party_for_opted_out_sites() {
        let cfg = config(
            r#"{ "sites": [ { "url": "https://host.test/", "filterRegex": "x",
                              "firstParty": false } ] }"#,
        );
        let orch = orchestrator(cfg);
        let mut store = RuleStore::new();
        let mut result = result_with_rules("https://host.test/", &["host.test", "ads.other"]);
        result.redirect_domains = vec!["hop.test".to_string()];
        result.rules.push(FormattedRule::plain("hop.test"));
        store.push(result);

        orch.post_process(&mut store);
        let rules: Vec<&str> = store.results()[0]
            .rules
            .iter()
            .map(|r| r.domain.as_str())
            .collect();
        assert_eq!(rules, vec!["ads.other"]);
    }

    #[test]
    fn summary_buckets_results() {
        let cfg = config(r#"{ "sites": [ { "url": "https://host.test/" } ] }"#);
        let orch = orchestrator(cfg);
        let mut store = RuleStore::new();
        store.push(result_with_rules("https://a.test/", &["x.test"]));
        store.push(UrlResult {
            success: false,
            has_matches: true,
            error: Some("navigation failed: boom".to_string()),
            ..result_with_rules("https://b.test/", &["y.test"])
        });
        store.push(UrlResult::skipped("https://c.test/"));

        let summary = orch.summarize(&store, 3, 1);
        assert_eq!(summary.successful_loads, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.browser_restarts, 1);
    }
}
