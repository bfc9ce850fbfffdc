//! Request interception: the dispatch core.
//!
//! Every outgoing request flows through [`classify_request`], a pure
//! function so the precedence rules (blocked before filter, resource-type
//! gate before any side effect, party filter before record) are testable
//! without a browser, and then through [`try_record`], which consults the
//! smart cache and similarity filters before insertion.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, GetResponseBodyParams};
use chromiumoxide::Page;
use futures::StreamExt;
use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::cache::SmartCache;
use crate::config::{ScanConfig, SiteConfig};
use crate::domain::{full_host, ignore_match, registrable_domain};
use crate::nettools::{
    curl_fetch, dig_lookup, grep_matches, whois_lookup, CurlOptions, DigOptions, WhoisOptions,
    WhoisServerMode,
};
use crate::pipeline::types::{TaskEnv, TaskFailure, TaskState};

/// Why a request was passed through without a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Hostname did not yield a registrable domain.
    Unattributable,
    /// Matched an `ignoreDomains` entry.
    Ignored,
    /// Registrable domain is an intermediate redirect host.
    RedirectIntermediate,
    /// No filter pattern matched (or none configured).
    NoPatternMatch,
    /// Resource type not in the site's allow-list.
    ResourceType,
    /// Rejected by the first/third-party setting.
    Party,
}

/// How a matched request gets recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredChecks {
    pub content: bool,
    pub whois: bool,
    pub dig: bool,
}

impl DeferredChecks {
    #[must_use]
    pub fn none(&self) -> bool {
        !self.content && !self.whois && !self.dig
    }
}

/// Decision for one intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    /// Abort at the network layer.
    Abort,
    /// Abort, but still record the domain (`even_blocked`).
    AbortAndRecord,
    /// Let the request through without recording.
    Continue(SkipReason),
    /// Let it through and record, immediately or after verification.
    Record(DeferredChecks),
}

/// The dispatch core, steps in strict order: blocked patterns, ignore
/// list, redirect intermediates, filter regex, resource-type gate, party
/// filter, record-path selection.
pub fn classify_request(
    url: &str,
    resource_type: &str,
    site: &SiteConfig,
    global: &ScanConfig,
    cache: &SmartCache,
    first_party: &HashSet<String>,
    redirect_excluded: &HashSet<String>,
) -> RequestDecision {
    let root = registrable_domain(url);

    let type_allowed = site
        .resource_allow_list()
        .is_none_or(|allowed| allowed.iter().any(|t| t == resource_type));

    // Blocked patterns take precedence over everything.
    let blocked = site
        .blocked
        .iter()
        .chain(global.blocked.iter())
        .any(|pattern| pattern_matches(cache, pattern, url));
    if blocked {
        if site.even_blocked && type_allowed && filter_matches(site, cache, url) {
            return RequestDecision::AbortAndRecord;
        }
        return RequestDecision::Abort;
    }

    if root.is_empty() {
        return RequestDecision::Continue(SkipReason::Unattributable);
    }

    if global.ignore_domains.iter().any(|p| ignore_match(p, &root)) {
        return RequestDecision::Continue(SkipReason::Ignored);
    }

    if redirect_excluded.contains(&root) {
        return RequestDecision::Continue(SkipReason::RedirectIntermediate);
    }

    if !filter_matches(site, cache, url) {
        return RequestDecision::Continue(SkipReason::NoPatternMatch);
    }

    // Resource-type gate before any further processing: a dropped type
    // causes no WHOIS, no body fetch, no cache write.
    if !type_allowed {
        return RequestDecision::Continue(SkipReason::ResourceType);
    }

    let first = crate::domain::is_first_party(url, first_party);
    if (first && !site.first_party) || (!first && !site.third_party) {
        return RequestDecision::Continue(SkipReason::Party);
    }

    let checks = DeferredChecks {
        content: site.has_search_strings(),
        whois: site.has_whois_terms(),
        dig: site.has_dig_terms(),
    };
    RequestDecision::Record(checks)
}

fn filter_matches(site: &SiteConfig, cache: &SmartCache, url: &str) -> bool {
    let patterns = site.filter_patterns();
    if patterns.is_empty() {
        return false;
    }
    if site.regex_and {
        patterns.iter().all(|p| pattern_matches(cache, p, url))
    } else {
        patterns.iter().any(|p| pattern_matches(cache, p, url))
    }
}

fn pattern_matches(cache: &SmartCache, pattern: &str, url: &str) -> bool {
    match cache.pattern(pattern) {
        Ok(re) => re.is_match(url),
        // validated at startup; a compile failure here means cache
        // eviction raced a bad hand-edit, treat as no-match
        Err(_) => false,
    }
}

/// Pre-insertion gauntlet (dedupe + similarity) followed by the actual
/// record. Returns true iff the domain was inserted.
///
/// Cache key is always the full subdomain; the emitted key is the
/// registrable root unless `--sub-domains` is active.
pub fn try_record(
    env: &TaskEnv,
    state: &TaskState,
    url: &str,
    resource_type: &str,
    annotation: Option<&str>,
) -> bool {
    let host = full_host(url);
    let root = registrable_domain(url);
    if host.is_empty() {
        return false;
    }

    if env.cache.should_skip_domain(&host) {
        return false;
    }

    let output_key = if env.options.sub_domains || root.is_empty() {
        host.clone()
    } else {
        root
    };

    let threshold = env.global.ignore_similar_threshold;

    // Hold the matched lock across the similarity sweep and the insert so
    // two deferred jobs cannot both pass the check for near-identical
    // candidates.
    let mut matched = state.matched.lock();

    if env.global.ignore_similar {
        for (existing, _) in matched.iter() {
            let score = env.cache.similarity(&output_key, existing);
            if score >= threshold {
                env.logs.debug(&format!(
                    "[{}] similar-skip {output_key} ~ {existing} ({score}%)",
                    env.task_id
                ));
                return false;
            }
        }
    }

    if env.global.ignore_similar_ignored_domains {
        for ignored in &env.global.ignore_domains {
            if ignored.contains('*') {
                continue;
            }
            let score = env.cache.similarity(&output_key, ignored);
            if score >= threshold {
                env.logs.debug(&format!(
                    "[{}] similar-to-ignored skip {output_key} ~ {ignored} ({score}%)",
                    env.task_id
                ));
                return false;
            }
        }
    }

    let inserted = matched.insert(&output_key, Some(resource_type));
    drop(matched);
    env.cache.mark_domain_seen(&host);

    let tag = annotation.unwrap_or("MATCH");
    env.logs
        .matched(&format!("{output_key} {url} [{resource_type}] {tag}"));
    env.logs.debug(&format!(
        "[{}] {tag} {output_key} <- {url} ({resource_type})",
        env.task_id
    ));
    inserted
}

/// Attach the interception loop to a page. The returned handle is aborted
/// when the task finishes; request handling for one page is serialized by
/// the browser, so per-task state sees a single writer.
pub async fn attach_request_handler(
    page: &Page,
    env: Arc<TaskEnv>,
    state: Arc<TaskState>,
) -> anyhow::Result<JoinHandle<()>> {
    let mut events = page.event_listener::<EventRequestPaused>().await?;
    let page = page.clone();

    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            handle_paused_request(&page, &env, &state, &event).await;
        }
    }))
}

async fn handle_paused_request(
    page: &Page,
    env: &Arc<TaskEnv>,
    state: &Arc<TaskState>,
    event: &EventRequestPaused,
) {
    let url = event.request.url.clone();
    let resource_type = format!("{:?}", event.resource_type).to_ascii_lowercase();
    let request_id = event.request_id.clone();

    if env.options.dump_urls {
        env.logs
            .debug(&format!("[{}] request {url} ({resource_type})", env.task_id));
    }

    // Main-frame document requests double as redirect hops.
    if resource_type == "document" && is_main_frame(state, event) {
        if let Some(reason) = track_document_load(env, state, &url) {
            state.fail(reason);
            abort_request(page, request_id, ErrorReason::Aborted).await;
            return;
        }
    }

    let decision = {
        let first_party = state.first_party.lock().clone();
        let redirect_excluded = state.redirect_excluded.lock().clone();
        classify_request(
            &url,
            &resource_type,
            &env.site,
            &env.global,
            &env.cache,
            &first_party,
            &redirect_excluded,
        )
    };

    match decision {
        RequestDecision::Abort => {
            abort_request(page, request_id, ErrorReason::BlockedByClient).await;
        }
        RequestDecision::AbortAndRecord => {
            try_record(env, state, &url, &resource_type, Some("BLOCKED BUT ADDED"));
            abort_request(page, request_id, ErrorReason::BlockedByClient).await;
        }
        RequestDecision::Continue(_reason) => {
            continue_request(page, request_id).await;
        }
        RequestDecision::Record(checks) => {
            if checks.none() {
                try_record(env, state, &url, &resource_type, None);
            } else {
                spawn_deferred_verification(page, env, state, &url, &resource_type, checks, event);
            }
            continue_request(page, request_id).await;
        }
    }
}

fn is_main_frame(state: &TaskState, event: &EventRequestPaused) -> bool {
    let frame_id = event.frame_id.inner().clone();
    let mut main = state.main_frame.lock();
    match main.as_ref() {
        Some(id) => *id == frame_id,
        None => {
            // the first document request is the main-frame navigation
            *main = Some(frame_id);
            true
        }
    }
}

/// Redirect/reload bookkeeping for a main-frame document request. Returns
/// a failure when the load must stop the task.
///
/// Order matters here: a request for the URL the chain currently sits on
/// is a reload and goes to the load counter, but any other URL already in
/// `visited` is a redirect loop regardless of party status. The
/// first-party check must not run first, or a chain that returns to its
/// origin (a → b → a) would be miscounted as a reload and the loop check
/// would never fire.
pub fn track_document_load(env: &TaskEnv, state: &TaskState, url: &str) -> Option<TaskFailure> {
    {
        let mut redirect = state.redirect.lock();
        if redirect.current_url() == Some(url) {
            return redirect.note_page_load(url).err();
        }
        if redirect.was_visited(url) {
            env.logs.debug(&format!(
                "[{}] redirect loop: {url} already visited",
                env.task_id
            ));
            return Some(TaskFailure::RedirectLoop(url.to_string()));
        }
    }

    let root = registrable_domain(url);
    let is_known_party = !root.is_empty() && state.first_party.lock().contains(&root);

    if is_known_party || root.is_empty() {
        // same-site navigation to a fresh URL
        return state.redirect.lock().note_page_load(url).err();
    }

    // cross-domain document load: a redirect hop
    if !env.site.follow_redirects {
        env.logs.debug(&format!(
            "[{}] redirect to {url} suppressed (follow_redirects off)",
            env.task_id
        ));
        return Some(TaskFailure::Navigation(format!(
            "redirect to {url} with follow_redirects disabled"
        )));
    }

    if let Err(failure) = state
        .redirect
        .lock()
        .register_redirect(url, env.site.max_redirects())
    {
        return Some(failure);
    }

    state.first_party.lock().insert(root.clone());
    state.redirect_excluded.lock().insert(root.clone());
    env.logs.debug(&format!(
        "[{}] redirect hop -> {url} (first-party now includes {root})",
        env.task_id
    ));
    None
}

async fn continue_request(page: &Page, request_id: chromiumoxide::cdp::browser_protocol::fetch::RequestId) {
    if let Err(e) = page.execute(ContinueRequestParams::new(request_id)).await {
        let msg = e.to_string();
        if crate::browser::is_critical_browser_error(&msg) {
            warn!("continue failed with critical error: {msg}");
        } else {
            debug!("continue failed (request likely gone): {msg}");
        }
    }
}

async fn abort_request(
    page: &Page,
    request_id: chromiumoxide::cdp::browser_protocol::fetch::RequestId,
    reason: ErrorReason,
) {
    if let Err(e) = page.execute(FailRequestParams::new(request_id, reason)).await {
        debug!("abort failed (request likely gone): {e}");
    }
}

/// Launch a verification job for a deferred record; completion is awaited
/// at the task's settle stage.
fn spawn_deferred_verification(
    page: &Page,
    env: &Arc<TaskEnv>,
    state: &Arc<TaskState>,
    url: &str,
    resource_type: &str,
    checks: DeferredChecks,
    event: &EventRequestPaused,
) {
    let page = page.clone();
    let env = Arc::clone(env);
    let task_state = Arc::clone(state);
    let url = url.to_string();
    let resource_type = resource_type.to_string();
    let network_id = event.network_id.clone();

    let handle = tokio::spawn(async move {
        let verified = verify_candidate(&page, &env, &url, checks, network_id).await;
        if verified {
            try_record(&env, &task_state, &url, &resource_type, Some("VERIFIED"));
        } else {
            env.logs.debug(&format!(
                "[{}] unverified drop {url} (content={} whois={} dig={})",
                env.task_id, checks.content, checks.whois, checks.dig
            ));
        }
    });
    state.deferred.lock().push(handle);
}

async fn verify_candidate(
    page: &Page,
    env: &Arc<TaskEnv>,
    url: &str,
    checks: DeferredChecks,
    network_id: Option<chromiumoxide::cdp::browser_protocol::network::RequestId>,
) -> bool {
    if checks.content && !content_check(page, env, url, network_id).await {
        return false;
    }
    if checks.whois && !whois_check(env, url).await {
        return false;
    }
    if checks.dig && !dig_check(env, url).await {
        return false;
    }
    true
}

async fn content_check(
    page: &Page,
    env: &Arc<TaskEnv>,
    url: &str,
    network_id: Option<chromiumoxide::cdp::browser_protocol::network::RequestId>,
) -> bool {
    let body = if env.site.curl {
        let opts = CurlOptions {
            bypass_cache: env.site.bypass_cache,
            ..CurlOptions::default()
        };
        match curl_fetch(url, &opts, &env.cache).await {
            Ok(result) if result.ok => result.body,
            Ok(result) => {
                debug!("curl for {url} returned HTTP {}", result.http_code);
                return false;
            }
            Err(e) => {
                debug!("curl for {url} failed: {e}");
                return false;
            }
        }
    } else {
        match browser_response_body(page, network_id).await {
            Some(body) => body,
            None => return false,
        }
    };

    body_matches(env, &body).await
}

/// Fetch a response body through the browser. The response may not have
/// landed yet when the deferred job starts, so poll briefly.
async fn browser_response_body(
    page: &Page,
    network_id: Option<chromiumoxide::cdp::browser_protocol::network::RequestId>,
) -> Option<String> {
    let request_id = network_id?;
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        match page
            .execute(GetResponseBodyParams::new(request_id.clone()))
            .await
        {
            Ok(response) => {
                let body = if response.base64_encoded {
                    // binary bodies cannot satisfy a text search
                    String::new()
                } else {
                    response.body.clone()
                };
                return Some(body);
            }
            Err(e) => {
                debug!("response body not ready: {e}");
            }
        }
    }
    None
}

/// OR-list: any present. AND-list: all present. Case-insensitive. With
/// `grep` enabled the checks go through the external tool.
async fn body_matches(env: &Arc<TaskEnv>, body: &str) -> bool {
    let site = &env.site;
    let timeout = Duration::from_secs(10);

    if site.grep {
        if !site.search_strings.is_empty() {
            let mut any = false;
            for term in &site.search_strings {
                if grep_matches(body, term, timeout).await.unwrap_or(false) {
                    any = true;
                    break;
                }
            }
            if !any {
                return false;
            }
        }
        for term in &site.search_strings_and {
            if !grep_matches(body, term, timeout).await.unwrap_or(false) {
                return false;
            }
        }
        return true;
    }

    let lower = body.to_lowercase();
    if !site.search_strings.is_empty()
        && !site
            .search_strings
            .iter()
            .any(|t| lower.contains(&t.to_lowercase()))
    {
        return false;
    }
    site.search_strings_and
        .iter()
        .all(|t| lower.contains(&t.to_lowercase()))
}

async fn whois_check(env: &Arc<TaskEnv>, url: &str) -> bool {
    let root = registrable_domain(url);
    if root.is_empty() {
        return false;
    }

    // politeness delay before hitting registries
    tokio::time::sleep(env.global.whois_delay()).await;

    let mode = env
        .global
        .whois_server_mode
        .as_deref()
        .map(WhoisServerMode::parse)
        .unwrap_or_default();
    let opts = WhoisOptions {
        servers: env
            .site
            .whois_server
            .as_ref()
            .map(crate::config::OneOrMany::to_vec)
            .unwrap_or_default(),
        server_mode: mode,
        max_retries: env.site.whois_max_retries.unwrap_or(2),
        timeout_multiplier: env.site.whois_timeout_multiplier.unwrap_or(1.5),
        use_fallback: env.site.whois_use_fallback.unwrap_or(true),
        bypass_cache: env.site.bypass_cache,
        ..WhoisOptions::default()
    };

    let output = match whois_lookup(&root, &opts, &env.whois_picker, &env.cache).await {
        Ok(output) => output.to_lowercase(),
        Err(e) => {
            debug!("whois for {root} failed: {e}");
            return false;
        }
    };

    terms_match(&output, &env.site.whois, &env.site.whois_or)
}

async fn dig_check(env: &Arc<TaskEnv>, url: &str) -> bool {
    let host = full_host(url);
    let root = registrable_domain(url);
    if host.is_empty() {
        return false;
    }

    let opts = DigOptions {
        record_type: env.site.dig_record_type().to_string(),
        subdomain: env.site.dig_subdomain,
        bypass_cache: env.site.bypass_cache,
        ..DigOptions::default()
    };

    let output = match dig_lookup(&host, &root, &opts, &env.cache).await {
        Ok(output) => output.to_lowercase(),
        Err(e) => {
            debug!("dig for {host} failed: {e}");
            return false;
        }
    };

    terms_match(&output, &env.site.dig, &env.site.dig_or)
}

/// AND terms must all appear; OR terms need one hit. Both lists empty
/// never happens here (the record path was only deferred because terms
/// exist).
fn terms_match(output: &str, and_terms: &[String], or_terms: &[String]) -> bool {
    if !and_terms
        .iter()
        .all(|t| output.contains(&t.to_lowercase()))
    {
        return false;
    }
    if !or_terms.is_empty() && !or_terms.iter().any(|t| output.contains(&t.to_lowercase())) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use std::sync::Arc as StdArc;

    fn site(json: &str) -> SiteConfig {
        serde_json::from_str(json).expect("site parses")
    }

    fn global(json: &str) -> ScanConfig {
        serde_json::from_str(json).expect("global parses")
    }

    fn classify(
        url: &str,
        rtype: &str,
        site_cfg: &SiteConfig,
        global_cfg: &ScanConfig,
        first_party: &[&str],
    ) -> RequestDecision {
        let cache = SmartCache::new(false);
        let fp: HashSet<String> = first_party.iter().map(|s| s.to_string()).collect();
        classify_request(url, rtype, site_cfg, global_cfg, &cache, &fp, &HashSet::new())
    }

    #[test]
    fn simple_match_records_third_party() {
        let s = site(r#"{ "url": "https://host.test/", "filterRegex": "tracker" }"#);
        let g = global(r#"{ "sites": [] }"#);

        assert!(matches!(
            classify("https://ads.other/tracker.js", "script", &s, &g, &["host.test"]),
            RequestDecision::Record(c) if c.none()
        ));
        assert!(matches!(
            classify("https://cdn.other/img.png", "image", &s, &g, &["host.test"]),
            RequestDecision::Continue(SkipReason::NoPatternMatch)
        ));
    }

    #[test]
    fn first_party_filter_rejects_own_requests() {
        let s = site(
            r#"{ "url": "https://host.test/", "filterRegex": "tracker",
                 "firstParty": false, "thirdParty": true }"#,
        );
        let g = global(r#"{ "sites": [] }"#);

        assert!(matches!(
            classify("https://host.test/tracker.js", "script", &s, &g, &["host.test"]),
            RequestDecision::Continue(SkipReason::Party)
        ));
        assert!(matches!(
            classify("https://ads.other/tracker.js", "script", &s, &g, &["host.test"]),
            RequestDecision::Record(_)
        ));
    }

    #[test]
    fn regex_and_requires_all_patterns() {
        let s = site(
            r#"{ "url": "https://a.test/", "filterRegex": ["\\.js$", "track"],
                 "regex_and": true }"#,
        );
        let g = global(r#"{ "sites": [] }"#);

        assert!(matches!(
            classify("https://a.test/track.js", "script", &s, &g, &[]),
            RequestDecision::Record(_)
        ));
        assert!(matches!(
            classify("https://a.test/other.js", "script", &s, &g, &[]),
            RequestDecision::Continue(SkipReason::NoPatternMatch)
        ));
    }

    #[test]
    fn blocked_beats_filter_without_even_blocked() {
        let s = site(
            r#"{ "url": "https://a.test/", "filterRegex": "tracker",
                 "blocked": ["tracker"] }"#,
        );
        let g = global(r#"{ "sites": [] }"#);

        assert_eq!(
            classify("https://ads.other/tracker.js", "script", &s, &g, &[]),
            RequestDecision::Abort
        );
    }

    #[test]
    fn even_blocked_records_when_filter_also_matches() {
        let s = site(
            r#"{ "url": "https://a.test/", "filterRegex": "tracker",
                 "blocked": ["tracker"], "even_blocked": true }"#,
        );
        let g = global(r#"{ "sites": [] }"#);

        assert_eq!(
            classify("https://ads.other/tracker.js", "script", &s, &g, &[]),
            RequestDecision::AbortAndRecord
        );
        // blocked but filter does not match: plain abort
        let s2 = site(
            r#"{ "url": "https://a.test/", "filterRegex": "beacon",
                 "blocked": ["tracker"], "even_blocked": true }"#,
        );
        assert_eq!(
            classify("https://ads.other/tracker.js", "script", &s2, &g, &[]),
            RequestDecision::Abort
        );
    }

    #[test]
    fn resource_type_gate_precedes_record_paths() {
        let s = site(
            r#"{ "url": "https://a.test/", "filterRegex": "tracker",
                 "resourceTypes": ["script"], "whois": ["registrar"] }"#,
        );
        let g = global(r#"{ "sites": [] }"#);

        // disallowed type: no side effects, not even deferred checks
        assert!(matches!(
            classify("https://ads.other/tracker.png", "image", &s, &g, &[]),
            RequestDecision::Continue(SkipReason::ResourceType)
        ));
        // allowed type defers to whois
        assert!(matches!(
            classify("https://ads.other/tracker.js", "script", &s, &g, &[]),
            RequestDecision::Record(c) if c.whois && !c.content && !c.dig
        ));
    }

    #[test]
    fn ignore_domains_suppress_records() {
        let s = site(r#"{ "url": "https://a.test/", "filterRegex": "tracker" }"#);
        let g = global(r#"{ "ignoreDomains": ["other"], "sites": [] }"#);
        assert!(matches!(
            classify("https://ads.other/tracker.js", "script", &s, &g, &[]),
            RequestDecision::Continue(SkipReason::Ignored)
        ));
    }

    #[test]
    fn redirect_intermediates_are_skipped() {
        let s = site(r#"{ "url": "https://a.test/", "filterRegex": "tracker" }"#);
        let g = global(r#"{ "sites": [] }"#);
        let cache = SmartCache::new(false);
        let mut excluded = HashSet::new();
        excluded.insert("hop.test".to_string());
        let decision = classify_request(
            "https://cdn.hop.test/tracker.js",
            "script",
            &s,
            &g,
            &cache,
            &HashSet::new(),
            &excluded,
        );
        assert!(matches!(
            decision,
            RequestDecision::Continue(SkipReason::RedirectIntermediate)
        ));
    }

    #[test]
    fn search_strings_defer_content_check() {
        let s = site(
            r#"{ "url": "https://a.test/", "filterRegex": "tracker",
                 "searchstring_and": ["alpha", "beta"], "curl": true }"#,
        );
        let g = global(r#"{ "sites": [] }"#);
        assert!(matches!(
            classify("https://ads.other/tracker.js", "script", &s, &g, &[]),
            RequestDecision::Record(c) if c.content
        ));
    }

    #[test]
    fn unattributable_requests_pass_through() {
        let s = site(r#"{ "url": "https://a.test/", "filterRegex": "tracker" }"#);
        let g = global(r#"{ "sites": [] }"#);
        assert!(matches!(
            classify("https://192.0.2.1/tracker.js", "script", &s, &g, &[]),
            RequestDecision::Continue(SkipReason::Unattributable)
        ));
    }

    #[test]
    fn terms_match_and_or_semantics() {
        let output = "registrar: evil ads inc\ncountry: xx";
        assert!(terms_match(output, &["evil".into(), "ads".into()], &[]));
        assert!(!terms_match(output, &["evil".into(), "absent".into()], &[]));
        assert!(terms_match(output, &[], &["absent".into(), "ads".into()]));
        assert!(!terms_match(output, &[], &["absent".into()]));
        assert!(terms_match(output, &["evil".into()], &["ads".into()]));
    }

    fn env_with(global_cfg: ScanConfig, site_cfg: SiteConfig, sub_domains: bool) -> TaskEnv {
        TaskEnv {
            global: StdArc::new(global_cfg),
            site: StdArc::new(site_cfg),
            cache: StdArc::new(SmartCache::new(false)),
            logs: StdArc::new(crate::logging::ScanLogs::disabled()),
            whois_picker: StdArc::new(crate::nettools::WhoisServerPicker::new()),
            options: crate::pipeline::types::PipelineOptions {
                sub_domains,
                ..Default::default()
            },
            task_url: "https://host.test/".to_string(),
            task_id: 0,
        }
    }

    #[test]
    fn record_collapses_to_registrable_root() {
        let env = env_with(
            global(r#"{ "sites": [] }"#),
            site(r#"{ "url": "https://host.test/", "filterRegex": "tracker" }"#),
            false,
        );
        let state = TaskState::new("https://host.test/");
        assert!(try_record(&env, &state, "https://ads.other.test/t.js", "script", None));
        assert!(state.matched.lock().contains("other.test"));
        // same subdomain again: seen-cache suppresses
        assert!(!try_record(&env, &state, "https://ads.other.test/u.js", "script", None));
        // a different subdomain of the same root is a fresh cache key
        assert!(try_record(&env, &state, "https://cdn.other.test/v.js", "script", None));
        assert_eq!(state.matched.lock().len(), 1);
    }

    #[test]
    fn record_keeps_subdomains_when_requested() {
        let env = env_with(
            global(r#"{ "sites": [] }"#),
            site(r#"{ "url": "https://host.test/", "filterRegex": "tracker" }"#),
            true,
        );
        let state = TaskState::new("https://host.test/");
        assert!(try_record(&env, &state, "https://ads.other.test/t.js", "script", None));
        assert!(state.matched.lock().contains("ads.other.test"));
    }

    #[tokio::test]
    async fn search_string_and_requires_every_term() {
        let env = StdArc::new(env_with(
            global(r#"{ "sites": [] }"#),
            site(
                r#"{ "url": "https://host.test/", "filterRegex": "tracker",
                     "searchstring_and": ["alpha", "beta"] }"#,
            ),
            false,
        ));
        assert!(body_matches(&env, "ALPHA content with beta inside").await);
        assert!(!body_matches(&env, "alpha only").await);
    }

    #[tokio::test]
    async fn search_string_or_needs_one_hit() {
        let env = StdArc::new(env_with(
            global(r#"{ "sites": [] }"#),
            site(
                r#"{ "url": "https://host.test/", "filterRegex": "tracker",
                     "searchstring": ["adsbygoogle", "doubleclick"] }"#,
            ),
            false,
        ));
        assert!(body_matches(&env, "window.adsbygoogle = []").await);
        assert!(!body_matches(&env, "no ad library here").await);
    }

    #[test]
    fn similarity_suppression_before_insertion() {
        let env = env_with(
            global(r#"{ "ignore_similar": true, "ignore_similar_threshold": 80, "sites": [] }"#),
            site(r#"{ "url": "https://host.test/", "filterRegex": "tracker" }"#),
            false,
        );
        let state = TaskState::new("https://host.test/");
        assert!(try_record(&env, &state, "https://tracker1.net/a.js", "script", None));
        assert!(!try_record(&env, &state, "https://tracker2.net/b.js", "script", None));
        assert_eq!(state.matched.lock().len(), 1);
    }
}
