//! Per-URL task execution: the strict stage order from page open to rule
//! emission.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, SetCacheDisabledParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;

use crate::browser::{is_critical_browser_error, with_timeout, BrowserSession, SessionError};
use crate::domain::{full_host, registrable_domain};
use crate::pipeline::challenge::{default_handlers, run_challenge_handlers};
use crate::pipeline::intercept::attach_request_handler;
use crate::pipeline::interact::{perform_interactions, Intensity};
use crate::pipeline::setup;
use crate::pipeline::spoof::apply_identity;
use crate::pipeline::types::{TaskEnv, TaskFailure, TaskState, UrlTask};
use crate::rules::UrlResult;

/// Network-idle settle: considered idle after this quiet period.
const NETWORK_IDLE_QUIET: Duration = Duration::from_secs(2);
/// Hard cap on the settle wait.
const NETWORK_IDLE_CAP: Duration = Duration::from_secs(10);
/// Budget for draining deferred verification jobs at settle.
const DEFERRED_DRAIN_CAP: Duration = Duration::from_secs(45);

/// Run one URL task to completion. Never panics across the task boundary;
/// every failure is folded into the returned [`UrlResult`].
pub async fn process_url_task(
    session: &BrowserSession,
    task: &UrlTask,
    env: Arc<TaskEnv>,
) -> UrlResult {
    let site = &env.site;

    // Step 1: a site with both parties disabled can never record anything.
    if !site.first_party && !site.third_party {
        info!("[{}] skipping {} (both parties disabled)", task.task_id, task.url);
        return UrlResult::skipped(&task.url);
    }

    let state = Arc::new(TaskState::new(&task.url));

    // Step 2: open the page.
    let page = match session.create_page().await {
        Ok(page) => page,
        Err(SessionError::Critical(msg)) => {
            warn!("[{}] page creation hit critical error: {msg}", task.task_id);
            state.fail(TaskFailure::Critical(msg));
            return finish(None, &state, task, &env).await;
        }
        Err(SessionError::Other(msg)) => {
            warn!("[{}] page creation failed: {msg}", task.task_id);
            state.fail(TaskFailure::Navigation(msg));
            return finish(None, &state, task, &env).await;
        }
    };

    // Steps 3-5: configuration is best-effort; the scan proceeds without
    // any piece that fails.
    if env.global.eval_on_doc_for(site) {
        setup::inject_eval_on_doc(&page).await;
    }
    setup::inject_hiding_css(&page, &site.css_blocked).await;
    if let Err(e) = apply_identity(&page, site).await {
        debug!("[{}] identity setup failed: {e}", task.task_id);
    }
    setup::apply_custom_headers(&page, site).await;

    let origin = origin_of(&task.url);
    if site.clear_site_data {
        setup::clear_site_data(&page, &origin).await;
    }

    // The dispatch core attaches before navigation so the very first
    // request is observed.
    let handler = match attach_request_handler(&page, Arc::clone(&env), Arc::clone(&state)).await {
        Ok(handle) => handle,
        Err(e) => {
            let msg = e.to_string();
            if is_critical_browser_error(&msg) {
                state.fail(TaskFailure::Critical(msg));
            } else {
                state.fail(TaskFailure::Navigation(msg));
            }
            return finish(Some(page), &state, task, &env).await;
        }
    };

    let cdp_logger = maybe_spawn_cdp_logger(&page, &env).await;

    // Step 6: navigate.
    if let Err(failure) = navigate(&page, task, &env).await {
        state.fail(failure);
        abort_background(handler, cdp_logger);
        return finish(Some(page), &state, task, &env).await;
    }

    // Redirect bookkeeping in the handler may have failed the task while
    // navigation itself succeeded.
    if state.failed() {
        abort_background(handler, cdp_logger);
        return finish(Some(page), &state, task, &env).await;
    }

    if let Err(failure) = validate_final_url(&page, task, &env, &state).await {
        state.fail(failure);
        abort_background(handler, cdp_logger);
        return finish(Some(page), &state, task, &env).await;
    }

    // Step 8: challenge handlers.
    let handlers = default_handlers(site);
    if let Err(failure) = run_challenge_handlers(&page, &handlers, site).await {
        state.fail(failure);
        abort_background(handler, cdp_logger);
        return finish(Some(page), &state, task, &env).await;
    }

    // Step 9: settle.
    wait_for_network_idle(&page, NETWORK_IDLE_QUIET, NETWORK_IDLE_CAP).await;
    tokio::time::sleep(site.delay_duration()).await;
    setup::reapply_hiding_css(&page, &site.css_blocked).await;

    // Step 10: interactions.
    if site.interact && !env.options.no_interact {
        perform_interactions(&page, Intensity::Normal).await;
    }

    // Step 11: reloads.
    run_reloads(&page, task, &env, &state, &origin).await;

    // Deferred verification completes before emission.
    drain_deferred(&state, &env).await;

    abort_background(handler, cdp_logger);
    let result = finish(Some(page), &state, task, &env).await;

    // Advisory page sweep; losing a close race to another worker is fine.
    if site.window_cleanup.enabled() {
        let keep = if site.window_cleanup.all() { 0 } else { 1 };
        session.close_surplus_pages(keep).await;
    }

    result
}

fn origin_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .map(|u| u.origin().ascii_serialization())
        .unwrap_or_else(|| url.to_string())
}

async fn navigate(page: &Page, task: &UrlTask, env: &Arc<TaskEnv>) -> Result<(), TaskFailure> {
    let referrer = setup::resolve_referrer(env.site.referrer_headers.as_ref());
    let timeout = env.site.page_timeout();
    let url = task.url.clone();

    let goto = async {
        let params = match &referrer {
            Some(referer) => {
                chromiumoxide::cdp::browser_protocol::page::NavigateParams::builder()
                    .url(url.clone())
                    .referrer(referer.clone())
                    .build()
                    .map_err(|e| anyhow::anyhow!("{e}"))?
            }
            None => chromiumoxide::cdp::browser_protocol::page::NavigateParams::builder()
                .url(url.clone())
                .build()
                .map_err(|e| anyhow::anyhow!("{e}"))?,
        };
        page.goto(params).await.map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(())
    };

    if let Err(e) = with_timeout(goto, timeout, "navigation").await {
        let msg = e.to_string();
        return Err(if is_critical_browser_error(&msg) {
            TaskFailure::Critical(msg)
        } else {
            TaskFailure::Navigation(msg)
        });
    }

    // allow JS-driven redirects to land before the final-URL check
    tokio::time::sleep(env.site.js_redirect_timeout().min(Duration::from_secs(10))).await;
    Ok(())
}

/// Step 6's final-URL observation: the redirect chain was maintained by
/// the interception handler; here the landing URL is validated against it.
async fn validate_final_url(
    page: &Page,
    task: &UrlTask,
    env: &Arc<TaskEnv>,
    state: &Arc<TaskState>,
) -> Result<(), TaskFailure> {
    let final_url = match page.url().await {
        Ok(Some(url)) => url,
        Ok(None) => return Err(TaskFailure::InvalidFinalUrl("<no url>".to_string())),
        Err(e) => {
            let msg = e.to_string();
            return Err(if is_critical_browser_error(&msg) {
                TaskFailure::Critical(msg)
            } else {
                TaskFailure::InvalidFinalUrl(msg)
            });
        }
    };

    if final_url == "about:blank" {
        return Err(TaskFailure::InvalidFinalUrl(final_url));
    }

    let final_root = registrable_domain(&final_url);
    if final_root.is_empty() {
        return Err(TaskFailure::InvalidFinalUrl(final_url));
    }

    // Landing on a previously-visited URL that is not the chain's current
    // hop means the chain re-entered itself. The interception handler
    // fails such loops as they happen; this guard catches any that slip
    // past it so a looped task can never report success.
    {
        let redirect = state.redirect.lock();
        if redirect.current_url() != Some(final_url.as_str())
            && redirect.was_visited(&final_url)
        {
            env.logs.debug(&format!(
                "[{}] final URL {final_url} re-enters the redirect chain",
                task.task_id
            ));
            return Err(TaskFailure::RedirectLoop(final_url));
        }
    }

    let origin_root = registrable_domain(&task.url);
    if final_root != origin_root {
        let known = state.first_party.lock().contains(&final_root);
        if !known {
            // landed somewhere the handler never saw as a document request
            env.logs.debug(&format!(
                "[{}] unexpected final URL {final_url}",
                task.task_id
            ));
            return Err(TaskFailure::InvalidFinalUrl(final_url));
        }
    }
    Ok(())
}

async fn run_reloads(
    page: &Page,
    task: &UrlTask,
    env: &Arc<TaskEnv>,
    state: &Arc<TaskState>,
    origin: &str,
) {
    let site = &env.site;
    let total = site.reload_count();
    if total <= 1 {
        return;
    }

    let current_root = registrable_domain(&task.url);
    let force = site
        .force_reload
        .as_ref()
        .is_some_and(|fr| fr.applies_to(&current_root));

    let mut consecutive_failures = 0u32;
    for round in 1..total {
        if state.failed() {
            break;
        }

        // light validity probe before committing to a reload
        let probe = with_timeout(
            async { page.evaluate("1 + 1").await.map_err(|e| anyhow::anyhow!("{e}")) },
            Duration::from_secs(5),
            "page validity probe",
        )
        .await;
        if probe.is_err() {
            debug!("[{}] validity probe failed before reload {round}", task.task_id);
            break;
        }

        if site.clear_site_data {
            setup::clear_site_data(page, origin).await;
        }

        if force {
            let _ = page
                .execute(SetCacheDisabledParams {
                    cache_disabled: true,
                })
                .await;
        }

        let reload = with_timeout(
            async { page.reload().await.map(|_| ()).map_err(|e| anyhow::anyhow!("{e}")) },
            site.page_timeout(),
            "reload",
        )
        .await;

        if force {
            let _ = page
                .execute(SetCacheDisabledParams {
                    cache_disabled: false,
                })
                .await;
        }

        match reload {
            Ok(()) => {
                consecutive_failures = 0;
                wait_for_network_idle(page, NETWORK_IDLE_QUIET, NETWORK_IDLE_CAP).await;
                tokio::time::sleep(site.delay_duration()).await;
            }
            Err(e) => {
                consecutive_failures += 1;
                let msg = e.to_string();
                warn!("[{}] reload {round} failed: {msg}", task.task_id);
                if is_critical_browser_error(&msg) {
                    state.fail(TaskFailure::Critical(msg));
                    break;
                }
                if consecutive_failures >= 2 {
                    debug!(
                        "[{}] short-circuiting remaining {} reloads",
                        task.task_id,
                        total - 1 - round
                    );
                    break;
                }
            }
        }
    }
}

/// Wait until the page has gone `quiet` without a new request, or `cap`
/// elapses.
async fn wait_for_network_idle(page: &Page, quiet: Duration, cap: Duration) {
    let mut events = match page.event_listener::<EventRequestWillBeSent>().await {
        Ok(events) => events,
        Err(e) => {
            debug!("network idle listener unavailable: {e}");
            tokio::time::sleep(quiet).await;
            return;
        }
    };

    let deadline = tokio::time::Instant::now() + cap;
    loop {
        match tokio::time::timeout(quiet, events.next()).await {
            Ok(Some(_)) => {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
}

/// Await the task's deferred WHOIS/content jobs; whatever misses the
/// drain budget is aborted and its candidate stays unrecorded.
async fn drain_deferred(state: &Arc<TaskState>, env: &Arc<TaskEnv>) {
    let handles = state.take_deferred();
    if handles.is_empty() {
        return;
    }
    debug!("[{}] draining {} deferred jobs", env.task_id, handles.len());

    let mut handles = handles;
    let result = tokio::time::timeout(DEFERRED_DRAIN_CAP, async {
        for handle in &mut handles {
            let _ = handle.await;
        }
    })
    .await;

    if result.is_err() {
        warn!("[{}] deferred jobs exceeded drain budget, aborting rest", env.task_id);
        for handle in handles {
            handle.abort();
        }
    }
}

fn abort_background(handler: JoinHandle<()>, cdp_logger: Option<JoinHandle<()>>) {
    handler.abort();
    if let Some(logger) = cdp_logger {
        logger.abort();
    }
}

/// Forward `Network.requestWillBeSent` to the debug log when the CDP
/// channel is enabled for this page's host.
async fn maybe_spawn_cdp_logger(page: &Page, env: &Arc<TaskEnv>) -> Option<JoinHandle<()>> {
    let host = full_host(&env.task_url);
    if !env.global.cdp_enabled_for(&env.site, &host) {
        return None;
    }
    let mut events = match page.event_listener::<EventRequestWillBeSent>().await {
        Ok(events) => events,
        Err(e) => {
            debug!("CDP debug channel unavailable: {e}");
            return None;
        }
    };
    let env = Arc::clone(env);
    Some(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            env.logs.debug(&format!(
                "[{}] CDP requestWillBeSent {} {}",
                env.task_id, event.request.method, event.request.url
            ));
        }
    }))
}

/// Close the page, convert accumulated state into the task result.
async fn finish(
    page: Option<Page>,
    state: &Arc<TaskState>,
    task: &UrlTask,
    env: &Arc<TaskEnv>,
) -> UrlResult {
    // deferred jobs may still be running on error paths
    for handle in state.take_deferred() {
        handle.abort();
    }

    let final_url = match &page {
        Some(page) => page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| task.url.clone()),
        None => task.url.clone(),
    };

    if let Some(page) = page {
        if let Err(e) = page.close().await {
            debug!("[{}] page close failed: {e}", task.task_id);
        }
    }

    let needs_restart = state.needs_restart.load(Ordering::SeqCst);
    let failure = state.take_failure();
    let matched = std::mem::take(&mut *state.matched.lock());
    let redirect_domains: Vec<String> = state.redirect_excluded.lock().iter().cloned().collect();

    // a task that broke the browser contributes nothing
    let rules = if needs_restart {
        Vec::new()
    } else {
        matched.into_rules()
    };
    let has_matches = !rules.is_empty();

    if let Some(failure) = &failure {
        warn!("[{}] {} failed: {failure}", task.task_id, task.url);
    }

    UrlResult {
        url: task.url.clone(),
        final_url,
        success: failure.is_none(),
        needs_immediate_restart: needs_restart,
        has_matches,
        rules,
        redirect_domains,
        error: failure.map(|f| f.to_string()),
    }
}
