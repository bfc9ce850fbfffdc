//! Pluggable anti-bot challenge handling.
//!
//! Handlers are strategies behind [`ChallengeHandler`]: `detect` reports
//! what kind of interstitial the page shows, `solve` attempts to dismiss
//! it within a bound. The default set ships a no-op handler plus a
//! DOM-heuristic click-through for the common "verify you are human" and
//! phishing-warning pages; anything smarter plugs in through the trait.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chromiumoxide::Page;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use crate::config::SiteConfig;
use crate::pipeline::types::TaskFailure;

/// What a detector saw on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Absent,
    /// A CDN bot-check interstitial.
    Interstitial,
    /// A phishing/deceptive-site warning page.
    PhishWarning,
}

pub trait ChallengeHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect the page; never interacts.
    fn detect<'a>(&'a self, page: &'a Page) -> BoxFuture<'a, Result<ChallengeKind>>;

    /// Attempt to dismiss the challenge. `Ok(true)` means the page should
    /// be re-checked; `Ok(false)` means this handler cannot solve it
    /// (a human is needed).
    fn solve<'a>(&'a self, page: &'a Page, timeout: Duration) -> BoxFuture<'a, Result<bool>>;
}

/// Always reports `Absent`. The safe default when no bypass is enabled.
pub struct NoopChallengeHandler;

impl ChallengeHandler for NoopChallengeHandler {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn detect<'a>(&'a self, _page: &'a Page) -> BoxFuture<'a, Result<ChallengeKind>> {
        async { Ok(ChallengeKind::Absent) }.boxed()
    }

    fn solve<'a>(&'a self, _page: &'a Page, _timeout: Duration) -> BoxFuture<'a, Result<bool>> {
        async { Ok(true) }.boxed()
    }
}

/// DOM-heuristic detector/solver for interstitial and phishing pages.
pub struct InterstitialClickthrough;

const DETECT_SCRIPT: &str = r#"
(() => {
    const title = (document.title || '').toLowerCase();
    const body = (document.body ? document.body.innerText : '').toLowerCase().slice(0, 4000);
    const interstitial =
        title.includes('just a moment') ||
        title.includes('attention required') ||
        body.includes('verify you are human') ||
        body.includes('checking your browser') ||
        body.includes('enable javascript and cookies');
    const phish =
        title.includes('deceptive site') ||
        title.includes('warning: phishing') ||
        body.includes('suspected phishing') ||
        body.includes('this site has been reported');
    if (interstitial) { return 'interstitial'; }
    if (phish) { return 'phish'; }
    return 'absent';
})()
"#;

const SOLVE_SCRIPT: &str = r#"
(() => {
    const candidates = [
        'input[type="checkbox"]',
        '#challenge-stage input',
        'button[type="submit"]',
        'a#proceed-link',
        'button#details-button',
    ];
    for (const sel of candidates) {
        const el = document.querySelector(sel);
        if (el) { el.click(); return true; }
    }
    return false;
})()
"#;

impl ChallengeHandler for InterstitialClickthrough {
    fn name(&self) -> &'static str {
        "interstitial-clickthrough"
    }

    fn detect<'a>(&'a self, page: &'a Page) -> BoxFuture<'a, Result<ChallengeKind>> {
        async move {
            let verdict: String = page
                .evaluate(DETECT_SCRIPT)
                .await?
                .into_value()
                .unwrap_or_else(|_| "absent".to_string());
            Ok(match verdict.as_str() {
                "interstitial" => ChallengeKind::Interstitial,
                "phish" => ChallengeKind::PhishWarning,
                _ => ChallengeKind::Absent,
            })
        }
        .boxed()
    }

    fn solve<'a>(&'a self, page: &'a Page, timeout: Duration) -> BoxFuture<'a, Result<bool>> {
        async move {
            let clicked: bool = page
                .evaluate(SOLVE_SCRIPT)
                .await?
                .into_value()
                .unwrap_or(false);
            if !clicked {
                return Ok(false);
            }
            // give the page a slice of the budget to settle after the click
            tokio::time::sleep(timeout.min(Duration::from_secs(3))).await;
            Ok(true)
        }
        .boxed()
    }
}

/// Default handler chain for a site: the heuristic click-through when any
/// bypass flag is set, the no-op otherwise.
#[must_use]
pub fn default_handlers(site: &SiteConfig) -> Vec<Arc<dyn ChallengeHandler>> {
    if site.challenge_bypass || site.phish_bypass {
        vec![Arc::new(InterstitialClickthrough)]
    } else {
        vec![Arc::new(NoopChallengeHandler)]
    }
}

/// Run the handler chain post-navigation, bounded by the site's retry cap
/// and per-attempt timeout.
pub async fn run_challenge_handlers(
    page: &Page,
    handlers: &[Arc<dyn ChallengeHandler>],
    site: &SiteConfig,
) -> Result<(), TaskFailure> {
    let max_retries = site.challenge_max_retries();
    let timeout = site.challenge_timeout();

    for handler in handlers {
        let mut last_kind = ChallengeKind::Absent;
        let mut attempts = 0u32;

        loop {
            let kind = match handler.detect(page).await {
                Ok(kind) => kind,
                Err(e) => {
                    debug!("challenge detect ({}) failed: {e}", handler.name());
                    break;
                }
            };

            match kind {
                ChallengeKind::Absent => break,
                ChallengeKind::Interstitial if !site.challenge_bypass => {
                    return Err(TaskFailure::ChallengeRequiresHuman);
                }
                ChallengeKind::PhishWarning if !site.phish_bypass => {
                    return Err(TaskFailure::ChallengeRequiresHuman);
                }
                _ => {}
            }

            if attempts > 0 && kind == last_kind && attempts >= max_retries {
                return Err(TaskFailure::ChallengeMaxRetries(attempts));
            }
            if attempts > 0 && kind != last_kind {
                // the page is cycling between challenge kinds
                return Err(TaskFailure::ChallengeLoop);
            }
            last_kind = kind;
            attempts += 1;

            info!(
                "challenge {:?} detected by {}, attempt {attempts}/{max_retries}",
                kind,
                handler.name()
            );

            let solved = tokio::time::timeout(timeout, handler.solve(page, timeout))
                .await
                .map_err(|_| TaskFailure::ChallengeMaxRetries(attempts))?
                .unwrap_or(false);
            if !solved {
                return Err(TaskFailure::ChallengeRequiresHuman);
            }
        }
    }
    Ok(())
}
