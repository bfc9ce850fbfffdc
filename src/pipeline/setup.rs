//! Page configuration before navigation: document-start script
//! injections, CSS hiding rules, custom headers, referrer resolution, and
//! site-data clearing. Everything here is best-effort; a page that rejects
//! an injection still gets scanned.

use anyhow::Result;
use chromiumoxide::cdp::browser_protocol::network::{
    ClearBrowserCacheParams, ClearBrowserCookiesParams, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::storage::ClearDataForOriginParams;
use chromiumoxide::Page;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::{ReferrerHeaders, SiteConfig};

/// Document-start instrumentation: logs `fetch`/XHR targets into a page
/// buffer and blocks more than two same-URL scripted reloads.
const EVAL_ON_DOC_SCRIPT: &str = r"
(() => {
    if (window.__bsInstalled) { return; }
    window.__bsInstalled = true;
    window.__bsRequests = [];
    window.__bsReloads = {};

    const note = (url) => {
        try {
            window.__bsRequests.push(String(url));
            if (window.__bsRequests.length > 500) { window.__bsRequests.shift(); }
        } catch (e) {}
    };

    const origFetch = window.fetch;
    window.fetch = function(input, init) {
        note(typeof input === 'string' ? input : (input && input.url));
        return origFetch.apply(this, arguments);
    };

    const origOpen = XMLHttpRequest.prototype.open;
    XMLHttpRequest.prototype.open = function(method, url) {
        note(url);
        return origOpen.apply(this, arguments);
    };

    const guard = (fn, name) => function(url) {
        const key = String(url === undefined ? location.href : url);
        window.__bsReloads[key] = (window.__bsReloads[key] || 0) + 1;
        if (window.__bsReloads[key] > 2) { return undefined; }
        return fn.apply(this, arguments);
    };
    try {
        location.reload = guard(location.reload.bind(location), 'reload');
        location.replace = guard(location.replace.bind(location), 'replace');
        location.assign = guard(location.assign.bind(location), 'assign');
    } catch (e) {}
})();
";

/// Fallback payload when the full script is rejected by the protocol.
const EVAL_ON_DOC_MINIMAL: &str = r"
(() => {
    window.__bsReloads = window.__bsReloads || {};
})();
";

/// Register a script to run at document start on every navigation.
pub async fn add_init_script(page: &Page, source: &str) -> Result<()> {
    page.execute(AddScriptToEvaluateOnNewDocumentParams {
        source: source.to_string(),
        include_command_line_api: None,
        world_name: None,
        run_immediately: None,
    })
    .await?;
    Ok(())
}

/// Inject the document-start instrumentation, retrying once with the
/// minimal payload. Persistent protocol failure is logged and swallowed.
pub async fn inject_eval_on_doc(page: &Page) {
    if let Err(first) = add_init_script(page, EVAL_ON_DOC_SCRIPT).await {
        warn!("eval_on_doc injection failed ({first}), retrying with minimal payload");
        if let Err(second) = add_init_script(page, EVAL_ON_DOC_MINIMAL).await {
            warn!("minimal eval_on_doc injection also failed: {second}");
        }
    }
}

/// Build the hiding stylesheet for `css_blocked` selectors.
#[must_use]
pub fn build_hiding_css(selectors: &[String]) -> String {
    let mut css = String::new();
    for selector in selectors {
        css.push_str(selector);
        css.push_str(
            " { display: none !important; visibility: hidden !important; opacity: 0 !important; }\n",
        );
    }
    css
}

/// Install the CSS hiding rules at document start; call
/// [`reapply_hiding_css`] again post-load for pages that rebuild `<head>`.
pub async fn inject_hiding_css(page: &Page, selectors: &[String]) {
    if selectors.is_empty() {
        return;
    }
    let css = build_hiding_css(selectors);
    let script = format!(
        r"
        (() => {{
            const install = () => {{
                const style = document.createElement('style');
                style.textContent = {css:?};
                (document.head || document.documentElement).appendChild(style);
            }};
            if (document.readyState === 'loading') {{
                document.addEventListener('DOMContentLoaded', install);
            }} else {{
                install();
            }}
        }})();
        "
    );
    if let Err(e) = add_init_script(page, &script).await {
        debug!("css hiding injection failed: {e}");
    }
}

/// Re-append the hiding style after load.
pub async fn reapply_hiding_css(page: &Page, selectors: &[String]) {
    if selectors.is_empty() {
        return;
    }
    let css = build_hiding_css(selectors);
    let script = format!(
        r"
        (() => {{
            const style = document.createElement('style');
            style.textContent = {css:?};
            (document.head || document.documentElement).appendChild(style);
        }})();
        "
    );
    if let Err(e) = page.evaluate(script.as_str()).await {
        debug!("post-load css reapply failed: {e}");
    }
}

/// Apply the site's custom headers to every request from this page.
pub async fn apply_custom_headers(page: &Page, site: &SiteConfig) {
    let Some(headers) = &site.custom_headers else {
        return;
    };
    if headers.is_empty() {
        return;
    }
    let map: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    if let Err(e) = page
        .execute(SetExtraHttpHeadersParams {
            headers: Headers::new(serde_json::Value::Object(map)),
        })
        .await
    {
        debug!("custom headers failed: {e}");
    }
}

/// Referer pool for `referrer_headers: { "mode": "social_media" }`.
const SOCIAL_MEDIA_REFERERS: &[&str] = &[
    "https://www.facebook.com/",
    "https://x.com/",
    "https://www.instagram.com/",
    "https://www.reddit.com/",
    "https://www.linkedin.com/",
    "https://t.co/",
];

/// Resolve the referer to navigate with, if any.
#[must_use]
pub fn resolve_referrer(setting: Option<&ReferrerHeaders>) -> Option<String> {
    let setting = setting?;
    let mut rng = rand::rng();
    match setting {
        ReferrerHeaders::Fixed(url) => Some(url.clone()),
        ReferrerHeaders::Pool(urls) => {
            if urls.is_empty() {
                None
            } else {
                Some(urls[rng.random_range(0..urls.len())].clone())
            }
        }
        ReferrerHeaders::Mode { mode } => {
            if mode.eq_ignore_ascii_case("social_media") {
                Some(
                    SOCIAL_MEDIA_REFERERS[rng.random_range(0..SOCIAL_MEDIA_REFERERS.len())]
                        .to_string(),
                )
            } else {
                debug!("unknown referrer_headers mode {mode:?}");
                None
            }
        }
    }
}

/// Clear cookies, cache, and origin storage; used before load and before
/// each reload when the site enables `clear_site_data`.
pub async fn clear_site_data(page: &Page, origin: &str) {
    if let Err(e) = page.execute(ClearBrowserCookiesParams::default()).await {
        debug!("cookie clear failed: {e}");
    }
    if let Err(e) = page.execute(ClearBrowserCacheParams::default()).await {
        debug!("cache clear failed: {e}");
    }
    if let Err(e) = page
        .execute(ClearDataForOriginParams {
            origin: origin.to_string(),
            storage_types: "all".to_string(),
        })
        .await
    {
        debug!("origin storage clear failed: {e}");
    }
}
