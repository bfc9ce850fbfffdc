//! Configuration document types.
//!
//! The config file is a JSON document with a handful of union-shaped
//! fields (`forcereload` is a bool or a host list, `referrer_headers` a
//! string, list, or mode object). Those are modeled as untagged enums so
//! serde resolves the shape; everything else is `Option` with defaults
//! applied in the getter layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource types the browser can classify a request as. Used to sanity
/// check `resourceTypes` lists at load.
pub const KNOWN_RESOURCE_TYPES: &[&str] = &[
    "document",
    "stylesheet",
    "image",
    "media",
    "font",
    "script",
    "texttrack",
    "xhr",
    "fetch",
    "prefetch",
    "eventsource",
    "websocket",
    "manifest",
    "signedexchange",
    "ping",
    "cspviolationreport",
    "preflight",
    "other",
];

/// A field accepting either a single value or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v.clone()],
            Self::Many(vs) => vs.clone(),
        }
    }
}

/// `forcereload`: `true`/`false`, or a list of host suffixes for which a
/// cache-bypassing reload is forced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForceReload {
    Flag(bool),
    Hosts(Vec<String>),
}

impl ForceReload {
    /// Whether the reload for `registrable` must bypass the HTTP cache.
    #[must_use]
    pub fn applies_to(&self, registrable: &str) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Hosts(hosts) => hosts.iter().any(|h| registrable.ends_with(h.as_str())),
        }
    }
}

/// `referrer_headers`: a fixed referer URL, a pool to pick from, or a
/// named mode (currently `social_media`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferrerHeaders {
    Fixed(String),
    Pool(Vec<String>),
    Mode { mode: String },
}

/// `fingerprint_protection`: off/on, or `"random"` for per-page
/// randomized values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FingerprintSetting {
    Flag(bool),
    Mode(String),
}

impl Default for FingerprintSetting {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl FingerprintSetting {
    #[must_use]
    pub fn enabled(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Mode(mode) => mode.eq_ignore_ascii_case("random"),
        }
    }

    #[must_use]
    pub fn randomized(&self) -> bool {
        matches!(self, Self::Mode(mode) if mode.eq_ignore_ascii_case("random"))
    }
}

/// `window_cleanup`: off, on (close surplus pages at task end),
/// `"realtime"` (close eagerly, advisory), or `"all"` (sweep every page).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WindowCleanup {
    Flag(bool),
    Mode(String),
}

impl Default for WindowCleanup {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl WindowCleanup {
    #[must_use]
    pub fn enabled(&self) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Mode(_) => true,
        }
    }

    #[must_use]
    pub fn realtime(&self) -> bool {
        matches!(self, Self::Mode(mode) if mode.eq_ignore_ascii_case("realtime"))
    }

    #[must_use]
    pub fn all(&self) -> bool {
        matches!(self, Self::Mode(mode) if mode.eq_ignore_ascii_case("all"))
    }
}

/// CDP debug channel gate: everywhere, or only for specific hostnames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CdpSetting {
    Flag(bool),
    Hosts(Vec<String>),
}

impl Default for CdpSetting {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl CdpSetting {
    #[must_use]
    pub fn applies_to(&self, host: &str) -> bool {
        match self {
            Self::Flag(flag) => *flag,
            Self::Hosts(hosts) => hosts.iter().any(|h| host.ends_with(h.as_str())),
        }
    }
}

/// Per-target configuration, read-only once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// One URL or a list; each expands to its own task.
    pub url: OneOrMany<String>,

    /// Filter patterns selecting requests for emission.
    #[serde(rename = "filterRegex", default)]
    pub filter_regex: Option<OneOrMany<String>>,
    /// All patterns must match (`true`) vs any (`false`, default).
    #[serde(default)]
    pub regex_and: bool,

    /// Requests matching these are aborted at interception.
    #[serde(default)]
    pub blocked: Vec<String>,
    /// CSS selectors hidden via injected style rules.
    #[serde(default)]
    pub css_blocked: Vec<String>,

    /// Resource-type allow-list; unset means all types.
    #[serde(rename = "resourceTypes", default)]
    pub resource_types: Option<Vec<String>>,

    #[serde(rename = "firstParty", default = "default_true")]
    pub first_party: bool,
    #[serde(rename = "thirdParty", default = "default_true")]
    pub third_party: bool,

    /// OR-logic search strings (case-insensitive substring on the body).
    #[serde(rename = "searchstring", default)]
    pub search_strings: Vec<String>,
    /// AND-logic search strings.
    #[serde(rename = "searchstring_and", default)]
    pub search_strings_and: Vec<String>,

    /// Fetch bodies through the external `curl` instead of the browser.
    #[serde(default)]
    pub curl: bool,
    /// Match bodies through the external `grep` instead of in-process.
    #[serde(default)]
    pub grep: bool,

    /// WHOIS terms, AND semantics.
    #[serde(default)]
    pub whois: Vec<String>,
    /// WHOIS terms, OR semantics.
    #[serde(rename = "whois-or", default)]
    pub whois_or: Vec<String>,
    #[serde(rename = "whois_server", default)]
    pub whois_server: Option<OneOrMany<String>>,
    #[serde(default)]
    pub whois_max_retries: Option<u32>,
    #[serde(default)]
    pub whois_timeout_multiplier: Option<f64>,
    #[serde(default)]
    pub whois_use_fallback: Option<bool>,

    /// DIG terms, AND semantics.
    #[serde(default)]
    pub dig: Vec<String>,
    /// DIG terms, OR semantics.
    #[serde(rename = "dig-or", default)]
    pub dig_or: Vec<String>,
    #[serde(rename = "digRecordType", default)]
    pub dig_record_type: Option<String>,
    /// Query the full subdomain instead of the registrable root.
    #[serde(default)]
    pub dig_subdomain: bool,

    /// Settle delay after load, milliseconds.
    #[serde(default)]
    pub delay: Option<u64>,
    /// Total loads per URL (1 = no reload).
    #[serde(default)]
    pub reload: Option<u32>,
    #[serde(rename = "forcereload", default)]
    pub force_reload: Option<ForceReload>,

    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default)]
    pub max_redirects: Option<u32>,
    /// Grace period for JS-driven redirects, milliseconds.
    #[serde(default)]
    pub js_redirect_timeout: Option<u64>,

    /// Attempt to click through CDN "verify you are human" interstitials.
    #[serde(rename = "cloudflare_bypass", default)]
    pub challenge_bypass: bool,
    /// Attempt to dismiss phishing-warning pages.
    #[serde(rename = "cloudflare_phish", default)]
    pub phish_bypass: bool,
    #[serde(default)]
    pub challenge_max_retries: Option<u32>,
    /// Per-attempt budget for challenge handlers, milliseconds.
    #[serde(default)]
    pub challenge_timeout: Option<u64>,

    /// User-agent alias: `chrome`, `chrome_mac`, `chrome_linux`,
    /// `firefox`, `firefox_mac`, `firefox_linux`, `safari`.
    #[serde(rename = "userAgent", default)]
    pub user_agent: Option<String>,
    /// Spoof `navigator.brave.isBrave()`.
    #[serde(rename = "isBrave", default)]
    pub is_brave: bool,
    #[serde(default)]
    pub fingerprint_protection: FingerprintSetting,

    /// Inject the document-start request logger / reload guard.
    #[serde(default)]
    pub eval_on_doc: Option<bool>,
    /// Forward `Network.requestWillBeSent` to the debug log.
    #[serde(default)]
    pub cdp: Option<CdpSetting>,

    /// Perform pseudo-random page interactions.
    #[serde(default)]
    pub interact: bool,
    /// Record domains that matched both `blocked` and the filter regex.
    #[serde(default)]
    pub even_blocked: bool,
    /// Skip the response-body cache for this site.
    #[serde(default)]
    pub bypass_cache: bool,

    #[serde(default)]
    pub referrer_headers: Option<ReferrerHeaders>,
    #[serde(default)]
    pub custom_headers: Option<std::collections::BTreeMap<String, String>>,

    #[serde(default)]
    pub window_cleanup: WindowCleanup,

    /// Clear cookies/storage/cache before load and before each reload.
    #[serde(default)]
    pub clear_site_data: bool,

    /// Run this site's pages headful (overrides the global default).
    #[serde(default)]
    pub headful: Option<bool>,

    /// Page-load timeout override, milliseconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl SiteConfig {
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.url.to_vec()
    }

    #[must_use]
    pub fn filter_patterns(&self) -> Vec<String> {
        self.filter_regex.as_ref().map(OneOrMany::to_vec).unwrap_or_default()
    }

    #[must_use]
    pub fn delay_duration(&self) -> Duration {
        Duration::from_millis(self.delay.unwrap_or(0))
    }

    #[must_use]
    pub fn reload_count(&self) -> u32 {
        self.reload.unwrap_or(1).max(1)
    }

    #[must_use]
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects.unwrap_or(10)
    }

    #[must_use]
    pub fn js_redirect_timeout(&self) -> Duration {
        Duration::from_millis(self.js_redirect_timeout.unwrap_or(4000))
    }

    #[must_use]
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout.unwrap_or(30_000))
    }

    #[must_use]
    pub fn challenge_max_retries(&self) -> u32 {
        self.challenge_max_retries.unwrap_or(3)
    }

    #[must_use]
    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_millis(self.challenge_timeout.unwrap_or(15_000))
    }

    #[must_use]
    pub fn dig_record_type(&self) -> &str {
        self.dig_record_type.as_deref().unwrap_or("A")
    }

    /// Whether any body search is configured.
    #[must_use]
    pub fn has_search_strings(&self) -> bool {
        !self.search_strings.is_empty() || !self.search_strings_and.is_empty()
    }

    /// Whether any WHOIS corroboration is configured.
    #[must_use]
    pub fn has_whois_terms(&self) -> bool {
        !self.whois.is_empty() || !self.whois_or.is_empty()
    }

    /// Whether any DIG corroboration is configured.
    #[must_use]
    pub fn has_dig_terms(&self) -> bool {
        !self.dig.is_empty() || !self.dig_or.is_empty()
    }

    /// Normalized resource-type allow-list, lowercased. `None` = allow all.
    #[must_use]
    pub fn resource_allow_list(&self) -> Option<Vec<String>> {
        self.resource_types
            .as_ref()
            .map(|types| types.iter().map(|t| t.to_ascii_lowercase()).collect())
    }
}

/// Top-level config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Domains never recorded; entries may carry `*` wildcards.
    #[serde(rename = "ignoreDomains", default)]
    pub ignore_domains: Vec<String>,

    /// Global blocked patterns, unioned with each site's.
    #[serde(default)]
    pub blocked: Vec<String>,

    #[serde(default)]
    pub ignore_similar: bool,
    /// Percent 0–100; scores at or above it are "similar".
    #[serde(default = "default_similar_threshold")]
    pub ignore_similar_threshold: u8,
    /// Also suppress candidates similar to `ignoreDomains` entries.
    #[serde(default)]
    pub ignore_similar_ignored_domains: bool,

    /// Concurrent URL tasks, 1–50.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_sites: usize,
    /// URLs processed before a forced browser restart.
    #[serde(default = "default_cleanup_interval")]
    pub resource_cleanup_interval: usize,

    /// Delay before WHOIS dispatch, milliseconds.
    #[serde(default = "default_whois_delay")]
    pub whois_delay: u64,
    /// `random` (default) or `cycle`.
    #[serde(default)]
    pub whois_server_mode: Option<String>,

    /// Global document-start injection toggle.
    #[serde(default)]
    pub eval_on_doc: bool,
    /// Global CDP debug channel toggle.
    #[serde(default)]
    pub cdp: Option<CdpSetting>,

    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

impl ScanConfig {
    #[must_use]
    pub fn max_concurrent_sites(&self) -> usize {
        self.max_concurrent_sites.clamp(1, 50)
    }

    #[must_use]
    pub fn resource_cleanup_interval(&self) -> usize {
        self.resource_cleanup_interval.max(1)
    }

    #[must_use]
    pub fn whois_delay(&self) -> Duration {
        Duration::from_millis(self.whois_delay)
    }

    /// Effective `eval_on_doc` for a site (global OR per-site).
    #[must_use]
    pub fn eval_on_doc_for(&self, site: &SiteConfig) -> bool {
        self.eval_on_doc || site.eval_on_doc.unwrap_or(false)
    }

    /// Whether the CDP debug channel is live for a page on `host`.
    #[must_use]
    pub fn cdp_enabled_for(&self, site: &SiteConfig, host: &str) -> bool {
        if let Some(setting) = &self.cdp {
            if setting.applies_to(host) {
                return true;
            }
        }
        site.cdp.as_ref().is_some_and(|s| s.applies_to(host))
    }
}

fn default_true() -> bool {
    true
}

fn default_similar_threshold() -> u8 {
    80
}

fn default_max_concurrent() -> usize {
    6
}

fn default_cleanup_interval() -> usize {
    80
}

fn default_whois_delay() -> u64 {
    3000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_fields_deserialize_both_shapes() {
        let site: SiteConfig = serde_json::from_str(
            r#"{
                "url": ["https://a.test/", "https://b.test/"],
                "filterRegex": "tracker",
                "forcereload": ["cdn.test"],
                "referrer_headers": { "mode": "social_media" },
                "fingerprint_protection": "random",
                "window_cleanup": "realtime"
            }"#,
        )
        .expect("parse");

        assert_eq!(site.urls().len(), 2);
        assert_eq!(site.filter_patterns(), vec!["tracker"]);
        assert!(matches!(site.force_reload, Some(ForceReload::Hosts(_))));
        assert!(matches!(
            site.referrer_headers,
            Some(ReferrerHeaders::Mode { .. })
        ));
        assert!(site.fingerprint_protection.randomized());
        assert!(site.window_cleanup.realtime());
    }

    #[test]
    fn scalar_shapes_also_parse() {
        let site: SiteConfig = serde_json::from_str(
            r#"{
                "url": "https://a.test/",
                "forcereload": true,
                "referrer_headers": "https://ref.test/",
                "fingerprint_protection": true,
                "window_cleanup": true
            }"#,
        )
        .expect("parse");

        assert_eq!(site.urls(), vec!["https://a.test/"]);
        assert!(site.force_reload.unwrap().applies_to("anything.test"));
        assert!(site.fingerprint_protection.enabled());
        assert!(!site.fingerprint_protection.randomized());
        assert!(site.window_cleanup.enabled());
    }

    #[test]
    fn party_defaults_are_permissive() {
        let site: SiteConfig =
            serde_json::from_str(r#"{ "url": "https://a.test/" }"#).expect("parse");
        assert!(site.first_party);
        assert!(site.third_party);
        assert!(site.follow_redirects);
        assert_eq!(site.reload_count(), 1);
        assert_eq!(site.max_redirects(), 10);
        assert_eq!(site.dig_record_type(), "A");
    }

    #[test]
    fn global_defaults_and_clamps() {
        let config: ScanConfig = serde_json::from_str(r#"{ "sites": [] }"#).expect("parse");
        assert_eq!(config.ignore_similar_threshold, 80);
        assert_eq!(config.max_concurrent_sites(), 6);
        assert_eq!(config.resource_cleanup_interval(), 80);
        assert_eq!(config.whois_delay(), Duration::from_millis(3000));

        let config: ScanConfig =
            serde_json::from_str(r#"{ "max_concurrent_sites": 500, "sites": [] }"#)
                .expect("parse");
        assert_eq!(config.max_concurrent_sites(), 50);
    }

    #[test]
    fn force_reload_host_suffix_semantics() {
        let fr = ForceReload::Hosts(vec!["cdn.test".to_string()]);
        assert!(fr.applies_to("cdn.test"));
        assert!(fr.applies_to("img.cdn.test"));
        assert!(!fr.applies_to("other.test"));
        assert!(!ForceReload::Flag(false).applies_to("cdn.test"));
    }
}
