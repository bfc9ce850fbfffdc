//! Domain parsing and matching utilities.
//!
//! Everything here is pure: registrable-domain extraction backed by the
//! compiled public-suffix list, wildcard ignore matching, and the
//! edit-distance similarity score used for near-duplicate suppression.

use std::collections::HashSet;

use url::{Host, Url};

/// Extract the effective registrable domain from a full URL.
///
/// Returns an empty string for unparseable URLs, IP literals, and hosts
/// whose suffix comes from the private section of the public-suffix list.
/// Callers treat the empty string as "drop silently"; a request we cannot
/// attribute to a domain can never produce a rule.
#[must_use]
pub fn registrable_domain(raw_url: &str) -> String {
    let parsed = match Url::parse(raw_url) {
        Ok(u) => u,
        Err(_) => return String::new(),
    };

    match parsed.host() {
        Some(Host::Domain(host)) => host_registrable(host),
        // IP literals never map to a registrable domain
        Some(Host::Ipv4(_) | Host::Ipv6(_)) | None => String::new(),
    }
}

/// Registrable domain for a bare hostname (no scheme).
#[must_use]
pub fn host_registrable(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return String::new();
    }

    match psl::domain(host.as_bytes()) {
        Some(d) => {
            if d.suffix().typ() == Some(psl::Type::Private) {
                return String::new();
            }
            String::from_utf8_lossy(d.as_bytes()).into_owned()
        }
        None => String::new(),
    }
}

/// Full hostname of a URL, lowercased. Empty string on parse failure.
#[must_use]
pub fn full_host(raw_url: &str) -> String {
    Url::parse(raw_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Match a domain against an ignore pattern.
///
/// Patterns containing `*` become anchored regexes (metacharacters escaped,
/// `*` → `.*`). Patterns without `*` match by suffix, so `ads.net` covers
/// `cdn.ads.net` as well.
#[must_use]
pub fn ignore_match(pattern: &str, domain: &str) -> bool {
    if pattern.contains('*') {
        match regex::Regex::new(&wildcard_to_regex(pattern)) {
            Ok(re) => re.is_match(domain),
            Err(_) => false,
        }
    } else {
        domain.ends_with(pattern)
    }
}

/// Convert a `*`-wildcard ignore pattern into an anchored regex source.
#[must_use]
pub fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for (i, segment) in pattern.split('*').enumerate() {
        if i > 0 {
            out.push_str(".*");
        }
        out.push_str(&regex::escape(segment));
    }
    out.push('$');
    out
}

/// Derive the base label used for similarity scoring: the hostname with a
/// leading `www.` and the public suffix stripped.
///
/// `sub.tracker.co.uk` → `sub.tracker`, `www.ads.example.com` → `ads.example`.
#[must_use]
pub fn base_label(domain: &str) -> String {
    let domain = domain
        .trim_end_matches('.')
        .trim_start_matches("www.")
        .to_ascii_lowercase();
    if domain.is_empty() {
        return String::new();
    }

    if let Some(suffix) = psl::suffix(domain.as_bytes()) {
        let suffix_str = String::from_utf8_lossy(suffix.as_bytes()).into_owned();
        if let Some(stripped) = domain
            .strip_suffix(&suffix_str)
            .and_then(|d| d.strip_suffix('.'))
        {
            return stripped.to_string();
        }
    }

    // Unknown suffix: fall back to chopping the last label
    match domain.rsplit_once('.') {
        Some((head, _tail)) => head.to_string(),
        None => domain,
    }
}

/// Similarity score between two domains, 0–100.
///
/// `100 * (len(longer) - levenshtein(a, b)) / len(longer)`, computed over
/// the base labels and rounded to the nearest integer. A score at or above
/// the configured threshold marks the pair as near-duplicates.
#[must_use]
pub fn similarity(a: &str, b: &str) -> u8 {
    let la = base_label(a);
    let lb = base_label(b);
    if la.is_empty() || lb.is_empty() {
        return 0;
    }
    if la == lb {
        return 100;
    }

    let longer = la.chars().count().max(lb.chars().count());
    let distance = strsim::levenshtein(&la, &lb).min(longer);
    let score = (longer - distance) as f64 * 100.0 / longer as f64;
    score.round() as u8
}

/// Whether a request URL is first-party relative to the task's set of
/// registrable domains (the original target plus every redirect hop).
#[must_use]
pub fn is_first_party(req_url: &str, first_party_set: &HashSet<String>) -> bool {
    let root = registrable_domain(req_url);
    !root.is_empty() && first_party_set.contains(&root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn registrable_collapses_subdomains() {
        assert_eq!(registrable_domain("https://a.b.example.com/x"), "example.com");
        assert_eq!(registrable_domain("https://example.com/"), "example.com");
        assert_eq!(registrable_domain("http://sub.a.co.uk/p?q=1"), "a.co.uk");
    }

    #[test]
    fn registrable_drops_unattributable_hosts() {
        assert_eq!(registrable_domain("not a url"), "");
        assert_eq!(registrable_domain("https://127.0.0.1/x"), "");
        assert_eq!(registrable_domain("https://[::1]/x"), "");
        assert_eq!(registrable_domain("data:text/plain,hi"), "");
    }

    #[test]
    fn registrable_stability_across_subhosts() {
        let root = registrable_domain("https://example.com/");
        for sub in ["https://a.example.com/", "https://x.y.z.example.com/"] {
            assert_eq!(registrable_domain(sub), root);
        }
    }

    #[test]
    fn ignore_suffix_match_without_wildcard() {
        assert!(ignore_match("example.com", "example.com"));
        assert!(ignore_match("example.com", "cdn.example.com"));
        assert!(!ignore_match("example.com", "example.org"));
    }

    #[test]
    fn ignore_wildcard_match() {
        assert!(ignore_match("*.ads.*", "tracker.ads.net"));
        assert!(ignore_match("*.ads.*", "x.ads.example.co.uk"));
        assert!(!ignore_match("*.ads.*", "ads.net"));
        // metacharacters in the pattern are literal
        assert!(ignore_match("a.b*", "a.bcd"));
        assert!(!ignore_match("a.b*", "axbcd"));
    }

    #[test]
    fn base_label_strips_www_and_suffix() {
        assert_eq!(base_label("www.tracker.com"), "tracker");
        assert_eq!(base_label("ads.tracker.co.uk"), "ads.tracker");
        assert_eq!(base_label("tracker.com"), "tracker");
    }

    #[test]
    fn similarity_identity_and_near_misses() {
        assert_eq!(similarity("tracker.com", "tracker.com"), 100);
        assert_eq!(similarity("tracker.com", "www.tracker.net"), 100);
        let score = similarity("tracker1.com", "tracker2.com");
        assert!(score >= 80, "one-char edit should score high, got {score}");
        assert!(similarity("abcdefgh.com", "zzzz.net") < 40);
    }

    #[test]
    fn first_party_membership() {
        let mut set = HashSet::new();
        set.insert("host.test".to_string());
        assert!(is_first_party("https://host.test/tracker.js", &set));
        assert!(is_first_party("https://cdn.host.test/x.png", &set));
        assert!(!is_first_party("https://ads.other/t.js", &set));
    }

    proptest! {
        #[test]
        fn similarity_symmetric_and_bounded(
            a in "[a-z]{1,12}\\.com",
            b in "[a-z]{1,12}\\.net",
        ) {
            let ab = similarity(&a, &b);
            let ba = similarity(&b, &a);
            prop_assert_eq!(ab, ba);
            prop_assert!(ab <= 100);
            prop_assert_eq!(similarity(&a, &a), 100);
        }

        #[test]
        fn wildcard_regex_agrees_with_definition(
            head in "[a-z]{1,8}",
            tail in "[a-z]{1,8}",
        ) {
            let pattern = format!("{head}.*.{tail}");
            let re = regex::Regex::new(&wildcard_to_regex(&pattern)).expect("wildcard regex");
            let matching = format!("{head}.mid.{tail}");
            prop_assert!(re.is_match(&matching));
            let non_matching = format!("x{}", matching);
            prop_assert!(!re.is_match(&non_matching));
        }
    }
}
