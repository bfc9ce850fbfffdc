//! Config document loading and validation against a realistic document.

use std::io::Write;

use blockscan::config::{load_config, validate_config, ScanConfig};

const FULL_CONFIG: &str = r##"{
    "ignoreDomains": ["example.com", "*.ads.*"],
    "blocked": ["doubleverify"],
    "ignore_similar": true,
    "ignore_similar_threshold": 85,
    "max_concurrent_sites": 4,
    "resource_cleanup_interval": 40,
    "whois_delay": 1500,
    "whois_server_mode": "cycle",
    "sites": [
        {
            "url": ["https://news.test/", "https://shop.test/"],
            "filterRegex": ["tracker", "\\.js$"],
            "regex_and": true,
            "blocked": ["^https://cdn\\.internal\\."],
            "css_blocked": ["#cookie-banner", ".modal-overlay"],
            "resourceTypes": ["script", "xhr", "fetch"],
            "firstParty": false,
            "thirdParty": true,
            "searchstring": ["adsbygoogle"],
            "searchstring_and": ["alpha", "beta"],
            "curl": true,
            "grep": false,
            "whois": ["registrar"],
            "whois-or": ["privacy", "redacted"],
            "whois_server": ["whois.first.test", "whois.second.test"],
            "dig": ["cname"],
            "digRecordType": "CNAME",
            "delay": 2000,
            "reload": 2,
            "forcereload": ["cdn.news.test"],
            "follow_redirects": true,
            "max_redirects": 5,
            "cloudflare_bypass": true,
            "userAgent": "chrome_linux",
            "isBrave": true,
            "fingerprint_protection": "random",
            "interact": true,
            "even_blocked": true,
            "bypass_cache": false,
            "referrer_headers": { "mode": "social_media" },
            "custom_headers": { "X-Scan": "1" },
            "window_cleanup": "realtime"
        },
        {
            "url": "https://minimal.test/",
            "filterRegex": "beacon"
        }
    ]
}"##;

#[test]
fn full_document_round_trips() {
    let config: ScanConfig = serde_json::from_str(FULL_CONFIG).expect("parse");
    validate_config(&config).expect("validate");

    assert_eq!(config.ignore_domains.len(), 2);
    assert_eq!(config.max_concurrent_sites(), 4);
    assert_eq!(config.resource_cleanup_interval(), 40);

    let site = &config.sites[0];
    assert_eq!(site.urls().len(), 2);
    assert!(site.regex_and);
    assert!(!site.first_party && site.third_party);
    assert!(site.has_search_strings());
    assert!(site.has_whois_terms());
    assert!(site.has_dig_terms());
    assert_eq!(site.dig_record_type(), "CNAME");
    assert_eq!(site.reload_count(), 2);
    assert_eq!(site.max_redirects(), 5);
    assert!(site.fingerprint_protection.randomized());
    assert!(site.window_cleanup.realtime());
    assert!(site.even_blocked);

    let minimal = &config.sites[1];
    assert!(minimal.first_party && minimal.third_party);
    assert_eq!(minimal.reload_count(), 1);
}

#[test]
fn load_config_from_disk_and_reject_bad_json() {
    let dir = tempfile::tempdir().expect("tempdir");

    let good = dir.path().join("good.json");
    std::fs::File::create(&good)
        .and_then(|mut f| f.write_all(FULL_CONFIG.as_bytes()))
        .expect("write good config");
    assert!(load_config(&good).is_ok());

    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{ not json").expect("write bad config");
    assert!(load_config(&bad).is_err());
}

#[test]
fn validation_failure_lists_every_problem() {
    let broken = r#"{
        "ignore_similar_threshold": 150,
        "whois_server_mode": "roundrobin",
        "sites": [
            { "url": "https://a.test/", "filterRegex": "(unclosed" }
        ]
    }"#;
    let config: ScanConfig = serde_json::from_str(broken).expect("parse");
    let err = validate_config(&config).expect_err("must fail");
    let message = err.to_string();
    assert!(message.contains("ignore_similar_threshold"));
    assert!(message.contains("whois_server_mode"));
    assert!(message.contains("unclosed"));
}
