//! Config file loading and validation.
//!
//! Validation failures are startup errors: the binary reports them and
//! exits 1. Nothing here is recoverable at scan time; a pattern that does
//! not compile would otherwise surface mid-run inside the request handler.

use std::path::Path;

use thiserror::Error;
use url::Url;

use super::{ScanConfig, SiteConfig, KNOWN_RESOURCE_TYPES};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config validation failed:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}

/// Load and validate a config document from disk.
pub fn load_config(path: &Path) -> Result<ScanConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: ScanConfig = serde_json::from_str(&raw)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate a parsed config. Collects every problem instead of stopping at
/// the first, so a broken config is fixable in one pass.
pub fn validate_config(config: &ScanConfig) -> Result<(), ConfigError> {
    let mut problems = Vec::new();

    if config.sites.is_empty() {
        problems.push("no sites configured".to_string());
    }
    if config.ignore_similar_threshold > 100 {
        problems.push(format!(
            "ignore_similar_threshold must be 0-100, got {}",
            config.ignore_similar_threshold
        ));
    }
    if !(1..=50).contains(&config.max_concurrent_sites) {
        problems.push(format!(
            "max_concurrent_sites must be 1-50, got {}",
            config.max_concurrent_sites
        ));
    }
    if let Some(mode) = &config.whois_server_mode {
        if !matches!(mode.to_ascii_lowercase().as_str(), "random" | "cycle") {
            problems.push(format!(
                "whois_server_mode must be \"random\" or \"cycle\", got {mode:?}"
            ));
        }
    }
    for pattern in &config.blocked {
        check_regex(pattern, "global blocked", &mut problems);
    }

    for (idx, site) in config.sites.iter().enumerate() {
        validate_site(idx, site, &mut problems);
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(problems))
    }
}

fn validate_site(idx: usize, site: &SiteConfig, problems: &mut Vec<String>) {
    let label = format!("sites[{idx}]");

    let urls = site.urls();
    if urls.is_empty() {
        problems.push(format!("{label}: no URL configured"));
    }
    for url in &urls {
        match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => problems.push(format!(
                "{label}: unsupported URL scheme {:?} in {url}",
                parsed.scheme()
            )),
            Err(e) => problems.push(format!("{label}: invalid URL {url}: {e}")),
        }
    }

    for pattern in site.filter_patterns() {
        check_regex(&pattern, &format!("{label} filterRegex"), problems);
    }
    for pattern in &site.blocked {
        check_regex(pattern, &format!("{label} blocked"), problems);
    }

    if site.regex_and && site.filter_patterns().len() < 2 {
        problems.push(format!(
            "{label}: regex_and set but fewer than two filter patterns"
        ));
    }

    if !site.first_party && !site.third_party {
        // not fatal: the task is skipped at run time, but worth flagging
        log::warn!("{label}: both firstParty and thirdParty disabled; its URLs will be skipped");
    }

    if let Some(types) = &site.resource_types {
        for t in types {
            if !KNOWN_RESOURCE_TYPES.contains(&t.to_ascii_lowercase().as_str()) {
                problems.push(format!("{label}: unknown resource type {t:?}"));
            }
        }
    }

    if let Some(mult) = site.whois_timeout_multiplier {
        if mult < 1.0 {
            problems.push(format!(
                "{label}: whois_timeout_multiplier must be >= 1.0, got {mult}"
            ));
        }
    }

    if let Some(agent) = &site.user_agent {
        const ALIASES: &[&str] = &[
            "chrome",
            "chrome_mac",
            "chrome_linux",
            "firefox",
            "firefox_mac",
            "firefox_linux",
            "safari",
        ];
        if !ALIASES.contains(&agent.as_str()) {
            problems.push(format!("{label}: unknown userAgent alias {agent:?}"));
        }
    }
}

fn check_regex(pattern: &str, context: &str, problems: &mut Vec<String>) {
    if let Err(e) = regex::Regex::new(pattern) {
        problems.push(format!("{context}: bad pattern {pattern:?}: {e}"));
    }
}
