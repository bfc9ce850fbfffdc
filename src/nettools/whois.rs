//! `whois` adapter with server rotation, retry escalation, and TLD
//! fallback servers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;

use super::{run_tool, ToolError};
use crate::cache::SmartCache;

/// How a server is chosen from a configured list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhoisServerMode {
    #[default]
    Random,
    Cycle,
}

impl WhoisServerMode {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "cycle" => Self::Cycle,
            _ => Self::Random,
        }
    }
}

/// Picks a server per lookup; `Cycle` mode keeps a process-wide cursor.
#[derive(Debug, Default)]
pub struct WhoisServerPicker {
    cursor: AtomicUsize,
}

impl WhoisServerPicker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pick<'a>(&self, servers: &'a [String], mode: WhoisServerMode) -> Option<&'a str> {
        if servers.is_empty() {
            return None;
        }
        let idx = match mode {
            WhoisServerMode::Random => rand::rng().random_range(0..servers.len()),
            WhoisServerMode::Cycle => self.cursor.fetch_add(1, Ordering::Relaxed) % servers.len(),
        };
        Some(servers[idx].as_str())
    }
}

#[derive(Debug, Clone)]
pub struct WhoisOptions {
    pub servers: Vec<String>,
    pub server_mode: WhoisServerMode,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Each retry multiplies the previous timeout by this factor.
    pub timeout_multiplier: f64,
    /// Fall back to the TLD-specific registry server when the configured
    /// servers keep failing.
    pub use_fallback: bool,
    pub bypass_cache: bool,
}

impl Default for WhoisOptions {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            server_mode: WhoisServerMode::Random,
            timeout: Duration::from_secs(15),
            max_retries: 2,
            timeout_multiplier: 1.5,
            use_fallback: true,
            bypass_cache: false,
        }
    }
}

/// Registry servers for common TLDs, used when `use_fallback` is set.
fn fallback_server(domain: &str) -> Option<&'static str> {
    let tld = domain.rsplit('.').next()?;
    let server = match tld {
        "com" | "net" => "whois.verisign-grs.com",
        "org" => "whois.pir.org",
        "info" => "whois.nic.info",
        "io" => "whois.nic.io",
        "co" => "whois.nic.co",
        "uk" => "whois.nic.uk",
        "de" => "whois.denic.de",
        "fr" => "whois.nic.fr",
        "nl" => "whois.domain-registry.nl",
        "eu" => "whois.eu",
        "us" => "whois.nic.us",
        "tv" => "whois.nic.tv",
        "me" => "whois.nic.me",
        "cc" => "ccwhois.verisign-grs.com",
        "biz" => "whois.nic.biz",
        "xyz" => "whois.nic.xyz",
        _ => return None,
    };
    Some(server)
}

/// Look up a domain, retrying with an escalating timeout. Results land in
/// the smart cache keyed by domain and survive browser restarts.
pub async fn whois_lookup(
    domain: &str,
    opts: &WhoisOptions,
    picker: &WhoisServerPicker,
    cache: &Arc<SmartCache>,
) -> Result<String, ToolError> {
    if let Some(cached) = cache.get_whois(domain, opts.bypass_cache) {
        debug!("whois cache hit for {domain}");
        return Ok(cached);
    }

    let mut timeout = opts.timeout;
    let mut last_err: Option<ToolError> = None;

    for attempt in 0..=opts.max_retries {
        let server = picker.pick(&opts.servers, opts.server_mode);
        match whois_once(domain, server, timeout).await {
            Ok(output) => {
                cache.cache_whois(domain, &output);
                return Ok(output);
            }
            Err(err) => {
                warn!(
                    "whois attempt {}/{} for {domain} failed: {err}",
                    attempt + 1,
                    opts.max_retries + 1
                );
                last_err = Some(err);
                timeout = Duration::from_secs_f64(
                    (timeout.as_secs_f64() * opts.timeout_multiplier).max(1.0),
                );
            }
        }
    }

    if opts.use_fallback {
        if let Some(server) = fallback_server(domain) {
            debug!("whois falling back to {server} for {domain}");
            match whois_once(domain, Some(server), timeout).await {
                Ok(output) => {
                    cache.cache_whois(domain, &output);
                    return Ok(output);
                }
                Err(err) => last_err = Some(err),
            }
        }
    }

    Err(last_err.unwrap_or(ToolError::NonZeroExit {
        tool: "whois",
        code: None,
        stderr: "no attempt executed".to_string(),
    }))
}

async fn whois_once(
    domain: &str,
    server: Option<&str>,
    timeout: Duration,
) -> Result<String, ToolError> {
    let mut args = Vec::new();
    if let Some(server) = server {
        args.push("-h".to_string());
        args.push(server.to_string());
    }
    args.push(domain.to_string());

    let output = run_tool("whois", &args, timeout, None).await?;
    if output.success() && !output.stdout.trim().is_empty() {
        Ok(output.stdout)
    } else {
        Err(ToolError::NonZeroExit {
            tool: "whois",
            code: output.exit_code,
            stderr: if output.stderr.is_empty() {
                "empty whois response".to_string()
            } else {
                output.stderr
            },
        })
    }
}
