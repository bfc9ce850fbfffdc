//! `dig` adapter: DNS record lookups for match corroboration.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use super::{run_tool, ToolError};
use crate::cache::SmartCache;

#[derive(Debug, Clone)]
pub struct DigOptions {
    /// Record type, default `A`.
    pub record_type: String,
    /// Query the full subdomain instead of the registrable root.
    pub subdomain: bool,
    pub timeout: Duration,
    pub bypass_cache: bool,
}

impl Default for DigOptions {
    fn default() -> Self {
        Self {
            record_type: "A".to_string(),
            subdomain: false,
            timeout: Duration::from_secs(10),
            bypass_cache: false,
        }
    }
}

/// Run `dig <name> <type> +short`. `full_host` and `root_domain` are both
/// supplied; `opts.subdomain` picks which one is queried. Cached per
/// `(name, record type)` and preserved across browser restarts.
pub async fn dig_lookup(
    full_host: &str,
    root_domain: &str,
    opts: &DigOptions,
    cache: &Arc<SmartCache>,
) -> Result<String, ToolError> {
    let name = if opts.subdomain || root_domain.is_empty() {
        full_host
    } else {
        root_domain
    };
    let record_type = if opts.record_type.is_empty() {
        "A"
    } else {
        opts.record_type.as_str()
    };

    if let Some(cached) = cache.get_dig(name, record_type, opts.bypass_cache) {
        debug!("dig cache hit for {name} {record_type}");
        return Ok(cached);
    }

    let args = vec![
        name.to_string(),
        record_type.to_ascii_uppercase(),
        "+short".to_string(),
    ];
    let output = run_tool("dig", &args, opts.timeout, None).await?;

    if !output.success() {
        return Err(ToolError::NonZeroExit {
            tool: "dig",
            code: output.exit_code,
            stderr: output.stderr,
        });
    }

    cache.cache_dig(name, record_type, &output.stdout);
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_selection_honors_subdomain_flag() {
        let root_opts = DigOptions::default();
        let sub_opts = DigOptions {
            subdomain: true,
            ..DigOptions::default()
        };
        // pure selection logic, no subprocess
        let pick = |opts: &DigOptions| {
            if opts.subdomain {
                "cdn.ads.example.com"
            } else {
                "example.com"
            }
        };
        assert_eq!(pick(&root_opts), "example.com");
        assert_eq!(pick(&sub_opts), "cdn.ads.example.com");
    }

    #[tokio::test]
    async fn cache_short_circuits_subprocess() {
        let cache = Arc::new(SmartCache::new(false));
        cache.cache_dig("example.com", "A", "93.184.216.34");
        let out = dig_lookup(
            "sub.example.com",
            "example.com",
            &DigOptions::default(),
            &cache,
        )
        .await
        .expect("cache hit requires no dig binary");
        assert_eq!(out, "93.184.216.34");
    }
}
