//! `curl` adapter: body fetches for content matching.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use super::{run_tool, ToolError};
use crate::cache::{CachedResponse, SmartCache};

/// Marker separating the body from the `--write-out` trailer. Unlikely to
/// appear in real content; the last occurrence wins if it does.
const WRITE_OUT_MARKER: &str = "\n__BLOCKSCAN_META__ ";

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct CurlOptions {
    pub timeout: Duration,
    pub max_redirects: u32,
    pub referer: Option<String>,
    pub custom_headers: Vec<(String, String)>,
    pub user_agent: Option<String>,
    /// Site-level `bypass_cache`; skips both cache read and write.
    pub bypass_cache: bool,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            referer: None,
            custom_headers: Vec::new(),
            user_agent: None,
            bypass_cache: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CurlResult {
    pub body: String,
    pub http_code: u16,
    pub content_type: String,
    pub size: usize,
    pub ok: bool,
}

/// GET a URL through the system `curl` with browser-mimicking headers,
/// consulting and feeding the smart cache.
pub async fn curl_fetch(
    url: &str,
    opts: &CurlOptions,
    cache: &Arc<SmartCache>,
) -> Result<CurlResult, ToolError> {
    if let Some(cached) = cache.get_response(url, opts.bypass_cache) {
        debug!("curl cache hit for {url}");
        let size = cached.body.len();
        return Ok(CurlResult {
            ok: (200..400).contains(&cached.status),
            body: cached.body,
            http_code: cached.status,
            content_type: cached.content_type,
            size,
        });
    }

    let args = build_args(url, opts);
    let output = run_tool("curl", &args, opts.timeout + Duration::from_secs(2), None).await?;

    let (body, http_code, content_type, size) = parse_write_out(&output.stdout);
    let ok = output.success() && (200..400).contains(&http_code);

    if ok {
        cache.cache_response(
            url,
            CachedResponse {
                body: body.clone(),
                status: http_code,
                content_type: content_type.clone(),
            },
            opts.bypass_cache,
        );
    }

    Ok(CurlResult {
        body,
        http_code,
        content_type,
        size,
        ok,
    })
}

fn build_args(url: &str, opts: &CurlOptions) -> Vec<String> {
    let mut args = vec![
        "-s".to_string(),
        "-L".to_string(),
        "--max-time".to_string(),
        opts.timeout.as_secs().max(1).to_string(),
        "--max-redirs".to_string(),
        opts.max_redirects.to_string(),
        "--fail-with-body".to_string(),
        "--compressed".to_string(),
        "--write-out".to_string(),
        format!("{WRITE_OUT_MARKER}%{{http_code}} %{{content_type}} %{{size_download}}"),
        "-H".to_string(),
        format!("Accept: {BROWSER_ACCEPT}"),
        "-H".to_string(),
        "Accept-Language: en-US,en;q=0.9".to_string(),
        "-A".to_string(),
        opts.user_agent.clone().unwrap_or_else(|| BROWSER_UA.to_string()),
    ];
    if let Some(referer) = &opts.referer {
        args.push("--referer".to_string());
        args.push(referer.clone());
    }
    for (name, value) in &opts.custom_headers {
        args.push("-H".to_string());
        args.push(format!("{name}: {value}"));
    }
    args.push(url.to_string());
    args
}

fn parse_write_out(stdout: &str) -> (String, u16, String, usize) {
    match stdout.rsplit_once(WRITE_OUT_MARKER) {
        Some((body, meta)) => {
            let mut fields = meta.split_whitespace();
            let http_code = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
            let content_type = fields.next().unwrap_or("").to_string();
            let size = fields.next().and_then(|s| s.parse().ok()).unwrap_or(body.len());
            (body.to_string(), http_code, content_type, size)
        }
        None => (stdout.to_string(), 0, String::new(), stdout.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_contract_flags() {
        let opts = CurlOptions {
            referer: Some("https://ref.test/".into()),
            custom_headers: vec![("X-Probe".into(), "1".into())],
            ..CurlOptions::default()
        };
        let args = build_args("https://host.test/x.js", &opts);
        for flag in [
            "-s",
            "-L",
            "--max-time",
            "--max-redirs",
            "--fail-with-body",
            "--compressed",
            "--write-out",
            "--referer",
        ] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}");
        }
        assert!(args.contains(&"X-Probe: 1".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://host.test/x.js"));
    }

    #[test]
    fn write_out_trailer_parses() {
        let stdout = format!("<html>body</html>{WRITE_OUT_MARKER}200 text/html 17");
        let (body, code, ctype, size) = parse_write_out(&stdout);
        assert_eq!(body, "<html>body</html>");
        assert_eq!(code, 200);
        assert_eq!(ctype, "text/html");
        assert_eq!(size, 17);
    }

    #[test]
    fn missing_trailer_degrades_gracefully() {
        let (body, code, _, _) = parse_write_out("partial output");
        assert_eq!(body, "partial output");
        assert_eq!(code, 0);
    }
}
