//! One launched browser instance and its lifecycle.

use std::path::PathBuf;
use std::process::Command as StdCommand;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::fetch;
use chromiumoxide::Page;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

use super::with_timeout;

/// Page creation budget.
const CREATE_PAGE_TIMEOUT: Duration = Duration::from_secs(30);
/// Budget for enabling request interception on a fresh page.
const INTERCEPT_ENABLE_TIMEOUT: Duration = Duration::from_secs(10);
/// Budget for graceful browser close before giving up.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error message fragments that mean the browser itself is broken, not the
/// page. A task seeing one of these reports `needs_immediate_restart`.
const CRITICAL_MARKERS: &[&str] = &[
    "Protocol error",
    "Target closed",
    "Browser disconnected",
    "Network.enable timed out",
];

#[must_use]
pub fn is_critical_browser_error(message: &str) -> bool {
    CRITICAL_MARKERS.iter().any(|m| message.contains(m))
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// The browser is unusable; the orchestrator must relaunch it.
    #[error("critical browser error: {0}")]
    Critical(String),
    #[error("browser error: {0}")]
    Other(String),
}

impl SessionError {
    fn classify(message: String) -> Self {
        if is_critical_browser_error(&message) {
            Self::Critical(message)
        } else {
            Self::Other(message)
        }
    }
}

/// Find a Chromium-family executable on the system.
///
/// `CHROMIUM_PATH` overrides the probe list; otherwise well-known install
/// locations are checked, then `which`.
pub fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("using browser from CHROMIUM_PATH: {}", path.display());
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH points to a non-existent file: {}",
            path.display()
        );
    }

    let paths: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for path_str in paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("found browser at {}", path.display());
            return Ok(path);
        }
    }

    for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
        if let Ok(output) = StdCommand::new("which").arg(cmd).output() {
            if output.status.success() {
                let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !found.is_empty() {
                    info!("found browser via which: {found}");
                    return Ok(PathBuf::from(found));
                }
            }
        }
    }

    Err(anyhow::anyhow!(
        "no Chromium-family browser found; set CHROMIUM_PATH"
    ))
}

/// A launched browser, its CDP handler task, and the user-data directory
/// it owns. The session is the only writer to that directory.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    user_data_dir: PathBuf,
    headless: bool,
}

impl BrowserSession {
    /// Launch a fresh browser with a unique user-data directory.
    pub async fn launch(headless: bool) -> Result<Self> {
        let chrome_path = find_browser_executable()?;

        let user_data_dir = std::env::temp_dir().join(format!(
            "blockscan-profile-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        ));
        std::fs::create_dir_all(&user_data_dir)
            .context("failed to create user data directory")?;

        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .window_size(1920, 1080)
            .user_data_dir(user_data_dir.clone())
            .chrome_executable(chrome_path);

        if headless {
            builder = builder.headless_mode(HeadlessMode::default());
        } else {
            builder = builder.with_head();
        }

        builder = builder
            .arg("--disk-cache-size=52428800")
            .arg("--media-cache-size=52428800")
            .arg("--disable-extensions")
            .arg("--disable-translate")
            .arg("--disable-sync")
            .arg("--disable-gpu")
            .arg("--mute-audio")
            .arg("--ignore-certificate-errors")
            .arg("--js-flags=--max-old-space-size=512")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-component-update")
            .arg("--disable-breakpad")
            .arg("--disable-hang-monitor")
            .arg("--disable-prompt-on-repost")
            .arg("--disable-client-side-phishing-detection")
            .arg("--disable-popup-blocking")
            .arg("--metrics-recording-only")
            .arg("--password-store=basic")
            .arg("--use-mock-keychain")
            .arg("--hide-scrollbars");

        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        info!(headless, "launching browser");
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("failed to launch browser")?;

        let handler_task = task::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    let msg = e.to_string();
                    // Chrome emits CDP events chromiumoxide cannot decode;
                    // those are noise, not failures.
                    let benign = msg
                        .contains("data did not match any variant of untagged enum Message")
                        || msg.contains("Failed to deserialize WS response");
                    if benign {
                        trace!("suppressed benign CDP decode error: {msg}");
                    } else {
                        tracing::error!("browser handler error: {msg}");
                    }
                }
            }
            debug!("browser handler task finished");
        });

        Ok(Self {
            browser,
            handler_task,
            user_data_dir,
            headless,
        })
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Create a page and enable request interception on it.
    ///
    /// Both steps are bounded; a failure whose message marks the browser
    /// as broken comes back as [`SessionError::Critical`] so the caller
    /// can request an immediate restart.
    pub async fn create_page(&self) -> Result<Page, SessionError> {
        let page = with_timeout(
            async {
                self.browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| anyhow::anyhow!("{e}"))
            },
            CREATE_PAGE_TIMEOUT,
            "page creation",
        )
        .await
        .map_err(|e| SessionError::classify(e.to_string()))?;

        with_timeout(
            async {
                page.execute(fetch::EnableParams::default())
                    .await
                    .map_err(|e| anyhow::anyhow!("{e}"))?;
                Ok(())
            },
            INTERCEPT_ENABLE_TIMEOUT,
            "request interception enable",
        )
        .await
        .map_err(|e| SessionError::classify(e.to_string()))?;

        Ok(page)
    }

    /// Light liveness probe: a page-list round-trip inside `timeout`.
    pub async fn is_responsive(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.browser.pages()).await,
            Ok(Ok(_))
        )
    }

    /// Best-effort close of every open page except at most `keep` blanks.
    /// Losing a race to a page closed elsewhere is fine.
    pub async fn close_surplus_pages(&self, keep: usize) {
        let pages = match self.browser.pages().await {
            Ok(pages) => pages,
            Err(e) => {
                debug!("page sweep skipped: {e}");
                return;
            }
        };
        for page in pages.into_iter().skip(keep) {
            if let Err(e) = page.close().await {
                debug!("page close during sweep failed: {e}");
            }
        }
    }

    /// Graceful teardown: close pages, close the browser, wait for the
    /// process, delete the user-data directory. On a close timeout the
    /// drop impl kills the process group.
    pub async fn shutdown(mut self) {
        debug!("shutting down browser session");

        self.close_surplus_pages(0).await;

        let close_result = tokio::time::timeout(CLOSE_TIMEOUT, async {
            if let Err(e) = self.browser.close().await {
                warn!("browser close failed: {e}");
            }
            if let Err(e) = self.browser.wait().await {
                warn!("browser wait failed: {e}");
            }
        })
        .await;
        if close_result.is_err() {
            warn!("browser did not close within {CLOSE_TIMEOUT:?}; process will be killed on drop");
        }

        self.handler_task.abort();

        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "failed to remove user data dir {}: {e}",
                    self.user_data_dir.display()
                );
            }
        } else {
            debug!("removed user data dir {}", self.user_data_dir.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_error_markers() {
        assert!(is_critical_browser_error("Protocol error (Page.navigate)"));
        assert!(is_critical_browser_error("Target closed"));
        assert!(is_critical_browser_error("Browser disconnected"));
        assert!(is_critical_browser_error("Network.enable timed out"));
        assert!(!is_critical_browser_error("net::ERR_NAME_NOT_RESOLVED"));
        assert!(!is_critical_browser_error("navigation timeout"));
    }

    #[test]
    fn session_error_classification() {
        assert!(matches!(
            SessionError::classify("Target closed".to_string()),
            SessionError::Critical(_)
        ));
        assert!(matches!(
            SessionError::classify("net::ERR_FAILED".to_string()),
            SessionError::Other(_)
        ));
    }
}
