//! Browser session management: launch, page creation with interception,
//! health probing, teardown, and temp-profile sweeping.

mod session;
mod sweep;

pub use session::{
    find_browser_executable, is_critical_browser_error, BrowserSession, SessionError,
};
pub use sweep::sweep_chromium_temp_dirs;

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

/// Wrap a browser operation with an explicit deadline.
///
/// Prevents indefinite hangs on navigation, CDP round-trips, and page
/// creation. The error message distinguishes timeout from operation
/// failure so the caller can classify it.
pub async fn with_timeout<F, T>(operation: F, timeout: Duration, name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("{name} timed out after {timeout:?}")),
    }
}
