//! Identity spoofing: user-agent aliases, client-hint headers, Brave
//! spoofing, and fingerprint protection.

use anyhow::Result;
use chromiumoxide::cdp::browser_protocol::emulation::SetTimezoneOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::Page;
use rand::Rng;
use tracing::debug;

use crate::config::SiteConfig;

use super::setup::add_init_script;

/// A user-agent alias: the UA string, the `navigator.platform` value, and
/// the Sec-CH-UA brand list for Chromium variants.
struct UserAgentSpec {
    user_agent: &'static str,
    navigator_platform: &'static str,
    /// `(Sec-CH-UA, Sec-CH-UA-Platform)`, Chromium-family only.
    client_hints: Option<(&'static str, &'static str)>,
}

fn user_agent_spec(alias: &str) -> Option<UserAgentSpec> {
    const CHROME_BRANDS: &str =
        "\"Chromium\";v=\"126\", \"Google Chrome\";v=\"126\", \"Not-A.Brand\";v=\"8\"";
    let spec = match alias {
        "chrome" => UserAgentSpec {
            user_agent:
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
            navigator_platform: "Win32",
            client_hints: Some((CHROME_BRANDS, "\"Windows\"")),
        },
        "chrome_mac" => UserAgentSpec {
            user_agent:
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
            navigator_platform: "MacIntel",
            client_hints: Some((CHROME_BRANDS, "\"macOS\"")),
        },
        "chrome_linux" => UserAgentSpec {
            user_agent:
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
            navigator_platform: "Linux x86_64",
            client_hints: Some((CHROME_BRANDS, "\"Linux\"")),
        },
        "firefox" => UserAgentSpec {
            user_agent:
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
            navigator_platform: "Win32",
            client_hints: None,
        },
        "firefox_mac" => UserAgentSpec {
            user_agent:
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:127.0) Gecko/20100101 Firefox/127.0",
            navigator_platform: "MacIntel",
            client_hints: None,
        },
        "firefox_linux" => UserAgentSpec {
            user_agent:
                "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0",
            navigator_platform: "Linux x86_64",
            client_hints: None,
        },
        "safari" => UserAgentSpec {
            user_agent:
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
            navigator_platform: "MacIntel",
            client_hints: None,
        },
        _ => return None,
    };
    Some(spec)
}

/// Values exposed by the fingerprint-protection script.
#[derive(Debug, Clone)]
pub struct FingerprintProfile {
    pub device_memory: u32,
    pub hardware_concurrency: u32,
    pub screen_width: u32,
    pub screen_height: u32,
    pub color_depth: u32,
    pub platform: String,
    pub timezone: String,
}

impl FingerprintProfile {
    /// The fixed defaults used when `fingerprint_protection: true`.
    #[must_use]
    pub fn fixed() -> Self {
        Self {
            device_memory: 8,
            hardware_concurrency: 8,
            screen_width: 1920,
            screen_height: 1080,
            color_depth: 24,
            platform: "Win32".to_string(),
            timezone: "America/New_York".to_string(),
        }
    }

    /// Randomized values for `fingerprint_protection: "random"`.
    #[must_use]
    pub fn randomized() -> Self {
        let mut rng = rand::rng();
        let memories = [4u32, 8, 16, 32];
        let cores = [4u32, 8, 12, 16];
        let screens = [(1920u32, 1080u32), (2560, 1440), (1680, 1050), (1440, 900)];
        let platforms = ["Win32", "MacIntel", "Linux x86_64"];
        let timezones = [
            "America/New_York",
            "America/Chicago",
            "America/Los_Angeles",
            "Europe/London",
            "Europe/Berlin",
            "Australia/Sydney",
        ];

        let (screen_width, screen_height) = screens[rng.random_range(0..screens.len())];
        Self {
            device_memory: memories[rng.random_range(0..memories.len())],
            hardware_concurrency: cores[rng.random_range(0..cores.len())],
            screen_width,
            screen_height,
            color_depth: 24,
            platform: platforms[rng.random_range(0..platforms.len())].to_string(),
            timezone: timezones[rng.random_range(0..timezones.len())].to_string(),
        }
    }

    fn script(&self) -> String {
        format!(
            r"
            Object.defineProperty(navigator, 'deviceMemory', {{ get: () => {mem} }});
            Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => {cores} }});
            Object.defineProperty(navigator, 'platform', {{ get: () => '{platform}' }});
            Object.defineProperty(screen, 'width', {{ get: () => {w} }});
            Object.defineProperty(screen, 'height', {{ get: () => {h} }});
            Object.defineProperty(screen, 'colorDepth', {{ get: () => {depth} }});
            ",
            mem = self.device_memory,
            cores = self.hardware_concurrency,
            platform = self.platform,
            w = self.screen_width,
            h = self.screen_height,
            depth = self.color_depth,
        )
    }
}

const BRAVE_SPOOF_SCRIPT: &str = r"
    if (!navigator.brave) {
        Object.defineProperty(navigator, 'brave', {
            get: () => ({ isBrave: () => Promise.resolve(true) })
        });
    }
";

/// Apply the site's identity settings to a fresh page: UA override,
/// client-hint headers for Chrome variants, Brave spoof, and fingerprint
/// protection. All steps are best-effort except the UA override itself.
pub async fn apply_identity(page: &Page, site: &SiteConfig) -> Result<()> {
    if let Some(alias) = &site.user_agent {
        let Some(spec) = user_agent_spec(alias) else {
            // validated at load; stale alias means a config edit mid-run
            debug!("unknown userAgent alias {alias}, skipping override");
            return Ok(());
        };

        page.execute(SetUserAgentOverrideParams {
            user_agent: spec.user_agent.to_string(),
            accept_language: Some("en-US,en;q=0.9".to_string()),
            platform: Some(spec.navigator_platform.to_string()),
            user_agent_metadata: None,
        })
        .await?;

        if let Some((brands, platform)) = spec.client_hints {
            let headers = serde_json::json!({
                "Sec-CH-UA": brands,
                "Sec-CH-UA-Mobile": "?0",
                "Sec-CH-UA-Platform": platform,
            });
            if let Err(e) = page
                .execute(SetExtraHttpHeadersParams {
                    headers: Headers::new(headers),
                })
                .await
            {
                debug!("failed to set client-hint headers: {e}");
            }
        }
    }

    if site.is_brave {
        if let Err(e) = add_init_script(page, BRAVE_SPOOF_SCRIPT).await {
            debug!("brave spoof injection failed: {e}");
        }
    }

    if site.fingerprint_protection.enabled() {
        let profile = if site.fingerprint_protection.randomized() {
            FingerprintProfile::randomized()
        } else {
            FingerprintProfile::fixed()
        };
        if let Err(e) = add_init_script(page, &profile.script()).await {
            debug!("fingerprint script injection failed: {e}");
        }
        if let Err(e) = page
            .execute(SetTimezoneOverrideParams {
                timezone_id: profile.timezone.clone(),
            })
            .await
        {
            debug!("timezone override failed: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_seven_aliases_resolve() {
        for alias in [
            "chrome",
            "chrome_mac",
            "chrome_linux",
            "firefox",
            "firefox_mac",
            "firefox_linux",
            "safari",
        ] {
            assert!(user_agent_spec(alias).is_some(), "missing alias {alias}");
        }
        assert!(user_agent_spec("netscape").is_none());
    }

    #[test]
    fn client_hints_only_for_chromium_family() {
        assert!(user_agent_spec("chrome").unwrap().client_hints.is_some());
        assert!(user_agent_spec("chrome_mac").unwrap().client_hints.is_some());
        assert!(user_agent_spec("firefox").unwrap().client_hints.is_none());
        assert!(user_agent_spec("safari").unwrap().client_hints.is_none());
    }

    #[test]
    fn client_hint_platform_matches_ua() {
        let spec = user_agent_spec("chrome_linux").unwrap();
        assert!(spec.user_agent.contains("Linux"));
        assert_eq!(spec.client_hints.unwrap().1, "\"Linux\"");
    }

    #[test]
    fn randomized_profile_stays_in_pools() {
        for _ in 0..10 {
            let p = FingerprintProfile::randomized();
            assert!([4, 8, 16, 32].contains(&p.device_memory));
            assert!([4, 8, 12, 16].contains(&p.hardware_concurrency));
            assert_eq!(p.color_depth, 24);
            assert!(!p.timezone.is_empty());
        }
    }

    #[test]
    fn fingerprint_script_embeds_values() {
        let profile = FingerprintProfile::fixed();
        let script = profile.script();
        assert!(script.contains("deviceMemory"));
        assert!(script.contains("'Win32'"));
        assert!(script.contains("1920"));
    }
}
