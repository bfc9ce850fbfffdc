//! Output syntaxes for blocking rules.

use std::collections::BTreeSet;
use std::fmt;

/// The seven rule syntaxes selectable from the CLI. Exactly one is active
/// per run; `hosts-local` carries its redirect IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    /// `||domain^`
    Adblock,
    /// `||domain^$<resource-type-csv>`
    AdblockRules,
    /// `<ip> domain`
    HostsLocal { ip: String },
    /// bare `domain`
    Plain,
    /// `local=/domain/`
    Dnsmasq,
    /// `server=/domain/`
    DnsmasqOld,
    /// `local-zone: "domain." always_null`
    Unbound,
    /// `{ +block } .domain`
    Privoxy,
    /// `(^|\.)domain$` regex form
    Pihole,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Adblock
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Adblock => "adblock",
            Self::AdblockRules => "adblock-rules",
            Self::HostsLocal { .. } => "hosts-local",
            Self::Plain => "plain",
            Self::Dnsmasq => "dnsmasq",
            Self::DnsmasqOld => "dnsmasq-old",
            Self::Unbound => "unbound",
            Self::Privoxy => "privoxy",
            Self::Pihole => "pihole",
        };
        f.write_str(name)
    }
}

impl OutputFormat {
    /// Default redirect IP for hosts-file output.
    pub const DEFAULT_HOSTS_IP: &'static str = "127.0.0.1";

    /// Render the rule lines for one domain.
    ///
    /// Every mode emits exactly one line except `adblock-rules`, which
    /// attaches the observed resource types as `$` modifiers (and falls
    /// back to the bare adblock form when none were recorded).
    #[must_use]
    pub fn format_domain(&self, domain: &str, resource_types: &BTreeSet<String>) -> Vec<String> {
        match self {
            Self::Adblock => vec![format!("||{domain}^")],
            Self::AdblockRules => {
                if resource_types.is_empty() {
                    vec![format!("||{domain}^")]
                } else {
                    let csv = resource_types
                        .iter()
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .join(",");
                    vec![format!("||{domain}^${csv}")]
                }
            }
            Self::HostsLocal { ip } => vec![format!("{ip} {domain}")],
            Self::Plain => vec![domain.to_string()],
            Self::Dnsmasq => vec![format!("local=/{domain}/")],
            Self::DnsmasqOld => vec![format!("server=/{domain}/")],
            Self::Unbound => vec![format!("local-zone: \"{domain}.\" always_null")],
            Self::Privoxy => vec![format!("{{ +block }} .{domain}")],
            Self::Pihole => vec![format!("(^|\\.){}$", regex::escape(domain))],
        }
    }

    /// Whether a line is syntactically valid for this format
    /// (`--validate-rules`). Comment lines are always accepted.
    #[must_use]
    pub fn line_is_valid(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() || line.starts_with('!') || line.starts_with('#') {
            return true;
        }
        match self {
            Self::Adblock => line
                .strip_prefix("||")
                .and_then(|rest| rest.strip_suffix('^'))
                .is_some_and(domain_is_plausible),
            Self::AdblockRules => {
                let Some(rest) = line.strip_prefix("||") else {
                    return false;
                };
                let body = rest.split_once('$').map_or(rest, |(head, _)| head);
                body.strip_suffix('^').is_some_and(domain_is_plausible)
            }
            Self::HostsLocal { .. } => {
                let mut parts = line.split_whitespace();
                matches!(
                    (parts.next(), parts.next(), parts.next()),
                    (Some(ip), Some(domain), None)
                        if ip.parse::<std::net::IpAddr>().is_ok() && domain_is_plausible(domain)
                )
            }
            Self::Plain => domain_is_plausible(line),
            Self::Dnsmasq => strip_wrapped(line, "local=/", "/").is_some_and(domain_is_plausible),
            Self::DnsmasqOld => {
                strip_wrapped(line, "server=/", "/").is_some_and(domain_is_plausible)
            }
            Self::Unbound => strip_wrapped(line, "local-zone: \"", ".\" always_null")
                .is_some_and(domain_is_plausible),
            Self::Privoxy => strip_wrapped(line, "{ +block } .", "").is_some_and(domain_is_plausible),
            Self::Pihole => {
                strip_wrapped(line, "(^|\\.)", "$").is_some_and(|inner| {
                    domain_is_plausible(&inner.replace("\\.", "."))
                })
            }
        }
    }
}

/// Convenience wrapper used by the writer.
#[must_use]
pub fn format_domain(
    format: &OutputFormat,
    domain: &str,
    resource_types: &BTreeSet<String>,
) -> Vec<String> {
    format.format_domain(domain, resource_types)
}

fn strip_wrapped<'a>(line: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_suffix(suffix)
}

fn domain_is_plausible(domain: &str) -> bool {
    !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
}
