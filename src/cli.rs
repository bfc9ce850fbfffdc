//! Command-line surface.

use std::path::PathBuf;

use clap::Parser;

use crate::rules::{OutputFormat, OutputOptions};

#[derive(Debug, Parser)]
#[command(
    name = "blockscan",
    about = "Drive headless browsers over target URLs and emit domain-blocking rules",
    version
)]
pub struct Cli {
    /// Path to the JSON config document.
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Write rules to this file instead of logs/adblock_rules_<ts>.txt.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Open the output file for append instead of truncate.
    #[arg(long)]
    pub append: bool,

    /// Emit only rules absent from this baseline file.
    #[arg(long, value_name = "FILE")]
    pub compare: Option<PathBuf>,

    /// Hosts-file output; optionally override the redirect IP.
    #[arg(long, value_name = "IP", num_args = 0..=1, default_missing_value = "127.0.0.1")]
    pub localhost: Option<String>,

    /// Bare domain output.
    #[arg(long)]
    pub plain: bool,

    /// dnsmasq `local=/domain/` output.
    #[arg(long)]
    pub dnsmasq: bool,

    /// Legacy dnsmasq `server=/domain/` output.
    #[arg(long = "dnsmasq-old")]
    pub dnsmasq_old: bool,

    /// Unbound `local-zone` output.
    #[arg(long)]
    pub unbound: bool,

    /// Privoxy action output.
    #[arg(long)]
    pub privoxy: bool,

    /// Pi-hole regex output.
    #[arg(long)]
    pub pihole: bool,

    /// Adblock output with resource-type modifiers.
    #[arg(long = "adblock-rules")]
    pub adblock_rules: bool,

    /// Emit full subdomains instead of registrable roots.
    #[arg(long = "sub-domains")]
    pub sub_domains: bool,

    /// Remove duplicate rule lines, keeping the first occurrence.
    #[arg(long = "remove-dupes")]
    pub remove_dupes: bool,

    /// Prepend `! <source-url>` before each task's rules.
    #[arg(long)]
    pub titles: bool,

    /// Log every observed request URL, matched or not.
    #[arg(long)]
    pub dumpurls: bool,

    /// Run the full pipeline but print a summary instead of rule files.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Override max_concurrent_sites (1-50).
    #[arg(long = "max-concurrent", value_name = "N")]
    pub max_concurrent: Option<usize>,

    /// Override resource_cleanup_interval.
    #[arg(long = "cleanup-interval", value_name = "N")]
    pub cleanup_interval: Option<usize>,

    /// Wipe all smart-cache categories at startup.
    #[arg(long = "clear-cache")]
    pub clear_cache: bool,

    /// Treat every cache read as a miss (writes still happen).
    #[arg(long = "ignore-cache")]
    pub ignore_cache: bool,

    /// Cache HTTP response bodies for content matching.
    #[arg(long = "cache-requests")]
    pub cache_requests: bool,

    /// Run the browser with a visible window.
    #[arg(long)]
    pub headful: bool,

    /// Disable page interactions regardless of site config.
    #[arg(long = "no-interact")]
    pub no_interact: bool,

    /// Parse and validate the config, then exit.
    #[arg(long = "validate-config")]
    pub validate_config: bool,

    /// Validate a rules file against the active output grammar, then
    /// exit. Defaults to the --output file.
    #[arg(long = "validate-rules", value_name = "FILE", num_args = 0..=1)]
    pub validate_rules: Option<Option<PathBuf>>,

    /// Deduplicate a rules file in place (atomic rewrite), then exit.
    /// Defaults to the --output file.
    #[arg(long = "clean-rules", value_name = "FILE", num_args = 0..=1)]
    pub clean_rules: Option<Option<PathBuf>>,

    /// Gzip the log files when the run finishes.
    #[arg(long = "compress-logs")]
    pub compress_logs: bool,

    /// Errors only.
    #[arg(long, conflicts_with_all = ["verbose", "debug"])]
    pub silent: bool,

    /// Per-request diagnostics on the console.
    #[arg(long, conflicts_with = "debug")]
    pub verbose: bool,

    /// Full diagnostics plus the debug request log and hang detector.
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Resolve the active output format; the flags are checked in a fixed
    /// priority order so combining them is harmless.
    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        if let Some(ip) = &self.localhost {
            return OutputFormat::HostsLocal { ip: ip.clone() };
        }
        if self.plain {
            OutputFormat::Plain
        } else if self.dnsmasq {
            OutputFormat::Dnsmasq
        } else if self.dnsmasq_old {
            OutputFormat::DnsmasqOld
        } else if self.unbound {
            OutputFormat::Unbound
        } else if self.privoxy {
            OutputFormat::Privoxy
        } else if self.pihole {
            OutputFormat::Pihole
        } else if self.adblock_rules {
            OutputFormat::AdblockRules
        } else {
            OutputFormat::Adblock
        }
    }

    #[must_use]
    pub fn output_options(&self) -> OutputOptions {
        OutputOptions {
            format: self.output_format(),
            show_titles: self.titles,
            remove_dupes: self.remove_dupes,
            compare_file: self.compare.clone(),
            append: self.append,
        }
    }

    /// Console log filter for the chosen verbosity.
    #[must_use]
    pub fn log_filter(&self) -> &'static str {
        if self.silent {
            "error"
        } else if self.debug {
            "debug"
        } else if self.verbose {
            "info,blockscan=debug"
        } else {
            "info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("blockscan").chain(args.iter().copied()))
            .expect("args parse")
    }

    #[test]
    fn default_format_is_adblock() {
        let cli = parse(&["scan.json"]);
        assert_eq!(cli.output_format(), OutputFormat::Adblock);
    }

    #[test]
    fn localhost_flag_with_and_without_ip() {
        let cli = parse(&["scan.json", "--localhost"]);
        assert_eq!(
            cli.output_format(),
            OutputFormat::HostsLocal {
                ip: "127.0.0.1".into()
            }
        );
        let cli = parse(&["scan.json", "--localhost", "0.0.0.0"]);
        assert_eq!(
            cli.output_format(),
            OutputFormat::HostsLocal {
                ip: "0.0.0.0".into()
            }
        );
    }

    #[test]
    fn format_flags_resolve() {
        assert_eq!(parse(&["c.json", "--plain"]).output_format(), OutputFormat::Plain);
        assert_eq!(
            parse(&["c.json", "--dnsmasq-old"]).output_format(),
            OutputFormat::DnsmasqOld
        );
        assert_eq!(
            parse(&["c.json", "--adblock-rules"]).output_format(),
            OutputFormat::AdblockRules
        );
        assert_eq!(parse(&["c.json", "--pihole"]).output_format(), OutputFormat::Pihole);
    }

    #[test]
    fn clean_rules_optional_value() {
        let cli = parse(&["c.json", "--clean-rules"]);
        assert_eq!(cli.clean_rules, Some(None));
        let cli = parse(&["c.json", "--clean-rules", "rules.txt"]);
        assert_eq!(cli.clean_rules, Some(Some(PathBuf::from("rules.txt"))));
        let cli = parse(&["c.json"]);
        assert_eq!(cli.clean_rules, None);
    }

    #[test]
    fn verbosity_flags_conflict() {
        assert!(Cli::try_parse_from(["blockscan", "c.json", "--silent", "--debug"]).is_err());
        assert!(Cli::try_parse_from(["blockscan", "c.json", "--verbose", "--debug"]).is_err());
    }

    #[test]
    fn output_options_carry_flags() {
        let cli = parse(&["c.json", "--titles", "--remove-dupes", "--append"]);
        let opts = cli.output_options();
        assert!(opts.show_titles);
        assert!(opts.remove_dupes);
        assert!(opts.append);
    }
}
