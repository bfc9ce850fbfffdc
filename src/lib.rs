//! blockscan: a configurable network-scanning crawler.
//!
//! Drives headless browser pages over target URLs, observes every
//! subresource request they issue, and emits domain-blocking rules for
//! the domains whose requests match the configured patterns.

pub mod browser;
pub mod cache;
pub mod cli;
pub mod config;
pub mod domain;
pub mod logging;
pub mod nettools;
pub mod pipeline;
pub mod rules;
pub mod scanner;

pub use cache::{CacheStats, SmartCache};
pub use config::{load_config, validate_config, ConfigError, ScanConfig, SiteConfig};
pub use logging::ScanLogs;
pub use pipeline::{PipelineOptions, TaskFailure, UrlTask};
pub use rules::{
    clean_rules_file, validate_rules_file, write_rules, FormattedRule, MatchedDomains,
    OutputFormat, OutputOptions, RuleSink, RuleStore, UrlResult,
};
pub use scanner::{ScanOptions, ScanOrchestrator, ScanSummary};
