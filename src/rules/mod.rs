//! Rule accumulation and emission.
//!
//! Each URL task accumulates `(domain → resource types)` matches; the
//! orchestrator collects per-task results into a [`RuleStore`] and the
//! output layer serializes them in the selected syntax.

mod format;
mod output;

pub use format::{format_domain, OutputFormat};
pub use output::{
    clean_rules_file, normalize_rule_line, render_rules, validate_rules_file, write_rules,
    OutputOptions, RuleSink,
};

use std::collections::{BTreeMap, BTreeSet};

/// Domains matched by one URL task, with the resource types seen for each.
///
/// Insertion is append-only: a domain is never removed within a task and a
/// domain's resource-type set only grows. All ignore/similarity filtering
/// happens before insertion, never after.
#[derive(Debug, Clone, Default)]
pub struct MatchedDomains {
    domains: BTreeMap<String, BTreeSet<String>>,
}

impl MatchedDomains {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a domain, optionally tagged with the resource type that
    /// matched. Returns true if the domain was new.
    pub fn insert(&mut self, domain: &str, resource_type: Option<&str>) -> bool {
        let was_new = !self.domains.contains_key(domain);
        let types = self.domains.entry(domain.to_string()).or_default();
        if let Some(rt) = resource_type {
            types.insert(rt.to_string());
        }
        was_new
    }

    #[must_use]
    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.domains.iter()
    }

    /// Drain into the rule list attached to a task result.
    #[must_use]
    pub fn into_rules(self) -> Vec<FormattedRule> {
        self.domains
            .into_iter()
            .map(|(domain, resource_types)| FormattedRule {
                domain,
                resource_types,
            })
            .collect()
    }
}

/// One matched domain ready for serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedRule {
    pub domain: String,
    /// Resource types observed for this domain; consulted only by the
    /// `adblock-rules` output mode.
    pub resource_types: BTreeSet<String>,
}

impl FormattedRule {
    #[must_use]
    pub fn plain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            resource_types: BTreeSet::new(),
        }
    }
}

/// Outcome of one URL task.
#[derive(Debug, Clone)]
pub struct UrlResult {
    pub url: String,
    pub final_url: String,
    pub success: bool,
    pub needs_immediate_restart: bool,
    pub has_matches: bool,
    pub rules: Vec<FormattedRule>,
    /// Registrable domains of intermediate redirect hops, excluded from
    /// matching by downstream post-processing.
    pub redirect_domains: Vec<String>,
    pub error: Option<String>,
}

impl UrlResult {
    #[must_use]
    pub fn skipped(url: &str) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            success: false,
            needs_immediate_restart: false,
            has_matches: false,
            rules: Vec::new(),
            redirect_domains: Vec::new(),
            error: Some("skipped: both first-party and third-party disabled".to_string()),
        }
    }
}

/// All task results for a run, in input task order. Mutated only by the
/// orchestrator; serialization reads, never mutates.
#[derive(Debug, Default)]
pub struct RuleStore {
    results: Vec<UrlResult>,
}

impl RuleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: UrlResult) {
        self.results.push(result);
    }

    #[must_use]
    pub fn results(&self) -> &[UrlResult] {
        &self.results
    }

    #[must_use]
    pub fn results_mut(&mut self) -> &mut Vec<UrlResult> {
        &mut self.results
    }

    #[must_use]
    pub fn successful_loads(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    #[must_use]
    pub fn total_rules(&self) -> usize {
        self.results.iter().map(|r| r.rules.len()).sum()
    }
}
