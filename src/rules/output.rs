//! Rule rendering, deduplication, baseline comparison, and file output.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{OutputFormat, RuleStore};

/// Where rendered rules go.
#[derive(Debug, Clone)]
pub enum RuleSink {
    Stdout,
    File(PathBuf),
}

/// Options governing serialization, straight off the CLI.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub format: OutputFormat,
    /// Prepend `! <source-url>` before each task's block.
    pub show_titles: bool,
    /// Drop repeated domain lines, keeping the first occurrence.
    pub remove_dupes: bool,
    /// Baseline file; lines already present there are not emitted.
    pub compare_file: Option<PathBuf>,
    /// Open the output for append instead of truncate.
    pub append: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            show_titles: false,
            remove_dupes: false,
            compare_file: None,
            append: false,
        }
    }
}

/// Render the whole store to its final line list: titles, formatting,
/// optional dedupe, optional baseline comparison, in input task order.
pub fn render_rules(store: &RuleStore, opts: &OutputOptions) -> Result<Vec<String>> {
    let baseline = match &opts.compare_file {
        Some(path) => Some(load_baseline(path)?),
        None => None,
    };

    let mut lines = Vec::new();
    for result in store.results() {
        if result.rules.is_empty() {
            continue;
        }
        let mut block = Vec::new();
        for rule in &result.rules {
            for line in opts.format.format_domain(&rule.domain, &rule.resource_types) {
                let keep = baseline
                    .as_ref()
                    .is_none_or(|set| match normalize_rule_line(&line) {
                        Some(normalized) => !set.contains(&normalized),
                        None => true,
                    });
                if keep {
                    block.push(line);
                }
            }
        }
        if block.is_empty() {
            continue;
        }
        if opts.show_titles {
            lines.push(format!("! {}", result.url));
        }
        lines.append(&mut block);
    }

    if opts.remove_dupes {
        lines = dedupe_lines(lines);
    }
    Ok(lines)
}

/// Write rendered rules to the sink. File output honors append mode;
/// an unwritable output file is fatal.
pub fn write_rules(store: &RuleStore, opts: &OutputOptions, sink: &RuleSink) -> Result<usize> {
    let lines = render_rules(store, opts)?;
    match sink {
        RuleSink::Stdout => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            for line in &lines {
                writeln!(handle, "{line}").context("failed writing rules to stdout")?;
            }
        }
        RuleSink::File(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create output directory {}", parent.display())
                    })?;
                }
            }
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(opts.append)
                .truncate(!opts.append)
                .open(path)
                .with_context(|| format!("cannot open output file {}", path.display()))?;
            for line in &lines {
                writeln!(file, "{line}")
                    .with_context(|| format!("failed writing to {}", path.display()))?;
            }
        }
    }
    Ok(lines.len())
}

/// Normalize a rule line for baseline comparison: strip the `||` anchor,
/// hosts-file IPs, the `^` separator, and any `$...` modifier tail.
/// Comment and empty lines normalize to nothing.
#[must_use]
pub fn normalize_rule_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('!') || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("||").unwrap_or(line);
    let line = line.strip_prefix("127.0.0.1 ").unwrap_or(line);
    let line = line.strip_prefix("0.0.0.0 ").unwrap_or(line);
    let line = line.split('$').next().unwrap_or(line);
    let line = line.trim_end_matches('^').trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

fn load_baseline(path: &Path) -> Result<HashSet<String>> {
    let file = File::open(path)
        .with_context(|| format!("cannot open compare baseline {}", path.display()))?;
    let mut set = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("error reading {}", path.display()))?;
        if let Some(normalized) = normalize_rule_line(&line) {
            set.insert(normalized);
        }
    }
    Ok(set)
}

/// Remove duplicate rule lines, preserving first occurrence and all
/// `!` comment headers.
fn dedupe_lines(lines: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter(|line| {
            if line.starts_with('!') {
                return true;
            }
            seen.insert(line.clone())
        })
        .collect()
}

/// `--clean-rules`: dedupe an existing rule file in place. Reads fully,
/// writes to a temp file next to the target, then renames over it, so the
/// cleaner is safe to run on a file a later scan will append to.
pub fn clean_rules_file(path: &Path) -> Result<usize> {
    let file =
        File::open(path).with_context(|| format!("cannot open rules file {}", path.display()))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        lines.push(line.with_context(|| format!("error reading {}", path.display()))?);
    }
    let before = lines.len();
    let cleaned = dedupe_lines(lines);
    let removed = before - cleaned.len();

    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = File::create(&tmp_path)
            .with_context(|| format!("cannot create temp file {}", tmp_path.display()))?;
        for line in &cleaned {
            writeln!(tmp, "{line}")?;
        }
        tmp.sync_all()
            .with_context(|| format!("failed to flush {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(removed)
}

/// `--validate-rules`: check every line of a file against the emission
/// grammar of the given format. Returns the offending lines.
pub fn validate_rules_file(path: &Path, format: &OutputFormat) -> Result<Vec<(usize, String)>> {
    let file =
        File::open(path).with_context(|| format!("cannot open rules file {}", path.display()))?;
    let mut invalid = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("error reading {}", path.display()))?;
        if !format.line_is_valid(&line) {
            invalid.push((idx + 1, line));
        }
    }
    Ok(invalid)
}
