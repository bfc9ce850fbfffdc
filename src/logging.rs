//! Product log files under `logs/`.
//!
//! Three timestamped artifacts per run: the request debug log, the matched
//! URL log, and (when no output file is given) the emitted rules. Writes
//! are line-oriented behind a mutex; compression, when enabled, happens
//! once at finalize.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;

/// Log-file set for one scan run.
pub struct ScanLogs {
    debug: Option<Mutex<BufWriter<File>>>,
    matched: Option<Mutex<BufWriter<File>>>,
    debug_path: Option<PathBuf>,
    matched_path: Option<PathBuf>,
    rules_path: PathBuf,
    compress: bool,
}

impl ScanLogs {
    /// Create the `logs/` directory and open this run's files.
    ///
    /// The debug log only exists in debug mode; the matched log is always
    /// written (it is the run's audit trail).
    pub fn create(dir: &Path, debug_enabled: bool, compress: bool) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create log directory {}", dir.display()))?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");

        let (debug, debug_path) = if debug_enabled {
            let path = dir.join(format!("debug_requests_{stamp}.log"));
            let file = File::create(&path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            (Some(Mutex::new(BufWriter::new(file))), Some(path))
        } else {
            (None, None)
        };

        let matched_path = dir.join(format!("matched_urls_{stamp}.log"));
        let matched_file = File::create(&matched_path)
            .with_context(|| format!("cannot create {}", matched_path.display()))?;

        Ok(Self {
            debug,
            matched: Some(Mutex::new(BufWriter::new(matched_file))),
            debug_path,
            matched_path: Some(matched_path),
            rules_path: dir.join(format!("adblock_rules_{stamp}.txt")),
            compress,
        })
    }

    /// A disabled log set for `--validate-config` and unit tests.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            debug: None,
            matched: None,
            debug_path: None,
            matched_path: None,
            rules_path: PathBuf::from("adblock_rules.txt"),
            compress: false,
        }
    }

    /// Default rules path inside `logs/` for runs without `--output`.
    #[must_use]
    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    pub fn debug(&self, line: &str) {
        if let Some(writer) = &self.debug {
            let mut w = writer.lock();
            let _ = writeln!(w, "{line}");
        }
    }

    pub fn matched(&self, line: &str) {
        if let Some(writer) = &self.matched {
            let mut w = writer.lock();
            let _ = writeln!(w, "{line}");
        }
    }

    /// Flush everything and, when enabled, gzip each log in place
    /// (`x.log` → `x.log.gz`).
    pub fn finalize(self) -> Result<()> {
        let Self {
            debug,
            matched,
            debug_path,
            matched_path,
            compress,
            ..
        } = self;

        for writer in [debug, matched].into_iter().flatten() {
            writer.lock().flush().context("failed to flush log file")?;
        }

        if compress {
            for path in [debug_path, matched_path].into_iter().flatten() {
                compress_in_place(&path)?;
            }
        }
        Ok(())
    }
}

fn compress_in_place(path: &Path) -> Result<()> {
    let mut input = Vec::new();
    File::open(path)
        .with_context(|| format!("cannot reopen {}", path.display()))?
        .read_to_end(&mut input)?;

    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    let out = File::create(&gz_path)
        .with_context(|| format!("cannot create {}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(out, Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?;

    fs::remove_file(path)
        .with_context(|| format!("cannot remove uncompressed {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_timestamped_files_and_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logs = ScanLogs::create(dir.path(), true, false).expect("create");
        logs.debug("request https://a.test/x.js script");
        logs.matched("ads.other https://a.test/");
        logs.finalize().expect("finalize");

        let names: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.starts_with("debug_requests_")));
        assert!(names.iter().any(|n| n.starts_with("matched_urls_")));
    }

    #[test]
    fn compression_replaces_plain_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let logs = ScanLogs::create(dir.path(), true, true).expect("create");
        logs.debug("line");
        logs.finalize().expect("finalize");

        let names: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.ends_with(".log.gz")));
        assert!(!names.iter().any(|n| n.ends_with(".log")));
    }

    #[test]
    fn disabled_logs_swallow_writes() {
        let logs = ScanLogs::disabled();
        logs.debug("ignored");
        logs.matched("ignored");
        logs.finalize().expect("finalize");
    }
}
