use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use blockscan::cli::Cli;
use blockscan::pipeline::PipelineOptions;
use blockscan::rules::RuleSink;
use blockscan::scanner::{ScanOptions, ScanOrchestrator};
use blockscan::{clean_rules_file, load_config, validate_rules_file, ScanLogs, SmartCache};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // Maintenance modes short-circuit before any browser work.
    if let Some(target) = &cli.clean_rules {
        let path = resolve_rules_path(target, &cli)?;
        let removed = clean_rules_file(&path)?;
        println!("removed {removed} duplicate lines from {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }
    if let Some(target) = &cli.validate_rules {
        let path = resolve_rules_path(target, &cli)?;
        let invalid = validate_rules_file(&path, &cli.output_format())?;
        if invalid.is_empty() {
            println!("{} is valid {}", path.display(), cli.output_format());
            return Ok(ExitCode::SUCCESS);
        }
        for (line_no, line) in &invalid {
            eprintln!("{}:{line_no}: invalid rule: {line}", path.display());
        }
        return Ok(ExitCode::FAILURE);
    }

    let mut config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    if cli.validate_config {
        println!("{} is valid", cli.config.display());
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(n) = cli.max_concurrent {
        config.max_concurrent_sites = n.clamp(1, 50);
    }
    if let Some(n) = cli.cleanup_interval {
        config.resource_cleanup_interval = n.max(1);
    }

    let cache = Arc::new(if cli.ignore_cache {
        SmartCache::with_ignored_reads(cli.cache_requests)
    } else {
        SmartCache::new(cli.cache_requests)
    });
    if cli.clear_cache {
        cache.clear_all();
    }

    let logs = Arc::new(ScanLogs::create(
        &PathBuf::from("logs"),
        cli.debug,
        cli.compress_logs,
    )?);

    let sink = match &cli.output {
        Some(path) => RuleSink::File(path.clone()),
        None if cli.dry_run => RuleSink::Stdout,
        None => RuleSink::File(logs.rules_path().to_path_buf()),
    };

    let options = ScanOptions {
        pipeline: PipelineOptions {
            sub_domains: cli.sub_domains,
            dump_urls: cli.dumpurls,
            no_interact: cli.no_interact,
        },
        output: cli.output_options(),
        headful: cli.headful,
        dry_run: cli.dry_run,
        debug: cli.debug,
    };

    let orchestrator = ScanOrchestrator::new(config, cache, Arc::clone(&logs), options, sink);
    let summary = orchestrator.run().await?;
    drop(orchestrator);

    if let Ok(logs) = Arc::try_unwrap(logs) {
        logs.finalize()?;
    }

    if !cli.silent {
        println!("{summary}");
    }
    Ok(ExitCode::SUCCESS)
}

fn resolve_rules_path(target: &Option<PathBuf>, cli: &Cli) -> anyhow::Result<PathBuf> {
    match target.clone().or_else(|| cli.output.clone()) {
        Some(path) => Ok(path),
        None => anyhow::bail!("no rules file given and no --output to default to"),
    }
}
