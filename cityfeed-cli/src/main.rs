//! cityfeed-puller: pull the published site snapshot from an ordered list of
//! origins and atomically activate it under a local root.
//!
//! # Usage
//!
//! ```text
//! cityfeed-puller --origin <url> [--origin <url> ...] --root <path>
//!                 [--timeout 30s] [--max-retry-wait 10s] [--retry-delay 1s]
//!                 [--keep 3] [--retain-age 7d] [--jobs 4]
//!                 [--materialize copy|hardlink] [--config puller.yaml]
//!                 [--dry-run] [--json] [--log-format text|json] [-v]
//! ```
//!
//! Exit codes: `0` success (including "nothing to do", "already running",
//! stale manifests and dry runs), `1` failed run, `2` usage or configuration
//! error.

mod logging;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser};

use cityfeed_core::config::DurationValue;
use cityfeed_core::{ConfigLayer, Materialize, ReconcileConfig};
use cityfeed_sync::Reconciler;

use logging::LogFormat;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "cityfeed-puller",
    version,
    about = "Pull a manifest-described snapshot from origins and activate it atomically",
    long_about = None,
)]
struct Cli {
    /// Origin base URL; repeat in priority order.
    #[arg(long = "origin", value_name = "URL")]
    origins: Vec<String>,

    /// Local root holding objects/, snapshots/ and the `current` link.
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,

    /// Per-request timeout (e.g. 30s).
    #[arg(long, value_name = "DUR")]
    timeout: Option<String>,

    /// Time spent retrying one origin before moving to the next.
    #[arg(long, value_name = "DUR")]
    max_retry_wait: Option<String>,

    /// Pause between attempts against the same origin.
    #[arg(long, value_name = "DUR")]
    retry_delay: Option<String>,

    /// Snapshots to keep, the active one included.
    #[arg(long, value_name = "N")]
    keep: Option<usize>,

    /// Only prune snapshots older than this (e.g. 7d).
    #[arg(long, value_name = "DUR")]
    retain_age: Option<String>,

    /// Parallel object downloads.
    #[arg(long, value_name = "N")]
    jobs: Option<usize>,

    /// How snapshot files are created from objects.
    #[arg(long, value_name = "MODE")]
    materialize: Option<Materialize>,

    /// YAML file with the same settings; flags take precedence.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Fetch and validate the manifest, report what would change, write nothing.
    #[arg(long)]
    dry_run: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,

    /// Log line format on stderr.
    #[arg(long, value_name = "FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// More log detail (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Flags as a config layer, ready to be merged over the file layer.
    fn layer(&self) -> ConfigLayer {
        let duration = |v: &Option<String>| v.clone().map(DurationValue::Text);
        ConfigLayer {
            origins: self.origins.clone(),
            root: self.root.clone(),
            timeout: duration(&self.timeout),
            max_retry_wait: duration(&self.max_retry_wait),
            retry_delay: duration(&self.retry_delay),
            keep: self.keep,
            retain_age: duration(&self.retain_age),
            jobs: self.jobs,
            materialize: self.materialize,
        }
    }

    fn resolve_config(&self) -> Result<ReconcileConfig> {
        let file = match &self.config {
            Some(path) => ConfigLayer::load(path)?,
            None => ConfigLayer::default(),
        };
        let config = ReconcileConfig::try_from(file.merge(self.layer()))?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(err) => {
            report::print_error(&err, cli.json);
            return ExitCode::from(2);
        }
    };

    match run(config, cli.dry_run) {
        Ok(outcome) => {
            report::print_outcome(&outcome, cli.json);
            ExitCode::SUCCESS
        }
        Err(err) => {
            report::print_error(&err, cli.json);
            ExitCode::FAILURE
        }
    }
}

fn run(config: ReconcileConfig, dry_run: bool) -> Result<cityfeed_sync::Outcome> {
    tracing::debug!(
        origins = ?config.origins.iter().map(|o| o.as_str()).collect::<Vec<_>>(),
        root = %config.root.display(),
        jobs = config.jobs,
        materialize = %config.materialize,
        dry_run,
        "starting",
    );
    let reconciler = Reconciler::new(config);
    let outcome = if dry_run {
        reconciler.plan()?
    } else {
        reconciler.run()?
    };
    Ok(outcome)
}
