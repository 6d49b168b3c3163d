//! Spray CLI
//!
//! Command-line front end for the spray engine: parses flags into a run
//! configuration, drives the run and persists the results.

use anyhow::Context;
use clap::Parser;
use spray_engine::{
    CredentialSource, ListSource, LockoutPolicy, Phases, ProxyConfig, RunConfig, RunReport,
    RunStatus, Runner, SprayError,
};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub mod logging;
pub mod output;

pub use logging::{init_logging, LoggingConfig};
pub use output::OutputWriter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Microsoft O365 user enumerator and password sprayer", long_about = None)]
pub struct Args {
    /// Target domain for validation, user enumeration and/or password spraying
    #[arg(short = 'd', long)]
    pub domain: String,

    /// Run domain validation only
    #[arg(long)]
    pub validate: bool,

    /// Run username enumeration
    #[arg(long = "enum")]
    pub enumerate: bool,

    /// Run password spraying
    #[arg(long)]
    pub spray: bool,

    /// Username(s) delimited using commas
    #[arg(short = 'u', long, conflicts_with = "userfile")]
    pub username: Option<String>,

    /// Password(s) delimited using commas
    #[arg(short = 'p', long, conflicts_with_all = ["passfile", "paired"])]
    pub password: Option<String>,

    /// File containing list of usernames
    #[arg(short = 'U', long)]
    pub userfile: Option<PathBuf>,

    /// File containing list of passwords
    #[arg(short = 'P', long, conflicts_with = "paired")]
    pub passfile: Option<PathBuf>,

    /// File containing list of credentials in username:password format
    #[arg(long)]
    pub paired: Option<PathBuf>,

    /// Password attempts per user before the lockout timer must reset
    #[arg(short = 'c', long, default_value_t = 1)]
    pub count: u32,

    /// Lockout policy reset time in minutes
    #[arg(short = 'l', long, default_value_t = 15.0)]
    pub lockout: f64,

    /// Validation module
    #[arg(long, default_value = "getuserrealm")]
    pub validate_module: String,

    /// Enumeration module
    #[arg(long, default_value = "oauth2")]
    pub enum_module: String,

    /// Password spraying module
    #[arg(long, default_value = "oauth2")]
    pub spray_module: String,

    /// AuthURL of the target domain's ADFS login page
    #[arg(long)]
    pub adfs_url: Option<Url>,

    /// Seconds between passes; -1 picks a random value between 1 and 120
    #[arg(
        long,
        default_value_t = 0,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i64).range(-1..=120)
    )]
    pub sleep: i64,

    /// Percentage the sleep period may be extended by
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub jitter: u8,

    /// Concurrent attempts per pass
    #[arg(long, default_value_t = 10)]
    pub rate: usize,

    /// Stop once this many locked accounts are observed
    #[arg(long, default_value_t = 10)]
    pub safe: u32,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 25)]
    pub timeout: u64,

    /// HTTP/S proxy to pass traffic through (e.g. http://127.0.0.1:8080)
    #[arg(long, conflicts_with = "proxy_url")]
    pub proxy: Option<Url>,

    /// Rotating API gateway URL(s), comma separated
    #[arg(long, value_delimiter = ',')]
    pub proxy_url: Vec<Url>,

    /// Report deferred work instead of sleeping until the lockout window resets
    #[arg(long)]
    pub no_wait: bool,

    /// Output directory for results (default: current directory)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Emit JSON formatted logs
    #[arg(long)]
    pub json_logs: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Translate parsed flags into a run configuration
pub fn build_config(args: &Args) -> anyhow::Result<RunConfig> {
    if !args.lockout.is_finite() || args.lockout <= 0.0 {
        anyhow::bail!("--lockout must be a positive number of minutes");
    }

    let identities = match (&args.username, &args.userfile) {
        (Some(list), _) => Some(ListSource::Inline(split_list(list))),
        (None, Some(path)) => Some(ListSource::File(path.clone())),
        (None, None) => None,
    };

    let credentials = match (&args.paired, &args.password, &args.passfile) {
        (Some(path), _, _) => Some(CredentialSource::Paired(ListSource::File(path.clone()))),
        (None, Some(list), _) => Some(CredentialSource::Passwords(ListSource::Inline(split_list(list)))),
        (None, None, Some(path)) => Some(CredentialSource::Passwords(ListSource::File(path.clone()))),
        (None, None, None) => None,
    };

    let proxy = if !args.proxy_url.is_empty() {
        ProxyConfig::Rotating(args.proxy_url.clone())
    } else if let Some(proxy) = &args.proxy {
        ProxyConfig::Fixed(proxy.clone())
    } else {
        ProxyConfig::Direct
    };

    Ok(RunConfig {
        domain: args.domain.trim().to_string(),
        phases: Phases {
            validate: args.validate,
            enumerate: args.enumerate,
            spray: args.spray,
        },
        validate_module: args.validate_module.to_lowercase(),
        enum_module: args.enum_module.to_lowercase(),
        spray_module: args.spray_module.to_lowercase(),
        identities,
        credentials,
        lockout: LockoutPolicy::from_minutes(args.count, args.lockout),
        rate: args.rate,
        sleep: args.sleep,
        jitter: args.jitter,
        safe: args.safe,
        timeout: Duration::from_secs(args.timeout),
        proxy,
        adfs_url: args.adfs_url.clone(),
        wait_for_lockout_reset: !args.no_wait,
        ..RunConfig::default()
    })
}

/// Process exit code for a finished run
pub fn exit_code(status: &RunStatus) -> u8 {
    match status {
        RunStatus::Exhausted => 0,
        RunStatus::Aborted => 1,
        RunStatus::BreakerTripped => 2,
        RunStatus::Deadlocked { .. } => 3,
        RunStatus::Interrupted => 130,
    }
}

fn log_summary(report: &RunReport) {
    if let Some(enumeration) = &report.enumeration {
        tracing::info!(
            "Enumeration: {} valid, {} invalid, {} indeterminate",
            enumeration.snapshot.existing.len(),
            enumeration.snapshot.nonexisting.len(),
            enumeration.snapshot.indeterminate.len()
        );
    }
    if let Some(spray) = &report.spray {
        tracing::info!(
            "Spraying: {} valid, {} invalid, {} locked, {} indeterminate",
            spray.snapshot.valid.len(),
            spray.snapshot.invalid.len(),
            spray.snapshot.locked_out.len(),
            spray.snapshot.indeterminate.len()
        );
    }
    tracing::info!(
        "{} request(s) issued, {} lockout(s) observed",
        report.counters.requests,
        report.counters.lockouts
    );
    match report.status {
        RunStatus::Exhausted => {}
        RunStatus::BreakerTripped => {
            tracing::error!("Run halted: lockout threshold reached")
        }
        RunStatus::Deadlocked { remaining } => tracing::warn!(
            "Run stopped with {} deferred task(s); rerun after the lockout window",
            remaining
        ),
        RunStatus::Interrupted => tracing::warn!("Run interrupted; partial results were saved"),
        RunStatus::Aborted => {
            let reason = [&report.enumeration, &report.spray]
                .into_iter()
                .flatten()
                .find_map(|phase| phase.error.as_deref())
                .unwrap_or("unknown failure");
            tracing::error!("Run aborted: {}; partial results were saved", reason)
        }
    }
}

/// Log a failed run, with severity and category when the engine raised it
pub fn report_failure(error: &anyhow::Error) {
    match error.downcast_ref::<SprayError>() {
        Some(e) => tracing::error!(
            severity = ?e.severity(),
            category = ?e.category(),
            recoverable = e.is_recoverable(),
            "Run failed: {:#}",
            error
        ),
        None => tracing::error!("Run failed: {:#}", error),
    }
}

/// Run the configured phases and write results to the output directory.
///
/// Ctrl-C stops new probes; whatever was gathered is still written.
pub async fn run_cli(args: Args) -> anyhow::Result<RunReport> {
    let config = build_config(&args)?;
    let output_dir = args.output.clone().unwrap_or_else(|| PathBuf::from("."));

    tracing::info!("Starting spray run against {}", config.domain);
    tracing::debug!("Run configuration: {:?}", config);

    let runner = Runner::new(config).context("invalid run configuration")?;
    let run = runner.run();
    tokio::pin!(run);
    let report = tokio::select! {
        report = &mut run => report?,
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupt received; waiting for in-flight requests...");
            runner.interrupt();
            run.await?
        }
    };

    let writer = OutputWriter::new(&output_dir)
        .await
        .with_context(|| format!("failed to prepare output directory {}", output_dir.display()))?;
    let written = writer.write_report(&report).await?;
    for path in &written {
        tracing::debug!("Wrote {}", path.display());
    }
    tracing::info!("Results written to {}", output_dir.display());

    log_summary(&report);
    Ok(report)
}
