use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use swept_exp::{
    load_config, run_experiment, CancelToken, ExperimentConfig, FailureMode, ProcessInvoker,
    SummaryWriter, EXPERIMENT_REPORT,
};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML experiment config.
    #[arg(long)]
    pub config: PathBuf,
    /// Maximum simultaneous solver processes.
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Retries allowed per run after a timeout or non-zero exit.
    #[arg(long)]
    pub max_retries: Option<u32>,
    /// Log the solver commands without launching them.
    #[arg(long)]
    pub dry_run: bool,
    /// Stop the campaign at the first run that fails for good.
    #[arg(long)]
    pub abort_on_failure: bool,
    /// Cancel the campaign after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub max_duration: Option<u64>,
}

fn apply_overrides(config: &mut ExperimentConfig, args: &RunArgs) {
    if let Some(concurrency) = args.concurrency {
        config.scheduler.concurrency = concurrency;
    }
    if let Some(max_retries) = args.max_retries {
        config.scheduler.max_retries = max_retries;
    }
    if args.dry_run {
        config.dry_run = true;
    }
    if args.abort_on_failure {
        config.scheduler.failure_mode = FailureMode::AbortOnFirstFailure;
    }
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, args);

    let cancel = CancelToken::new();
    let interrupted = cancel.clone();
    // Solvers run in their own process groups, so a terminal Ctrl-C only reaches us.
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping in-flight runs");
        interrupted.cancel();
    })?;
    if let Some(secs) = args.max_duration {
        // Detached; the process exits before a late watchdog matters.
        let _ = cancel.cancel_after(Duration::from_secs(secs));
    }

    let invoker = ProcessInvoker::new(config.invoker_settings());
    let reporter = SummaryWriter::new(config.results_dir());
    let report = run_experiment(&config, &invoker, &reporter, &cancel)?;

    let totals = report.totals();
    let summary = serde_json::json!({
        "dry_run": report.dry_run,
        "pairs": report.pairs.len(),
        "runs": report.pairs.iter().map(|p| p.runs).sum::<usize>(),
        "success": totals.success,
        "failed": totals.failed(),
        "cancelled": totals.cancelled,
        "report": config.results_dir().join(EXPERIMENT_REPORT).display().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
