use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use swept_core::errors::{ErrorInfo, SweepError};
use swept_core::provenance::RunProvenance;

use crate::cancel::CancelToken;
use crate::collect::collect;
use crate::hash::stable_hash_string;
use crate::invoke::{InvokerSettings, Invoke, LauncherSpec, DEFAULT_CAPTURE_LIMIT};
use crate::outcome::{OutcomeCounts, OutcomeStatus};
use crate::report::Reporter;
use crate::scheduler::{run_sweep, Halt, SchedulerOpts, SweepResult};
use crate::serde::{from_json_slice, from_yaml_slice, to_canonical_json_bytes};
use crate::space::{ParameterSpace, SweepPair};

/// File name of the experiment-level report inside the results directory.
pub const EXPERIMENT_REPORT: &str = "experiment_report.json";

/// Experiment configuration loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub sweep: crate::space::SweepSpec,
    /// Directory holding one solver binary per equation.
    pub binary_dir: PathBuf,
    /// Equation-spec file per equation name.
    pub equation_specs: BTreeMap<String, PathBuf>,
    /// Directory the solver writes its results and timing artifacts to.
    pub output_dir: PathBuf,
    /// Where this driver writes sweep results and reports; defaults to `output_dir`.
    #[serde(default)]
    pub results_dir: Option<PathBuf>,
    #[serde(default)]
    pub scheduler: SchedulerOpts,
    #[serde(default)]
    pub launcher: LauncherSpec,
    #[serde(default = "ExperimentConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "ExperimentConfig::default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "ExperimentConfig::default_capture_limit")]
    pub capture_limit: usize,
    /// Log the planned invocations without running anything.
    #[serde(default)]
    pub dry_run: bool,
    /// Directory containing the config on disk (ignored when serializing).
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl ExperimentConfig {
    const fn default_timeout_secs() -> u64 {
        600
    }

    const fn default_grace_secs() -> u64 {
        5
    }

    const fn default_capture_limit() -> usize {
        DEFAULT_CAPTURE_LIMIT
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    pub fn results_dir(&self) -> PathBuf {
        match &self.results_dir {
            Some(dir) => self.resolve(dir),
            None => self.output_dir(),
        }
    }

    /// Expected location of the timing artifact for `pair`.
    pub fn artifact_path(&self, pair: &SweepPair) -> PathBuf {
        self.output_dir().join(pair.timing_title())
    }

    pub fn invoker_settings(&self) -> InvokerSettings {
        let mut settings = InvokerSettings::new(self.resolve(&self.binary_dir), self.output_dir());
        settings.equation_specs = self
            .equation_specs
            .iter()
            .map(|(name, path)| (name.clone(), self.resolve(path)))
            .collect();
        settings.nproc = self.sweep.nproc;
        settings.launcher = self.launcher.clone();
        settings.launcher_opts = self.sweep.launcher_opts.clone();
        settings.timeout = Duration::from_secs(self.timeout_secs);
        settings.grace = Duration::from_secs(self.grace_secs);
        settings.capture_limit = self.capture_limit;
        settings
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        self.sweep.validate()?;
        self.scheduler.validate()?;
        if self.timeout_secs == 0 {
            return Err(SweepError::invalid_spec(
                "zero_timeout",
                "per-run timeout must be positive",
            ));
        }
        for equation in &self.sweep.equations {
            if !self.equation_specs.contains_key(equation) {
                return Err(SweepError::InvalidSpec(
                    ErrorInfo::new(
                        "missing_equation_spec",
                        format!("no equation spec configured for {equation}"),
                    )
                    .with_context("equation", equation.clone())
                    .with_hint("add an entry under equation_specs"),
                ));
            }
        }
        Ok(())
    }
}

/// Loads an experiment config, resolving relative paths against its directory.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ExperimentConfig, SweepError> {
    let config_path = path.as_ref();
    let bytes = fs::read(config_path).map_err(|err| {
        SweepError::Io(
            ErrorInfo::new("config_read", err.to_string())
                .with_context("path", config_path.display().to_string()),
        )
    })?;
    let mut config: ExperimentConfig = from_yaml_slice(&bytes)?;
    config.base_dir = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    Ok(config)
}

/// How far one pair got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PairStatus {
    /// Dry run; nothing executed.
    Planned,
    Collected,
    IncompleteArtifact,
    Halted,
}

/// Report entry for one (equation, scheme) sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairReport {
    pub pair: SweepPair,
    pub label: String,
    pub status: PairStatus,
    pub runs: usize,
    pub counts: OutcomeCounts,
    pub artifact: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_result: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Experiment-level report written after every pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub provenance: RunProvenance,
    pub dry_run: bool,
    pub pairs: Vec<PairReport>,
}

impl ExperimentReport {
    pub fn totals(&self) -> OutcomeCounts {
        self.pairs
            .iter()
            .fold(OutcomeCounts::default(), |mut acc, entry| {
                acc.success += entry.counts.success;
                acc.non_zero_exit += entry.counts.non_zero_exit;
                acc.timed_out += entry.counts.timed_out;
                acc.spawn_failed += entry.counts.spawn_failed;
                acc.cancelled += entry.counts.cancelled;
                acc
            })
    }
}

fn provenance(spec_hash: String) -> RunProvenance {
    let mut tool_versions = BTreeMap::new();
    tool_versions.insert(
        "swept-exp".to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    RunProvenance {
        input_hash: spec_hash,
        created_at: Utc::now().to_rfc3339(),
        tool_versions,
        ..RunProvenance::default()
    }
}

/// Persists a sweep result as canonical JSON.
pub fn write_sweep_result(path: &Path, result: &SweepResult) -> Result<(), SweepError> {
    let bytes = to_canonical_json_bytes(result)?;
    fs::write(path, bytes).map_err(|err| SweepError::io("sweep_result_write", err))
}

/// Reads a sweep result written by [`write_sweep_result`].
pub fn read_sweep_result(path: &Path) -> Result<SweepResult, SweepError> {
    let bytes = fs::read(path).map_err(|err| SweepError::io("sweep_result_read", err))?;
    from_json_slice(&bytes)
}

fn write_report(dir: &Path, report: &ExperimentReport) -> Result<(), SweepError> {
    let bytes = to_canonical_json_bytes(report)?;
    fs::write(dir.join(EXPERIMENT_REPORT), bytes)
        .map_err(|err| SweepError::io("experiment_report_write", err))
}

fn halt_error(result: &SweepResult, halt: &Halt) -> SweepError {
    let base = |code: &str, message: &str| {
        ErrorInfo::new(code, message).with_context("pair", result.pair.to_string())
    };
    match halt {
        Halt::Aborted { index } => {
            let mut info = base("first_failure", "sweep stopped on its first terminal failure");
            let Some(outcome) = result.outcomes.get(*index) else {
                return SweepError::Aborted(info);
            };
            info = info
                .with_context("config", outcome.config.to_string())
                .with_context("kind", outcome.status.kind());
            match &outcome.status {
                OutcomeStatus::SpawnFailed { cause } => SweepError::SpawnFailed(
                    info.with_context("cause", cause.clone())
                        .with_hint("check binary_dir and the launcher program"),
                ),
                _ => SweepError::Aborted(info),
            }
        }
        Halt::Cancelled => SweepError::Cancelled(base("cancelled", "sweep was cancelled")),
    }
}

/// Runs every (equation, scheme) sweep of `config` in order.
///
/// Per-run failures never stop the experiment. Incomplete artifacts are
/// recorded against their pair and the experiment moves on. Abort mode and
/// cancellation stop after the current pair with the report already written;
/// an abort caused by a solver that could not start surfaces as `SpawnFailed`.
pub fn run_experiment(
    config: &ExperimentConfig,
    invoker: &dyn Invoke,
    reporter: &dyn Reporter,
    cancel: &CancelToken,
) -> Result<ExperimentReport, SweepError> {
    config.validate()?;
    let space = ParameterSpace::new(&config.sweep)?;
    let results_dir = config.results_dir();
    fs::create_dir_all(&results_dir).map_err(|err| SweepError::io("results_dir", err))?;
    if !config.dry_run {
        fs::create_dir_all(config.output_dir()).map_err(|err| SweepError::io("output_dir", err))?;
    }

    let mut report = ExperimentReport {
        provenance: provenance(stable_hash_string(&config.sweep)?),
        dry_run: config.dry_run,
        pairs: Vec::new(),
    };
    tracing::info!(
        runs = space.len(),
        pairs = space.pairs().len(),
        dry_run = config.dry_run,
        "starting experiment"
    );

    for pair in space.pairs() {
        let pair_space = ParameterSpace::for_pair(&config.sweep, &pair)?;
        let artifact = config.artifact_path(&pair);
        tracing::info!(
            label = %pair.label(),
            artifact = %pair.timing_title(),
            runs = pair_space.len(),
            "sweeping pair"
        );

        if config.dry_run {
            let settings = config.invoker_settings();
            for run in &pair_space {
                let invocation = settings.invocation(&run)?;
                tracing::info!(command = %invocation, "planned run");
            }
            report.pairs.push(PairReport {
                label: pair.label(),
                status: PairStatus::Planned,
                runs: pair_space.len(),
                counts: OutcomeCounts::default(),
                artifact,
                sweep_result: None,
                error: None,
                pair,
            });
            continue;
        }

        let result = run_sweep(
            &pair,
            pair_space.iter(),
            artifact.clone(),
            invoker,
            &config.scheduler,
            cancel,
        )?;
        let result_path = results_dir.join(format!("{}_sweep.json", pair.file_stem()));
        write_sweep_result(&result_path, &result)?;

        let mut entry = PairReport {
            label: pair.label(),
            status: PairStatus::Collected,
            runs: result.outcomes.len(),
            counts: result.counts(),
            artifact,
            sweep_result: Some(result_path),
            error: None,
            pair,
        };

        if let Some(halt) = &result.halt {
            let err = halt_error(&result, halt);
            entry.status = PairStatus::Halted;
            entry.error = Some(err.info().clone());
            report.pairs.push(entry);
            write_report(&results_dir, &report)?;
            return Err(err);
        }

        match collect(&result) {
            Ok(set) => reporter.report(&set)?,
            Err(err @ SweepError::IncompleteArtifact(_)) => {
                tracing::error!(error = %err, "timing artifact incomplete, keeping partial results");
                entry.status = PairStatus::IncompleteArtifact;
                entry.error = Some(err.info().clone());
            }
            Err(err) => return Err(err),
        }
        report.pairs.push(entry);
        write_report(&results_dir, &report)?;
    }

    write_report(&results_dir, &report)?;
    let totals = report.totals();
    tracing::info!(
        success = totals.success,
        failed = totals.failed(),
        cancelled = totals.cancelled,
        "experiment finished"
    );
    Ok(report)
}
