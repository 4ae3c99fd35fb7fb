mod common;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use common::outcome;
use swept_core::errors::SweepError;
use swept_exp::{
    read_sweep_result, run_experiment, CancelToken, ExperimentConfig, ExperimentReport, Invoke,
    NullReporter, OutcomeStatus, PairStatus, RunConfig, RunOutcome, SummaryWriter, SweepPair,
    EXPERIMENT_REPORT,
};

const CONFIG: &str = r#"
binary_dir: bin
output_dir: rslts
results_dir: report
equation_specs:
  heat: specs/heat.json
  euler: specs/euler.json
sweep:
  tpb: [64, 128]
  nX: [4096]
  gpuA: [1.0, 2.0]
  nproc: 1
scheduler:
  concurrency: 3
  max_retries: 1
  backoff:
    base_ms: 1
    cap_ms: 2
"#;

fn config(base: &Path) -> ExperimentConfig {
    let mut config: ExperimentConfig = serde_yaml::from_str(CONFIG).unwrap();
    config.base_dir = base.to_path_buf();
    config
}

/// Stands in for the solver: records one timing entry per successful run.
struct FakeSolver {
    output_dir: PathBuf,
    artifacts: Mutex<BTreeMap<String, BTreeMap<String, f64>>>,
    calls: AtomicUsize,
    fails: fn(&RunConfig) -> bool,
    drops_record: fn(&RunConfig) -> bool,
}

impl FakeSolver {
    fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            artifacts: Mutex::new(BTreeMap::new()),
            calls: AtomicUsize::new(0),
            fails: |_| false,
            drops_record: |_| false,
        }
    }
}

impl Invoke for FakeSolver {
    fn invoke(&self, config: &RunConfig, _cancel: &CancelToken) -> RunOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if (self.fails)(config) {
            return outcome(config, OutcomeStatus::NonZeroExit { code: 3 });
        }
        if !(self.drops_record)(config) {
            let title = SweepPair::new(&config.equation, &config.scheme).timing_title();
            let mut artifacts = self.artifacts.lock().unwrap();
            let records = artifacts.entry(title.clone()).or_default();
            records.insert(
                format!("{}/{}/{:.4}", config.tpb, config.nx, config.gpu_a),
                config.gpu_a * config.tpb as f64,
            );
            fs::write(
                self.output_dir.join(title),
                serde_json::to_vec(&*records).unwrap(),
            )
            .unwrap();
        }
        outcome(config, OutcomeStatus::Success)
    }
}

fn read_report(dir: &Path) -> ExperimentReport {
    serde_json::from_slice(&fs::read(dir.join(EXPERIMENT_REPORT)).unwrap()).unwrap()
}

#[test]
fn every_pair_is_swept_and_collected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut solver = FakeSolver::new(config.output_dir());
    solver.fails = |config| config.equation == "euler" && config.scheme == "C" && config.gpu_a > 1.5;
    let reporter = SummaryWriter::new(dir.path().join("report"));

    let report = run_experiment(&config, &solver, &reporter, &CancelToken::new()).unwrap();

    let labels: Vec<_> = report.pairs.iter().map(|p| p.pair.to_string()).collect();
    assert_eq!(labels, ["heat/S", "heat/C", "euler/S", "euler/C"]);
    assert!(report
        .pairs
        .iter()
        .all(|p| p.status == PairStatus::Collected && p.runs == 4));
    // Two failing configs, each attempted twice.
    assert_eq!(solver.calls.load(Ordering::SeqCst), 18);

    let totals = report.totals();
    assert_eq!(totals.success, 14);
    assert_eq!(totals.non_zero_exit, 2);

    assert!(dir.path().join("rslts/tEulerC.json").exists());
    assert!(dir.path().join("report/heat_S_timing.csv").exists());
    assert!(dir.path().join("report/euler_C_summary.json").exists());

    let persisted = read_report(&dir.path().join("report"));
    assert_eq!(persisted.pairs.len(), 4);
    assert_eq!(persisted.provenance.input_hash, report.provenance.input_hash);

    let sweep = read_sweep_result(&dir.path().join("report/euler_C_sweep.json")).unwrap();
    assert_eq!(sweep.counts().non_zero_exit, 2);
    assert_eq!(sweep.outcomes[1].retries, 1);
}

#[test]
fn incomplete_artifact_is_recorded_and_the_experiment_continues() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut solver = FakeSolver::new(config.output_dir());
    solver.drops_record = |config| config.equation == "heat" && config.scheme == "S" && config.tpb == 128;

    let report = run_experiment(&config, &solver, &NullReporter, &CancelToken::new()).unwrap();

    assert_eq!(report.pairs[0].status, PairStatus::IncompleteArtifact);
    let info = report.pairs[0].error.as_ref().unwrap();
    assert_eq!(info.context["expected"], "4");
    assert_eq!(info.context["found"], "2");
    assert!(report.pairs[1..]
        .iter()
        .all(|p| p.status == PairStatus::Collected));
}

#[test]
fn dry_run_invokes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.dry_run = true;
    let solver = FakeSolver::new(config.output_dir());

    let report = run_experiment(&config, &solver, &NullReporter, &CancelToken::new()).unwrap();

    assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
    assert!(report.dry_run);
    assert!(report.pairs.iter().all(|p| p.status == PairStatus::Planned));
    assert_eq!(report.pairs.iter().map(|p| p.runs).sum::<usize>(), 16);
    assert!(!dir.path().join("rslts").exists());
    assert!(dir.path().join("report").join(EXPERIMENT_REPORT).exists());
}

#[test]
fn abort_mode_stops_the_experiment_after_the_failing_pair() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.scheduler.concurrency = 1;
    config.scheduler.max_retries = 0;
    config.scheduler.failure_mode = swept_exp::FailureMode::AbortOnFirstFailure;
    let mut solver = FakeSolver::new(config.output_dir());
    solver.fails = |config| config.scheme == "C";

    let err = run_experiment(&config, &solver, &NullReporter, &CancelToken::new()).unwrap_err();

    let SweepError::Aborted(info) = err else {
        panic!("expected abort, got {err:?}");
    };
    assert_eq!(info.context["pair"], "heat/C");
    assert_eq!(info.context["kind"], "non-zero-exit");

    let persisted = read_report(&dir.path().join("report"));
    assert_eq!(persisted.pairs.len(), 2);
    assert_eq!(persisted.pairs[1].status, PairStatus::Halted);
    // heat/S ran fully, heat/C stopped after its first run.
    assert_eq!(solver.calls.load(Ordering::SeqCst), 5);
}

struct Unlaunchable;

impl Invoke for Unlaunchable {
    fn invoke(&self, config: &RunConfig, _cancel: &CancelToken) -> RunOutcome {
        outcome(
            config,
            OutcomeStatus::SpawnFailed {
                cause: "permission denied".to_string(),
            },
        )
    }
}

#[test]
fn abort_on_unlaunchable_solver_surfaces_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.scheduler.failure_mode = swept_exp::FailureMode::AbortOnFirstFailure;

    let err = run_experiment(&config, &Unlaunchable, &NullReporter, &CancelToken::new()).unwrap_err();

    let SweepError::SpawnFailed(info) = err else {
        panic!("expected spawn failure, got {err:?}");
    };
    assert_eq!(info.context["cause"], "permission denied");
    assert_eq!(info.context["pair"], "heat/S");
}

#[test]
fn cancelled_before_start_records_every_run_as_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let solver = FakeSolver::new(config.output_dir());
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = run_experiment(&config, &solver, &NullReporter, &cancel).unwrap_err();

    assert!(matches!(err, SweepError::Cancelled(_)));
    assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
    let persisted = read_report(&dir.path().join("report"));
    assert_eq!(persisted.pairs[0].counts.cancelled, 4);
}

#[test]
fn missing_equation_spec_fails_before_any_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.equation_specs.remove("heat");
    let solver = FakeSolver::new(config.output_dir());

    let err = run_experiment(&config, &solver, &NullReporter, &CancelToken::new()).unwrap_err();

    assert!(matches!(err, SweepError::InvalidSpec(_)));
    assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
}
