//! Sweep scheduling and external run coordination for the swept driver.
//!
//! A [`SweepSpec`] enumerates run configurations through [`ParameterSpace`].
//! [`run_sweep`] executes them through an [`Invoke`] implementation with
//! bounded concurrency and retries, and [`collect`] validates the timing
//! artifact the solver leaves behind. [`run_experiment`] strings the three
//! together for every (equation, scheme) pair.

mod cancel;
mod collect;
mod experiment;
mod hash;
mod invoke;
mod outcome;
mod report;
mod scheduler;
mod serde;
mod space;

pub use cancel::CancelToken;
pub use collect::{collect, ResultSet, TimingArtifact};
pub use experiment::{
    load_config, read_sweep_result, run_experiment, write_sweep_result, ExperimentConfig,
    ExperimentReport, PairReport, PairStatus, EXPERIMENT_REPORT,
};
pub use hash::stable_hash_string;
pub use invoke::{
    Invocation, Invoke, InvokerSettings, LauncherSpec, ProcessInvoker, DEFAULT_CAPTURE_LIMIT,
};
pub use outcome::{CapturedStream, OutcomeCounts, OutcomeStatus, RunOutcome};
pub use report::{NullReporter, RecordStats, Reporter, SummaryWriter, TimingSummary};
pub use scheduler::{run_sweep, Backoff, FailureMode, Halt, SchedulerOpts, SweepResult};
pub use space::{
    lx_for, scheme_label, Configs, ParameterSpace, RunConfig, SweepPair, SweepSpec, LX_GRID_UNIT,
};

pub use crate::serde::{from_json_slice, from_yaml_slice, to_canonical_json_bytes, to_yaml_string};
