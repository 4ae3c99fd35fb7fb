use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use swept_core::errors::{ErrorInfo, SweepError};

use crate::cancel::CancelToken;
use crate::invoke::Invoke;
use crate::outcome::{OutcomeCounts, OutcomeStatus, RunOutcome};
use crate::space::{RunConfig, SweepPair};

/// Upper bound on how long the dispatch loop sleeps before re-checking cancellation.
const TICK: Duration = Duration::from_millis(50);

/// Exponential backoff applied between retries of one config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(default = "Backoff::default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "Backoff::default_factor")]
    pub factor: f64,
    #[serde(default = "Backoff::default_cap_ms")]
    pub cap_ms: u64,
}

impl Backoff {
    const fn default_base_ms() -> u64 {
        1_000
    }

    const fn default_factor() -> f64 {
        2.0
    }

    const fn default_cap_ms() -> u64 {
        60_000
    }

    /// No delay between attempts.
    pub fn none() -> Self {
        Self {
            base_ms: 0,
            factor: 1.0,
            cap_ms: 0,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let raw = self.base_ms as f64 * self.factor.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.cap_ms as f64)
        } else {
            self.cap_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: Self::default_base_ms(),
            factor: Self::default_factor(),
            cap_ms: Self::default_cap_ms(),
        }
    }
}

/// What the scheduler does once a config fails terminally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Record the failure and keep sweeping.
    #[default]
    SkipAndContinue,
    /// Stop dispatching and cancel in-flight runs; used for smoke tests.
    AbortOnFirstFailure,
}

/// Scheduler configuration controlling sweep execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerOpts {
    /// Hard cap on simultaneously running external processes.
    #[serde(default = "SchedulerOpts::default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "SchedulerOpts::default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl SchedulerOpts {
    const fn default_concurrency() -> usize {
        1
    }

    const fn default_max_retries() -> u32 {
        2
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        if self.concurrency == 0 {
            return Err(SweepError::invalid_spec(
                "zero_concurrency",
                "scheduler concurrency must be at least 1",
            ));
        }
        if !(self.backoff.factor.is_finite() && self.backoff.factor >= 1.0) {
            return Err(SweepError::InvalidSpec(
                ErrorInfo::new("backoff_factor", "backoff factor must be finite and >= 1")
                    .with_context("factor", self.backoff.factor.to_string()),
            ));
        }
        Ok(())
    }
}

impl Default for SchedulerOpts {
    fn default() -> Self {
        Self {
            concurrency: Self::default_concurrency(),
            max_retries: Self::default_max_retries(),
            backoff: Backoff::default(),
            failure_mode: FailureMode::default(),
        }
    }
}

/// Why a sweep stopped before every config ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum Halt {
    /// Abort mode tripped on the config at `index`.
    Aborted { index: usize },
    Cancelled,
}

/// Accumulated outcome of one (equation, scheme) sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub pair: SweepPair,
    /// One outcome per config, in enumeration order.
    pub outcomes: Vec<RunOutcome>,
    /// Where the solver is expected to have written its timing artifact.
    pub artifact: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt: Option<Halt>,
}

impl SweepResult {
    pub fn counts(&self) -> OutcomeCounts {
        OutcomeCounts::tally(&self.outcomes)
    }

    pub fn successes(&self) -> impl Iterator<Item = &RunOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_success())
    }
}

/// Per-config lifecycle tracked by the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Pending,
    Dispatched,
    Retrying,
    Succeeded,
    FailedTerminal,
}

struct Ledger {
    configs: Vec<RunConfig>,
    states: Vec<RunState>,
    attempts: Vec<u32>,
    finals: Vec<Option<RunOutcome>>,
    ready: VecDeque<usize>,
    waiting: BinaryHeap<Reverse<(Instant, usize)>>,
    in_flight: usize,
    halt: Option<Halt>,
}

impl Ledger {
    fn new(configs: Vec<RunConfig>) -> Self {
        let total = configs.len();
        Self {
            configs,
            states: vec![RunState::Pending; total],
            attempts: vec![0; total],
            finals: vec![None; total],
            ready: (0..total).collect(),
            waiting: BinaryHeap::new(),
            in_flight: 0,
            halt: None,
        }
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse((due, index))) = self.waiting.peek().copied() {
            if due > now {
                break;
            }
            self.waiting.pop();
            self.ready.push_back(index);
        }
    }

    fn next_wait(&self, now: Instant) -> Duration {
        self.waiting
            .peek()
            .map(|Reverse((due, _))| due.saturating_duration_since(now))
            .unwrap_or(TICK)
            .min(TICK)
    }

    fn finished(&self) -> bool {
        self.in_flight == 0
            && (self.halt.is_some() || (self.ready.is_empty() && self.waiting.is_empty()))
    }

    fn finalize(&mut self, index: usize, state: RunState, mut outcome: RunOutcome) {
        outcome.retries = self.attempts[index].saturating_sub(1);
        self.states[index] = state;
        self.finals[index] = Some(outcome);
    }

    fn completed(&self) -> usize {
        self.finals.iter().filter(|o| o.is_some()).count()
    }
}

/// Drives one (equation, scheme) sweep through `invoker` with bounded concurrency.
///
/// Every config yields exactly one outcome; the returned outcomes follow the
/// order of `configs` regardless of completion order.
pub fn run_sweep<I>(
    pair: &SweepPair,
    configs: I,
    artifact: PathBuf,
    invoker: &dyn Invoke,
    opts: &SchedulerOpts,
    cancel: &CancelToken,
) -> Result<SweepResult, SweepError>
where
    I: IntoIterator<Item = RunConfig>,
{
    opts.validate()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.concurrency)
        .thread_name(|idx| format!("swept-run-{idx}"))
        .build()
        .map_err(|err| SweepError::io("thread_pool", err))?;

    let mut ledger = Ledger::new(configs.into_iter().collect());
    let total = ledger.configs.len();
    tracing::info!(
        %pair,
        runs = total,
        concurrency = opts.concurrency,
        max_retries = opts.max_retries,
        "starting sweep"
    );

    // Aborts stop our own runs without tripping the caller's token.
    let runs = CancelToken::new();
    let (tx, rx) = crossbeam_channel::unbounded::<(usize, RunOutcome)>();

    pool.in_place_scope(|scope| loop {
        if ledger.halt.is_none() && cancel.is_cancelled() {
            tracing::warn!(%pair, in_flight = ledger.in_flight, "sweep cancelled");
            ledger.halt = Some(Halt::Cancelled);
            runs.cancel();
        }

        let now = Instant::now();
        ledger.promote_due(now);
        while ledger.halt.is_none() && ledger.in_flight < opts.concurrency {
            let Some(index) = ledger.ready.pop_front() else {
                break;
            };
            ledger.states[index] = RunState::Dispatched;
            ledger.attempts[index] += 1;
            ledger.in_flight += 1;
            let config = ledger.configs[index].clone();
            let token = runs.clone();
            let tx = tx.clone();
            tracing::debug!(%config, attempt = ledger.attempts[index], "dispatching run");
            scope.spawn(move |_| {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    invoker.invoke(&config, &token)
                }))
                .unwrap_or_else(|_| {
                    RunOutcome::not_started(
                        config.clone(),
                        OutcomeStatus::SpawnFailed {
                            cause: "invoker panicked".to_string(),
                        },
                    )
                });
                let _ = tx.send((index, outcome));
            });
        }

        if ledger.finished() {
            break;
        }

        let (index, outcome) = match rx.recv_timeout(ledger.next_wait(now)) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        ledger.in_flight -= 1;
        let attempt = ledger.attempts[index];
        let status = outcome.status.clone();

        match &status {
            OutcomeStatus::Success => {
                ledger.finalize(index, RunState::Succeeded, outcome);
                tracing::debug!(
                    %pair,
                    index,
                    completed = ledger.completed(),
                    total,
                    "run succeeded"
                );
            }
            status if status.is_retryable() && attempt <= opts.max_retries => {
                if ledger.halt.is_some() {
                    let mut outcome = outcome;
                    outcome.status = OutcomeStatus::Cancelled;
                    ledger.finalize(index, RunState::FailedTerminal, outcome);
                    continue;
                }
                let delay = opts.backoff.delay(attempt);
                tracing::warn!(
                    config = %ledger.configs[index],
                    kind = status.kind(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "run failed, retrying"
                );
                ledger.states[index] = RunState::Retrying;
                ledger.waiting.push(Reverse((Instant::now() + delay, index)));
            }
            status => {
                if !matches!(status, OutcomeStatus::Cancelled) {
                    tracing::error!(
                        config = %ledger.configs[index],
                        kind = status.kind(),
                        attempts = attempt,
                        stderr = %outcome.stderr.text,
                        "run failed terminally"
                    );
                    if opts.failure_mode == FailureMode::AbortOnFirstFailure
                        && ledger.halt.is_none()
                    {
                        tracing::error!(%pair, index, "aborting sweep on first failure");
                        ledger.halt = Some(Halt::Aborted { index });
                        runs.cancel();
                    }
                }
                ledger.finalize(index, RunState::FailedTerminal, outcome);
            }
        }
    });

    let Ledger {
        configs,
        states,
        attempts,
        finals,
        halt,
        ..
    } = ledger;
    let outcomes: Vec<RunOutcome> = configs
        .into_iter()
        .zip(finals)
        .zip(states.iter().zip(attempts))
        .map(|((config, done), (state, attempts))| {
            done.unwrap_or_else(|| {
                debug_assert!(matches!(state, RunState::Pending | RunState::Retrying));
                let mut outcome = RunOutcome::not_started(config, OutcomeStatus::Cancelled);
                outcome.retries = attempts.saturating_sub(1);
                outcome
            })
        })
        .collect();

    let result = SweepResult {
        pair: pair.clone(),
        outcomes,
        artifact,
        halt,
    };
    let counts = result.counts();
    tracing::info!(
        %pair,
        success = counts.success,
        non_zero_exit = counts.non_zero_exit,
        timed_out = counts.timed_out,
        spawn_failed = counts.spawn_failed,
        cancelled = counts.cancelled,
        "sweep finished"
    );
    Ok(result)
}
