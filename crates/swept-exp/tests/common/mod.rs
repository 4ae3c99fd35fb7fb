#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use swept_exp::{
    CancelToken, Invoke, OutcomeStatus, ParameterSpace, RunConfig, RunOutcome, SweepSpec,
};

/// Spec with `gpu` affinity values for a single heat/S pair.
pub fn heat_spec(gpu: usize) -> SweepSpec {
    SweepSpec {
        equations: vec!["heat".to_string()],
        schemes: vec!["S".to_string()],
        tpb: vec![64],
        nx: vec![4096],
        gpu_a: (1..=gpu).map(|k| k as f64 * 0.5).collect(),
        nproc: 1,
        ..SweepSpec::default()
    }
}

pub fn configs(spec: &SweepSpec) -> Vec<RunConfig> {
    ParameterSpace::new(spec).expect("valid spec").iter().collect()
}

pub fn outcome(config: &RunConfig, status: OutcomeStatus) -> RunOutcome {
    RunOutcome::not_started(config.clone(), status)
}

/// Invoker scripted per call: `script(config index, attempt)` picks the status.
pub struct ScriptedInvoker<F> {
    index: HashMap<RunConfig, usize>,
    attempts: Mutex<HashMap<usize, u32>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    latency: Box<dyn Fn(usize) -> Duration + Send + Sync>,
    completions: Mutex<Vec<usize>>,
    script: F,
}

impl<F> ScriptedInvoker<F>
where
    F: Fn(usize, u32) -> OutcomeStatus + Send + Sync,
{
    pub fn new(configs: &[RunConfig], script: F) -> Self {
        Self {
            index: configs
                .iter()
                .enumerate()
                .map(|(idx, config)| (config.clone(), idx))
                .collect(),
            attempts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            latency: Box::new(|_| Duration::ZERO),
            completions: Mutex::new(Vec::new()),
            script,
        }
    }

    pub fn with_latency(mut self, latency: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.latency = Box::new(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, index: usize) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&index)
            .copied()
            .unwrap_or(0)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn completion_order(&self) -> Vec<usize> {
        self.completions.lock().unwrap().clone()
    }
}

impl<F> Invoke for ScriptedInvoker<F>
where
    F: Fn(usize, u32) -> OutcomeStatus + Send + Sync,
{
    fn invoke(&self, config: &RunConfig, _cancel: &CancelToken) -> RunOutcome {
        let index = self.index[config];
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(index).or_insert(0);
            *entry += 1;
            *entry
        };
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        thread::sleep((self.latency)(index));
        let status = (self.script)(index, attempt);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completions.lock().unwrap().push(index);
        outcome(config, status)
    }
}

/// Invoker whose runs block until cancelled, like a hung solver.
#[derive(Default)]
pub struct HangingInvoker {
    pub started: AtomicUsize,
}

impl Invoke for HangingInvoker {
    fn invoke(&self, config: &RunConfig, cancel: &CancelToken) -> RunOutcome {
        self.started.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs(30);
        while !cancel.is_cancelled() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        outcome(config, OutcomeStatus::Cancelled)
    }
}
