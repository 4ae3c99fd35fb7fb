use serde::{Deserialize, Serialize};

use crate::space::RunConfig;

/// Terminal classification of a single external run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Success,
    /// The process exited with a non-zero code (`-1` when killed by a signal).
    NonZeroExit { code: i32 },
    TimedOut,
    /// The binary or launcher could not be started.
    SpawnFailed { cause: String },
    Cancelled,
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeStatus::Success)
    }

    /// Transient failures the scheduler may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OutcomeStatus::NonZeroExit { .. } | OutcomeStatus::TimedOut
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::NonZeroExit { .. } => "non-zero-exit",
            OutcomeStatus::TimedOut => "timed-out",
            OutcomeStatus::SpawnFailed { .. } => "spawn-failed",
            OutcomeStatus::Cancelled => "cancelled",
        }
    }
}

/// Bounded capture of one output stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapturedStream {
    pub text: String,
    /// Bytes written by the process, including any past the capture cap.
    pub total_bytes: u64,
    pub truncated: bool,
}

impl CapturedStream {
    pub fn from_bytes(bytes: &[u8], total_bytes: u64) -> Self {
        Self {
            text: String::from_utf8_lossy(bytes).into_owned(),
            total_bytes,
            truncated: total_bytes > bytes.len() as u64,
        }
    }
}

/// Result of executing one [`RunConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub config: RunConfig,
    pub status: OutcomeStatus,
    /// Wall time of the final attempt in milliseconds.
    pub elapsed_ms: u64,
    #[serde(default)]
    pub stdout: CapturedStream,
    #[serde(default)]
    pub stderr: CapturedStream,
    /// Attempts beyond the first.
    #[serde(default)]
    pub retries: u32,
}

impl RunOutcome {
    /// Outcome for a config that never reached a process, e.g. after cancellation.
    pub fn not_started(config: RunConfig, status: OutcomeStatus) -> Self {
        Self {
            config,
            status,
            elapsed_ms: 0,
            stdout: CapturedStream::default(),
            stderr: CapturedStream::default(),
            retries: 0,
        }
    }
}

/// Outcome totals by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub success: usize,
    pub non_zero_exit: usize,
    pub timed_out: usize,
    pub spawn_failed: usize,
    pub cancelled: usize,
}

impl OutcomeCounts {
    pub fn tally<'a>(outcomes: impl IntoIterator<Item = &'a RunOutcome>) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Success => counts.success += 1,
                OutcomeStatus::NonZeroExit { .. } => counts.non_zero_exit += 1,
                OutcomeStatus::TimedOut => counts.timed_out += 1,
                OutcomeStatus::SpawnFailed { .. } => counts.spawn_failed += 1,
                OutcomeStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.success + self.failed() + self.cancelled
    }

    pub fn failed(&self) -> usize {
        self.non_zero_exit + self.timed_out + self.spawn_failed
    }
}
