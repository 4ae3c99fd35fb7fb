use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use swept_core::errors::{ErrorInfo, SweepError};

use crate::outcome::OutcomeCounts;
use crate::scheduler::SweepResult;
use crate::space::{RunConfig, SweepPair};

/// Timing measurements written by the solver, flattened to keyed records.
///
/// Nested objects and arrays are addressed by their `/`-joined key path,
/// e.g. `{"64": {"4096": 1.5}}` becomes the record `64/4096 -> 1.5`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimingArtifact {
    pub records: BTreeMap<String, f64>,
}

impl TimingArtifact {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Parses a JSON artifact, rejecting non-numeric leaves.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, SweepError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|err| SweepError::serde("artifact_json", err))?;
        let mut records = BTreeMap::new();
        flatten(&value, String::new(), &mut records)?;
        Ok(Self { records })
    }

    /// Loads the artifact at `path`; `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, SweepError> {
        match fs::read(path) {
            Ok(bytes) => Self::from_json_slice(&bytes).map(Some),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SweepError::Io(
                ErrorInfo::new("artifact_read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )),
        }
    }
}

fn flatten(
    value: &Value,
    prefix: String,
    out: &mut BTreeMap<String, f64>,
) -> Result<(), SweepError> {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        }
    };
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(child, join(key), out)?;
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten(child, join(&idx.to_string()), out)?;
            }
        }
        Value::Number(number) => {
            let number = number.as_f64().ok_or_else(|| {
                SweepError::Serde(ErrorInfo::new("artifact_number", number.to_string()))
            })?;
            out.insert(prefix, number);
        }
        other => {
            return Err(SweepError::Serde(
                ErrorInfo::new("artifact_value", format!("non-numeric record {other}"))
                    .with_context("key", prefix),
            ))
        }
    }
    Ok(())
}

/// Validated timing data for one sweep, ready for a reporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub pair: SweepPair,
    pub counts: OutcomeCounts,
    /// Configs whose runs succeeded, in enumeration order.
    pub succeeded: Vec<RunConfig>,
    pub artifact: TimingArtifact,
}

/// Loads and validates the timing artifact of a finished sweep.
///
/// Must only be called once the scheduler has returned, so the solver is no
/// longer writing the file.
pub fn collect(result: &SweepResult) -> Result<ResultSet, SweepError> {
    let counts = result.counts();
    let incomplete = |found: usize, message: &str| {
        SweepError::IncompleteArtifact(
            ErrorInfo::new("record_count", message)
                .with_context("pair", result.pair.to_string())
                .with_context("path", result.artifact.display().to_string())
                .with_context("expected", counts.success.to_string())
                .with_context("found", found.to_string()),
        )
    };

    let artifact = match TimingArtifact::load(&result.artifact)? {
        Some(artifact) => artifact,
        None if counts.success == 0 => TimingArtifact::default(),
        None => return Err(incomplete(0, "timing artifact is missing")),
    };
    if artifact.len() != counts.success {
        tracing::error!(
            pair = %result.pair,
            expected = counts.success,
            found = artifact.len(),
            path = %result.artifact.display(),
            "timing artifact does not match successful runs"
        );
        return Err(incomplete(
            artifact.len(),
            "record count differs from successful runs",
        ));
    }

    tracing::info!(pair = %result.pair, records = artifact.len(), "collected timing artifact");
    Ok(ResultSet {
        pair: result.pair.clone(),
        counts,
        succeeded: result.successes().map(|o| o.config.clone()).collect(),
        artifact,
    })
}
