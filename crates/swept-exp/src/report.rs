use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use swept_core::errors::SweepError;

use crate::collect::ResultSet;
use crate::outcome::OutcomeCounts;
use crate::serde::to_canonical_json_bytes;
use crate::space::SweepPair;

/// Downstream consumer of collected timing data (plotting, dashboards, ...).
pub trait Reporter {
    fn report(&self, set: &ResultSet) -> Result<(), SweepError>;
}

/// Discards result sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _set: &ResultSet) -> Result<(), SweepError> {
        Ok(())
    }
}

/// Basic statistics over the timing records of one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordStats {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

impl RecordStats {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min: Option<f64> = None;
        let mut max: Option<f64> = None;
        for value in values {
            count += 1;
            sum += value;
            min = Some(min.map_or(value, |m| m.min(value)));
            max = Some(max.map_or(value, |m| m.max(value)));
        }
        Self {
            count,
            min,
            max,
            mean: (count > 0).then(|| sum / count as f64),
        }
    }
}

/// Summary persisted next to the timing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub pair: SweepPair,
    pub label: String,
    pub counts: OutcomeCounts,
    pub records: RecordStats,
}

/// Writes `<stem>_timing.csv` and `<stem>_summary.json` for each result set.
#[derive(Debug, Clone)]
pub struct SummaryWriter {
    dir: PathBuf,
}

impl SummaryWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_table(&self, path: &Path, set: &ResultSet) -> Result<(), SweepError> {
        let mut writer =
            csv::Writer::from_path(path).map_err(|err| SweepError::io("timing_csv_open", err))?;
        writer
            .write_record(["key", "value"])
            .map_err(|err| SweepError::io("timing_csv_write", err))?;
        for (key, value) in &set.artifact.records {
            writer
                .write_record([key.clone(), value.to_string()])
                .map_err(|err| SweepError::io("timing_csv_write", err))?;
        }
        writer
            .flush()
            .map_err(|err| SweepError::io("timing_csv_flush", err))
    }
}

impl Reporter for SummaryWriter {
    fn report(&self, set: &ResultSet) -> Result<(), SweepError> {
        fs::create_dir_all(&self.dir).map_err(|err| SweepError::io("report_dir", err))?;
        let stem = set.pair.file_stem();
        self.write_table(&self.dir.join(format!("{stem}_timing.csv")), set)?;

        let summary = TimingSummary {
            pair: set.pair.clone(),
            label: set.pair.label(),
            counts: set.counts,
            records: RecordStats::from_values(set.artifact.records.values().copied()),
        };
        let bytes = to_canonical_json_bytes(&summary)?;
        fs::write(self.dir.join(format!("{stem}_summary.json")), bytes)
            .map_err(|err| SweepError::io("summary_write", err))?;
        tracing::info!(pair = %set.pair, dir = %self.dir.display(), "wrote timing summary");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::TimingArtifact;

    #[test]
    fn stats_over_empty_input() {
        let stats = RecordStats::from_values(std::iter::empty());
        assert_eq!(stats.count, 0);
        assert!(stats.mean.is_none());
    }

    #[test]
    fn writer_emits_table_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = TimingArtifact::from_json_slice(br#"{"a": 1.0, "b": 3.0}"#).unwrap();
        let set = ResultSet {
            pair: SweepPair::new("heat", "S"),
            counts: OutcomeCounts {
                success: 2,
                ..OutcomeCounts::default()
            },
            succeeded: Vec::new(),
            artifact,
        };
        SummaryWriter::new(dir.path()).report(&set).unwrap();

        let table = fs::read_to_string(dir.path().join("heat_S_timing.csv")).unwrap();
        assert_eq!(table, "key,value\na,1\nb,3\n");
        let summary: TimingSummary = serde_json::from_slice(
            &fs::read(dir.path().join("heat_S_summary.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(summary.label, "heat Classic");
        assert_eq!(summary.records.mean, Some(2.0));
        assert_eq!(summary.records.min, Some(1.0));
    }
}
