mod common;

use std::fs;
use std::path::Path;

use common::{configs, heat_spec, outcome};
use swept_core::errors::SweepError;
use swept_exp::{
    collect, read_sweep_result, write_sweep_result, OutcomeStatus, RunConfig, SweepPair,
    SweepResult,
};

fn result_with(dir: &Path, statuses: impl Fn(usize) -> OutcomeStatus, runs: usize) -> SweepResult {
    let configs = configs(&heat_spec(runs));
    SweepResult {
        pair: SweepPair::new("heat", "S"),
        outcomes: configs
            .iter()
            .enumerate()
            .map(|(idx, config)| outcome(config, statuses(idx)))
            .collect(),
        artifact: dir.join("tHeatS.json"),
        halt: None,
    }
}

fn write_records(path: &Path, count: usize) {
    let body: serde_json::Map<String, serde_json::Value> = (0..count)
        .map(|idx| (format!("r{idx:02}"), serde_json::json!(idx as f64 * 0.5)))
        .collect();
    fs::write(path, serde_json::to_vec(&body).unwrap()).unwrap();
}

#[test]
fn one_missing_record_is_an_incomplete_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let result = result_with(
        dir.path(),
        |idx| {
            if idx < 18 {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::NonZeroExit { code: 1 }
            }
        },
        20,
    );
    write_records(&result.artifact, 17);

    let err = collect(&result).unwrap_err();
    let SweepError::IncompleteArtifact(info) = err else {
        panic!("expected incomplete artifact, got {err:?}");
    };
    assert_eq!(info.context["expected"], "18");
    assert_eq!(info.context["found"], "17");
    assert_eq!(info.context["pair"], "heat/S");
}

#[test]
fn matching_records_produce_a_result_set() {
    let dir = tempfile::tempdir().unwrap();
    let result = result_with(
        dir.path(),
        |idx| {
            if idx == 1 {
                OutcomeStatus::TimedOut
            } else {
                OutcomeStatus::Success
            }
        },
        4,
    );
    write_records(&result.artifact, 3);

    let set = collect(&result).unwrap();
    assert_eq!(set.artifact.len(), 3);
    assert_eq!(set.counts.success, 3);
    assert_eq!(set.counts.timed_out, 1);
    assert_eq!(set.succeeded.len(), 3);
    assert_eq!(set.succeeded[1], result.outcomes[2].config);
}

#[test]
fn missing_artifact_with_no_successes_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let result = result_with(dir.path(), |_| OutcomeStatus::TimedOut, 2);
    let set = collect(&result).unwrap();
    assert!(set.artifact.is_empty());
    assert_eq!(set.counts.timed_out, 2);
}

#[test]
fn missing_artifact_after_successes_is_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let result = result_with(dir.path(), |_| OutcomeStatus::Success, 2);
    let err = collect(&result).unwrap_err();
    assert_eq!(err.info().code, "record_count");
    assert_eq!(err.info().context["found"], "0");
}

#[test]
fn nested_artifact_counts_leaf_records() {
    let dir = tempfile::tempdir().unwrap();
    let result = result_with(dir.path(), |_| OutcomeStatus::Success, 3);
    fs::write(
        &result.artifact,
        br#"{"64": {"4096": {"0.5000": 1.5, "1.0000": 1.25}}, "128": {"4096": {"1.5000": 0.75}}}"#,
    )
    .unwrap();
    let set = collect(&result).unwrap();
    assert_eq!(set.artifact.records["64/4096/1.0000"], 1.25);
}

#[test]
fn sweep_result_survives_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let result = result_with(
        dir.path(),
        |idx| match idx {
            0 => OutcomeStatus::Success,
            1 => OutcomeStatus::SpawnFailed {
                cause: "not found".to_string(),
            },
            _ => OutcomeStatus::NonZeroExit { code: -1 },
        },
        3,
    );
    let path = dir.path().join("heat_S_sweep.json");
    write_sweep_result(&path, &result).unwrap();
    let restored = read_sweep_result(&path).unwrap();
    assert_eq!(restored, result);

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"kind\": \"spawn-failed\""));
    assert!(text.contains("\"gpuA\""));
}

#[test]
fn inexact_affinities_reload_bit_for_bit() {
    let dir = tempfile::tempdir().unwrap();
    let gpu_a = [0.9252132512813595, 1.0 / 3.0, 0.1 + 0.2, 7.000000000000001];
    let result = SweepResult {
        pair: SweepPair::new("heat", "S"),
        outcomes: gpu_a
            .iter()
            .map(|&gpu| outcome(&RunConfig::new("heat", "S", 64, 4096, gpu, 200), OutcomeStatus::Success))
            .collect(),
        artifact: dir.path().join("tHeatS.json"),
        halt: None,
    };
    let path = dir.path().join("heat_S_sweep.json");
    write_sweep_result(&path, &result).unwrap();

    let restored = read_sweep_result(&path).unwrap();
    for (restored, original) in restored.outcomes.iter().zip(&result.outcomes) {
        assert_eq!(restored.config.gpu_a.to_bits(), original.config.gpu_a.to_bits());
    }
    assert_eq!(restored, result);
}

#[test]
fn artifact_timings_keep_full_precision() {
    let dir = tempfile::tempdir().unwrap();
    let result = result_with(dir.path(), |_| OutcomeStatus::Success, 1);
    fs::write(&result.artifact, br#"{"64/4096/0.5000": 0.9252132512813595}"#).unwrap();
    let set = collect(&result).unwrap();
    assert_eq!(
        set.artifact.records["64/4096/0.5000"].to_bits(),
        0.9252132512813595f64.to_bits()
    );
}
