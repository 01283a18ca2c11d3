use std::{fs::File, path::PathBuf};

use cabb_pipeline::{
    error::CalibratorRole,
    flags::SnapshotKind,
    io::LoadedObservation,
    types::{FrequencyConfig, Source, SubBand},
    CalibratorCatalog, Pipeline, PipelineError, PipelineOptionsBuilder,
};
use approx::assert_abs_diff_eq;
use tempfile::{tempdir, TempDir};

mod common;
use common::{two_config_observation, MockToolkit, BASE_TIME};

fn rpfits_file(tmp_dir: &TempDir) -> PathBuf {
    let path = tmp_dir.path().join("2018-01-05_1200.C007");
    File::create(&path).unwrap();
    path
}

fn full_toolkit() -> MockToolkit {
    let mut toolkit = MockToolkit::new(
        two_config_observation(),
        &[
            ("uvsplit.2100", 2100),
            ("uvsplit.1601", 1601),
            ("uvsplit.17024", 17024),
            ("uvsplit.9999", 9999),
        ],
    );
    toolkit.noisy.insert("uvsplit.2100".to_string());
    toolkit.stubborn
        .insert("reduction.uvsplit.17024/1921-293.17024".to_string());
    for (dataset, sources) in [
        ("uvsplit.2100", vec!["1934-638.2100", "target.2100"]),
        ("uvsplit.1601", vec!["1934-638.1601", "target.1601"]),
        (
            "uvsplit.17024",
            vec!["1921-293.17024", "1934-638.17024", "target.17024"],
        ),
    ] {
        toolkit.sources.insert(
            dataset.to_string(),
            sources.into_iter().map(str::to_string).collect(),
        );
    }
    toolkit
}

#[test]
fn test_full_run_with_mock_toolkit() {
    let tmp_dir = tempdir().unwrap();
    let report_dir = tmp_dir.path().join("reports");
    let options = PipelineOptionsBuilder::default()
        .files(vec![rpfits_file(&tmp_dir)])
        .report_dir(Some(report_dir.clone()))
        .draw_progress(false)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(full_toolkit(), options, CalibratorCatalog::well_known());
    let report = pipeline.run().unwrap();

    // the unbound split is dropped
    let datasets: Vec<&str> = report.datasets.keys().map(String::as_str).collect();
    assert_eq!(datasets, vec!["uvsplit.2100", "uvsplit.1601", "uvsplit.17024"]);

    // midweek RFI found in the wide IF is flagged on its whole chain
    let toolkit = &pipeline.toolkit;
    assert_eq!(toolkit.calls_starting("varplt"), vec!["varplt uvsplit.2100"]);
    assert_eq!(
        toolkit.calls_starting("uvflag"),
        vec!["uvflag uvsplit.2100 1", "uvflag uvsplit.1601 1"]
    );
    let region = report.datasets["uvsplit.1601"].midweek_regions[0];
    assert_abs_diff_eq!(region.start, BASE_TIME + 3570.0);
    assert_abs_diff_eq!(region.stop, BASE_TIME + 4290.0);
    assert!(report.datasets["uvsplit.17024"].midweek_regions.is_empty());

    // only wide IFs are auto flagged, so only they get a cost report
    let wide = &report.datasets["uvsplit.2100"];
    let zoom = &report.datasets["uvsplit.1601"];
    assert!(wide.snapshots.contains_key(&SnapshotKind::Auto));
    assert!(!zoom.snapshots.contains_key(&SnapshotKind::Auto));
    for kind in [SnapshotKind::Load, SnapshotKind::Start, SnapshotKind::Midweek] {
        assert!(zoom.snapshots.contains_key(&kind));
    }
    let cost = wide.rfi_cost.as_ref().unwrap();
    assert!(!cost.costs.is_empty());
    assert!(cost.total.absolute > 0.0);
    assert!(zoom.rfi_cost.is_none());

    // reference antenna from the latest snapshot
    assert_eq!(wide.refant.as_deref(), Some("2"));
    assert_eq!(zoom.refant.as_deref(), Some("3"));

    // calibrators
    let cm16 = &report.assignments[&1];
    assert_eq!(cm16.bandpass.as_deref(), Some("1934-638"));
    assert_eq!(cm16.flux.as_deref(), Some("1934-638"));
    assert_eq!(cm16.leakage.as_deref(), Some("1934-638"));
    let mm15 = &report.assignments[&2];
    assert_eq!(mm15.bandpass.as_deref(), Some("1921-293"));
    assert_eq!(mm15.flux.as_deref(), Some("1934-638"));
    assert_eq!(mm15.leakage.as_deref(), Some("1921-293"));
    assert_eq!(mm15.gain, vec!["1934-638", "1921-293"]);

    // 16cm: one calibrator does everything, leakages solved on 1934-638
    assert!(toolkit
        .calls_starting("gpcal reduction.uvsplit.2100/")
        .contains(&"gpcal reduction.uvsplit.2100/1934-638.2100 2 Some(true)".to_string()));
    assert!(toolkit
        .calls_starting("gpcopy reduction.uvsplit.2100/")
        .is_empty());
    assert_eq!(
        toolkit.calls_starting("mfcal reduction.uvsplit.2100/").len(),
        2
    );

    // 15mm: bandpass carried to the flux calibrator and back
    assert_eq!(
        toolkit.calls_starting("gpcopy reduction.uvsplit.17024/"),
        vec![
            "gpcopy reduction.uvsplit.17024/1921-293.17024 reduction.uvsplit.17024/1934-638.17024 pol=true cal=true pass=true",
            "gpcopy reduction.uvsplit.17024/1934-638.17024 reduction.uvsplit.17024/1921-293.17024 pol=false cal=false pass=true",
        ]
    );
    assert_eq!(
        toolkit.calls_starting("mfboot"),
        vec!["mfboot reduction.uvsplit.17024/1934-638.17024 1934-638"]
    );
    assert_eq!(
        toolkit.calls_starting("gpcal reduction.uvsplit.17024/"),
        vec!["gpcal reduction.uvsplit.17024/1921-293.17024 2 None"]
    );
    let mm15_report = &report.datasets["uvsplit.17024"];
    assert_eq!(mm15_report.convergence_failures.len(), 1);
    assert_eq!(mm15_report.convergence_failures[0].role, "bandpass");
    let calibration = mm15_report.calibration.as_ref().unwrap();
    assert_eq!(calibration.flux_settled, Some(true));
    assert!(calibration.bandpass.unwrap().converged);

    // reports
    let json: serde_json::Value = serde_json::from_reader(
        File::open(report_dir.join("rfi_calculator.uvsplit.2100.json")).unwrap(),
    )
    .unwrap();
    assert!(json.as_object().unwrap().values().all(|cost| cost["fraction"].is_number()));
    assert!(!report_dir.join("rfi_calculator.uvsplit.1601.json").exists());
    let log = std::fs::read_to_string(report_dir.join("log.uvsplit.1601")).unwrap();
    assert!(log.contains("Flagged midweek RFI"));
    assert!(log.contains("Reference antenna CA03"));
    let run_log = std::fs::read_to_string(report_dir.join("log.run")).unwrap();
    assert!(run_log.contains("Frequency configuration 2: bandpass 1921-293"));
}

#[test]
fn test_stages_can_be_skipped() {
    let tmp_dir = tempdir().unwrap();
    let options = PipelineOptionsBuilder::default()
        .files(vec![rpfits_file(&tmp_dir)])
        .detect_midweek(false)
        .auto_flag(false)
        .calibrate(false)
        .draw_progress(false)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(full_toolkit(), options, CalibratorCatalog::well_known());
    let report = pipeline.run().unwrap();

    let toolkit = &pipeline.toolkit;
    assert!(toolkit.calls_starting("varplt").is_empty());
    assert!(toolkit.calls_starting("pgflag").is_empty());
    assert!(toolkit.calls_starting("reduction").is_empty());
    for dataset in report.datasets.values() {
        assert!(dataset.rfi_cost.is_none());
        assert_eq!(dataset.refant.as_deref(), Some("3"));
        assert!(dataset.calibration.is_none());
    }
    // calibrators are still chosen
    assert_eq!(report.assignments.len(), 2);
}

#[test]
fn test_failed_flagging_is_noted_and_retried() {
    let tmp_dir = tempdir().unwrap();
    let mut toolkit = full_toolkit();
    toolkit.flagger_fails = true;
    let options = PipelineOptionsBuilder::default()
        .files(vec![rpfits_file(&tmp_dir)])
        .detect_midweek(false)
        .draw_progress(false)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(toolkit, options, CalibratorCatalog::well_known());
    let report = pipeline.run().unwrap();

    // no post-flagging snapshot, so no cost and the refant comes from the start
    let wide = &report.datasets["uvsplit.2100"];
    assert!(!wide.snapshots.contains_key(&SnapshotKind::Auto));
    assert!(wide.rfi_cost.is_none());
    assert_eq!(wide.refant.as_deref(), Some("3"));
    assert!(wide
        .log
        .contains(&"Automatic flagging of uvsplit.2100 failed".to_string()));

    // calibrators that failed to flag are flagged again when next needed
    let toolkit = &pipeline.toolkit;
    assert_eq!(
        toolkit.calls_starting("pgflag reduction.uvsplit.2100/"),
        vec![
            "pgflag reduction.uvsplit.2100/1934-638.2100",
            "pgflag reduction.uvsplit.2100/1934-638.2100",
        ]
    );
    assert_eq!(
        toolkit.calls_starting("pgflag reduction.uvsplit.17024/"),
        vec![
            "pgflag reduction.uvsplit.17024/1921-293.17024",
            "pgflag reduction.uvsplit.17024/1934-638.17024",
            "pgflag reduction.uvsplit.17024/1921-293.17024",
        ]
    );
    let failures = report.datasets["uvsplit.17024"]
        .log
        .iter()
        .filter(|line| line.starts_with("Automatic flagging of") && line.ends_with("failed"))
        .count();
    assert_eq!(failures, 4);
}

#[test]
fn test_missing_bandpass_calibrator_is_fatal() {
    let tmp_dir = tempdir().unwrap();
    let mut config = FrequencyConfig::new(1);
    config.sub_bands = vec![SubBand::new(2049, 4.5, 0.001, 4.5, 1)];
    let mut target = Source::new("target");
    target.add_cut(1, "18JAN05:12:00:00.0", "");
    let observation = LoadedObservation {
        dataset: Some(cabb_pipeline::observation::DatasetHandle::new("C007_2018-01-05.uv")),
        sources: vec![target],
        freq_configs: vec![config],
    };
    let toolkit = MockToolkit::new(observation, &[("uvsplit.5524", 5524)]);
    let options = PipelineOptionsBuilder::default()
        .files(vec![rpfits_file(&tmp_dir)])
        .draw_progress(false)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(toolkit, options, CalibratorCatalog::well_known());

    match pipeline.run() {
        Err(PipelineError::CalibratorUnavailable {
            role,
            source_name,
            dataset,
        }) => {
            assert_eq!(role, CalibratorRole::Bandpass);
            assert_eq!(source_name, None);
            assert_eq!(dataset, "uvsplit.5524");
        }
        other => panic!("expected CalibratorUnavailable, got {other:?}"),
    }
}

#[test]
fn test_calibrator_without_dataset_is_fatal() {
    let tmp_dir = tempdir().unwrap();
    let mut toolkit = full_toolkit();
    // the bandpass calibrator didn't make it into the reduction directory
    toolkit.sources.insert(
        "uvsplit.2100".to_string(),
        vec!["target.2100".to_string()],
    );
    let options = PipelineOptionsBuilder::default()
        .files(vec![rpfits_file(&tmp_dir)])
        .detect_midweek(false)
        .draw_progress(false)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(toolkit, options, CalibratorCatalog::well_known());

    assert!(matches!(
        pipeline.run(),
        Err(PipelineError::CalibratorUnavailable {
            role: CalibratorRole::Bandpass,
            source_name: Some(_),
            ..
        })
    ));
}

#[test]
fn test_missing_input_file() {
    let tmp_dir = tempdir().unwrap();
    let options = PipelineOptionsBuilder::default()
        .files(vec![tmp_dir.path().join("2018-01-05_1200.C007")])
        .draw_progress(false)
        .build()
        .unwrap();
    let pipeline = Pipeline::new(full_toolkit(), options, CalibratorCatalog::well_known());
    assert!(matches!(
        pipeline.run(),
        Err(PipelineError::InputError { .. })
    ));
    assert!(pipeline.toolkit.calls.borrow().is_empty());
}
