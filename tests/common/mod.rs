//! A stand-in for the reduction toolkit that remembers what it was asked to do.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashSet},
    path::PathBuf,
};

use cabb_pipeline::{
    io::{
        error::IOError, CopyOptions, GainSolveOptions, LoadedObservation, ReductionSet,
        ReductionToolkit, SolveOutcome,
    },
    observation::DatasetHandle,
    types::{AmplitudeSample, FlagRegion, FrequencyConfig, Source, SubBand},
    FlagStatistics,
};
use indexmap::{indexmap, IndexMap};

/// 2018-01-05 12:00:00 UTC
pub const BASE_TIME: f64 = 1_515_153_600.0;

/// A 16cm configuration with a wide IF and a zoom on the same chain, and a
/// 15mm configuration with one wide IF.
pub fn two_config_observation() -> LoadedObservation {
    let mut cm16 = FrequencyConfig::new(1);
    cm16.sub_bands = vec![
        SubBand::new(2049, 1.076, 0.001, 1.076, 1),
        SubBand::new(2049, 1.6, 0.5e-6, 1.6, 1),
    ];
    let mut mm15 = FrequencyConfig::new(2);
    mm15.sub_bands = vec![SubBand::new(2049, 16.0, 0.001, 16.0, 1)];

    let mut pks1934 = Source::new("1934-638");
    for minute in 0..3 {
        pks1934.add_cut(1, &format!("18JAN05:12:0{minute}:00.0"), "C");
    }
    pks1934.add_cut(2, "18JAN05:15:00:00.0", "C");
    let mut target = Source::new("target");
    target.add_cut(1, "18JAN05:12:30:00.0", "");
    target.add_cut(2, "18JAN05:15:30:00.0", "");
    let mut pks1921 = Source::new("1921-293");
    for minute in 0..4 {
        pks1921.add_cut(2, &format!("18JAN05:16:0{minute}:00.0"), "C");
    }

    LoadedObservation {
        dataset: Some(DatasetHandle::new("C007_2018-01-05.uv")),
        sources: vec![pks1934, target, pks1921],
        freq_configs: vec![cm16, mm15],
    }
}

/// Two hours of xy-amplitudes with ten noisy minutes starting an hour in.
pub fn midweek_series() -> Vec<AmplitudeSample> {
    (0..720)
        .map(|idx| {
            let offset = idx as f64 * 10.0;
            let noisy = (3600.0..4200.0).contains(&offset) && idx % 2 == 0;
            AmplitudeSample {
                time: BASE_TIME + offset,
                amplitudes: if noisy {
                    vec![10.0, 110.0]
                } else {
                    vec![10.0, 15.0]
                },
            }
        })
        .collect()
}

#[derive(Default)]
pub struct MockToolkit {
    pub observation: LoadedObservation,
    pub splits: Vec<DatasetHandle>,
    /// Per-source datasets made for each dataset's reduction
    pub sources: BTreeMap<String, Vec<String>>,
    /// Datasets whose xy-amplitudes show midweek RFI
    pub noisy: HashSet<String>,
    /// Calibrator datasets whose first bandpass solve fails to converge
    pub stubborn: HashSet<String>,
    /// Whether the automatic flagger reports failure on every dataset
    pub flagger_fails: bool,
    pub calls: RefCell<Vec<String>>,
    pub flagged: RefCell<HashSet<String>>,
    pub solved: RefCell<HashSet<String>>,
}

impl MockToolkit {
    pub fn new(observation: LoadedObservation, splits: &[(&str, i64)]) -> Self {
        Self {
            observation,
            splits: splits
                .iter()
                .map(|&(name, centre)| DatasetHandle {
                    name: name.to_string(),
                    centre_freq_mhz: Some(centre),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn call(&self, line: String) {
        self.calls.borrow_mut().push(line);
    }

    pub fn calls_starting(&self, prefix: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }
}

fn fractions(pairs: &[(&str, f64)]) -> IndexMap<String, f64> {
    pairs
        .iter()
        .map(|&(key, fraction)| (key.to_string(), fraction))
        .collect()
}

impl ReductionToolkit for MockToolkit {
    fn load_observation(&self, files: &[PathBuf]) -> Result<LoadedObservation, IOError> {
        self.call(format!("load {}", files.len()));
        Ok(self.observation.clone())
    }

    fn split_into_subbands(&self, dataset: &DatasetHandle) -> Result<Vec<DatasetHandle>, IOError> {
        self.call(format!("split {}", dataset.name));
        Ok(self.splits.clone())
    }

    fn compute_flag_statistics(&self, dataset: &str) -> Result<FlagStatistics, IOError> {
        self.call(format!("stats {dataset}"));
        let flagged = self.flagged.borrow().contains(dataset);
        let channel_fraction = if flagged { 0.5 } else { 0.0 };
        Ok(FlagStatistics {
            stokes: indexmap! { "xx".to_string() => channel_fraction },
            baseline: indexmap! { "1-2".to_string() => channel_fraction },
            antenna: if flagged {
                fractions(&[("1", 0.2), ("2", 0.05), ("3", 0.1)])
            } else {
                fractions(&[("1", 0.1), ("2", 0.2), ("3", 0.1)])
            },
            channel: (1..=2049).map(|channel| (channel, channel_fraction)).collect(),
        })
    }

    fn read_xy_amplitudes(&self, dataset: &str) -> Result<Vec<AmplitudeSample>, IOError> {
        self.call(format!("varplt {dataset}"));
        if self.noisy.contains(dataset) {
            Ok(midweek_series())
        } else {
            Ok(vec![])
        }
    }

    fn flag_time_ranges(&self, dataset: &str, regions: &[FlagRegion]) -> Result<(), IOError> {
        self.call(format!("uvflag {} {}", dataset, regions.len()));
        Ok(())
    }

    fn run_automatic_flagger(&self, dataset: &str) -> Result<bool, IOError> {
        self.call(format!("pgflag {dataset}"));
        if self.flagger_fails {
            return Ok(false);
        }
        self.flagged.borrow_mut().insert(dataset.to_string());
        Ok(true)
    }

    fn prepare_reduction(&self, dataset: &str) -> Result<ReductionSet, IOError> {
        self.call(format!("reduction {dataset}"));
        let directory = format!("reduction.{dataset}");
        Ok(ReductionSet {
            datasets: self
                .sources
                .get(dataset)
                .map(|sources| {
                    sources
                        .iter()
                        .map(|source| format!("{directory}/{source}"))
                        .collect()
                })
                .unwrap_or_default(),
            directory: directory.into(),
        })
    }

    fn run_bandpass_solve(&self, dataset: &str, refant: &str) -> Result<SolveOutcome, IOError> {
        self.call(format!("mfcal {dataset} {refant}"));
        let first = self.solved.borrow_mut().insert(dataset.to_string());
        Ok(SolveOutcome {
            converged: !(first && self.stubborn.contains(dataset)),
            iterations: 12,
            flux_density: Some(14.9),
            leakage_solved: false,
        })
    }

    fn run_gain_solve(
        &self,
        dataset: &str,
        refant: &str,
        options: &GainSolveOptions,
    ) -> Result<SolveOutcome, IOError> {
        self.call(format!("gpcal {} {} {:?}", dataset, refant, options.leakages));
        Ok(SolveOutcome {
            converged: true,
            iterations: 5,
            flux_density: None,
            leakage_solved: options.leakages == Some(true),
        })
    }

    fn copy_calibration(&self, from: &str, to: &str, options: &CopyOptions) -> Result<(), IOError> {
        self.call(format!(
            "gpcopy {} {} pol={} cal={} pass={}",
            from, to, options.pol, options.cal, options.pass
        ));
        Ok(())
    }

    fn bootstrap_flux(&self, dataset: &str, source: &str) -> Result<bool, IOError> {
        self.call(format!("mfboot {dataset} {source}"));
        Ok(true)
    }
}
