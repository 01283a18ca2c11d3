//! Talking to the external reduction toolkit.
//!
//! Everything the pipeline needs from the toolkit goes through the
//! [`ReductionToolkit`] trait, so the decision making can be driven by
//! anything that can load, split, flag and calibrate visibilities.
//! [`miriad::MiriadToolkit`] does it with Miriad tasks.

pub mod error;
pub mod miriad;

use std::path::PathBuf;

use serde::Serialize;

use crate::{
    flags::FlagStatistics,
    observation::DatasetHandle,
    types::{AmplitudeSample, FlagRegion, FrequencyConfig, Source},
};

use self::error::IOError;

/// What the toolkit found in the loaded data.
#[derive(Debug, Clone, Default)]
pub struct LoadedObservation {
    /// The dataset everything was loaded into
    pub dataset: Option<DatasetHandle>,
    /// Every source, possibly with repeats to be merged
    pub sources: Vec<Source>,
    /// Every frequency configuration
    pub freq_configs: Vec<FrequencyConfig>,
}

/// A directory holding a dataset split out by source, ready for calibration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReductionSet {
    /// The directory, relative to the working directory
    pub directory: PathBuf,
    /// The per-source datasets, relative to the working directory
    pub datasets: Vec<String>,
}

impl ReductionSet {
    /// The dataset for a source: the only one named `<source>.*`.
    pub fn find(&self, source: &str) -> Option<&str> {
        let prefix = format!("{source}.");
        let mut matches = self.datasets.iter().filter(|dataset| {
            let name = dataset.rsplit('/').next().unwrap_or("");
            name.starts_with(&prefix)
        });
        match (matches.next(), matches.next()) {
            (Some(dataset), None) => Some(dataset.as_str()),
            _ => None,
        }
    }
}

/// The result of a bandpass or gain solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolveOutcome {
    /// Whether the solver converged
    pub converged: bool,
    /// Iterations taken
    pub iterations: usize,
    /// Stokes I flux density reported by the solver [Jy]
    pub flux_density: Option<f64>,
    /// Whether leakage terms were solved for
    pub leakage_solved: bool,
}

impl Default for SolveOutcome {
    fn default() -> Self {
        Self {
            converged: true,
            iterations: 0,
            flux_density: None,
            leakage_solved: false,
        }
    }
}

/// Options for a gain solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GainSolveOptions {
    /// `None` to solve gains and xy phase only, `Some(true)` to also solve
    /// the leakages and source polarisation, `Some(false)` to solve source
    /// polarisation but leave the leakages alone.
    pub leakages: Option<bool>,
}

/// Which calibration tables to copy between datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Copy polarisation leakages
    pub pol: bool,
    /// Copy gains
    pub cal: bool,
    /// Copy the bandpass
    pub pass: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            pol: true,
            cal: true,
            pass: true,
        }
    }
}

/// The operations of an external reduction toolkit that the pipeline drives.
///
/// Every call blocks until the toolkit is done. Nothing is retried; any error
/// ends the run.
pub trait ReductionToolkit {
    /// Load the raw files into a single dataset, and index its sources and
    /// frequency configurations.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the toolkit fails or its output is garbled.
    fn load_observation(&self, files: &[PathBuf]) -> Result<LoadedObservation, IOError>;

    /// Split a dataset into one dataset per sub-band, in the order the
    /// toolkit creates them.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the toolkit fails.
    fn split_into_subbands(&self, dataset: &DatasetHandle) -> Result<Vec<DatasetHandle>, IOError>;

    /// How much of a dataset is flagged.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the toolkit fails.
    fn compute_flag_statistics(&self, dataset: &str) -> Result<FlagStatistics, IOError>;

    /// The xy-amplitude time series of a dataset.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the toolkit fails or its output is garbled.
    fn read_xy_amplitudes(&self, dataset: &str) -> Result<Vec<AmplitudeSample>, IOError>;

    /// Flag all data in each time range.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the toolkit fails.
    fn flag_time_ranges(&self, dataset: &str, regions: &[FlagRegion]) -> Result<(), IOError>;

    /// Run the automatic RFI flagger over a dataset.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the toolkit fails.
    fn run_automatic_flagger(&self, dataset: &str) -> Result<bool, IOError>;

    /// Split a dataset by source into a fresh reduction directory.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the directory can't be made or the toolkit
    /// fails.
    fn prepare_reduction(&self, dataset: &str) -> Result<ReductionSet, IOError>;

    /// Solve for the bandpass (and gains) of a calibrator dataset.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the toolkit fails.
    fn run_bandpass_solve(&self, dataset: &str, refant: &str) -> Result<SolveOutcome, IOError>;

    /// Solve for the gains (and maybe leakages) of a calibrator dataset.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the toolkit fails.
    fn run_gain_solve(
        &self,
        dataset: &str,
        refant: &str,
        options: &GainSolveOptions,
    ) -> Result<SolveOutcome, IOError>;

    /// Copy calibration tables between datasets.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the toolkit fails.
    fn copy_calibration(&self, from: &str, to: &str, options: &CopyOptions) -> Result<(), IOError>;

    /// Scale the bandpass of a dataset to the known flux density of a source.
    /// Returns whether the scaling settled.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the toolkit fails.
    fn bootstrap_flux(&self, dataset: &str, source: &str) -> Result<bool, IOError>;
}
