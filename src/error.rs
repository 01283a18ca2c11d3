//! Errors that can occur in the pipeline

use std::path::PathBuf;

use thiserror::Error;

use crate::io::error::IOError;

#[derive(Error, Debug)]
/// Errors related to the command line interface.
pub enum CLIError {
    #[error("Invalid Command Line Argument {option}. Expected {expected}, received {received}")]
    /// When an invalid argument is passed to the command line interface.
    InvalidCommandLineArgument {
        /// The argument name, e.g. `--midweek-threshold`
        option: String,
        /// The expected value
        expected: String,
        /// The value that was received instead
        received: String,
    },
}

/// The role a calibrator plays in the calibration path of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibratorRole {
    /// Bandpass calibrator
    Bandpass,
    /// Flux density calibrator
    Flux,
    /// Leakage calibrator
    Leakage,
}

impl std::fmt::Display for CalibratorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                CalibratorRole::Bandpass => "bandpass",
                CalibratorRole::Flux => "flux density",
                CalibratorRole::Leakage => "leakage",
            }
        )
    }
}

fn fmt_wanted(source_name: &Option<String>) -> String {
    source_name
        .as_ref()
        .map(|name| format!(" (wanted {name})"))
        .unwrap_or_default()
}

/// An enum of all the errors possible in the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input file {} is not accessible", .path.display())]
    /// A file required to start the run does not exist.
    InputError {
        /// The missing path
        path: PathBuf,
    },

    #[error("No {role} calibrator is available for dataset {dataset}{}", fmt_wanted(.source_name))]
    /// A calibrator the calibration path needs is missing, either because
    /// selection found none or because it has no per-source dataset.
    CalibratorUnavailable {
        /// What the calibrator would have been used for
        role: CalibratorRole,
        /// The selected source, if selection found one
        source_name: Option<String>,
        /// The dataset being calibrated
        dataset: String,
    },

    #[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
    /// Error for bad array shape in provided argument
    BadArrayShape {
        /// The argument name within the function
        argument: String,
        /// The function name
        function: String,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    #[error("flag statistics for dataset {dataset} have no value for channel {channel}")]
    /// A channel is missing from a flag statistics snapshot.
    MissingChannel {
        /// The dataset name
        dataset: String,
        /// The 1-based channel number
        channel: usize,
    },

    #[error("{0}")]
    /// Error derived from [`crate::io::error::IOError`]
    IOError(#[from] IOError),

    #[error(transparent)]
    /// Error derived from [`CLIError`]
    CLIError(#[from] CLIError),

    #[cfg(feature = "cli")]
    #[error(transparent)]
    /// Error derived from [`clap::Error`]
    ClapError(#[from] clap::Error),

    #[error("Could not build the pipeline options: {0}")]
    /// Error derived from the options builder
    Options(#[from] crate::pipeline::PipelineOptionsBuilderError),

    #[error("Dry run")]
    /// Not really an error: the run stopped after printing its summary.
    DryRun {},
}
