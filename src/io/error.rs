//! Errors that can occur in the io module

use thiserror::Error;

#[derive(Error, Debug)]
#[allow(clippy::upper_case_acronyms)]
/// All the errors that can occur talking to the reduction toolkit or reading
/// and writing the files of a run.
pub enum IOError {
    /// A toolkit task could not be started at all.
    #[error("{source_file}:{source_line}\nCouldn't run {task}: {error}")]
    Spawn {
        /// The task name, e.g. `uvsplit`
        task: String,
        /// The underlying [`std::io::Error`]
        error: std::io::Error,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// A toolkit task ran and reported failure.
    #[error("{task} exited with {status}: {stderr}")]
    TaskFailed {
        /// The task name
        task: String,
        /// The exit status, as displayed by the OS
        status: String,
        /// What the task wrote to stderr
        stderr: String,
    },

    /// The output of a task did not look the way it should.
    #[error("Unexpected output from {task} (expected {expected}, found {found:?})")]
    UnexpectedOutput {
        /// The task name
        task: String,
        /// What the parser was looking for
        expected: String,
        /// The offending text
        found: String,
    },

    /// A task claimed success but the file it should have made is missing.
    #[error("{task} did not produce {path}")]
    MissingOutput {
        /// The task name
        task: String,
        /// The path that should exist
        path: String,
    },

    #[error("{0}")]
    /// Error derived from [`std::io::Error`]
    StdIO(#[from] std::io::Error),

    #[error("{0}")]
    /// Error derived from [`serde_json::Error`]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    /// Error derived from [`glob::PatternError`]
    Glob(#[from] glob::PatternError),
}
