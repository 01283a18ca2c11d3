//! Command Line Interface helpers for cabb_pipeline

use crate::{
    calibrators::CalibratorCatalog,
    error::{CLIError::InvalidCommandLineArgument, PipelineError, PipelineError::DryRun},
    get_durations,
    io::miriad::MiriadToolkit,
    midweek::MidweekParams,
    observation::ObservationRecord,
    pipeline::{Pipeline, PipelineOptionsBuilder, RunReport},
    rfi_cost::SpectrumAllocationTable,
    PipelineOptions,
};
use clap::{
    arg, command,
    ErrorKind::{ArgumentNotFound, DisplayHelp, DisplayVersion},
    ValueHint::{DirPath, FilePath},
};
use log::{debug, info, trace, warn, LevelFilter};
use prettytable::{format as prettyformat, row, table};
use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    path::PathBuf,
    time::Duration,
};

/// Everything needed to run the pipeline from the command line.
pub struct PipelineContext {
    /// Runs the Miriad tasks
    pub toolkit: MiriadToolkit,
    /// Stage switches and tuning
    pub options: PipelineOptions,
    /// Sources known to be calibrators
    pub catalog: CalibratorCatalog,
    /// Who uses which part of the spectrum
    pub spectrum: SpectrumAllocationTable,
}

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match (GIT_HEAD_REF, GIT_COMMIT_HASH) {
        (Some(hr), Some(hash)) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                hash,
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {hr}")?;
        }
        _ => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {BUILT_TIME_UTC}")?;
    writeln!(f, "         with compiler {RUSTC_VERSION}")?;
    writeln!(f)?;
    Ok(())
}

impl Display for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        writeln!(f, "Working directory:    {}", self.toolkit.work_dir.display())?;
        writeln!(f, "RPFITS files:")?;
        for file in &self.options.files {
            writeln!(f, "    {}", file.display())?;
        }
        writeln!(
            f,
            "{} load the RPFITS files.",
            if self.toolkit.load { "Will" } else { "Will not" }
        )?;
        writeln!(
            f,
            "{} split the loaded dataset.",
            if self.toolkit.split { "Will" } else { "Will not" }
        )?;
        writeln!(f, "Calibrator catalog:   {} sources", self.catalog.len())?;
        writeln!(
            f,
            "Spectrum allocations: {} entries",
            self.spectrum.entries.len()
        )?;
        write!(f, "Pipeline options: \n{}", &self.options)?;
        Ok(())
    }
}

/// The frequency configurations of an observation as a table.
pub fn fmt_freq_configs(record: &ObservationRecord) -> String {
    let mut config_table = table!([
        "config",
        "IF",
        "chans",
        "centre [GHz]",
        "width [MHz]",
        "sb",
        "chain",
        "class",
        "band",
        "dataset"
    ]);
    config_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
    for config in record.freq_configs.values() {
        for (idx, sub_band) in config.sub_bands.iter().enumerate() {
            config_table.add_row(row![r =>
                config.id,
                idx + 1,
                sub_band.num_chans,
                format!("{:.3}", sub_band.centre_freq),
                format!("{:.4}", sub_band.chan_width * 1000.0),
                format!("{:?}", sub_band.sideband),
                sub_band.if_chain,
                sub_band.classification.band_type(),
                sub_band.band(),
                sub_band.dataset.as_deref().unwrap_or("-")
            ]);
        }
    }
    config_table.to_string()
}

/// The sources of an observation as a table.
pub fn fmt_sources(record: &ObservationRecord) -> String {
    let mut source_table = table!(["source", "RA", "Dec", "cuts", "configs", "cal codes"]);
    source_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
    for source in record.sources.values() {
        let mut configs: Vec<usize> = source.cuts.iter().map(|cut| cut.freq_config).collect();
        configs.dedup();
        let cal_codes: String = source
            .cuts
            .iter()
            .map(|cut| if cut.cal_code.is_empty() { "-" } else { cut.cal_code.as_str() })
            .collect::<Vec<_>>()
            .join("");
        source_table.add_row(row![r =>
            source.name,
            source.ra.as_deref().unwrap_or("?"),
            source.dec.as_deref().unwrap_or("?"),
            source.cuts.len(),
            configs.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
            cal_codes
        ]);
    }
    source_table.to_string()
}

impl PipelineContext {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, PipelineError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let mut app = command!()
            .arg_required_else_help(true)
            .next_line_help(false)
            .about("Triage ATCA CABB observations: flag RFI, choose calibrators \
                    and calibrate with Miriad.")
            .args(&[
                // input options
                arg!(files: <FILES>... "RPFITS files of the observation")
                    .help_heading("INPUT")
                    .value_hint(FilePath)
                    .required(true),
                arg!(--"work-dir" <PATH> "Directory the Miriad datasets live in")
                    .help_heading("INPUT")
                    .value_hint(DirPath)
                    .required(false),
                arg!(--caldb <PATH> "Calibrator catalog, JSON of the form {\"caldb\": {name: ..}}")
                    .help_heading("INPUT")
                    .value_hint(FilePath)
                    .required(false),
                arg!(--"spectrum-table" <PATH> "Spectrum allocation table, JSON")
                    .help_heading("INPUT")
                    .value_hint(FilePath)
                    .required(false),

                // output options
                arg!(--"report-dir" <PATH> "Where to write reports [default: the working directory]")
                    .help_heading("OUTPUT")
                    .value_hint(DirPath)
                    .required(false),

                // stage switches
                arg!(--"no-load" "Reuse the dataset loaded by an earlier run")
                    .help_heading("STAGES"),
                arg!(--"no-split" "Reuse the uvsplit datasets of an earlier run")
                    .help_heading("STAGES"),
                arg!(--"no-midweek" "Don't look for midweek RFI")
                    .help_heading("STAGES"),
                arg!(--"no-flag" "Don't run the automatic flagger")
                    .help_heading("STAGES"),
                arg!(--"no-calibrate" "Stop before calibration")
                    .help_heading("STAGES"),

                // midweek tuning
                arg!(--"midweek-threshold" <VARIANCE> "Variance of the xy-amplitude spread above which a bin is suspect [default: 200]")
                    .help_heading("MIDWEEK RFI")
                    .required(false),
                arg!(--"midweek-bin-seconds" <SECONDS> "Width of the time bins [default: 60]")
                    .help_heading("MIDWEEK RFI")
                    .required(false),

                // misc
                arg!(--"no-draw-progress" "do not show progress bars"),
                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(-q --quiet "Only log warnings and errors"),
            ]);
        let matches = app.try_get_matches_from_mut(args)?;
        Ok(matches)
    }

    fn parse_positive(
        matches: &clap::ArgMatches,
        option: &str,
        default: f64,
    ) -> Result<f64, PipelineError> {
        match matches.value_of_t::<f64>(option) {
            Ok(value) if value > 0.0 && value.is_finite() => Ok(value),
            Ok(value) => Err(PipelineError::CLIError(InvalidCommandLineArgument {
                option: format!("--{option}"),
                expected: "a positive number".into(),
                received: format!("{value}"),
            })),
            Err(err) => match err.kind() {
                ArgumentNotFound { .. } => Ok(default),
                _ => Err(err.into()),
            },
        }
    }

    fn parse_midweek_matches(matches: &clap::ArgMatches) -> Result<MidweekParams, PipelineError> {
        let defaults = MidweekParams::default();
        Ok(MidweekParams {
            variance_threshold: Self::parse_positive(
                matches,
                "midweek-threshold",
                defaults.variance_threshold,
            )?,
            bin_seconds: Self::parse_positive(
                matches,
                "midweek-bin-seconds",
                defaults.bin_seconds,
            )?,
            ..defaults
        })
    }

    /// Parse an iterator of arguments into a [`PipelineContext`].
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `clap::Error` if clap cannot parse `args`
    /// - [`PipelineError::IOError`] if the catalog or spectrum table can't be read
    /// - [`PipelineError::CLIError`] if the arguments are invalid
    /// - [`PipelineError::DryRun`] if `--dry-run` was given
    pub fn from_args<I, T>(args: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        if matches.is_present("quiet") {
            log::set_max_level(LevelFilter::Warn);
        }

        let work_dir: PathBuf = matches.value_of("work-dir").unwrap_or(".").into();
        let files: Vec<PathBuf> = match matches.values_of_t::<PathBuf>("files") {
            Ok(files) => files,
            _ => unreachable!("<FILES> is required, enforced by clap"),
        };

        let toolkit = MiriadToolkit {
            load: !matches.is_present("no-load"),
            split: !matches.is_present("no-split"),
            ..MiriadToolkit::new(&work_dir)
        };

        let catalog = match matches.value_of("caldb") {
            Some(path) => CalibratorCatalog::from_json_file(path)?,
            None => {
                warn!("no calibrator catalog given, using the well known calibrators");
                CalibratorCatalog::well_known()
            }
        };
        let spectrum = match matches.value_of("spectrum-table") {
            Some(path) => SpectrumAllocationTable::from_json_file(path)?,
            None => SpectrumAllocationTable::default(),
        };

        let options = PipelineOptionsBuilder::default()
            .files(files)
            .midweek(Self::parse_midweek_matches(&matches)?)
            .detect_midweek(!matches.is_present("no-midweek"))
            .auto_flag(!matches.is_present("no-flag"))
            .calibrate(!matches.is_present("no-calibrate"))
            .report_dir(Some(
                matches
                    .value_of("report-dir")
                    .map_or_else(|| work_dir.clone(), PathBuf::from),
            ))
            .draw_progress(!matches.is_present("no-draw-progress"))
            .build()?;

        let result = Self {
            toolkit,
            options,
            catalog,
            spectrum,
        };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        Ok(result)
    }

    /// Run every stage of the pipeline, and log a summary of the observation.
    ///
    /// # Errors
    ///
    /// Will return [`PipelineError`] if any stage fails.
    pub fn run(self) -> Result<RunReport, PipelineError> {
        let mut pipeline = Pipeline::new(self.toolkit, self.options, self.catalog);
        pipeline.spectrum = self.spectrum;
        let report = pipeline.run()?;

        info!("Frequency configurations:\n{}", fmt_freq_configs(&report.record));
        info!("Sources:\n{}", fmt_sources(&report.record));
        for line in report.summary_lines() {
            info!("{}", line);
        }
        Ok(report)
    }
}

/// Parse arguments, run the pipeline and return the exit code.
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T> + Debug,
    T: Into<OsString> + Clone,
{
    let pipeline_ctx = match PipelineContext::from_args(args) {
        Ok(pipeline_ctx) => pipeline_ctx,
        Err(DryRun {}) => {
            info!("Dry run. No files will be written.");
            return 0;
        }
        Err(PipelineError::ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match pipeline_ctx.run() {
        Ok(report) => {
            info!(
                "total duration: {:?}",
                get_durations()
                    .into_iter()
                    .fold(Duration::ZERO, |duration_sum, (name, duration)| {
                        info!("{} duration: {:?}", name, duration);
                        duration_sum + duration
                    })
            );
            let failures: usize = report
                .datasets
                .values()
                .map(|dataset| dataset.convergence_failures.len())
                .sum();
            if failures > 0 {
                warn!("{} calibration solves failed to converge", failures);
            }
            0
        }
        Err(e) => {
            eprintln!("pipeline error: {e}");
            1
        }
    }
}
