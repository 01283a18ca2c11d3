//! Running the triage stages over a whole observation.
//!
//! A [`Pipeline`] drives a [`ReductionToolkit`] through loading, splitting,
//! flagging and calibration, making every decision along the way itself and
//! keeping a [`DatasetReport`] of what it decided for each dataset.

use std::{
    collections::{BTreeMap, HashSet},
    fmt::Display,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use derive_builder::Builder;
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, trace, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    calibrators::{select_calibrators, CalibratorAssignment, CalibratorCatalog},
    constants::PKS_1934_638,
    error::{CalibratorRole, PipelineError},
    flags::{select_reference_antenna, FlagStatistics, SnapshotKind},
    io::{
        error::IOError, CopyOptions, GainSolveOptions, ReductionSet, ReductionToolkit,
        SolveOutcome,
    },
    midweek::{detect_midweek_rfi, MidweekParams},
    observation::ObservationRecord,
    rfi_cost::{attribute_flagging_cost, RfiCostReport, SpectrumAllocationTable},
    spectral::ObservingBand,
    types::{AmplitudeSample, FlagRegion},
    with_increment_duration,
};

/// Options for a pipeline run
#[derive(Builder, Debug, Default, Clone)]
pub struct PipelineOptions {
    /// The raw RPFITS files of the observation
    #[builder(default)]
    pub files: Vec<PathBuf>,

    /// Tuning for midweek RFI detection
    #[builder(default)]
    pub midweek: MidweekParams,

    /// Whether to look for and flag midweek RFI
    #[builder(default = "true")]
    pub detect_midweek: bool,
    /// Whether to run the automatic flagger over the wide sub-bands
    #[builder(default = "true")]
    pub auto_flag: bool,
    /// Whether to calibrate each dataset
    #[builder(default = "true")]
    pub calibrate: bool,

    /// Where to write the reports, if anywhere
    #[builder(default)]
    pub report_dir: Option<PathBuf>,

    /// Whether to draw progress bars
    #[builder(default = "true")]
    pub draw_progress: bool,
}

impl Display for PipelineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} detect midweek RFI (bins of {}s, variance threshold {}).",
            if self.detect_midweek {
                "Will"
            } else {
                "Will not"
            },
            self.midweek.bin_seconds,
            self.midweek.variance_threshold,
        )?;
        writeln!(
            f,
            "{} automatically flag wide sub-bands.",
            if self.auto_flag { "Will" } else { "Will not" }
        )?;
        writeln!(
            f,
            "{} calibrate.",
            if self.calibrate { "Will" } else { "Will not" }
        )?;
        match &self.report_dir {
            Some(dir) => writeln!(f, "Will write reports to {}", dir.display())?,
            None => writeln!(f, "Will not write reports")?,
        }
        Ok(())
    }
}

/// A calibration step that failed to converge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceFailure {
    /// What the solve was for
    pub role: String,
    /// The dataset being solved
    pub dataset: String,
    /// How many iterations it ran for
    pub iterations: usize,
}

/// What the calibration path did for a dataset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CalibrationSummary {
    /// The per-source datasets
    pub reduction: ReductionSet,
    /// The final bandpass solve
    pub bandpass: Option<SolveOutcome>,
    /// Whether the flux scale settled, if it was bootstrapped
    pub flux_settled: Option<bool>,
    /// The leakage solve, if there was one
    pub leakage: Option<SolveOutcome>,
}

/// Everything decided for one dataset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetReport {
    /// The dataset
    pub dataset: String,
    /// Flag statistics at each point of the run
    pub snapshots: BTreeMap<SnapshotKind, FlagStatistics>,
    /// Time ranges flagged for midweek RFI
    pub midweek_regions: Vec<FlagRegion>,
    /// Bandwidth lost to each spectrum user
    pub rfi_cost: Option<RfiCostReport>,
    /// Reference antenna
    pub refant: Option<String>,
    /// The calibration path, if it ran
    pub calibration: Option<CalibrationSummary>,
    /// Solves that didn't converge
    pub convergence_failures: Vec<ConvergenceFailure>,
    /// A line per decision, in order
    pub log: Vec<String>,
}

impl DatasetReport {
    /// An empty report for a dataset.
    pub fn new(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            ..Default::default()
        }
    }

    /// Log a line and keep it for the dataset log.
    pub fn note<S: Into<String>>(&mut self, line: S) {
        let line = line.into();
        info!("{}: {}", self.dataset, line);
        self.log.push(line);
    }

    /// The latest snapshot of the given kinds, tried in order.
    pub fn snapshot(&self, kinds: &[SnapshotKind]) -> Option<&FlagStatistics> {
        kinds.iter().find_map(|kind| self.snapshots.get(kind))
    }

    fn check_convergence(&mut self, role: CalibratorRole, dataset: &str, outcome: &SolveOutcome) {
        if !outcome.converged {
            warn!("{} solve on {} failed to converge", role, dataset);
            self.note(format!(
                "{role} solve on {dataset} failed to converge after {} iterations",
                outcome.iterations
            ));
            self.convergence_failures.push(ConvergenceFailure {
                role: role.to_string(),
                dataset: dataset.to_string(),
                iterations: outcome.iterations,
            });
        }
    }
}

/// The outcome of a run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Sources, frequency configurations and datasets
    pub record: ObservationRecord,
    /// Calibrators chosen for each frequency configuration
    pub assignments: IndexMap<usize, Arc<CalibratorAssignment>>,
    /// Per dataset, in configuration then sub-band order
    pub datasets: IndexMap<String, DatasetReport>,
}

impl RunReport {
    /// Lines summarising the whole run.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![];
        for (id, assignment) in &self.assignments {
            lines.push(format!(
                "Frequency configuration {}: bandpass {}, flux {}, leakage {}, gain [{}]",
                id,
                assignment.bandpass.as_deref().unwrap_or("none"),
                assignment.flux.as_deref().unwrap_or("none"),
                assignment.leakage.as_deref().unwrap_or("none"),
                assignment.gain.join(", "),
            ));
            for warning in &assignment.warnings {
                lines.push(format!("  {warning}"));
            }
        }
        for report in self.datasets.values() {
            lines.push(format!(
                "{}: refant {}, {} midweek regions, {} convergence failures",
                report.dataset,
                report.refant.as_deref().unwrap_or("-"),
                report.midweek_regions.len(),
                report.convergence_failures.len(),
            ));
        }
        lines
    }

    /// Write `rfi_calculator.<dataset>.json` and `log.<dataset>` for every
    /// dataset, and `log.run` for the whole run, into `dir`.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if a file can't be written.
    pub fn write_reports<P: AsRef<Path>>(&self, dir: P) -> Result<(), IOError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        for report in self.datasets.values() {
            let name = report.dataset.replace('/', "_");
            if let Some(cost) = &report.rfi_cost {
                let path = dir.join(format!("rfi_calculator.{name}.json"));
                trace!("writing {}", path.display());
                serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), cost)?;
            }
            write_lines(&dir.join(format!("log.{name}")), &report.log)?;
        }
        write_lines(&dir.join("log.run"), &self.summary_lines())?;
        Ok(())
    }
}

fn write_lines(path: &Path, lines: &[String]) -> Result<(), IOError> {
    trace!("writing {}", path.display());
    let mut writer = BufWriter::new(File::create(path)?);
    for line in lines {
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Runs the triage stages with a toolkit.
pub struct Pipeline<T: ReductionToolkit> {
    /// Does the actual data handling
    pub toolkit: T,
    /// What to do
    pub options: PipelineOptions,
    /// Sources known to be calibrators
    pub catalog: CalibratorCatalog,
    /// Who uses which part of the spectrum
    pub spectrum: SpectrumAllocationTable,
}

impl<T: ReductionToolkit> Pipeline<T> {
    /// A pipeline with the built in spectrum allocation table.
    pub fn new(toolkit: T, options: PipelineOptions, catalog: CalibratorCatalog) -> Self {
        Self {
            toolkit,
            options,
            catalog,
            spectrum: SpectrumAllocationTable::default(),
        }
    }

    fn progress_bar(&self, len: usize, message: &'static str) -> ProgressBar {
        let draw_target = if self.options.draw_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let progress = ProgressBar::with_draw_target(Some(len as u64), draw_target);
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:3}% ({eta:5})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        progress.set_message(message);
        progress
    }

    /// Run every stage and report what was decided.
    ///
    /// # Errors
    ///
    /// Will return [`PipelineError::InputError`] if an input file is missing,
    /// [`PipelineError::CalibratorUnavailable`] if calibration needs a source
    /// that isn't there, and [`PipelineError::IOError`] if the toolkit fails.
    pub fn run(&self) -> Result<RunReport, PipelineError> {
        for file in &self.options.files {
            if !file.is_file() {
                return Err(PipelineError::InputError { path: file.clone() });
            }
        }

        let mut record = with_increment_duration!("load", {
            let loaded = self.toolkit.load_observation(&self.options.files)?;
            ObservationRecord::new(loaded.dataset, loaded.sources, loaded.freq_configs)
        });
        info!(
            "loaded {} sources in {} frequency configurations",
            record.sources.len(),
            record.freq_configs.len()
        );

        with_increment_duration!("split", {
            match record.loaded.clone() {
                Some(loaded) => {
                    let split = self.toolkit.split_into_subbands(&loaded)?;
                    let bound = record.bind_datasets(&split);
                    debug!("bound {} of {} split datasets", bound.len(), split.len());
                }
                None => warn!("nothing was loaded, so nothing can be split"),
            }
        });

        let datasets = record.datasets();
        let mut reports: IndexMap<String, DatasetReport> = datasets
            .iter()
            .map(|dataset| (dataset.clone(), DatasetReport::new(dataset)))
            .collect();
        for (dataset, report) in reports.iter_mut() {
            if let Some(sub_band) = record.sub_band(dataset) {
                report.note(format!(
                    "{}, {} band, centre {:.3} GHz",
                    sub_band.classification,
                    sub_band.band(),
                    sub_band.centre_freq
                ));
            }
        }

        with_increment_duration!("flag_stats", {
            self.take_snapshots(
                &datasets,
                &[SnapshotKind::Load, SnapshotKind::Start],
                &mut reports,
            )?;
        });

        if self.options.detect_midweek {
            with_increment_duration!("midweek", {
                self.flag_midweek(&record, &mut reports)?;
                self.take_snapshots(&datasets, &[SnapshotKind::Midweek], &mut reports)?;
            });
        }

        if self.options.auto_flag {
            with_increment_duration!("auto_flag", {
                let wide = wide_datasets(&record, None);
                let progress = self.progress_bar(wide.len(), "auto flagging");
                let mut flagged = vec![];
                for dataset in wide {
                    progress.set_message(format!("flag {dataset}"));
                    if self.auto_flag(&dataset, reports.get_mut(&dataset))? {
                        flagged.push(dataset);
                    }
                    progress.inc(1);
                }
                progress.finish();
                self.take_snapshots(&flagged, &[SnapshotKind::Auto], &mut reports)?;
            });
        }

        with_increment_duration!("rfi_cost", {
            self.attribute_costs(&record, &mut reports)?;
        });

        let assignments = with_increment_duration!("select", {
            self.select_all_calibrators(&record, &mut reports)
        });

        for report in reports.values_mut() {
            let refant = select_reference_antenna(
                &report
                    .snapshot(&[SnapshotKind::Auto, SnapshotKind::Start])
                    .map(|stats| stats.antenna.clone())
                    .unwrap_or_default(),
            );
            report.note(format!("Reference antenna CA0{refant}"));
            report.refant = Some(refant);
        }

        if self.options.calibrate {
            with_increment_duration!("calibrate", {
                let progress = self.progress_bar(reports.len(), "calibrating");
                for report in reports.values_mut() {
                    progress.set_message(format!("calibrate {}", report.dataset));
                    let assignment = record
                        .locate(&report.dataset)
                        .and_then(|location| assignments.get(&location.freq_config))
                        .cloned()
                        .unwrap_or_default();
                    self.calibrate(report, &assignment)?;
                    progress.inc(1);
                }
                progress.finish();
            });
        }

        let run_report = RunReport {
            record,
            assignments,
            datasets: reports,
        };
        if let Some(dir) = &self.options.report_dir {
            with_increment_duration!("write", run_report.write_reports(dir)?);
        }
        Ok(run_report)
    }

    /// Run the automatic flagger over a dataset, noting a failure in its
    /// report. Returns whether the flagger succeeded.
    fn auto_flag(
        &self,
        dataset: &str,
        report: Option<&mut DatasetReport>,
    ) -> Result<bool, PipelineError> {
        let succeeded = self.toolkit.run_automatic_flagger(dataset)?;
        if !succeeded {
            warn!("automatic flagging of {} failed", dataset);
            if let Some(report) = report {
                report.note(format!("Automatic flagging of {dataset} failed"));
            }
        }
        Ok(succeeded)
    }

    /// Take a flag statistics snapshot of each dataset, filed under every
    /// kind given.
    fn take_snapshots(
        &self,
        datasets: &[String],
        kinds: &[SnapshotKind],
        reports: &mut IndexMap<String, DatasetReport>,
    ) -> Result<(), PipelineError> {
        let progress = self.progress_bar(datasets.len(), "flag statistics");
        for dataset in datasets {
            let stats = self.toolkit.compute_flag_statistics(dataset)?;
            if let Some(report) = reports.get_mut(dataset) {
                report.note(format!(
                    "{:.1}% of channel data flagged at {}",
                    stats.mean_channel_fraction() * 100.0,
                    kinds.iter().map(ToString::to_string).collect::<Vec<_>>().join("/")
                ));
                for kind in kinds {
                    report.snapshots.insert(*kind, stats.clone());
                }
            }
            progress.inc(1);
        }
        progress.finish();
        Ok(())
    }

    /// Look for midweek RFI in the wide 16cm sub-bands, and flag what is found
    /// in every dataset of the same IF chain.
    fn flag_midweek(
        &self,
        record: &ObservationRecord,
        reports: &mut IndexMap<String, DatasetReport>,
    ) -> Result<(), PipelineError> {
        let candidates = wide_datasets(record, Some(ObservingBand::Cm16));
        let progress = self.progress_bar(candidates.len(), "midweek RFI");
        let mut series: Vec<(String, Vec<AmplitudeSample>)> = vec![];
        for dataset in candidates {
            series.push((dataset.clone(), self.toolkit.read_xy_amplitudes(&dataset)?));
            progress.inc(1);
        }
        progress.finish();

        let params = self.options.midweek;
        let detections: Vec<(String, Vec<FlagRegion>)> = series
            .par_iter()
            .map(|(dataset, samples)| (dataset.clone(), detect_midweek_rfi(samples, &params)))
            .collect();

        for (dataset, regions) in detections {
            if regions.is_empty() {
                if let Some(report) = reports.get_mut(&dataset) {
                    report.note("No midweek RFI detected");
                }
                continue;
            }
            let location = match record.locate(&dataset) {
                Some(location) => location,
                None => continue,
            };
            let if_chain = record
                .sub_band(&dataset)
                .map_or(location.sub_band + 1, |sub_band| sub_band.if_chain);
            for target in record.chain_datasets(location.freq_config, if_chain) {
                self.toolkit.flag_time_ranges(&target, &regions)?;
                if let Some(report) = reports.get_mut(&target) {
                    for region in &regions {
                        report.note(format!(
                            "Flagged midweek RFI from {} ({:.0}s, found in {})",
                            region.to_miriad_string(),
                            region.duration(),
                            dataset
                        ));
                    }
                    report.midweek_regions.extend(regions.iter().copied());
                }
            }
        }
        Ok(())
    }

    /// Charge what the automatic flagger removed to the users of the spectrum.
    fn attribute_costs(
        &self,
        record: &ObservationRecord,
        reports: &mut IndexMap<String, DatasetReport>,
    ) -> Result<(), PipelineError> {
        let spectrum = &self.spectrum;
        let costs: Vec<(String, RfiCostReport)> = reports
            .par_iter()
            .filter_map(|(dataset, report)| {
                let load = report.snapshots.get(&SnapshotKind::Load)?;
                let auto = report.snapshots.get(&SnapshotKind::Auto)?;
                let sub_band = record.sub_band(dataset)?;
                Some((dataset, load, auto, sub_band))
            })
            .map(|(dataset, load, auto, sub_band)| {
                let load = load.channel_fractions(sub_band.num_chans, dataset)?;
                let auto = auto.channel_fractions(sub_band.num_chans, dataset)?;
                let chan_freqs = sub_band.chan_freqs();
                let cost = attribute_flagging_cost(&load, &auto, &chan_freqs, spectrum)?;
                Ok::<_, PipelineError>((dataset.clone(), cost))
            })
            .collect::<Result<_, PipelineError>>()?;

        for (dataset, cost) in costs {
            if let Some(report) = reports.get_mut(&dataset) {
                for line in cost.summary_lines() {
                    report.note(line);
                }
                report.rfi_cost = Some(cost);
            }
        }
        Ok(())
    }

    /// Choose the calibrators of every frequency configuration once.
    fn select_all_calibrators(
        &self,
        record: &ObservationRecord,
        reports: &mut IndexMap<String, DatasetReport>,
    ) -> IndexMap<usize, Arc<CalibratorAssignment>> {
        let mut assignments = IndexMap::new();
        for (&id, config) in &record.freq_configs {
            let band = match config.band() {
                Some(band) => band,
                None => {
                    warn!("frequency configuration {} has no sub-bands", id);
                    continue;
                }
            };
            let assignment = select_calibrators(&record.observed_sources(id), band, &self.catalog);
            for warning in &assignment.warnings {
                warn!("frequency configuration {}: {}", id, warning);
            }
            for dataset in config.sub_bands.iter().filter_map(|sb| sb.dataset.as_ref()) {
                if let Some(report) = reports.get_mut(dataset) {
                    report.note(format!(
                        "Calibrators: bandpass {}, flux {}, leakage {}",
                        assignment.bandpass.as_deref().unwrap_or("none"),
                        assignment.flux.as_deref().unwrap_or("none"),
                        assignment.leakage.as_deref().unwrap_or("none"),
                    ));
                    for warning in &assignment.warnings {
                        report.note(warning.to_string());
                    }
                }
            }
            assignments.insert(id, Arc::new(assignment));
        }
        assignments
    }

    /// Solve for the bandpass, flux scale and leakages of a dataset.
    fn calibrate(
        &self,
        report: &mut DatasetReport,
        assignment: &CalibratorAssignment,
    ) -> Result<(), PipelineError> {
        let dataset = report.dataset.clone();
        let refant = report
            .refant
            .clone()
            .unwrap_or_else(|| select_reference_antenna(&IndexMap::new()));
        let reduction = self.toolkit.prepare_reduction(&dataset)?;
        let locate = |role: CalibratorRole, source: Option<&String>| {
            source
                .and_then(|source| reduction.find(source))
                .map(str::to_string)
                .ok_or_else(|| PipelineError::CalibratorUnavailable {
                    role,
                    source_name: source.cloned(),
                    dataset: dataset.clone(),
                })
        };

        let bandpass_name = assignment.bandpass.as_ref();
        let bandpass_set = locate(CalibratorRole::Bandpass, bandpass_name)?;
        let mut flagged: HashSet<String> = HashSet::new();

        let outcome = self.toolkit.run_bandpass_solve(&bandpass_set, &refant)?;
        report.check_convergence(CalibratorRole::Bandpass, &bandpass_set, &outcome);
        if self.auto_flag(&bandpass_set, Some(&mut *report))? {
            flagged.insert(bandpass_set.clone());
        }
        let outcome = self.toolkit.run_bandpass_solve(&bandpass_set, &refant)?;
        report.check_convergence(CalibratorRole::Bandpass, &bandpass_set, &outcome);
        report.note(format!(
            "Bandpass solved on {} in {} iterations",
            bandpass_set, outcome.iterations
        ));
        let mut summary = CalibrationSummary {
            bandpass: Some(outcome),
            ..Default::default()
        };

        if let Some(flux) = assignment.flux.as_ref().filter(|&flux| Some(flux) != bandpass_name) {
            let flux_set = locate(CalibratorRole::Flux, Some(flux))?;
            self.toolkit
                .copy_calibration(&bandpass_set, &flux_set, &CopyOptions::default())?;
            if !flagged.contains(&flux_set)
                && self.auto_flag(&flux_set, Some(&mut *report))?
            {
                flagged.insert(flux_set.clone());
            }
            let settled = self.toolkit.bootstrap_flux(&flux_set, flux)?;
            if !settled {
                report.convergence_failures.push(ConvergenceFailure {
                    role: CalibratorRole::Flux.to_string(),
                    dataset: flux_set.clone(),
                    iterations: 0,
                });
            }
            report.note(format!(
                "Flux scale bootstrapped from {} ({})",
                flux,
                if settled { "settled" } else { "did not settle" }
            ));
            self.toolkit.copy_calibration(
                &flux_set,
                &bandpass_set,
                &CopyOptions {
                    pol: false,
                    cal: false,
                    pass: true,
                },
            )?;
            summary.flux_settled = Some(settled);
        }

        if let Some(leakage) = assignment.leakage.as_ref() {
            let leakage_set = locate(CalibratorRole::Leakage, Some(leakage))?;
            let separate = leakage_set != bandpass_set;
            if separate {
                self.toolkit
                    .copy_calibration(&bandpass_set, &leakage_set, &CopyOptions::default())?;
            }
            if !flagged.contains(&leakage_set)
                && self.auto_flag(&leakage_set, Some(&mut *report))?
            {
                flagged.insert(leakage_set.clone());
            }
            let options = GainSolveOptions {
                leakages: (leakage == PKS_1934_638).then_some(true),
            };
            let outcome = self.toolkit.run_gain_solve(&leakage_set, &refant, &options)?;
            report.check_convergence(CalibratorRole::Leakage, &leakage_set, &outcome);
            report.note(format!(
                "Gains solved on {}{}",
                leakage_set,
                if outcome.leakage_solved {
                    " with leakages"
                } else {
                    ""
                }
            ));
            if separate {
                self.toolkit.copy_calibration(
                    &leakage_set,
                    &bandpass_set,
                    &CopyOptions {
                        pol: true,
                        cal: false,
                        pass: false,
                    },
                )?;
            }
            summary.leakage = Some(outcome);
        }

        summary.reduction = reduction;
        report.calibration = Some(summary);
        Ok(())
    }
}

/// The datasets of wide sub-bands, optionally only those in one band.
fn wide_datasets(record: &ObservationRecord, band: Option<ObservingBand>) -> Vec<String> {
    record
        .freq_configs
        .values()
        .flat_map(|config| config.sub_bands.iter())
        .filter(|sub_band| sub_band.classification.is_wide())
        .filter(|sub_band| band.map_or(true, |band| sub_band.band() == band))
        .filter_map(|sub_band| sub_band.dataset.clone())
        .collect()
}
