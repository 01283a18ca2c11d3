//! Driving the Miriad reduction package.
//!
//! Each [`ReductionToolkit`] operation runs one or more Miriad tasks as child
//! processes in the working directory and scrapes what they print. The
//! scraping is done by the free functions in this module, so it can be tested
//! without Miriad installed.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use indexmap::IndexMap;
use lazy_static::lazy_static;
use log::{debug, trace, warn};
use regex::Regex;

use super::{
    error::IOError, CopyOptions, GainSolveOptions, LoadedObservation, ReductionSet,
    ReductionToolkit, SolveOutcome,
};
use crate::{
    constants::{FLUX_BOOTSTRAP_MAX_PASSES, FLUX_BOOTSTRAP_TOLERANCE, SOLVE_INTERVAL_MINUTES},
    flags::FlagStatistics,
    observation::DatasetHandle,
    types::{parse_miriad_time, AmplitudeSample, FlagRegion, FrequencyConfig, Source, SubBand},
};

lazy_static! {
    static ref RPFITS_NAME_RE: Regex = Regex::new(r"^(....-..-..).*\.(.*)$").unwrap();
    static ref UVINDEX_TIME_RE: Regex =
        Regex::new(r"^\d\d\D\D\D\d\d:\d\d:\d\d:\d\d\.\d$").unwrap();
    static ref UVSPLIT_NAME_RE: Regex = Regex::new(r"^uvsplit\.([^.]+)").unwrap();
    static ref MFCAL_ITER_RE: Regex = Regex::new(r"^\s*Iter=(\d+),").unwrap();
    static ref GPCAL_ITER_RE: Regex = Regex::new(r"^\s*Iter=\s*(\d+),").unwrap();
}

/// Options given to atlod when loading RPFITS files.
const LOAD_OPTIONS: &str = "birdie,rfiflag,xycorr,noauto";

/// The log varplt writes the xy-amplitudes to.
const VARPLT_LOG: &str = "varplt.xyamp.out";

/// Stokes parameters and flagging parameters for each pgflag stage.
const PGFLAG_STAGES: [(&str, &str); 4] = [
    ("i,q,u,v", "8,5,5,3,6,3"),
    ("v,q,u,i", "10,2,2,3,7,3"),
    ("v,q,u", "8,2,2,3,6,3"),
    ("u,v,q", "8,2,2,3,6,3"),
];

/// The modes of uvfstats, in the order they are run.
const UVFSTATS_MODES: [&str; 4] = ["stokes", "baseline", "antenna", "channel"];

/// A [`ReductionToolkit`] backed by the Miriad tasks on `PATH`.
#[derive(Debug, Clone)]
pub struct MiriadToolkit {
    /// Where datasets are read and written
    pub work_dir: PathBuf,
    /// Whether to load the raw files, or reuse a dataset loaded by an earlier
    /// run
    pub load: bool,
    /// Whether to split the loaded dataset, or reuse the `uvsplit.*`
    /// datasets of an earlier run
    pub split: bool,
}

impl Default for MiriadToolkit {
    fn default() -> Self {
        Self::new(".")
    }
}

impl MiriadToolkit {
    /// A toolkit working in `work_dir` that loads and splits afresh.
    pub fn new<P: AsRef<Path>>(work_dir: P) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            load: true,
            split: true,
        }
    }

    /// Run a Miriad task in `dir` with `key=value` arguments, returning what
    /// it printed to stdout.
    fn run_task(&self, task: &str, args: &[(&str, &str)], dir: &Path) -> Result<String, IOError> {
        let args: Vec<String> = args
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        let command_line = shlex::try_join(
            std::iter::once(task).chain(args.iter().map(String::as_str)),
        )
        .unwrap_or_else(|_| format!("{} {}", task, args.join(" ")));
        debug!("running {} in {}", command_line, dir.display());

        let output = Command::new(task)
            .args(&args)
            .current_dir(dir)
            .output()
            .map_err(|error| IOError::Spawn {
                task: task.to_string(),
                error,
                source_file: file!(),
                source_line: line!(),
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!("{} output:\n{}", task, &stdout);
        if !output.status.success() {
            return Err(IOError::TaskFailed {
                task: task.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(stdout)
    }

    fn run(&self, task: &str, args: &[(&str, &str)]) -> Result<String, IOError> {
        self.run_task(task, args, &self.work_dir)
    }

    /// The `uvsplit.*` datasets already in the working directory.
    fn existing_splits(&self) -> Result<Vec<String>, IOError> {
        let pattern = self.work_dir.join("uvsplit.*");
        let mut names: Vec<String> = glob::glob(&pattern.to_string_lossy())?
            .filter_map(Result::ok)
            .filter_map(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .filter(|name| !name.contains(".ms") && !name.contains(".def"))
            .collect();
        names.sort();
        Ok(names)
    }
}

impl ReductionToolkit for MiriadToolkit {
    fn load_observation(&self, files: &[PathBuf]) -> Result<LoadedObservation, IOError> {
        let first = files.first().map(|path| path.as_path()).unwrap_or_else(|| Path::new(""));
        let dataset = loaded_dataset_name(first).ok_or_else(|| IOError::UnexpectedOutput {
            task: "atlod".to_string(),
            expected: "an RPFITS file named like 2018-01-05_1200.C007".to_string(),
            found: first.display().to_string(),
        })?;

        if self.load {
            let path = self.work_dir.join(&dataset);
            if path.is_dir() {
                debug!("removing existing dataset {}", path.display());
                fs::remove_dir_all(&path)?;
            }
            let inputs = files
                .iter()
                .map(|file| file.display().to_string())
                .collect::<Vec<_>>()
                .join(",");
            self.run(
                "atlod",
                &[
                    ("in", inputs.as_str()),
                    ("out", dataset.as_str()),
                    ("options", LOAD_OPTIONS),
                ],
            )?;
        } else {
            debug!("reusing loaded dataset {}", dataset);
        }

        let index = self.run("uvindex", &[("vis", dataset.as_str())])?;
        let (sources, freq_configs) = parse_uvindex(&index);
        if freq_configs.is_empty() {
            return Err(IOError::UnexpectedOutput {
                task: "uvindex".to_string(),
                expected: "at least one frequency configuration".to_string(),
                found: index.lines().take(5).collect::<Vec<_>>().join("\n"),
            });
        }
        Ok(LoadedObservation {
            dataset: Some(DatasetHandle::new(&dataset)),
            sources,
            freq_configs,
        })
    }

    fn split_into_subbands(&self, dataset: &DatasetHandle) -> Result<Vec<DatasetHandle>, IOError> {
        let existing = self.existing_splits()?;
        if !self.split {
            debug!("reusing {} split datasets", existing.len());
            return Ok(existing.iter().map(|name| split_handle(name)).collect());
        }
        for name in existing {
            debug!("removing existing split dataset {}", name);
            fs::remove_dir_all(self.work_dir.join(name))?;
        }
        let output = self.run(
            "uvsplit",
            &[("vis", dataset.name.as_str()), ("options", "nosource")],
        )?;
        Ok(parse_uvsplit(&output))
    }

    fn compute_flag_statistics(&self, dataset: &str) -> Result<FlagStatistics, IOError> {
        let mut stats = FlagStatistics::default();
        for mode in UVFSTATS_MODES {
            let output = self.run("uvfstats", &[("vis", dataset), ("mode", mode)])?;
            let fractions = parse_uvfstats(&output);
            match mode {
                "stokes" => stats.stokes = fractions,
                "baseline" => stats.baseline = fractions,
                "antenna" => stats.antenna = fractions,
                _ => {
                    stats.channel = fractions
                        .into_iter()
                        .filter_map(|(channel, fraction)| {
                            channel.parse::<usize>().ok().map(|channel| (channel, fraction))
                        })
                        .collect();
                }
            }
        }
        Ok(stats)
    }

    fn read_xy_amplitudes(&self, dataset: &str) -> Result<Vec<AmplitudeSample>, IOError> {
        let log_path = self.work_dir.join(VARPLT_LOG);
        if log_path.is_file() {
            fs::remove_file(&log_path)?;
        }
        self.run(
            "varplt",
            &[
                ("vis", dataset),
                ("device", "/null"),
                ("xaxis", "time"),
                ("yaxis", "xyamp"),
                ("log", VARPLT_LOG),
            ],
        )?;
        if !log_path.is_file() {
            return Err(IOError::MissingOutput {
                task: "varplt".to_string(),
                path: log_path.display().to_string(),
            });
        }
        parse_varplt_log(&fs::read_to_string(&log_path)?)
    }

    fn flag_time_ranges(&self, dataset: &str, regions: &[FlagRegion]) -> Result<(), IOError> {
        for region in regions {
            let select = format!("time({})", region.to_miriad_string());
            self.run(
                "uvflag",
                &[("vis", dataset), ("flagval", "flag"), ("select", select.as_str())],
            )?;
        }
        Ok(())
    }

    fn run_automatic_flagger(&self, dataset: &str) -> Result<bool, IOError> {
        if !self.work_dir.join(dataset).is_dir() {
            warn!("can't flag {}, no such dataset", dataset);
            return Ok(false);
        }
        for (stage, (stokes, flagpar)) in PGFLAG_STAGES.into_iter().enumerate() {
            debug!("pgflag stage {} on {}", stage + 1, dataset);
            self.run(
                "pgflag",
                &[
                    ("vis", dataset),
                    ("stokes", stokes),
                    ("flagpar", flagpar),
                    ("options", "nodisp"),
                    ("command", "<b"),
                ],
            )?;
        }
        Ok(true)
    }

    fn prepare_reduction(&self, dataset: &str) -> Result<ReductionSet, IOError> {
        let directory = PathBuf::from(format!("reduction.{dataset}"));
        let path = self.work_dir.join(&directory);
        if path.is_dir() {
            debug!("removing existing reduction directory {}", path.display());
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir(&path)?;
        let parent = format!("../{dataset}");
        let output = self.run_task("uvsplit", &[("vis", parent.as_str())], &path)?;
        let datasets = parse_created_datasets(&output)
            .into_iter()
            .map(|name| format!("{}/{}", directory.display(), name))
            .collect();
        Ok(ReductionSet {
            directory,
            datasets,
        })
    }

    fn run_bandpass_solve(&self, dataset: &str, refant: &str) -> Result<SolveOutcome, IOError> {
        let interval = SOLVE_INTERVAL_MINUTES.to_string();
        let output = self.run(
            "mfcal",
            &[
                ("vis", dataset),
                ("refant", refant),
                ("interval", interval.as_str()),
            ],
        )?;
        Ok(parse_solve_output(&output, &MFCAL_ITER_RE))
    }

    fn run_gain_solve(
        &self,
        dataset: &str,
        refant: &str,
        options: &GainSolveOptions,
    ) -> Result<SolveOutcome, IOError> {
        let interval = SOLVE_INTERVAL_MINUTES.to_string();
        let mut gpcal_options = vec!["xyvary"];
        if let Some(leakages) = options.leakages {
            gpcal_options.push("qusolve");
            if !leakages {
                gpcal_options.push("nopol");
            }
        }
        let gpcal_options = gpcal_options.join(",");
        let output = self.run(
            "gpcal",
            &[
                ("vis", dataset),
                ("refant", refant),
                ("interval", interval.as_str()),
                ("options", gpcal_options.as_str()),
            ],
        )?;
        Ok(parse_solve_output(&output, &GPCAL_ITER_RE))
    }

    fn copy_calibration(&self, from: &str, to: &str, options: &CopyOptions) -> Result<(), IOError> {
        let gpcopy_options = copy_options_string(options);
        let mut args = vec![("vis", from), ("out", to)];
        if !gpcopy_options.is_empty() {
            args.push(("options", gpcopy_options.as_str()));
        }
        self.run("gpcopy", &args)?;
        Ok(())
    }

    fn bootstrap_flux(&self, dataset: &str, source: &str) -> Result<bool, IOError> {
        let select = format!("source({source})");
        let mut correction = f64::INFINITY;
        let mut passes = 0;
        while correction.abs() > FLUX_BOOTSTRAP_TOLERANCE && passes < FLUX_BOOTSTRAP_MAX_PASSES {
            let output = self.run(
                "mfboot",
                &[
                    ("vis", dataset),
                    ("select", select.as_str()),
                    ("device", "/null"),
                ],
            )?;
            passes += 1;
            if let Some(adjustment) = parse_mfboot_correction(&output) {
                correction = adjustment;
            }
            debug!("mfboot pass {} on {}: correction {}", passes, dataset, correction);
        }
        let settled = correction.abs() <= FLUX_BOOTSTRAP_TOLERANCE;
        if !settled {
            warn!("flux scale of {} did not settle after {} passes", dataset, passes);
        }
        Ok(settled)
    }
}

/// The name atlod loads into, derived from the first RPFITS file:
/// `2018-01-05_1200.C007` loads into `C007_2018-01-05.uv`.
pub fn loaded_dataset_name(first_file: &Path) -> Option<String> {
    let name = first_file.file_name()?.to_string_lossy();
    let captures = RPFITS_NAME_RE.captures(&name)?;
    Some(format!("{}_{}.uv", &captures[2], &captures[1]))
}

/// Parse the sources and frequency configurations from uvindex output.
///
/// Source rows start with a scan time and have eight columns: time, name,
/// calibrator code, then the frequency configuration in the seventh. A blank
/// calibrator code leaves seven columns. Position rows have six columns
/// starting with a source name already seen. IF rows follow a
/// `Frequency Configuration N` line until a blank line.
pub fn parse_uvindex(output: &str) -> (Vec<Source>, Vec<FrequencyConfig>) {
    let mut sources: IndexMap<String, Source> = IndexMap::new();
    let mut freq_configs: Vec<FrequencyConfig> = vec![];
    let mut in_config = false;

    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            in_config = false;
            continue;
        }
        if tokens.len() >= 3 && tokens[0] == "Frequency" && tokens[1] == "Configuration" {
            match tokens[2].parse::<usize>() {
                Ok(id) => {
                    freq_configs.push(FrequencyConfig::new(id));
                    in_config = true;
                }
                Err(_) => warn!("unreadable frequency configuration line {:?}", line),
            }
            continue;
        }
        if UVINDEX_TIME_RE.is_match(tokens[0]) && (tokens.len() == 8 || tokens.len() == 7) {
            let (cal_code, config_token) = if tokens.len() == 8 {
                (tokens[2], tokens[6])
            } else {
                ("", tokens[5])
            };
            if let Ok(freq_config) = config_token.parse::<usize>() {
                sources
                    .entry(tokens[1].to_string())
                    .or_insert_with(|| Source::new(tokens[1]))
                    .add_cut(freq_config, tokens[0], cal_code);
            }
            continue;
        }
        if in_config {
            if let Some(sub_band) = parse_if_row(&tokens, freq_configs.last()) {
                if let Some(config) = freq_configs.last_mut() {
                    config.sub_bands.push(sub_band);
                }
            }
            continue;
        }
        if tokens.len() == 6 {
            if let Some(source) = sources.get_mut(tokens[0]) {
                source.ra = Some(tokens[2].to_string());
                source.dec = Some(tokens[3].to_string());
            }
        }
    }
    (sources.into_values().collect(), freq_configs)
}

/// An IF row: channels, first frequency, width and rest frequency [GHz], an
/// unused column and maybe the IF chain. Rows that aren't numbers (column
/// headings) give `None`.
fn parse_if_row(tokens: &[&str], config: Option<&FrequencyConfig>) -> Option<SubBand> {
    if tokens.len() < 5 {
        return None;
    }
    let num_chans = tokens[0].parse::<usize>().ok()?;
    let first_freq = tokens[1].parse::<f64>().ok()?;
    let chan_width = tokens[2].parse::<f64>().ok()?;
    let rest_freq = tokens[3].parse::<f64>().ok()?;
    let if_chain = match tokens.get(5) {
        Some(token) => token.parse::<usize>().ok()?,
        None => config.map_or(0, |config| config.sub_bands.len()) + 1,
    };
    Some(SubBand::new(num_chans, first_freq, chan_width, rest_freq, if_chain))
}

/// A handle for a `uvsplit.<centre MHz>` dataset.
fn split_handle(name: &str) -> DatasetHandle {
    DatasetHandle {
        name: name.to_string(),
        centre_freq_mhz: UVSPLIT_NAME_RE
            .captures(name)
            .and_then(|captures| captures[1].parse::<i64>().ok()),
    }
}

/// The datasets named on `Creating <dataset>` lines.
fn parse_created_datasets(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            match (tokens.next(), tokens.next()) {
                (Some("Creating"), Some(name)) => Some(name.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// The datasets uvsplit created, with the centre frequencies from their
/// names.
pub fn parse_uvsplit(output: &str) -> Vec<DatasetHandle> {
    parse_created_datasets(output)
        .iter()
        .map(|name| split_handle(name))
        .collect()
}

/// The `key pct%` rows below the dashed line of uvfstats output, as
/// fractions.
pub fn parse_uvfstats(output: &str) -> IndexMap<String, f64> {
    let mut fractions = IndexMap::new();
    let mut in_table = false;
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [first, ..] if first.starts_with("---") => in_table = true,
            [key, percent] if in_table => {
                match percent.trim_end_matches('%').parse::<f64>() {
                    Ok(percent) => {
                        fractions.insert(key.to_string(), percent / 100.0);
                    }
                    Err(_) => trace!("skipping uvfstats row {:?}", line),
                }
            }
            _ => {}
        }
    }
    fractions
}

/// Parse a varplt log of xy-amplitudes against time.
///
/// The header gives a base time; each sample starts with a day offset and
/// `hh:mm:ss` followed by readings, and may run on over further lines.
///
/// # Errors
///
/// Will return [`IOError::UnexpectedOutput`] if a line can't be read, or a
/// sample comes before the base time.
pub fn parse_varplt_log(log: &str) -> Result<Vec<AmplitudeSample>, IOError> {
    let garbled = |expected: &str, line: &str| IOError::UnexpectedOutput {
        task: "varplt".to_string(),
        expected: expected.to_string(),
        found: line.to_string(),
    };
    let parse_amplitudes = |tokens: &[&str], line: &str| {
        tokens
            .iter()
            .map(|token| token.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| garbled("amplitudes", line))
    };

    let mut base_time: Option<f64> = None;
    let mut samples: Vec<AmplitudeSample> = vec![];
    for line in log.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens[0] == "#" {
            if tokens.get(1) == Some(&"Base") {
                let time = tokens
                    .get(4)
                    .and_then(|time| parse_miriad_time(time))
                    .ok_or_else(|| garbled("a base time", line))?;
                base_time = Some(time);
            }
            continue;
        }
        if tokens.len() == 6 {
            let base = base_time.ok_or_else(|| garbled("a base time first", line))?;
            let offset = parse_offset(tokens[0], tokens[1])
                .ok_or_else(|| garbled("a day and time offset", line))?;
            samples.push(AmplitudeSample {
                time: base + offset,
                amplitudes: parse_amplitudes(&tokens[2..], line)?,
            });
        } else {
            let amplitudes = parse_amplitudes(&tokens, line)?;
            samples
                .last_mut()
                .ok_or_else(|| garbled("a sample to continue", line))?
                .amplitudes
                .extend(amplitudes);
        }
    }
    Ok(samples)
}

/// Seconds from a day count and `hh:mm:ss`.
fn parse_offset(day: &str, hms: &str) -> Option<f64> {
    let day = day.parse::<f64>().ok()?;
    let parts: Vec<f64> = hms
        .split(':')
        .map(|part| part.parse::<f64>().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [hours, minutes, seconds] => {
            Some(day * 86400.0 + hours * 3600.0 + minutes * 60.0 + seconds)
        }
        _ => None,
    }
}

/// Scrape a mfcal or gpcal run: iterations, flux density, whether leakages
/// were solved and whether it failed to converge.
pub fn parse_solve_output(output: &str, iteration_re: &Regex) -> SolveOutcome {
    let mut outcome = SolveOutcome::default();
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["I", "flux", "density:", value, ..] => match value.parse::<f64>() {
                Ok(flux) => outcome.flux_density = Some(flux),
                Err(_) => warn!("unreadable flux density {:?}", line),
            },
            ["###", _, "Failed", _, "converge", ..] => outcome.converged = false,
            ["Leakage", "terms:", ..] => outcome.leakage_solved = true,
            _ => {
                if let Some(iterations) = iteration_re
                    .captures(line)
                    .and_then(|captures| captures[1].parse::<usize>().ok())
                {
                    outcome.iterations = iterations;
                }
            }
        }
    }
    outcome
}

/// Scrape a mfcal run.
pub fn parse_mfcal_output(output: &str) -> SolveOutcome {
    parse_solve_output(output, &MFCAL_ITER_RE)
}

/// Scrape a gpcal run.
pub fn parse_gpcal_output(output: &str) -> SolveOutcome {
    parse_solve_output(output, &GPCAL_ITER_RE)
}

/// The spectral correction on the last `Adjusting` line of mfboot output.
pub fn parse_mfboot_correction(output: &str) -> Option<f64> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                ["Adjusting", _, _, _, correction, ..] => correction.parse::<f64>().ok(),
                _ => None,
            }
        })
        .last()
}

/// The gpcopy options that leave out the tables not wanted.
fn copy_options_string(options: &CopyOptions) -> String {
    [
        (options.pol, "nopol"),
        (options.cal, "nocal"),
        (options.pass, "nopass"),
    ]
    .iter()
    .filter(|(copy, _)| !copy)
    .map(|(_, option)| *option)
    .collect::<Vec<_>>()
    .join(",")
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    use super::*;

    const UVINDEX_OUTPUT: &str = "\
Summary listing for data-set C007_2018-01-05.uv

      Time        Source   CalCode Antennas Spectral Wideband  Freq  Record
                  Name                        Channels Channels Config  No.
18JAN05:12:00:00.0 1934-638     C      6     4098     0     1       1
18JAN05:12:10:00.0 target              6     4098     0     1     101
18JAN05:12:20:00.0 0823-500     C      6     4098     0     1     201
18JAN05:12:30:00.0 target              6     4098     0     1     301

------------------------------------------------

Frequency Configuration 1
  Channels  Freq(chan=1)  Increment  Restfreq  Pols  IFchain
     2049     1.07600    0.001000   0.00000     4     1
     2049     1.07600    0.001000   0.00000     4     2

------------------------------------------------

  Source                   CalCode Right Ascension  Declination   Dra(arcsec)
1934-638                      C  19:39:25.03     -63:42:45.63     0.00     0.00
target                           12:00:00.00     -45:00:00.00     0.00
";

    #[test]
    fn test_loaded_dataset_name() {
        assert_eq!(
            loaded_dataset_name(Path::new("data/2018-01-05_1200.C007")),
            Some("C007_2018-01-05.uv".to_string())
        );
        assert_eq!(loaded_dataset_name(Path::new("observation.rpf")), None);
    }

    #[test]
    fn test_parse_uvindex() {
        let (sources, configs) = parse_uvindex(UVINDEX_OUTPUT);
        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["1934-638", "target", "0823-500"]);
        assert_eq!(sources[0].cuts[0].cal_code, "C");
        assert_eq!(sources[0].cuts[0].freq_config, 1);
        assert_eq!(sources[1].cuts.len(), 2);
        assert_eq!(sources[1].cuts[0].cal_code, "");
        assert_eq!(sources[0].ra.as_deref(), Some("19:39:25.03"));
        assert_eq!(sources[2].ra, None);

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].id, 1);
        assert_eq!(configs[0].sub_bands.len(), 2);
        assert_eq!(configs[0].sub_bands[1].if_chain, 2);
        assert_eq!(configs[0].sub_bands[0].centre_freq_mhz(), 2100);
        assert!(configs[0].sub_bands[0].classification.is_wide());
    }

    #[test]
    fn test_parse_uvindex_implicit_if_chain() {
        let output = "\
Frequency Configuration 2
     2049             4.50000    0.001000   0.00000     1
     2049             8.50000    0.001000   0.00000     1
";
        let (_, configs) = parse_uvindex(output);
        assert_eq!(configs[0].id, 2);
        let chains: Vec<usize> = configs[0].sub_bands.iter().map(|sb| sb.if_chain).collect();
        assert_eq!(chains, vec![1, 2]);
    }

    #[test]
    fn test_parse_uvsplit() {
        let output = "\
Uvsplit: version 1.0
Creating uvsplit.2100
Creating uvsplit.2100.2
Creating uvsplit.5500
";
        let handles = parse_uvsplit(output);
        assert_eq!(handles.len(), 3);
        assert_eq!(handles[1].name, "uvsplit.2100.2");
        assert_eq!(handles[1].centre_freq_mhz, Some(2100));
        assert_eq!(handles[2].centre_freq_mhz, Some(5500));
        assert_eq!(split_handle("uvsplit.x").centre_freq_mhz, None);
    }

    #[test]
    fn test_parse_uvfstats() {
        let output = "\
Uvfstats: version 1.0
  Antenna   Flagged
  -------   -------
        1     12.50%
        3      0.00%
  summary line with more words
";
        let fractions = parse_uvfstats(output);
        assert_eq!(fractions.len(), 2);
        assert_abs_diff_eq!(fractions["1"], 0.125);
        assert_abs_diff_eq!(fractions["3"], 0.0);
    }

    #[test]
    fn test_parse_varplt_log() {
        let log = "\
# Points from dataset uvsplit.2100
# Base time is 18JAN05:12:00:00.0
       0 00:00:10   1.0   2.0   3.0   4.0
          5.0   6.0
       0 00:00:20   1.5   1.5   1.5   1.5
       1 00:00:00   2.0   2.0   2.0   2.0
";
        let samples = parse_varplt_log(log).unwrap();
        assert_eq!(samples.len(), 3);
        assert_abs_diff_eq!(samples[0].time, 1_515_153_610.0);
        assert_eq!(samples[0].amplitudes.len(), 6);
        assert_abs_diff_eq!(samples[0].spread(), 5.0);
        assert_abs_diff_eq!(samples[2].time, 1_515_153_600.0 + 86400.0);
    }

    #[test]
    fn test_parse_varplt_log_needs_base_time() {
        let log = "       0 00:00:10   1.0   2.0   3.0   4.0\n";
        assert!(matches!(
            parse_varplt_log(log),
            Err(IOError::UnexpectedOutput { .. })
        ));
        assert!(matches!(
            parse_varplt_log("   1.0 2.0\n"),
            Err(IOError::UnexpectedOutput { .. })
        ));
    }

    #[test]
    fn test_parse_mfcal_output() {
        let output = "\
Mfcal: version 1.0
Iter=1, Amplit/Phase Soln Err:  0.100
Iter=12, Amplit/Phase Soln Err:  0.001
I flux density:   14.9400
### Warning: Failed to converge
";
        let outcome = parse_mfcal_output(output);
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 12);
        assert_eq!(outcome.flux_density, Some(14.94));
        assert!(!outcome.leakage_solved);
    }

    #[test]
    fn test_parse_gpcal_output() {
        let output = "\
Gpcal: version 1.0
 Iter=  7, Amplit/Phase Soln Err:  0.0010
Leakage terms:
 Ant    1:Dx,Dy = ( 0.001, 0.002),( 0.003, 0.004)
";
        let outcome = parse_gpcal_output(output);
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 7);
        assert!(outcome.leakage_solved);
        assert_eq!(outcome.flux_density, None);
    }

    #[test]
    fn test_parse_mfboot_correction() {
        let output = "\
Mfboot: version 1.0
Adjusting flux scale by  0.0120 at 2.100 GHz
Adjusting flux scale by -0.0010 at 2.100 GHz
";
        assert_eq!(parse_mfboot_correction(output), Some(-0.001));
        assert_eq!(parse_mfboot_correction("nothing\n"), None);
    }

    #[test]
    fn test_copy_options_string() {
        assert_eq!(copy_options_string(&CopyOptions::default()), "");
        assert_eq!(
            copy_options_string(&CopyOptions {
                pol: false,
                cal: false,
                pass: true,
            }),
            "nopol,nocal"
        );
    }

    #[test]
    fn test_existing_splits_skips_exports() {
        let dir = tempdir().unwrap();
        for name in ["uvsplit.2100", "uvsplit.5500", "uvsplit.2100.ms", "uvsplit.2100.def"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let toolkit = MiriadToolkit {
            split: false,
            ..MiriadToolkit::new(dir.path())
        };
        let handles = toolkit
            .split_into_subbands(&DatasetHandle::new("C007_2018-01-05.uv"))
            .unwrap();
        let names: Vec<&str> = handles.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["uvsplit.2100", "uvsplit.5500"]);
    }

    #[test]
    fn test_missing_task_is_spawn_error() {
        let dir = tempdir().unwrap();
        let toolkit = MiriadToolkit::new(dir.path());
        assert!(matches!(
            toolkit.run("cabb-no-such-task", &[("vis", "x")]),
            Err(IOError::Spawn { .. })
        ));
    }

    #[test]
    fn test_flagging_missing_dataset_fails() {
        let dir = tempdir().unwrap();
        let toolkit = MiriadToolkit::new(dir.path());
        // no pgflag is run, so this doesn't need Miriad installed
        assert!(!toolkit.run_automatic_flagger("uvsplit.2100").unwrap());
    }
}
