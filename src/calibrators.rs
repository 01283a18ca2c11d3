//! Choosing calibrators for a frequency configuration.
//!
//! Which sources make good flux density, bandpass and leakage calibrators
//! depends on the observing band, so the preferences are kept as one rule
//! table per band. Selection never fails; anything it can't find is reported
//! as a [`SelectionWarning`].

use std::{fmt::Display, fs::File, io::BufReader, path::Path};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{CALIBRATOR_CAL_CODE, MIN_LEAKAGE_CUTS, PKS_0823_500, PKS_1934_638},
    io::error::IOError,
    spectral::ObservingBand,
};

/// The list of known ATCA calibrators, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibratorCatalog {
    #[serde(rename = "caldb")]
    calibrators: IndexMap<String, serde_json::Value>,
}

impl CalibratorCatalog {
    /// Read the catalog from a JSON file of the form `{"caldb": {name: ..}}`.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the file can't be read or parsed.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, IOError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// A catalog of names with no descriptors.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            calibrators: names
                .into_iter()
                .map(|name| (name.into(), serde_json::Value::Null))
                .collect(),
        }
    }

    /// The calibrators the band rules know by name, for when no catalog is
    /// given.
    pub fn well_known() -> Self {
        Self::from_names(
            CENTIMETRE_BANDPASS
                .iter()
                .chain(MM15_BANDPASS)
                .chain(MILLIMETRE_BANDPASS)
                .chain(PLANETS)
                .copied(),
        )
    }

    /// Whether a source is a known calibrator.
    pub fn contains(&self, name: &str) -> bool {
        self.calibrators.contains_key(name)
    }

    /// Number of known calibrators.
    pub fn len(&self) -> usize {
        self.calibrators.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.calibrators.is_empty()
    }
}

/// A source as seen from one frequency configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedSource {
    /// Source name
    pub name: String,
    /// Number of scans in this configuration
    pub num_cuts: usize,
    /// The calibration code of each of those scans
    pub cal_codes: Vec<String>,
}

/// Something selection could not do as well as it would have liked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SelectionWarning {
    /// A flux density calibrator was found, but not a preferred one.
    NonPreferredFlux {
        /// The source used instead
        source: String,
        /// How far the flux scale can be trusted
        caveat: String,
    },
    /// No flux density calibrator was observed.
    NoFlux,
    /// None of the bandpass calibrators for this band were observed.
    NoBandpass,
    /// No source is good enough for solving leakages.
    NoLeakage,
}

impl Display for SelectionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionWarning::NonPreferredFlux { source, caveat } => write!(
                f,
                "Non-preferred flux calibration source {source} used. {caveat}"
            ),
            SelectionWarning::NoFlux => write!(
                f,
                "No flux calibration source found. Flux density calibration will not be attempted."
            ),
            SelectionWarning::NoBandpass => {
                write!(f, "No preferred bandpass calibration source has been found.")
            }
            SelectionWarning::NoLeakage => write!(
                f,
                "No good calibrator was found for leakage calibration. Polarisation measurements may be inaccurate."
            ),
        }
    }
}

/// The calibrators to use for a frequency configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibratorAssignment {
    /// Bandpass calibrator
    pub bandpass: Option<String>,
    /// Flux density calibrator
    pub flux: Option<String>,
    /// Leakage calibrator
    pub leakage: Option<String>,
    /// Gain calibrators, in the order they were observed
    pub gain: Vec<String>,
    /// Everything that didn't go to plan
    pub warnings: Vec<SelectionWarning>,
}

struct FluxFallback {
    source: &'static str,
    caveat: &'static str,
}

struct BandRules {
    flux_preferred: &'static [&'static str],
    flux_fallback: Option<FluxFallback>,
    bandpass: &'static [&'static str],
    leakage_preferred: Option<&'static str>,
}

const PLANETS: &[&str] = &["uranus", "neptune", "mars"];
const CENTIMETRE_BANDPASS: &[&str] = &[
    PKS_1934_638,
    PKS_0823_500,
    "1921-293",
    "1253-055",
    "0537-441",
];
const MM15_BANDPASS: &[&str] = &["1921-293", "1253-055", "0537-441", "0420-014", PKS_1934_638];
const MILLIMETRE_BANDPASS: &[&str] = &["1921-293", "1253-055", "0537-441", "0420-014"];

const CENTIMETRE_RULES: BandRules = BandRules {
    flux_preferred: &[PKS_1934_638],
    flux_fallback: Some(FluxFallback {
        source: PKS_0823_500,
        caveat: "Flux density scale is unlikely to be correct.",
    }),
    bandpass: CENTIMETRE_BANDPASS,
    leakage_preferred: Some(PKS_1934_638),
};

const MM15_RULES: BandRules = BandRules {
    flux_preferred: &[PKS_1934_638],
    flux_fallback: Some(FluxFallback {
        source: PKS_0823_500,
        caveat: "Flux density scale is unlikely to be correct.",
    }),
    bandpass: MM15_BANDPASS,
    leakage_preferred: None,
};

const MM7_RULES: BandRules = BandRules {
    flux_preferred: PLANETS,
    flux_fallback: Some(FluxFallback {
        source: PKS_1934_638,
        caveat: "Flux density scale may not be correct.",
    }),
    bandpass: MILLIMETRE_BANDPASS,
    leakage_preferred: None,
};

const MM3_RULES: BandRules = BandRules {
    flux_preferred: PLANETS,
    flux_fallback: None,
    bandpass: MILLIMETRE_BANDPASS,
    leakage_preferred: None,
};

fn band_rules(band: ObservingBand) -> &'static BandRules {
    match band {
        ObservingBand::Cm16 | ObservingBand::Cm4 => &CENTIMETRE_RULES,
        ObservingBand::Mm15 => &MM15_RULES,
        ObservingBand::Mm7 => &MM7_RULES,
        ObservingBand::Mm3 => &MM3_RULES,
    }
}

/// Pick the flux, bandpass, leakage and gain calibrators from the sources
/// observed in one frequency configuration.
///
/// `sources` must be in the order they were discovered; this decides ties
/// and the order of the gain calibrators.
///
/// # Examples
///
/// ```rust
/// use cabb_pipeline::{
///     calibrators::{select_calibrators, CalibratorCatalog, ObservedSource},
///     spectral::ObservingBand,
/// };
///
/// let sources = vec![ObservedSource {
///     name: "1934-638".to_string(),
///     num_cuts: 5,
///     cal_codes: vec!["C".to_string(); 5],
/// }];
/// let catalog = CalibratorCatalog::default();
/// let assignment = select_calibrators(&sources, ObservingBand::Cm4, &catalog);
/// assert_eq!(assignment.flux.as_deref(), Some("1934-638"));
/// ```
pub fn select_calibrators(
    sources: &[ObservedSource],
    band: ObservingBand,
    catalog: &CalibratorCatalog,
) -> CalibratorAssignment {
    let rules = band_rules(band);
    let observed = |name: &str| sources.iter().any(|source| source.name == name);
    let mut assignment = CalibratorAssignment::default();

    assignment.flux = rules
        .flux_preferred
        .iter()
        .find(|&&name| observed(name))
        .map(|name| name.to_string());
    if assignment.flux.is_none() {
        match &rules.flux_fallback {
            Some(fallback) if observed(fallback.source) => {
                assignment.flux = Some(fallback.source.to_string());
                assignment.warnings.push(SelectionWarning::NonPreferredFlux {
                    source: fallback.source.to_string(),
                    caveat: fallback.caveat.to_string(),
                });
            }
            _ => assignment.warnings.push(SelectionWarning::NoFlux),
        }
    }

    assignment.bandpass = rules
        .bandpass
        .iter()
        .find(|&&name| observed(name))
        .map(|name| name.to_string());
    if assignment.bandpass.is_none() {
        assignment.warnings.push(SelectionWarning::NoBandpass);
    }

    assignment.leakage = rules
        .leakage_preferred
        .filter(|&name| observed(name))
        .map(str::to_string);
    if assignment.leakage.is_none() {
        let most_cut = sources.iter().fold(None, |best: Option<&ObservedSource>, source| {
            match best {
                Some(best) if best.num_cuts >= source.num_cuts => Some(best),
                _ => Some(source),
            }
        });
        assignment.leakage = most_cut
            .filter(|source| source.num_cuts >= MIN_LEAKAGE_CUTS)
            .map(|source| source.name.clone());
    }
    if assignment.leakage.is_none() {
        assignment.warnings.push(SelectionWarning::NoLeakage);
        if observed(PKS_1934_638) {
            assignment.leakage = Some(PKS_1934_638.to_string());
        }
    }

    let gain: IndexSet<&str> = sources
        .iter()
        .filter(|source| {
            source.cal_codes.iter().any(|code| code == CALIBRATOR_CAL_CODE)
                || catalog.contains(&source.name)
        })
        .map(|source| source.name.as_str())
        .collect();
    assignment.gain = gain.into_iter().map(str::to_string).collect();

    assignment
}
