//! Working out which users of the radio spectrum cost us bandwidth.
//!
//! The automatic flagger removes channels that are hit by interference. By
//! comparing the per-channel flagging before and after it runs, and looking
//! up who is allocated each bit of spectrum, we charge the lost bandwidth to
//! the allocated users.

use std::{fs::File, io::BufReader, path::Path};

use indexmap::IndexMap;
use lazy_static::lazy_static;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::{error::PipelineError, io::error::IOError};

/// One entry of a spectrum allocation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectrumAllocation {
    /// Bottom of the allocation [MHz], inclusive
    pub low_freq: f64,
    /// Top of the allocation [MHz], exclusive
    pub high_freq: f64,
    /// Who the range is allocated to
    pub usage: Vec<String>,
}

/// An ordered list of spectrum allocations. Entries may overlap, and there
/// may be gaps between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpectrumAllocationTable {
    /// The allocations, in table order
    pub entries: Vec<SpectrumAllocation>,
}

#[rustfmt::skip]
const ACMA_ALLOCATIONS: &[(f64, f64, &[&str])] = &[
    (960.0, 1164.0, &["Aeronautical Radionavigation", "Aeronautical Mobile"]),
    (1164.0, 1215.0, &["Aeronautical Radionavigation", "Radionavigation - Satellite"]),
    (1215.0, 1240.0, &["Earth Exploration - Satellite", "Radiolocation", "Radionavigation - Satellite", "Space Research"]),
    (1240.0, 1300.0, &["Earth Exploration - Satellite", "Radiolocation", "Radionavigation - Satellite", "Space Research"]),
    (1300.0, 1350.0, &["Aeronautical Radionavigation", "Radiolocation", "Radionavigation - Satellite"]),
    (1350.0, 1400.0, &["Radiolocation"]),
    (1400.0, 1427.0, &["Passive"]),
    (1427.0, 1429.0, &["Space Operation", "Fixed", "Mobile"]),
    (1429.0, 1452.0, &["Fixed", "Mobile"]),
    (1452.0, 1492.0, &["Broadcasting", "Broadcasting - Satellite", "Fixed", "Mobile"]),
    (1492.0, 1518.0, &["Fixed", "Mobile"]),
    (1518.0, 1525.0, &["Fixed", "Mobile", "Mobile - Satellite"]),
    (1525.0, 1530.0, &["Space Operation", "Fixed", "Mobile - Satellite"]),
    (1530.0, 1535.0, &["Space Operation", "Mobile - Satellite"]),
    (1535.0, 1559.0, &["Mobile - Satellite"]),
    (1559.0, 1610.0, &["Aeronautical Radionavigation", "Radionavigation - Satellite"]),
    (1610.0, 1626.5, &["Mobile - Satellite", "Aeronautical Navigation", "Radiodetermination - Satellite"]),
    (1626.5, 1660.5, &["Mobile - Satellite"]),
    (1660.5, 1668.0, &["Passive"]),
    (1668.0, 1670.0, &["Meteorological Aids", "Fixed", "Mobile", "Mobile - Satellite"]),
    (1670.0, 1675.0, &["Meteorological Aids", "Fixed", "Meteorological - Satellite", "Mobile", "Mobile - Satellite"]),
    (1675.0, 1690.0, &["Meteorological Aids", "Fixed", "Meteorological - Satellite"]),
    (1690.0, 1700.0, &["Meteorological Aids", "Meteorological - Satellite"]),
    (1700.0, 1710.0, &["Fixed", "Meteorological - Satellite", "Mobile"]),
    (1710.0, 1980.0, &["Fixed", "Mobile"]),
    (1980.0, 2010.0, &["Fixed", "Mobile", "Mobile - Satellite"]),
    (2010.0, 2025.0, &["Fixed", "Mobile"]),
    (2025.0, 2110.0, &["Space Operation", "Earth Exploration - Satellite", "Fixed", "Mobile", "Space Research"]),
    (2110.0, 2120.0, &["Fixed", "Mobile", "Space Research"]),
    (2120.0, 2170.0, &["Fixed", "Mobile"]),
    (2170.0, 2200.0, &["Fixed", "Mobile", "Mobile - Satellite"]),
    (2200.0, 2290.0, &["Space Operation", "Earth Exploration - Satellite", "Fixed", "Mobile", "Space Research"]),
    (2290.0, 2300.0, &["Fixed", "Mobile", "Space Research"]),
    (2300.0, 2483.5, &["Fixed", "Mobile", "Radiolocation"]),
    (2483.5, 2500.0, &["Fixed", "Mobile", "Mobile - Satellite", "Radiolocation", "Radiodetermination - Satellite"]),
    (2500.0, 2520.0, &["Fixed", "Fixed - Satellite", "Mobile", "Mobile - Satellite"]),
    (2520.0, 2535.0, &["Fixed", "Fixed - Satellite", "Mobile", "Broadcasting - Satellite"]),
    (2535.0, 2655.0, &["Fixed", "Mobile", "Broadcasting - Satellite"]),
    (2655.0, 2670.0, &["Fixed", "Fixed - Satellite", "Mobile", "Broadcasting - Satellite"]),
    (2670.0, 2690.0, &["Fixed", "Fixed - Satellite", "Mobile", "Mobile - Satellite"]),
    (2690.0, 2700.0, &["Passive"]),
    (2700.0, 2900.0, &["Aeronautical Radionavigation", "Radiolocation"]),
    (2900.0, 3100.0, &["Radiolocation", "Radionavigation"]),
    (3100.0, 3400.0, &["Radiolocation"]),
];

lazy_static! {
    /// The Australian (ACMA) spectrum allocations between 960 MHz and 3.4 GHz.
    pub static ref ACMA_ALLOCATION_TABLE: SpectrumAllocationTable = SpectrumAllocationTable {
        entries: ACMA_ALLOCATIONS
            .iter()
            .map(|&(low_freq, high_freq, usage)| SpectrumAllocation {
                low_freq,
                high_freq,
                usage: usage.iter().map(|u| u.to_string()).collect(),
            })
            .collect(),
    };
}

impl Default for SpectrumAllocationTable {
    fn default() -> Self {
        ACMA_ALLOCATION_TABLE.clone()
    }
}

impl SpectrumAllocationTable {
    /// Read a table from a JSON file: a list of
    /// `{"lowFreq": MHz, "highFreq": MHz, "usage": [..]}` objects.
    ///
    /// # Errors
    ///
    /// Will return [`IOError`] if the file can't be read or isn't a table.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, IOError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Bandwidth lost to one user of the spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BandwidthCost {
    /// Lost bandwidth [MHz]
    pub absolute: f64,
    /// Lost bandwidth as a fraction of the dataset bandwidth
    pub fraction: f64,
}

/// How much bandwidth of a dataset each spectrum user cost us. Serialises as
/// a flat mapping from user to [`BandwidthCost`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RfiCostReport {
    /// Per user, in the order users first appear in the table
    #[serde(flatten)]
    pub costs: IndexMap<String, BandwidthCost>,
    /// Summed over all users
    #[serde(skip)]
    pub total: BandwidthCost,
    /// Bandwidth spanned by the dataset's channels [MHz]
    #[serde(skip)]
    pub total_bandwidth: f64,
}

impl RfiCostReport {
    /// Human readable lines for the dataset log.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .costs
            .iter()
            .map(|(user, cost)| {
                format!(
                    "RFI generator {} cost us {:.1} MHz ({:.1}%)",
                    user,
                    cost.absolute,
                    cost.fraction * 100.0
                )
            })
            .collect();
        lines.push(format!(
            "Overall, RFI cost us {:.1} MHz ({:.1}%)",
            self.total.absolute,
            self.total.fraction * 100.0
        ));
        lines
    }
}

/// The percentage of each channel flagged by the automatic flagger. A channel
/// that was completely flagged on load counts fully.
fn flagging_deltas(load: &[f64], auto: &[f64]) -> Vec<f64> {
    load.iter()
        .zip(auto)
        .map(|(&load, &auto)| {
            let load_pct = load * 100.0;
            if load_pct == 100.0 {
                100.0
            } else {
                auto * 100.0 - load_pct
            }
        })
        .collect()
}

fn span(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    if values.is_empty() {
        0.0
    } else {
        max - min
    }
}

/// Charge the bandwidth removed by the automatic flagger to the users of the
/// spectrum.
///
/// `load_fractions` and `auto_fractions` are the flagged fraction of each
/// channel right after loading and after automatic flagging, and `chan_freqs`
/// the channel frequencies in GHz.
///
/// # Errors
///
/// Will return [`PipelineError::BadArrayShape`] if the three per-channel
/// slices are not the same length.
///
/// # Examples
///
/// ```rust
/// use cabb_pipeline::rfi_cost::{attribute_flagging_cost, SpectrumAllocationTable};
///
/// let chan_freqs = [1.40, 1.42];
/// let report = attribute_flagging_cost(
///     &[0.0, 0.0],
///     &[0.5, 0.5],
///     &chan_freqs,
///     &SpectrumAllocationTable::default(),
/// )
/// .unwrap();
/// assert!(report.costs.contains_key("Passive"));
/// ```
pub fn attribute_flagging_cost(
    load_fractions: &[f64],
    auto_fractions: &[f64],
    chan_freqs: &[f64],
    table: &SpectrumAllocationTable,
) -> Result<RfiCostReport, PipelineError> {
    for (argument, len) in [
        ("auto_fractions", auto_fractions.len()),
        ("chan_freqs", chan_freqs.len()),
    ] {
        if len != load_fractions.len() {
            return Err(PipelineError::BadArrayShape {
                argument: argument.to_string(),
                function: "attribute_flagging_cost".to_string(),
                expected: format!("{} channels", load_fractions.len()),
                received: format!("{len} channels"),
            });
        }
    }

    let deltas = flagging_deltas(load_fractions, auto_fractions);
    let freqs_mhz: Vec<f64> = chan_freqs.iter().map(|freq| freq * 1000.0).collect();

    let mut costs: IndexMap<String, BandwidthCost> = IndexMap::new();
    for entry in table.entries.iter().filter(|entry| !entry.usage.is_empty()) {
        let (covered_freqs, covered_deltas): (Vec<f64>, Vec<f64>) = freqs_mhz
            .iter()
            .zip(&deltas)
            .filter(|(&freq, _)| freq >= entry.low_freq && freq < entry.high_freq)
            .unzip();
        if covered_freqs.is_empty() {
            continue;
        }
        let mean_delta =
            covered_deltas.iter().sum::<f64>() / covered_deltas.len() as f64 / 100.0;
        let share = span(&covered_freqs) * mean_delta / entry.usage.len() as f64;
        trace!(
            "{}-{} MHz: {} channels, {:.1}% flagged",
            entry.low_freq,
            entry.high_freq,
            covered_freqs.len(),
            mean_delta * 100.0
        );
        for user in &entry.usage {
            costs.entry(user.clone()).or_default().absolute += share;
        }
    }

    let total_bandwidth = span(&freqs_mhz);
    let fraction_of = |absolute: f64| {
        if total_bandwidth > 0.0 {
            absolute / total_bandwidth
        } else {
            0.0
        }
    };
    for cost in costs.values_mut() {
        cost.fraction = fraction_of(cost.absolute);
    }
    let total_absolute = costs.values().map(|cost| cost.absolute).sum();

    Ok(RfiCostReport {
        costs,
        total: BandwidthCost {
            absolute: total_absolute,
            fraction: fraction_of(total_absolute),
        },
        total_bandwidth,
    })
}
