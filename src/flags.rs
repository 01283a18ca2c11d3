//! Flag statistics snapshots and the decisions made from them.

use std::{collections::BTreeMap, fmt::Display};

use indexmap::IndexMap;
use serde::Serialize;

use crate::{constants::DEFAULT_REFERENCE_ANTENNA, error::PipelineError};

/// When during the run a snapshot of the flagging was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// Straight after loading, before anything was flagged by the pipeline
    Load,
    /// At the start of reduction
    Start,
    /// After midweek RFI was flagged
    Midweek,
    /// After automatic flagging
    Auto,
}

impl Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SnapshotKind::Load => "load",
                SnapshotKind::Start => "start",
                SnapshotKind::Midweek => "midweek",
                SnapshotKind::Auto => "auto",
            }
        )
    }
}

/// Fraction of data flagged in a dataset, broken down four ways. Every
/// fraction is in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlagStatistics {
    /// Per Stokes parameter or polarisation product
    pub stokes: IndexMap<String, f64>,
    /// Per baseline
    pub baseline: IndexMap<String, f64>,
    /// Per antenna, keyed by antenna number
    pub antenna: IndexMap<String, f64>,
    /// Per channel, keyed by 1-based channel number
    pub channel: BTreeMap<usize, f64>,
}

impl FlagStatistics {
    /// The flagged fraction of every channel, in channel order.
    ///
    /// # Errors
    ///
    /// Will return [`PipelineError::MissingChannel`] if any of the first
    /// `num_chans` channels has no statistic.
    pub fn channel_fractions(
        &self,
        num_chans: usize,
        dataset: &str,
    ) -> Result<Vec<f64>, PipelineError> {
        (1..=num_chans)
            .map(|channel| {
                self.channel
                    .get(&channel)
                    .copied()
                    .ok_or_else(|| PipelineError::MissingChannel {
                        dataset: dataset.to_string(),
                        channel,
                    })
            })
            .collect()
    }

    /// Mean flagged fraction over all channels, zero if there are none.
    pub fn mean_channel_fraction(&self) -> f64 {
        if self.channel.is_empty() {
            0.0
        } else {
            self.channel.values().sum::<f64>() / self.channel.len() as f64
        }
    }
}

/// Choose the least flagged antenna as the reference antenna.
///
/// CA03 is preferred whenever it is among the least flagged. Otherwise the
/// first of the least flagged antennas wins. With no statistics at all, CA03
/// is used.
///
/// # Examples
///
/// ```rust
/// use cabb_pipeline::select_reference_antenna;
/// use indexmap::indexmap;
///
/// let fractions = indexmap! {
///     "2".to_string() => 0.05,
///     "3".to_string() => 0.1,
/// };
/// assert_eq!(select_reference_antenna(&fractions), "2");
/// ```
pub fn select_reference_antenna(antenna_fractions: &IndexMap<String, f64>) -> String {
    let min_fraction = match antenna_fractions
        .values()
        .copied()
        .min_by(f64::total_cmp)
    {
        Some(min_fraction) => min_fraction,
        None => return DEFAULT_REFERENCE_ANTENNA.to_string(),
    };
    let mut least_flagged = antenna_fractions
        .iter()
        .filter(|(_, &fraction)| fraction == min_fraction)
        .map(|(antenna, _)| antenna);
    if let Some(default) = least_flagged
        .clone()
        .find(|antenna| antenna.as_str() == DEFAULT_REFERENCE_ANTENNA)
    {
        return default.clone();
    }
    least_flagged
        .next()
        .cloned()
        .unwrap_or_else(|| DEFAULT_REFERENCE_ANTENNA.to_string())
}
