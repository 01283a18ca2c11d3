//! Detection of intermittent ("midweek") RFI in the xy-amplitude time series
//! of a dataset.
//!
//! When the interference is on, the xy amplitudes of simultaneous baselines
//! jump around, so the spread between them becomes very noisy. The series is
//! binned in time, and the variance of the spread in each bin decides whether
//! the bin is suspect. A two-sided hysteresis joins suspect bins into
//! contiguous time ranges, which are padded and returned as [`FlagRegion`]s.

use itertools::Itertools;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        MIDWEEK_BIN_SECONDS, MIDWEEK_HYSTERESIS_BINS, MIDWEEK_MAX_BINS, MIDWEEK_PADDING_BINS,
        MIDWEEK_VARIANCE_THRESHOLD,
    },
    types::{AmplitudeSample, FlagRegion},
};

/// Tuning for [`detect_midweek_rfi`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidweekParams {
    /// Width of a time bin in seconds
    pub bin_seconds: f64,
    /// A bin is suspect when the variance of the spread exceeds this
    pub variance_threshold: f64,
    /// Bins either side which must contain a suspect bin for a bin to be on
    pub hysteresis_bins: usize,
    /// Padding added to both ends of a region, in bin widths
    pub padding_bins: f64,
}

impl Default for MidweekParams {
    fn default() -> Self {
        Self {
            bin_seconds: MIDWEEK_BIN_SECONDS,
            variance_threshold: MIDWEEK_VARIANCE_THRESHOLD,
            hysteresis_bins: MIDWEEK_HYSTERESIS_BINS,
            padding_bins: MIDWEEK_PADDING_BINS,
        }
    }
}

/// Fixed-width time bins over `[start, stop]`. The last bin is closed, so the
/// final sample always has a bin.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TimeBins {
    start: f64,
    stop: f64,
    width: f64,
    count: usize,
}

impl TimeBins {
    fn new(start: f64, stop: f64, width: f64) -> Self {
        let count = ((stop - start) / width).ceil().max(1.0) as usize;
        Self {
            start,
            stop,
            width,
            count,
        }
    }

    fn index_of(&self, time: f64) -> usize {
        (((time - self.start) / self.width).floor().max(0.0) as usize).min(self.count - 1)
    }

    fn bin_start(&self, idx: usize) -> f64 {
        self.start + idx as f64 * self.width
    }
}

/// Population variance, or `None` for an empty slice.
fn variance(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n)
}

/// Variance of the spread statistic in each bin, `None` for empty bins.
fn bin_variances(samples: &[AmplitudeSample], bins: &TimeBins) -> Vec<Option<f64>> {
    let mut spreads = vec![vec![]; bins.count];
    for sample in samples {
        spreads[bins.index_of(sample.time)].push(sample.spread());
    }
    spreads.iter().map(|bin| variance(bin)).collect()
}

/// Bin `i` is on when there is a suspect bin in `[i - window, i)` and in
/// `[i, i + window)`. Bins whose windows would run off either end of the
/// series are never on.
fn apply_hysteresis(suspect: &[bool], window: usize) -> Vec<bool> {
    let num_bins = suspect.len();
    (0..num_bins)
        .map(|idx| {
            idx >= window
                && idx + window <= num_bins
                && suspect[idx - window..idx].iter().any(|&s| s)
                && suspect[idx..idx + window].iter().any(|&s| s)
        })
        .collect()
}

/// Find the time ranges affected by midweek RFI.
///
/// Returns an empty list when there are no samples, too few bins for the
/// hysteresis windows, or a bin width that isn't a positive number of
/// seconds giving at most [`MIDWEEK_MAX_BINS`] bins. The regions are ordered,
/// non-overlapping and lie within the span of the samples.
///
/// # Examples
///
/// ```rust
/// use cabb_pipeline::{detect_midweek_rfi, AmplitudeSample, MidweekParams};
///
/// let quiet: Vec<AmplitudeSample> = (0..720)
///     .map(|i| AmplitudeSample { time: i as f64 * 10.0, amplitudes: vec![1.0, 2.0] })
///     .collect();
/// assert!(detect_midweek_rfi(&quiet, &MidweekParams::default()).is_empty());
/// ```
pub fn detect_midweek_rfi(samples: &[AmplitudeSample], params: &MidweekParams) -> Vec<FlagRegion> {
    if !(params.bin_seconds > 0.0 && params.bin_seconds.is_finite()) {
        warn!(
            "midweek bin width must be a positive number of seconds, not {}",
            params.bin_seconds
        );
        return vec![];
    }
    let (start, stop) = match samples
        .iter()
        .map(|sample| sample.time)
        .minmax_by(f64::total_cmp)
        .into_option()
    {
        Some(span) => span,
        None => return vec![],
    };
    if (stop - start) / params.bin_seconds > MIDWEEK_MAX_BINS as f64 {
        warn!(
            "{}s bins over {}s of data is more than {} bins",
            params.bin_seconds,
            stop - start,
            MIDWEEK_MAX_BINS
        );
        return vec![];
    }
    let bins = TimeBins::new(start, stop, params.bin_seconds);
    if bins.count < 2 * params.hysteresis_bins {
        debug!(
            "only {} bins of {}s, too few to look for midweek RFI",
            bins.count, bins.width
        );
        return vec![];
    }

    let suspect: Vec<bool> = bin_variances(samples, &bins)
        .into_iter()
        .map(|var| var.map_or(false, |var| var > params.variance_threshold))
        .collect();
    trace!(
        "{} of {} bins are suspect",
        suspect.iter().filter(|&&s| s).count(),
        bins.count
    );
    let states = apply_hysteresis(&suspect, params.hysteresis_bins);

    let padding = params.padding_bins * bins.width;
    let to_region = |first_on: usize, end: Option<usize>| {
        // on from the very first bin means it was on when the series started
        let region_start = if first_on == 0 {
            bins.start
        } else {
            bins.bin_start(first_on) - padding
        };
        // never switching off means it was still on at the end
        let region_stop = match end {
            Some(end) => bins.bin_start(end) + padding,
            None => bins.stop,
        };
        FlagRegion {
            start: region_start.max(bins.start),
            stop: region_stop.min(bins.stop),
        }
    };

    let mut regions: Vec<FlagRegion> = vec![];
    let mut onset: Option<usize> = None;
    for (idx, &on) in states.iter().enumerate() {
        match (on, onset) {
            (true, None) => onset = Some(idx),
            (false, Some(first_on)) => {
                regions.push(to_region(first_on, Some(idx)));
                onset = None;
            }
            _ => {}
        }
    }
    if let Some(first_on) = onset {
        regions.push(to_region(first_on, None));
    }

    // padding can make neighbouring regions overlap
    regions
        .into_iter()
        .coalesce(|prev, next| {
            if next.start <= prev.stop {
                Ok(FlagRegion {
                    start: prev.start,
                    stop: prev.stop.max(next.stop),
                })
            } else {
                Err((prev, next))
            }
        })
        .collect()
}
