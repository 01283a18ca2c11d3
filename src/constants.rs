// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.
//!
//! All frequencies are in GHz unless the name says otherwise, all times in
//! seconds.

/// Channel widths narrower than this (GHz) are the quantised width of a 1 MHz
/// zoom band, and not the real channel spacing.
pub const ZOOM_1MHZ_QUANTISED_WIDTH_GHZ: f64 = 5e-7;
/// The true channel spacing of a 1 MHz zoom band, 1 MHz / 2048 (GHz).
pub const ZOOM_1MHZ_TRUE_WIDTH_GHZ: f64 = 1e-6 / 2048.0;
/// Any IF wider than this (GHz) is a wideband IF.
pub const WIDEBAND_MIN_BANDWIDTH_GHZ: f64 = 2.0;
/// The fewest channels a zoom band can have.
pub const ZOOM_MIN_CHANNELS: usize = 2049;
/// Upper channel width limit (GHz) of a zoom made from 4 consolidated zooms.
pub const ZOOM_4_MAX_WIDTH_GHZ: f64 = 2e-6;
/// Upper channel width limit (GHz) of a zoom made from 16 consolidated zooms.
pub const ZOOM_16_MAX_WIDTH_GHZ: f64 = 8e-6;

/// Upper edge of the 16cm band (GHz).
pub const BAND_16CM_MAX_GHZ: f64 = 3.5;
/// Upper edge of the 4cm band (GHz).
pub const BAND_4CM_MAX_GHZ: f64 = 12.0;
/// Upper edge of the 15mm band (GHz).
pub const BAND_15MM_MAX_GHZ: f64 = 28.0;
/// Upper edge of the 7mm band (GHz).
pub const BAND_7MM_MAX_GHZ: f64 = 60.0;

/// Width of a midweek detection time bin.
pub const MIDWEEK_BIN_SECONDS: f64 = 60.0;
/// Variance of the xy-amplitude spread above which a bin is suspect. Empirical.
pub const MIDWEEK_VARIANCE_THRESHOLD: f64 = 200.0;
/// Number of bins either side of a bin that must contain a suspect bin.
pub const MIDWEEK_HYSTERESIS_BINS: usize = 5;
/// How far, in bin widths, to pad each detected region on both sides.
pub const MIDWEEK_PADDING_BINS: f64 = 1.5;
/// The most time bins a series is split into; a finer binning is refused.
pub const MIDWEEK_MAX_BINS: usize = 1_000_000;

/// The antenna (CA03) used as reference unless another is less flagged.
pub const DEFAULT_REFERENCE_ANTENNA: &str = "3";

/// The fewest cuts on a source for it to solve leakages reliably.
pub const MIN_LEAKAGE_CUTS: usize = 3;

/// The calibration code marking a source as a calibrator in the schedule.
pub const CALIBRATOR_CAL_CODE: &str = "C";

/// The primary flux density calibrator of the ATCA.
pub const PKS_1934_638: &str = "1934-638";
/// The secondary southern flux density calibrator.
pub const PKS_0823_500: &str = "0823-500";

/// Stop bootstrapping the flux scale when the spectral correction is below this.
pub const FLUX_BOOTSTRAP_TOLERANCE: f64 = 0.005;
/// Maximum number of flux bootstrap passes.
pub const FLUX_BOOTSTRAP_MAX_PASSES: usize = 5;

/// Solution interval handed to the bandpass and gain solvers (minutes).
pub const SOLVE_INTERVAL_MINUTES: f64 = 0.1;
