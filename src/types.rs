//! The records describing an observation: sub-bands, sources and the time
//! ranges that get flagged.

use chrono::{DateTime, NaiveDateTime};
use itertools::{Itertools, MinMaxResult};
use serde::Serialize;

use crate::spectral::{
    centre_frequency, channel_frequencies, classify_if, IfClassification, ObservingBand,
};

/// Which sideband a sub-band was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sideband {
    /// Upper sideband, frequency increases with channel number
    Usb,
    /// Lower sideband, frequency decreases with channel number
    Lsb,
}

/// A single correlator IF within a frequency configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubBand {
    /// Number of channels
    pub num_chans: usize,
    /// Frequency of the first channel [GHz]
    pub first_freq: f64,
    /// Signed channel width [GHz]
    pub chan_width: f64,
    /// Rest frequency [GHz]
    pub rest_freq: f64,
    /// Frequency at the middle of the band [GHz]
    pub centre_freq: f64,
    /// Which way the channels run
    pub sideband: Sideband,
    /// What kind of IF this is
    pub classification: IfClassification,
    /// The IF chain (1 or 2) this sub-band was carved from
    pub if_chain: usize,
    /// The dataset split out for this sub-band, if it has been split.
    pub dataset: Option<String>,
}

impl SubBand {
    /// Describe an IF, deriving the centre frequency, sideband and
    /// classification from its channel layout.
    pub fn new(
        num_chans: usize,
        first_freq: f64,
        chan_width: f64,
        rest_freq: f64,
        if_chain: usize,
    ) -> Self {
        let centre_freq = centre_frequency(num_chans, first_freq, chan_width);
        let sideband = if first_freq > centre_freq {
            Sideband::Lsb
        } else {
            Sideband::Usb
        };
        Self {
            num_chans,
            first_freq,
            chan_width,
            rest_freq,
            centre_freq,
            sideband,
            classification: classify_if(num_chans, first_freq, chan_width),
            if_chain,
            dataset: None,
        }
    }

    /// The frequency of every channel [GHz].
    pub fn chan_freqs(&self) -> Vec<f64> {
        channel_frequencies(self.num_chans, self.first_freq, self.chan_width)
    }

    /// The observing band the centre frequency falls in.
    pub fn band(&self) -> ObservingBand {
        ObservingBand::from_frequency(self.centre_freq)
    }

    /// The centre frequency rounded to the nearest MHz. Split datasets are
    /// named by this, so it is what binds a dataset to its sub-band.
    pub fn centre_freq_mhz(&self) -> i64 {
        (self.centre_freq * 1000.0).round() as i64
    }
}

/// A frequency configuration: one tuning of the correlator, made of one or
/// more sub-bands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyConfig {
    /// The configuration number, as numbered by the toolkit (from 1)
    pub id: usize,
    /// The sub-bands, in the order the correlator reports them
    pub sub_bands: Vec<SubBand>,
}

impl FrequencyConfig {
    /// A configuration with no sub-bands yet.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            sub_bands: vec![],
        }
    }

    /// The band of the first sub-band, which decides calibrator preferences
    /// for the whole configuration.
    pub fn band(&self) -> Option<ObservingBand> {
        self.sub_bands.first().map(SubBand::band)
    }
}

/// One contiguous scan of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cut {
    /// The frequency configuration the scan was taken in
    pub freq_config: usize,
    /// The start time, as printed by the toolkit
    pub start_time: String,
    /// The calibration code from the schedule, blank for targets
    pub cal_code: String,
}

/// A source seen in the observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    /// Source name
    pub name: String,
    /// Right ascension, once known
    pub ra: Option<String>,
    /// Declination, once known
    pub dec: Option<String>,
    /// Every scan of the source, in observing order
    pub cuts: Vec<Cut>,
}

impl Source {
    /// A source with no position and no scans.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ra: None,
            dec: None,
            cuts: vec![],
        }
    }

    /// Record another scan of this source.
    pub fn add_cut(&mut self, freq_config: usize, start_time: &str, cal_code: &str) {
        self.cuts.push(Cut {
            freq_config,
            start_time: start_time.to_string(),
            cal_code: cal_code.to_string(),
        });
    }

    /// Append the scans of another record of the same source, and take its
    /// position if this record has none.
    pub fn merge(&mut self, other: Source) {
        if self.ra.is_none() {
            self.ra = other.ra;
        }
        if self.dec.is_none() {
            self.dec = other.dec;
        }
        self.cuts.extend(other.cuts);
    }

    /// The scans taken in the given frequency configuration.
    pub fn cuts_in(&self, freq_config: usize) -> impl Iterator<Item = &Cut> {
        self.cuts
            .iter()
            .filter(move |cut| cut.freq_config == freq_config)
    }
}

/// A time range to excise, in UTC seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlagRegion {
    /// Start of the range
    pub start: f64,
    /// End of the range
    pub stop: f64,
}

impl FlagRegion {
    /// Length of the region in seconds.
    pub fn duration(&self) -> f64 {
        self.stop - self.start
    }

    /// The region in the toolkit's time selection syntax, e.g.
    /// `18JAN05:12:00:00,18JAN05:12:10:00`.
    pub fn to_miriad_string(&self) -> String {
        format!(
            "{},{}",
            fmt_miriad_time(self.start),
            fmt_miriad_time(self.stop)
        )
    }
}

/// Format UTC seconds as `yyMONdd:hh:mm:ss`.
pub fn fmt_miriad_time(seconds: f64) -> String {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9) as u32;
    match DateTime::from_timestamp(whole as i64, nanos) {
        Some(time) => time.format("%y%b%d:%H:%M:%S").to_string().to_uppercase(),
        None => format!("{seconds}"),
    }
}

/// Parse a `yyMONdd:hh:mm:ss.s` time as printed by the toolkit into UTC
/// seconds.
pub fn parse_miriad_time(time: &str) -> Option<f64> {
    NaiveDateTime::parse_from_str(time, "%y%b%d:%H:%M:%S%.f")
        .ok()
        .map(|time| {
            let time = time.and_utc();
            time.timestamp() as f64 + f64::from(time.timestamp_subsec_nanos()) / 1e9
        })
}

/// The simultaneous cross-polarisation amplitudes of a dataset at one time.
#[derive(Debug, Clone, PartialEq)]
pub struct AmplitudeSample {
    /// UTC seconds
    pub time: f64,
    /// One reading per baseline (or channel range) plotted
    pub amplitudes: Vec<f64>,
}

impl AmplitudeSample {
    /// The peak to peak spread of the readings, zero when there are none.
    pub fn spread(&self) -> f64 {
        match self.amplitudes.iter().copied().minmax_by(f64::total_cmp) {
            MinMaxResult::NoElements => 0.0,
            MinMaxResult::OneElement(_) => 0.0,
            MinMaxResult::MinMax(min, max) => max - min,
        }
    }
}
