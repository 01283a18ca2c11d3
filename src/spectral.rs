//! Classifying correlator IFs and mapping frequencies onto observing bands.
//!
//! Both are pure functions of the IF description reported by the toolkit and
//! are evaluated once, when the frequency configurations are indexed.

use std::fmt::Display;

use serde::Serialize;

use crate::constants::{
    BAND_15MM_MAX_GHZ, BAND_16CM_MAX_GHZ, BAND_4CM_MAX_GHZ, BAND_7MM_MAX_GHZ,
    WIDEBAND_MIN_BANDWIDTH_GHZ, ZOOM_16_MAX_WIDTH_GHZ, ZOOM_1MHZ_QUANTISED_WIDTH_GHZ,
    ZOOM_1MHZ_TRUE_WIDTH_GHZ, ZOOM_4_MAX_WIDTH_GHZ, ZOOM_MIN_CHANNELS,
};

/// How a zoom band was put together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomType {
    /// A single zoom window, exactly 2049 channels.
    Single,
    /// Several adjacent zoom windows stitched together.
    Consolidated,
}

/// The zoom configuration, named by the number of zooms per 1 MHz channel
/// the correlator was set up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ZoomConfig {
    /// 1 MHz zooms
    #[serde(rename = "1")]
    One,
    /// 4 MHz zooms
    #[serde(rename = "4")]
    Four,
    /// 16 MHz zooms
    #[serde(rename = "16")]
    Sixteen,
    /// 64 MHz zooms
    #[serde(rename = "64")]
    SixtyFour,
}

impl Display for ZoomConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ZoomConfig::One => "1",
                ZoomConfig::Four => "4",
                ZoomConfig::Sixteen => "16",
                ZoomConfig::SixtyFour => "64",
            }
        )
    }
}

impl Display for ZoomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ZoomType::Single => "single",
                ZoomType::Consolidated => "consolidated",
            }
        )
    }
}

/// The kind of IF, as decided by [`classify_if`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "bandType", rename_all = "lowercase")]
pub enum IfClassification {
    /// A wideband (2 GHz) IF.
    Wide {
        /// total bandwidth [GHz]
        bandwidth: f64,
    },
    /// A zoom band carved out of a wideband IF.
    Zoom {
        /// single or consolidated
        #[serde(rename = "zoomType")]
        zoom_type: ZoomType,
        /// the zoom width the correlator was configured with
        #[serde(rename = "zoomConfig")]
        zoom_config: ZoomConfig,
        /// total bandwidth [GHz]
        bandwidth: f64,
    },
    /// Neither wide enough to be a wideband IF nor with enough channels to be
    /// a zoom. Nothing downstream treats it as either.
    Unclassified {
        /// total bandwidth [GHz]
        bandwidth: f64,
    },
}

impl IfClassification {
    /// The total bandwidth of the IF in GHz.
    pub fn bandwidth_ghz(&self) -> f64 {
        match *self {
            IfClassification::Wide { bandwidth }
            | IfClassification::Zoom { bandwidth, .. }
            | IfClassification::Unclassified { bandwidth } => bandwidth,
        }
    }

    /// Whether this is a wideband IF.
    pub fn is_wide(&self) -> bool {
        matches!(self, IfClassification::Wide { .. })
    }

    /// A short name for the band type: `wide`, `zoom` or `unclassified`.
    pub fn band_type(&self) -> &'static str {
        match self {
            IfClassification::Wide { .. } => "wide",
            IfClassification::Zoom { .. } => "zoom",
            IfClassification::Unclassified { .. } => "unclassified",
        }
    }
}

impl Display for IfClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} band: BW={} [GHz]", self.band_type(), self.bandwidth_ghz())?;
        if let IfClassification::Zoom {
            zoom_type,
            zoom_config,
            ..
        } = self
        {
            write!(f, " ZTYPE={zoom_type} ZCONFIG={zoom_config}")?;
        }
        Ok(())
    }
}

/// Undo the quantisation of the channel width of 1 MHz zoom bands, which the
/// toolkit reports as a width too small to represent. The sign is kept.
pub fn effective_chan_width(chan_width_ghz: f64) -> f64 {
    if chan_width_ghz.abs() < ZOOM_1MHZ_QUANTISED_WIDTH_GHZ {
        ZOOM_1MHZ_TRUE_WIDTH_GHZ.copysign(chan_width_ghz)
    } else {
        chan_width_ghz
    }
}

/// Figure out what kind of IF this is from its channel count and (signed)
/// channel width in GHz.
///
/// # Examples
///
/// ```rust
/// use cabb_pipeline::spectral::{classify_if, IfClassification};
///
/// assert!(classify_if(2049, 2.1, 0.001).is_wide());
/// assert!(matches!(
///     classify_if(1024, 2.1, 0.001),
///     IfClassification::Unclassified { .. }
/// ));
/// ```
pub fn classify_if(
    num_chans: usize,
    _first_freq_ghz: f64,
    chan_width_ghz: f64,
) -> IfClassification {
    let chan_width = effective_chan_width(chan_width_ghz);
    let bandwidth = (chan_width * num_chans as f64).abs();

    if bandwidth > WIDEBAND_MIN_BANDWIDTH_GHZ {
        return IfClassification::Wide { bandwidth };
    }
    if num_chans < ZOOM_MIN_CHANNELS {
        return IfClassification::Unclassified { bandwidth };
    }

    let zoom_type = if num_chans > ZOOM_MIN_CHANNELS {
        ZoomType::Consolidated
    } else {
        ZoomType::Single
    };
    let abs_width = chan_width.abs();
    let zoom_config = if abs_width < ZOOM_1MHZ_QUANTISED_WIDTH_GHZ {
        ZoomConfig::One
    } else if abs_width < ZOOM_4_MAX_WIDTH_GHZ {
        ZoomConfig::Four
    } else if abs_width < ZOOM_16_MAX_WIDTH_GHZ {
        ZoomConfig::Sixteen
    } else {
        ZoomConfig::SixtyFour
    };
    IfClassification::Zoom {
        zoom_type,
        zoom_config,
        bandwidth,
    }
}

/// The ATCA observing bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ObservingBand {
    /// 16cm, below 3.5 GHz
    #[serde(rename = "16cm")]
    Cm16,
    /// 4cm, 3.5 to 12 GHz
    #[serde(rename = "4cm")]
    Cm4,
    /// 15mm, 12 to 28 GHz
    #[serde(rename = "15mm")]
    Mm15,
    /// 7mm, 28 to 60 GHz
    #[serde(rename = "7mm")]
    Mm7,
    /// 3mm, above 60 GHz
    #[serde(rename = "3mm")]
    Mm3,
}

impl ObservingBand {
    /// The band a frequency (GHz) falls in. The intervals are half-open, so a
    /// frequency sitting exactly on a boundary belongs to the higher band.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cabb_pipeline::spectral::ObservingBand;
    ///
    /// assert_eq!(ObservingBand::from_frequency(3.4), ObservingBand::Cm16);
    /// assert_eq!(ObservingBand::from_frequency(3.5), ObservingBand::Cm4);
    /// ```
    pub fn from_frequency(freq_ghz: f64) -> Self {
        if freq_ghz < BAND_16CM_MAX_GHZ {
            ObservingBand::Cm16
        } else if freq_ghz < BAND_4CM_MAX_GHZ {
            ObservingBand::Cm4
        } else if freq_ghz < BAND_15MM_MAX_GHZ {
            ObservingBand::Mm15
        } else if freq_ghz < BAND_7MM_MAX_GHZ {
            ObservingBand::Mm7
        } else {
            ObservingBand::Mm3
        }
    }

    /// The conventional name of the band.
    pub fn name(&self) -> &'static str {
        match self {
            ObservingBand::Cm16 => "16cm",
            ObservingBand::Cm4 => "4cm",
            ObservingBand::Mm15 => "15mm",
            ObservingBand::Mm7 => "7mm",
            ObservingBand::Mm3 => "3mm",
        }
    }
}

impl Display for ObservingBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The name of the band that a frequency (GHz) is in.
pub fn frequency_band(freq_ghz: f64) -> &'static str {
    ObservingBand::from_frequency(freq_ghz).name()
}

/// The frequency of each channel (GHz) of an IF.
pub fn channel_frequencies(num_chans: usize, first_freq_ghz: f64, chan_width_ghz: f64) -> Vec<f64> {
    (0..num_chans)
        .map(|chan_idx| first_freq_ghz + chan_idx as f64 * chan_width_ghz)
        .collect()
}

/// The frequency at the middle of an IF (GHz).
pub fn centre_frequency(num_chans: usize, first_freq_ghz: f64, chan_width_ghz: f64) -> f64 {
    (num_chans as f64 - 1.0) / 2.0 * chan_width_ghz + first_freq_ghz
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_classify_single_1mhz_zoom() {
        let width = 1e-6 / 2048.0;
        assert_eq!(
            classify_if(2049, 2.1, width),
            IfClassification::Zoom {
                zoom_type: ZoomType::Single,
                zoom_config: ZoomConfig::One,
                bandwidth: (width * 2049.0).abs(),
            }
        );
    }

    #[test]
    fn test_classify_consolidated_1mhz_zoom() {
        let classification = classify_if(4097, 2.1, 1e-6 / 2048.0);
        assert!(matches!(
            classification,
            IfClassification::Zoom {
                zoom_type: ZoomType::Consolidated,
                zoom_config: ZoomConfig::One,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_quantised_width_is_restored() {
        // the toolkit reports 1 MHz zooms with a width of zero
        let classification = classify_if(2049, 2.1, -0.0);
        assert_abs_diff_eq!(
            classification.bandwidth_ghz(),
            2049.0 * 1e-6 / 2048.0,
            epsilon = 1e-15
        );
        assert_eq!(effective_chan_width(-1e-9), -1e-6 / 2048.0);
        assert_eq!(effective_chan_width(1e-9), 1e-6 / 2048.0);
    }

    #[test]
    fn test_classify_zoom_configs() {
        let config_of = |width: f64| match classify_if(2049, 2.1, width) {
            IfClassification::Zoom { zoom_config, .. } => zoom_config,
            other => panic!("expected a zoom, got {other:?}"),
        };
        assert_eq!(config_of(1.9e-6), ZoomConfig::Four);
        assert_eq!(config_of(7.8e-6), ZoomConfig::Sixteen);
        assert_eq!(config_of(3.1e-5), ZoomConfig::SixtyFour);
        assert_eq!(config_of(-7.8e-6), ZoomConfig::Sixteen);
    }

    #[test]
    fn test_classify_wide() {
        assert_eq!(
            classify_if(2049, 2.1, 0.001),
            IfClassification::Wide { bandwidth: 2.049 }
        );
        // lower sideband IFs have negative widths
        assert!(classify_if(2049, 2.1, -0.001).is_wide());
    }

    #[test]
    fn test_classify_unclassified() {
        let classification = classify_if(1024, 2.1, 0.001);
        assert_eq!(
            classification,
            IfClassification::Unclassified { bandwidth: 1.024 }
        );
        assert_eq!(classification.band_type(), "unclassified");
        assert!(!classification.is_wide());
    }

    #[test]
    fn test_frequency_band_boundaries() {
        assert_eq!(frequency_band(3.4), "16cm");
        assert_eq!(frequency_band(3.5), "4cm");
        assert_eq!(frequency_band(11.999), "4cm");
        assert_eq!(frequency_band(12.0), "15mm");
        assert_eq!(frequency_band(27.9), "15mm");
        assert_eq!(frequency_band(28.0), "7mm");
        assert_eq!(frequency_band(60.0), "3mm");
        assert_eq!(frequency_band(93.0), "3mm");
    }

    #[test]
    fn test_channel_frequencies() {
        let freqs = channel_frequencies(3, 2.0, -0.001);
        assert_eq!(freqs.len(), 3);
        assert_abs_diff_eq!(freqs[0], 2.0);
        assert_abs_diff_eq!(freqs[2], 1.998, epsilon = 1e-12);
        assert_abs_diff_eq!(centre_frequency(2049, 1.076, 0.001), 2.1, epsilon = 1e-12);
    }
}
