#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! `cabb_pipeline` triages wideband (CABB) observations from the Australia
//! Telescope Compact Array between loading and interactive calibration.
//!
//! It classifies correlator sub-bands, finds and flags intermittent
//! ("midweek") RFI, charges the bandwidth lost to flagging to the users of the
//! spectrum, chooses calibrators for every frequency configuration and picks
//! a reference antenna for each dataset. The number crunching of calibration
//! itself is left to an external toolkit reached through
//! [`io::ReductionToolkit`]; [`io::miriad::MiriadToolkit`] drives Miriad.
//!
//! # Examples
//!
//! Finding midweek RFI in an xy-amplitude time series:
//!
//! ```rust
//! use cabb_pipeline::{detect_midweek_rfi, AmplitudeSample, MidweekParams};
//!
//! // two hours of quiet data, with ten minutes of interference in the middle
//! let samples: Vec<AmplitudeSample> = (0..720)
//!     .map(|step| {
//!         let time = step as f64 * 10.0;
//!         let noisy = (3600.0..4200.0).contains(&time);
//!         let spread = if noisy && step % 2 == 0 { 60.0 } else { 0.0 };
//!         AmplitudeSample {
//!             time,
//!             amplitudes: vec![1.0, 1.0 + spread],
//!         }
//!     })
//!     .collect();
//!
//! let regions = detect_midweek_rfi(&samples, &MidweekParams::default());
//! assert_eq!(regions.len(), 1);
//! assert!(regions[0].start < 3600.0 && regions[0].stop > 4200.0);
//! ```
//!
//! Choosing a reference antenna:
//!
//! ```rust
//! use cabb_pipeline::select_reference_antenna;
//! use indexmap::indexmap;
//!
//! let fractions = indexmap! {
//!     "1".to_string() => 0.1,
//!     "3".to_string() => 0.1,
//!     "5".to_string() => 0.2,
//! };
//! assert_eq!(select_reference_antenna(&fractions), "3");
//! ```

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use lazy_static::lazy_static;

pub mod calibrators;
pub mod constants;
pub mod error;
pub mod flags;
pub mod io;
pub mod midweek;
pub mod observation;
pub mod pipeline;
pub mod rfi_cost;
pub mod spectral;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use calibrators::{select_calibrators, CalibratorAssignment, CalibratorCatalog};
pub use error::PipelineError;
pub use flags::{select_reference_antenna, FlagStatistics};
pub use midweek::{detect_midweek_rfi, MidweekParams};
pub use observation::ObservationRecord;
pub use pipeline::{Pipeline, PipelineOptions, PipelineOptionsBuilder, RunReport};
pub use rfi_cost::{attribute_flagging_cost, SpectrumAllocationTable};
pub use spectral::{classify_if, frequency_band, IfClassification, ObservingBand};
pub use types::{AmplitudeSample, FlagRegion};

lazy_static! {
    static ref DURATIONS: Mutex<HashMap<String, Duration>> = Mutex::new(HashMap::new());
}

/// Add to the time spent on a named stage.
pub fn increment_duration(name: &str, duration: Duration) {
    if let Ok(mut durations) = DURATIONS.lock() {
        *durations.entry(name.to_string()).or_default() += duration;
    }
}

/// The time spent on each named stage so far.
pub fn get_durations() -> HashMap<String, Duration> {
    DURATIONS
        .lock()
        .map(|durations| durations.clone())
        .unwrap_or_default()
}

#[macro_export]
/// Time an expression, adding the time taken to the named stage.
macro_rules! with_increment_duration {
    ($name:expr, $($s:stmt);+ $(;)?) => {{
        let _now = std::time::Instant::now();
        let _res = { $($s);* };
        $crate::increment_duration($name, _now.elapsed());
        _res
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_accumulate() {
        let value = with_increment_duration!("test_durations_accumulate", 1 + 1);
        assert_eq!(value, 2);
        with_increment_duration!("test_durations_accumulate", {
            std::thread::sleep(Duration::from_millis(1));
        });
        assert!(get_durations()["test_durations_accumulate"] >= Duration::from_millis(1));
    }
}
