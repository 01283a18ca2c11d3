//! The run-wide record of what was observed, built up as the observation is
//! loaded and split.

use indexmap::IndexMap;
use log::warn;
use serde::Serialize;

use crate::{
    calibrators::ObservedSource,
    types::{FrequencyConfig, Source, SubBand},
};

/// A dataset as the reduction toolkit knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DatasetHandle {
    /// The dataset name, relative to the working directory
    pub name: String,
    /// Rounded centre frequency [MHz] the dataset was split at, if it is a
    /// single sub-band
    pub centre_freq_mhz: Option<i64>,
}

impl DatasetHandle {
    /// A handle with no known frequency.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            centre_freq_mhz: None,
        }
    }
}

/// Where a dataset lives in the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubBandRef {
    /// Frequency configuration id
    pub freq_config: usize,
    /// Index of the sub-band within the configuration
    pub sub_band: usize,
}

/// Sources and frequency configurations of an observation, and the datasets
/// they were split into.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservationRecord {
    /// Every source, in the order first seen
    pub sources: IndexMap<String, Source>,
    /// Every frequency configuration, by id
    pub freq_configs: IndexMap<usize, FrequencyConfig>,
    /// The loaded dataset before splitting
    pub loaded: Option<DatasetHandle>,
}

impl ObservationRecord {
    /// Build a record from what the toolkit found on load. Records for the
    /// same source are merged.
    pub fn new(
        loaded: Option<DatasetHandle>,
        sources: Vec<Source>,
        freq_configs: Vec<FrequencyConfig>,
    ) -> Self {
        let mut record = Self {
            loaded,
            ..Default::default()
        };
        for source in sources {
            record.add_source(source);
        }
        for freq_config in freq_configs {
            record.freq_configs.insert(freq_config.id, freq_config);
        }
        record
    }

    /// Add a source, or merge its scans into an existing one.
    pub fn add_source(&mut self, source: Source) {
        match self.sources.get_mut(&source.name) {
            Some(existing) => existing.merge(source),
            None => {
                self.sources.insert(source.name.clone(), source);
            }
        }
    }

    /// Bind split datasets to sub-bands. Each dataset goes to the first
    /// unbound sub-band with the same rounded centre frequency. Returns the
    /// datasets that found a home.
    pub fn bind_datasets(&mut self, datasets: &[DatasetHandle]) -> Vec<DatasetHandle> {
        let mut bound = vec![];
        for dataset in datasets {
            let slot = dataset.centre_freq_mhz.and_then(|centre| {
                self.freq_configs
                    .values_mut()
                    .flat_map(|config| config.sub_bands.iter_mut())
                    .find(|sub_band| {
                        sub_band.dataset.is_none() && sub_band.centre_freq_mhz() == centre
                    })
            });
            match slot {
                Some(sub_band) => {
                    sub_band.dataset = Some(dataset.name.clone());
                    bound.push(dataset.clone());
                }
                None => warn!("dataset {} matches no unsplit sub-band", dataset.name),
            }
        }
        bound
    }

    /// Find the sub-band a dataset was split from.
    pub fn locate(&self, dataset: &str) -> Option<SubBandRef> {
        self.freq_configs.values().find_map(|config| {
            config
                .sub_bands
                .iter()
                .position(|sub_band| sub_band.dataset.as_deref() == Some(dataset))
                .map(|sub_band| SubBandRef {
                    freq_config: config.id,
                    sub_band,
                })
        })
    }

    /// The sub-band a dataset was split from.
    pub fn sub_band(&self, dataset: &str) -> Option<&SubBand> {
        let location = self.locate(dataset)?;
        self.freq_configs
            .get(&location.freq_config)
            .and_then(|config| config.sub_bands.get(location.sub_band))
    }

    /// Every bound dataset, in configuration then sub-band order.
    pub fn datasets(&self) -> Vec<String> {
        self.freq_configs
            .values()
            .flat_map(|config| config.sub_bands.iter())
            .filter_map(|sub_band| sub_band.dataset.clone())
            .collect()
    }

    /// The datasets of a configuration that came from the given IF chain.
    pub fn chain_datasets(&self, freq_config: usize, if_chain: usize) -> Vec<String> {
        self.freq_configs
            .get(&freq_config)
            .map(|config| {
                config
                    .sub_bands
                    .iter()
                    .filter(|sub_band| sub_band.if_chain == if_chain)
                    .filter_map(|sub_band| sub_band.dataset.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The sources scanned in a configuration, in discovery order.
    pub fn observed_sources(&self, freq_config: usize) -> Vec<ObservedSource> {
        self.sources
            .values()
            .filter_map(|source| {
                let cal_codes: Vec<String> = source
                    .cuts_in(freq_config)
                    .map(|cut| cut.cal_code.clone())
                    .collect();
                if cal_codes.is_empty() {
                    None
                } else {
                    Some(ObservedSource {
                        name: source.name.clone(),
                        num_cuts: cal_codes.len(),
                        cal_codes,
                    })
                }
            })
            .collect()
    }
}
