//! Configuration of the analysis pipeline.
//!
//! All tunables, including the population GID ranges and the frequency bands, are held in one [`AnalysisConfig`]
//! passed explicitly to every component. Missing fields of a configuration file take their default value.
//!
//! # Examples
//!
//! ```rust
//! use ca1_analysis::config::AnalysisConfig;
//!
//! let config: AnalysisConfig = serde_json::from_str(r#"{"block": {"threshold": 0.01}}"#).unwrap();
//! assert_eq!(config.block.threshold, 0.01);
//! assert_eq!(config.block.min_duration, 100.0);
//! assert!(config.validate().is_ok());
//! ```
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::block::BlockParams;
use crate::error::AnalysisError;
use crate::population::Populations;
use crate::spectral::{Band, PsdParams};
use crate::{DEFAULT_BLOCK_THRESHOLD, DEFAULT_TIME_STEP, DEFAULT_TOTAL_DURATION};

/// The simulation settings shared by all trials of a dataset.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// The total simulated duration (ms).
    pub total_duration: f64,
    /// The simulation time step (ms), i.e., the sampling period of the voltage traces.
    pub time_step: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            total_duration: DEFAULT_TOTAL_DURATION,
            time_step: DEFAULT_TIME_STEP,
        }
    }
}

/// The per-neuron convolution used for block detection.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvolutionConfig {
    /// The population whose activity is convolved.
    pub population: String,
    /// The Gaussian window length (samples).
    pub window_size: usize,
    /// The Gaussian window standard deviation (samples).
    pub std: f64,
    /// The sample width (ms).
    pub resolution: f64,
}

impl Default for ConvolutionConfig {
    fn default() -> Self {
        ConvolutionConfig {
            population: "Bwb".to_string(),
            window_size: 150,
            std: 20.0,
            resolution: 1.0,
        }
    }
}

/// The threshold scan over the convolved activity.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    pub threshold: f64,
    /// The minimum block duration (ms).
    pub min_duration: f64,
    /// The startup transient ignored by the scan (ms).
    pub exclude_start: f64,
}

impl Default for BlockConfig {
    fn default() -> Self {
        BlockConfig {
            threshold: DEFAULT_BLOCK_THRESHOLD,
            min_duration: 100.0,
            exclude_start: 50.0,
        }
    }
}

/// The raw spike timeline scan locating the block onset.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetConfig {
    pub population: String,
    /// The length of the silent window (ms).
    pub window: f64,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        OnsetConfig {
            population: "Bwb".to_string(),
            window: 100.0,
        }
    }
}

/// The burst analysis around the block onset.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// The populations whose bursts are analyzed.
    pub populations: Vec<String>,
    /// The half-width of the analysis window around the onset (ms).
    pub window: f64,
    /// The histogram bin width (ms).
    pub resolution: f64,
    /// The Gaussian filter standard deviation (ms).
    pub sigma: f64,
    pub threshold: f64,
    /// The margin added around aligned bursts (ms).
    pub margin: f64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        BurstConfig {
            populations: vec!["Pyr".to_string(), "Bwb".to_string()],
            window: 200.0,
            resolution: 0.5,
            sigma: 2.0,
            threshold: 1.0,
            margin: 10.0,
        }
    }
}

/// The spectral analysis of the LFP proxy.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// The population providing the dendritic voltages.
    pub population: String,
    /// The discarded initial transient (ms).
    pub t0: f64,
    /// The highest frequency of interest (Hz).
    pub fmax: f64,
    /// The segment length of the Welch estimate.
    pub nfft: usize,
    pub theta: Band,
    pub gamma: Band,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        SpectralConfig {
            population: "Pyr".to_string(),
            t0: 200.0,
            fmax: 200.0,
            nfft: 256,
            theta: Band::theta(),
            gamma: Band::gamma(),
        }
    }
}

/// The full configuration of the analysis pipeline.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub populations: Populations,
    pub simulation: SimulationConfig,
    pub convolution: ConvolutionConfig,
    pub block: BlockConfig,
    pub onset: OnsetConfig,
    pub burst: BurstConfig,
    pub spectral: SpectralConfig,
}

fn check_positive(name: &str, value: f64) -> Result<(), AnalysisError> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(AnalysisError::InvalidParameter(format!(
            "{} must be positive and finite, got {}",
            name, value
        )));
    }
    Ok(())
}

fn check_non_negative(name: &str, value: f64) -> Result<(), AnalysisError> {
    if !(value >= 0.0 && value.is_finite()) {
        return Err(AnalysisError::InvalidParameter(format!(
            "{} must be non-negative and finite, got {}",
            name, value
        )));
    }
    Ok(())
}

impl AnalysisConfig {
    /// Check the consistency of the configuration: positive durations and resolutions, known populations,
    /// well-formed bands.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        Populations::new(self.populations.iter().cloned().collect())?;
        check_positive("simulation.total_duration", self.simulation.total_duration)?;
        check_positive("simulation.time_step", self.simulation.time_step)?;

        self.populations.get(&self.convolution.population)?;
        if self.convolution.window_size == 0 {
            return Err(AnalysisError::InvalidParameter(
                "convolution.window_size must be positive".to_string(),
            ));
        }
        check_positive("convolution.std", self.convolution.std)?;
        check_positive("convolution.resolution", self.convolution.resolution)?;

        if !self.block.threshold.is_finite() {
            return Err(AnalysisError::InvalidParameter(format!(
                "block.threshold must be finite, got {}",
                self.block.threshold
            )));
        }
        check_non_negative("block.min_duration", self.block.min_duration)?;
        check_non_negative("block.exclude_start", self.block.exclude_start)?;

        self.populations.get(&self.onset.population)?;
        check_positive("onset.window", self.onset.window)?;

        for label in self.burst.populations.iter() {
            self.populations.get(label)?;
        }
        check_positive("burst.window", self.burst.window)?;
        check_positive("burst.resolution", self.burst.resolution)?;
        check_non_negative("burst.sigma", self.burst.sigma)?;
        check_non_negative("burst.margin", self.burst.margin)?;

        self.populations.get(&self.spectral.population)?;
        check_non_negative("spectral.t0", self.spectral.t0)?;
        check_positive("spectral.fmax", self.spectral.fmax)?;
        if self.spectral.nfft < 2 {
            return Err(AnalysisError::InvalidParameter(format!(
                "spectral.nfft must be at least 2, got {}",
                self.spectral.nfft
            )));
        }
        self.spectral.theta.validate()?;
        self.spectral.gamma.validate()?;

        Ok(())
    }

    /// Returns the parameters of the threshold scan over the convolved activity.
    pub fn block_params(&self) -> BlockParams {
        BlockParams {
            threshold: self.block.threshold,
            min_duration: self.block.min_duration,
            exclude_start: self.block.exclude_start,
            total_duration: self.simulation.total_duration,
            resolution: self.convolution.resolution,
        }
    }

    /// Returns the parameters of the PSD estimate.
    pub fn psd_params(&self) -> PsdParams {
        PsdParams {
            dt: self.simulation.time_step,
            t0: self.spectral.t0,
            fmax: self.spectral.fmax,
            nfft: self.spectral.nfft,
            theta: self.spectral.theta.clone(),
            gamma: self.spectral.gamma.clone(),
        }
    }

    /// Returns the hex SHA-256 digest of the serialized configuration.
    /// Two configurations share a fingerprint if and only if they produce the same results.
    pub fn fingerprint(&self) -> Result<String, AnalysisError> {
        let serialized =
            serde_json::to_string(self).map_err(|e| AnalysisError::IOError(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(serialized);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Save the configuration to a file.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), AnalysisError> {
        let file = File::create(path).map_err(|e| AnalysisError::IOError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| AnalysisError::IOError(e.to_string()))?;
        writer.flush().map_err(|e| AnalysisError::IOError(e.to_string()))
    }

    /// Load a configuration from a file and validate it.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, AnalysisError> {
        let file = File::open(path).map_err(|e| AnalysisError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        let config: AnalysisConfig =
            serde_json::from_reader(reader).map_err(|e| AnalysisError::IOError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze_trial;
    use crate::trial::{NeuronRecord, Trial};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.simulation.total_duration, 5000.0);
        assert_eq!(config.simulation.time_step, 0.1);
        assert_eq!(config.convolution.window_size, 150);
        assert_eq!(config.block.threshold, 0.001);
        assert_eq!(config.spectral.theta, Band::new(3.0, 12.0).unwrap());
        assert_eq!(config.spectral.gamma, Band::new(30.0, 80.0).unwrap());

        let params = config.block_params();
        assert_eq!(params.min_duration, 100.0);
        assert_eq!(params.exclude_start, 50.0);
        assert_eq!(params.total_duration, 5000.0);
    }

    #[test]
    fn test_validate() {
        let mut config = AnalysisConfig::default();
        config.convolution.population = "Granule".to_string();
        assert_eq!(
            config.validate(),
            Err(AnalysisError::UnknownPopulation("Granule".to_string()))
        );

        let mut config = AnalysisConfig::default();
        config.simulation.time_step = 0.0;
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::InvalidParameter(_))
        ));

        let mut config = AnalysisConfig::default();
        config.burst.resolution = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.spectral.nfft = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_inverted_population_range() {
        let config: AnalysisConfig = serde_json::from_str(
            r#"{"populations": {"ranges": [
                {"label": "Pyr", "start": 0, "end": 800},
                {"label": "Bwb", "start": 1000, "end": 800}
            ]}}"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(AnalysisError::InvalidParameter(_))
        ));

        // Analyzing anyway finds no basket cell rather than failing
        let mut records = BTreeMap::new();
        records.insert(900, NeuronRecord::new(vec![10.0, 20.0]));
        let trial = Trial::new("00", records);
        let result = analyze_trial(&trial, &config).unwrap();
        assert_eq!(result.onset, Some(0.0));
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AnalysisConfig::default();
        config.block.threshold = 0.05;
        config.burst.populations = vec!["OLM".to_string()];
        config.save_to(&path).unwrap();

        let loaded = AnalysisConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.fingerprint().unwrap(), config.fingerprint().unwrap());

        assert!(matches!(
            AnalysisConfig::load_from(dir.path().join("missing.json")),
            Err(AnalysisError::IOError(_))
        ));
    }

    #[test]
    fn test_fingerprint() {
        let config = AnalysisConfig::default();
        let fingerprint = config.fingerprint().unwrap();
        assert_eq!(fingerprint.len(), 64);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fingerprint, AnalysisConfig::default().fingerprint().unwrap());

        let mut other = AnalysisConfig::default();
        other.block.min_duration = 150.0;
        assert_ne!(other.fingerprint().unwrap(), fingerprint);
    }
}
