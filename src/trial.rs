//! Simulation output of a single trial, as produced by the external simulator.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::AnalysisError;

/// The recorded output of one neuron: its spike times (ms) and, optionally, some membrane potential traces
/// sampled at the simulation time step.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct NeuronRecord {
    /// The spike times in milliseconds (not necessarily sorted).
    pub spike_times: Vec<f64>,
    /// The somatic membrane potential (mV).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soma_voltage: Option<Vec<f64>>,
    /// The apical dendrite membrane potential (mV), pyramidal cells only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apical_voltage: Option<Vec<f64>>,
    /// The basal dendrite membrane potential (mV), pyramidal cells only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basal_voltage: Option<Vec<f64>>,
}

impl NeuronRecord {
    /// Create a record holding spike times only.
    pub fn new(spike_times: Vec<f64>) -> Self {
        NeuronRecord {
            spike_times,
            ..Default::default()
        }
    }

    /// Returns the number of spikes of the neuron.
    pub fn num_spikes(&self) -> usize {
        self.spike_times.len()
    }
}

/// One simulation run, i.e., a mapping from GID to the recorded neuron output.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Trial {
    /// The two-digit trial tag, e.g., "07".
    pub id: String,
    /// The neuron records, keyed by GID.
    pub records: BTreeMap<usize, NeuronRecord>,
}

impl Trial {
    /// Create a new trial from its records.
    pub fn new(id: &str, records: BTreeMap<usize, NeuronRecord>) -> Self {
        Trial {
            id: id.to_string(),
            records,
        }
    }

    /// Returns the two-digit tag of the trial with the provided index.
    pub fn tag(index: usize) -> String {
        format!("{:02}", index)
    }

    /// Returns the record of the neuron with the provided GID, if any.
    pub fn get(&self, gid: usize) -> Option<&NeuronRecord> {
        self.records.get(&gid)
    }

    pub fn num_neurons(&self) -> usize {
        self.records.len()
    }

    /// Save the trial to a file.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), AnalysisError> {
        let file = File::create(path).map_err(|e| AnalysisError::IOError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|e| AnalysisError::IOError(e.to_string()))?;
        writer.flush().map_err(|e| AnalysisError::IOError(e.to_string()))
    }

    /// Load a trial from a file.
    /// A missing file and an unreadable one are reported as distinct errors.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AnalysisError::MissingTrial(path.display().to_string()));
        }
        let file = File::open(path).map_err(|e| AnalysisError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| AnalysisError::InvalidTrial(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_trial_tag() {
        assert_eq!(Trial::tag(0), "00");
        assert_eq!(Trial::tag(7), "07");
        assert_eq!(Trial::tag(14), "14");
    }

    #[test]
    fn test_trial_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("03.json");

        let mut records = BTreeMap::new();
        records.insert(3, NeuronRecord::new(vec![12.5, 3.0]));
        records.insert(
            801,
            NeuronRecord {
                spike_times: vec![],
                soma_voltage: Some(vec![-65.0, -64.5]),
                apical_voltage: None,
                basal_voltage: None,
            },
        );
        let trial = Trial::new("03", records);
        trial.save_to(&path).unwrap();

        let loaded = Trial::load_from(&path).unwrap();
        assert_eq!(loaded, trial);
        assert_eq!(loaded.get(3).unwrap().num_spikes(), 2);
        assert!(loaded.get(4).is_none());
    }

    #[test]
    fn test_trial_load_errors() {
        let dir = tempdir().unwrap();

        let missing = dir.path().join("00.json");
        assert!(matches!(
            Trial::load_from(&missing),
            Err(AnalysisError::MissingTrial(_))
        ));

        let corrupt = dir.path().join("01.json");
        std::fs::write(&corrupt, "{\"id\": \"01\", \"records\": [1, 2").unwrap();
        assert!(matches!(
            Trial::load_from(&corrupt),
            Err(AnalysisError::InvalidTrial(_))
        ));
    }
}
