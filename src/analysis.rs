//! Trial-level analysis: block onset, block intervals and burst activity around the onset, followed by the
//! alignment of burst-relative segments across trials.
//!
//! # Examples
//!
//! ```rust
//! use ca1_analysis::analysis::analyze_trial;
//! use ca1_analysis::config::AnalysisConfig;
//! use ca1_analysis::trial::{NeuronRecord, Trial};
//! use std::collections::BTreeMap;
//!
//! let mut records = BTreeMap::new();
//! records.insert(800, NeuronRecord::new(vec![10.0, 20.0]));
//! let trial = Trial::new("00", records);
//!
//! let result = analyze_trial(&trial, &AnalysisConfig::default()).unwrap();
//! assert_eq!(result.onset, Some(20.1));
//! ```
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::block::{detect_depolarization_blocks, find_block_onset, BlockDetection};
use crate::burst::{
    average_segments, classify_bursts, detect_bursts, extract_segment, AlignedAverage, AlignedSegment,
    BurstClassification, BurstInterval,
};
use crate::config::AnalysisConfig;
use crate::convolution::{convolve_per_neuron, convolve_pooled, uniform_bin_edges, ConvolvedSignal};
use crate::error::AnalysisError;
use crate::spectral::{compute_lfp, compute_psd, SpectralSummary};
use crate::spikes::{population_firing_rate, population_spike_times, population_spike_trains};
use crate::trial::Trial;

/// The pooled activity of one population around the block onset.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PopulationActivity {
    pub signal: ConvolvedSignal,
    pub bursts: Vec<BurstInterval>,
    pub classification: BurstClassification,
}

/// The analysis of one trial.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: String,
    /// The onset of the block (ms), if any.
    pub onset: Option<f64>,
    /// The blocks of the convolved activity, if any.
    pub blocks: Option<BlockDetection>,
    /// The burst activity per population label, empty without onset.
    pub populations: BTreeMap<String, PopulationActivity>,
}

impl TrialResult {
    /// Returns the burst classification of the population, if analyzed.
    pub fn classification(&self, label: &str) -> Option<&BurstClassification> {
        self.populations.get(label).map(|activity| &activity.classification)
    }
}

/// Returns the block detection of the trial over the per-neuron convolved activity of the configured population.
pub fn detect_trial_blocks(trial: &Trial, config: &AnalysisConfig) -> Result<BlockDetection, AnalysisError> {
    let range = config.populations.get(&config.convolution.population)?;
    let trains = population_spike_trains(trial, range);
    let signal = convolve_per_neuron(
        &trains,
        config.simulation.total_duration,
        config.convolution.window_size,
        config.convolution.std,
        config.convolution.resolution,
    );
    Ok(detect_depolarization_blocks(&signal, &config.block_params()))
}

/// Returns the pooled activity of the population within `[onset - window, onset + window]`, with its bursts
/// classified relative to the onset.
pub fn population_activity(
    trial: &Trial,
    label: &str,
    onset: f64,
    config: &AnalysisConfig,
) -> Result<PopulationActivity, AnalysisError> {
    let range = config.populations.get(label)?;
    let times = population_spike_times(trial, range);
    let edges = uniform_bin_edges(
        onset - config.burst.window,
        onset + config.burst.window + config.burst.resolution,
        config.burst.resolution,
    );
    let signal = convolve_pooled(&times, &edges, config.burst.sigma, config.burst.resolution);
    let bursts = detect_bursts(&signal, config.burst.threshold);
    let classification = classify_bursts(&bursts, onset);

    Ok(PopulationActivity {
        signal,
        bursts,
        classification,
    })
}

/// Analyze one trial: find the block onset and the block intervals, then the bursts of every configured
/// population around the onset. Without onset, no population activity is computed.
pub fn analyze_trial(trial: &Trial, config: &AnalysisConfig) -> Result<TrialResult, AnalysisError> {
    let onset_range = config.populations.get(&config.onset.population)?;
    let onset = find_block_onset(
        trial,
        onset_range,
        config.onset.window,
        config.simulation.time_step,
        config.simulation.total_duration,
    );

    let detection = detect_trial_blocks(trial, config)?;
    let blocks = if detection.is_empty() {
        None
    } else {
        Some(detection)
    };

    let mut populations = BTreeMap::new();
    if let Some(onset) = onset {
        for label in config.burst.populations.iter() {
            populations.insert(label.clone(), population_activity(trial, label, onset, config)?);
        }
    } else {
        log::debug!("Trial {}: no block onset", trial.id);
    }

    Ok(TrialResult {
        trial_id: trial.id.clone(),
        onset,
        blocks,
        populations,
    })
}

/// The firing rate statistics of one population over the neurons present in a trial (Hz).
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FiringRate {
    pub mean: f64,
    pub std: f64,
}

/// The activity profile of one trial: firing rates of every population and spectral signature of the LFP proxy.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TrialActivity {
    pub trial_id: String,
    /// The firing rates per population label.
    pub firing_rates: BTreeMap<String, FiringRate>,
    /// The spectral signature of the LFP, degenerate if the trial has no usable dendritic traces.
    pub spectral: SpectralSummary,
}

/// Returns the activity profile of the trial: the firing rates of all configured populations over the simulated
/// duration, and the theta and gamma signatures of the LFP of the spectral population.
pub fn trial_activity(trial: &Trial, config: &AnalysisConfig) -> Result<TrialActivity, AnalysisError> {
    let firing_rates = config
        .populations
        .iter()
        .map(|range| {
            let (mean, std) = population_firing_rate(
                trial,
                range,
                config.simulation.total_duration,
                config.simulation.time_step,
            );
            (range.label.clone(), FiringRate { mean, std })
        })
        .collect();

    let range = config.populations.get(&config.spectral.population)?;
    let spectral = match compute_lfp(trial, range) {
        Some(lfp) => compute_psd(&lfp, &config.psd_params()),
        None => {
            log::debug!("Trial {}: no dendritic traces, no spectral signature", trial.id);
            SpectralSummary::degenerate()
        }
    };

    Ok(TrialActivity {
        trial_id: trial.id.clone(),
        firing_rates,
        spectral,
    })
}

/// Aligned segments per population label.
pub type AlignedPopulations = BTreeMap<String, Vec<AlignedSegment>>;

/// Returns the element-wise statistics of the aligned segments of every population with at least one segment.
pub fn average_aligned(aligned: &AlignedPopulations) -> BTreeMap<String, AlignedAverage> {
    aligned
        .iter()
        .filter_map(|(label, segments)| average_segments(segments).map(|average| (label.clone(), average)))
        .collect()
}

/// Align the first burst after the onset of every trial: the segment spans the burst extended by `margin` ms on
/// both sides, with the burst start at time 0.
pub fn align_first_burst_after(results: &[TrialResult], margin: f64) -> AlignedPopulations {
    let mut aligned = AlignedPopulations::new();
    for result in results {
        for (label, activity) in result.populations.iter() {
            if let Some(burst) = activity.classification.first_after {
                let segment = extract_segment(
                    &activity.signal,
                    (burst.start_time - margin).max(0.0),
                    burst.end_time + margin,
                    burst.start_time,
                );
                aligned.entry(label.clone()).or_default().push(segment);
            }
        }
    }
    aligned
}

/// Align the last burst before the onset of every trial: the segment spans the burst extended by `margin` ms on
/// both sides without crossing the onset, with the onset at time 0.
pub fn align_last_burst_before(results: &[TrialResult], margin: f64) -> AlignedPopulations {
    let mut aligned = AlignedPopulations::new();
    for result in results {
        let Some(onset) = result.onset else {
            continue;
        };
        for (label, activity) in result.populations.iter() {
            if let Some(burst) = activity.classification.last_before {
                let segment = extract_segment(
                    &activity.signal,
                    (burst.start_time - margin).max(0.0),
                    (burst.end_time + margin).min(onset),
                    onset,
                );
                aligned.entry(label.clone()).or_default().push(segment);
            }
        }
    }
    aligned
}

/// Align the second-last burst before the onset of every trial on the one of the reference population.
///
/// The start of the reference population burst sits at time 0. Every population contributes the segment within
/// `margin` ms of its own second-last burst start, or of the reference one if it has none. Trials where the
/// reference population has no such burst are skipped.
pub fn align_second_last_burst_before(
    results: &[TrialResult],
    reference_label: &str,
    margin: f64,
) -> AlignedPopulations {
    let mut aligned = AlignedPopulations::new();
    for result in results {
        let Some(reference) = result
            .classification(reference_label)
            .and_then(|classification| classification.second_last_before)
            .map(|burst| burst.start_time)
        else {
            continue;
        };
        for (label, activity) in result.populations.iter() {
            let anchor = activity
                .classification
                .second_last_before
                .map(|burst| burst.start_time)
                .unwrap_or(reference);
            let segment = extract_segment(
                &activity.signal,
                (anchor - margin).max(0.0),
                anchor + margin,
                reference,
            );
            aligned.entry(label.clone()).or_default().push(segment);
        }
    }
    aligned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::NeuronRecord;
    use approx::assert_relative_eq;

    /// A trial whose basket cells stop firing at 1000 ms, with synchronous pyramidal volleys.
    fn blocked_trial() -> Trial {
        let mut records = BTreeMap::new();
        for gid in 800..810 {
            let times = (0..100)
                .map(|i| i as f64 * 10.0 + (gid - 800) as f64 * 0.1)
                .collect::<Vec<f64>>();
            records.insert(gid, NeuronRecord::new(times));
        }
        // Pyramidal volleys at 850, 900, 950 and 1050 ms
        for gid in 0..20 {
            let jitter = gid as f64 * 0.05;
            let times = vec![850.0 + jitter, 900.0 + jitter, 950.0 + jitter, 1050.0 + jitter];
            records.insert(gid, NeuronRecord::new(times));
        }
        Trial::new("04", records)
    }

    #[test]
    fn test_analyze_trial() {
        let config = AnalysisConfig::default();
        let result = analyze_trial(&blocked_trial(), &config).unwrap();

        assert_eq!(result.trial_id, "04");
        // The last basket spike is at 990.9 ms
        assert_relative_eq!(result.onset.unwrap(), 991.0, epsilon = 1e-9);

        let blocks = result.blocks.as_ref().unwrap();
        assert_eq!(blocks.event_count(), 1);
        assert!(blocks.intervals[0].start > 990.0 && blocks.intervals[0].start < 1100.0);
        assert_eq!(blocks.intervals[0].end, 5000.0);

        let pyr = result.classification("Pyr").unwrap();
        assert!(pyr.last_before.unwrap().start_time < 951.0);
        assert!(pyr.last_before.unwrap().start_time > 940.0);
        assert!(pyr.second_last_before.unwrap().start_time < 901.0);
        assert!(pyr.first_after.unwrap().start_time > 1040.0);
        assert!(result.classification("OLM").is_none());

        let bwb = &result.populations["Bwb"];
        assert_eq!(bwb.signal.len(), 800);
        assert_relative_eq!(bwb.signal.times[0], 791.0, epsilon = 1e-9);
    }

    #[test]
    fn test_analyze_trial_without_onset() {
        let mut records = BTreeMap::new();
        records.insert(
            800,
            NeuronRecord::new((0..1000).map(|i| i as f64 * 5.0).collect()),
        );
        let trial = Trial::new("01", records);

        let result = analyze_trial(&trial, &AnalysisConfig::default()).unwrap();
        assert_eq!(result.onset, None);
        assert_eq!(result.blocks, None);
        assert!(result.populations.is_empty());
    }

    #[test]
    fn test_analyze_trial_unknown_population() {
        let mut config = AnalysisConfig::default();
        config.burst.populations = vec!["Granule".to_string()];
        assert_eq!(
            analyze_trial(&blocked_trial(), &config),
            Err(AnalysisError::UnknownPopulation("Granule".to_string()))
        );
    }

    #[test]
    fn test_trial_activity() {
        // Two pyramidal cells with a 8 Hz dendritic oscillation, spiking at 2 Hz
        let apical = (0..50_000)
            .map(|i| (2.0 * std::f64::consts::PI * 8.0 * i as f64 * 1e-4).sin())
            .collect::<Vec<f64>>();
        let mut records = BTreeMap::new();
        for gid in 0..2 {
            records.insert(
                gid,
                NeuronRecord {
                    spike_times: (0..10).map(|i| i as f64 * 500.0).collect(),
                    soma_voltage: None,
                    apical_voltage: Some(apical.clone()),
                    basal_voltage: Some(vec![0.0; 50_000]),
                },
            );
        }
        // Basket cells at 4 Hz and silent
        records.insert(800, NeuronRecord::new((0..20).map(|i| i as f64 * 250.0).collect()));
        records.insert(801, NeuronRecord::new(vec![]));
        let trial = Trial::new("02", records);

        let activity = trial_activity(&trial, &AnalysisConfig::default()).unwrap();
        assert_eq!(activity.trial_id, "02");
        assert_relative_eq!(activity.firing_rates["Pyr"].mean, 2.0, epsilon = 1e-9);
        assert_relative_eq!(activity.firing_rates["Pyr"].std, 0.0, epsilon = 1e-9);
        assert_relative_eq!(activity.firing_rates["Bwb"].mean, 2.0, epsilon = 1e-9);
        assert_relative_eq!(activity.firing_rates["Bwb"].std, 2.0, epsilon = 1e-9);
        assert_eq!(activity.firing_rates["OLM"], FiringRate::default());

        assert!(!activity.spectral.is_degenerate());
        assert!((activity.spectral.theta_frequency - 8.0).abs() < 1.6);
        assert!(activity.spectral.theta_power > activity.spectral.gamma_power);
    }

    #[test]
    fn test_trial_activity_without_traces() {
        let activity = trial_activity(&blocked_trial(), &AnalysisConfig::default()).unwrap();
        assert!(activity.spectral.is_degenerate());
        assert_eq!(activity.spectral, SpectralSummary::degenerate());
        assert!(activity.firing_rates["Bwb"].mean > 0.0);
    }

    fn burst(start_time: f64, end_time: f64) -> BurstInterval {
        BurstInterval {
            start_index: 0,
            end_index: 0,
            start_time,
            end_time,
            peak: 2.0,
        }
    }

    fn synthetic_result(
        onset: f64,
        pyr: BurstClassification,
        bwb: BurstClassification,
    ) -> TrialResult {
        let signal = ConvolvedSignal {
            times: (0..41).map(|i| onset - 20.0 + i as f64).collect(),
            values: vec![1.0; 41],
        };
        let mut populations = BTreeMap::new();
        for (label, classification) in [("Pyr", pyr), ("Bwb", bwb)] {
            populations.insert(
                label.to_string(),
                PopulationActivity {
                    signal: signal.clone(),
                    bursts: vec![],
                    classification,
                },
            );
        }
        TrialResult {
            trial_id: "00".to_string(),
            onset: Some(onset),
            blocks: None,
            populations,
        }
    }

    #[test]
    fn test_align_first_burst_after() {
        let results = vec![
            synthetic_result(
                100.0,
                BurstClassification {
                    first_after: Some(burst(105.0, 108.0)),
                    ..Default::default()
                },
                BurstClassification::default(),
            ),
            synthetic_result(
                100.0,
                BurstClassification {
                    first_after: Some(burst(110.0, 112.0)),
                    ..Default::default()
                },
                BurstClassification::default(),
            ),
        ];
        let aligned = align_first_burst_after(&results, 2.0);
        // Trials without the burst are skipped for that population
        assert!(!aligned.contains_key("Bwb"));

        let pyr = &aligned["Pyr"];
        assert_eq!(pyr.len(), 2);
        assert_eq!(pyr[0].times, vec![-2.0, -1.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(pyr[1].times.first(), Some(&-2.0));
        assert_eq!(pyr[1].times.last(), Some(&4.0));

        let averages = average_aligned(&aligned);
        assert_eq!(averages["Pyr"].times.len(), 8);
        assert_eq!(averages["Pyr"].num_segments, 2);
    }

    #[test]
    fn test_align_last_burst_before() {
        let results = vec![synthetic_result(
            100.0,
            BurstClassification {
                last_before: Some(burst(95.0, 99.0)),
                ..Default::default()
            },
            BurstClassification {
                last_before: Some(burst(85.0, 88.0)),
                ..Default::default()
            },
        )];
        let aligned = align_last_burst_before(&results, 3.0);
        // Capped at the onset
        assert_eq!(aligned["Pyr"][0].times, vec![-8.0, -7.0, -6.0, -5.0, -4.0, -3.0, -2.0, -1.0, 0.0]);
        assert_eq!(aligned["Bwb"][0].times.first(), Some(&-18.0));
        assert_eq!(aligned["Bwb"][0].times.last(), Some(&-9.0));
    }

    #[test]
    fn test_align_second_last_burst_before() {
        let results = vec![
            synthetic_result(
                100.0,
                BurstClassification {
                    second_last_before: Some(burst(90.0, 92.0)),
                    ..Default::default()
                },
                BurstClassification {
                    second_last_before: Some(burst(94.0, 96.0)),
                    ..Default::default()
                },
            ),
            synthetic_result(
                100.0,
                BurstClassification {
                    second_last_before: Some(burst(88.0, 90.0)),
                    ..Default::default()
                },
                BurstClassification::default(),
            ),
            // No reference burst
            synthetic_result(
                100.0,
                BurstClassification::default(),
                BurstClassification {
                    second_last_before: Some(burst(94.0, 96.0)),
                    ..Default::default()
                },
            ),
        ];
        let aligned = align_second_last_burst_before(&results, "Pyr", 2.0);
        assert_eq!(aligned["Pyr"].len(), 2);
        assert_eq!(aligned["Bwb"].len(), 2);

        assert_eq!(aligned["Pyr"][0].times, vec![-2.0, -1.0, 0.0, 1.0, 2.0]);
        // Own burst, shifted by the reference one
        assert_eq!(aligned["Bwb"][0].times, vec![2.0, 3.0, 4.0, 5.0, 6.0]);
        // Falls back to the reference burst
        assert_eq!(aligned["Bwb"][1].times, vec![-2.0, -1.0, 0.0, 1.0, 2.0]);
    }
}
