//! Parameter sweeps: the detector pipeline over every trial of every variant, and reduction into per-variant
//! summaries.
//!
//! Trials are processed independently, in parallel. A trial that cannot be loaded or analyzed is recorded as
//! [`TrialOutcome::Failed`] and never aborts its siblings. Only structural errors, e.g., an unwritable result store,
//! abort the sweep.
use itertools::iproduct;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::analysis::{analyze_trial, detect_trial_blocks, trial_activity, FiringRate, TrialActivity, TrialResult};
use crate::block::BlockDetection;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::spectral::{average_psd, PowerSpectrum, SpectralSummary};
use crate::store::ResultStore;
use crate::trial::Trial;
use crate::utils::{mean, std_dev};

/// The swept parameter besides the sodium and potassium conductance scales.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum VariantAxis {
    /// The external noise factor.
    Noise,
    /// The recurrent basket to basket connection weight scale.
    RecurrentWeight,
}

impl VariantAxis {
    fn tag(&self) -> &'static str {
        match self {
            VariantAxis::Noise => "noise",
            VariantAxis::RecurrentWeight => "bwb_bwb_weight",
        }
    }
}

/// One point of the parameter grid.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct VariantKey {
    /// The sodium conductance scale.
    pub gna: f64,
    /// The potassium conductance scale.
    pub gk: f64,
    pub axis: VariantAxis,
    /// The noise factor or the recurrent weight scale, depending on the axis.
    pub value: f64,
}

impl VariantKey {
    /// Returns the tag naming the variant directory and results, e.g., `gna_1.00_gk_0.80_noise_1.00`.
    pub fn tag(&self) -> String {
        format!(
            "gna_{:.2}_gk_{:.2}_{}_{:.2}",
            self.gna,
            self.gk,
            self.axis.tag(),
            self.value
        )
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for VariantKey {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AnalysisError::InvalidVariant(s.to_string());
        let parse = |x: &str| x.parse::<f64>().map_err(|_| invalid());

        let rest = s.strip_prefix("gna_").ok_or_else(invalid)?;
        let (gna, rest) = rest.split_once("_gk_").ok_or_else(invalid)?;
        let (gk, axis, value) = [VariantAxis::Noise, VariantAxis::RecurrentWeight]
            .into_iter()
            .find_map(|axis| {
                rest.split_once(&format!("_{}_", axis.tag()))
                    .map(|(gk, value)| (gk, axis, value))
            })
            .ok_or_else(invalid)?;

        Ok(VariantKey {
            gna: parse(gna)?,
            gk: parse(gk)?,
            axis,
            value: parse(value)?,
        })
    }
}

/// A Cartesian grid of variants.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ParameterGrid {
    pub gna: Vec<f64>,
    pub gk: Vec<f64>,
    pub axis: VariantAxis,
    pub values: Vec<f64>,
}

impl ParameterGrid {
    /// Returns all variants of the grid, the last parameter varying fastest.
    pub fn keys(&self) -> Vec<VariantKey> {
        iproduct!(self.gna.iter(), self.gk.iter(), self.values.iter())
            .map(|(gna, gk, value)| VariantKey {
                gna: *gna,
                gk: *gk,
                axis: self.axis,
                value: *value,
            })
            .collect()
    }

    pub fn num_variants(&self) -> usize {
        self.gna.len() * self.gk.len() * self.values.len()
    }
}

/// A provider of the simulated trials of every variant.
pub trait TrialSource: Sync {
    /// Returns true if the variant has been simulated.
    fn has_variant(&self, tag: &str) -> bool;

    /// Load the trial with the given index of the variant.
    fn load_trial(&self, tag: &str, index: usize) -> Result<Trial, AnalysisError>;
}

/// Trials stored as JSON files at `<root>/<variant tag>/<trial tag>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryTrialSource {
    root: PathBuf,
}

impl DirectoryTrialSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        DirectoryTrialSource {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the path of the trial file.
    pub fn path(&self, tag: &str, index: usize) -> PathBuf {
        self.root.join(tag).join(format!("{}.json", Trial::tag(index)))
    }
}

impl TrialSource for DirectoryTrialSource {
    fn has_variant(&self, tag: &str) -> bool {
        self.root.join(tag).is_dir()
    }

    fn load_trial(&self, tag: &str, index: usize) -> Result<Trial, AnalysisError> {
        Trial::load_from(self.path(tag, index))
    }
}

/// The block detection outcome of one trial.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum TrialOutcome {
    /// At least one block was detected.
    Blocks(BlockDetection),
    /// The trial was analyzed and has no block.
    NoEvents,
    /// The trial could not be loaded or analyzed.
    Failed(String),
}

impl TrialOutcome {
    /// Returns the detected blocks, if any.
    pub fn blocks(&self) -> Option<&BlockDetection> {
        match self {
            TrialOutcome::Blocks(detection) => Some(detection),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TrialOutcome::Failed(_))
    }
}

impl From<Option<BlockDetection>> for TrialOutcome {
    fn from(blocks: Option<BlockDetection>) -> Self {
        match blocks {
            Some(detection) if !detection.is_empty() => TrialOutcome::Blocks(detection),
            _ => TrialOutcome::NoEvents,
        }
    }
}

/// The full analysis of a trial: blocks and bursts around the onset, and activity profile.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TrialAnalysis {
    pub result: TrialResult,
    pub activity: TrialActivity,
}

impl TrialAnalysis {
    /// Returns the block detection outcome of the analysis.
    pub fn outcome(&self) -> TrialOutcome {
        TrialOutcome::from(self.result.blocks.clone())
    }
}

/// The outcomes of all trials of a variant, keyed by trial tag, along with the full analysis of every trial that
/// could be analyzed.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct VariantResults {
    pub tag: String,
    pub trials: BTreeMap<String, TrialOutcome>,
    #[serde(default)]
    pub analyses: BTreeMap<String, TrialAnalysis>,
}

impl VariantResults {
    /// Returns the burst analyses of the trials, in trial order, e.g., to be aligned across trials.
    pub fn trial_results(&self) -> Vec<TrialResult> {
        self.analyses
            .values()
            .map(|analysis| analysis.result.clone())
            .collect()
    }
}

/// Returns the block detection outcome of a trial: the convolved activity of the configured population is scanned
/// for blocks.
pub fn process_block_trial(trial: &Trial, config: &AnalysisConfig) -> TrialOutcome {
    match detect_trial_blocks(trial, config) {
        Ok(detection) => TrialOutcome::from(Some(detection)),
        Err(e) => TrialOutcome::Failed(e.to_string()),
    }
}

/// Run the whole detector pipeline on a trial: block onset and intervals, bursts around the onset, then firing
/// rates and spectral signature.
pub fn process_trial(trial: &Trial, config: &AnalysisConfig) -> Result<TrialAnalysis, AnalysisError> {
    Ok(TrialAnalysis {
        result: analyze_trial(trial, config)?,
        activity: trial_activity(trial, config)?,
    })
}

/// The reduction of the outcomes of a variant.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct VariantSummary {
    pub tag: String,
    /// The number of trials the variant is expected to have.
    pub expected_trials: usize,
    /// The total number of blocks over all trials.
    pub event_count: usize,
    /// The number of trials with at least one block.
    pub trials_with_events: usize,
    /// The share of the expected trials with at least one block, in percent.
    pub percentage_with_events: f64,
    /// The mean start of the first block over the trials with blocks (ms).
    pub average_delay: f64,
    /// The standard deviation of the first block start over the trials with blocks (ms).
    pub std_delay: f64,
    /// The summed duration of all blocks (ms).
    pub total_duration: f64,
    /// The mean duration of a block (ms).
    pub mean_block_duration: f64,
    /// The number of trials that could not be loaded or analyzed.
    pub failed_trials: usize,
    /// The firing rates per population, averaged over the analyzed trials.
    pub firing_rates: BTreeMap<String, RateSummary>,
    /// The spectral signatures averaged over the trials with a usable LFP.
    pub spectral: SpectralAverage,
}

/// The firing rate statistics of a population averaged over the trials of a variant (Hz).
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RateSummary {
    /// The mean over trials of the population mean rate.
    pub mean: f64,
    /// The mean over trials of the population rate standard deviation.
    pub std: f64,
    /// The standard error of the mean, i.e., `std / sqrt(expected trials)`.
    pub sem: f64,
}

/// The spectral signatures of a variant, averaged over its non-degenerate trials. All zero if there are none.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct SpectralAverage {
    pub theta_power: f64,
    pub gamma_power: f64,
    pub theta_frequency: f64,
    pub gamma_frequency: f64,
    /// The number of trials contributing.
    pub num_trials: usize,
    /// The average Welch spectrum, if any trial contributes.
    pub spectrum: Option<PowerSpectrum>,
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        mean(values)
    }
}

/// Average the firing rates of every population over the trial activities.
fn summarize_rates(activities: &[&TrialActivity], expected_trials: usize) -> BTreeMap<String, RateSummary> {
    let mut rates: BTreeMap<String, Vec<FiringRate>> = BTreeMap::new();
    for activity in activities {
        for (label, rate) in activity.firing_rates.iter() {
            rates.entry(label.clone()).or_default().push(*rate);
        }
    }
    rates
        .into_iter()
        .map(|(label, rates)| {
            let std = mean_or_zero(&rates.iter().map(|rate| rate.std).collect::<Vec<f64>>());
            let summary = RateSummary {
                mean: mean_or_zero(&rates.iter().map(|rate| rate.mean).collect::<Vec<f64>>()),
                std,
                sem: std / (expected_trials.max(1) as f64).sqrt(),
            };
            (label, summary)
        })
        .collect()
}

/// Average the non-degenerate spectral signatures.
fn summarize_spectra(activities: &[&TrialActivity]) -> SpectralAverage {
    let summaries = activities
        .iter()
        .map(|activity| activity.spectral.clone())
        .filter(|summary| !summary.is_degenerate())
        .collect::<Vec<SpectralSummary>>();
    let average = |f: fn(&SpectralSummary) -> f64| {
        mean_or_zero(&summaries.iter().map(f).collect::<Vec<f64>>())
    };
    SpectralAverage {
        theta_power: average(|summary| summary.theta_power),
        gamma_power: average(|summary| summary.gamma_power),
        theta_frequency: average(|summary| summary.theta_frequency),
        gamma_frequency: average(|summary| summary.gamma_frequency),
        num_trials: summaries.len(),
        spectrum: average_psd(&summaries).ok(),
    }
}

impl VariantSummary {
    /// Returns the share of trials with blocks, e.g., "(1 out of 2, 50.0%)".
    pub fn percentage_label(&self) -> String {
        format!(
            "({} out of {}, {:.1}%)",
            self.trials_with_events, self.expected_trials, self.percentage_with_events
        )
    }
}

/// Reduce the outcomes of a variant. Delays are computed over the starts of all blocks of the trials with blocks,
/// pooled, and are zero if there are none.
pub fn summarize_variant(results: &VariantResults, expected_trials: usize) -> VariantSummary {
    let detections = results
        .trials
        .values()
        .filter_map(|outcome| outcome.blocks())
        .filter(|detection| !detection.is_empty())
        .collect::<Vec<&BlockDetection>>();

    let event_count = detections.iter().map(|detection| detection.event_count()).sum::<usize>();
    let trials_with_events = detections.len();
    let percentage_with_events = if expected_trials > 0 {
        trials_with_events as f64 / expected_trials as f64 * 100.0
    } else {
        0.0
    };

    let delays = detections
        .iter()
        .flat_map(|detection| detection.starts())
        .collect::<Vec<f64>>();
    let (average_delay, std_delay) = if delays.is_empty() {
        (0.0, 0.0)
    } else {
        (mean(&delays), std_dev(&delays))
    };

    let total_duration = detections.iter().map(|detection| detection.total_duration).sum::<f64>();
    let activities = results
        .analyses
        .values()
        .map(|analysis| &analysis.activity)
        .collect::<Vec<&TrialActivity>>();
    let mean_block_duration = if event_count > 0 {
        total_duration / event_count as f64
    } else {
        0.0
    };

    VariantSummary {
        tag: results.tag.clone(),
        expected_trials,
        event_count,
        trials_with_events,
        percentage_with_events,
        average_delay,
        std_delay,
        total_duration,
        mean_block_duration,
        failed_trials: results.trials.values().filter(|outcome| outcome.is_failed()).count(),
        firing_rates: summarize_rates(&activities, expected_trials),
        spectral: summarize_spectra(&activities),
    }
}

/// A sweep of the detector pipeline over a parameter grid.
#[derive(Debug, Clone)]
pub struct Sweep {
    config: AnalysisConfig,
    grid: ParameterGrid,
    num_trials: usize,
    cancel: Arc<AtomicBool>,
}

impl Sweep {
    /// Create a new sweep over the grid, every variant having `num_trials` trials.
    pub fn new(config: AnalysisConfig, grid: ParameterGrid, num_trials: usize) -> Result<Self, AnalysisError> {
        config.validate()?;
        if num_trials == 0 {
            return Err(AnalysisError::InvalidParameter(
                "The number of trials per variant must be positive".to_string(),
            ));
        }
        Ok(Sweep {
            config,
            grid,
            num_trials,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Returns the flag cancelling the sweep once set. Trials not started yet are abandoned, and partially
    /// processed variants are not stored.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Run the sweep and return the summary of every variant, keyed by tag.
    /// Stored variants are loaded rather than recomputed and variants without trials are skipped.
    pub fn run<S: TrialSource, R: ResultStore>(
        &self,
        source: &S,
        store: &R,
    ) -> Result<BTreeMap<String, VariantSummary>, AnalysisError> {
        let keys = self.grid.keys();
        log::info!(
            "Sweep over {} variants of {} trials",
            keys.len(),
            self.num_trials
        );

        let summaries = keys
            .par_iter()
            .map(|key| self.run_variant(key, source, store))
            .collect::<Result<Vec<Option<VariantSummary>>, AnalysisError>>()?;

        if self.is_cancelled() {
            log::warn!("Sweep cancelled");
        }

        Ok(summaries
            .into_iter()
            .flatten()
            .map(|summary| (summary.tag.clone(), summary))
            .collect())
    }

    fn run_variant<S: TrialSource, R: ResultStore>(
        &self,
        key: &VariantKey,
        source: &S,
        store: &R,
    ) -> Result<Option<VariantSummary>, AnalysisError> {
        let tag = key.tag();
        if self.is_cancelled() {
            return Ok(None);
        }

        if store.contains(&tag) {
            log::info!("Variant {}: loading stored results", tag);
            let results = store.load(&tag)?;
            return Ok(Some(summarize_variant(&results, self.num_trials)));
        }

        if !source.has_variant(&tag) {
            log::warn!("Variant {}: no trials found, skipped", tag);
            return Ok(None);
        }

        let outcomes = (0..self.num_trials)
            .into_par_iter()
            .map(|index| {
                if self.is_cancelled() {
                    return None;
                }
                let analysis = source
                    .load_trial(&tag, index)
                    .and_then(|trial| process_trial(&trial, &self.config));
                if let Err(e) = &analysis {
                    log::warn!("Variant {}, trial {}: {}", tag, Trial::tag(index), e);
                }
                Some((Trial::tag(index), analysis))
            })
            .collect::<Vec<Option<(String, Result<TrialAnalysis, AnalysisError>)>>>();

        if self.is_cancelled() || outcomes.iter().any(|outcome| outcome.is_none()) {
            log::info!("Variant {}: cancelled, results discarded", tag);
            return Ok(None);
        }

        let mut results = VariantResults {
            tag: tag.clone(),
            trials: BTreeMap::new(),
            analyses: BTreeMap::new(),
        };
        for (trial_tag, analysis) in outcomes.into_iter().flatten() {
            match analysis {
                Ok(analysis) => {
                    results.trials.insert(trial_tag.clone(), analysis.outcome());
                    results.analyses.insert(trial_tag, analysis);
                }
                Err(e) => {
                    results.trials.insert(trial_tag, TrialOutcome::Failed(e.to_string()));
                }
            }
        }
        store.save(&results)?;

        let summary = summarize_variant(&results, self.num_trials);
        log::info!(
            "Variant {}: {} events {}, delay {:.1} +/- {:.1} ms",
            tag,
            summary.event_count,
            summary.percentage_label(),
            summary.average_delay,
            summary.std_delay
        );
        Ok(Some(summary))
    }
}
