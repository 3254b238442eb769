//! Detection of depolarization blocks, i.e., sustained episodes of suppressed population activity.
//!
//! Two strategies are implemented, operating on different signal kinds:
//! - [`find_block_onset`] scans the raw spike timeline of a population for the first silent window and returns
//!   a single onset time.
//! - [`detect_depolarization_blocks`] scans a convolved activity signal for all sustained runs below a fixed
//!   threshold and returns the full list of block intervals.
//!
//! The somatic voltage scan [`find_sustained_blocks`] complements them for voltage-based criteria.
use serde::{Deserialize, Serialize};

use crate::convolution::ConvolvedSignal;
use crate::population::PopulationRange;
use crate::spikes::population_spike_trains;
use crate::trial::Trial;
use crate::utils::{arange_len, nan_mean, whole_samples};
use crate::DEFAULT_BLOCK_THRESHOLD;

/// Tolerance on the ratio of a time to a time step, below which it is considered a whole number of steps.
const BIN_TOLERANCE: f64 = 1e-9;

/// Returns the index of the time bin of width `step` containing the time.
/// Times lying on a bin edge up to floating point noise (e.g., 999.9 / 0.1) belong to the bin starting at that edge.
fn bin_index(time: f64, step: f64) -> Option<usize> {
    let x = time / step;
    if !x.is_finite() || x < -BIN_TOLERANCE {
        return None;
    }
    let rounded = x.round();
    let index = if (x - rounded).abs() < BIN_TOLERANCE {
        rounded
    } else {
        x.floor()
    };
    Some(index.max(0.0) as usize)
}

/// Returns the onset time (ms) of the depolarization block of a population, if any.
///
/// The activity timeline splits `[0, total_duration)` into bins of `timestep` ms, a bin being active if any neuron
/// of the population spikes within it. The onset is the start of the first window of `window` ms without any
/// active bin, the window positions `0, ..., n - w - 1` being scanned for `n` bins and a window of `w` bins.
/// Spikes outside the timeline are ignored.
pub fn find_block_onset(
    trial: &Trial,
    range: &PopulationRange,
    window: f64,
    timestep: f64,
    total_duration: f64,
) -> Option<f64> {
    let n = arange_len(0.0, total_duration, timestep);
    let window_size = whole_samples(window, timestep).max(1);
    if window_size >= n {
        return None;
    }

    let mut active = vec![false; n];
    for times in population_spike_trains(trial, range) {
        for &time in times {
            if let Some(index) = bin_index(time, timestep) {
                if index < n {
                    active[index] = true;
                }
            }
        }
    }

    let mut silent = 0;
    for (i, is_active) in active.iter().enumerate() {
        if *is_active {
            silent = 0;
            continue;
        }
        silent += 1;
        if silent == window_size {
            let position = i + 1 - window_size;
            if position >= n - window_size {
                break;
            }
            let onset = position as f64 * timestep;
            log::debug!(
                "Block onset of population {} found at {} ms",
                range.label,
                onset
            );
            return Some(onset);
        }
    }
    None
}

/// A depolarization block, from `start` to `end` (ms).
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct BlockInterval {
    pub start: f64,
    pub end: f64,
}

impl BlockInterval {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// The blocks detected in one trial.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct BlockDetection {
    /// The block intervals, in chronological order.
    pub intervals: Vec<BlockInterval>,
    /// The activity threshold used for the detection.
    pub threshold: f64,
    /// The summed duration of all blocks (ms).
    pub total_duration: f64,
}

impl BlockDetection {
    /// Returns the number of detected blocks.
    pub fn event_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Returns the start of the first block, if any.
    pub fn first_start(&self) -> Option<f64> {
        self.intervals.first().map(|interval| interval.start)
    }

    pub fn starts(&self) -> Vec<f64> {
        self.intervals.iter().map(|interval| interval.start).collect()
    }

    pub fn ends(&self) -> Vec<f64> {
        self.intervals.iter().map(|interval| interval.end).collect()
    }
}

/// Parameters of the threshold scan over a convolved activity signal.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct BlockParams {
    /// The activity threshold: samples strictly below it are blocked.
    pub threshold: f64,
    /// The minimum block duration (ms).
    pub min_duration: f64,
    /// The duration ignored at the beginning of the signal (ms).
    pub exclude_start: f64,
    /// The simulated duration (ms); a block still running at the end of the signal is closed there.
    pub total_duration: f64,
    /// The sample width of the signal (ms).
    pub resolution: f64,
}

impl Default for BlockParams {
    fn default() -> Self {
        BlockParams {
            threshold: DEFAULT_BLOCK_THRESHOLD,
            min_duration: 100.0,
            exclude_start: 50.0,
            total_duration: crate::DEFAULT_TOTAL_DURATION,
            resolution: 1.0,
        }
    }
}

/// Returns the depolarization blocks of a convolved activity signal.
///
/// A block is a maximal run of samples below the threshold, delimited by its threshold crossings: it starts at the
/// last sample above the threshold and ends at its last sample below. The first `floor(exclude_start /
/// resolution)` samples are ignored, a run starting right after them starts there, and a run reaching the end of
/// the signal is closed at `total_duration`. Block ends are clipped to `total_duration` and blocks shorter than
/// `min_duration` are discarded.
pub fn detect_depolarization_blocks(signal: &ConvolvedSignal, params: &BlockParams) -> BlockDetection {
    let start_index = whole_samples(params.exclude_start, params.resolution);
    let values = &signal.values;

    let mut raw = vec![];
    let mut run_start: Option<usize> = None;
    for (i, value) in values.iter().enumerate().skip(start_index) {
        match (run_start, *value < params.threshold) {
            (None, true) => run_start = Some(i.saturating_sub(1).max(start_index)),
            (Some(start), false) => {
                raw.push((
                    start as f64 * params.resolution,
                    (i - 1) as f64 * params.resolution,
                ));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        raw.push((start as f64 * params.resolution, params.total_duration));
    }

    let intervals = raw
        .into_iter()
        .map(|(start, end)| BlockInterval {
            start,
            end: end.min(params.total_duration),
        })
        .filter(|interval| interval.duration() >= params.min_duration && interval.duration() > 0.0)
        .collect::<Vec<BlockInterval>>();

    let total_duration = intervals.iter().map(|interval| interval.duration()).sum();

    for interval in intervals.iter() {
        log::info!(
            "Depolarization block from {}ms to {}ms, duration: {}ms",
            interval.start,
            interval.end,
            interval.duration()
        );
    }
    log::info!("Total depolarization duration: {}ms", total_duration);

    BlockDetection {
        intervals,
        threshold: params.threshold,
        total_duration,
    }
}

/// The voltage condition of a sustained block.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum VoltageCondition {
    /// The voltage stays strictly above the threshold, e.g., a depolarized plateau.
    Above,
    /// The voltage stays strictly below the threshold.
    Below,
}

/// Returns the inclusive index ranges `(start, end)` where the voltage satisfies the condition for at least
/// `min_samples` consecutive samples.
pub fn find_sustained_blocks(
    voltage: &[f64],
    threshold: f64,
    min_samples: usize,
    condition: VoltageCondition,
) -> Vec<(usize, usize)> {
    let holds = |v: f64| match condition {
        VoltageCondition::Above => v > threshold,
        VoltageCondition::Below => v < threshold,
    };

    let mut blocks = vec![];
    let mut run_start: Option<usize> = None;
    for (i, v) in voltage.iter().enumerate() {
        match (run_start, holds(*v)) {
            (None, true) => run_start = Some(i),
            (Some(start), false) => {
                if i - start >= min_samples {
                    blocks.push((start, i - 1));
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        if voltage.len() - start >= min_samples {
            blocks.push((start, voltage.len() - 1));
        }
    }
    blocks
}

/// Returns the average somatic voltage trace of the population neurons present in the trial.
/// Neurons without a somatic trace are excluded; shorter traces only contribute to their own samples.
/// Returns `None` if no trace is available.
pub fn mean_voltage(trial: &Trial, range: &PopulationRange) -> Option<Vec<f64>> {
    let traces = trial
        .records
        .range(range.bounds())
        .filter_map(|(_, record)| record.soma_voltage.as_deref())
        .collect::<Vec<&[f64]>>();
    let max_len = traces.iter().map(|trace| trace.len()).max()?;

    let average = (0..max_len)
        .map(|i| {
            let column = traces
                .iter()
                .map(|trace| trace.get(i).copied().unwrap_or(f64::NAN))
                .collect::<Vec<f64>>();
            nan_mean(&column)
        })
        .collect();
    Some(average)
}
