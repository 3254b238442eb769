//! Burst detection in a convolved activity signal, classification of the bursts relative to a reference time,
//! and alignment of signal segments across trials.
use serde::{Deserialize, Serialize};

use crate::convolution::ConvolvedSignal;
use crate::utils::{nan_mean, nan_std};

/// The minimum span of a burst, in samples between its first and last index.
pub const MIN_BURST_SPAN: usize = 3;

/// A burst, i.e., a maximal run of samples above the burst threshold.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct BurstInterval {
    /// The index of the first sample above the threshold.
    pub start_index: usize,
    /// The index of the last sample above the threshold.
    pub end_index: usize,
    /// The time of the first sample (ms).
    pub start_time: f64,
    /// The time of the last sample (ms).
    pub end_time: f64,
    /// The maximum of the signal over the burst.
    pub peak: f64,
}

/// Returns the bursts of the signal, i.e., the maximal runs of samples strictly above the threshold spanning at
/// least [`MIN_BURST_SPAN`] samples. Runs touching either end of the signal are kept.
pub fn detect_bursts(signal: &ConvolvedSignal, threshold: f64) -> Vec<BurstInterval> {
    let values = &signal.values;
    let mut runs = vec![];
    let mut run_start: Option<usize> = None;
    for (i, value) in values.iter().enumerate() {
        match (run_start, *value > threshold) {
            (None, true) => run_start = Some(i),
            (Some(start), false) => {
                runs.push((start, i - 1));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        runs.push((start, values.len() - 1));
    }

    runs.into_iter()
        .filter(|(start, end)| end - start >= MIN_BURST_SPAN)
        .map(|(start, end)| BurstInterval {
            start_index: start,
            end_index: end,
            start_time: signal.times[start],
            end_time: signal.times[end],
            peak: values[start..=end]
                .iter()
                .fold(f64::NEG_INFINITY, |acc, v| acc.max(*v)),
        })
        .collect()
}

/// The bursts surrounding a reference time, typically the block onset.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct BurstClassification {
    /// The last burst starting before the reference time.
    pub last_before: Option<BurstInterval>,
    /// The burst preceding the last one before the reference time.
    pub second_last_before: Option<BurstInterval>,
    /// The first burst starting after the reference time.
    pub first_after: Option<BurstInterval>,
}

/// Classify chronologically ordered bursts relative to the reference time.
/// A burst starting exactly at the reference time is neither before nor after it. Bursts following the first one
/// after the reference time are not considered.
pub fn classify_bursts(bursts: &[BurstInterval], reference: f64) -> BurstClassification {
    let mut classification = BurstClassification::default();
    for burst in bursts {
        if burst.start_time < reference {
            classification.second_last_before = classification.last_before.take();
            classification.last_before = Some(*burst);
        } else if burst.start_time > reference {
            classification.first_after = Some(*burst);
            break;
        }
    }
    classification
}

/// A signal segment whose time axis is shifted so that the reference event sits at time 0.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct AlignedSegment {
    pub times: Vec<f64>,
    pub values: Vec<f64>,
}

impl AlignedSegment {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Returns the samples of the signal within `[window_start, window_end]`, with times relative to `reference`.
pub fn extract_segment(
    signal: &ConvolvedSignal,
    window_start: f64,
    window_end: f64,
    reference: f64,
) -> AlignedSegment {
    let (times, values) = signal
        .times
        .iter()
        .zip(signal.values.iter())
        .filter(|(t, _)| **t >= window_start && **t <= window_end)
        .map(|(t, v)| (t - reference, *v))
        .unzip();
    AlignedSegment { times, values }
}

/// The element-wise statistics of aligned segments.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AlignedAverage {
    /// The time axis of the longest segment.
    pub times: Vec<f64>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    /// The number of averaged segments.
    pub num_segments: usize,
}

/// Returns the element-wise mean and standard deviation of the segments, or `None` if there are none.
/// Shorter segments are padded with NaN, which are ignored by the reduction.
pub fn average_segments(segments: &[AlignedSegment]) -> Option<AlignedAverage> {
    let longest = segments.iter().max_by_key(|segment| segment.len())?;

    let (mean, std) = (0..longest.len())
        .map(|i| {
            let column = segments
                .iter()
                .map(|segment| segment.values.get(i).copied().unwrap_or(f64::NAN))
                .collect::<Vec<f64>>();
            (nan_mean(&column), nan_std(&column))
        })
        .unzip();

    Some(AlignedAverage {
        times: longest.times.clone(),
        mean,
        std,
        num_segments: segments.len(),
    })
}
