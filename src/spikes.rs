//! Spike aggregation over populations, and simple spike train statistics.
//!
//! GIDs of a population that are absent from a trial are silently skipped: partial data never fails the
//! aggregation.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::population::PopulationRange;
use crate::trial::Trial;
use crate::utils::{arange_len, mean, std_dev};

/// Returns the concatenated spike times (ms) of all neurons of the population present in the trial.
/// The times are in GID order and, within a neuron, in recording order.
pub fn population_spike_times(trial: &Trial, range: &PopulationRange) -> Vec<f64> {
    trial
        .records
        .range(range.bounds())
        .flat_map(|(_, record)| record.spike_times.iter().copied())
        .collect()
}

/// Returns the spike times of every neuron of the population present in the trial, one slice per neuron.
pub fn population_spike_trains<'a>(trial: &'a Trial, range: &PopulationRange) -> Vec<&'a [f64]> {
    trial
        .records
        .range(range.bounds())
        .map(|(_, record)| record.spike_times.as_slice())
        .collect()
}

/// Returns the sorted spike times of every neuron of the population present in the trial, keyed by GID.
pub fn sorted_spike_times(trial: &Trial, range: &PopulationRange) -> BTreeMap<usize, Vec<f64>> {
    trial
        .records
        .range(range.bounds())
        .map(|(gid, record)| {
            let mut times = record.spike_times.clone();
            times.sort_by(|a, b| a.total_cmp(b));
            (*gid, times)
        })
        .collect()
}

/// Returns the interspike intervals of a sorted spike train.
pub fn interspike_intervals(times: &[f64]) -> Vec<f64> {
    times.windows(2).map(|ts| ts[1] - ts[0]).collect()
}

/// Interspike interval statistics of one neuron.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct IsiStats {
    pub mean: f64,
    pub std: f64,
    /// The coefficient of variation, i.e., std / mean.
    pub cv: f64,
}

/// Returns the interspike interval statistics of a sorted spike train.
/// All statistics are NaN when there are less than two spikes; the coefficient of variation is NaN when the mean
/// interval vanishes.
pub fn isi_stats(times: &[f64]) -> IsiStats {
    let isis = interspike_intervals(times);
    if isis.is_empty() {
        return IsiStats {
            mean: f64::NAN,
            std: f64::NAN,
            cv: f64::NAN,
        };
    }
    let mean = mean(&isis);
    let std = std_dev(&isis);
    let cv = if mean != 0.0 { std / mean } else { f64::NAN };
    IsiStats { mean, std, cv }
}

/// Returns the firing rate (Hz) of a spike train over a simulation of the given duration (ms) and time step (ms).
pub fn firing_rate(times: &[f64], duration: f64, dt: f64) -> f64 {
    let total_time = arange_len(0.0, duration, dt) as f64 * dt / 1000.0;
    if total_time <= 0.0 {
        return 0.0;
    }
    times.len() as f64 / total_time
}

/// Returns the mean and standard deviation of the firing rates (Hz) of the population neurons present in the trial.
/// Returns `(0.0, 0.0)` when no neuron of the population is present.
pub fn population_firing_rate(
    trial: &Trial,
    range: &PopulationRange,
    duration: f64,
    dt: f64,
) -> (f64, f64) {
    let rates = population_spike_trains(trial, range)
        .into_iter()
        .map(|times| firing_rate(times, duration, dt))
        .collect::<Vec<f64>>();
    if rates.is_empty() {
        return (0.0, 0.0);
    }
    (mean(&rates), std_dev(&rates))
}
