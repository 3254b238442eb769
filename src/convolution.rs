//! Conversion of discrete spike times into smoothed, continuous population activity signals.
//!
//! Two algorithms are provided:
//! - [`convolve_per_neuron`]: every neuron contributes a binary spike indicator series, smoothed by a normalized
//!   Gaussian window and summed over the population. The tail of the result is trimmed by the window length.
//! - [`convolve_pooled`]: the pooled population spike times are binned into a histogram which is then smoothed by
//!   a Gaussian filter. No trimming is applied.
//!
//! In both cases, the amplitude is a literal (smoothed) spike count, not a rate in Hz.
//!
//! # Examples
//!
//! ```rust
//! use ca1_analysis::convolution::convolve_per_neuron;
//!
//! let trains: Vec<&[f64]> = vec![&[100.0, 250.0][..], &[101.5][..]];
//! let signal = convolve_per_neuron(&trains, 1000.0, 150, 20.0, 1.0);
//!
//! assert_eq!(signal.len(), 850);
//! assert_eq!(signal.times[1], 1.0);
//! ```
use serde::{Deserialize, Serialize};

use crate::utils::{arange, num_samples};

/// Truncation of the Gaussian filter, in standard deviations.
pub const FILTER_TRUNCATE: f64 = 4.0;

/// A uniformly sampled time series, e.g., a smoothed population activity.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct ConvolvedSignal {
    /// The sample times (ms).
    pub times: Vec<f64>,
    /// The sample values.
    pub values: Vec<f64>,
}

impl ConvolvedSignal {
    /// Create a signal from its values, sampled every `resolution` ms from time 0.
    pub fn from_values(values: Vec<f64>, resolution: f64) -> Self {
        let times = (0..values.len()).map(|i| i as f64 * resolution).collect();
        ConvolvedSignal { times, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Returns the symmetric Gaussian window of the given length and standard deviation (in samples),
/// normalized to sum to one.
pub fn gaussian_window(window_size: usize, std: f64) -> Vec<f64> {
    let center = (window_size as f64 - 1.0) / 2.0;
    let window = (0..window_size)
        .map(|i| {
            let n = i as f64 - center;
            (-n * n / (2.0 * std * std)).exp()
        })
        .collect::<Vec<f64>>();
    let total: f64 = window.iter().sum();
    if total > 0.0 {
        window.iter().map(|w| w / total).collect()
    } else {
        window
    }
}

/// Returns the index of the sample containing the spike time, clipped into `[0, num_samples - 1]`.
fn clipped_index(time: f64, num_samples: usize, resolution: f64) -> usize {
    let index = (time / resolution).trunc();
    if index <= 0.0 || index.is_nan() {
        0
    } else {
        (index as usize).min(num_samples - 1)
    }
}

/// Returns the binary indicator series of a spike train over `num_samples` samples of width `resolution` ms.
/// Spike times out of range are clipped into the first or last sample.
pub fn binary_time_series(times: &[f64], num_samples: usize, resolution: f64) -> Vec<f64> {
    let mut series = vec![0.0; num_samples];
    if num_samples == 0 {
        return series;
    }
    for time in times {
        series[clipped_index(*time, num_samples, resolution)] = 1.0;
    }
    series
}

/// Convolve `series` with `window` (centered, same length as the series) and only keep the first `keep` samples.
fn convolve_same_head(series: &[f64], window: &[f64], keep: usize) -> Vec<f64> {
    let mut out = vec![0.0; keep];
    if window.is_empty() {
        return out;
    }
    let offset = (window.len() - 1) / 2;
    for (s, &count) in series.iter().enumerate().filter(|(_, c)| **c != 0.0) {
        // out[i] receives window[i + offset - s] for 0 <= i + offset - s < window.len()
        let lo = s.saturating_sub(offset);
        let hi = (s + window.len() - offset).min(keep);
        for i in lo..hi {
            out[i] += count * window[i + offset - s];
        }
    }
    out
}

/// Returns the population signal obtained by smoothing every neuron binary spike series with a normalized Gaussian
/// window and summing the results. The total duration (ms) is split into samples of `resolution` ms and the last
/// `window_size` samples are trimmed to remove the convolution edge effect.
pub fn convolve_per_neuron(
    trains: &[&[f64]],
    total_duration: f64,
    window_size: usize,
    std: f64,
    resolution: f64,
) -> ConvolvedSignal {
    let n = num_samples(total_duration, resolution);
    let keep = n.saturating_sub(window_size);

    // Convolution is linear: summing the binary series first yields the sum of the per-neuron convolutions.
    let mut counts = vec![0.0; n];
    for times in trains {
        let series = binary_time_series(times, n, resolution);
        counts.iter_mut().zip(series).for_each(|(c, s)| *c += s);
    }

    let window = gaussian_window(window_size, std);
    ConvolvedSignal::from_values(convolve_same_head(&counts, &window, keep), resolution)
}

/// Returns uniform bin edges `start, start + step, ...` strictly below `stop`.
pub fn uniform_bin_edges(start: f64, stop: f64, step: f64) -> Vec<f64> {
    arange(start, stop, step)
}

/// Returns the number of times falling into each bin of the sorted edges.
/// Every bin is half-open `[e_i, e_{i+1})`, except the last one which also includes its right edge.
pub fn histogram(times: &[f64], edges: &[f64]) -> Vec<f64> {
    if edges.len() < 2 {
        return vec![];
    }
    let num_bins = edges.len() - 1;
    let (first, last) = (edges[0], edges[num_bins]);
    let mut counts = vec![0.0; num_bins];
    for &time in times {
        if time < first || time > last || time.is_nan() {
            continue;
        }
        let index = if time == last {
            num_bins - 1
        } else {
            edges.partition_point(|edge| *edge <= time) - 1
        };
        counts[index] += 1.0;
    }
    counts
}

/// Reflect an out-of-range index about the array edges, i.e., `(d c b a | a b c d | d c b a)`.
fn reflect_index(index: isize, len: usize) -> usize {
    let period = 2 * len as isize;
    let m = index.rem_euclid(period);
    if m < len as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Returns the values smoothed by a Gaussian filter of standard deviation `sigma` (in samples).
/// The kernel is truncated at four standard deviations and the input is reflected at its edges.
pub fn gaussian_filter1d(values: &[f64], sigma: f64) -> Vec<f64> {
    if values.is_empty() || !(sigma > 0.0) {
        return values.to_vec();
    }
    let radius = (FILTER_TRUNCATE * sigma + 0.5) as isize;
    let kernel = gaussian_window(2 * radius as usize + 1, sigma);

    (0..values.len() as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * values[reflect_index(i + k as isize - radius, values.len())])
                .sum()
        })
        .collect()
}

/// Returns the pooled population signal: the spike times are binned over the provided edges and the histogram is
/// smoothed by a Gaussian filter of standard deviation `sigma` ms (i.e., `sigma / resolution` bins).
/// The signal has one sample per bin, timed by the left bin edge.
pub fn convolve_pooled(times: &[f64], edges: &[f64], sigma: f64, resolution: f64) -> ConvolvedSignal {
    if edges.len() < 2 {
        return ConvolvedSignal::default();
    }
    let counts = histogram(times, edges);
    ConvolvedSignal {
        times: edges[..edges.len() - 1].to_vec(),
        values: gaussian_filter1d(&counts, sigma / resolution),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SEED: u64 = 42;

    #[test]
    fn test_gaussian_window() {
        let window = gaussian_window(150, 20.0);
        assert_eq!(window.len(), 150);
        assert_relative_eq!(window.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        // Symmetric
        assert!((0..75).all(|i| (window[i] - window[149 - i]).abs() < 1e-15));
        // Maximal at the center
        assert!(window[74] > window[0]);

        let window = gaussian_window(3, 1.0);
        assert_relative_eq!(window[0] / window[1], (-0.5_f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_binary_time_series() {
        let series = binary_time_series(&[0.4, 2.0, 2.7, 9.0, 15.0, -3.0], 10, 1.0);
        assert_eq!(
            series,
            vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]
        );

        let series = binary_time_series(&[1.2], 4, 0.5);
        assert_eq!(series, vec![0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_convolve_per_neuron_empty() {
        let signal = convolve_per_neuron(&[], 5000.0, 150, 20.0, 1.0);
        assert_eq!(signal.len(), 4850);
        assert!(signal.values.iter().all(|v| *v == 0.0));

        let trains: Vec<&[f64]> = vec![&[][..], &[][..]];
        let signal = convolve_per_neuron(&trains, 5000.0, 150, 20.0, 1.0);
        assert_eq!(signal.len(), 4850);
        assert!(signal.values.iter().all(|v| *v == 0.0));

        // Shorter than the window
        let signal = convolve_per_neuron(&trains, 100.0, 150, 20.0, 1.0);
        assert!(signal.is_empty());
    }

    #[test]
    fn test_convolve_per_neuron_matches_direct_convolution() {
        let mut rng = StdRng::seed_from_u64(SEED);
        let trains_owned = (0..5)
            .map(|_| {
                (0..20)
                    .map(|_| rng.gen_range(0.0..300.0))
                    .collect::<Vec<f64>>()
            })
            .collect::<Vec<Vec<f64>>>();
        let trains = trains_owned.iter().map(|t| t.as_slice()).collect::<Vec<&[f64]>>();

        let window_size = 31;
        let signal = convolve_per_neuron(&trains, 300.0, window_size, 5.0, 1.0);
        assert_eq!(signal.len(), 300 - window_size);

        // Direct per-neuron convolution then sum
        let window = gaussian_window(window_size, 5.0);
        let offset = (window_size - 1) / 2;
        let mut expected = vec![0.0; 300 - window_size];
        for times in trains.iter() {
            let series = binary_time_series(times, 300, 1.0);
            for i in 0..expected.len() {
                for (k, w) in window.iter().enumerate() {
                    let j = i as isize + offset as isize - k as isize;
                    if j >= 0 && (j as usize) < series.len() {
                        expected[i] += series[j as usize] * w;
                    }
                }
            }
        }
        for (a, b) in signal.values.iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_convolve_per_neuron_resolution() {
        let trains: Vec<&[f64]> = vec![&[50.0][..]];
        let signal = convolve_per_neuron(&trains, 100.0, 20, 4.0, 0.5);
        assert_eq!(signal.len(), 180);
        assert_relative_eq!(signal.times[2], 1.0);
        // The spike falls into sample 100, the peak sits at the center of the window
        let argmax = signal
            .values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((99..=101).contains(&argmax));
        assert_relative_eq!(signal.values.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_histogram() {
        let edges = vec![0.0, 1.0, 2.0, 3.0];
        let counts = histogram(&[0.0, 0.5, 1.0, 2.999, 3.0, 3.5, -0.1], &edges);
        assert_eq!(counts, vec![2.0, 1.0, 2.0]);
        assert!(histogram(&[1.0], &[0.0]).is_empty());
    }

    #[test]
    fn test_gaussian_filter1d() {
        // Mass is preserved by the reflection at the edges
        let values = vec![0.0, 0.0, 3.0, 0.0, 0.0, 1.0, 0.0];
        let filtered = gaussian_filter1d(&values, 1.0);
        assert_eq!(filtered.len(), values.len());
        assert_relative_eq!(filtered.iter().sum::<f64>(), 4.0, epsilon = 1e-9);
        assert!(filtered[2] > filtered[1] && filtered[2] > filtered[3]);

        // Constant signals are left unchanged
        let filtered = gaussian_filter1d(&[2.0; 5], 3.0);
        assert!(filtered.iter().all(|v| (v - 2.0).abs() < 1e-12));

        // No smoothing
        assert_eq!(gaussian_filter1d(&values, 0.0), values);
    }

    #[test]
    fn test_convolve_pooled() {
        let edges = uniform_bin_edges(800.0, 1200.5, 0.5);
        let signal = convolve_pooled(&[900.0, 900.2, 1000.0], &edges, 2.0, 0.5);
        assert_eq!(signal.len(), edges.len() - 1);
        assert_eq!(signal.times[0], 800.0);
        assert_relative_eq!(signal.values.iter().sum::<f64>(), 3.0, epsilon = 1e-9);

        assert!(convolve_pooled(&[1.0], &[0.0], 1.0, 1.0).is_empty());
    }
}
