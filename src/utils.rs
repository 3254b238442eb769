//! Small numerical helpers shared by the analysis modules.

/// Returns the arithmetic mean of the values, or NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Returns the population standard deviation (no Bessel correction) of the values, or NaN for an empty slice.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Returns the mean of the non-NaN values, or NaN if there are none.
pub fn nan_mean(values: &[f64]) -> f64 {
    let finite = values.iter().filter(|v| !v.is_nan()).copied().collect::<Vec<f64>>();
    mean(&finite)
}

/// Returns the population standard deviation of the non-NaN values, or NaN if there are none.
pub fn nan_std(values: &[f64]) -> f64 {
    let finite = values.iter().filter(|v| !v.is_nan()).copied().collect::<Vec<f64>>();
    std_dev(&finite)
}

/// Returns the number of samples of the half-open range `[start, stop)` with the given step,
/// i.e., `ceil((stop - start) / step)`, clamped at zero.
pub fn arange_len(start: f64, stop: f64, step: f64) -> usize {
    let n = ((stop - start) / step).ceil();
    if n.is_finite() && n > 0.0 {
        n as usize
    } else {
        0
    }
}

/// Returns the evenly spaced values `start + i * step` in the half-open range `[start, stop)`.
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    (0..arange_len(start, stop, step))
        .map(|i| start + i as f64 * step)
        .collect()
}

/// Converts a duration to a number of samples, tolerating floating point noise (e.g., 100 / 0.1).
pub fn num_samples(duration: f64, step: f64) -> usize {
    let n = (duration / step).round();
    if n.is_finite() && n > 0.0 {
        n as usize
    } else {
        0
    }
}

/// Returns the number of whole steps in a duration, i.e., `floor(duration / step)`, tolerating floating point
/// noise just below a whole number (e.g., 0.3 / 0.1).
pub fn whole_samples(duration: f64, step: f64) -> usize {
    let n = (duration / step + 1e-9).floor();
    if n.is_finite() && n > 0.0 {
        n as usize
    } else {
        0
    }
}
