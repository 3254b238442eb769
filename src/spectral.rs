//! Spectral analysis of the local field potential (LFP) proxy of the pyramidal population.
//!
//! Two distinct band power measures are provided and must not be confused:
//! - [`integrated_band_power`]: the mean power spectral density over the band times the bandwidth, used with the
//!   Welch estimate of [`compute_psd`];
//! - [`summed_band_power`]: the sum of the squared FFT magnitudes over the band bins, used with the raw FFT power
//!   spectrum of [`fft_power_spectrum`].
use num_complex::Complex;
use rustfft::{FftDirection, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::error::AnalysisError;
use crate::population::PopulationRange;
use crate::trial::Trial;
use crate::utils::{mean, num_samples};

/// A closed frequency band `[low, high]` (Hz).
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Band {
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub fn new(low: f64, high: f64) -> Result<Self, AnalysisError> {
        let band = Band { low, high };
        band.validate()?;
        Ok(band)
    }

    /// The theta band, 3 to 12 Hz.
    pub fn theta() -> Self {
        Band {
            low: 3.0,
            high: 12.0,
        }
    }

    /// The gamma band, 30 to 80 Hz.
    pub fn gamma() -> Self {
        Band {
            low: 30.0,
            high: 80.0,
        }
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.low >= 0.0 && self.low < self.high && self.high.is_finite()) {
            return Err(AnalysisError::InvalidParameter(format!(
                "Invalid frequency band [{}, {}]",
                self.low, self.high
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, frequency: f64) -> bool {
        frequency >= self.low && frequency <= self.high
    }
}

/// Returns the LFP proxy, i.e., the average difference between the apical and basal dendrite voltages over the
/// population neurons having both traces. Traces whose length differs from the first retained one are skipped.
/// Returns `None` if no neuron has both traces.
pub fn compute_lfp(trial: &Trial, range: &PopulationRange) -> Option<Vec<f64>> {
    let mut lfp: Option<Vec<f64>> = None;
    let mut count = 0;
    for (gid, record) in trial.records.range(range.bounds()) {
        let (Some(apical), Some(basal)) = (&record.apical_voltage, &record.basal_voltage) else {
            continue;
        };
        if apical.len() != basal.len() {
            log::warn!(
                "Trial {}: neuron {} has dendritic traces of different lengths ({} and {})",
                trial.id,
                gid,
                apical.len(),
                basal.len()
            );
            continue;
        }
        let sum = lfp.get_or_insert_with(|| vec![0.0; apical.len()]);
        if sum.len() != apical.len() {
            log::warn!(
                "Trial {}: neuron {} has traces of length {} instead of {}",
                trial.id,
                gid,
                apical.len(),
                sum.len()
            );
            continue;
        }
        for ((s, a), b) in sum.iter_mut().zip(apical.iter()).zip(basal.iter()) {
            *s += a - b;
        }
        count += 1;
    }
    lfp.filter(|_| count > 0)
        .map(|sum| sum.into_iter().map(|s| s / count as f64).collect())
}

/// A one-sided spectrum: the power at every frequency (Hz).
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct PowerSpectrum {
    pub frequencies: Vec<f64>,
    pub power: Vec<f64>,
}

impl PowerSpectrum {
    pub fn len(&self) -> usize {
        self.power.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_empty()
    }

    /// Returns the indices of the frequencies within the band.
    pub fn band_indices(&self, band: &Band) -> Vec<usize> {
        self.frequencies
            .iter()
            .enumerate()
            .filter(|(_, f)| band.contains(**f))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Returns the symmetric Hann window of the given length.
pub fn hann_window(len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (len - 1) as f64).cos())
        .collect()
}

/// Returns the forward FFT of a real signal.
fn real_fft(signal: &[f64]) -> Vec<Complex<f64>> {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft(signal.len(), FftDirection::Forward);
    let mut buffer = signal
        .iter()
        .map(|x| Complex::new(*x, 0.0))
        .collect::<Vec<Complex<f64>>>();
    fft.process(&mut buffer);
    buffer
}

/// Returns the one-sided power spectral density of the signal sampled at `fs` Hz, by Welch's method.
///
/// The signal is split into non-overlapping segments of `nfft` samples (zero-padded if shorter, trailing samples
/// dropped otherwise), each weighted by a Hann window. The segment periodograms are scaled to a density and
/// averaged. The frequencies are `k * fs / nfft` for `k = 0, ..., nfft / 2`.
pub fn welch_psd(signal: &[f64], fs: f64, nfft: usize) -> PowerSpectrum {
    if nfft == 0 || signal.is_empty() {
        return PowerSpectrum::default();
    }
    let mut padded = signal.to_vec();
    if padded.len() < nfft {
        padded.resize(nfft, 0.0);
    }

    let window = hann_window(nfft);
    let window_energy: f64 = window.iter().map(|w| w * w).sum();
    let num_freqs = nfft / 2 + 1;

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft(nfft, FftDirection::Forward);

    let num_segments = padded.len() / nfft;
    let mut power = vec![0.0; num_freqs];
    for segment in padded.chunks_exact(nfft) {
        let mut buffer = segment
            .iter()
            .zip(window.iter())
            .map(|(x, w)| Complex::new(x * w, 0.0))
            .collect::<Vec<Complex<f64>>>();
        fft.process(&mut buffer);
        power
            .iter_mut()
            .zip(buffer.iter())
            .for_each(|(p, x)| *p += x.norm_sqr());
    }

    // One-sided: double every bin but DC and, for an even length, Nyquist
    let last_doubled = if nfft % 2 == 0 { num_freqs - 1 } else { num_freqs };
    for (k, p) in power.iter_mut().enumerate() {
        if k > 0 && k < last_doubled {
            *p *= 2.0;
        }
        *p /= fs * window_energy * num_segments as f64;
    }

    PowerSpectrum {
        frequencies: (0..num_freqs).map(|k| k as f64 * fs / nfft as f64).collect(),
        power,
    }
}

/// Parameters of the PSD estimate of an LFP.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PsdParams {
    /// The sampling period of the LFP (ms).
    pub dt: f64,
    /// The discarded initial transient (ms).
    pub t0: f64,
    /// The highest frequency of interest (Hz), setting the decimation factor.
    pub fmax: f64,
    /// The Welch segment length.
    pub nfft: usize,
    pub theta: Band,
    pub gamma: Band,
}

impl Default for PsdParams {
    fn default() -> Self {
        PsdParams {
            dt: crate::DEFAULT_TIME_STEP,
            t0: 200.0,
            fmax: 200.0,
            nfft: 256,
            theta: Band::theta(),
            gamma: Band::gamma(),
        }
    }
}

impl PsdParams {
    /// Returns the decimation factor, i.e., `int(1000 / dt / (2 * fmax))`, at least one.
    pub fn decimation(&self) -> usize {
        let div = (1000.0 / self.dt / (2.0 * self.fmax) + 1e-9).floor();
        if div.is_finite() && div >= 1.0 {
            div as usize
        } else {
            1
        }
    }
}

/// The spectral signature of an LFP.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpectralSummary {
    /// The integrated theta power (mV^2).
    pub theta_power: f64,
    /// The integrated gamma power (mV^2).
    pub gamma_power: f64,
    /// The dominant theta frequency (Hz).
    pub theta_frequency: f64,
    /// The dominant gamma frequency (Hz).
    pub gamma_frequency: f64,
    pub spectrum: PowerSpectrum,
}

impl SpectralSummary {
    /// The all-zero summary of a signal too short to be analyzed.
    pub fn degenerate() -> Self {
        SpectralSummary {
            theta_power: 0.0,
            gamma_power: 0.0,
            theta_frequency: 0.0,
            gamma_frequency: 0.0,
            spectrum: PowerSpectrum::default(),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.spectrum.is_empty()
    }
}

/// Returns the mean power spectral density over the band, times the bandwidth. Zero if no frequency is in the band.
pub fn integrated_band_power(spectrum: &PowerSpectrum, band: &Band) -> f64 {
    let values = spectrum
        .band_indices(band)
        .into_iter()
        .map(|i| spectrum.power[i])
        .collect::<Vec<f64>>();
    if values.is_empty() {
        return 0.0;
    }
    mean(&values) * band.width()
}

/// Returns the frequency of maximal power within the band, if any frequency is in the band.
pub fn dominant_frequency(spectrum: &PowerSpectrum, band: &Band) -> Option<f64> {
    spectrum
        .band_indices(band)
        .into_iter()
        .max_by(|a, b| spectrum.power[*a].total_cmp(&spectrum.power[*b]))
        .map(|i| spectrum.frequencies[i])
}

/// Returns the spectral summary of the LFP sampled every `dt` ms: the first `t0` ms are discarded, the remainder
/// is decimated so that the Nyquist frequency covers `fmax`, mean-subtracted and fed to the Welch estimate.
/// A signal not longer than the discarded transient yields the degenerate summary.
pub fn compute_psd(lfp: &[f64], params: &PsdParams) -> SpectralSummary {
    let t0i = num_samples(params.t0, params.dt);
    if t0i >= lfp.len() {
        log::warn!(
            "LFP is too short for the spectral analysis: {} samples, {} discarded",
            lfp.len(),
            t0i
        );
        return SpectralSummary::degenerate();
    }

    let div = params.decimation();
    let data = lfp[t0i..].iter().step_by(div).copied().collect::<Vec<f64>>();
    let data_mean = mean(&data);
    let centered = data.iter().map(|x| x - data_mean).collect::<Vec<f64>>();
    let fs = 1000.0 / params.dt / div as f64;

    let spectrum = welch_psd(&centered, fs, params.nfft);

    SpectralSummary {
        theta_power: integrated_band_power(&spectrum, &params.theta),
        gamma_power: integrated_band_power(&spectrum, &params.gamma),
        theta_frequency: dominant_frequency(&spectrum, &params.theta).unwrap_or(0.0),
        gamma_frequency: dominant_frequency(&spectrum, &params.gamma).unwrap_or(0.0),
        spectrum,
    }
}

/// Returns the power spectrum `|X_k|^2` of the mean-subtracted LFP sampled every `dt` ms, at the positive
/// frequencies `k * fs / n` for `k = 1, ..., n / 2` (the DC bin is dropped).
pub fn fft_power_spectrum(lfp: &[f64], dt: f64) -> PowerSpectrum {
    if lfp.len() < 2 {
        return PowerSpectrum::default();
    }
    let n = lfp.len();
    let fs = 1000.0 / dt;
    let lfp_mean = mean(lfp);
    let centered = lfp.iter().map(|x| x - lfp_mean).collect::<Vec<f64>>();
    let transform = real_fft(&centered);

    let (frequencies, power) = (1..=n / 2)
        .map(|k| (k as f64 * fs / n as f64, transform[k].norm_sqr()))
        .unzip();
    PowerSpectrum { frequencies, power }
}

/// Returns the bin-wise average of spectra sharing the same frequencies.
pub fn average_power_spectra(spectra: &[PowerSpectrum]) -> Result<PowerSpectrum, AnalysisError> {
    let first = spectra.first().ok_or_else(|| {
        AnalysisError::InvalidParameter("Cannot average an empty set of spectra".to_string())
    })?;
    if spectra.iter().any(|spectrum| spectrum.len() != first.len()) {
        return Err(AnalysisError::InvalidParameter(
            "Cannot average spectra of different lengths".to_string(),
        ));
    }

    let power = (0..first.len())
        .map(|k| spectra.iter().map(|spectrum| spectrum.power[k]).sum::<f64>() / spectra.len() as f64)
        .collect();
    Ok(PowerSpectrum {
        frequencies: first.frequencies.clone(),
        power,
    })
}

/// Returns the sum of the power over the bins within the band.
pub fn summed_band_power(spectrum: &PowerSpectrum, band: &Band) -> f64 {
    spectrum
        .band_indices(band)
        .into_iter()
        .map(|i| spectrum.power[i])
        .sum()
}

/// The magnitude of a Fourier transform at the positive frequencies.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct MagnitudeSpectrum {
    pub frequencies: Vec<f64>,
    pub magnitude: Vec<f64>,
}

/// Returns the FFT magnitude of the signal sampled at `sampling_rate` Hz, at the strictly positive frequencies
/// below the Nyquist frequency.
pub fn fft_magnitude(signal: &[f64], sampling_rate: f64) -> MagnitudeSpectrum {
    let n = signal.len();
    if n < 2 {
        return MagnitudeSpectrum::default();
    }
    let transform = real_fft(signal);
    let (frequencies, magnitude) = (1..=(n - 1) / 2)
        .map(|k| (k as f64 * sampling_rate / n as f64, transform[k].norm()))
        .unzip();
    MagnitudeSpectrum {
        frequencies,
        magnitude,
    }
}

/// Returns the sample-wise average of the LFPs, truncated to the shortest one, or `None` if there are none.
pub fn average_lfp(lfps: &[Vec<f64>]) -> Option<Vec<f64>> {
    let len = lfps.iter().map(|lfp| lfp.len()).min()?;
    Some(
        (0..len)
            .map(|i| lfps.iter().map(|lfp| lfp[i]).sum::<f64>() / lfps.len() as f64)
            .collect(),
    )
}

/// Returns the average Welch spectrum of the non-degenerate summaries.
pub fn average_psd(summaries: &[SpectralSummary]) -> Result<PowerSpectrum, AnalysisError> {
    let spectra = summaries
        .iter()
        .filter(|summary| !summary.is_degenerate())
        .map(|summary| summary.spectrum.clone())
        .collect::<Vec<PowerSpectrum>>();
    average_power_spectra(&spectra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::NeuronRecord;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use std::collections::BTreeMap;

    const SEED: u64 = 42;

    /// A signal sampled every `dt` ms over `duration` ms, with sinusoids of the given frequencies (Hz) and amplitudes.
    fn sinusoids(components: &[(f64, f64)], dt: f64, duration: f64) -> Vec<f64> {
        (0..num_samples(duration, dt))
            .map(|i| {
                let t = i as f64 * dt / 1000.0;
                components
                    .iter()
                    .map(|(f, a)| a * (2.0 * PI * f * t).sin())
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_band() {
        let theta = Band::theta();
        assert!(theta.contains(3.0) && theta.contains(12.0));
        assert!(!theta.contains(12.5));
        assert_eq!(theta.width(), 9.0);
        assert!(Band::new(12.0, 3.0).is_err());
        assert!(Band::new(-1.0, 3.0).is_err());
    }

    #[test]
    fn test_compute_lfp() {
        let mut records = BTreeMap::new();
        records.insert(
            0,
            NeuronRecord {
                spike_times: vec![],
                soma_voltage: None,
                apical_voltage: Some(vec![1.0, 2.0, 3.0]),
                basal_voltage: Some(vec![0.0, 0.0, 1.0]),
            },
        );
        records.insert(
            1,
            NeuronRecord {
                spike_times: vec![],
                soma_voltage: None,
                apical_voltage: Some(vec![3.0, 2.0, 1.0]),
                basal_voltage: Some(vec![1.0, 0.0, 1.0]),
            },
        );
        // Missing basal trace, excluded rather than counted as zero
        records.insert(
            2,
            NeuronRecord {
                spike_times: vec![],
                soma_voltage: None,
                apical_voltage: Some(vec![100.0, 100.0, 100.0]),
                basal_voltage: None,
            },
        );
        // Mismatched length
        records.insert(
            3,
            NeuronRecord {
                spike_times: vec![],
                soma_voltage: None,
                apical_voltage: Some(vec![100.0]),
                basal_voltage: Some(vec![0.0]),
            },
        );
        let trial = Trial::new("00", records);
        let pyr = PopulationRange::new("Pyr", 0, 800).unwrap();
        assert_eq!(compute_lfp(&trial, &pyr), Some(vec![1.5, 2.0, 1.0]));

        let bwb = PopulationRange::new("Bwb", 800, 1000).unwrap();
        assert_eq!(compute_lfp(&trial, &bwb), None);
    }

    #[test]
    fn test_hann_window() {
        let window = hann_window(5);
        assert_eq!(window.len(), 5);
        assert_relative_eq!(window[0], 0.0);
        assert_relative_eq!(window[2], 1.0);
        assert_relative_eq!(window[1], 0.5, epsilon = 1e-12);
        assert_relative_eq!(window[4], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_welch_psd_white_noise() {
        let mut rng = StdRng::seed_from_u64(SEED);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let signal = (0..256 * 200).map(|_| normal.sample(&mut rng)).collect::<Vec<f64>>();

        let spectrum = welch_psd(&signal, 100.0, 256);
        assert_eq!(spectrum.len(), 129);
        assert_relative_eq!(spectrum.frequencies[128], 50.0);
        assert_relative_eq!(spectrum.frequencies[1], 100.0 / 256.0);

        // The one-sided density of a unit variance white noise is 2 / fs
        let interior = &spectrum.power[1..128];
        assert_relative_eq!(mean(interior), 0.02, max_relative = 0.05);
    }

    #[test]
    fn test_welch_psd_zero_padding() {
        let signal = sinusoids(&[(10.0, 1.0)], 10.0, 1000.0);
        assert_eq!(signal.len(), 100);
        let spectrum = welch_psd(&signal, 100.0, 256);
        assert_eq!(spectrum.len(), 129);
        let peak = dominant_frequency(&spectrum, &Band::new(0.0, 50.0).unwrap()).unwrap();
        assert!((peak - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_compute_psd() {
        let lfp = sinusoids(&[(8.0, 1.0), (40.0, 0.3)], 0.1, 5000.0);
        let summary = compute_psd(&lfp, &PsdParams::default());

        assert!(!summary.is_degenerate());
        assert_eq!(summary.spectrum.len(), 129);
        assert_relative_eq!(summary.spectrum.frequencies[128], 200.0);
        assert!((summary.theta_frequency - 8.0).abs() < 1.6);
        assert!((summary.gamma_frequency - 40.0).abs() < 1.6);
        assert!(summary.theta_power > summary.gamma_power);
        assert!(summary.gamma_power > 0.0);
    }

    #[test]
    fn test_compute_psd_degenerate() {
        // 100 samples at 0.1 ms span 10 ms only
        let lfp = vec![1.0; 100];
        let summary = compute_psd(&lfp, &PsdParams::default());
        assert_eq!(summary, SpectralSummary::degenerate());
        assert!(summary.is_degenerate());
        assert_eq!(summary.theta_power, 0.0);
        assert_eq!(summary.gamma_frequency, 0.0);

        assert!(compute_psd(&[], &PsdParams::default()).is_degenerate());
    }

    #[test]
    fn test_decimation() {
        assert_eq!(PsdParams::default().decimation(), 25);
        let params = PsdParams {
            fmax: 10_000.0,
            ..Default::default()
        };
        assert_eq!(params.decimation(), 1);
    }

    #[test]
    fn test_fft_power_spectrum() {
        // 50 Hz sampled at 1 kHz over one second
        let lfp = sinusoids(&[(50.0, 1.0)], 1.0, 1000.0);
        let spectrum = fft_power_spectrum(&lfp, 1.0);
        assert_eq!(spectrum.len(), 500);
        assert_relative_eq!(spectrum.frequencies[0], 1.0);

        let band = Band::new(45.0, 55.0).unwrap();
        assert_relative_eq!(dominant_frequency(&spectrum, &band).unwrap(), 50.0);
        assert_relative_eq!(summed_band_power(&spectrum, &band), 250_000.0, max_relative = 1e-6);
        assert!(summed_band_power(&spectrum, &Band::gamma()) > integrated_band_power(&spectrum, &Band::gamma()));

        let averaged = average_power_spectra(&[spectrum.clone(), spectrum.clone()]).unwrap();
        assert_eq!(averaged, spectrum);
        assert!(average_power_spectra(&[]).is_err());
        assert!(average_power_spectra(&[spectrum, PowerSpectrum::default()]).is_err());
    }

    #[test]
    fn test_fft_magnitude() {
        let signal = sinusoids(&[(100.0, 2.0)], 1.0, 1000.0);
        let spectrum = fft_magnitude(&signal, 1000.0);
        assert_eq!(spectrum.frequencies.len(), 499);
        let argmax = spectrum
            .magnitude
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_relative_eq!(spectrum.frequencies[argmax], 100.0);
        assert_relative_eq!(spectrum.magnitude[argmax], 1000.0, max_relative = 1e-6);
    }

    #[test]
    fn test_average_lfp_and_psd() {
        let lfps = vec![vec![1.0, 2.0, 3.0], vec![3.0, 4.0]];
        assert_eq!(average_lfp(&lfps), Some(vec![2.0, 3.0]));
        assert_eq!(average_lfp(&[]), None);

        let lfp = sinusoids(&[(8.0, 1.0)], 0.1, 3000.0);
        let summary = compute_psd(&lfp, &PsdParams::default());
        let average = average_psd(&[summary.clone(), SpectralSummary::degenerate()]).unwrap();
        assert_eq!(average, summary.spectrum);
        assert!(average_psd(&[SpectralSummary::degenerate()]).is_err());
    }
}
