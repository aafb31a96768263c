//! Windowed motion features for regime characterization (rest / grinding / clenching).
//!
//! All features are pure, stateless reductions over a fixed-size window of calibrated field
//! vectors plus the matching vertical positions; there is no cross-window state, so windows can
//! be processed independently (and concurrently) of each other.
//!
//! Units follow the sensor domain: field magnitude in µT, lateral variance in µT², spectral
//! power as a scaled one-sided power-spectral-density sum over the grinding band, and the field
//! gradient in µT/mm. The discriminative signal this module exists to produce is the
//! grinding-band (1-2 Hz) spectral power of the lateral Bx axis, which rises sharply during
//! rhythmic grinding and stays near the noise floor at rest and during clenching.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TESLA_TO_MICROTESLA: f64 = 1e6;
/// Scale applied to PSD sums and variances (T² → µT²) so the features are readable numbers.
const TESLA_SQUARED_SCALE: f64 = 1e12;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("feature window is empty")]
    EmptyWindow,
    #[error("window length mismatch: {fields} field vectors vs {positions} z positions")]
    LengthMismatch { fields: usize, positions: usize },
}

/// Sampling and band configuration for feature extraction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Sample rate of the field time series in Hz.
    pub sample_rate_hz: f64,
    /// Lower edge of the spectral band of interest (Hz), inclusive.
    pub band_low_hz: f64,
    /// Upper edge of the spectral band of interest (Hz), inclusive.
    pub band_high_hz: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        // Bruxism grinding shows up at 1-2 Hz.
        FeatureConfig {
            sample_rate_hz: 50.0,
            band_low_hz: 1.0,
            band_high_hz: 2.0,
        }
    }
}

/// Scalar features of one window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WindowFeatures {
    /// Mean Euclidean field norm over the window, in µT.
    pub field_magnitude: f64,
    /// Mean of the Bx/By population variances, in µT².
    pub lateral_variance: f64,
    /// One-sided Welch PSD of Bx summed over the configured band (scaled to µT² terms).
    pub spectral_power: f64,
    /// Mean numerical derivative of Bx with respect to z, in µT/mm.
    pub dbx_dz: f64,
}

/// Reduce one window of calibrated field vectors and matching z positions to scalar features.
pub fn extract(
    fields: &[Vector3<f64>],
    z_positions: &[f64],
    config: &FeatureConfig,
) -> Result<WindowFeatures, FeatureError> {
    if fields.is_empty() {
        return Err(FeatureError::EmptyWindow);
    }
    if fields.len() != z_positions.len() {
        return Err(FeatureError::LengthMismatch {
            fields: fields.len(),
            positions: z_positions.len(),
        });
    }

    let field_magnitude = fields.iter().map(|b| b.norm()).sum::<f64>() / fields.len() as f64
        * TESLA_TO_MICROTESLA;

    let variance_x = population_variance(fields.iter().map(|b| b.x));
    let variance_y = population_variance(fields.iter().map(|b| b.y));
    let lateral_variance = 0.5 * (variance_x + variance_y) * TESLA_SQUARED_SCALE;

    let bx: Vec<f64> = fields.iter().map(|b| b.x).collect();
    let spectral_power = welch_band_power(
        &bx,
        config.sample_rate_hz,
        config.band_low_hz,
        config.band_high_hz,
    ) * TESLA_SQUARED_SCALE;

    let dbx_dz = mean_gradient(
        &fields
            .iter()
            .map(|b| b.x * TESLA_TO_MICROTESLA)
            .collect::<Vec<f64>>(),
        &z_positions.iter().map(|z| z * 1000.0).collect::<Vec<f64>>(),
    );

    Ok(WindowFeatures {
        field_magnitude,
        lateral_variance,
        spectral_power,
        dbx_dz,
    })
}

fn population_variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let count = values.clone().count() as f64;
    let mean = values.clone().sum::<f64>() / count;
    values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / count
}

/// One-sided Welch power spectral density of a real signal, in signal-units²/Hz.
///
/// The segment length equals the window size, so the estimate degenerates to a single
/// mean-detrended, Hann-windowed periodogram (scipy's `welch` with `nperseg = len(signal)`).
/// The window is short (tens of samples), so a direct DFT is used; no FFT dependency.
///
/// Returns `(frequencies, psd)` with `len/2 + 1` one-sided bins spaced `sample_rate / len` Hz.
pub fn welch_psd(signal: &[f64], sample_rate: f64) -> (Vec<f64>, Vec<f64>) {
    let n = signal.len();
    if n == 0 || sample_rate <= 0.0 {
        return (Vec::new(), Vec::new());
    }

    // Periodic Hann window and constant detrend.
    let mean = signal.iter().sum::<f64>() / n as f64;
    let two_pi = 2.0 * std::f64::consts::PI;
    let window: Vec<f64> = (0..n)
        .map(|i| 0.5 * (1.0 - (two_pi * i as f64 / n as f64).cos()))
        .collect();
    let tapered: Vec<f64> = signal
        .iter()
        .zip(&window)
        .map(|(value, w)| (value - mean) * w)
        .collect();
    let window_power: f64 = window.iter().map(|w| w * w).sum();

    let bins = n / 2 + 1;
    let mut frequencies = Vec::with_capacity(bins);
    let mut psd = Vec::with_capacity(bins);
    for k in 0..bins {
        let mut real = 0.0;
        let mut imaginary = 0.0;
        for (i, value) in tapered.iter().enumerate() {
            let phase = two_pi * k as f64 * i as f64 / n as f64;
            real += value * phase.cos();
            imaginary -= value * phase.sin();
        }
        let mut power = (real * real + imaginary * imaginary) / (sample_rate * window_power);
        // One-sided spectrum: double everything except DC and (for even n) Nyquist.
        let is_nyquist = n % 2 == 0 && k == n / 2;
        if k != 0 && !is_nyquist {
            power *= 2.0;
        }
        frequencies.push(k as f64 * sample_rate / n as f64);
        psd.push(power);
    }
    (frequencies, psd)
}

/// Sum of the Welch PSD over the inclusive frequency band `[low, high]` Hz.
pub fn welch_band_power(signal: &[f64], sample_rate: f64, low: f64, high: f64) -> f64 {
    let (frequencies, psd) = welch_psd(signal, sample_rate);
    frequencies
        .iter()
        .zip(&psd)
        .filter(|(f, _)| **f >= low && **f <= high)
        .map(|(_, p)| *p)
        .sum()
}

/// Mean central-difference derivative of `values` with respect to `coordinates`.
///
/// Endpoints use one-sided differences. Samples whose coordinate spacing is (numerically) zero
/// carry no gradient information and are skipped explicitly rather than dividing toward
/// infinity; an all-degenerate window yields 0.
fn mean_gradient(values: &[f64], coordinates: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut used = 0usize;
    for i in 0..n {
        let (dv, dc) = if i == 0 {
            (values[1] - values[0], coordinates[1] - coordinates[0])
        } else if i == n - 1 {
            (
                values[n - 1] - values[n - 2],
                coordinates[n - 1] - coordinates[n - 2],
            )
        } else {
            (
                values[i + 1] - values[i - 1],
                coordinates[i + 1] - coordinates[i - 1],
            )
        };
        if dc.abs() < 1e-12 {
            continue;
        }
        sum += dv / dc;
        used += 1;
    }
    if used == 0 { 0.0 } else { sum / used as f64 }
}
