//! Synthetic jaw-motion scenarios and offline validation utilities.
//!
//! This module provides:
//! - The reference three-phase jaw trajectory (rest, grinding, clenching) used to validate the
//!   inversion pipeline end to end
//! - Field synthesis from the forward model and seeded Gaussian sensor-noise injection
//! - A warm-started tracking run over a whole field series with MSE/MAE accuracy metrics
//! - Trace export: a JSON array-of-records bundle for replay tooling and a CSV position series
//!
//! The scenario mirrors the documented motion envelope: rest 0-5 s (slow lateral ±2 mm at
//! z = 10-12 mm), grinding 5-10 s (1.5 Hz lateral ±5 mm at z = 8-10 mm), clenching 10-15 s
//! (lateral ±1 mm at z = 5-6 mm), sampled at 50 Hz.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::TrackerConfig;
use crate::field::cuboid_field;
use crate::solver;

/// Scenario timing and noise parameters. The defaults reproduce the reference 15 s / 50 Hz
/// validation run with HMC5883L-class noise (0.2 µT).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ScenarioOptions {
    pub duration_s: f64,
    pub sample_rate_hz: f64,
    /// Per-axis Gaussian field noise standard deviation in tesla.
    pub noise_sigma_t: f64,
    pub seed: u64,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        ScenarioOptions {
            duration_s: 15.0,
            sample_rate_hz: 50.0,
            noise_sigma_t: 2e-7,
            seed: 42,
        }
    }
}

/// Phase boundaries of the reference scenario, in seconds.
pub const REST_END_S: f64 = 5.0;
pub const GRINDING_END_S: f64 = 10.0;
/// Grinding oscillation frequency in Hz, the center of the 1-2 Hz bruxism band.
pub const GRINDING_FREQUENCY_HZ: f64 = 1.5;

/// True magnet position at scenario time `t` (seconds), in meters.
///
/// Piecewise: slow lateral wander at jaw-open heights, then fast rhythmic grinding, then
/// near-still clenching close to the sensor.
pub fn jaw_position(t: f64) -> Vector3<f64> {
    use std::f64::consts::PI;
    if t < REST_END_S {
        Vector3::new(
            0.002 * (0.5 * t).sin(),
            0.002 * (0.5 * t).cos(),
            0.010 + 0.002 * (0.5 * t).sin(),
        )
    } else if t < GRINDING_END_S {
        Vector3::new(
            0.005 * (GRINDING_FREQUENCY_HZ * 2.0 * PI * t).sin(),
            0.005 * (GRINDING_FREQUENCY_HZ * 2.0 * PI * t).cos(),
            0.008 + 0.002 * (2.0 * PI * t).sin(),
        )
    } else {
        Vector3::new(
            0.001 * (0.5 * t).sin(),
            0.001 * (0.5 * t).cos(),
            0.005 + 0.001 * (0.5 * t).sin(),
        )
    }
}

/// Sample times and true positions for the scenario.
pub fn jaw_trajectory(options: &ScenarioOptions) -> (Vec<f64>, Vec<Vector3<f64>>) {
    let count = (options.duration_s * options.sample_rate_hz).round() as usize;
    let times: Vec<f64> = (0..count)
        .map(|i| {
            if count > 1 {
                options.duration_s * i as f64 / (count - 1) as f64
            } else {
                0.0
            }
        })
        .collect();
    let positions = times.iter().map(|t| jaw_position(*t)).collect();
    (times, positions)
}

/// Evaluate the forward model along a position series.
pub fn synthesize_fields(config: &TrackerConfig, positions: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    positions
        .iter()
        .map(|position| cuboid_field(&config.magnet, position, &config.sensor_position))
        .collect()
}

/// Add independent per-axis Gaussian noise to a field series, seeded for reproducibility.
pub fn add_field_noise(fields: &[Vector3<f64>], sigma_t: f64, seed: u64) -> Vec<Vector3<f64>> {
    if !sigma_t.is_finite() || sigma_t <= 0.0 {
        return fields.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sigma_t).expect("sigma checked positive and finite");
    fields
        .iter()
        .map(|field| {
            field
                + Vector3::new(
                    normal.sample(&mut rng),
                    normal.sample(&mut rng),
                    normal.sample(&mut rng),
                )
        })
        .collect()
}

/// Warm-started tracking run over a field series.
pub struct TrackingRun {
    pub estimates: Vec<Vector3<f64>>,
    /// Indices of samples whose solve exhausted its budget.
    pub unconverged: Vec<usize>,
}

/// Solve every sample in sequence, seeding each solve from the previous estimate (the first
/// from `config.initial_guess`). Non-convergence is recorded, never fatal.
pub fn track_trajectory(config: &TrackerConfig, fields: &[Vector3<f64>]) -> TrackingRun {
    let mut estimates = Vec::with_capacity(fields.len());
    let mut unconverged = Vec::new();
    let mut seed = config.initial_guess;
    for (index, measured) in fields.iter().enumerate() {
        let solution = solver::solve_position(
            measured,
            &config.magnet,
            &config.sensor_position,
            &seed,
            &config.solver,
        );
        if !solution.converged {
            unconverged.push(index);
        }
        seed = solution.position;
        estimates.push(solution.position);
    }
    TrackingRun {
        estimates,
        unconverged,
    }
}

/// Complete synthetic scenario run: truth, noisy measurements, estimates, and accuracy metrics.
pub struct ScenarioResult {
    pub times: Vec<f64>,
    pub true_positions: Vec<Vector3<f64>>,
    pub noisy_fields: Vec<Vector3<f64>>,
    pub estimates: Vec<Vector3<f64>>,
    /// Mean squared position error over all axes, in mm².
    pub mse_mm2: f64,
    /// Mean absolute position error over all axes, in mm.
    pub mae_mm: f64,
}

/// Synthesize, corrupt, and track the reference scenario.
pub fn run_scenario(config: &TrackerConfig, options: &ScenarioOptions) -> ScenarioResult {
    let (times, true_positions) = jaw_trajectory(options);
    let clean_fields = synthesize_fields(config, &true_positions);
    let noisy_fields = add_field_noise(&clean_fields, options.noise_sigma_t, options.seed);
    let run = track_trajectory(config, &noisy_fields);

    let count = (3 * true_positions.len()) as f64;
    let mut squared_sum = 0.0;
    let mut absolute_sum = 0.0;
    for (truth, estimate) in true_positions.iter().zip(&run.estimates) {
        for axis in 0..3 {
            let error = estimate[axis] - truth[axis];
            squared_sum += error * error;
            absolute_sum += error.abs();
        }
    }
    ScenarioResult {
        times,
        true_positions,
        noisy_fields,
        estimates: run.estimates,
        mse_mm2: squared_sum / count * 1e6,
        mae_mm: absolute_sum / count * 1e3,
    }
}

/// One timestep of an exported session trace.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub t: f64,
    pub true_position: [f64; 3],
    pub estimated_position: [f64; 3],
    pub calibrated_field: [f64; 3],
    /// Field magnitude in µT.
    pub field_magnitude: f64,
    /// dBx/dz in µT/mm.
    #[serde(rename = "dBxdz")]
    pub dbx_dz: f64,
}

/// Serializable validation trace: array of per-timestep records plus replay metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationTrace {
    pub records: Vec<TraceRecord>,
    /// Number of samples in the source run (before any downsampling by replay tooling).
    pub original_length: usize,
    /// Recommended playback interval in milliseconds.
    pub playback_rate: u32,
}

impl SimulationTrace {
    /// Recommended replay interval for the exported trace.
    pub const DEFAULT_PLAYBACK_RATE_MS: u32 = 100;

    pub fn from_scenario(result: &ScenarioResult) -> SimulationTrace {
        let bx_microtesla: Vec<f64> = result.noisy_fields.iter().map(|b| b.x * 1e6).collect();
        let z_millimeters: Vec<f64> = result.true_positions.iter().map(|p| p.z * 1e3).collect();
        let gradient = gradient_series(&bx_microtesla, &z_millimeters);

        let records = result
            .times
            .iter()
            .enumerate()
            .map(|(i, t)| TraceRecord {
                t: *t,
                true_position: result.true_positions[i].into(),
                estimated_position: result.estimates[i].into(),
                calibrated_field: result.noisy_fields[i].into(),
                field_magnitude: result.noisy_fields[i].norm() * 1e6,
                dbx_dz: gradient[i],
            })
            .collect();
        SimulationTrace {
            records,
            original_length: result.times.len(),
            playback_rate: SimulationTrace::DEFAULT_PLAYBACK_RATE_MS,
        }
    }

    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<(), io::Error> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self).map_err(io::Error::other)
    }
}

/// Central-difference derivative series of `values` with respect to `coordinates`, with the
/// same zero-spacing guard as the windowed feature (degenerate samples yield 0).
fn gradient_series(values: &[f64], coordinates: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut gradient = vec![0.0; n];
    if n < 2 {
        return gradient;
    }
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
        if dc.abs() >= 1e-12 {
            gradient[i] = dv / dc;
        }
    }
    gradient
}

/// Flat CSV row of the tracked series, for plotting and spreadsheet analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub t: f64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_z: f64,
    pub est_x: f64,
    pub est_y: f64,
    pub est_z: f64,
    pub bx: f64,
    pub by: f64,
    pub bz: f64,
}

/// Write the scenario series to CSV, one row per sample.
pub fn series_to_csv<P: AsRef<Path>>(result: &ScenarioResult, path: P) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(io::Error::other)?;
    for (i, t) in result.times.iter().enumerate() {
        let record = SeriesRecord {
            t: *t,
            true_x: result.true_positions[i].x,
            true_y: result.true_positions[i].y,
            true_z: result.true_positions[i].z,
            est_x: result.estimates[i].x,
            est_y: result.estimates[i].y,
            est_z: result.estimates[i].z,
            bx: result.noisy_fields[i].x,
            by: result.noisy_fields[i].y,
            bz: result.noisy_fields[i].z,
        };
        writer.serialize(record).map_err(io::Error::other)?;
    }
    writer.flush()?;
    Ok(())
}
