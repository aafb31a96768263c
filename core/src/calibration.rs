//! Two-stage magnetometer calibration: hard-iron offset and soft-iron ellipsoid correction.
//!
//! Raw magnetometer readings are distorted by nearby magnetized material (a constant additive
//! bias, "hard iron") and by magnetically susceptible material (a direction-dependent linear
//! distortion, "soft iron"). A rotation sweep of the sensor with the tracked magnet far away
//! traces out an ellipsoid instead of the ideal sphere; this module fits that ellipsoid and
//! produces the affine correction that maps raw readings back onto a sphere:
//!
//! 1. hard-iron offset = per-axis midpoint of the min/max envelope of the sweep;
//! 2. centered samples are fit to the quadric `Ax² + By² + Cz² + 2Dxy + 2Exz + 2Fyz = 1` by
//!    linear least squares (SVD pseudo-inverse of the 6-column design matrix);
//! 3. the symmetric coefficient matrix is eigendecomposed and the soft-iron transform is
//!    `Q · sqrt(Λ) · Qᵀ`.
//!
//! A sweep that does not span 3D orientation space (rotation confined to a plane) produces a
//! quadric with a non-positive eigenvalue. That is surfaced as [`CalibrationError::DegenerateFit`]
//! rather than silently taking the square root of a negative number: a bad transform would
//! corrupt every downstream position solve.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum number of rotation-sweep samples required for a fit.
pub const MIN_CALIBRATION_SAMPLES: usize = 50;

/// Eigenvalues of the fitted quadric at or below this are treated as degenerate.
const EIGENVALUE_FLOOR: f64 = 1e-12;

/// Data-quality failures of the calibration fit. Both abort calibration; neither is recoverable
/// by the caller short of collecting a better sweep.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("not enough calibration samples: got {got}, need at least {need}")]
    InsufficientData { got: usize, need: usize },
    #[error(
        "ellipsoid fit is not positive definite (smallest eigenvalue {min_eigenvalue:.3e}); \
         the rotation sweep likely did not span 3D orientations"
    )]
    DegenerateFit { min_eigenvalue: f64 },
}

/// Failures while persisting or loading a calibration bundle.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("calibration file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("calibration file is not a valid parameter bundle: {0}")]
    Format(#[from] serde_json::Error),
}

/// Affine magnetometer correction fitted from a rotation sweep.
///
/// Immutable once fitted; recalibration produces a new instance. `transform` is symmetric
/// positive-definite by construction (eigendecomposition of the fitted quadric), so applying it
/// to the distorted ellipsoid recovers a sphere.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    /// Hard-iron offset in raw sensor units.
    pub offset: Vector3<f64>,
    /// Soft-iron correction matrix (symmetric positive-definite).
    pub transform: Matrix3<f64>,
}

impl CalibrationParameters {
    /// Identity calibration: no offset, no distortion. Useful for simulation, where the
    /// synthesized fields are already in physical units.
    pub fn identity() -> CalibrationParameters {
        CalibrationParameters {
            offset: Vector3::zeros(),
            transform: Matrix3::identity(),
        }
    }

    /// Correct a single raw reading: `transform · (raw − offset)`.
    ///
    /// Because `transform` is symmetric this equals the row-vector form
    /// `(raw − offset) · transform`. Pure and O(1).
    pub fn apply(&self, raw: &Vector3<f64>) -> Vector3<f64> {
        self.transform * (raw - self.offset)
    }

    /// Save the parameter bundle as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistenceError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load a previously saved parameter bundle. Returns `Ok(None)` when no bundle exists at
    /// the given path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<CalibrationParameters>, PersistenceError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let params = serde_json::from_reader(BufReader::new(file))?;
        Ok(Some(params))
    }
}

/// Fit calibration parameters from a batch of raw rotation-sweep samples.
///
/// Requires at least [`MIN_CALIBRATION_SAMPLES`] readings spanning diverse 3D orientations.
/// The hard-iron estimate assumes the sweep covers the full per-axis range roughly
/// symmetrically about the true center.
pub fn fit(samples: &[Vector3<f64>]) -> Result<CalibrationParameters, CalibrationError> {
    if samples.len() < MIN_CALIBRATION_SAMPLES {
        return Err(CalibrationError::InsufficientData {
            got: samples.len(),
            need: MIN_CALIBRATION_SAMPLES,
        });
    }

    // Hard-iron offset: midpoint of the per-axis envelope.
    let mut min_values = samples[0];
    let mut max_values = min_values;
    for sample in samples {
        for axis in 0..3 {
            min_values[axis] = min_values[axis].min(sample[axis]);
            max_values[axis] = max_values[axis].max(sample[axis]);
        }
    }
    let offset = 0.5 * (min_values + max_values);

    // Soft iron: least-squares quadric fit on the centered samples. One row of the design
    // matrix per sample, columns [x², y², z², 2xy, 2xz, 2yz].
    let design = DMatrix::from_fn(samples.len(), 6, |row, column| {
        let p = samples[row] - offset;
        match column {
            0 => p.x * p.x,
            1 => p.y * p.y,
            2 => p.z * p.z,
            3 => 2.0 * p.x * p.y,
            4 => 2.0 * p.x * p.z,
            _ => 2.0 * p.y * p.z,
        }
    });
    let rhs = DVector::from_element(samples.len(), 1.0);
    let svd = design.svd(true, true);
    let coefficients = svd
        .solve(&rhs, EIGENVALUE_FLOOR)
        .map_err(|_| CalibrationError::DegenerateFit {
            min_eigenvalue: 0.0,
        })?;

    let quadric = Matrix3::new(
        coefficients[0], coefficients[3], coefficients[4],
        coefficients[3], coefficients[1], coefficients[5],
        coefficients[4], coefficients[5], coefficients[2],
    );
    let eigen = quadric.symmetric_eigen();
    let min_eigenvalue = eigen.eigenvalues.min();
    if !min_eigenvalue.is_finite() || min_eigenvalue <= EIGENVALUE_FLOOR {
        return Err(CalibrationError::DegenerateFit { min_eigenvalue });
    }

    let sqrt_lambda = Matrix3::from_diagonal(&eigen.eigenvalues.map(f64::sqrt));
    let transform = eigen.eigenvectors * sqrt_lambda * eigen.eigenvectors.transpose();
    Ok(CalibrationParameters { offset, transform })
}

/// Batch collector for a calibration sweep, replacing an interactive prompt flow with an
/// explicit state machine: accumulate raw samples while `is_ready` is false, then [`fit`].
///
/// The collector never fits implicitly; the surrounding CLI/UI decides when the sweep is done.
#[derive(Clone, Debug, Default)]
pub struct CalibrationCollector {
    samples: Vec<Vector3<f64>>,
}

impl CalibrationCollector {
    pub fn new() -> CalibrationCollector {
        CalibrationCollector::default()
    }

    pub fn push(&mut self, raw: Vector3<f64>) {
        self.samples.push(raw);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// True once enough samples have accumulated for a fit to be attempted. Readiness does not
    /// guarantee orientation coverage; a planar sweep still fails with `DegenerateFit`.
    pub fn is_ready(&self) -> bool {
        self.samples.len() >= MIN_CALIBRATION_SAMPLES
    }

    pub fn fit(&self) -> Result<CalibrationParameters, CalibrationError> {
        fit(&self.samples)
    }

    /// Discard the collected sweep, returning the collector to its awaiting-data state.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Deterministic quasi-uniform directions on the unit sphere (Fibonacci lattice plus
    /// antipodes, so the per-axis envelope is exactly symmetric about the center).
    fn unit_sphere_points(n: usize) -> Vec<Vector3<f64>> {
        let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        let half = n.div_ceil(2);
        let mut points = Vec::with_capacity(2 * half);
        for i in 0..half {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / half as f64;
            let radius = (1.0 - z * z).sqrt();
            let theta = golden_angle * i as f64;
            let p = Vector3::new(radius * theta.cos(), radius * theta.sin(), z);
            points.push(p);
            points.push(-p);
        }
        points
    }

    #[test]
    fn test_insufficient_data() {
        let samples: Vec<Vector3<f64>> = unit_sphere_points(2 * MIN_CALIBRATION_SAMPLES)
            .into_iter()
            .take(MIN_CALIBRATION_SAMPLES - 1)
            .collect();
        match fit(&samples) {
            Err(CalibrationError::InsufficientData { got, need }) => {
                assert_eq!(got, MIN_CALIBRATION_SAMPLES - 1);
                assert_eq!(need, MIN_CALIBRATION_SAMPLES);
            }
            other => panic!("expected InsufficientData, got {other:?}"),
        }
    }

    #[test]
    fn test_unit_sphere_round_trip() {
        // Undistorted samples on the unit sphere: offset ~ 0, transform ~ identity.
        let samples = unit_sphere_points(200);
        let params = fit(&samples).expect("fit should succeed");
        assert!(params.offset.norm() < 1e-6);
        let identity_error = (params.transform - Matrix3::identity()).norm();
        assert!(
            identity_error < 1e-3,
            "transform should be near identity, error {identity_error}"
        );
    }

    #[test]
    fn test_distortion_recovery() {
        // Distort the sphere with a known symmetric map and offset; calibration must undo it.
        let distortion = Matrix3::new(1.4, 0.1, 0.0, 0.1, 0.8, 0.05, 0.0, 0.05, 1.1);
        let bias = Vector3::new(12.0, -7.5, 3.25);
        let samples: Vec<Vector3<f64>> = unit_sphere_points(400)
            .iter()
            .map(|p| distortion * p + bias)
            .collect();
        let params = fit(&samples).expect("fit should succeed");
        assert!(
            (params.offset - bias).norm() < 1e-9,
            "offset estimate off by {}",
            (params.offset - bias).norm()
        );
        // Corrected samples must land back on a unit sphere.
        for sample in &samples {
            let corrected = params.apply(sample);
            assert_approx_eq!(corrected.norm(), 1.0, 1e-6);
        }
    }

    #[test]
    fn test_degenerate_planar_sweep() {
        // Rotation confined to the xy plane: zero variance along z must be detected, never
        // passed through as sqrt of a non-positive eigenvalue.
        let samples: Vec<Vector3<f64>> = (0..120)
            .map(|i| {
                let angle = i as f64 * 0.1;
                Vector3::new(angle.cos(), angle.sin(), 0.0)
            })
            .collect();
        match fit(&samples) {
            Err(CalibrationError::DegenerateFit { min_eigenvalue }) => {
                assert!(min_eigenvalue <= EIGENVALUE_FLOOR);
            }
            other => panic!("expected DegenerateFit, got {other:?}"),
        }
    }

    #[test]
    fn test_transform_is_symmetric() {
        let samples = unit_sphere_points(100);
        let params = fit(&samples).expect("fit should succeed");
        let asymmetry = (params.transform - params.transform.transpose()).norm();
        assert!(asymmetry < 1e-12);
    }

    #[test]
    fn test_apply_identity_passthrough() {
        let params = CalibrationParameters::identity();
        let raw = Vector3::new(0.3, -0.2, 0.9);
        let corrected = params.apply(&raw);
        assert_approx_eq!((corrected - raw).norm(), 0.0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let samples = unit_sphere_points(100);
        let params = fit(&samples).expect("fit should succeed");
        let path = std::env::temp_dir().join("magtrack_calibration_roundtrip.json");
        params.save(&path).expect("save should succeed");
        let loaded = CalibrationParameters::load(&path)
            .expect("load should succeed")
            .expect("bundle should exist");
        assert!((loaded.offset - params.offset).norm() < 1e-12);
        assert!((loaded.transform - params.transform).norm() < 1e-12);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let path = std::env::temp_dir().join("magtrack_no_such_calibration.json");
        let _ = std::fs::remove_file(&path);
        let loaded = CalibrationParameters::load(&path).expect("missing file is not an error");
        assert!(loaded.is_none());
    }

    #[test]
    fn test_collector_state_machine() {
        let mut collector = CalibrationCollector::new();
        assert!(!collector.is_ready());
        assert!(collector.fit().is_err());
        for point in unit_sphere_points(MIN_CALIBRATION_SAMPLES) {
            collector.push(point);
        }
        assert!(collector.is_ready());
        assert!(collector.fit().is_ok());
        collector.clear();
        assert_eq!(collector.sample_count(), 0);
        assert!(!collector.is_ready());
    }
}
