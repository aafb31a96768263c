//! Tracking session driver: threads raw magnetometer samples through calibration and the
//! position solver while owning the warm-start state.
//!
//! A session is started once per wear: the subject holds a fixed reference pose (teeth gently
//! closed) while a handful of readings are captured, and their calibrated mean becomes the
//! session's [`ReferenceBaseline`]. Every subsequent [`TrackingSession::step`] then reports the
//! estimated magnet position alongside the baseline-relative field delta; the delta cancels any
//! static mount bias the sweep calibration could not see and is the primary signal for
//! downstream motion classification.
//!
//! Each solve is seeded from the previous estimate, so solving is strictly sequential within a
//! session. The warm-start state is exclusively owned here; concurrent sessions must use
//! independent instances, which is why nothing in this module needs a lock.

use log::warn;
use nalgebra::Vector3;
use thiserror::Error;

use crate::TrackerConfig;
use crate::calibration::CalibrationParameters;
use crate::solver::{self, Solution};

/// Failures raised by the external acquisition collaborator. The core does not retry; it halts
/// the current session cleanly and lets the caller decide.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("sensor device disconnected")]
    Disconnected,
    #[error("malformed sample from sensor: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no valid samples obtained during reference capture")]
    ReferenceCapture,
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
}

/// Pull-style source of raw 3-axis samples, decoupled from transport and encoding. A physical
/// device driver, a replay file, or an in-memory buffer all look the same from here.
pub trait SampleSource {
    /// Next raw sample, `Ok(None)` at end of stream.
    fn next_sample(&mut self) -> Result<Option<Vector3<f64>>, AcquisitionError>;
}

/// In-memory source over a slice of samples, used for replay and testing.
pub struct SliceSource<'a> {
    samples: &'a [Vector3<f64>],
    cursor: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(samples: &'a [Vector3<f64>]) -> SliceSource<'a> {
        SliceSource { samples, cursor: 0 }
    }
}

impl SampleSource for SliceSource<'_> {
    fn next_sample(&mut self) -> Result<Option<Vector3<f64>>, AcquisitionError> {
        let sample = self.samples.get(self.cursor).copied();
        self.cursor += 1;
        Ok(sample)
    }
}

/// Output of one tracking step: the absolute position estimate plus the baseline-relative field
/// delta and the solver's convergence quality.
#[derive(Clone, Copy, Debug)]
pub struct TrackingStep {
    /// Estimated magnet position in meters.
    pub position: Vector3<f64>,
    /// Calibrated reading minus the session baseline, in tesla.
    pub field_delta: Vector3<f64>,
    /// Field residual norm at the estimate, in tesla.
    pub residual_norm: f64,
    /// Forward-model evaluations spent on this sample.
    pub evaluations: usize,
    /// False when the solver exhausted its budget; the estimate is best-effort.
    pub converged: bool,
}

/// One tracking session: immutable geometry and calibration, plus the mutable warm-start seed.
#[derive(Clone, Debug)]
pub struct TrackingSession {
    config: TrackerConfig,
    calibration: CalibrationParameters,
    baseline: Vector3<f64>,
    last_estimate: Vector3<f64>,
}

impl TrackingSession {
    /// Start a session from raw readings captured while the subject holds the reference pose.
    ///
    /// The baseline is the mean of the calibrated readings. Fails with
    /// [`SessionError::ReferenceCapture`] when no samples were obtained.
    pub fn start(
        config: TrackerConfig,
        calibration: CalibrationParameters,
        reference_samples: &[Vector3<f64>],
    ) -> Result<TrackingSession, SessionError> {
        if reference_samples.is_empty() {
            return Err(SessionError::ReferenceCapture);
        }
        let sum: Vector3<f64> = reference_samples
            .iter()
            .map(|raw| calibration.apply(raw))
            .sum();
        let baseline = sum / reference_samples.len() as f64;
        Ok(TrackingSession {
            last_estimate: config.initial_guess,
            config,
            calibration,
            baseline,
        })
    }

    /// Start a session by draining a capture window from a sample source.
    ///
    /// Pulls up to `capture_count` samples; acquisition errors propagate, and an empty window
    /// fails with [`SessionError::ReferenceCapture`].
    pub fn start_from_source(
        config: TrackerConfig,
        calibration: CalibrationParameters,
        source: &mut dyn SampleSource,
        capture_count: usize,
    ) -> Result<TrackingSession, SessionError> {
        let mut reference = Vec::with_capacity(capture_count);
        while reference.len() < capture_count {
            match source.next_sample()? {
                Some(sample) => reference.push(sample),
                None => break,
            }
        }
        TrackingSession::start(config, calibration, &reference)
    }

    /// Process one raw sample: calibrate, solve seeded from the previous estimate, and update
    /// the warm-start state. Solver non-convergence degrades gracefully: the best-effort pose
    /// is reported with `converged = false` and the session continues.
    pub fn step(&mut self, raw: &Vector3<f64>) -> TrackingStep {
        let calibrated = self.calibration.apply(raw);
        let field_delta = calibrated - self.baseline;
        let solution: Solution = solver::solve_position(
            &calibrated,
            &self.config.magnet,
            &self.config.sensor_position,
            &self.last_estimate,
            &self.config.solver,
        );
        if !solution.converged {
            warn!(
                "position solve did not converge after {} evaluations (residual {:.3e} T); \
                 keeping best-effort estimate",
                solution.evaluations, solution.residual_norm
            );
        }
        self.last_estimate = solution.position;
        TrackingStep {
            position: solution.position,
            field_delta,
            residual_norm: solution.residual_norm,
            evaluations: solution.evaluations,
            converged: solution.converged,
        }
    }

    /// The session's reference baseline field (calibrated units, tesla).
    pub fn baseline(&self) -> Vector3<f64> {
        self.baseline
    }

    /// The current warm-start seed, i.e. the most recent position estimate.
    pub fn last_estimate(&self) -> Vector3<f64> {
        self.last_estimate
    }
}
