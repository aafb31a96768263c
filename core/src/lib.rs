//! Magnet position tracking toolbox for jaw-motion monitoring
//!
//! This crate estimates the three-dimensional position of a small permanent magnet relative to a
//! fixed magnetometer, using only the magnetic field vector the sensor measures. The intended
//! application is jaw-motion tracking for bruxism (tooth grinding) detection: a magnet fixed to
//! the lower jaw, a magnetometer fixed to the upper jaw or skull, and a solver that inverts the
//! magnet's field to recover relative displacement over time.
//!
//! The pipeline is: raw magnetometer samples → sensor calibration (hard-iron/soft-iron
//! correction) → calibrated field vectors → nonlinear least-squares position inversion (with the
//! analytic cuboid-magnet field as the predictive model) → position time series → windowed motion
//! features (field magnitude, lateral variance, grinding-band spectral power, field gradient).
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the linear algebra tools for the
//!   calibration fit and the position solver.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr):
//!   Provides random number generation for sensor-noise injection in simulation.
//! - [`serde`](https://crates.io/crates/serde) (with `serde_json` and `csv`): Provides
//!   serialization for calibration parameter persistence and simulation trace export.
//!
//! All other functionality is built on top of these crates or is auxiliary functionality
//! (logging, CLI). The analytic cuboid field follows R. Engel-Herbert and T. Hesjedal,
//! _Calculation of the magnetic stray field of a uniaxial magnetic domain_, J. Appl. Phys. 97,
//! 074504 (2005). Variables are named for the quantity they represent rather than the symbol
//! used in the paper.
//!
//! ## Crate overview
//!
//! This crate is organized into several modules:
//! - [field]: Analytic forward field model of a uniformly magnetized rectangular magnet, plus a
//!   point-dipole approximation used for far-field cross-checks.
//! - [calibration]: Two-stage magnetometer calibration (hard-iron offset, soft-iron ellipsoid
//!   fit) with parameter persistence.
//! - [solver]: Derivative-free (Nelder-Mead) inversion of a calibrated field reading into a
//!   magnet position.
//! - [session]: Tracking session driver that owns the warm-start state and threads raw samples
//!   through calibration and the solver.
//! - [features]: Windowed statistical and spectral features used to characterize motion regimes
//!   (rest / grinding / clenching).
//! - [sim]: Synthetic jaw-motion scenarios, noise injection, accuracy metrics, and trace export
//!   for offline validation.
//!
//! ## Coordinate conventions
//!
//! All positions are meters in the sensor's reference frame: the magnetometer sits at the origin,
//! x and y are the lateral (grinding) axes, and z is the vertical jaw-opening axis pointing from
//! the sensor toward the magnet. The magnet's magnetization direction is fixed (z-aligned for the
//! reference hardware) and only its position is solved for; jaw rotation is assumed small enough
//! that magnet orientation is constant over a session.

pub mod calibration;
pub mod features;
pub mod field;
pub mod session;
pub mod sim;
pub mod solver;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::solver::SolverOptions;

/// Vacuum permeability in T·m/A.
pub const VACUUM_PERMEABILITY: f64 = 4.0e-7 * std::f64::consts::PI;

/// Immutable physical description of the tracked magnet.
///
/// Known a priori from the manufacturer's datasheet, never estimated. The reference hardware is
/// an N35 block magnet, 5 mm x 5 mm x 2 mm, magnetized ~1.2 T remanence (955 kA/m) along +z.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MagnetModel {
    /// Magnetization vector in A/m.
    pub magnetization: Vector3<f64>,
    /// Full edge lengths of the block in meters.
    pub dimensions: Vector3<f64>,
}

impl MagnetModel {
    pub fn new(magnetization: Vector3<f64>, dimensions: Vector3<f64>) -> MagnetModel {
        assert!(
            dimensions.iter().all(|d| *d > 0.0),
            "MagnetModel: dimensions must be positive"
        );
        MagnetModel {
            magnetization,
            dimensions,
        }
    }

    /// Reference N35 magnet: 5 mm x 5 mm x 2 mm, 955 kA/m along +z.
    pub fn n35_5x5x2() -> MagnetModel {
        MagnetModel::new(
            Vector3::new(0.0, 0.0, 955_000.0),
            Vector3::new(0.005, 0.005, 0.002),
        )
    }

    /// Magnetic dipole moment in A·m² (magnetization times volume).
    pub fn moment(&self) -> Vector3<f64> {
        self.magnetization * (self.dimensions.x * self.dimensions.y * self.dimensions.z)
    }

    /// Radius of the sphere bounding the block, measured from its center.
    pub fn bounding_radius(&self) -> f64 {
        0.5 * self.dimensions.norm()
    }
}

impl Default for MagnetModel {
    fn default() -> Self {
        MagnetModel::n35_5x5x2()
    }
}

/// Explicit, immutable configuration for a tracking pipeline.
///
/// Passed into every component that needs the fixed geometry; there is no process-wide state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Physical description of the tracked magnet.
    pub magnet: MagnetModel,
    /// Magnetometer location in the reference frame (meters). Usually the origin.
    pub sensor_position: Vector3<f64>,
    /// Seed for the very first solve of a session: the magnet's expected resting position.
    pub initial_guess: Vector3<f64>,
    /// Direct-search solver tuning.
    pub solver: SolverOptions,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            magnet: MagnetModel::default(),
            sensor_position: Vector3::zeros(),
            // Jaw closed: magnet 10 mm above the sensor.
            initial_guess: Vector3::new(0.0, 0.0, 0.01),
            solver: SolverOptions::default(),
        }
    }
}
