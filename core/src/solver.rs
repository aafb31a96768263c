//! Position inversion: recover the magnet position that best explains a calibrated field reading.
//!
//! The inverse problem is posed as minimizing `‖cuboid_field(position) − measured‖²` over the
//! magnet position, with orientation held fixed. The minimizer is a derivative-free Nelder-Mead
//! direct search: the forward model is continuous, but with measurement noise a robust
//! non-gradient method behaves better on the practical cost landscape than finite-difference
//! gradients, and the 3-parameter problem is small enough that simplex search is cheap.
//!
//! The search runs under a hard evaluation budget and never fails outright: on budget exhaustion
//! it returns the best point found with `converged = false`. Downstream consumers treat that as
//! a quality flag, not an error; jaw tracking tolerates an occasional approximate sample.
//!
//! This solver is a *tracker*, not a single-shot global position finder. Each solve is expected
//! to be seeded from the previous estimate (see [`crate::session::TrackingSession`]); the warm
//! start trades global-optimum guarantees for continuity and speed, and a pathological jump
//! between samples can land the search in a local minimum. That failure mode is exercised
//! explicitly in the tests.

use log::trace;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::MagnetModel;
use crate::field::cuboid_field;

/// Tuning knobs for the Nelder-Mead search. The defaults are sized for jaw-scale geometry
/// (millimeter displacements, 5-15 mm sensor distances).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Hard cap on cost-function evaluations; guarantees termination.
    pub max_evaluations: usize,
    /// Edge length of the initial simplex around the seed, in meters.
    pub initial_step: f64,
    /// Converged when every simplex vertex is within this distance of the best vertex (meters).
    pub position_tolerance: f64,
    /// Converged when the cost spread across the simplex falls below
    /// `cost_tolerance * (1 + best_cost)`.
    pub cost_tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            max_evaluations: 2000,
            initial_step: 1e-3,
            position_tolerance: 1e-7,
            cost_tolerance: 1e-12,
        }
    }
}

/// Result of one inversion. `position` is always the best point found; `converged` reports
/// whether the simplex collapsed within tolerance before the evaluation budget ran out.
#[derive(Clone, Copy, Debug)]
pub struct Solution {
    /// Estimated magnet position in meters.
    pub position: Vector3<f64>,
    /// Euclidean norm of the field residual at the estimate, in tesla.
    pub residual_norm: f64,
    /// Number of forward-model evaluations spent.
    pub evaluations: usize,
    /// False when the evaluation budget was exhausted before the convergence criteria held.
    pub converged: bool,
}

/// Invert a calibrated field reading into a magnet position estimate.
///
/// `initial_guess` seeds the simplex; for tracking it should be the previous sample's estimate,
/// and for the first sample of a session the expected resting position.
pub fn solve_position(
    measured: &Vector3<f64>,
    magnet: &MagnetModel,
    sensor_position: &Vector3<f64>,
    initial_guess: &Vector3<f64>,
    options: &SolverOptions,
) -> Solution {
    let cost = |position: &Vector3<f64>| -> f64 {
        (cuboid_field(magnet, position, sensor_position) - measured).norm_squared()
    };

    // Standard Nelder-Mead coefficients.
    const REFLECTION: f64 = 1.0;
    const EXPANSION: f64 = 2.0;
    const CONTRACTION: f64 = 0.5;
    const SHRINK: f64 = 0.5;

    let mut evaluations = 0;
    let mut evaluate = |position: &Vector3<f64>, count: &mut usize| -> f64 {
        *count += 1;
        cost(position)
    };

    // Initial simplex: the seed plus one vertex stepped along each axis.
    let mut simplex: Vec<(Vector3<f64>, f64)> = Vec::with_capacity(4);
    simplex.push((*initial_guess, evaluate(initial_guess, &mut evaluations)));
    for axis in 0..3 {
        let mut vertex = *initial_guess;
        vertex[axis] += options.initial_step;
        let value = evaluate(&vertex, &mut evaluations);
        simplex.push((vertex, value));
    }

    let mut converged = false;
    while evaluations < options.max_evaluations {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let best = simplex[0];
        let worst = simplex[3];

        let position_spread = simplex[1..]
            .iter()
            .map(|(vertex, _)| (vertex - best.0).norm())
            .fold(0.0_f64, f64::max);
        let cost_spread = worst.1 - best.1;
        if position_spread <= options.position_tolerance
            || cost_spread <= options.cost_tolerance * (1.0 + best.1)
        {
            converged = true;
            break;
        }

        // Centroid of all vertices except the worst.
        let centroid = (simplex[0].0 + simplex[1].0 + simplex[2].0) / 3.0;

        let reflected = centroid + REFLECTION * (centroid - worst.0);
        let reflected_cost = evaluate(&reflected, &mut evaluations);
        if reflected_cost < best.1 {
            let expanded = centroid + EXPANSION * (reflected - centroid);
            let expanded_cost = evaluate(&expanded, &mut evaluations);
            simplex[3] = if expanded_cost < reflected_cost {
                (expanded, expanded_cost)
            } else {
                (reflected, reflected_cost)
            };
            continue;
        }
        if reflected_cost < simplex[2].1 {
            simplex[3] = (reflected, reflected_cost);
            continue;
        }

        // Contract toward the better of the worst vertex and its reflection.
        let contraction_base = if reflected_cost < worst.1 {
            reflected
        } else {
            worst.0
        };
        let contracted = centroid + CONTRACTION * (contraction_base - centroid);
        let contracted_cost = evaluate(&contracted, &mut evaluations);
        if contracted_cost < worst.1.min(reflected_cost) {
            simplex[3] = (contracted, contracted_cost);
            continue;
        }

        // Shrink everything toward the best vertex.
        for index in 1..4 {
            let shrunk = best.0 + SHRINK * (simplex[index].0 - best.0);
            let shrunk_cost = evaluate(&shrunk, &mut evaluations);
            simplex[index] = (shrunk, shrunk_cost);
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    let (position, best_cost) = simplex[0];
    trace!(
        "solve_position: cost {:.3e} after {} evaluations (converged: {})",
        best_cost, evaluations, converged
    );
    Solution {
        position,
        residual_norm: best_cost.sqrt(),
        evaluations,
        converged,
    }
}
