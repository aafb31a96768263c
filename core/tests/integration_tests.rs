//! End-to-end tests of the tracking pipeline: calibration, forward/inverse consistency, session
//! tracking under noise, and regime discrimination via the grinding-band spectral feature.

use nalgebra::{Matrix3, Vector3};

use magtrack::calibration::{self, CalibrationError, CalibrationParameters};
use magtrack::features::{self, FeatureConfig};
use magtrack::field::cuboid_field;
use magtrack::session::TrackingSession;
use magtrack::sim::{self, GRINDING_END_S, REST_END_S, ScenarioOptions};
use magtrack::solver::{self, SolverOptions};
use magtrack::{MagnetModel, TrackerConfig};

/// Antipodally symmetric point set on the unit sphere (each lattice point plus its negation).
fn unit_sphere_points(count: usize) -> Vec<Vector3<f64>> {
    let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
    let half = count.div_ceil(2);
    let mut points = Vec::with_capacity(2 * half);
    for i in 0..half {
        let y = 1.0 - 2.0 * (i as f64 + 0.5) / half as f64;
        let radius = (1.0 - y * y).sqrt();
        let theta = golden * i as f64;
        let p = Vector3::new(radius * theta.cos(), y, radius * theta.sin());
        points.push(p);
        points.push(-p);
    }
    points
}

#[test]
fn test_calibration_recovers_distorted_sphere() {
    // Soft-iron distortion (symmetric, positive definite) plus a hard-iron offset.
    let distortion = Matrix3::new(
        1.20, 0.05, 0.00, //
        0.05, 0.90, 0.02, //
        0.00, 0.02, 1.05,
    );
    let offset = Vector3::new(0.3, -0.2, 0.1);
    let raw: Vec<Vector3<f64>> = unit_sphere_points(300)
        .iter()
        .map(|p| distortion * p + offset)
        .collect();

    let parameters = calibration::fit(&raw).expect("fit should succeed");
    assert!((parameters.offset - offset).norm() < 1e-9);
    for sample in &raw {
        let corrected = parameters.apply(sample);
        assert!(
            (corrected.norm() - 1.0).abs() < 1e-6,
            "corrected norm {} off the unit sphere",
            corrected.norm()
        );
    }
}

#[test]
fn test_calibration_rejects_sparse_and_planar_data() {
    let sparse = unit_sphere_points(100);
    let result = calibration::fit(&sparse[..40]);
    assert!(matches!(
        result,
        Err(CalibrationError::InsufficientData { got: 40, .. })
    ));

    // All samples in the z = 0 plane: the ellipsoid is unconstrained along z.
    let planar: Vec<Vector3<f64>> = (0..120)
        .map(|i| {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / 120.0;
            Vector3::new(angle.cos(), angle.sin(), 0.0)
        })
        .collect();
    assert!(matches!(
        calibration::fit(&planar),
        Err(CalibrationError::DegenerateFit { .. })
    ));
}

#[test]
fn test_forward_inverse_consistency_over_workspace() {
    // Noiseless grid across the jaw workspace: every inversion lands within 0.5 mm.
    let magnet = MagnetModel::n35_5x5x2();
    let sensor = Vector3::zeros();
    let options = SolverOptions::default();
    for &z in &[0.005, 0.008, 0.011, 0.015] {
        for &x in &[-0.004, 0.0, 0.004] {
            for &y in &[-0.003, 0.003] {
                let truth = Vector3::new(x, y, z);
                let measured = cuboid_field(&magnet, &truth, &sensor);
                let seed = truth + Vector3::new(0.0015, -0.0015, 0.001);
                let solution = solver::solve_position(&measured, &magnet, &sensor, &seed, &options);
                let error = (solution.position - truth).norm();
                assert!(
                    error < 0.5e-3,
                    "pose error {:.2e} m at truth {:?}",
                    error,
                    truth
                );
            }
        }
    }
}

#[test]
fn test_scenario_tracking_accuracy_under_noise() {
    let config = TrackerConfig::default();
    let options = ScenarioOptions::default();
    let result = sim::run_scenario(&config, &options);
    assert_eq!(result.times.len(), 750);
    assert!(
        result.mae_mm < 1.0,
        "MAE {} mm exceeds 1 mm at sensor-grade noise",
        result.mae_mm
    );
}

#[test]
fn test_session_tracks_calibrated_stream() {
    let config = TrackerConfig::default();
    let magnet = config.magnet;
    let sensor = config.sensor_position;

    // Raw stream distorted by a known soft/hard-iron model, undone by a matching calibration.
    let distortion = Matrix3::new(
        1.1, 0.0, 0.0, //
        0.0, 0.95, 0.0, //
        0.0, 0.0, 1.02,
    );
    let offset = Vector3::new(2e-5, -1e-5, 3e-5);
    let inverse = distortion.try_inverse().expect("distortion is invertible");
    let calibration = CalibrationParameters {
        offset,
        transform: inverse,
    };
    let distort = |field: &Vector3<f64>| distortion * field + offset;

    let rest = Vector3::new(0.0, 0.0, 0.010);
    let reference = [distort(&cuboid_field(&magnet, &rest, &sensor))];
    let mut session = TrackingSession::start(config, calibration, &reference)
        .expect("reference capture should succeed");

    let path = [
        Vector3::new(0.0005, 0.0, 0.0098),
        Vector3::new(0.0010, -0.0004, 0.0095),
        Vector3::new(0.0012, -0.0008, 0.0093),
    ];
    for truth in &path {
        let raw = distort(&cuboid_field(&magnet, truth, &sensor));
        let step = session.step(&raw);
        assert!(step.converged);
        assert!(
            (step.position - truth).norm() < 0.5e-3,
            "session estimate off by {:.2e} m",
            (step.position - truth).norm()
        );
    }
}

#[test]
fn test_grinding_band_discriminates_phases() {
    let config = TrackerConfig::default();
    let options = ScenarioOptions::default();
    let result = sim::run_scenario(&config, &options);

    let feature_config = FeatureConfig::default();
    let window = 50;
    let mut phase_power = [(0.0, 0usize); 3];
    for (chunk_index, chunk) in result.noisy_fields.chunks_exact(window).enumerate() {
        let start = chunk_index * window;
        let t = result.times[start];
        let z: Vec<f64> = result.true_positions[start..start + window]
            .iter()
            .map(|p| p.z)
            .collect();
        let features = features::extract(chunk, &z, &feature_config).expect("window is valid");
        let phase = if t < REST_END_S {
            0
        } else if t < GRINDING_END_S {
            1
        } else {
            2
        };
        phase_power[phase].0 += features.spectral_power;
        phase_power[phase].1 += 1;
    }

    let rest = phase_power[0].0 / phase_power[0].1 as f64;
    let grinding = phase_power[1].0 / phase_power[1].1 as f64;
    let clench = phase_power[2].0 / phase_power[2].1 as f64;
    assert!(
        grinding > 10.0 * rest && grinding > 10.0 * clench,
        "band power failed to separate phases: rest {:.3e}, grinding {:.3e}, clench {:.3e}",
        rest,
        grinding,
        clench
    );
}

#[test]
fn test_starved_solver_degrades_gracefully() {
    let magnet = MagnetModel::n35_5x5x2();
    let sensor = Vector3::zeros();
    let truth = Vector3::new(0.0, 0.0, 0.007);
    let measured = cuboid_field(&magnet, &truth, &sensor);
    let options = SolverOptions {
        max_evaluations: 20,
        ..SolverOptions::default()
    };
    // A wildly wrong seed with a starved budget: must flag non-convergence, never panic.
    let solution = solver::solve_position(
        &measured,
        &magnet,
        &sensor,
        &Vector3::new(0.04, -0.04, 0.08),
        &options,
    );
    assert!(!solution.converged);
    assert!(solution.position.iter().all(|c| c.is_finite()));
    assert!(solution.residual_norm.is_finite());
}

#[test]
fn test_trace_export_matches_run_length() {
    let config = TrackerConfig::default();
    let options = ScenarioOptions {
        duration_s: 3.0,
        ..ScenarioOptions::default()
    };
    let result = sim::run_scenario(&config, &options);
    let trace = sim::SimulationTrace::from_scenario(&result);
    assert_eq!(trace.original_length, result.times.len());
    assert_eq!(trace.records.len(), trace.original_length);
    let json = serde_json::to_value(&trace).expect("serializable");
    assert!(json.get("originalLength").is_some());
    assert!(json.get("playbackRate").is_some());
}
