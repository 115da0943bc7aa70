//! Trajectory Optimizer Property Tests
//!
//! End-to-end checks of the transcription and the warm-started solve:
//! 1. Decision layout round-trips
//! 2. Solutions pin the initial state, follow the dynamics and respect
//!    actuator bounds
//! 3. The reference rocket scenario reaches its goal
//! 4. Warm starts are deterministic, survive failures and pay off
//! 5. Optimizers sharing one model run concurrently

use std::sync::Arc;
use std::thread;

use approx::assert_relative_eq;
use nalgebra::{dvector, DVector};

use planar_core::{DynamicsModel, RocketXzModel};
use planar_planner::constraints::ConstraintKind;
use planar_planner::nlp::SolveStatus;
use planar_planner::{
    ChannelBounds, ConfigError, DecisionLayout, OcpConfig, OcpConfigParams, OptimizerError, Scenario,
    SolverConfig, TrajectoryOptimizer, WarmStart,
};

const FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// Solve a scenario once and return the optimizer holding the solution
fn solved<M: DynamicsModel>(scenario: &Scenario<M>) -> (TrajectoryOptimizer<M>, DVector<f64>) {
    let mut optimizer = scenario.optimizer().unwrap();
    let u0 = optimizer
        .solve(&scenario.initial_state, &scenario.goal)
        .unwrap();
    (optimizer, u0)
}

/// Initial-state pinning, dynamics consistency and bound satisfaction
fn assert_feasible<M: DynamicsModel>(optimizer: &TrajectoryOptimizer<M>, x0: &DVector<f64>) {
    let trajectory = optimizer.trajectory().unwrap();
    let model = optimizer.model();

    assert!((trajectory.initial_state() - x0).amax() <= FEASIBILITY_TOLERANCE);

    for (k, (x, u)) in trajectory
        .states()
        .iter()
        .zip(trajectory.controls())
        .enumerate()
    {
        let predicted = model.discrete_step(x, u).unwrap();
        let defect = (&trajectory.states()[k + 1] - predicted).amax();
        assert!(defect <= FEASIBILITY_TOLERANCE, "stage {k} defect {defect}");
    }

    for u in trajectory.controls() {
        for (c, bounds) in optimizer.config().actuator_bounds().iter().enumerate() {
            assert!(
                bounds.contains(u[c], FEASIBILITY_TOLERANCE),
                "channel {c} value {} outside [{}, {}]",
                u[c],
                bounds.min,
                bounds.max
            );
        }
    }
}

mod layout_tests {
    use super::*;

    #[test]
    fn test_pack_unpack_identity() {
        let layout = DecisionLayout::new(50, 6, 2);
        let z: Vec<f64> = (0..layout.num_variables()).map(|i| (i as f64).sqrt()).collect();

        let trajectory = layout.unpack(&z);
        assert_eq!(trajectory.horizon(), 50);
        assert_eq!(trajectory.states().len(), 51);
        assert_eq!(layout.pack(&trajectory), z);
    }

    #[test]
    fn test_degenerate_horizon_constraints() {
        let config = OcpConfig::try_from(OcpConfigParams::rocket(0.05).with_horizon(1)).unwrap();
        let mut optimizer =
            TrajectoryOptimizer::new(Arc::new(RocketXzModel::new(0.05)), Arc::new(config)).unwrap();
        optimizer.setup().unwrap();

        let set = optimizer.constraint_set().unwrap();
        assert_eq!(set.count(|k| matches!(k, ConstraintKind::Dynamics { .. })), 1);
        assert_eq!(set.count(|k| matches!(k, ConstraintKind::ControlBound { .. })), 2);
        assert_eq!(set.count(|k| matches!(k, ConstraintKind::InitialCondition)), 1);

        let x0 = DVector::zeros(6);
        let goal = dvector![0.0, 0.1, 0.0, 0.0, 0.0, 0.0];
        let u0 = optimizer.solve(&x0, &goal).unwrap();
        assert_eq!(u0.len(), 2);
        assert_feasible(&optimizer, &x0);
    }
}

mod scenario_tests {
    use super::*;

    #[test]
    fn test_rocket_climb_and_translate() {
        let scenario = Scenario::rocket_climb_and_translate().unwrap();
        let (optimizer, u0) = solved(&scenario);

        assert!(optimizer.statistics().unwrap().status.is_success());
        assert!(u0[0] > 0.0, "first thrust {}", u0[0]);
        assert_feasible(&optimizer, &scenario.initial_state);
        assert_eq!(optimizer.goal(), Some(&scenario.goal));

        // 2.5 s is short for a 3 m climb: the optimum trades terminal error
        // against control effort, but still ends well past halfway
        let terminal = optimizer.trajectory().unwrap().terminal_state();
        assert!(terminal[0] > 2.5 && terminal[1] > 2.5, "terminal {terminal}");
    }

    #[test]
    fn test_rocket_reaches_goal_with_longer_horizon() {
        let scenario = Scenario::rocket_climb_and_translate()
            .unwrap()
            .with_horizon(80)
            .unwrap();
        let (optimizer, u0) = solved(&scenario);

        assert!(u0[0] > 0.0);
        assert_feasible(&optimizer, &scenario.initial_state);

        let terminal = optimizer.trajectory().unwrap().terminal_state();
        assert!((terminal[0] - 3.0).abs() <= 0.1, "terminal x {}", terminal[0]);
        assert!((terminal[1] - 3.0).abs() <= 0.1, "terminal z {}", terminal[1]);
    }

    #[test]
    fn test_long_horizons_converge() {
        for horizon in [90, 100, 120] {
            let scenario = Scenario::rocket_climb_and_translate()
                .unwrap()
                .with_horizon(horizon)
                .unwrap();
            let mut optimizer = scenario.optimizer().unwrap();
            let result = optimizer.solve(&scenario.initial_state, &scenario.goal);

            let stats = optimizer.statistics().unwrap();
            assert!(
                result.is_ok(),
                "N={horizon}: {:?} after {} iterations, inf_pr {}",
                stats.status,
                stats.iterations,
                stats.primal_infeasibility
            );
            assert!(stats.primal_infeasibility <= FEASIBILITY_TOLERANCE);
            assert_feasible(&optimizer, &scenario.initial_state);
        }
    }

    #[test]
    fn test_rocket_vertical_hop_keeps_gimbal_centred() {
        let scenario = Scenario::rocket_vertical_hop().unwrap();
        let (optimizer, _) = solved(&scenario);

        assert_feasible(&optimizer, &scenario.initial_state);
        for u in optimizer.control_trajectory().unwrap() {
            assert_relative_eq!(u[1], 0.0, epsilon = 1e-5);
        }
        for x in optimizer.state_trajectory().unwrap() {
            assert_relative_eq!(x[0], 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_drone_lift() {
        let scenario = Scenario::drone_lift().unwrap();
        let (optimizer, u0) = solved(&scenario);

        assert_feasible(&optimizer, &scenario.initial_state);
        assert!(u0.iter().all(|&t| t >= -FEASIBILITY_TOLERANCE));
        let terminal = optimizer.trajectory().unwrap().terminal_state();
        assert!((terminal[1] - 1.0).abs() < 0.2, "terminal height {}", terminal[1]);
    }

    #[test]
    fn test_open_loop_playback_matches_plan() {
        let scenario = Scenario::rocket_climb_and_translate().unwrap();
        let (optimizer, _) = solved(&scenario);
        let trajectory = optimizer.trajectory().unwrap();

        let simulated = scenario
            .model
            .simulate_open_loop(&scenario.initial_state, trajectory.controls())
            .unwrap();
        assert_eq!(simulated.len(), trajectory.states().len());

        // Defects of 1e-6 per stage accumulate, but only mildly over 50 steps
        let drift = (trajectory.terminal_state() - &simulated[simulated.len() - 1]).amax();
        assert!(drift < 1e-3, "open-loop drift {drift}");
    }
}

mod warm_start_tests {
    use super::*;

    #[test]
    fn test_fresh_optimizers_are_deterministic() {
        let scenario = Scenario::rocket_climb_and_translate().unwrap();
        let (_, first) = solved(&scenario);
        let (_, second) = solved(&scenario);

        assert_eq!(first, second);
    }

    #[test]
    fn test_failed_solve_keeps_warm_start() {
        let params = OcpConfigParams::rocket(0.05).with_solver(SolverConfig {
            max_iterations: 1,
            ..SolverConfig::default()
        });
        let mut optimizer =
            TrajectoryOptimizer::from_params(Arc::new(RocketXzModel::new(0.05)), params).unwrap();
        optimizer.setup().unwrap();

        let x0 = DVector::zeros(6);
        let goal = dvector![3.0, 3.0, 0.0, 0.0, 0.0, 0.0];
        let err = optimizer.solve(&x0, &goal).unwrap_err();

        assert_eq!(
            err,
            OptimizerError::NonConvergent {
                status: SolveStatus::MaxIterationsExceeded,
                iterations: 1,
            }
        );
        assert_eq!(optimizer.warm_start(), &WarmStart::NotYetSolved);
        assert!(optimizer.goal().is_none());
        assert_eq!(
            optimizer.statistics().unwrap().status,
            SolveStatus::MaxIterationsExceeded
        );
    }

    #[test]
    fn test_failed_solve_keeps_previous_solution() {
        let scenario = Scenario::rocket_vertical_hop().unwrap();
        let (mut optimizer, _) = solved(&scenario);
        let before = optimizer.trajectory().unwrap().clone();

        let err = optimizer
            .solve(&DVector::from_element(6, f64::NAN), &scenario.goal)
            .unwrap_err();
        assert!(matches!(err, OptimizerError::Solver(_)));
        assert_eq!(optimizer.trajectory(), Some(&before));
    }

    #[test]
    fn test_warm_start_needs_no_more_iterations() {
        let scenario = Scenario::rocket_climb_and_translate().unwrap();
        let (mut optimizer, _) = solved(&scenario);
        let cold = optimizer.statistics().unwrap().iterations;

        optimizer
            .solve(&scenario.initial_state, &scenario.goal)
            .unwrap();
        let warm = optimizer.statistics().unwrap().iterations;

        assert!(warm <= cold, "warm {warm} > cold {cold}");
    }

    #[test]
    fn test_replanning_from_shifted_state() {
        let scenario = Scenario::rocket_climb_and_translate().unwrap();
        let (mut optimizer, u0) = solved(&scenario);

        let x1 = scenario.model.discrete_step(&scenario.initial_state, &u0).unwrap();
        optimizer.solve(&x1, &scenario.goal).unwrap();

        assert_feasible(&optimizer, &x1);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_invalid_configurations_rejected() {
        let model = Arc::new(RocketXzModel::new(0.05));

        let cases = [
            (OcpConfigParams::rocket(0.05).with_horizon(0), ConfigError::ZeroHorizon),
            (
                {
                    let mut params = OcpConfigParams::rocket(0.05);
                    params.actuator_bounds[0].min = 20.0;
                    params
                },
                ConfigError::InvalidBounds { channel: 0, min: 20.0, max: 15.0 },
            ),
            (
                {
                    let mut params = OcpConfigParams::rocket(0.05);
                    params.actuator_bounds.push(ChannelBounds::free());
                    params
                },
                ConfigError::BoundCount { expected: 2, got: 3 },
            ),
        ];

        for (params, expected) in cases {
            let err = TrajectoryOptimizer::from_params(Arc::clone(&model), params)
                .err()
                .unwrap();
            assert_eq!(err, OptimizerError::Configuration(expected));
        }
    }

    #[test]
    fn test_config_json_round_trip() {
        let json = serde_json::to_string(&OcpConfig::rocket(0.05).unwrap()).unwrap();
        let parsed: OcpConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.params(), OcpConfig::rocket(0.05).unwrap().params());

        let bad = json.replace("\"horizon\":50", "\"horizon\":0");
        assert!(serde_json::from_str::<OcpConfig>(&bad).is_err());
    }

    #[test]
    fn test_one_sided_channel_json_round_trip() {
        let mut params = OcpConfigParams::rocket(0.05);
        params.actuator_bounds[0] = ChannelBounds::new(0.0, f64::INFINITY);
        params.actuator_bounds[1] = ChannelBounds::free();
        let config = OcpConfig::try_from(params).unwrap();

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#"{"min":0.0,"max":null}"#), "{json}");

        let parsed: OcpConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.params(), config.params());
        assert_eq!(parsed.actuator_bounds()[0].max, f64::INFINITY);
        assert_eq!(parsed.actuator_bounds()[1], ChannelBounds::free());
    }
}

mod concurrency_tests {
    use super::*;

    #[test]
    fn test_shared_model_across_threads() {
        let model = Arc::new(RocketXzModel::new(0.05));
        let config = Arc::new(
            OcpConfig::try_from(OcpConfigParams::rocket(0.05).with_horizon(20)).unwrap(),
        );
        let goals = [
            dvector![0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            dvector![1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            dvector![-1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        ];

        let results: Vec<DVector<f64>> = thread::scope(|s| {
            let handles: Vec<_> = goals
                .iter()
                .map(|goal| {
                    let model = Arc::clone(&model);
                    let config = Arc::clone(&config);
                    s.spawn(move || {
                        let mut optimizer = TrajectoryOptimizer::new(model, config).unwrap();
                        optimizer.setup().unwrap();
                        optimizer.solve(&DVector::zeros(6), goal).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // Same answers as sequential solves
        for (goal, u0) in goals.iter().zip(&results) {
            let mut optimizer =
                TrajectoryOptimizer::new(Arc::clone(&model), Arc::clone(&config)).unwrap();
            optimizer.setup().unwrap();
            assert_eq!(&optimizer.solve(&DVector::zeros(6), goal).unwrap(), u0);
        }
        // Mirror-image goals steer the gimbal in opposite directions
        assert_relative_eq!(results[1][1], -results[2][1], epsilon = 1e-6);
        assert_relative_eq!(results[1][0], results[2][0], epsilon = 1e-6);
    }
}
