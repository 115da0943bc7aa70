//! Warm-started trajectory optimizer
//!
//! [`TrajectoryOptimizer`] owns the transcribed OCP and its solver and
//! keeps the last converged trajectory as the initial guess for the next
//! solve.
//!
//! ```text
//! new(model, config) ──► Unconfigured ──setup()──► Ready ──solve(x0, goal)──► u₀
//!                                                    ▲              │
//!                                                    └─ warm start ─┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::DVector;
use planar_core::DynamicsModel;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ConfigError, OcpConfig, OcpConfigParams};
use crate::constraints::{ConstraintKind, ConstraintSet};
use crate::nlp::{NlpError, SolveStatus, SqpOptions, SqpSolver};
use crate::ocp::{DecisionLayout, OcpProblem};
use crate::trajectory::Trajectory;

/// Relative tolerance when comparing model and config sampling times
const SAMPLING_TIME_TOLERANCE: f64 = 1e-12;

/// Optimizer errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Invalid {quantity} dimension: expected {expected}, got {got}")]
    DimensionMismatch {
        quantity: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Model sampling time {model} differs from configured {config}")]
    SamplingTimeMismatch { model: f64, config: f64 },
    #[error("Optimizer is not configured; call setup() first")]
    NotConfigured,
    #[error("Optimizer is already configured")]
    AlreadyConfigured,
    #[error("Solver did not converge ({status}) after {iterations} iterations")]
    NonConvergent {
        status: SolveStatus,
        iterations: usize,
    },
    #[error("Solver error: {0}")]
    Solver(#[from] NlpError),
}

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerPhase {
    /// Constructed, problem not yet built
    Unconfigured,
    /// Problem built, ready to solve
    Ready,
}

/// Initial guess for the next solve
#[derive(Debug, Clone, PartialEq)]
pub enum WarmStart {
    /// No solve has converged yet; the guess is synthesized from `x0`
    NotYetSolved,
    /// Last converged trajectory
    Previous(Trajectory),
}

/// Summary of the last solve attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveStatistics {
    pub status: SolveStatus,
    /// SQP iterations
    pub iterations: usize,
    /// QP solver iterations summed over the SQP iterations
    pub qp_iterations: usize,
    pub objective: f64,
    pub primal_infeasibility: f64,
    pub dual_infeasibility: f64,
    /// Wall time spent inside the NLP solver
    pub solve_time: Duration,
}

/// Multiple-shooting trajectory optimizer
///
/// The model and configuration are shared read-only; the problem structure
/// and the warm-start cache belong to this optimizer alone. Solves are
/// blocking and strictly sequential per instance.
pub struct TrajectoryOptimizer<M> {
    model: Arc<M>,
    config: Arc<OcpConfig>,
    layout: DecisionLayout,
    solver: Option<SqpSolver<OcpProblem<M>>>,
    warm_start: WarmStart,
    goal: Option<DVector<f64>>,
    statistics: Option<SolveStatistics>,
}

impl<M: DynamicsModel> TrajectoryOptimizer<M> {
    /// Bind a model to a configuration, checking that they agree
    pub fn new(model: Arc<M>, config: Arc<OcpConfig>) -> Result<Self, OptimizerError> {
        if config.nx() != model.nx() {
            return Err(OptimizerError::DimensionMismatch {
                quantity: "state weight",
                expected: model.nx(),
                got: config.nx(),
            });
        }
        if config.nu() != model.nu() {
            return Err(OptimizerError::DimensionMismatch {
                quantity: "control weight",
                expected: model.nu(),
                got: config.nu(),
            });
        }
        let (model_dt, config_dt) = (model.sampling_time(), config.sampling_time());
        if (model_dt - config_dt).abs() > SAMPLING_TIME_TOLERANCE * config_dt.max(1.0) {
            return Err(OptimizerError::SamplingTimeMismatch {
                model: model_dt,
                config: config_dt,
            });
        }

        let layout = DecisionLayout::new(config.horizon(), model.nx(), model.nu());

        Ok(Self {
            model,
            config,
            layout,
            solver: None,
            warm_start: WarmStart::NotYetSolved,
            goal: None,
            statistics: None,
        })
    }

    /// Validate raw parameters and bind them to `model`
    pub fn from_params(model: Arc<M>, params: OcpConfigParams) -> Result<Self, OptimizerError> {
        let config = OcpConfig::try_from(params)?;
        Self::new(model, Arc::new(config))
    }

    /// Build the decision layout, constraint set and solver
    pub fn setup(&mut self) -> Result<(), OptimizerError> {
        if self.solver.is_some() {
            return Err(OptimizerError::AlreadyConfigured);
        }

        let problem = OcpProblem::new(Arc::clone(&self.model), Arc::clone(&self.config));
        let constraints = problem.constraint_set();
        debug!(
            model = self.model.name(),
            horizon = self.config.horizon(),
            variables = self.layout.num_variables(),
            rows = constraints.num_rows(),
            bounds = constraints.count(|k| matches!(k, ConstraintKind::ControlBound { .. })),
            dynamics = constraints.count(|k| matches!(k, ConstraintKind::Dynamics { .. })),
            "Trajectory optimizer configured"
        );

        let solver_config = self.config.solver();
        let options = SqpOptions {
            max_iterations: solver_config.max_iterations,
            tolerance: solver_config.tolerance,
            print_level: solver_config.print_level,
            hessian: solver_config.hessian,
            ..SqpOptions::default()
        };
        self.solver = Some(SqpSolver::new(problem, options));

        Ok(())
    }

    /// Solve from `x0` towards `goal` and return the first control
    ///
    /// On success the solved trajectory replaces the warm start. On failure
    /// the warm start is left as it was.
    pub fn solve(
        &mut self,
        x0: &DVector<f64>,
        goal: &DVector<f64>,
    ) -> Result<DVector<f64>, OptimizerError> {
        let solver = self.solver.as_ref().ok_or(OptimizerError::NotConfigured)?;
        let nx = self.layout.nx();
        for (quantity, v) in [("initial state", x0), ("goal", goal)] {
            if v.len() != nx {
                return Err(OptimizerError::DimensionMismatch {
                    quantity,
                    expected: nx,
                    got: v.len(),
                });
            }
        }

        let guess = match &self.warm_start {
            WarmStart::NotYetSolved => {
                self.layout.pack(&Trajectory::constant(x0, self.layout.nu(), self.layout.horizon()))
            }
            WarmStart::Previous(trajectory) => self.layout.pack(trajectory),
        };
        let problem = solver.problem();
        let p = problem.parameters().pack(x0, goal);
        let constraints = problem.constraint_set();

        let start = Instant::now();
        let solution = solver.solve(&guess, &p, constraints.lbg(), constraints.ubg())?;
        let solve_time = start.elapsed();

        self.statistics = Some(SolveStatistics {
            status: solution.status,
            iterations: solution.iterations,
            qp_iterations: solution.qp_iterations,
            objective: solution.objective,
            primal_infeasibility: solution.primal_infeasibility,
            dual_infeasibility: solution.dual_infeasibility,
            solve_time,
        });

        if !solution.status.is_success() {
            warn!(
                status = %solution.status,
                iterations = solution.iterations,
                primal_infeasibility = solution.primal_infeasibility,
                "Trajectory optimization did not converge"
            );
            return Err(OptimizerError::NonConvergent {
                status: solution.status,
                iterations: solution.iterations,
            });
        }

        debug!(
            iterations = solution.iterations,
            qp_iterations = solution.qp_iterations,
            objective = solution.objective,
            solve_time_ms = solve_time.as_secs_f64() * 1e3,
            "Trajectory optimization converged"
        );

        let trajectory = self.layout.unpack(&solution.x);
        let first_control = trajectory.controls()[0].clone();
        self.warm_start = WarmStart::Previous(trajectory);
        self.goal = Some(goal.clone());

        Ok(first_control)
    }

    /// Forget the stored solution; the next solve starts cold
    pub fn reset_warm_start(&mut self) {
        self.warm_start = WarmStart::NotYetSolved;
    }

    pub fn phase(&self) -> OptimizerPhase {
        if self.solver.is_some() {
            OptimizerPhase::Ready
        } else {
            OptimizerPhase::Unconfigured
        }
    }

    pub fn warm_start(&self) -> &WarmStart {
        &self.warm_start
    }

    /// Last converged trajectory
    pub fn trajectory(&self) -> Option<&Trajectory> {
        match &self.warm_start {
            WarmStart::Previous(trajectory) => Some(trajectory),
            WarmStart::NotYetSolved => None,
        }
    }

    /// N+1 states of the last converged trajectory
    pub fn state_trajectory(&self) -> Option<&[DVector<f64>]> {
        self.trajectory().map(Trajectory::states)
    }

    /// N controls of the last converged trajectory
    pub fn control_trajectory(&self) -> Option<&[DVector<f64>]> {
        self.trajectory().map(Trajectory::controls)
    }

    /// Goal of the last converged solve
    pub fn goal(&self) -> Option<&DVector<f64>> {
        self.goal.as_ref()
    }

    /// Statistics of the last solve attempt, converged or not
    pub fn statistics(&self) -> Option<&SolveStatistics> {
        self.statistics.as_ref()
    }

    pub fn layout(&self) -> &DecisionLayout {
        &self.layout
    }

    /// Constraint set, available once configured
    pub fn constraint_set(&self) -> Option<&ConstraintSet> {
        self.solver.as_ref().map(|s| s.problem().constraint_set())
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    pub fn config(&self) -> &Arc<OcpConfig> {
        &self.config
    }
}
