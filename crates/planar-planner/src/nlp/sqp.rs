//! Sequential quadratic programming
//!
//! Each iteration replaces the NLP by a convex QP around the current point
//! (see [`qp`](super::qp)) and moves along its solution:
//!
//! - the model Hessian is the full Lagrangian Hessian (the default),
//!   convexified by [`QpLayout::convexify`](super::qp), or the objective
//!   Hessian alone (Gauss-Newton)
//! - QP multipliers become the NLP multiplier estimate
//! - an ℓ1 exact-penalty merit function with backtracking and one
//!   second-order correction accepts or shortens the step
//!
//! The run stops once the iterate is feasible and either the stationarity
//! residual ‖∇f + Jᵀλ‖∞ or the QP step is below tolerance.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use super::problem::NlpProblem;
use super::qp::{ConvexHessian, QpError, QpLayout, QpSettings, QpStep, Regularization, RowKind};

/// Model Hessian used for the QP subproblems
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HessianApproximation {
    /// ∇²f + Σ λᵢ ∇²gᵢ with the last QP multipliers
    #[default]
    Exact,
    /// ∇²f only; convex for least-squares objectives
    GaussNewton,
}

/// SQP options
#[derive(Debug, Clone)]
pub struct SqpOptions {
    /// Maximum number of SQP iterations
    pub max_iterations: usize,
    /// Termination tolerance on feasibility and scaled stationarity
    pub tolerance: f64,
    /// 0 = silent, otherwise one debug line per iteration
    pub print_level: u8,
    pub hessian: HessianApproximation,
    /// Limits of each QP solve
    pub qp: QpSettings,
    /// Stationarity is scaled by max(1, ‖∇f‖∞ / gradient_scale)
    pub gradient_scale: f64,
    /// Armijo sufficient-decrease constant
    pub armijo_eta: f64,
    /// Smallest backtracking step before giving up on the merit function
    pub alpha_min: f64,
    /// Penalty parameter kept this far above ‖λ‖∞
    pub penalty_margin: f64,
    /// Consecutive unguarded steps allowed after line-search failures
    pub max_line_search_failures: usize,
}

impl Default for SqpOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-8,
            print_level: 0,
            hessian: HessianApproximation::default(),
            qp: QpSettings::default(),
            gradient_scale: 100.0,
            armijo_eta: 1e-4,
            alpha_min: 1e-10,
            penalty_margin: 1.0,
            max_line_search_failures: 5,
        }
    }
}

/// Termination status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// Feasible and stationary to tolerance
    Success,
    /// Iteration limit reached
    MaxIterationsExceeded,
    /// A QP subproblem could not be set up or solved
    QpFailure,
    /// NaN or infinity in a problem function
    InvalidNumberDetected,
    /// The merit function stopped decreasing along QP steps
    LineSearchFailed,
}

impl SolveStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SolveStatus::Success)
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SolveStatus::Success => "success",
            SolveStatus::MaxIterationsExceeded => "maximum iterations exceeded",
            SolveStatus::QpFailure => "QP failure",
            SolveStatus::InvalidNumberDetected => "invalid number detected",
            SolveStatus::LineSearchFailed => "line search failed",
        };
        f.write_str(text)
    }
}

/// Rejected solver inputs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NlpError {
    #[error("Invalid {quantity} length: expected {expected}, got {got}")]
    DimensionMismatch {
        quantity: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Invalid bounds on constraint row {row}: [{lower}, {upper}]")]
    InvalidBounds { row: usize, lower: f64, upper: f64 },
    #[error("Non-finite entry in {0}")]
    NonFiniteInput(&'static str),
}

/// Result of one solve
#[derive(Debug, Clone)]
pub struct NlpSolution {
    pub status: SolveStatus,
    /// Last accepted iterate
    pub x: Vec<f64>,
    /// Constraint multipliers, ∇f + Jᵀλ = 0 at a solution
    pub lambda: Vec<f64>,
    pub objective: f64,
    /// SQP iterations
    pub iterations: usize,
    /// QP solver iterations summed over the run
    pub qp_iterations: usize,
    /// Largest constraint violation
    pub primal_infeasibility: f64,
    /// ‖∇f + Jᵀλ‖∞
    pub dual_infeasibility: f64,
}

/// Function values at one point
struct Evaluation {
    objective: f64,
    gradient: Vec<f64>,
    g: Vec<f64>,
    jacobian: Vec<f64>,
}

impl Evaluation {
    fn is_finite(&self) -> bool {
        self.objective.is_finite()
            && self.gradient.iter().all(|v| v.is_finite())
            && self.g.iter().all(|v| v.is_finite())
            && self.jacobian.iter().all(|v| v.is_finite())
    }
}

/// SQP solver bound to one problem structure
pub struct SqpSolver<P> {
    problem: P,
    options: SqpOptions,
    jacobian_structure: Vec<(usize, usize)>,
    hessian_structure: Vec<(usize, usize)>,
}

impl<P: NlpProblem> SqpSolver<P> {
    /// Query the derivative structure once
    pub fn new(problem: P, options: SqpOptions) -> Self {
        let jacobian_structure = problem.jacobian_structure();
        let hessian_structure = problem.hessian_structure();

        debug!(
            n = problem.num_variables(),
            m = problem.num_constraints(),
            jacobian_nnz = jacobian_structure.len(),
            hessian_nnz = hessian_structure.len(),
            hessian = ?options.hessian,
            "SQP solver created"
        );

        Self {
            problem,
            options,
            jacobian_structure,
            hessian_structure,
        }
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    pub fn options(&self) -> &SqpOptions {
        &self.options
    }

    /// Solve from `x_init` with parameters `p` and row bounds `lbg`/`ubg`
    ///
    /// Input errors are returned as [`NlpError`]; every run that starts
    /// returns a solution whose `status` tells whether it converged.
    pub fn solve(
        &self,
        x_init: &[f64],
        p: &[f64],
        lbg: &[f64],
        ubg: &[f64],
    ) -> Result<NlpSolution, NlpError> {
        let n = self.problem.num_variables();
        let m = self.problem.num_constraints();
        check_length("initial guess", n, x_init.len())?;
        check_length("parameter vector", self.problem.num_parameters(), p.len())?;
        check_length("lower constraint bounds", m, lbg.len())?;
        check_length("upper constraint bounds", m, ubg.len())?;
        if x_init.iter().any(|v| !v.is_finite()) {
            return Err(NlpError::NonFiniteInput("initial guess"));
        }
        if p.iter().any(|v| !v.is_finite()) {
            return Err(NlpError::NonFiniteInput("parameter vector"));
        }
        let rows = lbg
            .iter()
            .zip(ubg)
            .enumerate()
            .map(|(row, (&lower, &upper))| {
                RowKind::classify(lower, upper).ok_or(NlpError::InvalidBounds { row, lower, upper })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Run::new(self, p, rows).execute(x_init))
    }
}

fn check_length(quantity: &'static str, expected: usize, got: usize) -> Result<(), NlpError> {
    if expected != got {
        return Err(NlpError::DimensionMismatch {
            quantity,
            expected,
            got,
        });
    }
    Ok(())
}

/// An accepted trial point
struct Accepted {
    x: Vec<f64>,
    eval: Evaluation,
    alpha: f64,
}

/// State of a single solve
struct Run<'a, P> {
    solver: &'a SqpSolver<P>,
    p: &'a [f64],
    rows: Vec<RowKind>,
    qp: QpLayout,
    penalty: f64,
    regularization: Regularization,
    qp_iterations: usize,
}

impl<'a, P: NlpProblem> Run<'a, P> {
    fn new(solver: &'a SqpSolver<P>, p: &'a [f64], rows: Vec<RowKind>) -> Self {
        let qp = QpLayout::new(
            solver.problem.num_variables(),
            &rows,
            &solver.jacobian_structure,
        );
        Self {
            solver,
            p,
            rows,
            qp,
            penalty: 0.0,
            regularization: Regularization::default(),
            qp_iterations: 0,
        }
    }

    fn opts(&self) -> &SqpOptions {
        &self.solver.options
    }

    fn execute(mut self, x_init: &[f64]) -> NlpSolution {
        let mut x = x_init.to_vec();
        let mut eval = self.evaluate(&x);
        let mut lambda = vec![0.0; self.rows.len()];
        let mut failures = 0;
        let mut iteration = 0;

        trace!(qp_rows = self.qp.num_rows(), "SQP run started");

        let status = loop {
            if !eval.is_finite() {
                break SolveStatus::InvalidNumberDetected;
            }

            let (hessian, qp_step) = match self.subproblem(&x, &eval, &lambda) {
                Ok(solved) => solved,
                Err(err) => {
                    debug!(iteration, error = %err, "QP subproblem failed");
                    break SolveStatus::QpFailure;
                }
            };
            lambda = qp_step.multipliers.clone();

            let inf_pr = self.primal_infeasibility(&eval.g);
            let inf_du = self.dual_infeasibility(&eval, &lambda);
            let step = max_abs(&qp_step.step);
            self.log_iteration(iteration, &eval, inf_pr, inf_du, step);

            if self.converged(&x, &eval, inf_pr, inf_du, step) {
                break SolveStatus::Success;
            }
            if iteration >= self.opts().max_iterations {
                break SolveStatus::MaxIterationsExceeded;
            }

            match self.line_search(&x, &eval, &hessian, &qp_step) {
                Some(accepted) => {
                    trace!(iteration, alpha = accepted.alpha, "Step accepted");
                    x = accepted.x;
                    eval = accepted.eval;
                    failures = 0;
                }
                None => {
                    failures += 1;
                    if failures > self.opts().max_line_search_failures {
                        break SolveStatus::LineSearchFailed;
                    }
                    debug!(iteration, failures, "Line search failed; taking the full step");
                    x = axpy(&x, 1.0, &qp_step.step);
                    eval = self.evaluate(&x);
                }
            }
            iteration += 1;
        };

        self.finish(status, iteration, x, &eval, lambda)
    }

    fn evaluate(&self, x: &[f64]) -> Evaluation {
        let problem = &self.solver.problem;
        let mut gradient = vec![0.0; problem.num_variables()];
        let mut g = vec![0.0; problem.num_constraints()];
        let mut jacobian = vec![0.0; self.solver.jacobian_structure.len()];

        problem.objective_gradient(x, self.p, &mut gradient);
        problem.constraints(x, self.p, &mut g);
        problem.jacobian_values(x, self.p, &mut jacobian);

        Evaluation {
            objective: problem.objective(x, self.p),
            gradient,
            g,
            jacobian,
        }
    }

    /// Convex model Hessian at `x`
    fn model_hessian(
        &mut self,
        x: &[f64],
        eval: &Evaluation,
        lambda: &[f64],
    ) -> Result<ConvexHessian, QpError> {
        let problem = &self.solver.problem;
        let mut values = vec![0.0; self.solver.hessian_structure.len()];
        match self.opts().hessian {
            HessianApproximation::GaussNewton => {
                let zeros = vec![0.0; lambda.len()];
                problem.hessian_values(x, self.p, 1.0, &zeros, &mut values);
            }
            HessianApproximation::Exact => {
                problem.hessian_values(x, self.p, 1.0, lambda, &mut values);
            }
        }

        let hessian = self.qp.convexify(
            &self.solver.hessian_structure,
            &values,
            &self.solver.jacobian_structure,
            &eval.jacobian,
            self.regularization,
        )?;
        if hessian.regularization != self.regularization {
            trace!(
                rho = hessian.regularization.rho,
                shift = hessian.regularization.shift,
                "Hessian regularization changed"
            );
        }
        self.regularization = hessian.regularization;
        Ok(hessian)
    }

    fn subproblem(
        &mut self,
        x: &[f64],
        eval: &Evaluation,
        lambda: &[f64],
    ) -> Result<(ConvexHessian, QpStep), QpError> {
        let hessian = self.model_hessian(x, eval, lambda)?;
        let step = self.qp.solve(
            &hessian,
            &eval.gradient,
            &self.solver.jacobian_structure,
            &eval.jacobian,
            &eval.g,
            &self.opts().qp,
        )?;
        self.qp_iterations += step.iterations;
        Ok((hessian, step))
    }

    fn primal_infeasibility(&self, g: &[f64]) -> f64 {
        self.rows
            .iter()
            .zip(g)
            .fold(0.0, |acc, (row, &g)| acc.max(row.violation(g)))
    }

    fn total_violation(&self, g: &[f64]) -> f64 {
        self.rows.iter().zip(g).map(|(row, &g)| row.violation(g)).sum()
    }

    /// ‖∇f + Jᵀλ‖∞
    fn dual_infeasibility(&self, eval: &Evaluation, lambda: &[f64]) -> f64 {
        let mut residual = eval.gradient.clone();
        for (&(row, col), &value) in self.solver.jacobian_structure.iter().zip(&eval.jacobian) {
            residual[col] += value * lambda[row];
        }
        max_abs(&residual)
    }

    fn converged(&self, x: &[f64], eval: &Evaluation, inf_pr: f64, inf_du: f64, step: f64) -> bool {
        let tolerance = self.opts().tolerance;
        if inf_pr > tolerance {
            return false;
        }
        let scale = (max_abs(&eval.gradient) / self.opts().gradient_scale).max(1.0);
        inf_du <= tolerance * scale || step <= tolerance * (1.0 + max_abs(x))
    }

    fn merit(&self, objective: f64, g: &[f64]) -> f64 {
        objective + self.penalty * self.total_violation(g)
    }

    /// Backtracking on the ℓ1 merit function
    fn line_search(
        &mut self,
        x: &[f64],
        eval: &Evaluation,
        hessian: &ConvexHessian,
        qp_step: &QpStep,
    ) -> Option<Accepted> {
        let required = max_abs(&qp_step.multipliers) + self.opts().penalty_margin;
        if self.penalty < required {
            self.penalty = required;
        }

        let d = &qp_step.step;
        let violation = self.total_violation(&eval.g);
        let merit = self.merit(eval.objective, &eval.g);
        let slope = dot(&eval.gradient, d) - self.penalty * violation;
        let eta = self.opts().armijo_eta;

        let mut alpha = 1.0;
        while alpha >= self.opts().alpha_min {
            let trial = axpy(x, alpha, d);
            let trial_eval = self.evaluate(&trial);
            if trial_eval.is_finite() {
                let trial_merit = self.merit(trial_eval.objective, &trial_eval.g);
                if trial_merit <= merit + eta * alpha * slope.min(0.0)
                    || is_roundoff(trial_merit, merit)
                {
                    return Some(Accepted { x: trial, eval: trial_eval, alpha });
                }
                if alpha == 1.0 {
                    let target = merit + eta * slope.min(0.0);
                    if let Some(accepted) =
                        self.second_order_correction(x, eval, hessian, &trial_eval, d, target)
                    {
                        return Some(accepted);
                    }
                }
            }
            alpha *= 0.5;
        }
        None
    }

    /// Re-solve the QP with constraints linearized around g(x + d) - J d
    fn second_order_correction(
        &mut self,
        x: &[f64],
        eval: &Evaluation,
        hessian: &ConvexHessian,
        trial_eval: &Evaluation,
        d: &[f64],
        target: f64,
    ) -> Option<Accepted> {
        let mut shifted = trial_eval.g.clone();
        for (&(row, col), &value) in self.solver.jacobian_structure.iter().zip(&eval.jacobian) {
            shifted[row] -= value * d[col];
        }

        let correction = self
            .qp
            .solve(
                hessian,
                &eval.gradient,
                &self.solver.jacobian_structure,
                &eval.jacobian,
                &shifted,
                &self.opts().qp,
            )
            .ok()?;
        self.qp_iterations += correction.iterations;

        let candidate = axpy(x, 1.0, &correction.step);
        let candidate_eval = self.evaluate(&candidate);
        if !candidate_eval.is_finite() {
            return None;
        }
        if self.merit(candidate_eval.objective, &candidate_eval.g) <= target {
            trace!("Second-order correction accepted");
            Some(Accepted { x: candidate, eval: candidate_eval, alpha: 1.0 })
        } else {
            None
        }
    }

    fn log_iteration(&self, iteration: usize, eval: &Evaluation, inf_pr: f64, inf_du: f64, step: f64) {
        let objective = eval.objective;
        let penalty = self.penalty;
        if self.opts().print_level > 0 {
            debug!(iteration, objective, inf_pr, inf_du, step, penalty, "sqp");
        } else {
            trace!(iteration, objective, inf_pr, inf_du, step, penalty, "sqp");
        }
    }

    fn finish(
        &self,
        status: SolveStatus,
        iterations: usize,
        x: Vec<f64>,
        eval: &Evaluation,
        lambda: Vec<f64>,
    ) -> NlpSolution {
        NlpSolution {
            status,
            objective: eval.objective,
            iterations,
            qp_iterations: self.qp_iterations,
            primal_infeasibility: self.primal_infeasibility(&eval.g),
            dual_infeasibility: self.dual_infeasibility(eval, &lambda),
            x,
            lambda,
        }
    }
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

/// x + alpha·d
fn axpy(x: &[f64], alpha: f64, d: &[f64]) -> Vec<f64> {
    x.iter().zip(d).map(|(x, d)| x + alpha * d).collect()
}

/// Merit change indistinguishable from rounding
fn is_roundoff(trial: f64, current: f64) -> bool {
    trial - current <= 10.0 * f64::EPSILON * current.abs().max(1.0)
}
