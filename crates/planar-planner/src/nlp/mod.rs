//! Nonlinear programming
//!
//! - [`NlpProblem`]: parametric NLP with sparse first and second derivatives
//! - [`SqpSolver`]: sequential quadratic programming for it
//! - [`qp`]: the convex QP subproblem behind each step, solved by Clarabel

pub mod problem;
pub mod qp;
pub mod sqp;

pub use problem::NlpProblem;
pub use qp::{QpError, QpSettings};
pub use sqp::{HessianApproximation, NlpError, NlpSolution, SolveStatus, SqpOptions, SqpSolver};
