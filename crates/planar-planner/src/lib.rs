//! Planar Trajectory Planner
//!
//! Finite-horizon trajectory optimization for planar vehicles, transcribed
//! by multiple shooting and solved with warm-started sequential quadratic
//! programming.
//!
//! # Architecture
//!
//! ```text
//! minimize    J = Σₖ ‖xₖ - x_goal‖²_Q + ‖uₖ‖²_R + ‖x_N - x_goal‖²_{Q_e}
//! subject to  u_min ≤ uₖ ≤ u_max
//!             x₀ = x_init
//!             xₖ₊₁ = F(xₖ, uₖ)     (one RK4 step of the model)
//! ```
//!
//! # Components
//!
//! - [`config`]: Validated OCP configuration and presets
//! - [`ocp`]: Decision layout and the OCP as a parametric NLP
//! - [`constraints`]: Typed constraint records and their row layout
//! - [`nlp`]: NLP problem interface and SQP solver
//! - [`optimizer`]: Warm-started [`TrajectoryOptimizer`]
//! - [`trajectory`]: State and control trajectories
//! - [`scenarios`]: Reference point-to-point problems

pub mod config;
pub mod constraints;
pub mod nlp;
pub mod ocp;
pub mod optimizer;
pub mod scenarios;
pub mod trajectory;

// Re-exports
pub use config::{ChannelBounds, ConfigError, OcpConfig, OcpConfigParams, SolverConfig, Weights};
pub use ocp::{DecisionLayout, OcpProblem, ParameterLayout};
pub use optimizer::{
    OptimizerError, OptimizerPhase, SolveStatistics, TrajectoryOptimizer, WarmStart,
};
pub use scenarios::Scenario;
pub use trajectory::{Trajectory, TrajectoryError};
