//! Planner configuration
//!
//! [`OcpConfigParams`] is plain serde data; [`OcpConfig`] is the validated,
//! immutable form the optimizer consumes. Every check happens in the
//! conversion, so an `OcpConfig` that exists is always usable.

use nalgebra::DMatrix;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::nlp::HessianApproximation;

/// Relative tolerance for the symmetry and semidefiniteness checks
const MATRIX_TOLERANCE: f64 = 1e-9;

/// Configuration errors, raised at construction time
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Horizon must contain at least one stage")]
    ZeroHorizon,
    #[error("Sampling time must be positive and finite, got {0}")]
    InvalidSamplingTime(f64),
    #[error("Weight matrix {name} is empty")]
    EmptyWeights { name: &'static str },
    #[error("Weight matrix {name} row {row} has {got} entries, expected {expected}")]
    RaggedWeights {
        name: &'static str,
        row: usize,
        expected: usize,
        got: usize,
    },
    #[error("Weight matrix {name} must be {expected}x{expected}, got {rows}x{cols}")]
    WeightDimension {
        name: &'static str,
        expected: usize,
        rows: usize,
        cols: usize,
    },
    #[error("Weight matrix {name} contains a non-finite entry")]
    NonFiniteWeights { name: &'static str },
    #[error("Weight matrix {name} is not symmetric")]
    NotSymmetric { name: &'static str },
    #[error("Weight matrix {name} is not positive semidefinite (min eigenvalue {min_eigenvalue})")]
    NotPositiveSemidefinite {
        name: &'static str,
        min_eigenvalue: f64,
    },
    #[error("Expected bounds for {expected} control channels, got {got}")]
    BoundCount { expected: usize, got: usize },
    #[error("Invalid bounds on control channel {channel}: [{min}, {max}]")]
    InvalidBounds { channel: usize, min: f64, max: f64 },
    #[error("Invalid solver setting {name}: {value}")]
    InvalidSolverSetting { name: &'static str, value: f64 },
}

/// Weight matrix, diagonal or dense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weights {
    /// Diagonal entries only
    Diagonal(Vec<f64>),
    /// Full matrix, row-major
    Dense(Vec<Vec<f64>>),
}

impl Weights {
    /// Build the matrix, checking shape only
    fn to_matrix(&self, name: &'static str) -> Result<DMatrix<f64>, ConfigError> {
        match self {
            Weights::Diagonal(diag) => {
                if diag.is_empty() {
                    return Err(ConfigError::EmptyWeights { name });
                }
                Ok(DMatrix::from_diagonal(&nalgebra::DVector::from_column_slice(diag)))
            }
            Weights::Dense(rows) => {
                let n_rows = rows.len();
                let n_cols = rows.first().map_or(0, Vec::len);
                if n_rows == 0 || n_cols == 0 {
                    return Err(ConfigError::EmptyWeights { name });
                }
                for (row, entries) in rows.iter().enumerate() {
                    if entries.len() != n_cols {
                        return Err(ConfigError::RaggedWeights {
                            name,
                            row,
                            expected: n_cols,
                            got: entries.len(),
                        });
                    }
                }
                Ok(DMatrix::from_fn(n_rows, n_cols, |i, j| rows[i][j]))
            }
        }
    }
}

/// Inclusive bounds on one control channel
///
/// Infinite values leave that side unconstrained. In serialized form an
/// unconstrained side is `null` or simply absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelBounds {
    #[serde(
        default = "unbounded_below",
        serialize_with = "serialize_bound",
        deserialize_with = "deserialize_lower"
    )]
    pub min: f64,
    #[serde(
        default = "unbounded_above",
        serialize_with = "serialize_bound",
        deserialize_with = "deserialize_upper"
    )]
    pub max: f64,
}

fn unbounded_below() -> f64 {
    f64::NEG_INFINITY
}

fn unbounded_above() -> f64 {
    f64::INFINITY
}

fn serialize_bound<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_infinite() {
        serializer.serialize_none()
    } else {
        serializer.serialize_some(value)
    }
}

fn deserialize_lower<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NEG_INFINITY))
}

fn deserialize_upper<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
}

impl ChannelBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// [-limit, limit]
    pub fn symmetric(limit: f64) -> Self {
        Self::new(-limit, limit)
    }

    /// Unconstrained channel
    pub fn free() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY)
    }

    /// max - min
    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, value: f64, tolerance: f64) -> bool {
        value >= self.min - tolerance && value <= self.max + tolerance
    }

    /// Ordered, NaN-free, and with room for at least one finite value
    fn is_valid(&self) -> bool {
        !self.min.is_nan()
            && !self.max.is_nan()
            && self.min <= self.max
            && self.min != f64::INFINITY
            && self.max != f64::NEG_INFINITY
    }
}

/// NLP solver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum SQP iterations per solve
    pub max_iterations: usize,
    /// Convergence tolerance on feasibility and scaled stationarity
    pub tolerance: f64,
    /// 0 = silent, 1 = per-iteration lines at debug level
    pub print_level: u8,
    /// Model Hessian of the QP subproblems
    pub hessian: HessianApproximation,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-8,
            print_level: 0,
            hessian: HessianApproximation::Exact,
        }
    }
}

/// Raw OCP configuration as read from a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcpConfigParams {
    /// Number of shooting intervals N
    pub horizon: usize,
    /// Discretization period [s]
    pub sampling_time: f64,
    /// Stage state weight Q (nx × nx)
    pub state_weights: Weights,
    /// Terminal state weight Q_e (nx × nx)
    pub terminal_weights: Weights,
    /// Control weight R (nu × nu)
    pub control_weights: Weights,
    /// One entry per control channel
    pub actuator_bounds: Vec<ChannelBounds>,
    #[serde(default)]
    pub solver: SolverConfig,
}

impl OcpConfigParams {
    /// Reference rocket configuration
    ///
    /// Thrust in [0, 15] N, gimbal in [-0.5, 0.5] rad, 50 stages.
    pub fn rocket(sampling_time: f64) -> Self {
        Self {
            horizon: 50,
            sampling_time,
            state_weights: Weights::Diagonal(vec![10.0, 10.0, 1.0, 1.0, 50.0, 1.0]),
            terminal_weights: Weights::Diagonal(vec![50.0, 50.0, 1.0, 1.0, 100.0, 1.0]),
            control_weights: Weights::Diagonal(vec![0.01, 0.01]),
            actuator_bounds: vec![ChannelBounds::new(0.0, 15.0), ChannelBounds::symmetric(0.5)],
            solver: SolverConfig::default(),
        }
    }

    /// Bi-rotor drone configuration, each rotor in [0, 5] N
    pub fn drone(sampling_time: f64) -> Self {
        Self {
            horizon: 50,
            sampling_time,
            state_weights: Weights::Diagonal(vec![10.0, 10.0, 1.0, 1.0, 10.0, 1.0]),
            terminal_weights: Weights::Diagonal(vec![50.0, 50.0, 1.0, 1.0, 50.0, 1.0]),
            control_weights: Weights::Diagonal(vec![0.01, 0.01]),
            actuator_bounds: vec![ChannelBounds::new(0.0, 5.0); 2],
            solver: SolverConfig::default(),
        }
    }

    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }
}

/// Validated OCP configuration
///
/// Dimensions are taken from the weights: `nx` from Q, `nu` from R.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "OcpConfigParams", into = "OcpConfigParams")]
pub struct OcpConfig {
    params: OcpConfigParams,
    q: DMatrix<f64>,
    q_terminal: DMatrix<f64>,
    r: DMatrix<f64>,
}

impl OcpConfig {
    /// Reference rocket configuration at the given sampling time
    pub fn rocket(sampling_time: f64) -> Result<Self, ConfigError> {
        Self::try_from(OcpConfigParams::rocket(sampling_time))
    }

    /// Drone configuration at the given sampling time
    pub fn drone(sampling_time: f64) -> Result<Self, ConfigError> {
        Self::try_from(OcpConfigParams::drone(sampling_time))
    }

    /// Number of shooting intervals N
    pub fn horizon(&self) -> usize {
        self.params.horizon
    }

    pub fn sampling_time(&self) -> f64 {
        self.params.sampling_time
    }

    /// Horizon length in seconds
    pub fn horizon_time(&self) -> f64 {
        self.params.horizon as f64 * self.params.sampling_time
    }

    pub fn nx(&self) -> usize {
        self.q.nrows()
    }

    pub fn nu(&self) -> usize {
        self.r.nrows()
    }

    /// Stage state weight Q
    pub fn state_weight(&self) -> &DMatrix<f64> {
        &self.q
    }

    /// Terminal state weight Q_e
    pub fn terminal_weight(&self) -> &DMatrix<f64> {
        &self.q_terminal
    }

    /// Control weight R
    pub fn control_weight(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn actuator_bounds(&self) -> &[ChannelBounds] {
        &self.params.actuator_bounds
    }

    pub fn solver(&self) -> &SolverConfig {
        &self.params.solver
    }

    pub fn params(&self) -> &OcpConfigParams {
        &self.params
    }
}

impl TryFrom<OcpConfigParams> for OcpConfig {
    type Error = ConfigError;

    fn try_from(params: OcpConfigParams) -> Result<Self, Self::Error> {
        if params.horizon == 0 {
            return Err(ConfigError::ZeroHorizon);
        }
        if !(params.sampling_time.is_finite() && params.sampling_time > 0.0) {
            return Err(ConfigError::InvalidSamplingTime(params.sampling_time));
        }

        let q = params.state_weights.to_matrix("Q")?;
        let nx = q.nrows();
        let q = validate_weight("Q", q, nx)?;
        let q_terminal = validate_weight("Q_e", params.terminal_weights.to_matrix("Q_e")?, nx)?;

        let r = params.control_weights.to_matrix("R")?;
        let nu = r.nrows();
        let r = validate_weight("R", r, nu)?;

        if params.actuator_bounds.len() != nu {
            return Err(ConfigError::BoundCount {
                expected: nu,
                got: params.actuator_bounds.len(),
            });
        }
        for (channel, bounds) in params.actuator_bounds.iter().enumerate() {
            if !bounds.is_valid() {
                return Err(ConfigError::InvalidBounds {
                    channel,
                    min: bounds.min,
                    max: bounds.max,
                });
            }
        }

        let solver = &params.solver;
        if solver.max_iterations == 0 {
            return Err(ConfigError::InvalidSolverSetting {
                name: "max_iterations",
                value: 0.0,
            });
        }
        if !(solver.tolerance.is_finite() && solver.tolerance > 0.0) {
            return Err(ConfigError::InvalidSolverSetting {
                name: "tolerance",
                value: solver.tolerance,
            });
        }

        Ok(Self {
            params,
            q,
            q_terminal,
            r,
        })
    }
}

impl From<OcpConfig> for OcpConfigParams {
    fn from(config: OcpConfig) -> Self {
        config.params
    }
}

/// Square, finite, symmetric and positive semidefinite
fn validate_weight(
    name: &'static str,
    m: DMatrix<f64>,
    dim: usize,
) -> Result<DMatrix<f64>, ConfigError> {
    if m.nrows() != dim || m.ncols() != dim {
        return Err(ConfigError::WeightDimension {
            name,
            expected: dim,
            rows: m.nrows(),
            cols: m.ncols(),
        });
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(ConfigError::NonFiniteWeights { name });
    }

    let scale = m.amax().max(1.0);
    if (&m - m.transpose()).amax() > MATRIX_TOLERANCE * scale {
        return Err(ConfigError::NotSymmetric { name });
    }

    let min_eigenvalue = m.clone().symmetric_eigen().eigenvalues.min();
    if min_eigenvalue < -MATRIX_TOLERANCE * scale {
        return Err(ConfigError::NotPositiveSemidefinite {
            name,
            min_eigenvalue,
        });
    }

    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rocket_preset() {
        let config = OcpConfig::rocket(0.05).unwrap();

        assert_eq!(config.horizon(), 50);
        assert_eq!(config.nx(), 6);
        assert_eq!(config.nu(), 2);
        assert_relative_eq!(config.horizon_time(), 2.5, epsilon = 1e-12);
        assert_relative_eq!(config.state_weight()[(4, 4)], 50.0);
        assert_relative_eq!(config.terminal_weight()[(4, 4)], 100.0);
        assert_relative_eq!(config.control_weight()[(1, 1)], 0.01);
        assert_eq!(config.actuator_bounds()[0], ChannelBounds::new(0.0, 15.0));
        assert_relative_eq!(config.actuator_bounds()[1].range(), 1.0);
        assert_eq!(config.solver().max_iterations, 1000);
        assert_eq!(config.solver().print_level, 0);
    }

    #[test]
    fn test_dense_weights_accepted() {
        let mut params = OcpConfigParams::rocket(0.05);
        params.control_weights = Weights::Dense(vec![vec![1.0, 0.5], vec![0.5, 1.0]]);

        let config = OcpConfig::try_from(params).unwrap();
        assert_relative_eq!(config.control_weight()[(0, 1)], 0.5);
    }

    #[test]
    fn test_zero_horizon_rejected() {
        let params = OcpConfigParams::rocket(0.05).with_horizon(0);
        assert_eq!(OcpConfig::try_from(params).unwrap_err(), ConfigError::ZeroHorizon);
    }

    #[test]
    fn test_sampling_time_rejected() {
        for dt in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            let err = OcpConfig::rocket(dt).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidSamplingTime(_)));
        }
    }

    #[test]
    fn test_terminal_weight_dimension_rejected() {
        let mut params = OcpConfigParams::rocket(0.05);
        params.terminal_weights = Weights::Diagonal(vec![1.0; 5]);

        assert_eq!(
            OcpConfig::try_from(params).unwrap_err(),
            ConfigError::WeightDimension { name: "Q_e", expected: 6, rows: 5, cols: 5 }
        );
    }

    #[test]
    fn test_non_square_rejected() {
        let mut params = OcpConfigParams::rocket(0.05);
        params.control_weights = Weights::Dense(vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);

        assert!(matches!(
            OcpConfig::try_from(params).unwrap_err(),
            ConfigError::WeightDimension { name: "R", .. }
        ));
    }

    #[test]
    fn test_ragged_rejected() {
        let mut params = OcpConfigParams::rocket(0.05);
        params.control_weights = Weights::Dense(vec![vec![1.0, 0.0], vec![0.0]]);

        assert!(matches!(
            OcpConfig::try_from(params).unwrap_err(),
            ConfigError::RaggedWeights { name: "R", row: 1, .. }
        ));
    }

    #[test]
    fn test_asymmetric_rejected() {
        let mut params = OcpConfigParams::rocket(0.05);
        params.control_weights = Weights::Dense(vec![vec![1.0, 0.2], vec![0.0, 1.0]]);

        assert_eq!(
            OcpConfig::try_from(params).unwrap_err(),
            ConfigError::NotSymmetric { name: "R" }
        );
    }

    #[test]
    fn test_indefinite_rejected() {
        let mut params = OcpConfigParams::rocket(0.05);
        params.state_weights = Weights::Diagonal(vec![10.0, 10.0, 1.0, -1.0, 50.0, 1.0]);

        match OcpConfig::try_from(params).unwrap_err() {
            ConfigError::NotPositiveSemidefinite { name, min_eigenvalue } => {
                assert_eq!(name, "Q");
                assert_relative_eq!(min_eigenvalue, -1.0, epsilon = 1e-9);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_semidefinite_accepted() {
        let mut params = OcpConfigParams::rocket(0.05);
        params.state_weights = Weights::Diagonal(vec![10.0, 10.0, 0.0, 0.0, 50.0, 0.0]);
        assert!(OcpConfig::try_from(params).is_ok());
    }

    #[test]
    fn test_bounds_rejected() {
        let mut params = OcpConfigParams::rocket(0.05);
        params.actuator_bounds.pop();
        assert_eq!(
            OcpConfig::try_from(params).unwrap_err(),
            ConfigError::BoundCount { expected: 2, got: 1 }
        );

        let mut params = OcpConfigParams::rocket(0.05);
        params.actuator_bounds[1] = ChannelBounds::new(0.5, -0.5);
        assert!(matches!(
            OcpConfig::try_from(params).unwrap_err(),
            ConfigError::InvalidBounds { channel: 1, .. }
        ));

        let mut params = OcpConfigParams::rocket(0.05);
        params.actuator_bounds[0] = ChannelBounds::new(f64::NAN, 1.0);
        assert!(OcpConfig::try_from(params).is_err());

        for bounds in [
            ChannelBounds::new(f64::INFINITY, f64::INFINITY),
            ChannelBounds::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            ChannelBounds::new(f64::INFINITY, f64::NEG_INFINITY),
        ] {
            let mut params = OcpConfigParams::rocket(0.05);
            params.actuator_bounds[0] = bounds;
            assert!(matches!(
                OcpConfig::try_from(params).unwrap_err(),
                ConfigError::InvalidBounds { channel: 0, .. }
            ));
        }
    }

    #[test]
    fn test_unbounded_side_serialized_as_null() {
        let bounds = ChannelBounds::new(0.0, f64::INFINITY);
        let json = serde_json::to_string(&bounds).unwrap();
        assert_eq!(json, r#"{"min":0.0,"max":null}"#);
        assert_eq!(serde_json::from_str::<ChannelBounds>(&json).unwrap(), bounds);

        let lower_only: ChannelBounds = serde_json::from_str(r#"{"min":-1.5}"#).unwrap();
        assert_eq!(lower_only, ChannelBounds::new(-1.5, f64::INFINITY));

        let free: ChannelBounds = serde_json::from_str("{}").unwrap();
        assert_eq!(free, ChannelBounds::free());
        assert_eq!(serde_json::to_string(&free).unwrap(), r#"{"min":null,"max":null}"#);
    }

    #[test]
    fn test_one_sided_bounds_accepted() {
        let mut params = OcpConfigParams::rocket(0.05);
        params.actuator_bounds[0] = ChannelBounds::new(0.0, f64::INFINITY);
        params.actuator_bounds[1] = ChannelBounds::free();
        assert!(OcpConfig::try_from(params).is_ok());
    }

    #[test]
    fn test_solver_settings_rejected() {
        let params = OcpConfigParams::rocket(0.05).with_solver(SolverConfig {
            tolerance: 0.0,
            ..SolverConfig::default()
        });
        assert!(matches!(
            OcpConfig::try_from(params).unwrap_err(),
            ConfigError::InvalidSolverSetting { name: "tolerance", .. }
        ));
    }

    #[test]
    fn test_solver_hessian_setting() {
        let solver: SolverConfig = serde_json::from_str(r#"{"max_iterations":50}"#).unwrap();
        assert_eq!(solver.hessian, HessianApproximation::Exact);
        assert_eq!(solver.max_iterations, 50);

        let solver: SolverConfig = serde_json::from_str(r#"{"hessian":"gauss_newton"}"#).unwrap();
        assert_eq!(solver.hessian, HessianApproximation::GaussNewton);
    }
}
