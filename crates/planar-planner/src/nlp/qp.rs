//! Convex QP subproblems
//!
//! Every SQP iteration linearizes the constraints and solves
//!
//! ```text
//! minimize    ½ dᵀ H d + ∇fᵀ d
//! subject to  lbg ≤ c + J d ≤ ubg
//! ```
//!
//! with Clarabel, whose standard form is `A d + s = b` with `s` in a cone.
//! Equality rows go to the zero cone; each finite side of an inequality row
//! becomes one row of the nonnegative cone, negated for lower bounds. Free
//! rows are dropped.
//!
//! Clarabel needs `H ⪰ 0`. [`QpLayout::convexify`] first adds
//! `ρ·JₑᵀJₑ` over the equality rows: the term is constant on the QP's
//! feasible set, so the step is unchanged, and it makes `H` positive
//! definite whenever the reduced Hessian is. Only if no `ρ` on the schedule
//! works is `δI` added as well. A sparse Cholesky factorization decides.

use clarabel::algebra::CscMatrix as ClarabelCsc;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use thiserror::Error;

/// Equality-penalty schedule
const RHO_FIRST: f64 = 1.0;
const RHO_MAX: f64 = 1e6;
/// Diagonal shift schedule, used once ρ is exhausted
const DELTA_FIRST: f64 = 1e-8;
const DELTA_MAX: f64 = 1e20;
/// Growth after a failed factorization
const GROWTH: f64 = 10.0;
/// Shrink applied to the previous value before the next attempt
const SHRINK: f64 = 1.0 / 3.0;

/// QP subproblem failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QpError {
    #[error("Invalid QP solver settings: {0}")]
    Settings(String),
    #[error("QP setup rejected the data: {0}")]
    Setup(String),
    #[error("QP solver stopped with status {0}")]
    NotSolved(String),
    #[error("Hessian could not be convexified (shift above {0:e})")]
    Convexification(f64),
}

/// Classification of one constraint row from its bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum RowKind {
    Equality(f64),
    Inequality { lower: f64, upper: f64 },
    Free,
}

impl RowKind {
    /// `None` for NaN, crossed, or infinite-equality bounds
    pub(crate) fn classify(lower: f64, upper: f64) -> Option<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return None;
        }
        if lower == upper {
            return lower.is_finite().then_some(RowKind::Equality(lower));
        }
        if lower == f64::NEG_INFINITY && upper == f64::INFINITY {
            return Some(RowKind::Free);
        }
        Some(RowKind::Inequality { lower, upper })
    }

    /// Distance of `g` from the admissible interval
    pub(crate) fn violation(&self, g: f64) -> f64 {
        match *self {
            RowKind::Equality(value) => (g - value).abs(),
            RowKind::Inequality { lower, upper } => (lower - g).max(g - upper).max(0.0),
            RowKind::Free => 0.0,
        }
    }
}

/// One row of Clarabel's `A d + s = b`
#[derive(Debug, Clone, Copy)]
struct ConeRow {
    /// NLP constraint row it linearizes
    source: usize,
    /// +1 for equalities and upper bounds, -1 for lower bounds
    sign: f64,
    bound: f64,
}

/// Clarabel solver limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QpSettings {
    pub max_iterations: u32,
    /// Used for the gap and feasibility tolerances alike
    pub tolerance: f64,
}

impl Default for QpSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

/// Solution of one QP subproblem
#[derive(Debug, Clone)]
pub(crate) struct QpStep {
    pub step: Vec<f64>,
    /// Multipliers of the NLP rows, in the sign convention of ∇f + Jᵀλ = 0
    pub multipliers: Vec<f64>,
    pub iterations: usize,
}

/// Terms added to the model Hessian
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Regularization {
    /// Weight of JₑᵀJₑ
    pub rho: f64,
    /// Multiple of the identity
    pub shift: f64,
}

/// A convex model Hessian, upper triangle in Clarabel's format
pub(crate) struct ConvexHessian {
    pub matrix: ClarabelCsc<f64>,
    pub regularization: Regularization,
}

/// Fixed mapping from NLP rows to QP rows for one set of bounds
pub(crate) struct QpLayout {
    num_variables: usize,
    num_constraints: usize,
    rows: Vec<ConeRow>,
    num_equalities: usize,
    /// QP rows generated by each NLP row
    targets: Vec<Vec<usize>>,
    /// Jacobian entry indices of each equality row
    equality_entries: Vec<Vec<usize>>,
}

impl QpLayout {
    pub(crate) fn new(
        num_variables: usize,
        kinds: &[RowKind],
        jacobian_structure: &[(usize, usize)],
    ) -> Self {
        let mut rows = Vec::new();
        for (source, kind) in kinds.iter().enumerate() {
            if let RowKind::Equality(value) = *kind {
                rows.push(ConeRow { source, sign: 1.0, bound: value });
            }
        }
        let num_equalities = rows.len();
        for (source, kind) in kinds.iter().enumerate() {
            if let RowKind::Inequality { lower, upper } = *kind {
                if upper.is_finite() {
                    rows.push(ConeRow { source, sign: 1.0, bound: upper });
                }
                if lower.is_finite() {
                    rows.push(ConeRow { source, sign: -1.0, bound: lower });
                }
            }
        }

        let mut targets = vec![Vec::new(); kinds.len()];
        for (index, row) in rows.iter().enumerate() {
            targets[row.source].push(index);
        }

        let mut equality_entries = vec![Vec::new(); num_equalities];
        for (entry, &(row, _)) in jacobian_structure.iter().enumerate() {
            if let Some(&target) = targets[row].first() {
                if target < num_equalities {
                    equality_entries[target].push(entry);
                }
            }
        }

        Self {
            num_variables,
            num_constraints: kinds.len(),
            rows,
            num_equalities,
            targets,
            equality_entries,
        }
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn cones(&self) -> Vec<SupportedConeT<f64>> {
        let mut cones = Vec::with_capacity(2);
        if self.num_equalities > 0 {
            cones.push(ZeroConeT(self.num_equalities));
        }
        let num_inequalities = self.rows.len() - self.num_equalities;
        if num_inequalities > 0 {
            cones.push(NonnegativeConeT(num_inequalities));
        }
        cones
    }

    fn constraint_matrix(&self, structure: &[(usize, usize)], jacobian: &[f64]) -> ClarabelCsc<f64> {
        let mut coo = CooMatrix::new(self.rows.len(), self.num_variables);
        for (&(row, col), &value) in structure.iter().zip(jacobian) {
            for &target in &self.targets[row] {
                coo.push(target, col, self.rows[target].sign * value);
            }
        }
        to_clarabel(&CscMatrix::from(&coo))
    }

    /// Solve the subproblem linearized around constraint values `c`
    ///
    /// `c` is normally g(x); a second-order correction passes a shifted
    /// value instead.
    pub(crate) fn solve(
        &self,
        hessian: &ConvexHessian,
        gradient: &[f64],
        jacobian_structure: &[(usize, usize)],
        jacobian: &[f64],
        c: &[f64],
        settings: &QpSettings,
    ) -> Result<QpStep, QpError> {
        let a = self.constraint_matrix(jacobian_structure, jacobian);
        let b: Vec<f64> = self
            .rows
            .iter()
            .map(|row| row.sign * (row.bound - c[row.source]))
            .collect();

        let clarabel_settings = DefaultSettingsBuilder::default()
            .max_iter(settings.max_iterations)
            .verbose(false)
            .tol_gap_abs(settings.tolerance)
            .tol_gap_rel(settings.tolerance)
            .tol_feas(settings.tolerance)
            .build()
            .map_err(|err| QpError::Settings(err.to_string()))?;

        let mut solver = DefaultSolver::new(
            &hessian.matrix,
            gradient,
            &a,
            &b,
            &self.cones(),
            clarabel_settings,
        )
        .map_err(|err| QpError::Setup(format!("{err:?}")))?;
        solver.solve();

        let solution = &solver.solution;
        if !matches!(solution.status, SolverStatus::Solved | SolverStatus::AlmostSolved) {
            return Err(QpError::NotSolved(format!("{:?}", solution.status)));
        }

        // ρ·JₑᵀJₑ d moves into the equality multipliers, with Jₑd = b on
        // the zero cone
        let rho = hessian.regularization.rho;
        let mut multipliers = vec![0.0; self.num_constraints];
        for (index, (row, z)) in self.rows.iter().zip(&solution.z).enumerate() {
            multipliers[row.source] += row.sign * z;
            if index < self.num_equalities {
                multipliers[row.source] += rho * b[index];
            }
        }

        Ok(QpStep {
            step: solution.x.clone(),
            multipliers,
            iterations: solution.iterations as usize,
        })
    }

    /// Regularize the Lagrangian Hessian until it is positive definite
    ///
    /// Each schedule restarts from a third of the value used at the last
    /// iterate, or from zero if none was needed.
    pub(crate) fn convexify(
        &self,
        hessian_structure: &[(usize, usize)],
        hessian: &[f64],
        jacobian_structure: &[(usize, usize)],
        jacobian: &[f64],
        previous: Regularization,
    ) -> Result<ConvexHessian, QpError> {
        let n = self.num_variables;
        let mut coo = CooMatrix::new(n, n);
        for (&(row, col), &value) in hessian_structure.iter().zip(hessian) {
            coo.push(row, col, value);
            if row != col {
                coo.push(col, row, value);
            }
        }
        let base = CscMatrix::from(&coo);
        let penalty = (self.num_equalities > 0)
            .then(|| self.equality_gram(jacobian_structure, jacobian));

        let mut rho = restart(previous.rho, RHO_FIRST);
        if let Some(gram) = &penalty {
            loop {
                let candidate = regularized(&base, Some((gram, rho)), 0.0);
                if CscCholesky::factor(&candidate).is_ok() {
                    return Ok(ConvexHessian {
                        matrix: upper_triangle(&candidate),
                        regularization: Regularization { rho, shift: 0.0 },
                    });
                }
                rho = grow(rho, RHO_FIRST);
                if rho > RHO_MAX {
                    rho = RHO_MAX;
                    break;
                }
            }
        } else {
            let candidate = regularized(&base, None, 0.0);
            if CscCholesky::factor(&candidate).is_ok() {
                return Ok(ConvexHessian {
                    matrix: upper_triangle(&candidate),
                    regularization: Regularization::default(),
                });
            }
            rho = 0.0;
        }

        let mut shift = restart(previous.shift, DELTA_FIRST).max(DELTA_FIRST);
        loop {
            let candidate = regularized(&base, penalty.as_ref().map(|gram| (gram, rho)), shift);
            if CscCholesky::factor(&candidate).is_ok() {
                return Ok(ConvexHessian {
                    matrix: upper_triangle(&candidate),
                    regularization: Regularization { rho, shift },
                });
            }
            shift = grow(shift, DELTA_FIRST);
            if shift > DELTA_MAX {
                return Err(QpError::Convexification(DELTA_MAX));
            }
        }
    }

    /// JₑᵀJₑ over the equality rows
    fn equality_gram(&self, structure: &[(usize, usize)], jacobian: &[f64]) -> CscMatrix<f64> {
        let n = self.num_variables;
        let mut coo = CooMatrix::new(n, n);
        for entries in &self.equality_entries {
            for &a in entries {
                for &b in entries {
                    coo.push(structure[a].1, structure[b].1, jacobian[a] * jacobian[b]);
                }
            }
        }
        CscMatrix::from(&coo)
    }
}

fn restart(previous: f64, first: f64) -> f64 {
    if previous > 0.0 {
        (previous * SHRINK).max(first)
    } else {
        0.0
    }
}

fn grow(value: f64, first: f64) -> f64 {
    if value == 0.0 {
        first
    } else {
        value * GROWTH
    }
}

/// H + ρ·JₑᵀJₑ + δI, both triangles
fn regularized(
    base: &CscMatrix<f64>,
    penalty: Option<(&CscMatrix<f64>, f64)>,
    shift: f64,
) -> CscMatrix<f64> {
    let n = base.nrows();
    let mut coo = CooMatrix::new(n, n);
    for (row, col, &value) in base.triplet_iter() {
        coo.push(row, col, value);
    }
    if let Some((gram, rho)) = penalty {
        for (row, col, &value) in gram.triplet_iter() {
            coo.push(row, col, rho * value);
        }
    }
    for i in 0..n {
        coo.push(i, i, shift);
    }
    CscMatrix::from(&coo)
}

fn upper_triangle(full: &CscMatrix<f64>) -> ClarabelCsc<f64> {
    let mut col_offsets = Vec::with_capacity(full.ncols() + 1);
    let mut row_indices = Vec::new();
    let mut entries = Vec::new();
    col_offsets.push(0);
    for (col, column) in full.col_iter().enumerate() {
        for (&row, &value) in column.row_indices().iter().zip(column.values()) {
            if row <= col {
                row_indices.push(row);
                entries.push(value);
            }
        }
        col_offsets.push(row_indices.len());
    }
    ClarabelCsc::new(full.nrows(), full.ncols(), col_offsets, row_indices, entries)
}

fn to_clarabel(matrix: &CscMatrix<f64>) -> ClarabelCsc<f64> {
    ClarabelCsc::new(
        matrix.nrows(),
        matrix.ncols(),
        matrix.col_offsets().to_vec(),
        matrix.row_indices().to_vec(),
        matrix.values().to_vec(),
    )
}
