//! Constraint set of the transcribed OCP
//!
//! Constraints are collected as typed records through
//! [`ConstraintSetBuilder`] and folded once into the row-offset table and
//! the `lbg`/`ubg` arrays handed to the NLP solver. An equality is a record
//! whose lower and upper bounds coincide.

/// What a block of constraint rows encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `min_c ≤ u_k[c] ≤ max_c` (one row)
    ControlBound { stage: usize, channel: usize },
    /// `x_0 - x0_param = 0` (nx rows)
    InitialCondition,
    /// `x_{k+1} - F(x_k, u_k) = 0` (nx rows)
    Dynamics { stage: usize },
}

/// One block of rows with its bounds
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintRecord {
    pub kind: ConstraintKind,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ConstraintRecord {
    /// Number of rows
    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn is_equality(&self) -> bool {
        self.lower == self.upper
    }
}

/// Accumulates constraint records in row order
#[derive(Debug, Default)]
pub struct ConstraintSetBuilder {
    records: Vec<ConstraintRecord>,
}

impl ConstraintSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scalar inequality `lower ≤ g ≤ upper`
    pub fn bound(mut self, kind: ConstraintKind, lower: f64, upper: f64) -> Self {
        self.records.push(ConstraintRecord {
            kind,
            lower: vec![lower],
            upper: vec![upper],
        });
        self
    }

    /// Vector equality `g = 0` of the given dimension
    pub fn equality(mut self, kind: ConstraintKind, dim: usize) -> Self {
        self.records.push(ConstraintRecord {
            kind,
            lower: vec![0.0; dim],
            upper: vec![0.0; dim],
        });
        self
    }

    /// Fold the records into row offsets and bound arrays
    pub fn build(self) -> ConstraintSet {
        let mut row_offsets = Vec::with_capacity(self.records.len());
        let mut lbg = Vec::new();
        let mut ubg = Vec::new();

        for record in &self.records {
            row_offsets.push(lbg.len());
            lbg.extend_from_slice(&record.lower);
            ubg.extend_from_slice(&record.upper);
        }

        ConstraintSet {
            records: self.records,
            row_offsets,
            lbg,
            ubg,
        }
    }
}

/// Immutable, ordered constraint set
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    records: Vec<ConstraintRecord>,
    row_offsets: Vec<usize>,
    lbg: Vec<f64>,
    ubg: Vec<f64>,
}

impl ConstraintSet {
    /// Total number of scalar rows
    pub fn num_rows(&self) -> usize {
        self.lbg.len()
    }

    pub fn records(&self) -> &[ConstraintRecord] {
        &self.records
    }

    /// (first row, record) in row order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ConstraintRecord)> {
        self.row_offsets.iter().copied().zip(&self.records)
    }

    pub fn lbg(&self) -> &[f64] {
        &self.lbg
    }

    pub fn ubg(&self) -> &[f64] {
        &self.ubg
    }

    /// Number of records matching `predicate`
    pub fn count(&self, predicate: impl Fn(&ConstraintKind) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(&r.kind)).count()
    }

    /// Largest bound violation of the row values `g`
    pub fn max_violation(&self, g: &[f64]) -> f64 {
        g.iter()
            .zip(self.lbg.iter().zip(&self.ubg))
            .map(|(&v, (&l, &u))| (l - v).max(v - u).max(0.0))
            .fold(0.0, f64::max)
    }
}
