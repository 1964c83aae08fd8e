//! LP solver adapter boundary
//!
//! The model layer never talks to a numerical backend directly. Everything it
//! needs (columns, rows, in-place bound/coefficient edits, primal values and
//! duals) goes through [`SolverAdapter`], which is passed explicitly into every
//! `apply_*` call so model parts stay backend-agnostic.

pub mod highs;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

pub use self::highs::HighsSolver;

/// Column handle issued by a solver adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(pub usize);

/// Row handle issued by a solver adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub usize);

/// A row as handed to the adapter: `lower <= Σ coef·var <= upper`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSpec<'a> {
    pub terms: &'a BTreeMap<VarId, f64>,
    pub lower: f64,
    pub upper: f64,
}

/// Errors raised by the adapter when it is handed handles it does not know
#[derive(Debug, Error, PartialEq)]
pub enum SolverError {
    #[error("unknown solver row {0:?}")]
    UnknownRow(RowId),
    #[error("unknown solver variable {0:?}")]
    UnknownVariable(VarId),
    #[error("invalid bounds [{lower}, {upper}]")]
    InvalidBounds { lower: f64, upper: f64 },
}

/// Structured solve failure; never a panic and never a stale solution
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
pub enum SolveFailure {
    #[error("problem is infeasible")]
    Infeasible,
    #[error("problem is unbounded")]
    Unbounded,
    #[error("numerical failure: {0}")]
    Numerical(String),
    #[error("solver time limit exceeded")]
    TimeLimit,
}

/// Immutable snapshot of one successful solve
#[derive(Debug, Clone, Default)]
pub struct Solution {
    pub objective: f64,
    values: HashMap<VarId, f64>,
    duals: HashMap<RowId, f64>,
}

impl Solution {
    pub fn new(objective: f64, values: HashMap<VarId, f64>, duals: HashMap<RowId, f64>) -> Self {
        Self {
            objective,
            values,
            duals,
        }
    }

    pub fn value(&self, var: VarId) -> Option<f64> {
        self.values.get(&var).copied()
    }

    /// Dual value of a row: marginal objective change per unit increase of its bound.
    pub fn dual(&self, row: RowId) -> Option<f64> {
        self.duals.get(&row).copied()
    }
}

/// Counters of solver-side mutations, used for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdapterStats {
    pub variables_added: usize,
    pub variables_removed: usize,
    pub rows_added: usize,
    pub rows_removed: usize,
    pub bound_changes: usize,
    pub coefficient_changes: usize,
    pub objective_changes: usize,
    pub solves: usize,
}

impl AdapterStats {
    /// Number of model mutations, excluding solves.
    pub fn mutations(&self) -> usize {
        self.variables_added
            + self.variables_removed
            + self.rows_added
            + self.rows_removed
            + self.bound_changes
            + self.coefficient_changes
            + self.objective_changes
    }
}

/// Incremental LP backend.
///
/// Implementations keep row and column handles stable across solves so that
/// callers can patch the model in place instead of rebuilding it.
pub trait SolverAdapter {
    fn add_variable(&mut self, lower: f64, upper: f64) -> VarId;

    /// Drop a column; it also disappears from every row and the objective.
    fn remove_variable(&mut self, var: VarId) -> Result<(), SolverError>;

    fn add_constraint(&mut self, row: RowSpec<'_>) -> RowId;

    fn add_constraints(&mut self, rows: &[RowSpec<'_>]) -> Vec<RowId> {
        rows.iter().map(|row| self.add_constraint(row.clone())).collect()
    }

    fn change_row_bounds(&mut self, row: RowId, lower: f64, upper: f64) -> Result<(), SolverError>;

    /// Set a row coefficient; `0.0` removes the term and is also accepted for
    /// an already removed column.
    fn change_coefficient(&mut self, row: RowId, var: VarId, value: f64) -> Result<(), SolverError>;

    fn objective_coefficient(&self, var: VarId) -> Result<f64, SolverError>;

    fn change_objective_coefficient(&mut self, var: VarId, value: f64) -> Result<(), SolverError>;

    fn remove_constraint(&mut self, row: RowId) -> Result<(), SolverError>;

    /// Minimise the current objective.
    fn solve(&mut self) -> Result<Solution, SolveFailure>;

    /// Primal value of `var` in the last successful solve.
    fn value(&self, var: VarId) -> Option<f64>;

    /// Dual value of `row` in the last successful solve.
    fn dual(&self, row: RowId) -> Option<f64>;

    fn stats(&self) -> AdapterStats;
}
