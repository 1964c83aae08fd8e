//! HiGHS-backed solver adapter
//!
//! The adapter keeps its own sparse copy of the LP with stable row and column
//! handles. HiGHS itself holds a live instance of the same model: it is loaded
//! from the copy once, and after that every add, remove and in-place edit is
//! forwarded to it, so a re-solve starts from the previous basis instead of a
//! fresh model.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_void, CStr};
use std::ptr::{self, NonNull};
use std::time::{Duration, Instant};

use highs_sys::{
    HighsInt, Highs_addCol, Highs_addRow, Highs_changeCoeff, Highs_changeColCost,
    Highs_changeRowBounds, Highs_create, Highs_deleteColsBySet, Highs_deleteRowsBySet,
    Highs_destroy, Highs_getIntInfoValue, Highs_getModelStatus, Highs_getNumCol,
    Highs_getNumRow, Highs_getObjectiveValue, Highs_getSolution, Highs_run,
    Highs_setBoolOptionValue, Highs_setDoubleOptionValue, MODEL_STATUS_INFEASIBLE,
    MODEL_STATUS_OPTIMAL, MODEL_STATUS_REACHED_TIME_LIMIT, MODEL_STATUS_UNBOUNDED,
    MODEL_STATUS_UNBOUNDED_OR_INFEASIBLE, STATUS_ERROR,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AdapterStats, RowId, RowSpec, Solution, SolveFailure, SolverAdapter, SolverError, VarId};

/// Backend options, usually read from the `[solver]` config table.
#[derive(Debug, Clone, Deserialize)]
pub struct SolverOptions {
    /// Wall-clock limit for a single solve. A timeout is reported as a failure.
    #[serde(default)]
    pub time_limit_seconds: Option<f64>,
    /// Forward HiGHS' own log output.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            time_limit_seconds: Some(30.0),
            verbose: false,
        }
    }
}

/// How the live HiGHS instance has been used since the adapter was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    /// Times a HiGHS instance was built from the adapter's copy of the model.
    pub model_loads: usize,
    /// Edits passed straight to the live instance.
    pub forwarded_edits: usize,
    /// Simplex iterations of the most recent run.
    pub last_iterations: usize,
}

#[derive(Debug, Clone)]
struct Column {
    lower: f64,
    upper: f64,
    cost: f64,
}

#[derive(Debug, Clone)]
struct Row {
    lower: f64,
    upper: f64,
    terms: BTreeMap<VarId, f64>,
}

fn to_highs(index: usize) -> Result<HighsInt, String> {
    HighsInt::try_from(index).map_err(|_| format!("index {index} exceeds the HiGHS integer range"))
}

fn check(status: HighsInt, call: &str) -> Result<(), String> {
    if status == STATUS_ERROR {
        Err(format!("{call} returned an error status"))
    } else {
        Ok(())
    }
}

/// Owned HiGHS instance plus the mapping between adapter handles and HiGHS
/// positions. HiGHS renumbers columns and rows after a delete, the position
/// vectors shift the same way.
#[derive(Debug)]
struct LiveModel {
    highs: NonNull<c_void>,
    columns: Vec<VarId>,
    rows: Vec<RowId>,
    column_at: HashMap<VarId, usize>,
    row_at: HashMap<RowId, usize>,
}

// SAFETY: the instance is owned exclusively by this value and only touched
// through `&mut self`; HiGHS keeps no thread-local state per instance.
unsafe impl Send for LiveModel {}

impl Drop for LiveModel {
    fn drop(&mut self) {
        // SAFETY: created by `Highs_create` and destroyed exactly once.
        unsafe { Highs_destroy(self.highs.as_ptr()) }
    }
}

impl LiveModel {
    fn create(options: &SolverOptions) -> Result<Self, String> {
        // SAFETY: plain constructor; a null return is handled below.
        let highs = NonNull::new(unsafe { Highs_create() }).ok_or("Highs_create returned null")?;
        let mut model = Self {
            highs,
            columns: Vec::new(),
            rows: Vec::new(),
            column_at: HashMap::new(),
            row_at: HashMap::new(),
        };
        model.set_bool(c"output_flag", options.verbose)?;
        if let Some(limit) = options.time_limit_seconds {
            model.set_double(c"time_limit", limit)?;
        }
        Ok(model)
    }

    fn ptr(&self) -> *mut c_void {
        self.highs.as_ptr()
    }

    fn set_bool(&mut self, option: &CStr, value: bool) -> Result<(), String> {
        // SAFETY: valid instance and NUL-terminated option name.
        let status = unsafe { Highs_setBoolOptionValue(self.ptr(), option.as_ptr(), HighsInt::from(value)) };
        check(status, "Highs_setBoolOptionValue")
    }

    fn set_double(&mut self, option: &CStr, value: f64) -> Result<(), String> {
        // SAFETY: as above.
        let status = unsafe { Highs_setDoubleOptionValue(self.ptr(), option.as_ptr(), value) };
        check(status, "Highs_setDoubleOptionValue")
    }

    fn column_index(&self, var: VarId) -> Result<HighsInt, String> {
        let position = self
            .column_at
            .get(&var)
            .ok_or_else(|| format!("column {var:?} is not loaded"))?;
        to_highs(*position)
    }

    fn row_index(&self, row: RowId) -> Result<HighsInt, String> {
        let position = self
            .row_at
            .get(&row)
            .ok_or_else(|| format!("row {row:?} is not loaded"))?;
        to_highs(*position)
    }

    fn add_column(&mut self, var: VarId, column: &Column) -> Result<(), String> {
        // SAFETY: zero nonzeros, so the index/value pointers are not read.
        let status = unsafe {
            Highs_addCol(
                self.ptr(),
                column.cost,
                column.lower,
                column.upper,
                0,
                ptr::null(),
                ptr::null(),
            )
        };
        check(status, "Highs_addCol")?;
        self.column_at.insert(var, self.columns.len());
        self.columns.push(var);
        Ok(())
    }

    fn add_row(&mut self, id: RowId, row: &Row) -> Result<(), String> {
        let mut index = Vec::with_capacity(row.terms.len());
        let mut value = Vec::with_capacity(row.terms.len());
        for (var, coef) in &row.terms {
            index.push(self.column_index(*var)?);
            value.push(*coef);
        }
        // SAFETY: both arrays hold exactly `len` entries.
        let status = unsafe {
            Highs_addRow(
                self.ptr(),
                row.lower,
                row.upper,
                to_highs(index.len())?,
                index.as_ptr(),
                value.as_ptr(),
            )
        };
        check(status, "Highs_addRow")?;
        self.row_at.insert(id, self.rows.len());
        self.rows.push(id);
        Ok(())
    }

    fn remove_column(&mut self, var: VarId) -> Result<(), String> {
        let index = self.column_index(var)?;
        // SAFETY: one-entry set.
        let status = unsafe { Highs_deleteColsBySet(self.ptr(), 1, &index) };
        check(status, "Highs_deleteColsBySet")?;
        let position = self.column_at.remove(&var).unwrap_or_default();
        self.columns.remove(position);
        for shifted in &self.columns[position..] {
            if let Some(at) = self.column_at.get_mut(shifted) {
                *at -= 1;
            }
        }
        Ok(())
    }

    fn remove_row(&mut self, id: RowId) -> Result<(), String> {
        let index = self.row_index(id)?;
        // SAFETY: one-entry set.
        let status = unsafe { Highs_deleteRowsBySet(self.ptr(), 1, &index) };
        check(status, "Highs_deleteRowsBySet")?;
        let position = self.row_at.remove(&id).unwrap_or_default();
        self.rows.remove(position);
        for shifted in &self.rows[position..] {
            if let Some(at) = self.row_at.get_mut(shifted) {
                *at -= 1;
            }
        }
        Ok(())
    }

    fn change_cost(&mut self, var: VarId, cost: f64) -> Result<(), String> {
        let col = self.column_index(var)?;
        // SAFETY: `col` is a loaded column.
        check(unsafe { Highs_changeColCost(self.ptr(), col, cost) }, "Highs_changeColCost")
    }

    fn change_row_bounds(&mut self, id: RowId, lower: f64, upper: f64) -> Result<(), String> {
        let row = self.row_index(id)?;
        // SAFETY: `row` is a loaded row.
        check(
            unsafe { Highs_changeRowBounds(self.ptr(), row, lower, upper) },
            "Highs_changeRowBounds",
        )
    }

    fn change_coefficient(&mut self, id: RowId, var: VarId, value: f64) -> Result<(), String> {
        let row = self.row_index(id)?;
        let col = self.column_index(var)?;
        // SAFETY: both indices are loaded.
        check(
            unsafe { Highs_changeCoeff(self.ptr(), row, col, value) },
            "Highs_changeCoeff",
        )
    }

    /// Run the solver and return the HiGHS model status.
    fn run(&mut self) -> Result<HighsInt, String> {
        // SAFETY: valid instance.
        let status = unsafe { Highs_run(self.ptr()) };
        check(status, "Highs_run")?;
        // SAFETY: valid instance.
        Ok(unsafe { Highs_getModelStatus(self.ptr()) })
    }

    fn iterations(&self) -> usize {
        let mut count: HighsInt = 0;
        // SAFETY: valid instance and out-pointer.
        let status = unsafe {
            Highs_getIntInfoValue(self.ptr(), c"simplex_iteration_count".as_ptr(), &mut count)
        };
        if status == STATUS_ERROR {
            return 0;
        }
        usize::try_from(count).unwrap_or_default()
    }

    fn solution(&self) -> Result<Solution, String> {
        // SAFETY: valid instance.
        let (num_col, num_row) = unsafe { (Highs_getNumCol(self.ptr()), Highs_getNumRow(self.ptr())) };
        let num_col = usize::try_from(num_col).map_err(|_| "negative column count")?;
        let num_row = usize::try_from(num_row).map_err(|_| "negative row count")?;
        if num_col != self.columns.len() || num_row != self.rows.len() {
            return Err(format!(
                "HiGHS holds {num_col}x{num_row}, adapter expects {}x{}",
                self.columns.len(),
                self.rows.len()
            ));
        }
        let mut col_value = vec![0.0; num_col];
        let mut col_dual = vec![0.0; num_col];
        let mut row_value = vec![0.0; num_row];
        let mut row_dual = vec![0.0; num_row];
        // SAFETY: every buffer is sized from the instance's own dimensions.
        let status = unsafe {
            Highs_getSolution(
                self.ptr(),
                col_value.as_mut_ptr(),
                col_dual.as_mut_ptr(),
                row_value.as_mut_ptr(),
                row_dual.as_mut_ptr(),
            )
        };
        check(status, "Highs_getSolution")?;
        // SAFETY: valid instance.
        let objective = unsafe { Highs_getObjectiveValue(self.ptr()) };
        let values = self.columns.iter().copied().zip(col_value).collect();
        let duals = self.rows.iter().copied().zip(row_dual).collect();
        Ok(Solution::new(objective, values, duals))
    }
}

/// [`SolverAdapter`] over the HiGHS LP solver
#[derive(Debug, Default)]
pub struct HighsSolver {
    options: SolverOptions,
    columns: Vec<Option<Column>>,
    rows: Vec<Option<Row>>,
    live: Option<LiveModel>,
    last: Option<Solution>,
    stats: AdapterStats,
    backend: BackendStats,
}

impl HighsSolver {
    pub fn new(options: SolverOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.options.time_limit_seconds = Some(limit.as_secs_f64());
        // Options are set when the instance is created.
        self.live = None;
        self
    }

    pub fn num_variables(&self) -> usize {
        self.columns.iter().flatten().count()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.iter().flatten().count()
    }

    pub fn backend_stats(&self) -> BackendStats {
        self.backend
    }

    /// Current row definition as `(lower, upper, terms)`, for diagnostics.
    pub fn row(&self, row: RowId) -> Option<(f64, f64, &BTreeMap<VarId, f64>)> {
        self.rows
            .get(row.0)
            .and_then(Option::as_ref)
            .map(|r| (r.lower, r.upper, &r.terms))
    }

    fn column_mut(&mut self, var: VarId) -> Result<&mut Column, SolverError> {
        self.columns
            .get_mut(var.0)
            .and_then(Option::as_mut)
            .ok_or(SolverError::UnknownVariable(var))
    }

    fn row_mut(&mut self, row: RowId) -> Result<&mut Row, SolverError> {
        self.rows
            .get_mut(row.0)
            .and_then(Option::as_mut)
            .ok_or(SolverError::UnknownRow(row))
    }

    /// Pass an edit to the live instance, if there is one. A rejected edit
    /// drops the instance and the next solve reloads it from the copy.
    fn forward(&mut self, edit: impl FnOnce(&mut LiveModel) -> Result<(), String>) {
        let Some(live) = self.live.as_mut() else { return };
        match edit(live) {
            Ok(()) => self.backend.forwarded_edits += 1,
            Err(err) => {
                warn!(%err, "HiGHS rejected an edit, reloading the model before the next solve");
                self.live = None;
            }
        }
    }

    fn load(&self) -> Result<LiveModel, String> {
        let mut live = LiveModel::create(&self.options)?;
        for (index, column) in self.columns.iter().enumerate() {
            if let Some(column) = column {
                live.add_column(VarId(index), column)?;
            }
        }
        for (index, row) in self.rows.iter().enumerate() {
            if let Some(row) = row {
                live.add_row(RowId(index), row)?;
            }
        }
        Ok(live)
    }

    fn solve_empty(&self) -> Result<Solution, SolveFailure> {
        // Without columns every row reduces to `lower <= 0 <= upper`.
        let mut duals = HashMap::new();
        for (index, row) in self.rows.iter().enumerate() {
            if let Some(row) = row {
                if row.lower > 0.0 || row.upper < 0.0 {
                    return Err(SolveFailure::Infeasible);
                }
                duals.insert(RowId(index), 0.0);
            }
        }
        Ok(Solution::new(0.0, HashMap::new(), duals))
    }

    fn run_live(&mut self) -> Result<Solution, SolveFailure> {
        if self.live.is_none() {
            let live = self.load().map_err(SolveFailure::Numerical)?;
            self.backend.model_loads += 1;
            debug!(
                columns = live.columns.len(),
                rows = live.rows.len(),
                "loaded HiGHS model"
            );
            self.live = Some(live);
        }
        let Some(live) = self.live.as_mut() else {
            return Err(SolveFailure::Numerical("HiGHS model unavailable".into()));
        };

        let started = Instant::now();
        let status = match live.run() {
            Ok(status) => status,
            Err(err) => {
                self.live = None;
                return Err(SolveFailure::Numerical(err));
            }
        };
        self.backend.last_iterations = live.iterations();
        debug!(
            status,
            columns = live.columns.len(),
            rows = live.rows.len(),
            iterations = self.backend.last_iterations,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "HiGHS solve finished"
        );

        match status {
            MODEL_STATUS_OPTIMAL => live.solution().map_err(SolveFailure::Numerical),
            MODEL_STATUS_INFEASIBLE => Err(SolveFailure::Infeasible),
            MODEL_STATUS_UNBOUNDED | MODEL_STATUS_UNBOUNDED_OR_INFEASIBLE => Err(SolveFailure::Unbounded),
            MODEL_STATUS_REACHED_TIME_LIMIT => Err(SolveFailure::TimeLimit),
            other => {
                warn!(status = other, "HiGHS did not reach optimality");
                Err(SolveFailure::Numerical(format!("HiGHS model status {other}")))
            }
        }
    }
}

impl SolverAdapter for HighsSolver {
    fn add_variable(&mut self, lower: f64, upper: f64) -> VarId {
        self.stats.variables_added += 1;
        let column = Column {
            lower,
            upper,
            cost: 0.0,
        };
        let var = VarId(self.columns.len());
        self.forward(|live| live.add_column(var, &column));
        self.columns.push(Some(column));
        var
    }

    fn remove_variable(&mut self, var: VarId) -> Result<(), SolverError> {
        let slot = self
            .columns
            .get_mut(var.0)
            .ok_or(SolverError::UnknownVariable(var))?;
        if slot.take().is_none() {
            return Err(SolverError::UnknownVariable(var));
        }
        for row in self.rows.iter_mut().flatten() {
            row.terms.remove(&var);
        }
        self.forward(|live| live.remove_column(var));
        self.stats.variables_removed += 1;
        Ok(())
    }

    fn add_constraint(&mut self, row: RowSpec<'_>) -> RowId {
        self.stats.rows_added += 1;
        let terms = row
            .terms
            .iter()
            .filter(|(_, coef)| **coef != 0.0)
            .map(|(var, coef)| (*var, *coef))
            .collect();
        let row = Row {
            lower: row.lower,
            upper: row.upper,
            terms,
        };
        let id = RowId(self.rows.len());
        self.forward(|live| live.add_row(id, &row));
        self.rows.push(Some(row));
        id
    }

    fn change_row_bounds(&mut self, row: RowId, lower: f64, upper: f64) -> Result<(), SolverError> {
        if lower > upper {
            return Err(SolverError::InvalidBounds { lower, upper });
        }
        let r = self.row_mut(row)?;
        r.lower = lower;
        r.upper = upper;
        self.forward(|live| live.change_row_bounds(row, lower, upper));
        self.stats.bound_changes += 1;
        Ok(())
    }

    fn change_coefficient(&mut self, row: RowId, var: VarId, value: f64) -> Result<(), SolverError> {
        match self.columns.get(var.0) {
            Some(Some(_)) => {}
            // Removing a column already cleared its terms.
            Some(None) if value == 0.0 => {
                self.row_mut(row)?;
                return Ok(());
            }
            _ => return Err(SolverError::UnknownVariable(var)),
        }
        let r = self.row_mut(row)?;
        if value == 0.0 {
            r.terms.remove(&var);
        } else {
            r.terms.insert(var, value);
        }
        self.forward(|live| live.change_coefficient(row, var, value));
        self.stats.coefficient_changes += 1;
        Ok(())
    }

    fn objective_coefficient(&self, var: VarId) -> Result<f64, SolverError> {
        self.columns
            .get(var.0)
            .and_then(Option::as_ref)
            .map(|c| c.cost)
            .ok_or(SolverError::UnknownVariable(var))
    }

    fn change_objective_coefficient(&mut self, var: VarId, value: f64) -> Result<(), SolverError> {
        self.column_mut(var)?.cost = value;
        self.forward(|live| live.change_cost(var, value));
        self.stats.objective_changes += 1;
        Ok(())
    }

    fn remove_constraint(&mut self, row: RowId) -> Result<(), SolverError> {
        let slot = self.rows.get_mut(row.0).ok_or(SolverError::UnknownRow(row))?;
        if slot.take().is_none() {
            return Err(SolverError::UnknownRow(row));
        }
        self.forward(|live| live.remove_row(row));
        self.stats.rows_removed += 1;
        Ok(())
    }

    fn solve(&mut self) -> Result<Solution, SolveFailure> {
        self.stats.solves += 1;
        self.last = None;

        let solution = if self.columns.iter().all(Option::is_none) {
            self.solve_empty()?
        } else {
            self.run_live()?
        };
        self.last = Some(solution.clone());
        Ok(solution)
    }

    fn value(&self, var: VarId) -> Option<f64> {
        self.last.as_ref().and_then(|s| s.value(var))
    }

    fn dual(&self, row: RowId) -> Option<f64> {
        self.last.as_ref().and_then(|s| s.dual(row))
    }

    fn stats(&self) -> AdapterStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(pairs: &[(VarId, f64)]) -> BTreeMap<VarId, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_solves_small_lp() {
        // min x + 2y  s.t.  x + y >= 3, x <= 1
        let mut solver = HighsSolver::default();
        let x = solver.add_variable(0.0, 1.0);
        let y = solver.add_variable(0.0, f64::INFINITY);
        solver.change_objective_coefficient(x, 1.0).unwrap();
        solver.change_objective_coefficient(y, 2.0).unwrap();
        let t = terms(&[(x, 1.0), (y, 1.0)]);
        let row = solver.add_constraint(RowSpec {
            terms: &t,
            lower: 3.0,
            upper: f64::INFINITY,
        });

        let solution = solver.solve().unwrap();
        assert!((solution.value(x).unwrap() - 1.0).abs() < 1e-7);
        assert!((solution.value(y).unwrap() - 2.0).abs() < 1e-7);
        assert!((solution.objective - 5.0).abs() < 1e-7);
        // Raising the right-hand side by one costs one more unit of y.
        assert!((solution.dual(row).unwrap() - 2.0).abs() < 1e-7);
    }

    #[test]
    fn test_in_place_edits_are_visible_to_next_solve() {
        let mut solver = HighsSolver::default();
        let x = solver.add_variable(0.0, f64::INFINITY);
        solver.change_objective_coefficient(x, 1.0).unwrap();
        let t = terms(&[(x, 1.0)]);
        let row = solver.add_constraint(RowSpec {
            terms: &t,
            lower: 2.0,
            upper: f64::INFINITY,
        });
        assert!((solver.solve().unwrap().value(x).unwrap() - 2.0).abs() < 1e-7);

        solver.change_row_bounds(row, 4.0, f64::INFINITY).unwrap();
        assert!((solver.solve().unwrap().value(x).unwrap() - 4.0).abs() < 1e-7);

        solver.change_coefficient(row, x, 2.0).unwrap();
        assert!((solver.solve().unwrap().value(x).unwrap() - 2.0).abs() < 1e-7);
    }

    #[test]
    fn test_resolve_reuses_loaded_model() {
        let mut solver = HighsSolver::default();
        let x = solver.add_variable(0.0, f64::INFINITY);
        let y = solver.add_variable(0.0, f64::INFINITY);
        solver.change_objective_coefficient(x, 1.0).unwrap();
        solver.change_objective_coefficient(y, 3.0).unwrap();
        let t = terms(&[(x, 1.0), (y, 1.0)]);
        let demand = solver.add_constraint(RowSpec {
            terms: &t,
            lower: 4.0,
            upper: f64::INFINITY,
        });
        let cap = terms(&[(x, 1.0)]);
        let x_cap = solver.add_constraint(RowSpec {
            terms: &cap,
            lower: f64::NEG_INFINITY,
            upper: 3.0,
        });
        let first = solver.solve().unwrap();
        assert!((first.objective - 6.0).abs() < 1e-7);
        assert_eq!(solver.backend_stats().model_loads, 1);
        assert_eq!(solver.backend_stats().forwarded_edits, 0);

        // Price and bound edits, a removed row and a new column all go to the
        // loaded instance.
        solver.change_objective_coefficient(y, 2.0).unwrap();
        solver.change_row_bounds(demand, 5.0, f64::INFINITY).unwrap();
        solver.remove_constraint(x_cap).unwrap();
        let z = solver.add_variable(0.0, 1.0);
        solver.change_coefficient(demand, z, 1.0).unwrap();

        let second = solver.solve().unwrap();
        assert_eq!(solver.backend_stats().model_loads, 1);
        assert_eq!(solver.backend_stats().forwarded_edits, 5);
        // x alone covers the demand once its cap is gone; z is free.
        assert!((second.value(x).unwrap() + second.value(z).unwrap() - 5.0).abs() < 1e-7);
        assert!(second.value(y).unwrap().abs() < 1e-7);
        assert!((second.objective - second.value(x).unwrap()).abs() < 1e-7);
        assert!(second.dual(x_cap).is_none());
    }

    #[test]
    fn test_removing_a_column_keeps_later_handles_aligned() {
        let mut solver = HighsSolver::default();
        let a = solver.add_variable(0.0, 10.0);
        let b = solver.add_variable(0.0, 10.0);
        let c = solver.add_variable(0.0, 10.0);
        for (var, cost) in [(a, 1.0), (b, 2.0), (c, -1.0)] {
            solver.change_objective_coefficient(var, cost).unwrap();
        }
        solver.solve().unwrap();

        solver.remove_variable(a).unwrap();
        let t = terms(&[(c, 1.0)]);
        solver.add_constraint(RowSpec {
            terms: &t,
            lower: f64::NEG_INFINITY,
            upper: 4.0,
        });
        let solution = solver.solve().unwrap();
        assert_eq!(solver.backend_stats().model_loads, 1);
        assert!(solution.value(a).is_none());
        assert!(solution.value(b).unwrap().abs() < 1e-7);
        assert!((solution.value(c).unwrap() - 4.0).abs() < 1e-7);
        assert!((solution.objective + 4.0).abs() < 1e-7);
    }

    #[test]
    fn test_infeasible_is_reported() {
        let mut solver = HighsSolver::default();
        let x = solver.add_variable(0.0, 1.0);
        let t = terms(&[(x, 1.0)]);
        solver.add_constraint(RowSpec {
            terms: &t,
            lower: 2.0,
            upper: f64::INFINITY,
        });
        assert_eq!(solver.solve().unwrap_err(), SolveFailure::Infeasible);
        assert!(solver.value(x).is_none());
    }

    #[test]
    fn test_removed_handles_are_rejected() {
        let mut solver = HighsSolver::default();
        let x = solver.add_variable(0.0, 1.0);
        let t = terms(&[(x, 1.0)]);
        let row = solver.add_constraint(RowSpec {
            terms: &t,
            lower: 0.0,
            upper: 1.0,
        });
        solver.remove_constraint(row).unwrap();
        assert_eq!(solver.remove_constraint(row), Err(SolverError::UnknownRow(row)));
        solver.remove_variable(x).unwrap();
        assert_eq!(
            solver.change_objective_coefficient(x, 1.0),
            Err(SolverError::UnknownVariable(x))
        );
        assert_eq!(solver.num_variables(), 0);
    }

    #[test]
    fn test_zeroing_a_removed_column_is_a_no_op() {
        let mut solver = HighsSolver::default();
        let x = solver.add_variable(0.0, 1.0);
        let y = solver.add_variable(0.0, 1.0);
        let t = terms(&[(x, 1.0), (y, 1.0)]);
        let row = solver.add_constraint(RowSpec {
            terms: &t,
            lower: 0.0,
            upper: 1.0,
        });
        solver.remove_variable(x).unwrap();
        let before = solver.stats();

        solver.change_coefficient(row, x, 0.0).unwrap();
        assert_eq!(solver.stats(), before);
        assert_eq!(
            solver.change_coefficient(row, x, 2.0),
            Err(SolverError::UnknownVariable(x))
        );
        assert_eq!(
            solver.change_coefficient(row, VarId(7), 0.0),
            Err(SolverError::UnknownVariable(VarId(7)))
        );
        assert_eq!(solver.row(row).unwrap().2.keys().copied().collect::<Vec<_>>(), vec![y]);
    }

    #[test]
    fn test_empty_model_is_trivially_optimal() {
        let mut solver = HighsSolver::default();
        let solution = solver.solve().unwrap();
        assert_eq!(solution.objective, 0.0);
    }
}
