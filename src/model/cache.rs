//! Cached constraint and cost expressions
//!
//! A model part registers named constraint and cost functions through
//! [`ConstraintSource`]. [`ExprCache`] evaluates each name at most once per
//! invalidation cycle, remembers which parameters the evaluation read, and
//! turns the difference between the previous and the new result into the
//! smallest set of solver edits it can: row bound changes, coefficient changes
//! and objective coefficient deltas. Only a change in the number of rows of a
//! name forces its rows to be removed and re-added.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;

use serde::Serialize;
use tracing::trace;

use crate::error::{ModelError, ModelResult};
use crate::model::expr::{Constraint, Emitted, LinearExpr};
use crate::model::param::{Deps, ParamKey};
use crate::solver::{RowId, RowSpec, SolverAdapter, VarId};

pub type ConstraintFn<S, K> = fn(&S, &mut Deps<K>) -> Emitted<Constraint>;
pub type CostFn<S, K> = fn(&S, &mut Deps<K>) -> Emitted<LinearExpr>;

/// A model part with a static registry of named constraints and costs.
pub trait ConstraintSource: Sized + 'static {
    type Param: ParamKey + 'static;

    const CONSTRAINTS: &'static [(&'static str, ConstraintFn<Self, Self::Param>)];

    const COSTS: &'static [(&'static str, CostFn<Self, Self::Param>)] = &[];

    fn cache(&self) -> &ExprCache<Self::Param>;

    /// Evaluate stale constraints and push their deltas into `solver`.
    fn apply_constraints(&self, solver: &mut dyn SolverAdapter) -> ModelResult<ApplyReport> {
        self.cache().apply_constraints(self, Self::CONSTRAINTS, solver)
    }

    /// Evaluate stale costs and push objective deltas into `solver`.
    fn apply_costs(&self, solver: &mut dyn SolverAdapter) -> ModelResult<ApplyReport> {
        self.cache().apply_costs(self, Self::COSTS, solver)
    }
}

/// What one `apply_*` pass did to the solver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub evaluated: usize,
    pub rows_added: usize,
    pub rows_removed: usize,
    pub bound_changes: usize,
    pub coefficient_changes: usize,
    pub objective_changes: usize,
}

impl ApplyReport {
    pub fn solver_calls(&self) -> usize {
        self.rows_added
            + self.rows_removed
            + self.bound_changes
            + self.coefficient_changes
            + self.objective_changes
    }
}

impl AddAssign for ApplyReport {
    fn add_assign(&mut self, rhs: Self) {
        self.evaluated += rhs.evaluated;
        self.rows_added += rhs.rows_added;
        self.rows_removed += rhs.rows_removed;
        self.bound_changes += rhs.bound_changes;
        self.coefficient_changes += rhs.coefficient_changes;
        self.objective_changes += rhs.objective_changes;
    }
}

#[derive(Debug)]
struct ConstraintEntry<K> {
    deps: Deps<K>,
    stale: bool,
    rows: Vec<RowId>,
    cached: Vec<Constraint>,
}

#[derive(Debug)]
struct CostEntry<K> {
    deps: Deps<K>,
    stale: bool,
    coefficients: BTreeMap<VarId, f64>,
}

#[derive(Debug)]
struct CacheState<K> {
    constraints: BTreeMap<&'static str, ConstraintEntry<K>>,
    costs: BTreeMap<&'static str, CostEntry<K>>,
}

/// Memoized constraint/cost results and their solver rows.
///
/// Evaluation borrows the owning part immutably while the cache itself is
/// updated, hence the `RefCell`. A cache must never be applied re-entrantly.
#[derive(Debug)]
pub struct ExprCache<K> {
    state: RefCell<CacheState<K>>,
}

impl<K: ParamKey> Default for ExprCache<K> {
    fn default() -> Self {
        Self {
            state: RefCell::new(CacheState {
                constraints: BTreeMap::new(),
                costs: BTreeMap::new(),
            }),
        }
    }
}

impl<K: ParamKey> ExprCache<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every entry that read one of `changed` as stale.
    pub fn invalidate(&mut self, changed: &BTreeSet<K>) -> usize {
        if changed.is_empty() {
            return 0;
        }
        let state = self.state.get_mut();
        let mut count = 0;
        for (name, entry) in state.constraints.iter_mut() {
            if !entry.stale && entry.deps.iter().any(|k| changed.contains(k)) {
                trace!(constraint = name, "invalidated");
                entry.stale = true;
                count += 1;
            }
        }
        for (name, entry) in state.costs.iter_mut() {
            if !entry.stale && entry.deps.iter().any(|k| changed.contains(k)) {
                trace!(cost = name, "invalidated");
                entry.stale = true;
                count += 1;
            }
        }
        count
    }

    /// Whether `name` will be re-evaluated on the next apply.
    pub fn is_pending(&self, name: &str) -> bool {
        let state = self.state.borrow();
        state
            .constraints
            .get(name)
            .map(|e| e.stale)
            .or_else(|| state.costs.get(name).map(|e| e.stale))
            .unwrap_or(true)
    }

    /// Solver rows currently backing constraint `name`.
    pub fn rows(&self, name: &str) -> Option<Vec<RowId>> {
        self.state
            .borrow()
            .constraints
            .get(name)
            .filter(|e| !e.rows.is_empty())
            .map(|e| e.rows.clone())
    }

    /// Parameters read by the latest evaluation of `name`.
    pub fn dependencies(&self, name: &str) -> Option<Vec<K>> {
        let state = self.state.borrow();
        state
            .constraints
            .get(name)
            .map(|e| e.deps.iter().copied().collect())
            .or_else(|| {
                state
                    .costs
                    .get(name)
                    .map(|e| e.deps.iter().copied().collect())
            })
    }

    pub fn apply_constraints<S>(
        &self,
        source: &S,
        registry: &[(&'static str, ConstraintFn<S, K>)],
        solver: &mut dyn SolverAdapter,
    ) -> ModelResult<ApplyReport> {
        let mut state = self.state.borrow_mut();
        let mut report = ApplyReport::default();

        for &(name, evaluate) in registry {
            if state.constraints.get(name).is_some_and(|e| !e.stale) {
                continue;
            }
            let mut deps = Deps::new();
            let fresh = evaluate(source, &mut deps).into_vec();
            report.evaluated += 1;

            let entry = state.constraints.entry(name).or_insert_with(|| ConstraintEntry {
                deps: Deps::new(),
                stale: true,
                rows: Vec::new(),
                cached: Vec::new(),
            });
            sync_rows(name, entry, fresh, solver, &mut report)?;
            entry.deps = deps;
            entry.stale = false;
        }
        Ok(report)
    }

    /// Costs are linear; constant parts do not move the optimum and are dropped.
    pub fn apply_costs<S>(
        &self,
        source: &S,
        registry: &[(&'static str, CostFn<S, K>)],
        solver: &mut dyn SolverAdapter,
    ) -> ModelResult<ApplyReport> {
        let mut state = self.state.borrow_mut();
        let mut report = ApplyReport::default();

        for &(name, evaluate) in registry {
            if state.costs.get(name).is_some_and(|e| !e.stale) {
                continue;
            }
            let mut deps = Deps::new();
            let fresh: LinearExpr = evaluate(source, &mut deps).into_vec().into_iter().sum();
            report.evaluated += 1;

            let entry = state.costs.entry(name).or_insert_with(|| CostEntry {
                deps: Deps::new(),
                stale: true,
                coefficients: BTreeMap::new(),
            });
            let fresh = fresh.terms().clone();
            patch_objective(&entry.coefficients, &fresh, solver, &mut report)?;
            entry.coefficients = fresh;
            entry.deps = deps;
            entry.stale = false;
        }
        Ok(report)
    }

    /// Remove every row and objective contribution owned by this cache.
    ///
    /// Used when the owning part leaves the network; afterwards every entry is
    /// pending again.
    pub fn release(&mut self, solver: &mut dyn SolverAdapter) -> ModelResult<ApplyReport> {
        let state = self.state.get_mut();
        let mut report = ApplyReport::default();
        for entry in state.constraints.values_mut() {
            for row in entry.rows.drain(..) {
                solver.remove_constraint(row)?;
                report.rows_removed += 1;
            }
            entry.cached.clear();
            entry.stale = true;
        }
        for entry in state.costs.values_mut() {
            patch_objective(&entry.coefficients, &BTreeMap::new(), solver, &mut report)?;
            entry.coefficients.clear();
            entry.stale = true;
        }
        Ok(report)
    }
}

fn row_spec(constraint: &Constraint) -> RowSpec<'_> {
    let (lower, upper) = constraint.row_bounds();
    RowSpec {
        terms: constraint.expr.terms(),
        lower,
        upper,
    }
}

fn sync_rows<K>(
    name: &str,
    entry: &mut ConstraintEntry<K>,
    fresh: Vec<Constraint>,
    solver: &mut dyn SolverAdapter,
    report: &mut ApplyReport,
) -> ModelResult<()> {
    if entry.rows.len() != entry.cached.len() {
        return Err(ModelError::InvalidationConsistency {
            name: name.to_string(),
            detail: format!(
                "{} solver rows for {} cached expressions",
                entry.rows.len(),
                entry.cached.len()
            ),
        });
    }

    if fresh.len() != entry.rows.len() {
        // Row count changed: per-row patching is meaningless, rebuild this name.
        trace!(
            constraint = name,
            old = entry.rows.len(),
            new = fresh.len(),
            "recreating rows"
        );
        for row in entry.rows.drain(..) {
            solver.remove_constraint(row)?;
            report.rows_removed += 1;
        }
        let specs: Vec<RowSpec<'_>> = fresh.iter().map(row_spec).collect();
        entry.rows = solver.add_constraints(&specs);
        report.rows_added += entry.rows.len();
        if entry.rows.len() != fresh.len() {
            return Err(ModelError::InvalidationConsistency {
                name: name.to_string(),
                detail: format!(
                    "solver returned {} rows for {} constraints",
                    entry.rows.len(),
                    fresh.len()
                ),
            });
        }
        entry.cached = fresh;
        return Ok(());
    }

    for ((row, old), new) in entry.rows.iter().zip(&entry.cached).zip(&fresh) {
        let (old_lower, old_upper) = old.row_bounds();
        let (new_lower, new_upper) = new.row_bounds();
        if old_lower != new_lower || old_upper != new_upper {
            solver.change_row_bounds(*row, new_lower, new_upper)?;
            report.bound_changes += 1;
        }
        for (var, coef) in new.expr.terms() {
            if old.expr.coefficient(*var) != *coef {
                solver.change_coefficient(*row, *var, *coef)?;
                report.coefficient_changes += 1;
            }
        }
        for var in old.expr.terms().keys() {
            if !new.expr.terms().contains_key(var) {
                solver.change_coefficient(*row, *var, 0.0)?;
                report.coefficient_changes += 1;
            }
        }
    }
    entry.cached = fresh;
    Ok(())
}

fn patch_objective(
    old: &BTreeMap<VarId, f64>,
    new: &BTreeMap<VarId, f64>,
    solver: &mut dyn SolverAdapter,
    report: &mut ApplyReport,
) -> ModelResult<()> {
    let vars: BTreeSet<VarId> = old.keys().chain(new.keys()).copied().collect();
    for var in vars {
        let delta = new.get(&var).copied().unwrap_or(0.0) - old.get(&var).copied().unwrap_or(0.0);
        if delta != 0.0 {
            let current = solver.objective_coefficient(var)?;
            solver.change_objective_coefficient(var, current + delta)?;
            report.objective_changes += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::param::{ParamStore, Shape};
    use crate::solver::HighsSolver;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum Knob {
        Limit,
        Weight,
        Price,
        Count,
    }

    impl ParamKey for Knob {
        fn name(self) -> &'static str {
            match self {
                Knob::Limit => "limit",
                Knob::Weight => "weight",
                Knob::Price => "price",
                Knob::Count => "count",
            }
        }

        fn shape(self) -> Shape {
            Shape::Scalar
        }
    }

    struct Toy {
        x: VarId,
        y: VarId,
        params: ParamStore<Knob>,
        cache: ExprCache<Knob>,
    }

    impl Toy {
        fn new(solver: &mut dyn SolverAdapter) -> Self {
            Self {
                x: solver.add_variable(0.0, f64::INFINITY),
                y: solver.add_variable(0.0, f64::INFINITY),
                params: ParamStore::new(1),
                cache: ExprCache::new(),
            }
        }

        fn sync(&mut self) {
            let dirty = self.params.take_dirty();
            self.cache.invalidate(&dirty);
        }

        fn limit(&self, deps: &mut Deps<Knob>) -> Emitted<Constraint> {
            let Some(limit) = self.params.get(Knob::Limit, deps).scalar() else {
                return Emitted::None;
            };
            let weight = self.params.get(Knob::Weight, deps).scalar().unwrap_or(1.0);
            Emitted::Single((LinearExpr::term(self.x, weight) + LinearExpr::var(self.y)).leq(limit))
        }

        fn repeated(&self, deps: &mut Deps<Knob>) -> Emitted<Constraint> {
            let count = self.params.get(Knob::Count, deps).scalar().unwrap_or(0.0) as usize;
            (0..count)
                .map(|_| LinearExpr::var(self.x).geq(0.0))
                .collect::<Vec<_>>()
                .into()
        }

        fn price(&self, deps: &mut Deps<Knob>) -> Emitted<LinearExpr> {
            self.params
                .get(Knob::Price, deps)
                .scalar()
                .map(|p| LinearExpr::term(self.x, p))
                .into()
        }
    }

    impl ConstraintSource for Toy {
        type Param = Knob;

        const CONSTRAINTS: &'static [(&'static str, ConstraintFn<Self, Knob>)] =
            &[("limit", Self::limit), ("repeated", Self::repeated)];

        const COSTS: &'static [(&'static str, CostFn<Self, Knob>)] = &[("price", Self::price)];

        fn cache(&self) -> &ExprCache<Knob> {
            &self.cache
        }
    }

    #[test]
    fn test_unset_parameter_emits_no_rows() {
        let mut solver = HighsSolver::default();
        let toy = Toy::new(&mut solver);
        let report = toy.apply_constraints(&mut solver).unwrap();
        assert_eq!(report.rows_added, 0);
        assert!(toy.cache.rows("limit").is_none());
        assert_eq!(toy.cache.dependencies("limit"), Some(vec![Knob::Limit]));
    }

    #[test]
    fn test_second_apply_is_a_no_op() {
        let mut solver = HighsSolver::default();
        let mut toy = Toy::new(&mut solver);
        toy.params.set(Knob::Limit, 4.0).unwrap();
        toy.params.set(Knob::Price, 1.0).unwrap();
        toy.sync();
        toy.apply_constraints(&mut solver).unwrap();
        toy.apply_costs(&mut solver).unwrap();

        let before = solver.stats();
        toy.sync();
        let report = toy.apply_constraints(&mut solver).unwrap();
        let costs = toy.apply_costs(&mut solver).unwrap();
        assert_eq!(report.evaluated + costs.evaluated, 0);
        assert_eq!(solver.stats(), before);
    }

    #[test]
    fn test_bound_change_patches_in_place() {
        let mut solver = HighsSolver::default();
        let mut toy = Toy::new(&mut solver);
        toy.params.set(Knob::Limit, 4.0).unwrap();
        toy.sync();
        toy.apply_constraints(&mut solver).unwrap();
        let rows = toy.cache.rows("limit").unwrap();

        toy.params.set(Knob::Limit, 6.0).unwrap();
        toy.sync();
        let report = toy.apply_constraints(&mut solver).unwrap();
        assert_eq!(report.bound_changes, 1);
        assert_eq!(report.rows_added, 0);
        assert_eq!(toy.cache.rows("limit").unwrap(), rows);
        assert_eq!(solver.row(rows[0]).unwrap().1, 6.0);
    }

    #[test]
    fn test_late_read_extends_dependencies() {
        let mut solver = HighsSolver::default();
        let mut toy = Toy::new(&mut solver);
        // Weight is only read once the limit is set.
        toy.params.set(Knob::Weight, 2.0).unwrap();
        toy.sync();
        toy.apply_constraints(&mut solver).unwrap();
        assert_eq!(toy.cache.dependencies("limit"), Some(vec![Knob::Limit]));

        toy.params.set(Knob::Limit, 1.0).unwrap();
        toy.sync();
        toy.apply_constraints(&mut solver).unwrap();
        assert_eq!(
            toy.cache.dependencies("limit"),
            Some(vec![Knob::Limit, Knob::Weight])
        );

        toy.params.set(Knob::Weight, 3.0).unwrap();
        toy.sync();
        assert!(toy.cache.is_pending("limit"));
        let report = toy.apply_constraints(&mut solver).unwrap();
        assert_eq!(report.coefficient_changes, 1);
        let row = toy.cache.rows("limit").unwrap()[0];
        assert_eq!(solver.row(row).unwrap().2.get(&toy.x), Some(&3.0));
    }

    #[test]
    fn test_row_count_change_recreates_rows() {
        let mut solver = HighsSolver::default();
        let mut toy = Toy::new(&mut solver);
        toy.params.set(Knob::Count, 2.0).unwrap();
        toy.sync();
        toy.apply_constraints(&mut solver).unwrap();
        assert_eq!(toy.cache.rows("repeated").unwrap().len(), 2);

        toy.params.set(Knob::Count, 3.0).unwrap();
        toy.sync();
        let report = toy.apply_constraints(&mut solver).unwrap();
        assert_eq!(report.rows_removed, 2);
        assert_eq!(report.rows_added, 3);
        assert_eq!(solver.num_rows(), 3);
    }

    #[test]
    fn test_cost_deltas_accumulate_on_shared_objective() {
        let mut solver = HighsSolver::default();
        let mut toy = Toy::new(&mut solver);
        // Someone else already prices x.
        solver.change_objective_coefficient(toy.x, 0.5).unwrap();
        toy.params.set(Knob::Price, 2.0).unwrap();
        toy.sync();
        toy.apply_costs(&mut solver).unwrap();
        assert_eq!(solver.objective_coefficient(toy.x).unwrap(), 2.5);

        toy.params.set(Knob::Price, 1.0).unwrap();
        toy.sync();
        toy.apply_costs(&mut solver).unwrap();
        assert_eq!(solver.objective_coefficient(toy.x).unwrap(), 1.5);

        toy.cache.release(&mut solver).unwrap();
        assert_eq!(solver.objective_coefficient(toy.x).unwrap(), 0.5);
    }
}
