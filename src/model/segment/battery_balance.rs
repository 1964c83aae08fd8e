//! Balancing link between two stacked sections of one physical battery
//!
//! The source element is the upper section, the target the lower one. Flow
//! down (`st`) is chosen by the optimizer. Flow up (`ts`) is forced: when the
//! lower section's capacity shrinks between two boundaries, the energy that no
//! longer fits is pushed up, `ts(t) = shrink(t) / Δt(t)` with
//! `shrink(t) = max(0, cap(t) − cap(t + 1))`.
//!
//! Two soft rules make lower sections fill before upper ones keep energy:
//!
//! * `st(t)·Δt + absorbed(t) >= shrink(t)` with `0 <= absorbed(t) <= shrink(t)`:
//!   what was pushed up flows back down unless the upper section absorbs it.
//! * in every period, `st(t)·Δt + shortfall(t) >= cap(t + 1) − stored_lower(t + 1)`:
//!   the flow down covers the room left in the lower section, so the upper
//!   section only keeps energy once the lower one is full.
//!
//! Both slacks cost `penalty` per kWh, which has to dominate every energy
//! price in the model.

use super::{LowerSection, SegmentBase, SegmentParam};
use crate::error::ModelResult;
use crate::model::cache::{ConstraintFn, ConstraintSource, CostFn, ExprCache};
use crate::model::expr::{Constraint, Emitted, LinearExpr};
use crate::model::output::{ModelOutput, OutputMap, OutputType};
use crate::model::param::Deps;
use crate::solver::{Solution, SolverAdapter, VarId};

/// Default slack penalty, currency per kWh.
pub const DEFAULT_BALANCE_PENALTY: f64 = 1000.0;

#[derive(Debug)]
pub struct BatteryBalance {
    pub(super) base: SegmentBase,
    lower: LowerSection,
    absorbed: Vec<VarId>,
    shortfall: Vec<VarId>,
}

impl BatteryBalance {
    pub const PARAMS: &'static [SegmentParam] = &[SegmentParam::Penalty];

    pub(super) fn new(base: SegmentBase, lower: LowerSection, solver: &mut dyn SolverAdapter) -> Self {
        let len = base.flows.len();
        let absorbed = (0..len).map(|_| solver.add_variable(0.0, f64::INFINITY)).collect();
        let shortfall = (0..len).map(|_| solver.add_variable(0.0, f64::INFINITY)).collect();
        Self {
            base,
            lower,
            absorbed,
            shortfall,
        }
    }

    pub(super) fn release_slacks(&mut self, solver: &mut dyn SolverAdapter) -> ModelResult<()> {
        for var in self.absorbed.drain(..).chain(self.shortfall.drain(..)) {
            solver.remove_variable(var)?;
        }
        Ok(())
    }

    fn capacity(&self, deps: &mut Deps<SegmentParam>) -> Option<Vec<f64>> {
        self.base
            .params
            .get(SegmentParam::LowerCapacity, deps)
            .expand(self.base.flows.len() + 1)
    }

    fn shrink(capacity: &[f64], t: usize) -> f64 {
        (capacity[t] - capacity[t + 1]).max(0.0)
    }

    fn forced_up(&self, deps: &mut Deps<SegmentParam>) -> Emitted<Constraint> {
        let capacity = self.capacity(deps);
        (0..self.base.flows.len())
            .map(|t| {
                let up = match &capacity {
                    Some(capacity) => Self::shrink(capacity, t) / self.base.duration(t),
                    None => 0.0,
                };
                LinearExpr::var(self.base.flows.ts(t)).equals(up)
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn down_energy(&self, t: usize) -> LinearExpr {
        LinearExpr::term(self.base.flows.st(t), self.base.duration(t))
    }

    fn absorb_shrink(&self, deps: &mut Deps<SegmentParam>) -> Emitted<Constraint> {
        let Some(capacity) = self.capacity(deps) else {
            return Emitted::None;
        };
        (0..self.base.flows.len())
            .map(|t| {
                (self.down_energy(t) + LinearExpr::var(self.absorbed[t]))
                    .geq(Self::shrink(&capacity, t))
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn absorbed_max(&self, deps: &mut Deps<SegmentParam>) -> Emitted<Constraint> {
        let Some(capacity) = self.capacity(deps) else {
            return Emitted::None;
        };
        (0..self.base.flows.len())
            .map(|t| LinearExpr::var(self.absorbed[t]).leq(Self::shrink(&capacity, t)))
            .collect::<Vec<_>>()
            .into()
    }

    fn fill_lower(&self, deps: &mut Deps<SegmentParam>) -> Emitted<Constraint> {
        let Some(capacity) = self.capacity(deps) else {
            return Emitted::None;
        };
        (0..self.base.flows.len())
            .map(|t| {
                let lhs = self.down_energy(t)
                    + LinearExpr::var(self.shortfall[t])
                    + self.lower.stored[t].clone();
                lhs.geq(capacity[t + 1])
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn slack_penalty(&self, deps: &mut Deps<SegmentParam>) -> Emitted<LinearExpr> {
        let penalty = self
            .base
            .params
            .get(SegmentParam::Penalty, deps)
            .scalar()
            .unwrap_or(DEFAULT_BALANCE_PENALTY);
        self.absorbed
            .iter()
            .chain(&self.shortfall)
            .map(|slack| LinearExpr::term(*slack, penalty))
            .collect::<Vec<_>>()
            .into()
    }

    pub(super) fn outputs(&self, solution: &Solution, outputs: &mut OutputMap) {
        let energy = |vars: &[VarId]| -> Vec<f64> {
            vars.iter().map(|v| solution.value(*v).unwrap_or(0.0)).collect()
        };
        let name = &self.base.name;
        outputs.insert(
            format!("{name}_absorbed"),
            ModelOutput::new(OutputType::Energy, energy(&self.absorbed)),
        );
        outputs.insert(
            format!("{name}_shortfall"),
            ModelOutput::new(OutputType::Energy, energy(&self.shortfall)),
        );
    }
}

impl ConstraintSource for BatteryBalance {
    type Param = SegmentParam;

    const CONSTRAINTS: &'static [(&'static str, ConstraintFn<Self, SegmentParam>)] = &[
        ("forced_up", Self::forced_up),
        ("absorb_shrink", Self::absorb_shrink),
        ("absorbed_max", Self::absorbed_max),
        ("fill_lower", Self::fill_lower),
    ];

    const COSTS: &'static [(&'static str, CostFn<Self, SegmentParam>)] =
        &[("slack_penalty", Self::slack_penalty)];

    fn cache(&self) -> &ExprCache<SegmentParam> {
        &self.base.cache
    }
}
