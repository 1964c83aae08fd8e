//! Junction, source and sink element

use strum::{Display, IntoStaticStr};
use tracing::trace;

use crate::error::ModelResult;
use crate::model::cache::{ApplyReport, ConstraintFn, ConstraintSource, ExprCache};
use crate::model::expr::{Constraint, Emitted, LinearExpr};
use crate::model::output::{ModelOutput, OutputMap, OutputType};
use crate::model::param::{Deps, ParamKey, ParamStore, Shape};
use crate::model::periods::Periods;
use crate::solver::{Solution, SolverAdapter, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum NodeParam {
    /// Folded power of all attached connections, maintained by the network.
    ConnectionPower,
}

impl ParamKey for NodeParam {
    fn name(self) -> &'static str {
        self.into()
    }

    fn shape(self) -> Shape {
        Shape::Periods
    }
}

/// A balancing point. A source may inject power (`P_out`), a sink may absorb
/// it (`P_in`); a node that is neither is a pure Kirchhoff junction.
#[derive(Debug)]
pub struct Node {
    name: String,
    periods: Periods,
    is_source: bool,
    is_sink: bool,
    params: ParamStore<NodeParam>,
    power_in: Vec<VarId>,
    power_out: Vec<VarId>,
    port: Vec<LinearExpr>,
    cache: ExprCache<NodeParam>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        periods: Periods,
        is_source: bool,
        is_sink: bool,
        solver: &mut dyn SolverAdapter,
    ) -> Self {
        let len = periods.len();
        let mut columns = |enabled: bool| -> Vec<VarId> {
            if enabled {
                (0..len).map(|_| solver.add_variable(0.0, f64::INFINITY)).collect()
            } else {
                Vec::new()
            }
        };
        let power_in = columns(is_sink);
        let power_out = columns(is_source);
        Self {
            name: name.into(),
            params: ParamStore::new(len),
            port: vec![LinearExpr::zero(); len],
            periods,
            is_source,
            is_sink,
            power_in,
            power_out,
            cache: ExprCache::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn periods(&self) -> &Periods {
        &self.periods
    }

    pub fn is_source(&self) -> bool {
        self.is_source
    }

    pub fn is_sink(&self) -> bool {
        self.is_sink
    }

    pub(crate) fn set_port(&mut self, port: Vec<LinearExpr>) -> bool {
        if self.port == port {
            return false;
        }
        self.port = port;
        self.params.mark_dirty(NodeParam::ConnectionPower);
        true
    }

    pub(crate) fn sync(&mut self) -> usize {
        let dirty = self.params.take_dirty();
        let invalidated = self.cache.invalidate(&dirty);
        if invalidated > 0 {
            trace!(node = %self.name, invalidated, "connections changed");
        }
        invalidated
    }

    pub(crate) fn apply(&self, solver: &mut dyn SolverAdapter) -> ModelResult<ApplyReport> {
        let mut report = self.apply_constraints(solver)?;
        report += self.apply_costs(solver)?;
        Ok(report)
    }

    pub(crate) fn release(&mut self, solver: &mut dyn SolverAdapter) -> ModelResult<()> {
        self.cache.release(solver)?;
        for var in self.power_in.drain(..).chain(self.power_out.drain(..)) {
            solver.remove_variable(var)?;
        }
        Ok(())
    }

    fn power_balance(&self, deps: &mut Deps<NodeParam>) -> Emitted<Constraint> {
        deps.record(NodeParam::ConnectionPower);
        (0..self.periods.len())
            .map(|t| {
                let mut net = self.port[t].clone();
                if let Some(out) = self.power_out.get(t) {
                    net += LinearExpr::var(*out);
                }
                if let Some(inp) = self.power_in.get(t) {
                    net -= LinearExpr::var(*inp);
                }
                net.equals(0.0)
            })
            .collect::<Vec<_>>()
            .into()
    }

    pub fn outputs(&self, solution: &Solution) -> OutputMap {
        let series = |vars: &[VarId]| -> Vec<f64> {
            vars.iter().map(|v| solution.value(*v).unwrap_or(0.0)).collect()
        };

        let mut outputs = OutputMap::new();
        if self.is_sink {
            outputs.insert(
                "node_power_in".into(),
                ModelOutput::new(OutputType::Power, series(&self.power_in)),
            );
        }
        if self.is_source {
            outputs.insert(
                "node_power_out".into(),
                ModelOutput::new(OutputType::Power, series(&self.power_out)),
            );
        }
        if let Some(rows) = self.cache.rows("power_balance") {
            // Rows balance power; divide by the period length for a per-kWh price.
            let prices = rows
                .iter()
                .enumerate()
                .map(|(t, row)| solution.dual(*row).unwrap_or(0.0) / self.periods.duration(t))
                .collect();
            outputs.insert(
                "node_power_balance".into(),
                ModelOutput::new(OutputType::ShadowPrice, prices),
            );
        }
        outputs
    }
}

impl ConstraintSource for Node {
    type Param = NodeParam;

    const CONSTRAINTS: &'static [(&'static str, ConstraintFn<Self, NodeParam>)] =
        &[("power_balance", Self::power_balance)];

    fn cache(&self) -> &ExprCache<NodeParam> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::HighsSolver;

    #[test]
    fn test_columns_follow_flags() {
        let mut solver = HighsSolver::default();
        let periods = Periods::uniform(4, 0.5).unwrap();
        let junction = Node::new("bus", periods.clone(), false, false, &mut solver);
        assert_eq!(solver.num_variables(), 0);
        let grid = Node::new("grid", periods, true, true, &mut solver);
        assert_eq!(solver.num_variables(), 8);
        assert!(junction.power_in.is_empty());
        assert_eq!(grid.power_out.len(), 4);
    }

    #[test]
    fn test_port_change_marks_balance_stale() {
        let mut solver = HighsSolver::default();
        let periods = Periods::uniform(1, 1.0).unwrap();
        let mut node = Node::new("grid", periods, true, false, &mut solver);
        node.sync();
        node.apply(&mut solver).unwrap();

        let x = solver.add_variable(0.0, 1.0);
        assert!(node.set_port(vec![LinearExpr::var(x)]));
        assert!(!node.set_port(vec![LinearExpr::var(x)]));
        assert_eq!(node.sync(), 1);
        let report = node.apply(&mut solver).unwrap();
        assert_eq!(report.coefficient_changes, 1);
        assert_eq!(report.rows_added, 0);
    }
}
