//! Multi-segment power path between two elements
//!
//! Segments are chained in insertion order. For `K` segments the connection
//! emits `K − 1` linking equalities per direction:
//!
//! * `gain_st(i)·st_i(t) = st_{i+1}(t)` (power handed downstream)
//! * `gain_ts(i+1)·ts_{i+1}(t) = ts_i(t)` (power handed upstream)
//!
//! and exposes the folded power at both ends, so endpoint elements never look
//! at the segments themselves.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use itertools::Itertools;
use tracing::{debug, trace};

use crate::error::{ConfigurationError, ModelResult};
use crate::model::cache::{ApplyReport, ConstraintFn, ConstraintSource, ExprCache};
use crate::model::expr::{Constraint, Emitted, LinearExpr};
use crate::model::network::ElementId;
use crate::model::output::{ModelOutput, OutputMap, OutputType};
use crate::model::param::{Deps, ParamKey, ParamValue, Shape};
use crate::model::periods::Periods;
use crate::model::segment::{Direction, LowerSection, Segment, SegmentKind, SegmentParam, SegmentSpec};
use crate::solver::{Solution, SolverAdapter};

/// Segment parameter as seen by the connection's link constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey {
    pub segment: usize,
    pub param: SegmentParam,
}

impl ParamKey for LinkKey {
    fn name(self) -> &'static str {
        self.param.name()
    }

    fn shape(self) -> Shape {
        self.param.shape()
    }
}

#[derive(Debug)]
pub struct Connection {
    source: ElementId,
    target: ElementId,
    source_name: String,
    target_name: String,
    periods: Periods,
    segments: IndexMap<String, Segment>,
    cache: ExprCache<LinkKey>,
}

impl Connection {
    /// Build every segment of the chain. `lower` is required when the chain
    /// contains a battery-balance segment.
    pub(crate) fn new(
        (source, source_name): (ElementId, &str),
        (target, target_name): (ElementId, &str),
        periods: Periods,
        specs: &IndexMap<String, SegmentSpec>,
        lower: Option<LowerSection>,
        solver: &mut dyn SolverAdapter,
    ) -> ModelResult<Self> {
        let passthrough;
        let specs = if specs.is_empty() {
            passthrough = IndexMap::from([("passthrough".to_string(), SegmentSpec::Passthrough)]);
            &passthrough
        } else {
            specs
        };

        let mut segments: IndexMap<String, Segment> = IndexMap::with_capacity(specs.len());
        for (name, spec) in specs {
            let lower = match spec.kind() {
                SegmentKind::BatteryBalance => lower.clone(),
                _ => None,
            };
            match Segment::build(name, spec, periods.clone(), lower, solver) {
                Ok(segment) => {
                    segments.insert(name.clone(), segment);
                }
                Err(err) => {
                    for segment in segments.values_mut() {
                        segment.release(solver)?;
                    }
                    return Err(err);
                }
            }
        }

        debug!(
            source = source_name,
            target = target_name,
            segments = %segments.keys().join(","),
            "connection built"
        );
        Ok(Self {
            source,
            target,
            source_name: source_name.to_string(),
            target_name: target_name.to_string(),
            periods,
            segments,
            cache: ExprCache::new(),
        })
    }

    /// `source->target`
    pub fn id(&self) -> String {
        format!("{}->{}", self.source_name, self.target_name)
    }

    pub fn source(&self) -> ElementId {
        self.source
    }

    pub fn target(&self) -> ElementId {
        self.target
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn periods(&self) -> &Periods {
        &self.periods
    }

    pub fn segments(&self) -> impl Iterator<Item = (&str, &Segment)> {
        self.segments.iter().map(|(name, s)| (name.as_str(), s))
    }

    pub fn segment(&self, name: &str) -> ModelResult<&Segment> {
        self.segments
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownSegment(name.to_string()).into())
    }

    pub fn segment_mut(&mut self, name: &str) -> ModelResult<&mut Segment> {
        self.segments
            .get_mut(name)
            .ok_or_else(|| ConfigurationError::UnknownSegment(name.to_string()).into())
    }

    /// Shorthand for `segment_mut(name)?.set(key, value)`.
    pub fn set(&mut self, segment: &str, key: SegmentParam, value: impl Into<ParamValue>) -> ModelResult<bool> {
        self.segment_mut(segment)?.set(key, value)
    }

    pub fn has_battery_balance(&self) -> bool {
        self.segments
            .values()
            .any(|s| s.kind() == SegmentKind::BatteryBalance)
    }

    fn first(&self) -> &Segment {
        &self.segments[0]
    }

    fn last(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    /// Net power delivered into the target element in period `t`.
    pub fn power_into_target(&self, t: usize) -> LinearExpr {
        let last = self.last();
        let flows = last.flows();
        LinearExpr::term(flows.st(t), last.gain(Direction::SourceToTarget, t))
            - LinearExpr::var(flows.ts(t))
    }

    /// Net power delivered into the source element in period `t`.
    pub fn power_into_source(&self, t: usize) -> LinearExpr {
        let first = self.first();
        let flows = first.flows();
        LinearExpr::term(flows.ts(t), first.gain(Direction::TargetToSource, t))
            - LinearExpr::var(flows.st(t))
    }

    pub(crate) fn mirror_lower_capacity(&mut self, capacity: &ParamValue) -> ModelResult<bool> {
        let mut changed = false;
        for segment in self.segments.values_mut() {
            changed |= segment.mirror_lower_capacity(capacity)?;
        }
        Ok(changed)
    }

    /// Invalidate links whose gains changed, then let the segments drain
    /// their own pending writes.
    pub(crate) fn sync(&mut self) -> usize {
        let changed: BTreeSet<LinkKey> = self
            .segments
            .values()
            .enumerate()
            .flat_map(|(segment, s)| s.pending().map(move |param| LinkKey { segment, param }))
            .collect();
        let mut invalidated = self.cache.invalidate(&changed);
        for segment in self.segments.values_mut() {
            invalidated += segment.sync();
        }
        if invalidated > 0 {
            trace!(connection = %self.id(), invalidated, "parameters changed");
        }
        invalidated
    }

    pub(crate) fn apply(&self, solver: &mut dyn SolverAdapter) -> ModelResult<ApplyReport> {
        let mut report = self.apply_constraints(solver)?;
        for segment in self.segments.values() {
            report += segment.apply(solver)?;
        }
        Ok(report)
    }

    pub(crate) fn release(&mut self, solver: &mut dyn SolverAdapter) -> ModelResult<()> {
        self.cache.release(solver)?;
        for segment in self.segments.values_mut() {
            segment.release(solver)?;
        }
        Ok(())
    }

    fn gain(&self, index: usize, direction: Direction, t: usize, deps: &mut Deps<LinkKey>) -> f64 {
        let segment = &self.segments[index];
        match segment.gain_param(direction) {
            Some(param) => {
                deps.record(LinkKey { segment: index, param });
                segment.param(param).at(t).unwrap_or(1.0)
            }
            None => 1.0,
        }
    }

    fn link_st(&self, deps: &mut Deps<LinkKey>) -> Emitted<Constraint> {
        let mut rows = Vec::new();
        for i in 1..self.segments.len() {
            let (upstream, downstream) = (self.segments[i - 1].flows(), self.segments[i].flows());
            for t in 0..self.periods.len() {
                let gain = self.gain(i - 1, Direction::SourceToTarget, t, deps);
                let handed = LinearExpr::term(upstream.st(t), gain);
                rows.push(handed.equals(LinearExpr::var(downstream.st(t))));
            }
        }
        rows.into()
    }

    fn link_ts(&self, deps: &mut Deps<LinkKey>) -> Emitted<Constraint> {
        let mut rows = Vec::new();
        for i in 1..self.segments.len() {
            let (upstream, downstream) = (self.segments[i - 1].flows(), self.segments[i].flows());
            for t in 0..self.periods.len() {
                let gain = self.gain(i, Direction::TargetToSource, t, deps);
                let handed = LinearExpr::term(downstream.ts(t), gain);
                rows.push(handed.equals(LinearExpr::var(upstream.ts(t))));
            }
        }
        rows.into()
    }

    pub fn outputs(&self, solution: &Solution) -> OutputMap {
        let len = self.periods.len();
        let mut outputs = OutputMap::new();
        outputs.insert(
            "connection_power_into_target".into(),
            ModelOutput::new(
                OutputType::Power,
                (0..len).map(|t| self.power_into_target(t).evaluate(solution)).collect(),
            ),
        );
        outputs.insert(
            "connection_power_into_source".into(),
            ModelOutput::new(
                OutputType::Power,
                (0..len).map(|t| self.power_into_source(t).evaluate(solution)).collect(),
            ),
        );
        for segment in self.segments.values() {
            segment.outputs(solution, &mut outputs);
        }
        outputs
    }
}

impl ConstraintSource for Connection {
    type Param = LinkKey;

    const CONSTRAINTS: &'static [(&'static str, ConstraintFn<Self, LinkKey>)] =
        &[("link_st", Self::link_st), ("link_ts", Self::link_ts)];

    fn cache(&self) -> &ExprCache<LinkKey> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::HighsSolver;

    fn build(specs: IndexMap<String, SegmentSpec>, solver: &mut HighsSolver) -> Connection {
        Connection::new(
            (ElementId(0), "a"),
            (ElementId(1), "b"),
            Periods::uniform(2, 1.0).unwrap(),
            &specs,
            None,
            solver,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_chain_gets_a_passthrough() {
        let mut solver = HighsSolver::default();
        let mut c = build(IndexMap::new(), &mut solver);
        assert_eq!(c.segments().count(), 1);
        assert_eq!(c.id(), "a->b");
        c.sync();
        let report = c.apply(&mut solver).unwrap();
        assert_eq!(report.rows_added, 0);
    }

    #[test]
    fn test_links_per_direction() {
        let mut solver = HighsSolver::default();
        let specs = IndexMap::from([
            ("loss".to_string(), SegmentSpec::efficiency(0.9)),
            ("wire".to_string(), SegmentSpec::Passthrough),
            ("cap".to_string(), SegmentSpec::power_limit(5.0)),
        ]);
        let mut c = build(specs, &mut solver);
        c.sync();
        c.apply_constraints(&mut solver).unwrap();
        assert_eq!(c.cache.rows("link_st").unwrap().len(), 4);
        assert_eq!(c.cache.rows("link_ts").unwrap().len(), 4);
        assert_eq!(
            c.cache.dependencies("link_st"),
            Some(vec![LinkKey {
                segment: 0,
                param: SegmentParam::EfficiencySt
            }])
        );
    }

    #[test]
    fn test_efficiency_write_patches_links_only() {
        let mut solver = HighsSolver::default();
        let specs = IndexMap::from([
            ("loss".to_string(), SegmentSpec::efficiency(0.9)),
            ("cap".to_string(), SegmentSpec::power_limit(5.0)),
        ]);
        let mut c = build(specs, &mut solver);
        c.sync();
        c.apply(&mut solver).unwrap();

        c.set("loss", SegmentParam::EfficiencySt, 0.8).unwrap();
        c.sync();
        let report = c.apply(&mut solver).unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.coefficient_changes, 2);
        assert_eq!(report.rows_added, 0);
    }

    #[test]
    fn test_unknown_segment() {
        let mut solver = HighsSolver::default();
        let mut c = build(IndexMap::new(), &mut solver);
        assert!(c.set("missing", SegmentParam::PriceSt, 1.0).is_err());
    }

    #[test]
    fn test_terminal_power_folds_losses() {
        let mut solver = HighsSolver::default();
        let specs = IndexMap::from([
            ("cap".to_string(), SegmentSpec::power_limit(5.0)),
            ("loss".to_string(), SegmentSpec::efficiency(0.9)),
        ]);
        let c = build(specs, &mut solver);
        let last = c.segment("loss").unwrap().flows();
        let into_target = c.power_into_target(0);
        assert_eq!(into_target.coefficient(last.st(0)), 0.9);
        assert_eq!(into_target.coefficient(last.ts(0)), -1.0);
    }
}
