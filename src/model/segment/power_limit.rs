use super::{SegmentBase, SegmentParam};
use crate::model::cache::{ConstraintFn, ConstraintSource, ExprCache};
use crate::model::expr::{Constraint, Emitted, LinearExpr};
use crate::model::output::{ModelOutput, OutputMap, OutputType};
use crate::model::param::Deps;
use crate::solver::{Solution, VarId};

/// Per-direction power cap.
///
/// An unset limit leaves the direction unbounded, a zero limit forbids it.
/// A fixed direction must carry exactly its limit.
#[derive(Debug)]
pub struct PowerLimit {
    pub(super) base: SegmentBase,
    fixed_st: bool,
    fixed_ts: bool,
}

impl PowerLimit {
    pub const PARAMS: &'static [SegmentParam] = &[SegmentParam::MaxSt, SegmentParam::MaxTs];

    pub(super) fn new(base: SegmentBase, fixed_st: bool, fixed_ts: bool) -> Self {
        Self {
            base,
            fixed_st,
            fixed_ts,
        }
    }

    pub fn is_fixed_st(&self) -> bool {
        self.fixed_st
    }

    pub fn is_fixed_ts(&self) -> bool {
        self.fixed_ts
    }

    fn limit(
        &self,
        key: SegmentParam,
        fixed: bool,
        flow: impl Fn(usize) -> VarId,
        deps: &mut Deps<SegmentParam>,
    ) -> Emitted<Constraint> {
        let Some(max) = self
            .base
            .params
            .get(key, deps)
            .expand(self.base.flows.len())
        else {
            return Emitted::None;
        };
        max.iter()
            .enumerate()
            .map(|(t, max)| {
                let power = LinearExpr::var(flow(t));
                if fixed {
                    power.equals(*max)
                } else {
                    power.leq(*max)
                }
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn max_st(&self, deps: &mut Deps<SegmentParam>) -> Emitted<Constraint> {
        let flows = &self.base.flows;
        self.limit(SegmentParam::MaxSt, self.fixed_st, |t| flows.st(t), deps)
    }

    fn max_ts(&self, deps: &mut Deps<SegmentParam>) -> Emitted<Constraint> {
        let flows = &self.base.flows;
        self.limit(SegmentParam::MaxTs, self.fixed_ts, |t| flows.ts(t), deps)
    }

    /// Both directions share one capacity: `st/max_st + ts/max_ts <= 1`.
    fn time_slice(&self, deps: &mut Deps<SegmentParam>) -> Emitted<Constraint> {
        let len = self.base.flows.len();
        let (Some(max_st), Some(max_ts)) = (
            self.base.params.get(SegmentParam::MaxSt, deps).expand(len),
            self.base.params.get(SegmentParam::MaxTs, deps).expand(len),
        ) else {
            return Emitted::None;
        };
        let share = |max: f64| if max > 0.0 { 1.0 / max } else { 0.0 };
        (0..len)
            .map(|t| {
                let used = LinearExpr::term(self.base.flows.st(t), share(max_st[t]))
                    + LinearExpr::term(self.base.flows.ts(t), share(max_ts[t]));
                used.leq(1.0)
            })
            .collect::<Vec<_>>()
            .into()
    }

    /// The `time_slice` rows are normalised to a right-hand side of 1, so
    /// their duals price a whole period of shared capacity, not a kWh.
    pub(super) fn outputs(&self, solution: &Solution, outputs: &mut OutputMap) {
        if let Some(prices) = self.base.shadow_prices("time_slice", solution) {
            outputs.insert(
                format!("{}_time_slice", self.base.name),
                ModelOutput::new(OutputType::CapacityPrice, prices),
            );
        }
    }
}

impl ConstraintSource for PowerLimit {
    type Param = SegmentParam;

    const CONSTRAINTS: &'static [(&'static str, ConstraintFn<Self, SegmentParam>)] = &[
        ("max_st", Self::max_st),
        ("max_ts", Self::max_ts),
        ("time_slice", Self::time_slice),
    ];

    fn cache(&self) -> &ExprCache<SegmentParam> {
        &self.base.cache
    }
}

#[cfg(test)]
mod tests {
    use crate::model::output::{OutputMap, OutputType};
    use crate::model::param::ParamValue;
    use crate::model::periods::Periods;
    use crate::model::segment::{Segment, SegmentParam, SegmentSpec};
    use crate::solver::{HighsSolver, SolverAdapter};

    #[test]
    fn test_shared_capacity_row_needs_both_limits() {
        let mut solver = HighsSolver::default();
        let spec = SegmentSpec::PowerLimit {
            max_st: Some(ParamValue::Scalar(4.0)),
            max_ts: None,
            fixed_st: false,
            fixed_ts: false,
        };
        let periods = Periods::uniform(3, 1.0).unwrap();
        let mut segment = Segment::build("limit", &spec, periods, None, &mut solver).unwrap();
        segment.sync();
        let report = segment.apply(&mut solver).unwrap();
        assert_eq!(report.rows_added, 3);

        segment.set(SegmentParam::MaxTs, 2.0).unwrap();
        segment.sync();
        let report = segment.apply(&mut solver).unwrap();
        // max_ts and time_slice appear, max_st is untouched.
        assert_eq!(report.rows_added, 6);
        assert_eq!(report.rows_removed, 0);
        assert_eq!(solver.stats().rows_added, 9);
    }

    #[test]
    fn test_time_slice_duals_are_capacity_prices() {
        let mut solver = HighsSolver::default();
        let spec = SegmentSpec::PowerLimit {
            max_st: Some(ParamValue::Scalar(4.0)),
            max_ts: Some(ParamValue::Scalar(2.0)),
            fixed_st: false,
            fixed_ts: false,
        };
        let periods = Periods::uniform(2, 1.0).unwrap();
        let mut segment = Segment::build("link", &spec, periods, None, &mut solver).unwrap();
        segment.sync();
        segment.apply(&mut solver).unwrap();

        // Reward both directions; the shared row caps the sum of shares.
        for t in 0..2 {
            solver.change_objective_coefficient(segment.flows().st(t), -1.0).unwrap();
            solver.change_objective_coefficient(segment.flows().ts(t), -1.0).unwrap();
        }
        let solution = solver.solve().unwrap();
        assert!((solution.objective + 8.0).abs() < 1e-6);

        let mut outputs = OutputMap::new();
        segment.outputs(&solution, &mut outputs);
        let slice = &outputs["link_time_slice"];
        assert_eq!(slice.kind, OutputType::CapacityPrice);
        assert_eq!(slice.unit, "$");
        assert_eq!(slice.values.len(), 2);
        // Minimising, so a binding `<=` row has a non-positive dual.
        assert!(slice.values.iter().all(|v| *v <= 1e-9));
    }
}
