use super::{SegmentBase, SegmentParam};
use crate::model::cache::{ConstraintFn, ConstraintSource, CostFn, ExprCache};
use crate::model::expr::{Emitted, LinearExpr};
use crate::model::param::Deps;
use crate::solver::VarId;

/// Charges `price(t)·flow(t)·Δt(t)` for the energy entering the segment,
/// independently per direction. Negative prices pay for the flow.
#[derive(Debug)]
pub struct Pricing {
    pub(super) base: SegmentBase,
}

impl Pricing {
    pub const PARAMS: &'static [SegmentParam] = &[SegmentParam::PriceSt, SegmentParam::PriceTs];

    pub(super) fn new(base: SegmentBase) -> Self {
        Self { base }
    }

    fn energy_cost(
        &self,
        key: SegmentParam,
        flow: impl Fn(usize) -> VarId,
        deps: &mut Deps<SegmentParam>,
    ) -> Emitted<LinearExpr> {
        let len = self.base.flows.len();
        let Some(prices) = self.base.params.get(key, deps).expand(len) else {
            return Emitted::None;
        };
        prices
            .iter()
            .enumerate()
            .map(|(t, price)| LinearExpr::term(flow(t), price * self.base.duration(t)))
            .collect::<Vec<_>>()
            .into()
    }

    fn price_st(&self, deps: &mut Deps<SegmentParam>) -> Emitted<LinearExpr> {
        let flows = &self.base.flows;
        self.energy_cost(SegmentParam::PriceSt, |t| flows.st(t), deps)
    }

    fn price_ts(&self, deps: &mut Deps<SegmentParam>) -> Emitted<LinearExpr> {
        let flows = &self.base.flows;
        self.energy_cost(SegmentParam::PriceTs, |t| flows.ts(t), deps)
    }
}

impl ConstraintSource for Pricing {
    type Param = SegmentParam;

    const CONSTRAINTS: &'static [(&'static str, ConstraintFn<Self, SegmentParam>)] = &[];

    const COSTS: &'static [(&'static str, CostFn<Self, SegmentParam>)] =
        &[("price_st", Self::price_st), ("price_ts", Self::price_ts)];

    fn cache(&self) -> &ExprCache<SegmentParam> {
        &self.base.cache
    }
}
