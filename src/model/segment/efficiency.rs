use super::{SegmentBase, SegmentParam};
use crate::model::cache::{ConstraintFn, ConstraintSource, ExprCache};

/// Per-direction loss applied to the power handed on to the next stage.
///
/// The efficiency adds no rows of its own; the connection reads it as the gain
/// of the link leaving this segment. Unset means lossless.
#[derive(Debug)]
pub struct Efficiency {
    pub(super) base: SegmentBase,
}

impl Efficiency {
    pub const PARAMS: &'static [SegmentParam] =
        &[SegmentParam::EfficiencySt, SegmentParam::EfficiencyTs];

    pub(super) fn new(base: SegmentBase) -> Self {
        Self { base }
    }
}

impl ConstraintSource for Efficiency {
    type Param = SegmentParam;

    const CONSTRAINTS: &'static [(&'static str, ConstraintFn<Self, SegmentParam>)] = &[];

    fn cache(&self) -> &ExprCache<SegmentParam> {
        &self.base.cache
    }
}
