use super::{SegmentBase, SegmentParam};
use crate::model::cache::{ConstraintFn, ConstraintSource, ExprCache};

/// Lossless, unconstrained stage.
#[derive(Debug)]
pub struct Passthrough {
    pub(super) base: SegmentBase,
}

impl Passthrough {
    pub const PARAMS: &'static [SegmentParam] = &[];

    pub(super) fn new(base: SegmentBase) -> Self {
        Self { base }
    }
}

impl ConstraintSource for Passthrough {
    type Param = SegmentParam;

    const CONSTRAINTS: &'static [(&'static str, ConstraintFn<Self, SegmentParam>)] = &[];

    fn cache(&self) -> &ExprCache<SegmentParam> {
        &self.base.cache
    }
}
