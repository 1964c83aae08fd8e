//! Segments: the stages of a connection's power path
//!
//! Every segment owns two non-negative flow columns per period: `st`, the power
//! entering it in the source→target direction, and `ts`, the power entering it
//! in the target→source direction. The connection links neighbouring segments;
//! a segment only adds its own constraints and costs on top of its flows.

pub mod battery_balance;
pub mod efficiency;
pub mod passthrough;
pub mod power_limit;
pub mod pricing;

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tracing::trace;

pub use battery_balance::{BatteryBalance, DEFAULT_BALANCE_PENALTY};
pub use efficiency::Efficiency;
pub use passthrough::Passthrough;
pub use power_limit::PowerLimit;
pub use pricing::Pricing;

use crate::error::{ConfigurationError, ModelResult};
use crate::model::cache::{ApplyReport, ConstraintSource, ExprCache};
use crate::model::expr::LinearExpr;
use crate::model::output::{ModelOutput, OutputMap, OutputType};
use crate::model::param::{ParamKey, ParamStore, ParamValue, Shape};
use crate::model::periods::Periods;
use crate::solver::{Solution, SolverAdapter, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SegmentParam {
    EfficiencySt,
    EfficiencyTs,
    MaxSt,
    MaxTs,
    PriceSt,
    PriceTs,
    /// Cost per kWh of battery-balance slack.
    Penalty,
    /// Capacity of the lower battery section, mirrored by the network.
    LowerCapacity,
}

impl ParamKey for SegmentParam {
    fn name(self) -> &'static str {
        self.into()
    }

    fn shape(self) -> Shape {
        match self {
            SegmentParam::Penalty => Shape::Scalar,
            SegmentParam::LowerCapacity => Shape::Boundaries,
            _ => Shape::Periods,
        }
    }

    fn validate(self, value: f64) -> Result<(), &'static str> {
        match self {
            SegmentParam::EfficiencySt | SegmentParam::EfficiencyTs
                if value <= 0.0 || value > 1.0 =>
            {
                Err("efficiency must be in (0, 1]")
            }
            SegmentParam::MaxSt
            | SegmentParam::MaxTs
            | SegmentParam::Penalty
            | SegmentParam::LowerCapacity
                if value < 0.0 =>
            {
                Err("must not be negative")
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SegmentKind {
    Passthrough,
    Efficiency,
    PowerLimit,
    Pricing,
    BatteryBalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SourceToTarget,
    TargetToSource,
}

/// Structural description of a segment plus optional initial values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentSpec {
    Passthrough,
    Efficiency {
        #[serde(default)]
        efficiency_st: Option<ParamValue>,
        #[serde(default)]
        efficiency_ts: Option<ParamValue>,
    },
    PowerLimit {
        #[serde(default)]
        max_st: Option<ParamValue>,
        #[serde(default)]
        max_ts: Option<ParamValue>,
        /// Turn `max_st` into an exact setpoint.
        #[serde(default)]
        fixed_st: bool,
        #[serde(default)]
        fixed_ts: bool,
    },
    Pricing {
        #[serde(default)]
        price_st: Option<ParamValue>,
        #[serde(default)]
        price_ts: Option<ParamValue>,
    },
    BatteryBalance {
        #[serde(default)]
        penalty: Option<f64>,
    },
}

impl SegmentSpec {
    pub fn kind(&self) -> SegmentKind {
        match self {
            SegmentSpec::Passthrough => SegmentKind::Passthrough,
            SegmentSpec::Efficiency { .. } => SegmentKind::Efficiency,
            SegmentSpec::PowerLimit { .. } => SegmentKind::PowerLimit,
            SegmentSpec::Pricing { .. } => SegmentKind::Pricing,
            SegmentSpec::BatteryBalance { .. } => SegmentKind::BatteryBalance,
        }
    }

    /// Same efficiency in both directions.
    pub fn efficiency(eta: impl Into<ParamValue>) -> Self {
        let eta = eta.into();
        SegmentSpec::Efficiency {
            efficiency_st: Some(eta.clone()),
            efficiency_ts: Some(eta),
        }
    }

    /// Same power limit in both directions.
    pub fn power_limit(max: impl Into<ParamValue>) -> Self {
        let max = max.into();
        SegmentSpec::PowerLimit {
            max_st: Some(max.clone()),
            max_ts: Some(max),
            fixed_st: false,
            fixed_ts: false,
        }
    }

    pub fn pricing(price_st: impl Into<ParamValue>, price_ts: impl Into<ParamValue>) -> Self {
        SegmentSpec::Pricing {
            price_st: Some(price_st.into()),
            price_ts: Some(price_ts.into()),
        }
    }

    fn initial_values(&self) -> Vec<(SegmentParam, ParamValue)> {
        let pairs = match self {
            SegmentSpec::Passthrough => vec![],
            SegmentSpec::Efficiency {
                efficiency_st,
                efficiency_ts,
            } => vec![
                (SegmentParam::EfficiencySt, efficiency_st.clone()),
                (SegmentParam::EfficiencyTs, efficiency_ts.clone()),
            ],
            SegmentSpec::PowerLimit { max_st, max_ts, .. } => vec![
                (SegmentParam::MaxSt, max_st.clone()),
                (SegmentParam::MaxTs, max_ts.clone()),
            ],
            SegmentSpec::Pricing { price_st, price_ts } => vec![
                (SegmentParam::PriceSt, price_st.clone()),
                (SegmentParam::PriceTs, price_ts.clone()),
            ],
            SegmentSpec::BatteryBalance { penalty } => {
                vec![(SegmentParam::Penalty, penalty.map(ParamValue::Scalar))]
            }
        };
        pairs
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect()
    }
}

/// Flow columns shared by every segment kind
#[derive(Debug)]
pub struct SegmentFlows {
    periods: Periods,
    st: Vec<VarId>,
    ts: Vec<VarId>,
}

impl SegmentFlows {
    fn new(periods: Periods, solver: &mut dyn SolverAdapter) -> Self {
        let len = periods.len();
        let st = (0..len).map(|_| solver.add_variable(0.0, f64::INFINITY)).collect();
        let ts = (0..len).map(|_| solver.add_variable(0.0, f64::INFINITY)).collect();
        Self { periods, st, ts }
    }

    pub fn periods(&self) -> &Periods {
        &self.periods
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn st(&self, t: usize) -> VarId {
        self.st[t]
    }

    pub fn ts(&self, t: usize) -> VarId {
        self.ts[t]
    }

    pub fn entering(&self, direction: Direction, t: usize) -> VarId {
        match direction {
            Direction::SourceToTarget => self.st[t],
            Direction::TargetToSource => self.ts[t],
        }
    }

    fn release(&mut self, solver: &mut dyn SolverAdapter) -> ModelResult<()> {
        for var in self.st.drain(..).chain(self.ts.drain(..)) {
            solver.remove_variable(var)?;
        }
        Ok(())
    }

    fn values(vars: &[VarId], solution: &Solution) -> Vec<f64> {
        vars.iter().map(|v| solution.value(*v).unwrap_or(0.0)).collect()
    }
}

/// State every segment kind carries
#[derive(Debug)]
pub struct SegmentBase {
    name: String,
    flows: SegmentFlows,
    params: ParamStore<SegmentParam>,
    cache: ExprCache<SegmentParam>,
}

impl SegmentBase {
    fn new(name: impl Into<String>, periods: Periods, solver: &mut dyn SolverAdapter) -> Self {
        let len = periods.len();
        Self {
            name: name.into(),
            flows: SegmentFlows::new(periods, solver),
            params: ParamStore::new(len),
            cache: ExprCache::new(),
        }
    }

    pub fn flows(&self) -> &SegmentFlows {
        &self.flows
    }

    pub fn params(&self) -> &ParamStore<SegmentParam> {
        &self.params
    }

    fn duration(&self, t: usize) -> f64 {
        self.flows.periods.duration(t)
    }

    fn shadow_prices(&self, constraint: &str, solution: &Solution) -> Option<Vec<f64>> {
        self.cache
            .rows(constraint)
            .map(|rows| rows.iter().map(|r| solution.dual(*r).unwrap_or(0.0)).collect())
    }
}

/// One stage of a connection
#[derive(Debug)]
pub enum Segment {
    Passthrough(Passthrough),
    Efficiency(Efficiency),
    PowerLimit(PowerLimit),
    Pricing(Pricing),
    BatteryBalance(BatteryBalance),
}

/// Stored energy of the lower section at boundaries `1..=T`, handed to a
/// battery-balance segment when it is built.
#[derive(Debug, Clone, PartialEq)]
pub struct LowerSection {
    pub stored: Vec<LinearExpr>,
}

macro_rules! each_kind {
    ($segment:expr, $s:ident => $body:expr) => {
        match $segment {
            Segment::Passthrough($s) => $body,
            Segment::Efficiency($s) => $body,
            Segment::PowerLimit($s) => $body,
            Segment::Pricing($s) => $body,
            Segment::BatteryBalance($s) => $body,
        }
    };
}

impl Segment {
    /// Create the columns of a segment and apply its initial values.
    pub fn build(
        name: &str,
        spec: &SegmentSpec,
        periods: Periods,
        lower: Option<LowerSection>,
        solver: &mut dyn SolverAdapter,
    ) -> ModelResult<Self> {
        let base = SegmentBase::new(name, periods, solver);
        let mut segment = match spec {
            SegmentSpec::Passthrough => Segment::Passthrough(Passthrough::new(base)),
            SegmentSpec::Efficiency { .. } => Segment::Efficiency(Efficiency::new(base)),
            SegmentSpec::PowerLimit {
                fixed_st, fixed_ts, ..
            } => Segment::PowerLimit(PowerLimit::new(base, *fixed_st, *fixed_ts)),
            SegmentSpec::Pricing { .. } => Segment::Pricing(Pricing::new(base)),
            SegmentSpec::BatteryBalance { .. } => {
                let Some(lower) = lower else {
                    return Err(ConfigurationError::SegmentEndpoints {
                        segment: name.to_string(),
                        requirement: "a battery as target (lower section)",
                    }
                    .into());
                };
                Segment::BatteryBalance(BatteryBalance::new(base, lower, solver))
            }
        };
        for (key, value) in spec.initial_values() {
            segment.set(key, value)?;
        }
        Ok(segment)
    }

    pub fn base(&self) -> &SegmentBase {
        each_kind!(self, s => &s.base)
    }

    fn base_mut(&mut self) -> &mut SegmentBase {
        each_kind!(self, s => &mut s.base)
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Passthrough(_) => SegmentKind::Passthrough,
            Segment::Efficiency(_) => SegmentKind::Efficiency,
            Segment::PowerLimit(_) => SegmentKind::PowerLimit,
            Segment::Pricing(_) => SegmentKind::Pricing,
            Segment::BatteryBalance(_) => SegmentKind::BatteryBalance,
        }
    }

    pub fn flows(&self) -> &SegmentFlows {
        &self.base().flows
    }

    fn accepts(&self) -> &'static [SegmentParam] {
        match self {
            Segment::Passthrough(_) => Passthrough::PARAMS,
            Segment::Efficiency(_) => Efficiency::PARAMS,
            Segment::PowerLimit(_) => PowerLimit::PARAMS,
            Segment::Pricing(_) => Pricing::PARAMS,
            Segment::BatteryBalance(_) => BatteryBalance::PARAMS,
        }
    }

    /// Assign a parameter this segment kind understands.
    pub fn set(&mut self, key: SegmentParam, value: impl Into<ParamValue>) -> ModelResult<bool> {
        if !self.accepts().contains(&key) {
            return Err(ConfigurationError::UnknownParameter {
                segment: self.name().to_string(),
                kind: self.kind().into(),
                param: key.name(),
            }
            .into());
        }
        self.base_mut().params.set(key, value)
    }

    pub fn param(&self, key: SegmentParam) -> &ParamValue {
        self.base().params.peek(key)
    }

    /// Parameter that scales the flow leaving this segment in `direction`.
    pub fn gain_param(&self, direction: Direction) -> Option<SegmentParam> {
        match (self, direction) {
            (Segment::Efficiency(_), Direction::SourceToTarget) => Some(SegmentParam::EfficiencySt),
            (Segment::Efficiency(_), Direction::TargetToSource) => Some(SegmentParam::EfficiencyTs),
            _ => None,
        }
    }

    /// Untracked gain in `direction` at period `t`.
    pub fn gain(&self, direction: Direction, t: usize) -> f64 {
        self.gain_param(direction)
            .and_then(|key| self.param(key).at(t))
            .unwrap_or(1.0)
    }

    /// Parameters written since the last [`Segment::sync`].
    pub(crate) fn pending(&self) -> impl Iterator<Item = SegmentParam> + '_ {
        self.base().params.dirty()
    }

    pub(crate) fn mirror_lower_capacity(&mut self, capacity: &ParamValue) -> ModelResult<bool> {
        match self {
            Segment::BatteryBalance(s) => s.base.params.set(SegmentParam::LowerCapacity, capacity.clone()),
            _ => Ok(false),
        }
    }

    pub(crate) fn sync(&mut self) -> usize {
        let base = self.base_mut();
        let dirty = base.params.take_dirty();
        let invalidated = base.cache.invalidate(&dirty);
        if invalidated > 0 {
            trace!(segment = %base.name, invalidated, "parameters changed");
        }
        invalidated
    }

    pub(crate) fn apply(&self, solver: &mut dyn SolverAdapter) -> ModelResult<ApplyReport> {
        each_kind!(self, s => {
            let mut report = s.apply_constraints(solver)?;
            report += s.apply_costs(solver)?;
            Ok(report)
        })
    }

    pub(crate) fn release(&mut self, solver: &mut dyn SolverAdapter) -> ModelResult<()> {
        self.base_mut().cache.release(solver)?;
        if let Segment::BatteryBalance(s) = self {
            s.release_slacks(solver)?;
        }
        self.base_mut().flows.release(solver)
    }

    /// Outputs prefixed with the segment name.
    pub fn outputs(&self, solution: &Solution, outputs: &mut OutputMap) {
        let base = self.base();
        let name = &base.name;
        outputs.insert(
            format!("{name}_power_st"),
            ModelOutput::new(OutputType::Power, SegmentFlows::values(&base.flows.st, solution)),
        );
        outputs.insert(
            format!("{name}_power_ts"),
            ModelOutput::new(OutputType::Power, SegmentFlows::values(&base.flows.ts, solution)),
        );
        match self {
            Segment::PowerLimit(s) => s.outputs(solution, outputs),
            Segment::BatteryBalance(s) => s.outputs(solution, outputs),
            _ => {}
        }
    }
}
