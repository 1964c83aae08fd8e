//! Battery storage element
//!
//! Energy is tracked as two cumulative series: energy ever charged `E_in` and
//! energy ever discharged `E_out`, one value per period boundary. Boundary 0 is
//! fixed (`E_in(0) = initial_charge`, `E_out(0) = 0`), so only boundaries
//! `1..=T` are solver columns. Power is derived from consecutive boundaries.

use strum::{Display, IntoStaticStr};
use tracing::trace;

use crate::error::{ConfigurationError, ModelResult};
use crate::model::cache::{ApplyReport, ConstraintFn, ConstraintSource, CostFn, ExprCache};
use crate::model::expr::{Constraint, Emitted, LinearExpr};
use crate::model::output::{ModelOutput, OutputMap, OutputType};
use crate::model::param::{Deps, ParamKey, ParamStore, ParamValue, Shape};
use crate::model::periods::Periods;
use crate::solver::{Solution, SolverAdapter, VarId};

/// Charge/discharge power below this magnitude reports as idle.
const STATUS_TOLERANCE_KW: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BatteryParam {
    /// Usable capacity per boundary, kWh.
    Capacity,
    /// Stored energy at boundary 0, kWh.
    InitialCharge,
    /// Minimum stored energy per boundary, kWh.
    Reserve,
    /// Minimum stored energy at the last boundary, kWh.
    TargetCharge,
    /// Wear cost per kWh discharged, per period.
    DischargeCost,
    /// Folded power of all attached connections, maintained by the network.
    ConnectionPower,
}

impl ParamKey for BatteryParam {
    fn name(self) -> &'static str {
        self.into()
    }

    fn shape(self) -> Shape {
        match self {
            BatteryParam::Capacity | BatteryParam::Reserve => Shape::Boundaries,
            BatteryParam::InitialCharge | BatteryParam::TargetCharge => Shape::Scalar,
            BatteryParam::DischargeCost | BatteryParam::ConnectionPower => Shape::Periods,
        }
    }

    fn validate(self, value: f64) -> Result<(), &'static str> {
        if value < 0.0 {
            Err("must not be negative")
        } else {
            Ok(())
        }
    }
}

/// A storage section with cumulative charge/discharge energy columns.
#[derive(Debug)]
pub struct Battery {
    name: String,
    periods: Periods,
    params: ParamStore<BatteryParam>,
    e_in: Vec<VarId>,
    e_out: Vec<VarId>,
    port: Vec<LinearExpr>,
    cache: ExprCache<BatteryParam>,
}

impl Battery {
    pub fn new(name: impl Into<String>, periods: Periods, solver: &mut dyn SolverAdapter) -> Self {
        let len = periods.len();
        let e_in = (0..len).map(|_| solver.add_variable(0.0, f64::INFINITY)).collect();
        let e_out = (0..len).map(|_| solver.add_variable(0.0, f64::INFINITY)).collect();
        Self {
            name: name.into(),
            params: ParamStore::new(len),
            port: vec![LinearExpr::zero(); len],
            periods,
            e_in,
            e_out,
            cache: ExprCache::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn periods(&self) -> &Periods {
        &self.periods
    }

    /// Assign any user-facing parameter. The connection power is derived and
    /// cannot be written here.
    pub fn set_param(&mut self, key: BatteryParam, value: impl Into<ParamValue>) -> ModelResult<bool> {
        if key == BatteryParam::ConnectionPower {
            return Err(ConfigurationError::DerivedParameter {
                element: self.name.clone(),
                param: key.name(),
            }
            .into());
        }
        self.params.set(key, value)
    }

    pub fn set_capacity(&mut self, value: impl Into<ParamValue>) -> ModelResult<bool> {
        self.set_param(BatteryParam::Capacity, value)
    }

    pub fn set_initial_charge(&mut self, kwh: f64) -> ModelResult<bool> {
        self.set_param(BatteryParam::InitialCharge, kwh)
    }

    pub fn set_reserve(&mut self, value: impl Into<ParamValue>) -> ModelResult<bool> {
        self.set_param(BatteryParam::Reserve, value)
    }

    pub fn set_target_charge(&mut self, kwh: Option<f64>) -> ModelResult<bool> {
        self.set_param(BatteryParam::TargetCharge, kwh)
    }

    pub fn set_discharge_cost(&mut self, value: impl Into<ParamValue>) -> ModelResult<bool> {
        self.set_param(BatteryParam::DischargeCost, value)
    }

    pub fn param(&self, key: BatteryParam) -> &ParamValue {
        self.params.peek(key)
    }

    /// Column of `E_in` at boundary `t` (`1..=T`).
    pub fn charged_var(&self, t: usize) -> Option<VarId> {
        t.checked_sub(1).and_then(|i| self.e_in.get(i)).copied()
    }

    /// Column of `E_out` at boundary `t` (`1..=T`).
    pub fn discharged_var(&self, t: usize) -> Option<VarId> {
        t.checked_sub(1).and_then(|i| self.e_out.get(i)).copied()
    }

    /// Stored energy `E_in(t) − E_out(t)` for a boundary `t >= 1`.
    pub fn stored_at(&self, t: usize) -> LinearExpr {
        debug_assert!(t >= 1 && t <= self.periods.len());
        LinearExpr::var(self.e_in[t - 1]) - LinearExpr::var(self.e_out[t - 1])
    }

    pub(crate) fn set_port(&mut self, port: Vec<LinearExpr>) -> bool {
        if self.port == port {
            return false;
        }
        self.port = port;
        self.params.mark_dirty(BatteryParam::ConnectionPower);
        true
    }

    pub(crate) fn sync(&mut self) -> usize {
        let dirty = self.params.take_dirty();
        let invalidated = self.cache.invalidate(&dirty);
        if invalidated > 0 {
            trace!(battery = %self.name, invalidated, "parameters changed");
        }
        invalidated
    }

    /// The starting charge has to fit the capacity at boundary 0. Checked when
    /// rows are applied, so the two parameters can be written in any order.
    fn check_initial_charge(&self) -> Result<(), ConfigurationError> {
        let initial_charge = self.params.peek(BatteryParam::InitialCharge).scalar().unwrap_or(0.0);
        match self.params.peek(BatteryParam::Capacity).at(0) {
            Some(capacity) if initial_charge > capacity => Err(ConfigurationError::InitialChargeAboveCapacity {
                battery: self.name.clone(),
                initial_charge,
                capacity,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn apply(&self, solver: &mut dyn SolverAdapter) -> ModelResult<ApplyReport> {
        self.check_initial_charge()?;
        let mut report = self.apply_constraints(solver)?;
        report += self.apply_costs(solver)?;
        Ok(report)
    }

    pub(crate) fn release(&mut self, solver: &mut dyn SolverAdapter) -> ModelResult<()> {
        self.cache.release(solver)?;
        for var in self.e_in.drain(..).chain(self.e_out.drain(..)) {
            solver.remove_variable(var)?;
        }
        Ok(())
    }

    fn initial_charge(&self, deps: &mut Deps<BatteryParam>) -> f64 {
        self.params
            .get(BatteryParam::InitialCharge, deps)
            .scalar()
            .unwrap_or(0.0)
    }

    fn charged(&self, t: usize, deps: &mut Deps<BatteryParam>) -> LinearExpr {
        match t {
            0 => LinearExpr::constant(self.initial_charge(deps)),
            _ => LinearExpr::var(self.e_in[t - 1]),
        }
    }

    fn discharged(&self, t: usize) -> LinearExpr {
        match t {
            0 => LinearExpr::zero(),
            _ => LinearExpr::var(self.e_out[t - 1]),
        }
    }

    fn port(&self, deps: &mut Deps<BatteryParam>) -> &[LinearExpr] {
        deps.record(BatteryParam::ConnectionPower);
        &self.port
    }

    fn power_balance(&self, deps: &mut Deps<BatteryParam>) -> Emitted<Constraint> {
        let port = self.port(deps);
        (0..self.periods.len())
            .map(|t| {
                let charged = self.charged(t + 1, deps) - self.charged(t, deps);
                let discharged = self.discharged(t + 1) - self.discharged(t);
                let delivered = port[t].clone() * self.periods.duration(t);
                (charged - discharged - delivered).equals(0.0)
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn charge_monotonic(&self, deps: &mut Deps<BatteryParam>) -> Emitted<Constraint> {
        (0..self.periods.len())
            .map(|t| (self.charged(t + 1, deps) - self.charged(t, deps)).geq(0.0))
            .collect::<Vec<_>>()
            .into()
    }

    fn discharge_monotonic(&self, _deps: &mut Deps<BatteryParam>) -> Emitted<Constraint> {
        (0..self.periods.len())
            .map(|t| (self.discharged(t + 1) - self.discharged(t)).geq(0.0))
            .collect::<Vec<_>>()
            .into()
    }

    fn soc_max(&self, deps: &mut Deps<BatteryParam>) -> Emitted<Constraint> {
        let Some(capacity) = self
            .params
            .get(BatteryParam::Capacity, deps)
            .expand(self.periods.boundaries())
        else {
            return Emitted::None;
        };
        (1..=self.periods.len())
            .map(|t| self.stored_at(t).leq(capacity[t]))
            .collect::<Vec<_>>()
            .into()
    }

    fn soc_min(&self, deps: &mut Deps<BatteryParam>) -> Emitted<Constraint> {
        if !self.params.get(BatteryParam::Capacity, deps).is_set() {
            return Emitted::None;
        }
        let reserve = self.params.get(BatteryParam::Reserve, deps);
        (1..=self.periods.len())
            .map(|t| self.stored_at(t).geq(reserve.at(t).unwrap_or(0.0)))
            .collect::<Vec<_>>()
            .into()
    }

    fn target_charge(&self, deps: &mut Deps<BatteryParam>) -> Emitted<Constraint> {
        self.params
            .get(BatteryParam::TargetCharge, deps)
            .scalar()
            .map(|target| self.stored_at(self.periods.len()).geq(target))
            .into()
    }

    fn discharge_cost(&self, deps: &mut Deps<BatteryParam>) -> Emitted<LinearExpr> {
        let cost = self.params.get(BatteryParam::DischargeCost, deps);
        if !cost.is_set() {
            return Emitted::None;
        }
        (0..self.periods.len())
            .map(|t| {
                let price = cost.at(t).unwrap_or(0.0);
                (self.discharged(t + 1) - self.discharged(t)) * price
            })
            .collect::<Vec<_>>()
            .into()
    }

    pub fn outputs(&self, solution: &Solution) -> OutputMap {
        let len = self.periods.len();
        let initial = self.params.peek(BatteryParam::InitialCharge).scalar().unwrap_or(0.0);
        let value = |var: VarId| solution.value(var).unwrap_or(0.0);

        let charged: Vec<f64> = std::iter::once(initial)
            .chain(self.e_in.iter().map(|v| value(*v)))
            .collect();
        let discharged: Vec<f64> = std::iter::once(0.0)
            .chain(self.e_out.iter().map(|v| value(*v)))
            .collect();

        let charge: Vec<f64> = (0..len)
            .map(|t| (charged[t + 1] - charged[t]) / self.periods.duration(t))
            .collect();
        let discharge: Vec<f64> = (0..len)
            .map(|t| (discharged[t + 1] - discharged[t]) / self.periods.duration(t))
            .collect();
        let net: Vec<f64> = charge.iter().zip(&discharge).map(|(c, d)| c - d).collect();
        let status = net
            .iter()
            .map(|p| {
                if *p > STATUS_TOLERANCE_KW {
                    1.0
                } else if *p < -STATUS_TOLERANCE_KW {
                    -1.0
                } else {
                    0.0
                }
            })
            .collect();
        let stored: Vec<f64> = charged.iter().zip(&discharged).map(|(i, o)| i - o).collect();

        let mut outputs = OutputMap::new();
        outputs.insert("battery_power_charge".into(), ModelOutput::new(OutputType::Power, charge));
        outputs.insert("battery_power_discharge".into(), ModelOutput::new(OutputType::Power, discharge));
        outputs.insert("battery_power_net".into(), ModelOutput::new(OutputType::Power, net));
        outputs.insert("battery_energy_stored".into(), ModelOutput::new(OutputType::Energy, stored));
        outputs.insert("battery_energy_in".into(), ModelOutput::new(OutputType::Energy, charged));
        outputs.insert("battery_energy_out".into(), ModelOutput::new(OutputType::Energy, discharged));
        outputs.insert("battery_status".into(), ModelOutput::new(OutputType::Status, status));

        for (constraint, label) in [
            ("power_balance", "battery_power_balance"),
            ("soc_max", "battery_soc_max"),
            ("soc_min", "battery_soc_min"),
        ] {
            if let Some(rows) = self.cache.rows(constraint) {
                let duals = rows.iter().map(|r| solution.dual(*r).unwrap_or(0.0)).collect();
                outputs.insert(label.into(), ModelOutput::new(OutputType::ShadowPrice, duals));
            }
        }
        outputs
    }
}

impl ConstraintSource for Battery {
    type Param = BatteryParam;

    const CONSTRAINTS: &'static [(&'static str, ConstraintFn<Self, BatteryParam>)] = &[
        ("power_balance", Self::power_balance),
        ("charge_monotonic", Self::charge_monotonic),
        ("discharge_monotonic", Self::discharge_monotonic),
        ("soc_max", Self::soc_max),
        ("soc_min", Self::soc_min),
        ("target_charge", Self::target_charge),
    ];

    const COSTS: &'static [(&'static str, CostFn<Self, BatteryParam>)] =
        &[("discharge_cost", Self::discharge_cost)];

    fn cache(&self) -> &ExprCache<BatteryParam> {
        &self.cache
    }
}
