//! Linear expressions and constraints handed to the solver adapter

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use crate::solver::{Solution, VarId};

/// `Σ coef·var + constant`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearExpr {
    terms: BTreeMap<VarId, f64>,
    constant: f64,
}

impl LinearExpr {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn var(var: VarId) -> Self {
        Self::term(var, 1.0)
    }

    pub fn term(var: VarId, coef: f64) -> Self {
        let mut expr = Self::zero();
        expr.add_term(var, coef);
        expr
    }

    /// Add `coef·var`, dropping terms that cancel out.
    pub fn add_term(&mut self, var: VarId, coef: f64) {
        let entry = self.terms.entry(var).or_insert(0.0);
        *entry += coef;
        if *entry == 0.0 {
            self.terms.remove(&var);
        }
    }

    pub fn with_term(mut self, var: VarId, coef: f64) -> Self {
        self.add_term(var, coef);
        self
    }

    pub fn terms(&self) -> &BTreeMap<VarId, f64> {
        &self.terms
    }

    pub fn constant_part(&self) -> f64 {
        self.constant
    }

    pub fn coefficient(&self, var: VarId) -> f64 {
        self.terms.get(&var).copied().unwrap_or(0.0)
    }

    /// Evaluate against a solution; missing variables count as zero.
    pub fn evaluate(&self, solution: &Solution) -> f64 {
        self.terms
            .iter()
            .map(|(var, coef)| coef * solution.value(*var).unwrap_or(0.0))
            .sum::<f64>()
            + self.constant
    }

    pub fn scaled(mut self, factor: f64) -> Self {
        if factor == 0.0 {
            return Self::zero();
        }
        for coef in self.terms.values_mut() {
            *coef *= factor;
        }
        self.constant *= factor;
        self
    }

    /// `self <= rhs`
    pub fn leq(self, rhs: impl Into<LinearExpr>) -> Constraint {
        Constraint::new(self - rhs.into(), f64::NEG_INFINITY, 0.0)
    }

    /// `self >= rhs`
    pub fn geq(self, rhs: impl Into<LinearExpr>) -> Constraint {
        Constraint::new(self - rhs.into(), 0.0, f64::INFINITY)
    }

    /// `self == rhs`
    pub fn equals(self, rhs: impl Into<LinearExpr>) -> Constraint {
        Constraint::new(self - rhs.into(), 0.0, 0.0)
    }
}

impl From<f64> for LinearExpr {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

impl From<VarId> for LinearExpr {
    fn from(var: VarId) -> Self {
        Self::var(var)
    }
}

impl AddAssign for LinearExpr {
    fn add_assign(&mut self, rhs: Self) {
        for (var, coef) in rhs.terms {
            self.add_term(var, coef);
        }
        self.constant += rhs.constant;
    }
}

impl SubAssign for LinearExpr {
    fn sub_assign(&mut self, rhs: Self) {
        *self += -rhs;
    }
}

impl Add for LinearExpr {
    type Output = LinearExpr;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl Sub for LinearExpr {
    type Output = LinearExpr;

    fn sub(self, rhs: Self) -> Self::Output {
        self + (-rhs)
    }
}

impl Neg for LinearExpr {
    type Output = LinearExpr;

    fn neg(self) -> Self::Output {
        self.scaled(-1.0)
    }
}

impl Mul<f64> for LinearExpr {
    type Output = LinearExpr;

    fn mul(self, rhs: f64) -> Self::Output {
        self.scaled(rhs)
    }
}

impl std::iter::Sum for LinearExpr {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(LinearExpr::zero(), |acc, e| acc + e)
    }
}

/// `lower <= expr <= upper`
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub expr: LinearExpr,
    pub lower: f64,
    pub upper: f64,
}

impl Constraint {
    pub fn new(expr: LinearExpr, lower: f64, upper: f64) -> Self {
        Self { expr, lower, upper }
    }

    /// Row bounds with the constant part moved to the right-hand side.
    pub fn row_bounds(&self) -> (f64, f64) {
        let c = self.expr.constant_part();
        (self.lower - c, self.upper - c)
    }
}

/// Result of evaluating one named constraint or cost
#[derive(Debug, Clone, PartialEq)]
pub enum Emitted<T> {
    /// Nothing to emit, typically because an input is unset.
    None,
    Single(T),
    /// One item per time index.
    Series(Vec<T>),
}

impl<T> Emitted<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Emitted::None => Vec::new(),
            Emitted::Single(item) => vec![item],
            Emitted::Series(items) => items,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Emitted::None)
    }
}

impl<T> From<Option<T>> for Emitted<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Emitted::None, Emitted::Single)
    }
}

impl<T> From<Vec<T>> for Emitted<T> {
    fn from(items: Vec<T>) -> Self {
        if items.is_empty() {
            Emitted::None
        } else {
            Emitted::Series(items)
        }
    }
}
