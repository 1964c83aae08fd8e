//! Tracked parameters and read recording
//!
//! Every model part keeps its inputs in a [`ParamStore`] keyed by a small enum.
//! Writes that change a value mark the key dirty. Reads made while evaluating a
//! cached expression go through [`ParamStore::get`], which records the key in
//! the caller-supplied [`Deps`] set; that set becomes the expression's
//! dependency list.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Expected length of a parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    /// One value per power period (`T`).
    Periods,
    /// One value per energy boundary (`T + 1`).
    Boundaries,
}

/// Key of a tracked parameter.
pub trait ParamKey: Copy + Ord + Debug {
    fn name(self) -> &'static str;

    fn shape(self) -> Shape;

    /// Range check applied to every assigned number.
    fn validate(self, _value: f64) -> Result<(), &'static str> {
        Ok(())
    }
}

/// Current value of a tracked parameter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    #[default]
    Unset,
    Scalar(f64),
    Series(Vec<f64>),
}

static UNSET: ParamValue = ParamValue::Unset;

impl ParamValue {
    pub fn is_set(&self) -> bool {
        !matches!(self, ParamValue::Unset)
    }

    /// Value at index `t`; scalars broadcast.
    pub fn at(&self, t: usize) -> Option<f64> {
        match self {
            ParamValue::Unset => None,
            ParamValue::Scalar(v) => Some(*v),
            ParamValue::Series(values) => values.get(t).copied(),
        }
    }

    pub fn scalar(&self) -> Option<f64> {
        match self {
            ParamValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// Expand to `len` values, `None` when unset.
    pub fn expand(&self, len: usize) -> Option<Vec<f64>> {
        match self {
            ParamValue::Unset => None,
            _ => Some((0..len).filter_map(|t| self.at(t)).collect()),
        }
    }

    fn numbers(&self) -> &[f64] {
        match self {
            ParamValue::Unset => &[],
            ParamValue::Scalar(v) => std::slice::from_ref(v),
            ParamValue::Series(values) => values,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Scalar(value)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(values: Vec<f64>) -> Self {
        ParamValue::Series(values)
    }
}

impl From<&[f64]> for ParamValue {
    fn from(values: &[f64]) -> Self {
        ParamValue::Series(values.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for ParamValue {
    fn from(values: [f64; N]) -> Self {
        ParamValue::Series(values.to_vec())
    }
}

impl From<Option<f64>> for ParamValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(ParamValue::Unset, ParamValue::Scalar)
    }
}

/// Keys read during one evaluation of a cached expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deps<K>(BTreeSet<K>);

impl<K: Ord> Default for Deps<K> {
    fn default() -> Self {
        Self(BTreeSet::new())
    }
}

impl<K: ParamKey> Deps<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: K) {
        self.0.insert(key);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.0.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Enum-keyed parameter values with change tracking.
#[derive(Debug, Clone)]
pub struct ParamStore<K> {
    periods: usize,
    values: BTreeMap<K, ParamValue>,
    dirty: BTreeSet<K>,
}

impl<K: ParamKey> ParamStore<K> {
    /// Store for a part with `periods` power periods.
    pub fn new(periods: usize) -> Self {
        Self {
            periods,
            values: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    fn expected_len(&self, key: K) -> usize {
        match key.shape() {
            Shape::Scalar => 1,
            Shape::Periods => self.periods,
            Shape::Boundaries => self.periods + 1,
        }
    }

    /// Assign `value` to `key`. Returns whether the stored value changed.
    pub fn set(&mut self, key: K, value: impl Into<ParamValue>) -> ModelResult<bool> {
        let value = self.normalize(key, value.into())?;
        let previous = self.values.get(&key).unwrap_or(&UNSET);
        if *previous == value {
            return Ok(false);
        }
        if value.is_set() {
            self.values.insert(key, value);
        } else {
            self.values.remove(&key);
        }
        self.dirty.insert(key);
        Ok(true)
    }

    pub fn unset(&mut self, key: K) -> bool {
        let changed = self.values.remove(&key).is_some();
        if changed {
            self.dirty.insert(key);
        }
        changed
    }

    fn normalize(&self, key: K, value: ParamValue) -> ModelResult<ParamValue> {
        for &number in value.numbers() {
            if !number.is_finite() {
                return Err(ModelError::InvalidValue {
                    param: key.name(),
                    value: number,
                    reason: "values must be finite",
                });
            }
            key.validate(number).map_err(|reason| ModelError::InvalidValue {
                param: key.name(),
                value: number,
                reason,
            })?;
        }

        let expected = self.expected_len(key);
        match value {
            ParamValue::Series(values) if key.shape() == Shape::Scalar => {
                if values.len() == 1 {
                    Ok(ParamValue::Scalar(values[0]))
                } else {
                    Err(ModelError::ParameterShape {
                        param: key.name(),
                        expected,
                        actual: values.len(),
                    })
                }
            }
            ParamValue::Series(values) if values.len() != expected => {
                Err(ModelError::ParameterShape {
                    param: key.name(),
                    expected,
                    actual: values.len(),
                })
            }
            other => Ok(other),
        }
    }

    /// Tracked read: records `key` into `deps`.
    pub fn get(&self, key: K, deps: &mut Deps<K>) -> &ParamValue {
        deps.record(key);
        self.peek(key)
    }

    /// Untracked read, for outputs and diagnostics.
    pub fn peek(&self, key: K) -> &ParamValue {
        self.values.get(&key).unwrap_or(&UNSET)
    }

    /// Flag `key` as changed without storing a number (used for derived inputs).
    pub fn mark_dirty(&mut self, key: K) {
        self.dirty.insert(key);
    }

    pub fn dirty(&self) -> impl Iterator<Item = K> + '_ {
        self.dirty.iter().copied()
    }

    pub fn take_dirty(&mut self) -> BTreeSet<K> {
        std::mem::take(&mut self.dirty)
    }
}
