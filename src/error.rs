use thiserror::Error;

use crate::solver::{SolveFailure, SolverError};

/// Malformed topology or structural configuration; raised at `add_*` time.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("element name '{0}' is already in use")]
    DuplicateName(String),
    #[error("unknown element '{0}'")]
    UnknownElement(String),
    #[error("connection {from}->{to} already exists")]
    DuplicateConnection { from: String, to: String },
    #[error("unknown connection {0}")]
    UnknownConnection(String),
    #[error("connection {from}->{to} joins elements with different period grids")]
    PeriodMismatch { from: String, to: String },
    #[error("period grid is invalid: {0}")]
    InvalidPeriods(String),
    #[error("segment '{segment}' requires {requirement}")]
    SegmentEndpoints {
        segment: String,
        requirement: &'static str,
    },
    #[error("unknown segment '{0}'")]
    UnknownSegment(String),
    #[error("segment '{segment}' of kind {kind} has no parameter '{param}'")]
    UnknownParameter {
        segment: String,
        kind: &'static str,
        param: &'static str,
    },
    #[error("element '{element}' is a {actual}, expected a {expected}")]
    WrongElementKind {
        element: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("parameter '{param}' of '{element}' is derived from its connections and cannot be set")]
    DerivedParameter { element: String, param: &'static str },
    #[error("battery '{battery}' starts with {initial_charge} kWh but holds at most {capacity} kWh")]
    InitialChargeAboveCapacity {
        battery: String,
        initial_charge: f64,
        capacity: f64,
    },
}

/// Errors of the reactive model layer
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("parameter '{param}' expects {expected} values, got {actual}")]
    ParameterShape {
        param: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("parameter '{param}' has invalid value {value}: {reason}")]
    InvalidValue {
        param: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// Cached expressions and solver rows went out of sync. Always a bug.
    #[error("cached constraint '{name}' is inconsistent: {detail}")]
    InvalidationConsistency { name: String, detail: String },

    #[error("solver rejected an update: {0}")]
    Solver(#[from] SolverError),

    #[error("optimization failed: {0}")]
    Solve(#[from] SolveFailure),
}

pub type ModelResult<T> = Result<T, ModelError>;
