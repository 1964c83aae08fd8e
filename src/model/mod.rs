//! Reactive LP model layer
//!
//! Elements and connections keep their inputs as tracked parameters. Writing
//! a parameter only marks it dirty; [`Network::optimize`] turns the pending
//! writes into the smallest set of solver edits, solves, and snapshots the
//! results.

pub mod cache;
pub mod connection;
pub mod element;
pub mod expr;
pub mod network;
pub mod output;
pub mod param;
pub mod periods;
pub mod segment;

pub use cache::{ApplyReport, ConstraintSource};
pub use connection::Connection;
pub use element::{Battery, BatteryParam, Element, ElementKind, ElementSpec, Node};
pub use expr::{Constraint, Emitted, LinearExpr};
pub use network::{Network, NetworkState};
pub use output::{ModelOutput, NetworkOutputs, OutputMap, OutputType};
pub use param::{ParamValue, Shape};
pub use periods::Periods;
pub use segment::{Segment, SegmentKind, SegmentParam, SegmentSpec};
