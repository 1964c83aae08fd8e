//! Network elements: storage sections and balancing nodes

pub mod battery;
pub mod node;

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

pub use battery::{Battery, BatteryParam};
pub use node::{Node, NodeParam};

use crate::error::ModelResult;
use crate::model::cache::ApplyReport;
use crate::model::expr::LinearExpr;
use crate::model::output::OutputMap;
use crate::model::periods::Periods;
use crate::solver::{Solution, SolverAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ElementKind {
    Battery,
    Node,
}

/// Structural part of an element; values are assigned afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementSpec {
    Battery,
    Node {
        #[serde(default)]
        is_source: bool,
        #[serde(default)]
        is_sink: bool,
    },
}

impl ElementSpec {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementSpec::Battery => ElementKind::Battery,
            ElementSpec::Node { .. } => ElementKind::Node,
        }
    }
}

#[derive(Debug)]
pub enum Element {
    Battery(Battery),
    Node(Node),
}

impl Element {
    pub(crate) fn build(
        name: &str,
        spec: ElementSpec,
        periods: Periods,
        solver: &mut dyn SolverAdapter,
    ) -> Self {
        match spec {
            ElementSpec::Battery => Element::Battery(Battery::new(name, periods, solver)),
            ElementSpec::Node { is_source, is_sink } => {
                Element::Node(Node::new(name, periods, is_source, is_sink, solver))
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Element::Battery(b) => b.name(),
            Element::Node(n) => n.name(),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Battery(_) => ElementKind::Battery,
            Element::Node(_) => ElementKind::Node,
        }
    }

    pub fn periods(&self) -> &Periods {
        match self {
            Element::Battery(b) => b.periods(),
            Element::Node(n) => n.periods(),
        }
    }

    pub fn as_battery(&self) -> Option<&Battery> {
        match self {
            Element::Battery(b) => Some(b),
            Element::Node(_) => None,
        }
    }

    pub fn as_battery_mut(&mut self) -> Option<&mut Battery> {
        match self {
            Element::Battery(b) => Some(b),
            Element::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Element::Node(n) => Some(n),
            Element::Battery(_) => None,
        }
    }

    /// Replace the folded connection power; returns whether it changed.
    pub(crate) fn set_port(&mut self, port: Vec<LinearExpr>) -> bool {
        match self {
            Element::Battery(b) => b.set_port(port),
            Element::Node(n) => n.set_port(port),
        }
    }

    /// Turn pending parameter writes into cache invalidations.
    pub(crate) fn sync(&mut self) -> usize {
        match self {
            Element::Battery(b) => b.sync(),
            Element::Node(n) => n.sync(),
        }
    }

    pub(crate) fn apply(&self, solver: &mut dyn SolverAdapter) -> ModelResult<ApplyReport> {
        match self {
            Element::Battery(b) => b.apply(solver),
            Element::Node(n) => n.apply(solver),
        }
    }

    /// Drop every row, objective term and column owned by this element.
    pub(crate) fn release(&mut self, solver: &mut dyn SolverAdapter) -> ModelResult<()> {
        match self {
            Element::Battery(b) => b.release(solver),
            Element::Node(n) => n.release(solver),
        }
    }

    pub fn outputs(&self, solution: &Solution) -> OutputMap {
        match self {
            Element::Battery(b) => b.outputs(solution),
            Element::Node(n) => n.outputs(solution),
        }
    }
}
