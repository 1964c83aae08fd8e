//! Network orchestration
//!
//! The network owns every element and connection in flat arenas and is the
//! only place that knows the topology. Connections refer to their endpoints by
//! [`ElementId`]. Before each apply the network folds connection power into
//! every element's port and mirrors lower-section capacities into
//! battery-balance segments, so cross-object changes reach the solver through
//! the regular invalidation path.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use serde::Serialize;
use strum::Display;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConfigurationError, ModelError, ModelResult};
use crate::model::cache::ApplyReport;
use crate::model::connection::Connection;
use crate::model::element::{Battery, BatteryParam, Element, ElementKind, ElementSpec, Node};
use crate::model::expr::LinearExpr;
use crate::model::output::NetworkOutputs;
use crate::model::param::ParamValue;
use crate::model::periods::Periods;
use crate::model::segment::{LowerSection, SegmentKind, SegmentSpec};
use crate::solver::{HighsSolver, SolverAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ElementId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConnectionId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum NetworkState {
    /// Nothing solved yet; every row is added fresh.
    Cold,
    /// A solve succeeded; only invalidated expressions are patched.
    Warm,
}

#[derive(Debug)]
pub struct Network<S = HighsSolver> {
    solver: S,
    elements: Vec<Option<Element>>,
    names: HashMap<String, ElementId>,
    connections: Vec<Option<Connection>>,
    pairs: HashMap<(ElementId, ElementId), ConnectionId>,
    state: NetworkState,
    last_outputs: Option<NetworkOutputs>,
}

impl Network<HighsSolver> {
    pub fn new() -> Self {
        Self::with_solver(HighsSolver::default())
    }
}

impl Default for Network<HighsSolver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SolverAdapter> Network<S> {
    pub fn with_solver(solver: S) -> Self {
        Self {
            solver,
            elements: Vec::new(),
            names: HashMap::new(),
            connections: Vec::new(),
            pairs: HashMap::new(),
            state: NetworkState::Cold,
            last_outputs: None,
        }
    }

    pub fn state(&self) -> NetworkState {
        self.state
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Outputs of the last successful solve; cleared by a failed one.
    pub fn last_outputs(&self) -> Option<&NetworkOutputs> {
        self.last_outputs.as_ref()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().flatten()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().flatten()
    }

    fn id_of(&self, name: &str) -> ModelResult<ElementId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownElement(name.to_string()).into())
    }

    fn slot(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(id.0).and_then(Option::as_ref)
    }

    pub fn element(&self, name: &str) -> ModelResult<&Element> {
        let id = self.id_of(name)?;
        self.slot(id)
            .ok_or_else(|| ConfigurationError::UnknownElement(name.to_string()).into())
    }

    fn element_mut(&mut self, name: &str) -> ModelResult<&mut Element> {
        let id = self.id_of(name)?;
        self.elements
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| ConfigurationError::UnknownElement(name.to_string()).into())
    }

    pub fn add_element(&mut self, name: &str, spec: ElementSpec, periods: Periods) -> ModelResult<&mut Element> {
        if self.names.contains_key(name) {
            return Err(ConfigurationError::DuplicateName(name.to_string()).into());
        }
        let id = ElementId(self.elements.len());
        debug!(element = name, kind = %spec.kind(), periods = periods.len(), "adding element");
        let element = Element::build(name, spec, periods, &mut self.solver);
        self.elements.push(Some(element));
        self.names.insert(name.to_string(), id);
        self.element_mut(name)
    }

    pub fn add_battery(&mut self, name: &str, periods: Periods) -> ModelResult<&mut Battery> {
        self.add_element(name, ElementSpec::Battery, periods)?;
        self.battery_mut(name)
    }

    pub fn add_node(
        &mut self,
        name: &str,
        periods: Periods,
        is_source: bool,
        is_sink: bool,
    ) -> ModelResult<&Node> {
        self.add_element(name, ElementSpec::Node { is_source, is_sink }, periods)?;
        self.node(name)
    }

    pub fn battery(&self, name: &str) -> ModelResult<&Battery> {
        let element = self.element(name)?;
        element.as_battery().ok_or_else(|| wrong_kind(name, ElementKind::Battery, element.kind()))
    }

    pub fn battery_mut(&mut self, name: &str) -> ModelResult<&mut Battery> {
        let element = self.element_mut(name)?;
        let actual = element.kind();
        element
            .as_battery_mut()
            .ok_or_else(|| wrong_kind(name, ElementKind::Battery, actual))
    }

    pub fn node(&self, name: &str) -> ModelResult<&Node> {
        let element = self.element(name)?;
        element.as_node().ok_or_else(|| wrong_kind(name, ElementKind::Node, element.kind()))
    }

    fn connection_id(&self, source: &str, target: &str) -> ModelResult<ConnectionId> {
        let pair = (self.id_of(source)?, self.id_of(target)?);
        self.pairs.get(&pair).copied().ok_or_else(|| {
            ConfigurationError::UnknownConnection(format!("{source}->{target}")).into()
        })
    }

    pub fn connection(&self, source: &str, target: &str) -> ModelResult<&Connection> {
        let id = self.connection_id(source, target)?;
        self.connections[id.0]
            .as_ref()
            .ok_or_else(|| ConfigurationError::UnknownConnection(format!("{source}->{target}")).into())
    }

    pub fn connection_mut(&mut self, source: &str, target: &str) -> ModelResult<&mut Connection> {
        let id = self.connection_id(source, target)?;
        self.connections[id.0]
            .as_mut()
            .ok_or_else(|| ConfigurationError::UnknownConnection(format!("{source}->{target}")).into())
    }

    /// Connect two existing elements through an ordered segment chain. An
    /// empty chain becomes a single passthrough.
    pub fn add_connection(
        &mut self,
        source: &str,
        target: &str,
        segments: IndexMap<String, SegmentSpec>,
    ) -> ModelResult<&mut Connection> {
        let source_id = self.id_of(source)?;
        let target_id = self.id_of(target)?;
        if self.pairs.contains_key(&(source_id, target_id)) {
            return Err(ConfigurationError::DuplicateConnection {
                from: source.to_string(),
                to: target.to_string(),
            }
            .into());
        }

        let (Some(from), Some(to)) = (self.slot(source_id), self.slot(target_id)) else {
            return Err(ConfigurationError::UnknownElement(format!("{source}->{target}")).into());
        };
        if from.periods() != to.periods() {
            return Err(ConfigurationError::PeriodMismatch {
                from: source.to_string(),
                to: target.to_string(),
            }
            .into());
        }
        let periods = from.periods().clone();

        let lower = match segments
            .iter()
            .find(|(_, spec)| spec.kind() == SegmentKind::BatteryBalance)
        {
            Some((segment, _)) => match (from.as_battery(), to.as_battery()) {
                (Some(_), Some(lower)) => Some(LowerSection {
                    stored: (1..=periods.len()).map(|t| lower.stored_at(t)).collect(),
                }),
                _ => {
                    return Err(ConfigurationError::SegmentEndpoints {
                        segment: segment.clone(),
                        requirement: "battery elements at both ends",
                    }
                    .into())
                }
            },
            None => None,
        };

        let connection = Connection::new(
            (source_id, source),
            (target_id, target),
            periods,
            &segments,
            lower,
            &mut self.solver,
        )?;
        let id = ConnectionId(self.connections.len());
        self.connections.push(Some(connection));
        self.pairs.insert((source_id, target_id), id);
        self.connection_mut(source, target)
    }

    /// Drop a connection. Its endpoints are patched first so that no row
    /// keeps a reference to the removed flow columns.
    pub fn remove_connection(&mut self, source: &str, target: &str) -> ModelResult<()> {
        let id = self.connection_id(source, target)?;
        self.remove_connection_by_id(id)
    }

    fn remove_connection_by_id(&mut self, id: ConnectionId) -> ModelResult<()> {
        let Some(mut connection) = self.connections.get_mut(id.0).and_then(Option::take) else {
            return Ok(());
        };
        self.pairs.remove(&(connection.source(), connection.target()));

        self.refresh_ports();
        let mut outcome = Ok(());
        for endpoint in [connection.source(), connection.target()] {
            if let Some(element) = self.elements.get_mut(endpoint.0).and_then(Option::as_mut) {
                element.sync();
                if let Err(err) = element.apply(&mut self.solver) {
                    warn!(connection = %connection.id(), error = %err, "endpoint update failed during removal");
                    outcome = outcome.and(Err(err));
                }
            }
        }
        // The connection is gone from the indexes either way, so its columns
        // have to go too.
        connection.release(&mut self.solver)?;
        debug!(connection = %connection.id(), "connection removed");
        outcome
    }

    /// Drop an element together with every connection attached to it.
    pub fn remove_element(&mut self, name: &str) -> ModelResult<()> {
        let id = self.id_of(name)?;
        let attached: Vec<ConnectionId> = self
            .pairs
            .iter()
            .filter(|((source, target), _)| *source == id || *target == id)
            .map(|(_, connection)| *connection)
            .collect();
        for connection in attached {
            self.remove_connection_by_id(connection)?;
        }

        if let Some(mut element) = self.elements.get_mut(id.0).and_then(Option::take) {
            element.release(&mut self.solver)?;
        }
        self.names.remove(name);
        debug!(element = name, "element removed");
        Ok(())
    }

    fn refresh_mirrors(&mut self) -> ModelResult<()> {
        for connection in self.connections.iter_mut().flatten() {
            if !connection.has_battery_balance() {
                continue;
            }
            let capacity = self
                .elements
                .get(connection.target().0)
                .and_then(Option::as_ref)
                .and_then(Element::as_battery)
                .map(|b| b.param(BatteryParam::Capacity).clone())
                .unwrap_or(ParamValue::Unset);
            connection.mirror_lower_capacity(&capacity)?;
        }
        Ok(())
    }

    fn refresh_ports(&mut self) -> usize {
        let mut ports: Vec<Option<Vec<LinearExpr>>> = self
            .elements
            .iter()
            .map(|e| e.as_ref().map(|e| vec![LinearExpr::zero(); e.periods().len()]))
            .collect();
        for connection in self.connections.iter().flatten() {
            for t in 0..connection.periods().len() {
                if let Some(Some(port)) = ports.get_mut(connection.target().0) {
                    port[t] += connection.power_into_target(t);
                }
                if let Some(Some(port)) = ports.get_mut(connection.source().0) {
                    port[t] += connection.power_into_source(t);
                }
            }
        }

        let mut changed = 0;
        for (element, port) in self.elements.iter_mut().zip(ports) {
            if let (Some(element), Some(port)) = (element, port) {
                if element.set_port(port) {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Push every pending change into the solver without solving.
    pub fn apply(&mut self) -> ModelResult<ApplyReport> {
        self.refresh_mirrors()?;
        let ports_changed = self.refresh_ports();

        let mut invalidated = 0;
        for element in self.elements.iter_mut().flatten() {
            invalidated += element.sync();
        }
        for connection in self.connections.iter_mut().flatten() {
            invalidated += connection.sync();
        }

        let mut report = ApplyReport::default();
        for element in self.elements.iter().flatten() {
            report += element.apply(&mut self.solver)?;
        }
        for connection in self.connections.iter().flatten() {
            report += connection.apply(&mut self.solver)?;
        }
        debug!(
            state = %self.state,
            ports_changed,
            invalidated,
            evaluated = report.evaluated,
            solver_calls = report.solver_calls(),
            "applied pending changes"
        );
        Ok(report)
    }

    /// Apply pending changes, solve, and extract outputs.
    pub fn optimize(&mut self) -> ModelResult<&NetworkOutputs> {
        self.last_outputs = None;
        self.apply()?;

        let solution = match self.solver.solve() {
            Ok(solution) => solution,
            Err(failure) => {
                warn!(%failure, "optimization failed");
                return Err(ModelError::Solve(failure));
            }
        };

        let elements: BTreeMap<_, _> = self
            .elements()
            .map(|e| (e.name().to_string(), e.outputs(&solution)))
            .collect();
        let connections: BTreeMap<_, _> = self
            .connections()
            .map(|c| (c.id(), c.outputs(&solution)))
            .collect();
        let outputs = NetworkOutputs {
            run_id: Uuid::new_v4(),
            objective: solution.objective,
            elements,
            connections,
        };

        if self.state == NetworkState::Cold {
            info!(run_id = %outputs.run_id, "first solve succeeded, network is warm");
            self.state = NetworkState::Warm;
        }
        debug!(run_id = %outputs.run_id, objective = outputs.objective, "optimization finished");
        Ok(self.last_outputs.insert(outputs))
    }
}

fn wrong_kind(name: &str, expected: ElementKind, actual: ElementKind) -> ModelError {
    ConfigurationError::WrongElementKind {
        element: name.to_string(),
        expected: expected.into(),
        actual: actual.into(),
    }
    .into()
}
