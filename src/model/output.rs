use std::collections::BTreeMap;

use serde::Serialize;
use strum::{Display, IntoStaticStr};
use uuid::Uuid;

/// Category of a reported series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputType {
    Power,
    Energy,
    Price,
    ShadowPrice,
    /// Dual of a normalised shared-capacity row: currency per full time slice.
    CapacityPrice,
    Status,
}

impl OutputType {
    pub fn unit(self) -> &'static str {
        match self {
            OutputType::Power => "kW",
            OutputType::Energy => "kWh",
            OutputType::Price | OutputType::ShadowPrice => "$/kWh",
            OutputType::CapacityPrice => "$",
            OutputType::Status => "",
        }
    }
}

/// One named output series of an element or connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelOutput {
    #[serde(rename = "type")]
    pub kind: OutputType,
    pub unit: &'static str,
    pub values: Vec<f64>,
}

impl ModelOutput {
    pub fn new(kind: OutputType, values: Vec<f64>) -> Self {
        Self {
            kind,
            unit: kind.unit(),
            values,
        }
    }
}

pub type OutputMap = BTreeMap<String, ModelOutput>;

/// Immutable snapshot of one successful optimization
#[derive(Debug, Clone, Serialize)]
pub struct NetworkOutputs {
    pub run_id: Uuid,
    pub objective: f64,
    pub elements: BTreeMap<String, OutputMap>,
    /// Keyed by `source->target`.
    pub connections: BTreeMap<String, OutputMap>,
}

impl NetworkOutputs {
    pub fn element(&self, name: &str) -> Option<&OutputMap> {
        self.elements.get(name)
    }

    pub fn connection(&self, source: &str, target: &str) -> Option<&OutputMap> {
        self.connections.get(&format!("{source}->{target}"))
    }

    /// Shorthand for `elements[element][output].values`.
    pub fn values(&self, element: &str, output: &str) -> Option<&[f64]> {
        self.elements
            .get(element)
            .and_then(|m| m.get(output))
            .map(|o| o.values.as_slice())
    }
}
