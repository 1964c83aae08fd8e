use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::info;

use crate::error::ModelResult;
use crate::model::element::BatteryParam;
use crate::model::param::ParamValue;
use crate::model::periods::Periods;
use crate::model::segment::SegmentSpec;
use crate::model::Network;
use crate::solver::highs::SolverOptions;
use crate::solver::HighsSolver;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub solver: SolverOptions,
    pub network: NetworkConfig,
}

/// Topology and initial values of one network
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Period durations in hours, shared by every element.
    pub periods: Periods,
    #[serde(default)]
    pub elements: Vec<ElementConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ElementConfig {
    Battery {
        name: String,
        #[serde(default)]
        capacity: Option<ParamValue>,
        #[serde(default)]
        initial_charge: Option<f64>,
        #[serde(default)]
        reserve: Option<ParamValue>,
        #[serde(default)]
        target_charge: Option<f64>,
        #[serde(default)]
        discharge_cost: Option<ParamValue>,
    },
    Node {
        name: String,
        #[serde(default)]
        is_source: bool,
        #[serde(default)]
        is_sink: bool,
    },
}

/// Segments are a list rather than a table so their order survives.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub segments: Vec<NamedSegment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedSegment {
    pub name: String,
    #[serde(flatten)]
    pub spec: SegmentSpec,
}

impl Config {
    /// Read `path` and overlay `OEO__`-prefixed environment variables
    /// (`OEO__SOLVER__TIME_LIMIT_SECONDS=5`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("OEO__").split("__"));
        figment
            .extract()
            .with_context(|| format!("loading network configuration from {}", path.display()))
    }
}

impl NetworkConfig {
    /// Create every element and connection and assign the configured values.
    pub fn build(&self, options: SolverOptions) -> ModelResult<Network> {
        let mut network = Network::with_solver(HighsSolver::new(options));

        for element in &self.elements {
            match element {
                ElementConfig::Battery {
                    name,
                    capacity,
                    initial_charge,
                    reserve,
                    target_charge,
                    discharge_cost,
                } => {
                    let battery = network.add_battery(name, self.periods.clone())?;
                    let values = [
                        (BatteryParam::Capacity, capacity.clone()),
                        (BatteryParam::InitialCharge, initial_charge.map(ParamValue::Scalar)),
                        (BatteryParam::Reserve, reserve.clone()),
                        (BatteryParam::TargetCharge, target_charge.map(ParamValue::Scalar)),
                        (BatteryParam::DischargeCost, discharge_cost.clone()),
                    ];
                    for (key, value) in values {
                        if let Some(value) = value {
                            battery.set_param(key, value)?;
                        }
                    }
                }
                ElementConfig::Node {
                    name,
                    is_source,
                    is_sink,
                } => {
                    network.add_node(name, self.periods.clone(), *is_source, *is_sink)?;
                }
            }
        }

        for connection in &self.connections {
            let segments: IndexMap<String, SegmentSpec> = connection
                .segments
                .iter()
                .map(|s| (s.name.clone(), s.spec.clone()))
                .collect();
            network.add_connection(&connection.source, &connection.target, segments)?;
        }

        info!(
            elements = self.elements.len(),
            connections = self.connections.len(),
            periods = self.periods.len(),
            "network built from configuration"
        );
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::segment::SegmentKind;
    use figment::Jail;

    const NETWORK: &str = r#"
        [solver]
        time_limit_seconds = 10.0

        [network]
        periods = [1.0, 1.0, 0.5]

        [[network.elements]]
        kind = "battery"
        name = "battery"
        capacity = 10
        initial_charge = 4.0

        [[network.elements]]
        kind = "node"
        name = "grid"
        is_source = true
        is_sink = true

        [[network.connections]]
        source = "grid"
        target = "battery"

        [[network.connections.segments]]
        name = "tariff"
        type = "pricing"
        price_st = [0.3, 0.2, 0.4]

        [[network.connections.segments]]
        name = "inverter"
        type = "efficiency"
        efficiency_st = 0.95
        efficiency_ts = 0.95

        [[network.connections.segments]]
        name = "limit"
        type = "power_limit"
        max_st = 5
        max_ts = 5
    "#;

    #[test]
    fn test_load_with_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("network.toml", NETWORK)?;
            jail.set_env("OEO__SOLVER__TIME_LIMIT_SECONDS", "2.5");

            let config = Config::load("network.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.solver.time_limit_seconds, Some(2.5));
            assert_eq!(config.network.periods.len(), 3);
            assert_eq!(config.network.elements.len(), 2);

            let segments = &config.network.connections[0].segments;
            let order: Vec<&str> = segments.iter().map(|s| s.name.as_str()).collect();
            assert_eq!(order, vec!["tariff", "inverter", "limit"]);
            assert_eq!(segments[2].spec.kind(), SegmentKind::PowerLimit);
            Ok(())
        });
    }

    #[test]
    fn test_build_assigns_values() {
        Jail::expect_with(|jail| {
            jail.create_file("network.toml", NETWORK)?;
            let config = Config::load("network.toml").map_err(|e| e.to_string())?;
            let network = config
                .network
                .build(config.solver.clone())
                .map_err(|e| e.to_string())?;

            let battery = network.battery("battery").map_err(|e| e.to_string())?;
            assert_eq!(battery.param(BatteryParam::Capacity), &ParamValue::Scalar(10.0));
            let connection = network.connection("grid", "battery").map_err(|e| e.to_string())?;
            let names: Vec<&str> = connection.segments().map(|(name, _)| name).collect();
            assert_eq!(names, vec!["tariff", "inverter", "limit"]);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_an_error() {
        Jail::expect_with(|_jail| {
            assert!(Config::load("absent.toml").is_err());
            Ok(())
        });
    }
}
