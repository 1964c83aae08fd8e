//! Shared network builders for the integration tests
#![allow(dead_code)]

use indexmap::IndexMap;
use open_energy_optimizer::model::{Network, ParamValue, Periods, SegmentSpec};

pub const TOLERANCE: f64 = 1e-6;

pub fn hourly(n: usize) -> Periods {
    Periods::uniform(n, 1.0).unwrap()
}

pub fn chain(segments: &[(&str, SegmentSpec)]) -> IndexMap<String, SegmentSpec> {
    segments
        .iter()
        .map(|(name, spec)| (name.to_string(), spec.clone()))
        .collect()
}

/// Grid node feeding one battery through a tariff and a 5 kW limit. The
/// battery must end the horizon with `target` kWh.
pub fn tariff_network(prices: &[f64], target: f64) -> Network {
    let periods = hourly(prices.len());
    let mut network = Network::new();
    network.add_node("grid", periods.clone(), true, true).unwrap();
    {
        let battery = network.add_battery("battery", periods).unwrap();
        battery.set_capacity(10.0).unwrap();
        battery.set_target_charge(Some(target)).unwrap();
    }
    network
        .add_connection(
            "grid",
            "battery",
            chain(&[
                ("tariff", SegmentSpec::pricing(prices.to_vec(), 0.0)),
                ("limit", SegmentSpec::power_limit(5.0)),
            ]),
        )
        .unwrap();
    network
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < TOLERANCE,
        "expected {expected}, got {actual}"
    );
}

/// Lower section capacity of the stacked-section networks: 3 kWh at boundary 0,
/// 2 kWh afterwards.
pub fn shrinking_capacity(periods: usize) -> Vec<f64> {
    std::iter::once(3.0).chain(std::iter::repeat(2.0).take(periods)).collect()
}

/// A grid node forcing a fixed exchange with the upper section of a battery
/// stacked on a shrinking lower section. `forcing[t] > 0` charges the upper
/// section, `< 0` discharges it.
pub fn stacked_sections(forcing: &[f64], lower_initial: f64) -> Network {
    let periods = hourly(forcing.len());
    let mut network = Network::new();
    network.add_node("grid", periods.clone(), true, true).unwrap();
    {
        let upper = network.add_battery("upper", periods.clone()).unwrap();
        upper.set_capacity(10.0).unwrap();
        upper.set_initial_charge(2.0).unwrap();
    }
    {
        let lower = network.add_battery("lower", periods).unwrap();
        lower.set_capacity(shrinking_capacity(forcing.len())).unwrap();
        lower.set_initial_charge(lower_initial).unwrap();
    }
    let charge: Vec<f64> = forcing.iter().map(|f| f.max(0.0)).collect();
    let discharge: Vec<f64> = forcing.iter().map(|f| (-f).max(0.0)).collect();
    network
        .add_connection(
            "grid",
            "upper",
            chain(&[(
                "setpoint",
                SegmentSpec::PowerLimit {
                    max_st: Some(ParamValue::Series(charge)),
                    max_ts: Some(ParamValue::Series(discharge)),
                    fixed_st: true,
                    fixed_ts: true,
                },
            )]),
        )
        .unwrap();
    network
        .add_connection(
            "upper",
            "lower",
            chain(&[("balance", SegmentSpec::BatteryBalance { penalty: None })]),
        )
        .unwrap();
    network
}
