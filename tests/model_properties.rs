//! Property checks over randomly priced and randomly forced networks

mod common;

use common::{chain, hourly, shrinking_capacity, stacked_sections, TOLERANCE};
use open_energy_optimizer::model::{Network, SegmentParam, SegmentSpec};
use open_energy_optimizer::solver::SolverAdapter;
use proptest::prelude::*;

const CAPACITY: f64 = 10.0;
const RESERVE: f64 = 1.0;

fn arbitrage_network(initial: f64, buy: &[f64], sell: &[f64]) -> Network {
    let periods = hourly(buy.len());
    let mut network = Network::new();
    network.add_node("grid", periods.clone(), true, true).unwrap();
    {
        let battery = network.add_battery("battery", periods).unwrap();
        battery.set_capacity(CAPACITY).unwrap();
        battery.set_reserve(RESERVE).unwrap();
        battery.set_initial_charge(initial).unwrap();
        battery.set_discharge_cost(0.01).unwrap();
    }
    network
        .add_connection(
            "grid",
            "battery",
            chain(&[
                ("tariff", SegmentSpec::pricing(buy.to_vec(), sell.to_vec())),
                ("inverter", SegmentSpec::efficiency(0.95)),
                ("limit", SegmentSpec::power_limit(5.0)),
            ]),
        )
        .unwrap();
    network
}

fn prices(len: usize, low: f64, high: f64) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(low..high, len)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn stored_energy_stays_within_bounds(
        initial in RESERVE..CAPACITY,
        buy in prices(4, 0.0, 1.0),
        sell in prices(4, -0.5, 0.0),
    ) {
        let mut network = arbitrage_network(initial, &buy, &sell);
        let outputs = network.optimize().unwrap();
        let stored = outputs.values("battery", "battery_energy_stored").unwrap();
        prop_assert_eq!(stored.len(), 5);
        prop_assert!((stored[0] - initial).abs() < TOLERANCE);
        for kwh in &stored[1..] {
            prop_assert!(*kwh <= CAPACITY + TOLERANCE);
            prop_assert!(*kwh >= RESERVE - TOLERANCE);
        }
        for kw in outputs.values("battery", "battery_power_charge").unwrap() {
            prop_assert!(*kw >= -TOLERANCE);
        }
    }

    #[test]
    fn warm_price_update_matches_cold_build(
        first in prices(3, 0.0, 1.0),
        second in prices(3, 0.0, 1.0),
        sell in prices(3, -0.5, 0.0),
    ) {
        let mut warm = arbitrage_network(5.0, &first, &sell);
        warm.optimize().unwrap();
        let rows = warm.solver().num_rows();
        warm.connection_mut("grid", "battery")
            .unwrap()
            .set("tariff", SegmentParam::PriceSt, second.clone())
            .unwrap();
        let warm_objective = warm.optimize().unwrap().objective;
        prop_assert_eq!(warm.solver().num_rows(), rows);

        let mut cold = arbitrage_network(5.0, &second, &sell);
        let cold_objective = cold.optimize().unwrap().objective;
        prop_assert!((warm_objective - cold_objective).abs() < 1e-5);
    }

    #[test]
    fn repeated_apply_changes_nothing(buy in prices(2, 0.0, 1.0)) {
        let mut network = arbitrage_network(2.0, &buy, &[0.0, 0.0]);
        network.optimize().unwrap();
        let before = network.solver().stats();
        network.apply().unwrap();
        network.apply().unwrap();
        prop_assert_eq!(network.solver().stats(), before);
    }

    #[test]
    fn lower_section_never_exceeds_its_capacity(
        forcing in prop::collection::vec(-0.5..1.0, 3),
        lower_initial in 0.0..3.0,
    ) {
        let mut network = stacked_sections(&forcing, lower_initial);
        let outputs = network.optimize().unwrap();
        let lower = outputs.values("lower", "battery_energy_stored").unwrap();
        for (kwh, cap) in lower.iter().zip(shrinking_capacity(forcing.len())) {
            prop_assert!(*kwh <= cap + TOLERANCE);
            prop_assert!(*kwh >= -TOLERANCE);
        }
    }

    #[test]
    fn full_lower_section_pushes_exactly_the_shrink_up(
        forcing in prop::collection::vec(-0.5..1.0, 3),
    ) {
        let mut network = stacked_sections(&forcing, 3.0);
        let outputs = network.optimize().unwrap();
        let upper = outputs.values("upper", "battery_energy_stored").unwrap();
        let forced: f64 = forcing.iter().sum();
        prop_assert!((upper[3] - upper[0] - forced - 1.0).abs() < TOLERANCE);
        let lower = outputs.values("lower", "battery_energy_stored").unwrap();
        prop_assert!((lower[3] - 2.0).abs() < TOLERANCE);
    }
}
