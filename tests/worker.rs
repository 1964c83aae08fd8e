//! Optimizer worker driven from async code

mod common;

use std::sync::Arc;

use common::{assert_close, tariff_network};
use open_energy_optimizer::model::{NetworkState, SegmentParam};
use open_energy_optimizer::service::{OptimizerWorker, WorkerError};
use open_energy_optimizer::{ConfigurationError, ModelError};

#[tokio::test]
async fn test_worker_publishes_snapshots() {
    let worker = OptimizerWorker::spawn(tariff_network(&[0.3, 0.1, 0.4], 6.0));
    assert!(worker.latest().is_none());
    let mut updates = worker.subscribe();

    let first = worker.optimize().await.unwrap();
    assert_close(first.objective, 0.8);
    updates.changed().await.unwrap();
    let published = updates.borrow_and_update().clone().unwrap();
    assert!(Arc::ptr_eq(&published, &first));

    worker
        .update(|network| {
            network
                .connection_mut("grid", "battery")?
                .set("tariff", SegmentParam::PriceSt, vec![0.2, 0.3, 0.1])?;
            Ok(())
        })
        .await
        .unwrap();
    let second = worker.optimize().await.unwrap();
    assert_close(second.objective, 0.7);
    assert_ne!(first.run_id, second.run_id);
    // Earlier snapshots are immutable.
    assert_close(first.objective, 0.8);
    assert_eq!(worker.latest().unwrap().run_id, second.run_id);

    let network = worker.shutdown().await.unwrap();
    assert_eq!(network.state(), NetworkState::Warm);
}

#[tokio::test]
async fn test_failed_update_reports_model_error() {
    let worker = OptimizerWorker::spawn(tariff_network(&[0.1], 1.0));
    let err = worker
        .update(|network| network.remove_connection("grid", "nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkerError::Model(ModelError::Configuration(ConfigurationError::UnknownElement(_)))
    ));
    // The worker keeps serving after a failed command.
    assert!(worker.optimize().await.is_ok());
    worker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_solve_clears_latest() {
    let worker = OptimizerWorker::spawn(tariff_network(&[0.1, 0.2], 2.0));
    worker.optimize().await.unwrap();
    assert!(worker.latest().is_some());

    worker
        .update(|network| {
            // More than the limit can deliver over two hours.
            network.battery_mut("battery")?.set_target_charge(Some(12.0))?;
            network.battery_mut("battery")?.set_capacity(20.0)?;
            Ok(())
        })
        .await
        .unwrap();
    let err = worker.optimize().await.unwrap_err();
    assert!(matches!(err, WorkerError::Model(ModelError::Solve(_))));
    assert!(worker.latest().is_none());
    worker.shutdown().await.unwrap();
}
