use anyhow::Result;
use open_energy_optimizer::{config, service, telemetry};
use config::Config;
use service::OptimizerWorker;
use telemetry::init_tracing;
use tracing::info;

const DEFAULT_CONFIG: &str = "config/network.toml";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OEO_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = Config::load(&path)?;

    info!(config = %path, "starting Open Energy Optimizer");
    let network = cfg.network.build(cfg.solver.clone())?;

    let worker = OptimizerWorker::spawn(network);
    let outputs = worker.optimize().await?;
    info!(run_id = %outputs.run_id, objective = outputs.objective, "dispatch computed");

    println!("{}", serde_json::to_string_pretty(outputs.as_ref())?);

    worker.shutdown().await?;
    Ok(())
}
