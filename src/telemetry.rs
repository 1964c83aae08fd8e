use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// JSON logs to stderr, filtered by `RUST_LOG`.
///
/// The default keeps solver chatter out of the output; use
/// `RUST_LOG=open_energy_optimizer=debug` to see per-apply reports.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,open_energy_optimizer::solver=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();
}
