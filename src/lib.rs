pub mod config;
pub mod error;
pub mod model;
pub mod service;
pub mod solver;
pub mod telemetry;

pub use error::{ConfigurationError, ModelError, ModelResult};
pub use model::{Network, NetworkOutputs, Periods};
