//! Optimizer worker
//!
//! The model is single-threaded. [`OptimizerWorker`] moves a [`Network`] onto a
//! blocking thread and serializes every parameter write and solve through one
//! command channel. Results are published as immutable snapshots on a `watch`
//! channel, so any number of readers can follow the latest outputs.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ModelError, ModelResult};
use crate::model::{Network, NetworkOutputs};

type Mutation = Box<dyn FnOnce(&mut Network) -> ModelResult<()> + Send>;

enum Command {
    Update {
        mutation: Mutation,
        reply: oneshot::Sender<ModelResult<()>>,
    },
    Optimize {
        reply: oneshot::Sender<ModelResult<Arc<NetworkOutputs>>>,
    },
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("optimizer worker has stopped")]
    Stopped,
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Handle to a network running on its own blocking thread
pub struct OptimizerWorker {
    sender: mpsc::UnboundedSender<Command>,
    outputs: watch::Receiver<Option<Arc<NetworkOutputs>>>,
    handle: JoinHandle<Network>,
}

impl std::fmt::Debug for OptimizerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerWorker").finish_non_exhaustive()
    }
}

impl OptimizerWorker {
    /// Must be called from within a tokio runtime.
    pub fn spawn(network: Network) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (publisher, outputs) = watch::channel(None);
        let handle = tokio::task::spawn_blocking(move || run(network, receiver, publisher));
        Self {
            sender,
            outputs,
            handle,
        }
    }

    /// Run `mutation` against the network between two solves.
    pub async fn update<F>(&self, mutation: F) -> Result<(), WorkerError>
    where
        F: FnOnce(&mut Network) -> ModelResult<()> + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::Update {
                mutation: Box::new(mutation),
                reply,
            })
            .map_err(|_| WorkerError::Stopped)?;
        Ok(response.await.map_err(|_| WorkerError::Stopped)??)
    }

    pub async fn optimize(&self) -> Result<Arc<NetworkOutputs>, WorkerError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Command::Optimize { reply })
            .map_err(|_| WorkerError::Stopped)?;
        Ok(response.await.map_err(|_| WorkerError::Stopped)??)
    }

    /// Latest successful outputs; `None` before the first solve and after a
    /// failed one.
    pub fn latest(&self) -> Option<Arc<NetworkOutputs>> {
        self.outputs.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<NetworkOutputs>>> {
        self.outputs.clone()
    }

    /// Stop the worker and hand the network back.
    pub async fn shutdown(self) -> Result<Network, WorkerError> {
        drop(self.sender);
        self.handle.await.map_err(|_| WorkerError::Stopped)
    }
}

fn run(
    mut network: Network,
    mut commands: mpsc::UnboundedReceiver<Command>,
    publisher: watch::Sender<Option<Arc<NetworkOutputs>>>,
) -> Network {
    debug!("optimizer worker started");
    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Update { mutation, reply } => {
                let _ = reply.send(mutation(&mut network));
            }
            Command::Optimize { reply } => {
                let result = network.optimize().map(|outputs| Arc::new(outputs.clone()));
                match &result {
                    Ok(outputs) => {
                        publisher.send_replace(Some(Arc::clone(outputs)));
                    }
                    Err(err) => {
                        warn!(error = %err, "worker optimization failed");
                        publisher.send_replace(None);
                    }
                }
                let _ = reply.send(result);
            }
        }
    }
    debug!("optimizer worker stopped");
    network
}
