//! Parallel trajectory gathering over tokio worker tasks
//!
//! Every worker owns its environment, agent and registry and pushes units
//! onto one bounded queue. Workers only run inference; the consumer is the
//! only place parameters change, and workers pick new parameters up through
//! their agents' snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use molgen_rl_core::{Environment, PolicyNetwork, RLError, Result};

use crate::source::{ExperienceSource, GatherUnit};

/// Gatherer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GathererConfig {
    /// Number of worker tasks
    pub workers: usize,
    /// Queue capacity, defaults to one slot per worker
    pub queue_capacity: Option<usize>,
    /// Longest wait for a unit before the run fails
    pub queue_timeout_secs: u64,
}

impl Default for GathererConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: None,
            queue_timeout_secs: 60,
        }
    }
}

impl GathererConfig {
    /// Reject zero sizes
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RLError::Config("at least one worker is required".into()));
        }
        if self.queue_capacity == Some(0) || self.queue_timeout_secs == 0 {
            return Err(RLError::Config(
                "queue_capacity and queue_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Effective queue capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.workers)
    }
}

/// A unit tagged with the worker that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerMessage {
    /// Producing worker
    pub worker: usize,
    /// Produced unit
    pub unit: GatherUnit,
}

/// Handle to a pool of gathering workers
pub struct ParallelGatherer {
    rx: mpsc::Receiver<WorkerMessage>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl ParallelGatherer {
    /// Spawn one worker per source built by `make_source(worker_index)`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<E, P, F>(config: &GathererConfig, mut make_source: F) -> Result<Self>
    where
        E: Environment + 'static,
        P: PolicyNetwork + 'static,
        F: FnMut(usize) -> Result<ExperienceSource<E, P>>,
    {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.capacity());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(config.workers);
        for worker in 0..config.workers {
            let source = match make_source(worker) {
                Ok(source) => source,
                Err(e) => {
                    for handle in &handles {
                        handle.abort();
                    }
                    return Err(e);
                }
            };
            let task = worker_loop(worker, source, tx.clone(), shutdown_rx.clone())
                .instrument(info_span!("gather_worker", worker));
            handles.push(tokio::spawn(task));
        }

        info!(
            workers = config.workers,
            capacity = config.capacity(),
            "gathering workers spawned"
        );
        Ok(Self {
            rx,
            shutdown_tx,
            handles,
            timeout: Duration::from_secs(config.queue_timeout_secs),
        })
    }

    /// Number of workers spawned
    #[must_use]
    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Next unit from any worker.
    ///
    /// Fails with `QueueStarved` when nothing arrives within the timeout and
    /// with a worker error when every worker has stopped.
    pub async fn recv(&mut self) -> Result<WorkerMessage> {
        match tokio::time::timeout(self.timeout, self.rx.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(RLError::Worker("all gathering workers stopped".into())),
            Err(_) => {
                let dead: Vec<usize> = self
                    .handles
                    .iter()
                    .enumerate()
                    .filter(|(_, h)| h.is_finished())
                    .map(|(i, _)| i)
                    .collect();
                error!(?dead, timeout = ?self.timeout, "gathering queue starved");
                Err(RLError::QueueStarved(self.timeout))
            }
        }
    }

    /// Signal every worker to stop, then abort and join them
    pub async fn shutdown(&mut self) {
        self.shutdown_tx.send_replace(true);
        for handle in &self.handles {
            handle.abort();
        }
        for (worker, handle) in self.handles.drain(..).enumerate() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(worker, "gathering worker panicked");
                }
            }
        }
        info!("gathering workers stopped");
    }
}

impl Drop for ParallelGatherer {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn worker_loop<E, P>(
    worker: usize,
    mut source: ExperienceSource<E, P>,
    tx: mpsc::Sender<WorkerMessage>,
    mut shutdown: watch::Receiver<bool>,
) where
    E: Environment,
    P: PolicyNetwork,
{
    debug!(worker, "gathering worker started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = source.next_units() => match result {
                Ok(units) => {
                    for unit in units {
                        if tx.send(WorkerMessage { worker, unit }).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!(worker, error = %e, "gathering worker failed");
                    let unit = GatherUnit::Failed(e.to_string());
                    let _ = tx.send(WorkerMessage { worker, unit }).await;
                    return;
                }
            },
        }
    }
    debug!(worker, "gathering worker stopped");
}
