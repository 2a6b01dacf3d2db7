//! Claim worker runtime.
//!
//! Every claim key gets exactly one worker task, so two passes for the same
//! claim never overlap. Passes across keys share a semaphore.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::reconciler::{Reconciler, Requeue};
use crate::constants::intervals::PROGRESS_PAUSE;
use crate::constants::limits::{EVENT_BUFFER_SIZE, MAX_PROGRESS_PASSES};
use crate::models::claim::{Claim, ClaimKey, ClaimSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimEvent {
    Upsert(Claim),
    Deleted(ClaimKey),
}

struct Worker {
    updates: mpsc::Sender<ClaimSpec>,
    handle: JoinHandle<()>,
}

pub struct Controller {
    reconciler: Arc<Reconciler>,
    permits: Arc<Semaphore>,
    /// Pause applied after a run of back-to-back progress passes.
    progress_pause: Duration,
    workers: HashMap<ClaimKey, Worker>,
}

impl Controller {
    pub fn new(reconciler: Arc<Reconciler>, max_concurrent: usize) -> Self {
        Self {
            reconciler,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            progress_pause: PROGRESS_PAUSE,
            workers: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn with_progress_pause(mut self, pause: Duration) -> Self {
        self.progress_pause = pause;
        self
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Consumes events until the sender side closes, then lets every worker
    /// finish its current pass and exit.
    pub async fn run(mut self, mut events: mpsc::Receiver<ClaimEvent>) {
        info!("Controller started");

        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }

        self.shutdown().await;
        info!("Controller stopped");
    }

    pub async fn handle(&mut self, event: ClaimEvent) {
        match event {
            ClaimEvent::Upsert(claim) => self.upsert(claim).await,
            ClaimEvent::Deleted(key) => self.delete(&key),
        }
    }

    async fn upsert(&mut self, claim: Claim) {
        self.workers.retain(|key, worker| {
            let alive = !worker.handle.is_finished();
            if !alive {
                debug!(claim = %key, "Reaping finished worker");
            }
            alive
        });

        if let Some(worker) = self.workers.get(&claim.key) {
            if worker.updates.send(claim.spec.clone()).await.is_ok() {
                debug!(claim = %claim.key, "Spec update forwarded to worker");
                return;
            }
            warn!(claim = %claim.key, "Worker went away, starting a new one");
        }

        let key = claim.key.clone();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.reconciler),
            Arc::clone(&self.permits),
            self.progress_pause,
            claim,
            rx,
        ));

        info!(claim = %key, "Started claim worker");
        self.workers.insert(
            key,
            Worker {
                updates: tx,
                handle,
            },
        );
    }

    fn delete(&mut self, key: &ClaimKey) {
        if self.workers.remove(key).is_some() {
            info!(
                claim = %key,
                "Claim deleted; stopping worker and leaving server objects in place"
            );
        }
    }

    async fn shutdown(&mut self) {
        let workers: Vec<_> = self.workers.drain().collect();
        for (key, worker) in workers {
            drop(worker.updates);
            if let Err(e) = worker.handle.await {
                warn!(claim = %key, "Worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(
    reconciler: Arc<Reconciler>,
    permits: Arc<Semaphore>,
    progress_pause: Duration,
    mut claim: Claim,
    mut updates: mpsc::Receiver<ClaimSpec>,
) {
    let mut progress_run = 0usize;

    loop {
        let outcome = {
            let Ok(_permit) = permits.acquire().await else {
                return;
            };
            reconciler.reconcile(&claim).await
        };

        let wait = match outcome.requeue {
            Requeue::Immediately => {
                progress_run += 1;
                if progress_run < MAX_PROGRESS_PASSES {
                    if drain_latest(&mut updates, &mut claim) {
                        continue;
                    }
                    break;
                }
                warn!(
                    claim = %claim.key,
                    passes = progress_run,
                    "Claim keeps progressing without converging; pausing"
                );
                Some(progress_pause)
            }
            Requeue::After(delay) => Some(delay),
            Requeue::Never => None,
        };
        progress_run = 0;

        let update = match wait {
            Some(delay) => {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(spec) => Some(spec),
                        None => break,
                    },
                    () = tokio::time::sleep(delay) => None,
                }
            }
            None => match updates.recv().await {
                Some(spec) => Some(spec),
                None => break,
            },
        };

        if let Some(spec) = update {
            claim.spec = spec;
            if !drain_latest(&mut updates, &mut claim) {
                break;
            }
        }
    }

    debug!(claim = %claim.key, "Worker exiting");
}

/// Applies the newest queued spec. Returns `false` once the claim is gone.
fn drain_latest(updates: &mut mpsc::Receiver<ClaimSpec>, claim: &mut Claim) -> bool {
    loop {
        match updates.try_recv() {
            Ok(spec) => claim.spec = spec,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return false,
        }
    }
}
