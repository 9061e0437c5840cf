//! Host coordinator — dispatches tasks to execution hosts and routes their
//! messages back to the caller that asked.
//!
//! Every host writes into one shared inbound channel. A single router task
//! decodes each message, looks its `requestId` up in the pending table, and
//! forwards progress or resolves the caller's handle. Entries leave the
//! table on their terminal message; anything arriving later is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Semaphore};

use quarry_core::config::EngineConfig;
use quarry_core::protocol::{HostEvent, HostMessage, Task, TaskKind, TaskRequest};

use crate::cancel::CancelToken;
use crate::host::{self, Inbound};
use crate::request_store::{now_ms, RequestStatus, RequestStore};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("request {0} is already in flight")]
    DuplicateRequest(String),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The host's result message.
    Completed(HostEvent),
    Failed(String),
    Cancelled,
}

impl TaskOutcome {
    fn from_event(event: HostEvent) -> Self {
        match event {
            HostEvent::Error { message } => Self::Failed(message),
            HostEvent::Cancelled => Self::Cancelled,
            other => Self::Completed(other),
        }
    }

    pub fn status(&self) -> RequestStatus {
        match self {
            Self::Completed(_) => RequestStatus::Completed,
            Self::Failed(_) => RequestStatus::Failed,
            Self::Cancelled => RequestStatus::Cancelled,
        }
    }
}

/// Caller's view of one dispatched request.
#[derive(Debug)]
pub struct RequestHandle {
    pub request_id: String,
    /// Progress values in the order the host reported them.
    pub progress: mpsc::UnboundedReceiver<f64>,
    outcome: oneshot::Receiver<TaskOutcome>,
}

impl RequestHandle {
    /// Wait for the terminal message.
    pub async fn outcome(self) -> TaskOutcome {
        self.outcome
            .await
            .unwrap_or_else(|_| TaskOutcome::Failed("coordinator shut down".into()))
    }

    /// Wait for the terminal message and return it with every progress
    /// value reported before it.
    pub async fn collect(mut self) -> (Vec<f64>, TaskOutcome) {
        let outcome = (&mut self.outcome)
            .await
            .unwrap_or_else(|_| TaskOutcome::Failed("coordinator shut down".into()));
        let mut progress = Vec::new();
        while let Ok(p) = self.progress.try_recv() {
            progress.push(p);
        }
        (progress, outcome)
    }
}

struct Pending {
    kind: TaskKind,
    cancel: CancelToken,
    progress_tx: mpsc::UnboundedSender<f64>,
    outcome_tx: oneshot::Sender<TaskOutcome>,
    started: Instant,
    /// Distinguishes successive dispatches under the same request id.
    generation: u64,
}

#[derive(Clone)]
pub struct HostCoordinator {
    /// request_id → in-flight request
    pending: Arc<DashMap<String, Pending>>,
    store: RequestStore,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    semaphore: Arc<Semaphore>,
    engine: Arc<EngineConfig>,
    counter: Arc<AtomicU64>,
}

impl HostCoordinator {
    /// Spawns the router; must be called inside a tokio runtime.
    pub fn new(engine: EngineConfig) -> Self {
        Self::with_store(engine, RequestStore::new())
    }

    pub fn with_store(engine: EngineConfig, store: RequestStore) -> Self {
        let max_tasks = engine.effective_max_tasks();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(DashMap::new());
        tokio::spawn(route(inbound_rx, pending.clone(), store.clone()));
        tracing::info!(max_concurrent = max_tasks, "host coordinator started");
        Self {
            pending,
            store,
            inbound_tx,
            semaphore: Arc::new(Semaphore::new(max_tasks)),
            engine: Arc::new(engine),
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    /// Dispatch under a freshly generated request id.
    pub fn dispatch(&self, task: Task) -> Result<RequestHandle, CoordinatorError> {
        let request_id = self.next_request_id(task.kind());
        self.dispatch_with_id(request_id, task)
    }

    /// Dispatch under a caller-chosen id. Fails if that id is still in flight.
    pub fn dispatch_with_id(
        &self,
        request_id: impl Into<String>,
        task: Task,
    ) -> Result<RequestHandle, CoordinatorError> {
        let request_id = request_id.into();
        let kind = task.kind();
        let raw = Bytes::from(serde_json::to_vec(&TaskRequest::new(
            request_id.clone(),
            task,
        ))?);

        let generation = self.counter.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        match self.pending.entry(request_id.clone()) {
            Entry::Occupied(_) => return Err(CoordinatorError::DuplicateRequest(request_id)),
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    kind,
                    cancel: cancel.clone(),
                    progress_tx,
                    outcome_tx,
                    started: Instant::now(),
                    generation,
                });
            }
        }
        self.store.track(&request_id, kind);

        let semaphore = self.semaphore.clone();
        let engine = self.engine.clone();
        let tx = self.inbound_tx.clone();
        let store = self.store.clone();
        let id = request_id.clone();
        tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            if permit.is_ok() {
                store.mark_running(&id);
                let host_tx = tx.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    host::run(&raw, cancel, &engine, host_tx);
                })
                .await;
                if let Err(e) = joined {
                    tracing::error!(request_id = %id, error = %e, "execution host aborted");
                }
            }
            drop(permit);
            let _ = tx.send(Inbound::Exited {
                request_id: id,
                generation,
            });
        });

        tracing::info!(
            request_id = short_id(&request_id),
            %kind,
            "request dispatched"
        );
        Ok(RequestHandle {
            request_id,
            progress: progress_rx,
            outcome: outcome_rx,
        })
    }

    /// Ask the host running `request_id` to stop at its next checkpoint.
    /// Returns false if the request is not in flight.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.pending.get(request_id) {
            Some(p) => {
                p.cancel.cancel();
                tracing::info!(request_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// `hex(blake3(kind || now_ms_le || counter_le))`
    fn next_request_id(&self, kind: TaskKind) -> String {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut h = blake3::Hasher::new();
        h.update(kind.as_str().as_bytes());
        h.update(&now_ms().to_le_bytes());
        h.update(&counter.to_le_bytes());
        hex::encode(h.finalize().as_bytes())
    }
}

/// Leading 16 characters, for log fields.
fn short_id(id: &str) -> &str {
    id.get(..16).unwrap_or(id)
}

/// Router loop. Ends once every sender (the coordinator and all running
/// hosts) is gone.
async fn route(
    mut inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    pending: Arc<DashMap<String, Pending>>,
    store: RequestStore,
) {
    while let Some(inbound) = inbound_rx.recv().await {
        match inbound {
            Inbound::Message(raw) => match serde_json::from_slice::<HostMessage>(&raw) {
                Ok(msg) => deliver(&pending, &store, msg),
                Err(e) => tracing::warn!(error = %e, "dropping undecodable host message"),
            },
            Inbound::Exited {
                request_id,
                generation,
            } => {
                if let Some((_, p)) =
                    pending.remove_if(&request_id, |_, p| p.generation == generation)
                {
                    resolve(
                        &store,
                        &request_id,
                        p,
                        TaskOutcome::Failed(
                            "execution host exited without a terminal message".into(),
                        ),
                        None,
                    );
                }
            }
        }
    }
    tracing::debug!("router stopped");
}

fn deliver(pending: &DashMap<String, Pending>, store: &RequestStore, msg: HostMessage) {
    let HostMessage { request_id, event } = msg;
    if let HostEvent::ProgressUpdate { progress } = event {
        match pending.get(&request_id) {
            Some(p) => {
                // Caller may have dropped its handle.
                let _ = p.progress_tx.send(progress);
                store.set_progress(&request_id, progress);
            }
            None => tracing::trace!(request_id = %request_id, "progress for untracked request"),
        }
        return;
    }

    let Some((_, p)) = pending.remove(&request_id) else {
        tracing::trace!(
            request_id = %request_id,
            kind = event.kind_str(),
            "message for untracked request"
        );
        return;
    };
    let result = match &event {
        HostEvent::Error { .. } | HostEvent::Cancelled => None,
        other => serde_json::to_value(other).ok(),
    };
    resolve(store, &request_id, p, TaskOutcome::from_event(event), result);
}

fn resolve(
    store: &RequestStore,
    request_id: &str,
    p: Pending,
    outcome: TaskOutcome,
    result: Option<serde_json::Value>,
) {
    let error = match &outcome {
        TaskOutcome::Failed(message) => Some(message.clone()),
        _ => None,
    };
    let status = outcome.status();
    store.finish(request_id, status, result, error);
    tracing::info!(
        request_id = short_id(request_id),
        kind = %p.kind,
        ?status,
        elapsed_ms = p.started.elapsed().as_millis() as u64,
        "request finished"
    );
    let _ = p.outcome_tx.send(outcome);
}
