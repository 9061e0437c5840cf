use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use quarry_core::protocol::TaskKind;

/// Lifecycle status of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Full state of a dispatched request, as exposed over the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedRequest {
    pub request_id: String,
    pub kind: TaskKind,
    pub status: RequestStatus,
    /// Last reported progress, 0..=100.
    pub progress: f64,
    /// Unix ms when the request was dispatched.
    pub submitted_at: u64,
    /// Unix ms when the status or progress last changed.
    pub updated_at: u64,
    /// Terminal message, populated on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock milliseconds from dispatch to the terminal message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// In-memory record of every request the coordinator has dispatched.
#[derive(Clone, Default)]
pub struct RequestStore {
    /// request_id → TrackedRequest
    requests: Arc<DashMap<String, TrackedRequest>>,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl RequestStore {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(DashMap::new()),
        }
    }

    /// Record a new dispatch. An existing entry under the same id is replaced.
    pub fn track(&self, request_id: &str, kind: TaskKind) {
        let now = now_ms();
        self.requests.insert(
            request_id.to_string(),
            TrackedRequest {
                request_id: request_id.to_string(),
                kind,
                status: RequestStatus::Queued,
                progress: 0.0,
                submitted_at: now,
                updated_at: now,
                result: None,
                error: None,
                elapsed_ms: None,
            },
        );
    }

    pub fn mark_running(&self, request_id: &str) {
        if let Some(mut req) = self.requests.get_mut(request_id) {
            if req.status == RequestStatus::Queued {
                req.status = RequestStatus::Running;
                req.updated_at = now_ms();
            }
        }
    }

    /// Progress only moves forward.
    pub fn set_progress(&self, request_id: &str, progress: f64) {
        if let Some(mut req) = self.requests.get_mut(request_id) {
            if !req.status.is_finished() && progress > req.progress {
                req.progress = progress;
                req.status = RequestStatus::Running;
                req.updated_at = now_ms();
            }
        }
    }

    /// Record the terminal state. Later calls for the same id are ignored.
    pub fn finish(
        &self,
        request_id: &str,
        status: RequestStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        if let Some(mut req) = self.requests.get_mut(request_id) {
            if req.status.is_finished() {
                return;
            }
            let now = now_ms();
            req.status = status;
            if status == RequestStatus::Completed {
                req.progress = 100.0;
            }
            req.result = result;
            req.error = error;
            req.elapsed_ms = Some(now.saturating_sub(req.submitted_at));
            req.updated_at = now;
        }
    }

    pub fn get(&self, request_id: &str) -> Option<TrackedRequest> {
        self.requests.get(request_id).map(|r| r.clone())
    }

    /// All tracked requests, oldest first.
    pub fn all(&self) -> Vec<TrackedRequest> {
        let mut all: Vec<TrackedRequest> = self.requests.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        all
    }

    pub fn in_flight(&self) -> Vec<TrackedRequest> {
        self.all()
            .into_iter()
            .filter(|r| !r.status.is_finished())
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for req in self.requests.iter() {
            match req.status {
                RequestStatus::Queued => counts.queued += 1,
                RequestStatus::Running => counts.running += 1,
                RequestStatus::Completed => counts.completed += 1,
                RequestStatus::Failed => counts.failed += 1,
                RequestStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Forget finished requests last updated before `cutoff_ms`. Returns how
    /// many were removed.
    pub fn prune_finished(&self, cutoff_ms: u64) -> usize {
        let before = self.requests.len();
        self.requests
            .retain(|_, r| !(r.status.is_finished() && r.updated_at < cutoff_ms));
        before - self.requests.len()
    }
}
