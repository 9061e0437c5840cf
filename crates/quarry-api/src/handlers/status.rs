use axum::extract::State;
use axum::Json;
use serde::Serialize;

use quarry_services::{StatusCounts, TrackedRequest};

use super::ApiState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub counts: StatusCounts,
    pub in_flight: Vec<TrackedRequest>,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let store = state.coordinator.store();
    Json(StatusResponse {
        counts: store.counts(),
        in_flight: store.in_flight(),
    })
}
