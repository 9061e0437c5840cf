//! Minimum data-size checks, run by the host before any heavy work and by
//! each engine entry point on its own.

use quarry_core::graph::{GraphData, SurfaceDataPoint};
use quarry_core::protocol::Task;

use crate::error::EngineError;

pub const MIN_GRAPH_NODES: usize = 3;
pub const MIN_GRAPH_LINKS: usize = 3;
pub const MIN_SURFACE_POINTS: usize = 10;

/// Graph must have enough nodes and links, and every link must point at a
/// real node.
pub fn require_graph(graph: &GraphData, operation: &'static str) -> Result<(), EngineError> {
    if graph.node_count() < MIN_GRAPH_NODES || graph.link_count() < MIN_GRAPH_LINKS {
        return Err(EngineError::InsufficientData {
            operation,
            requirement: format!("{MIN_GRAPH_NODES} nodes and {MIN_GRAPH_LINKS} links"),
        });
    }
    if let Some(index) = graph.first_invalid_link() {
        let link = graph.links[index];
        let node = if link.source >= graph.node_count() {
            link.source
        } else {
            link.target
        };
        return Err(EngineError::InvalidLink {
            index,
            node,
            node_count: graph.node_count(),
        });
    }
    Ok(())
}

pub fn require_points(
    points: &[SurfaceDataPoint],
    operation: &'static str,
) -> Result<(), EngineError> {
    if points.len() < MIN_SURFACE_POINTS {
        return Err(EngineError::InsufficientData {
            operation,
            requirement: format!("{MIN_SURFACE_POINTS} data points"),
        });
    }
    Ok(())
}

/// Precondition for a whole task, by kind.
pub fn check(task: &Task) -> Result<(), EngineError> {
    match task {
        Task::DetectCommunities { payload, .. } => require_graph(payload, "community detection"),
        Task::DetectAnomalies { payload, .. } => require_graph(payload, "anomaly detection"),
        Task::CreateModel { payload, .. } => require_points(payload, "modeling"),
        Task::GeneratePredictions { payload, .. } => require_points(payload, "predictions"),
        Task::EvaluateModel { payload, .. } => require_points(payload, "evaluation"),
        Task::GenerateConfidenceIntervals { payload, .. } => {
            require_points(payload, "confidence intervals")
        }
        Task::GenerateForecast { payload, .. } => require_points(payload, "forecasting"),
    }
}
