//! quarry-core — shared data model, task protocol, and configuration.
//! All other Quarry crates depend on this one.

pub mod analysis;
pub mod config;
pub mod graph;
pub mod protocol;

pub use analysis::{
    AnomalyDetectionMethod, AnomalyList, AnomalyMetrics, AnomalyOptions, AnomalyResult,
    CommunityAlgorithm, CommunityOptions, CommunityStructure, LinkAnomaly, ModelEvaluation,
    ModelOptions, ModelSummary, ModelType, NodeAnomaly,
};
pub use graph::{GraphData, GraphLink, GraphNode, SurfaceDataPoint};
pub use protocol::{GridSpec, HostEvent, HostMessage, Task, TaskKind, TaskRequest};
