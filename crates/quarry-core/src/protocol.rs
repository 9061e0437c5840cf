//! Host protocol — task requests in, progress and terminal messages out.
//!
//! Both directions travel as JSON bytes. Nothing crosses the host boundary
//! by reference: the coordinator serializes a `TaskRequest`, the host
//! deserializes its own copy, and every `HostMessage` is serialized again
//! on the way back.
//!
//! Wire shape (flattened):
//!   {"kind": "detect_communities", "requestId": "...", "payload": {...}, "options": {...}}
//!   {"kind": "progress_update", "requestId": "...", "progress": 30.0}

use serde::{Deserialize, Serialize};

use crate::analysis::{
    AnomalyOptions, AnomalyResult, CommunityOptions, CommunityStructure, ModelEvaluation,
    ModelOptions, ModelSummary,
};
use crate::graph::{GraphData, SurfaceDataPoint};

// ── Requests ──────────────────────────────────────────────────────────────────

/// Grid over which surface predictions are evaluated. Missing ranges are
/// derived from the training data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GridSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_range: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_range: Option<(f64, f64)>,
    /// Points per axis. Defaults to 20.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<usize>,
}

/// One unit of work, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Task {
    DetectCommunities {
        payload: GraphData,
        #[serde(default)]
        options: CommunityOptions,
    },
    DetectAnomalies {
        payload: GraphData,
        #[serde(default)]
        options: AnomalyOptions,
    },
    CreateModel {
        payload: Vec<SurfaceDataPoint>,
        #[serde(default)]
        options: ModelOptions,
    },
    GeneratePredictions {
        payload: Vec<SurfaceDataPoint>,
        #[serde(default)]
        options: ModelOptions,
        #[serde(default)]
        grid: GridSpec,
    },
    EvaluateModel {
        payload: Vec<SurfaceDataPoint>,
        #[serde(default)]
        options: ModelOptions,
    },
    GenerateConfidenceIntervals {
        payload: Vec<SurfaceDataPoint>,
        #[serde(default)]
        options: ModelOptions,
        #[serde(default)]
        grid: GridSpec,
        /// Defaults to 0.95.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence_level: Option<f64>,
    },
    GenerateForecast {
        payload: Vec<SurfaceDataPoint>,
        #[serde(default)]
        options: ModelOptions,
        /// Defaults to 5.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        periods: Option<usize>,
    },
}

/// Discriminant of a `Task`, used for tracking and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    DetectCommunities,
    DetectAnomalies,
    CreateModel,
    GeneratePredictions,
    EvaluateModel,
    GenerateConfidenceIntervals,
    GenerateForecast,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DetectCommunities => "detect_communities",
            Self::DetectAnomalies => "detect_anomalies",
            Self::CreateModel => "create_model",
            Self::GeneratePredictions => "generate_predictions",
            Self::EvaluateModel => "evaluate_model",
            Self::GenerateConfidenceIntervals => "generate_confidence_intervals",
            Self::GenerateForecast => "generate_forecast",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::DetectCommunities { .. } => TaskKind::DetectCommunities,
            Self::DetectAnomalies { .. } => TaskKind::DetectAnomalies,
            Self::CreateModel { .. } => TaskKind::CreateModel,
            Self::GeneratePredictions { .. } => TaskKind::GeneratePredictions,
            Self::EvaluateModel { .. } => TaskKind::EvaluateModel,
            Self::GenerateConfidenceIntervals { .. } => TaskKind::GenerateConfidenceIntervals,
            Self::GenerateForecast { .. } => TaskKind::GenerateForecast,
        }
    }
}

/// A task plus the caller-generated id that correlates every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub request_id: String,
    #[serde(flatten)]
    pub task: Task,
}

impl TaskRequest {
    pub fn new(request_id: impl Into<String>, task: Task) -> Self {
        Self {
            request_id: request_id.into(),
            task,
        }
    }
}

/// Best-effort extraction of `requestId` from bytes that failed to decode
/// as a `TaskRequest`, so the failure can still be reported.
pub fn peek_request_id(raw: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(raw).ok()?;
    value
        .get("requestId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Everything the host can say about a request. All variants except
/// `ProgressUpdate` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HostEvent {
    ProgressUpdate {
        /// 0..=100, non-decreasing within a request.
        progress: f64,
    },
    CommunitiesDetected {
        graph_data: GraphData,
        community_structure: CommunityStructure,
    },
    AnomaliesDetected {
        result: AnomalyResult,
    },
    ModelCreated {
        model: ModelSummary,
    },
    PredictionsGenerated {
        predictions: Vec<SurfaceDataPoint>,
    },
    ModelEvaluated {
        evaluation: ModelEvaluation,
    },
    ConfidenceIntervalsGenerated {
        upper: Vec<SurfaceDataPoint>,
        lower: Vec<SurfaceDataPoint>,
        level: f64,
    },
    ForecastGenerated {
        forecast: Vec<SurfaceDataPoint>,
    },
    Error {
        message: String,
    },
    Cancelled,
}

impl HostEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ProgressUpdate { .. })
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::ProgressUpdate { .. } => "progress_update",
            Self::CommunitiesDetected { .. } => "communities_detected",
            Self::AnomaliesDetected { .. } => "anomalies_detected",
            Self::ModelCreated { .. } => "model_created",
            Self::PredictionsGenerated { .. } => "predictions_generated",
            Self::ModelEvaluated { .. } => "model_evaluated",
            Self::ConfidenceIntervalsGenerated { .. } => "confidence_intervals_generated",
            Self::ForecastGenerated { .. } => "forecast_generated",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMessage {
    pub request_id: String,
    #[serde(flatten)]
    pub event: HostEvent,
}
