use thiserror::Error;

/// Everything an engine can fail with. The host turns each variant into a
/// single terminal message; `Cancelled` becomes `cancelled`, the rest `error`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Not enough data for {operation} (minimum {requirement} required)")]
    InsufficientData {
        operation: &'static str,
        requirement: String,
    },
    #[error("link {index} references node {node} but the graph has {node_count} nodes")]
    InvalidLink {
        index: usize,
        node: usize,
        node_count: usize,
    },
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("model fit failed: {0}")]
    FitFailed(String),
    #[error("model produced a non-finite value at ({x}, {y})")]
    NonFinite { x: f64, y: f64 },
    #[error("request cancelled")]
    Cancelled,
}
