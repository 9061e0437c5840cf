//! Algorithm options and result records.
//!
//! Everything here crosses the host boundary as JSON, so every type is a
//! plain serde record. The fitted prediction model is deliberately absent:
//! only `ModelSummary` and derived artifacts are ever returned.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ── Community detection ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunityAlgorithm {
    #[default]
    Louvain,
    Leiden,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommunityOptions {
    pub algorithm: CommunityAlgorithm,
    /// Higher values favor smaller communities.
    pub resolution: f64,
    pub random_seed: u64,
}

impl Default for CommunityOptions {
    fn default() -> Self {
        Self {
            algorithm: CommunityAlgorithm::Louvain,
            resolution: 1.0,
            random_seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityStructure {
    /// Community id per node, in node order.
    pub communities: Vec<usize>,
    pub modularity: f64,
    pub community_count: usize,
    pub community_sizes: Vec<usize>,
    /// community id → node ids.
    pub community_nodes: BTreeMap<usize, Vec<String>>,
}

// ── Anomaly detection ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyDetectionMethod {
    #[default]
    Zscore,
    Iqr,
    Isolation,
    Dbscan,
    Autoencoder,
}

impl AnomalyDetectionMethod {
    /// Density-style methods are scored like z-score and then truncated to
    /// the contamination budget.
    pub fn is_density_style(self) -> bool {
        matches!(self, Self::Isolation | Self::Dbscan | Self::Autoencoder)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnomalyOptions {
    pub method: AnomalyDetectionMethod,
    pub threshold: f64,
    /// Expected anomalous fraction, caps density-style output.
    pub contamination: f64,
}

impl Default for AnomalyOptions {
    fn default() -> Self {
        Self {
            method: AnomalyDetectionMethod::Zscore,
            threshold: 3.0,
            contamination: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAnomaly {
    pub id: String,
    pub name: String,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkAnomaly {
    pub source: String,
    pub target: String,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyList {
    pub nodes: Vec<NodeAnomaly>,
    pub links: Vec<LinkAnomaly>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyMetrics {
    pub total_anomalies: usize,
    /// total_anomalies / (node_count + link_count)
    pub anomaly_ratio: f64,
    pub average_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub anomalies: AnomalyList,
    pub metrics: AnomalyMetrics,
}

// ── Predictive surface ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Linear,
    Polynomial,
    Rbf,
    Gaussian,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelOptions {
    pub model_type: ModelType,
    /// Polynomial degree.
    pub degree: u32,
    /// RBF / Gaussian kernel width.
    pub kernel_width: f64,
    /// Ridge penalty (not applied to the bias term).
    pub regularization: f64,
    /// Seed for the evaluation split. `None` draws from entropy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            model_type: ModelType::Linear,
            degree: 2,
            kernel_width: 1.0,
            regularization: 0.1,
            seed: None,
        }
    }
}

/// Acknowledgment returned by `create_model`. Describes the fitted model
/// without carrying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub model_type: ModelType,
    pub training_points: usize,
    pub parameter_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub r2: f64,
    pub mse: f64,
    pub mae: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fill_defaults_from_partial_json() {
        let opts: CommunityOptions = serde_json::from_str(r#"{"algorithm":"leiden"}"#).unwrap();
        assert_eq!(opts.algorithm, CommunityAlgorithm::Leiden);
        assert_eq!(opts.resolution, 1.0);
        assert_eq!(opts.random_seed, 42);

        let opts: AnomalyOptions = serde_json::from_str(r#"{"method":"iqr"}"#).unwrap();
        assert_eq!(opts.method, AnomalyDetectionMethod::Iqr);
        assert_eq!(opts.threshold, 3.0);
        assert_eq!(opts.contamination, 0.05);

        let opts: ModelOptions = serde_json::from_str(r#"{"modelType":"rbf"}"#).unwrap();
        assert_eq!(opts.model_type, ModelType::Rbf);
        assert_eq!(opts.degree, 2);
    }

    #[test]
    fn density_style_methods() {
        assert!(AnomalyDetectionMethod::Isolation.is_density_style());
        assert!(AnomalyDetectionMethod::Dbscan.is_density_style());
        assert!(AnomalyDetectionMethod::Autoencoder.is_density_style());
        assert!(!AnomalyDetectionMethod::Zscore.is_density_style());
        assert!(!AnomalyDetectionMethod::Iqr.is_density_style());
    }
}
