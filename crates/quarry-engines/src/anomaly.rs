//! Anomaly detection over node and link features.
//!
//! Each entity is scored by its most extreme feature. Density-style methods
//! share the z-score scorer and are then capped at the contamination budget.

use quarry_core::analysis::{
    AnomalyDetectionMethod, AnomalyList, AnomalyMetrics, AnomalyOptions, AnomalyResult,
    LinkAnomaly, NodeAnomaly,
};
use quarry_core::graph::GraphData;

use crate::error::EngineError;
use crate::features::{extract_link_features, extract_node_features, LINK_FEATURES, NODE_FEATURES};
use crate::preconditions::require_graph;
use crate::progress::Progress;

pub fn detect_anomalies(
    graph: &GraphData,
    options: &AnomalyOptions,
    progress: &mut dyn Progress,
) -> Result<AnomalyResult, EngineError> {
    require_graph(graph, "anomaly detection")?;
    if !(options.threshold.is_finite() && options.threshold >= 0.0) {
        return Err(EngineError::InvalidOption(format!(
            "threshold must be a non-negative number, got {}",
            options.threshold
        )));
    }
    if !(0.0..=1.0).contains(&options.contamination) {
        return Err(EngineError::InvalidOption(format!(
            "contamination must lie in [0, 1], got {}",
            options.contamination
        )));
    }
    progress.checkpoint(10.0)?;

    let node_features = extract_node_features(graph);
    progress.checkpoint(30.0)?;
    let link_features = extract_link_features(graph);
    progress.checkpoint(50.0)?;

    let node_rows: Vec<[f64; 7]> = node_features.iter().map(|f| f.vector()).collect();
    let link_rows: Vec<[f64; 3]> = link_features.iter().map(|f| f.vector()).collect();
    let mut node_findings = score(&node_rows, &NODE_FEATURES, options);
    let mut link_findings = score(&link_rows, &LINK_FEATURES, options);
    progress.checkpoint(70.0)?;

    if options.method.is_density_style() {
        cap(&mut node_findings, node_rows.len(), options.contamination);
        cap(&mut link_findings, link_rows.len(), options.contamination);
    }
    let measure = match options.method {
        AnomalyDetectionMethod::Iqr => "times IQR from quartiles",
        _ => "standard deviations from mean",
    };
    let nodes: Vec<NodeAnomaly> = node_findings
        .into_iter()
        .map(|f| {
            let node = &node_features[f.row];
            NodeAnomaly {
                id: node.id.clone(),
                name: node.name.clone(),
                score: f.score,
                reason: format!("Unusual {} ({:.2} {measure})", f.feature, f.score),
            }
        })
        .collect();
    let links: Vec<LinkAnomaly> = link_findings
        .into_iter()
        .map(|f| {
            let link = &link_features[f.row];
            LinkAnomaly {
                source: link.source.clone(),
                target: link.target.clone(),
                score: f.score,
                reason: format!(
                    "Unusual {} from {} to {} ({:.2} {measure})",
                    f.feature, link.source_name, link.target_name, f.score
                ),
            }
        })
        .collect();
    progress.checkpoint(90.0)?;

    let total = nodes.len() + links.len();
    let score_sum: f64 = nodes.iter().map(|a| a.score).chain(links.iter().map(|a| a.score)).sum();
    let metrics = AnomalyMetrics {
        total_anomalies: total,
        anomaly_ratio: total as f64 / (graph.node_count() + graph.link_count()) as f64,
        average_score: if total == 0 { 0.0 } else { score_sum / total as f64 },
    };
    tracing::debug!(
        method = ?options.method,
        node_anomalies = nodes.len(),
        link_anomalies = links.len(),
        "anomalies detected"
    );
    progress.checkpoint(100.0)?;

    Ok(AnomalyResult {
        anomalies: AnomalyList { nodes, links },
        metrics,
    })
}

/// One retained entity: its row, score, and the feature that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Finding {
    row: usize,
    score: f64,
    feature: &'static str,
}

fn score<const N: usize>(
    rows: &[[f64; N]],
    names: &[&'static str; N],
    options: &AnomalyOptions,
) -> Vec<Finding> {
    match options.method {
        AnomalyDetectionMethod::Iqr => iqr_findings(rows, names, options.threshold),
        _ => zscore_findings(rows, names, options.threshold),
    }
}

/// Finite values of column `col`.
fn column<const N: usize>(rows: &[[f64; N]], col: usize) -> Vec<f64> {
    rows.iter()
        .map(|r| r[col])
        .filter(|v| v.is_finite())
        .collect()
}

/// Mean and population standard deviation.
fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Keep rows whose largest |z| exceeds `threshold`. Features with zero
/// spread are ignored.
fn zscore_findings<const N: usize>(
    rows: &[[f64; N]],
    names: &[&'static str; N],
    threshold: f64,
) -> Vec<Finding> {
    let stats: Vec<Option<(f64, f64)>> = (0..N)
        .map(|col| mean_std(&column(rows, col)).filter(|&(_, std)| std > 0.0))
        .collect();
    best_per_row(rows, names, |col, value| {
        stats[col].map(|(mean, std)| ((value - mean) / std).abs())
    })
    .filter(|f| f.score > threshold)
    .collect()
}

/// Keep rows outside `[Q1 - t*IQR, Q3 + t*IQR]` on some feature, scored by
/// the distance past the violated bound in IQR units.
fn iqr_findings<const N: usize>(
    rows: &[[f64; N]],
    names: &[&'static str; N],
    threshold: f64,
) -> Vec<Finding> {
    let bounds: Vec<Option<(f64, f64, f64)>> = (0..N)
        .map(|col| {
            let mut values = column(rows, col);
            if values.is_empty() {
                return None;
            }
            values.sort_by(f64::total_cmp);
            let n = values.len();
            let q1 = values[n / 4];
            let q3 = values[(3 * n) / 4];
            let iqr = q3 - q1;
            (iqr > 0.0).then(|| (q1 - threshold * iqr, q3 + threshold * iqr, iqr))
        })
        .collect();
    best_per_row(rows, names, |col, value| {
        bounds[col].map(|(lower, upper, iqr)| {
            if value < lower {
                (lower - value) / iqr
            } else if value > upper {
                (value - upper) / iqr
            } else {
                0.0
            }
        })
    })
    .filter(|f| f.score > 0.0)
    .collect()
}

/// Highest per-feature score of each row. Earlier features win ties;
/// non-finite entity values are skipped.
fn best_per_row<'a, const N: usize>(
    rows: &'a [[f64; N]],
    names: &'a [&'static str; N],
    feature_score: impl Fn(usize, f64) -> Option<f64> + 'a,
) -> impl Iterator<Item = Finding> + 'a {
    rows.iter().enumerate().map(move |(row, values)| {
        let mut best = Finding {
            row,
            score: 0.0,
            feature: "",
        };
        for (col, &value) in values.iter().enumerate() {
            if !value.is_finite() {
                continue;
            }
            if let Some(s) = feature_score(col, value) {
                if s > best.score {
                    best.score = s;
                    best.feature = names[col];
                }
            }
        }
        best
    })
}

/// Highest scores first, at most `max(1, ceil(count * contamination))`.
fn cap(findings: &mut Vec<Finding>, count: usize, contamination: f64) {
    let limit = ((count as f64 * contamination).ceil() as usize).max(1);
    findings.sort_by(|a, b| b.score.total_cmp(&a.score));
    findings.truncate(limit);
}
