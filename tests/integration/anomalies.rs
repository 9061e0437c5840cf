use quarry_core::analysis::{AnomalyDetectionMethod, AnomalyOptions};
use quarry_core::protocol::{HostEvent, Task};
use quarry_services::TaskOutcome;

use crate::*;

/// 12-node ring where node 0 pushes 50x the flow of the others.
fn heavy_outflow_ring() -> quarry_core::graph::GraphData {
    let links: Vec<_> = (0..12)
        .map(|i| (i, (i + 1) % 12, if i == 0 { 500.0 } else { 10.0 }))
        .collect();
    graph(12, &links)
}

#[tokio::test]
async fn heavy_outflow_node_is_reported() {
    let coordinator = coordinator(2);
    let handle = coordinator
        .dispatch(Task::DetectAnomalies {
            payload: heavy_outflow_ring(),
            options: AnomalyOptions::default(),
        })
        .unwrap();
    let (progress, outcome) = handle.collect().await;

    assert_eq!(progress, vec![10.0, 30.0, 50.0, 70.0, 90.0, 100.0]);
    let result = match outcome {
        TaskOutcome::Completed(HostEvent::AnomaliesDetected { result }) => result,
        other => panic!("unexpected outcome: {other:?}"),
    };
    let node = result
        .anomalies
        .nodes
        .iter()
        .find(|a| a.id == "n0")
        .expect("node 0 flagged");
    assert!(node.reason.contains("outFlow"), "{}", node.reason);

    let total = result.anomalies.nodes.len() + result.anomalies.links.len();
    assert_eq!(result.metrics.total_anomalies, total);
    assert!((result.metrics.anomaly_ratio - total as f64 / 24.0).abs() < 1e-12);
}

#[tokio::test]
async fn density_methods_respect_contamination() {
    let coordinator = coordinator(2);
    let handle = coordinator
        .dispatch(Task::DetectAnomalies {
            payload: heavy_outflow_ring(),
            options: AnomalyOptions {
                method: AnomalyDetectionMethod::Isolation,
                threshold: 1.0,
                contamination: 0.1,
            },
        })
        .unwrap();
    match handle.outcome().await {
        TaskOutcome::Completed(HostEvent::AnomaliesDetected { result }) => {
            // ceil(12 * 0.1) = 2 per list at most.
            assert!(result.anomalies.nodes.len() <= 2);
            assert!(result.anomalies.links.len() <= 2);
            assert!(!result.anomalies.nodes.is_empty());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn invalid_link_index_is_an_error() {
    let coordinator = coordinator(2);
    let handle = coordinator
        .dispatch(Task::DetectAnomalies {
            payload: graph(3, &[(0, 1, 1.0), (1, 2, 1.0), (2, 9, 1.0)]),
            options: AnomalyOptions::default(),
        })
        .unwrap();
    let (progress, outcome) = handle.collect().await;
    assert!(progress.is_empty());
    match outcome {
        TaskOutcome::Failed(message) => assert!(message.contains("node 9"), "{message}"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}
