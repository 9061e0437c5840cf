//! Quarry integration test harness.
//!
//! Every test drives a real `HostCoordinator` in-process: requests are
//! serialized, run on blocking execution hosts, and their messages routed
//! back by request id, exactly as the daemon does it.

use quarry_core::config::EngineConfig;
use quarry_core::graph::{GraphData, GraphLink, GraphNode, SurfaceDataPoint};
use quarry_services::HostCoordinator;

mod anomalies;
mod communities;
mod lifecycle;
mod surface;

// ── Harness ───────────────────────────────────────────────────────────────────

pub fn coordinator(max_concurrent_tasks: u32) -> HostCoordinator {
    HostCoordinator::new(EngineConfig {
        max_concurrent_tasks,
        ..Default::default()
    })
}

/// Graph with `n` nodes named `n{i}` / `Node {i}` and the given weighted links.
pub fn graph(n: usize, links: &[(usize, usize, f64)]) -> GraphData {
    GraphData {
        nodes: (0..n)
            .map(|i| GraphNode::new(format!("n{i}"), format!("Node {i}")))
            .collect(),
        links: links
            .iter()
            .map(|&(s, t, v)| GraphLink::new(s, t, v))
            .collect(),
    }
}

/// Directed ring of `n` nodes, every link weight 1.
pub fn ring(n: usize) -> GraphData {
    let links: Vec<_> = (0..n).map(|i| (i, (i + 1) % n, 1.0)).collect();
    graph(n, &links)
}

/// Points on `z = 2x - y + 1` over a 5x4 grid.
pub fn plane_points() -> Vec<SurfaceDataPoint> {
    let mut points = Vec::new();
    for i in 0..5 {
        for j in 0..4 {
            let (x, y) = (i as f64, j as f64);
            points.push(SurfaceDataPoint::new(x, y, 2.0 * x - y + 1.0));
        }
    }
    points
}

pub fn assert_monotone(progress: &[f64]) {
    assert!(
        progress.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {progress:?}"
    );
    assert!(progress.iter().all(|p| (0.0..=100.0).contains(p)));
}
