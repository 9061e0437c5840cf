//! Feature extraction — numeric vectors per node and per link of a flow graph.
//!
//! Links are treated as directed here: in-flow and out-flow are kept apart.
//! Callers must have validated link indices (see `preconditions`).

use quarry_core::graph::GraphData;

pub const NODE_FEATURES: [&str; 7] = [
    "inDegree",
    "outDegree",
    "inFlow",
    "outFlow",
    "flowRatio",
    "centrality",
    "value",
];

pub const LINK_FEATURES: [&str; 3] = ["value", "sourceRatio", "targetRatio"];

#[derive(Debug, Clone, PartialEq)]
pub struct NodeFeatures {
    pub id: String,
    pub name: String,
    pub in_degree: f64,
    pub out_degree: f64,
    pub in_flow: f64,
    pub out_flow: f64,
    /// in_flow / out_flow; infinite when only in-flow exists, 1 when neither.
    pub flow_ratio: f64,
    pub centrality: f64,
    pub value: f64,
}

impl NodeFeatures {
    /// Values in `NODE_FEATURES` order.
    pub fn vector(&self) -> [f64; 7] {
        [
            self.in_degree,
            self.out_degree,
            self.in_flow,
            self.out_flow,
            self.flow_ratio,
            self.centrality,
            self.value,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkFeatures {
    pub source: String,
    pub source_name: String,
    pub target: String,
    pub target_name: String,
    pub value: f64,
    /// Share of the source's total out-flow carried by this link.
    pub source_ratio: f64,
    /// Share of the target's total in-flow carried by this link.
    pub target_ratio: f64,
}

impl LinkFeatures {
    /// Values in `LINK_FEATURES` order.
    pub fn vector(&self) -> [f64; 3] {
        [self.value, self.source_ratio, self.target_ratio]
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    in_degree: usize,
    out_degree: usize,
    in_flow: f64,
    out_flow: f64,
}

fn tally(graph: &GraphData) -> Vec<Tally> {
    let mut tallies = vec![Tally::default(); graph.node_count()];
    for link in &graph.links {
        tallies[link.source].out_degree += 1;
        tallies[link.source].out_flow += link.value;
        tallies[link.target].in_degree += 1;
        tallies[link.target].in_flow += link.value;
    }
    tallies
}

pub fn extract_node_features(graph: &GraphData) -> Vec<NodeFeatures> {
    let n = graph.node_count();
    tally(graph)
        .into_iter()
        .enumerate()
        .map(|(index, t)| {
            let node = &graph.nodes[index];
            let flow_ratio = if t.out_flow > 0.0 {
                t.in_flow / t.out_flow
            } else if t.in_flow > 0.0 {
                f64::INFINITY
            } else {
                1.0
            };
            NodeFeatures {
                id: graph.node_id(index),
                name: node.name.clone(),
                in_degree: t.in_degree as f64,
                out_degree: t.out_degree as f64,
                in_flow: t.in_flow,
                out_flow: t.out_flow,
                flow_ratio,
                centrality: (t.in_degree + t.out_degree) as f64 / (2 * n) as f64,
                value: node.value.unwrap_or(0.0),
            }
        })
        .collect()
}

pub fn extract_link_features(graph: &GraphData) -> Vec<LinkFeatures> {
    let tallies = tally(graph);
    graph
        .links
        .iter()
        .map(|link| {
            let out_total = tallies[link.source].out_flow;
            let in_total = tallies[link.target].in_flow;
            LinkFeatures {
                source: graph.node_id(link.source),
                source_name: graph.nodes[link.source].name.clone(),
                target: graph.node_id(link.target),
                target_name: graph.nodes[link.target].name.clone(),
                value: link.value,
                source_ratio: if out_total > 0.0 {
                    link.value / out_total
                } else {
                    0.0
                },
                target_ratio: if in_total > 0.0 {
                    link.value / in_total
                } else {
                    0.0
                },
            }
        })
        .collect()
}
