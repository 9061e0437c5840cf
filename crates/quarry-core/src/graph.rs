//! Input data shapes — graphs, flow diagrams, and scattered surface points.
//!
//! A `GraphData` doubles as a flow diagram: links are directed for flow
//! features and symmetrized for community detection.

use serde::{Deserialize, Serialize};

/// A node in a graph or flow diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Caller-assigned identifier. Empty means "use the node's index".
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Community assigned by community detection. Absent on input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community: Option<usize>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value: None,
            community: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// A weighted, directed link between two node indices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: usize,
    pub target: usize,
    pub value: f64,
}

impl GraphLink {
    pub fn new(source: usize, target: usize, value: f64) -> Self {
        Self {
            source,
            target,
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

impl GraphData {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Stable identifier for node `index`: its `id`, or the index itself.
    pub fn node_id(&self, index: usize) -> String {
        match self.nodes.get(index) {
            Some(node) if !node.id.is_empty() => node.id.clone(),
            _ => index.to_string(),
        }
    }

    /// Position of the first link whose endpoints are not valid node indices.
    pub fn first_invalid_link(&self) -> Option<usize> {
        let n = self.nodes.len();
        self.links
            .iter()
            .position(|l| l.source >= n || l.target >= n)
    }
}

/// A scattered 3-D observation. With `x` as the time axis it is also a
/// time-series sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceDataPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SurfaceDataPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}
