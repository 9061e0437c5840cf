//! Community detection — multi-level modularity optimization.
//!
//! Louvain: seeded local moving, then communities collapse into super-nodes
//! and local moving repeats on the aggregated graph until a level changes
//! nothing. Leiden: a Louvain run, then every community that is not
//! internally connected is split into its components and optimization
//! resumes from that refined partition.
//!
//! Every step is non-decreasing in modularity, so the result never scores
//! below the all-in-one partition and Leiden never scores below the Louvain
//! run it starts from.

use std::collections::{BTreeMap, VecDeque};

use quarry_core::analysis::{CommunityAlgorithm, CommunityOptions, CommunityStructure};
use quarry_core::graph::GraphData;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::EngineError;
use crate::preconditions::require_graph;
use crate::progress::Progress;

/// Local moving passes per level.
pub const MAX_PASSES: usize = 10;
/// Aggregation levels per optimization run.
pub const MAX_LEVELS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct CommunityDetection {
    /// Input graph with every node's `community` set.
    pub graph: GraphData,
    pub structure: CommunityStructure,
    /// Local moving passes taken at each level, across all runs.
    pub passes: Vec<usize>,
    /// False when some level stopped at `MAX_PASSES` while still moving.
    pub converged: bool,
}

pub fn detect_communities(
    graph: &GraphData,
    options: &CommunityOptions,
    progress: &mut dyn Progress,
) -> Result<CommunityDetection, EngineError> {
    require_graph(graph, "community detection")?;
    if !(options.resolution.is_finite() && options.resolution > 0.0) {
        return Err(EngineError::InvalidOption(format!(
            "resolution must be a positive number, got {}",
            options.resolution
        )));
    }
    progress.checkpoint(10.0)?;

    let weighted = WeightedGraph::from_links(graph);
    progress.checkpoint(30.0)?;

    let mut rng = ChaCha8Rng::seed_from_u64(options.random_seed);
    let mut trace = Trace::default();
    let singletons: Vec<usize> = (0..weighted.len()).collect();
    let mut assignment = match options.algorithm {
        CommunityAlgorithm::Louvain => optimize(
            &weighted,
            singletons,
            options.resolution,
            &mut rng,
            progress,
            Band::new(30.0, 70.0),
            &mut trace,
        )?,
        CommunityAlgorithm::Leiden => {
            let coarse = optimize(
                &weighted,
                singletons,
                options.resolution,
                &mut rng,
                progress,
                Band::new(30.0, 60.0),
                &mut trace,
            )?;
            let refined = weighted.split_disconnected(&coarse);
            optimize(
                &weighted,
                refined,
                options.resolution,
                &mut rng,
                progress,
                Band::new(60.0, 70.0),
                &mut trace,
            )?
        }
    };
    let count = renumber(&mut assignment);
    progress.checkpoint(70.0)?;

    let modularity = weighted.modularity(&assignment, count);
    let mut community_sizes = vec![0usize; count];
    let mut community_nodes: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (index, &community) in assignment.iter().enumerate() {
        community_sizes[community] += 1;
        community_nodes
            .entry(community)
            .or_default()
            .push(graph.node_id(index));
    }
    progress.checkpoint(80.0)?;

    let mut annotated = graph.clone();
    for (node, &community) in annotated.nodes.iter_mut().zip(&assignment) {
        node.community = Some(community);
    }
    progress.checkpoint(90.0)?;

    tracing::debug!(
        algorithm = ?options.algorithm,
        communities = count,
        modularity,
        levels = trace.passes.len(),
        "communities detected"
    );
    progress.checkpoint(100.0)?;

    Ok(CommunityDetection {
        graph: annotated,
        structure: CommunityStructure {
            communities: assignment,
            modularity,
            community_count: count,
            community_sizes,
            community_nodes,
        },
        passes: trace.passes,
        converged: trace.converged,
    })
}

// ── Weighted graph ────────────────────────────────────────────────────────────

/// Symmetric weighted graph over dense indices. Self-loops live apart from
/// the neighbor lists and count once toward the degree.
#[derive(Debug, Clone)]
struct WeightedGraph {
    neighbors: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
    degree: Vec<f64>,
    /// Half the sum of all adjacency entries.
    m: f64,
}

impl WeightedGraph {
    /// Links are symmetrized; a later duplicate of the same pair replaces
    /// the earlier one. Non-finite or non-positive weights count as 1.
    fn from_links(graph: &GraphData) -> Self {
        let mut rows: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); graph.node_count()];
        for link in &graph.links {
            let weight = if link.value.is_finite() && link.value > 0.0 {
                link.value
            } else {
                1.0
            };
            rows[link.source].insert(link.target, weight);
            rows[link.target].insert(link.source, weight);
        }
        Self::from_rows(rows)
    }

    fn from_rows(rows: Vec<BTreeMap<usize, f64>>) -> Self {
        let n = rows.len();
        let mut neighbors = Vec::with_capacity(n);
        let mut self_loops = vec![0.0; n];
        let mut degree = vec![0.0; n];
        let mut total = 0.0;
        for (i, row) in rows.into_iter().enumerate() {
            let mut list = Vec::with_capacity(row.len());
            for (j, w) in row {
                degree[i] += w;
                total += w;
                if j == i {
                    self_loops[i] = w;
                } else {
                    list.push((j, w));
                }
            }
            neighbors.push(list);
        }
        Self {
            neighbors,
            self_loops,
            degree,
            m: total / 2.0,
        }
    }

    fn len(&self) -> usize {
        self.degree.len()
    }

    /// Collapse each community into one node. Internal weight becomes the
    /// super-node's self-loop, so degrees and `m` carry over unchanged.
    fn aggregate(&self, partition: &[usize], count: usize) -> Self {
        let mut rows: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];
        for i in 0..self.len() {
            let ci = partition[i];
            if self.self_loops[i] != 0.0 {
                *rows[ci].entry(ci).or_insert(0.0) += self.self_loops[i];
            }
            for &(j, w) in &self.neighbors[i] {
                *rows[ci].entry(partition[j]).or_insert(0.0) += w;
            }
        }
        Self::from_rows(rows)
    }

    fn modularity(&self, partition: &[usize], count: usize) -> f64 {
        if self.m <= 0.0 {
            return 0.0;
        }
        let two_m = 2.0 * self.m;
        let mut internal = vec![0.0; count];
        let mut total = vec![0.0; count];
        for i in 0..self.len() {
            let c = partition[i];
            total[c] += self.degree[i];
            internal[c] += self.self_loops[i];
            for &(j, w) in &self.neighbors[i] {
                if partition[j] == c {
                    internal[c] += w;
                }
            }
        }
        internal
            .iter()
            .zip(&total)
            .map(|(&inside, &tot)| inside / two_m - (tot / two_m).powi(2))
            .sum()
    }

    /// One level of local moving. `partition` holds dense ids below
    /// `self.len()` and is updated in place. Returns the passes taken and
    /// whether the last pass moved nothing.
    fn local_moving(
        &self,
        partition: &mut [usize],
        resolution: f64,
        rng: &mut ChaCha8Rng,
        progress: &mut dyn Progress,
        band: Band,
        level: usize,
    ) -> Result<(usize, bool), EngineError> {
        let n = self.len();
        if self.m <= 0.0 {
            return Ok((0, true));
        }
        let two_m = 2.0 * self.m;

        let mut tot = vec![0.0; n];
        for i in 0..n {
            tot[partition[i]] += self.degree[i];
        }
        let mut order: Vec<usize> = (0..n).collect();
        let mut weight_to = vec![0.0; n];
        let mut seen = vec![false; n];
        let mut touched: Vec<usize> = Vec::new();

        for pass in 0..MAX_PASSES {
            order.shuffle(rng);
            let mut moves = 0usize;
            for &i in &order {
                let current = partition[i];
                let k_i = self.degree[i];

                touched.clear();
                for &(j, w) in &self.neighbors[i] {
                    let c = partition[j];
                    if !seen[c] {
                        seen[c] = true;
                        touched.push(c);
                    }
                    weight_to[c] += w;
                }

                tot[current] -= k_i;
                let gain = |c: usize| (weight_to[c] - resolution * tot[c] * k_i / two_m) / self.m;
                let mut best = current;
                let mut best_gain = gain(current).max(0.0);
                for &c in &touched {
                    if c == current {
                        continue;
                    }
                    let g = gain(c);
                    if g > best_gain {
                        best = c;
                        best_gain = g;
                    }
                }
                tot[best] += k_i;
                if best != current {
                    partition[i] = best;
                    moves += 1;
                }

                for &c in &touched {
                    weight_to[c] = 0.0;
                    seen[c] = false;
                }
            }

            progress.step(band.at(level, pass + 1))?;
            if moves == 0 {
                return Ok((pass + 1, true));
            }
        }
        Ok((MAX_PASSES, false))
    }

    /// Split every community into its connected components. Ids come back
    /// dense, in first-seen node order.
    fn split_disconnected(&self, partition: &[usize]) -> Vec<usize> {
        let n = self.len();
        let mut refined = vec![usize::MAX; n];
        let mut next = 0;
        let mut queue = VecDeque::new();
        for start in 0..n {
            if refined[start] != usize::MAX {
                continue;
            }
            refined[start] = next;
            queue.push_back(start);
            while let Some(i) = queue.pop_front() {
                for &(j, _) in &self.neighbors[i] {
                    if refined[j] == usize::MAX && partition[j] == partition[start] {
                        refined[j] = next;
                        queue.push_back(j);
                    }
                }
            }
            next += 1;
        }
        refined
    }
}

// ── Multi-level driver ────────────────────────────────────────────────────────

#[derive(Debug)]
struct Trace {
    passes: Vec<usize>,
    converged: bool,
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            passes: Vec::new(),
            converged: true,
        }
    }
}

/// Progress range for one optimization run. Level 0 passes fill the first
/// three quarters; later levels creep toward the top without reaching it.
#[derive(Debug, Clone, Copy)]
struct Band {
    lo: f64,
    hi: f64,
}

impl Band {
    fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    fn at(self, level: usize, pass: usize) -> f64 {
        let mid = self.lo + 0.75 * (self.hi - self.lo);
        if level == 0 {
            self.lo + (mid - self.lo) * pass as f64 / MAX_PASSES as f64
        } else {
            mid + (self.hi - mid) * (1.0 - 0.5f64.powi(level as i32))
        }
    }
}

/// Optimize from `initial` (dense ids over the nodes of `graph`), returning
/// a community id per node.
fn optimize(
    graph: &WeightedGraph,
    initial: Vec<usize>,
    resolution: f64,
    rng: &mut ChaCha8Rng,
    progress: &mut dyn Progress,
    band: Band,
    trace: &mut Trace,
) -> Result<Vec<usize>, EngineError> {
    let mut assignment: Vec<usize> = (0..graph.len()).collect();
    let mut partition = initial;
    let mut aggregated: Option<WeightedGraph> = None;

    for level in 0..MAX_LEVELS {
        let current = aggregated.as_ref().unwrap_or(graph);
        let (passes, settled) =
            current.local_moving(&mut partition, resolution, rng, progress, band, level)?;
        trace.passes.push(passes);
        trace.converged &= settled;

        let count = renumber(&mut partition);
        for community in assignment.iter_mut() {
            *community = partition[*community];
        }
        tracing::trace!(level, passes, communities = count, "level optimized");

        if count == current.len() {
            break;
        }
        let next = current.aggregate(&partition, count);
        aggregated = Some(next);
        partition = (0..count).collect();
    }
    Ok(assignment)
}

/// Renumber ids densely to `0..k` in first-seen order. Ids must be below
/// `partition.len()`. Returns `k`.
fn renumber(partition: &mut [usize]) -> usize {
    let mut mapping = vec![usize::MAX; partition.len()];
    let mut next = 0;
    for id in partition.iter_mut() {
        if mapping[*id] == usize::MAX {
            mapping[*id] = next;
            next += 1;
        }
        *id = mapping[*id];
    }
    next
}
