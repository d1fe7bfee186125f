use std::collections::BTreeMap;

use crate::graph_export::GraphData;

/// Gains closer to zero than this count as ties.
const GAIN_EPSILON: f64 = 1e-12;

/// Clauset-Newman-Moore greedy agglomeration.
///
/// This is a local-search heuristic: each step takes the single best merge,
/// and the final partition carries no global optimality guarantee.
pub struct GreedyModularity {
    graph: GraphData,
}

impl GreedyModularity {
    pub fn new(graph: GraphData) -> Self {
        Self { graph }
    }

    /// Returns node index -> community slot (the slot is the index of the
    /// community's surviving seed node, not yet a final label).
    pub fn detect_communities(&self) -> Vec<usize> {
        let n = self.graph.entities.len();
        let mut community: Vec<usize> = (0..n).collect();
        let m = self.graph.edges.len() as f64;
        if m == 0.0 {
            return community;
        }

        // Edge counts between live communities, and total degree per community
        let mut links: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
        let mut total: Vec<f64> = vec![0.0; n];
        for &(source, target) in &self.graph.edges {
            *links[source].entry(target).or_insert(0.0) += 1.0;
            *links[target].entry(source).or_insert(0.0) += 1.0;
            total[source] += 1.0;
            total[target] += 1.0;
        }
        // Smallest member per community; node indices follow entity id order
        let mut lowest: Vec<usize> = (0..n).collect();
        let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

        let mut merges = 0;
        loop {
            let mut best: Option<(f64, (usize, usize), usize, usize)> = None;
            for (i, neighbors) in links.iter().enumerate() {
                for (&j, &e_ij) in neighbors.range(i + 1..) {
                    let gain = e_ij / m - total[i] * total[j] / (2.0 * m * m);
                    let key = if lowest[i] <= lowest[j] {
                        (lowest[i], lowest[j])
                    } else {
                        (lowest[j], lowest[i])
                    };
                    let better = match best {
                        None => true,
                        Some((best_gain, best_key, _, _)) => {
                            gain > best_gain + GAIN_EPSILON
                                || ((gain - best_gain).abs() <= GAIN_EPSILON && key < best_key)
                        }
                    };
                    if better {
                        best = Some((gain, key, i, j));
                    }
                }
            }

            let Some((gain, _, keep, absorb)) = best else {
                break;
            };
            if gain <= GAIN_EPSILON {
                break;
            }

            // Fold `absorb` into `keep`
            let absorbed_links = std::mem::take(&mut links[absorb]);
            for (other, weight) in absorbed_links {
                if other == keep {
                    continue;
                }
                links[other].remove(&absorb);
                *links[other].entry(keep).or_insert(0.0) += weight;
                *links[keep].entry(other).or_insert(0.0) += weight;
            }
            links[keep].remove(&absorb);
            total[keep] += total[absorb];
            total[absorb] = 0.0;
            lowest[keep] = lowest[keep].min(lowest[absorb]);

            let moved = std::mem::take(&mut members[absorb]);
            for &node in &moved {
                community[node] = keep;
            }
            members[keep].extend(moved);
            merges += 1;
        }

        tracing::debug!(merges, nodes = n, "Greedy modularity finished");
        community
    }

    /// Newman modularity of a partition over the unit-weight projection.
    pub fn modularity(&self, community: &[usize]) -> f64 {
        let m = self.graph.edges.len() as f64;
        if m == 0.0 {
            return 0.0;
        }

        let mut internal: BTreeMap<usize, f64> = BTreeMap::new();
        let mut degree: BTreeMap<usize, f64> = BTreeMap::new();
        for &(source, target) in &self.graph.edges {
            if community[source] == community[target] {
                *internal.entry(community[source]).or_insert(0.0) += 1.0;
            }
            *degree.entry(community[source]).or_insert(0.0) += 1.0;
            *degree.entry(community[target]).or_insert(0.0) += 1.0;
        }

        degree
            .iter()
            .map(|(c, d)| internal.get(c).copied().unwrap_or(0.0) / m - (d / (2.0 * m)).powi(2))
            .sum()
    }
}
