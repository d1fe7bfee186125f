//! Connection finding over the undirected projection.

use extract::RelationshipType;
use graph::{EntityId, GraphSnapshot, RelationshipId, UndirectedView};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStep {
    pub from: EntityId,
    pub to: EntityId,
    pub relationship_id: RelationshipId,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    /// Whether the stored relationship points from `from` to `to`.
    pub forward: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Path {
    pub nodes: Vec<EntityId>,
    pub hops: Vec<PathStep>,
    /// Lowest hop confidence; `None` for the zero-hop path.
    pub weakest_link: Option<f64>,
}

impl Path {
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    fn reversed(mut self) -> Self {
        self.nodes.reverse();
        self.hops.reverse();
        for hop in &mut self.hops {
            std::mem::swap(&mut hop.from, &mut hop.to);
            hop.forward = !hop.forward;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "path", rename_all = "snake_case")]
pub enum PathResult {
    Found(Path),
    NoPath,
}

/// Fewest-hop path between two entities, ignoring edge direction.
///
/// Among equally short paths the one with the strongest weakest hop wins,
/// then the lexicographically smallest id sequence. The search always runs
/// from the smaller id to the larger, so `a -> b` is exactly the reverse of
/// `b -> a`.
pub fn shortest_path(snapshot: &GraphSnapshot, a: EntityId, b: EntityId) -> PathResult {
    let view = snapshot.undirected_view();
    let (Some(ia), Some(ib)) = (view.index_of(a), view.index_of(b)) else {
        return PathResult::NoPath;
    };

    let (source, target) = (ia.min(ib), ia.max(ib));
    let Some(sequence) = best_sequence(&view, source, target) else {
        return PathResult::NoPath;
    };

    let path = build_path(&view, &sequence);
    PathResult::Found(if ia > ib { path.reversed() } else { path })
}

fn best_sequence(view: &UndirectedView<'_>, source: usize, target: usize) -> Option<Vec<usize>> {
    if source == target {
        return Some(vec![source]);
    }

    let (dist, order) = bfs(view, source);
    let goal = dist[target]?;
    let next_layer = |u: usize, v: usize| matches!((dist[u], dist[v]), (Some(du), Some(dv)) if dv == du + 1);

    // Best achievable weakest link from the source to every node
    let mut weakest = vec![f64::NEG_INFINITY; view.len()];
    weakest[source] = f64::INFINITY;
    for &u in &order {
        if dist[u].is_some_and(|d| d >= goal) {
            break;
        }
        for hop in &view.neighbors[u] {
            if next_layer(u, hop.node) {
                let through = weakest[u].min(hop.relationship.confidence);
                weakest[hop.node] = weakest[hop.node].max(through);
            }
        }
    }
    let bottleneck = weakest[target];

    // Nodes that still reach the target using only hops at or above it
    let mut reaches = vec![false; view.len()];
    reaches[target] = true;
    for &u in order.iter().rev() {
        if dist[u].is_some_and(|d| d < goal) {
            let onward = view.neighbors[u].iter().any(|hop| {
                next_layer(u, hop.node) && hop.relationship.confidence >= bottleneck && reaches[hop.node]
            });
            reaches[u] = onward;
        }
    }

    // Neighbour lists are sorted, so the first admissible hop is the smallest id
    let mut sequence = vec![source];
    let mut current = source;
    while current != target {
        let from = current;
        current = view.neighbors[from]
            .iter()
            .find(|hop| {
                next_layer(from, hop.node)
                    && hop.relationship.confidence >= bottleneck
                    && reaches[hop.node]
            })?
            .node;
        sequence.push(current);
    }
    Some(sequence)
}

/// Hop distances from `source` and the visiting order (non-decreasing distance).
fn bfs(view: &UndirectedView<'_>, source: usize) -> (Vec<Option<usize>>, Vec<usize>) {
    let mut dist = vec![None; view.len()];
    let mut order = Vec::new();
    let mut queue = VecDeque::from([source]);
    dist[source] = Some(0);

    while let Some(u) = queue.pop_front() {
        order.push(u);
        let next = dist[u].map_or(0, |d| d + 1);
        for hop in &view.neighbors[u] {
            if dist[hop.node].is_none() {
                dist[hop.node] = Some(next);
                queue.push_back(hop.node);
            }
        }
    }
    (dist, order)
}

fn build_path(view: &UndirectedView<'_>, sequence: &[usize]) -> Path {
    let hops: Vec<PathStep> = sequence
        .windows(2)
        .filter_map(|pair| {
            let (u, v) = (pair[0], pair[1]);
            let hop = view.neighbors[u].iter().find(|hop| hop.node == v)?;
            let relationship = hop.relationship;
            Some(PathStep {
                from: view.ids[u],
                to: view.ids[v],
                relationship_id: relationship.id,
                relationship_type: relationship.relationship_type.clone(),
                confidence: relationship.confidence,
                forward: relationship.source_id == view.ids[u],
            })
        })
        .collect();

    let weakest_link = hops.iter().map(|hop| hop.confidence).reduce(f64::min);
    Path {
        nodes: sequence.iter().map(|&i| view.ids[i]).collect(),
        hops,
        weakest_link,
    }
}

/// Every entity within `depth` undirected hops of `start`, excluding it.
pub fn neighborhood(snapshot: &GraphSnapshot, start: EntityId, depth: usize) -> Vec<EntityId> {
    let view = snapshot.undirected_view();
    let Some(origin) = view.index_of(start) else {
        return Vec::new();
    };

    let (dist, _) = bfs(&view, origin);
    dist.iter()
        .enumerate()
        .filter(|&(i, d)| i != origin && d.is_some_and(|d| d <= depth))
        .map(|(i, _)| view.ids[i])
        .collect()
}
