use extract::EntityType;
use graph::{EntityId, GraphSnapshot, UndirectedView};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CentralityAlgorithm {
    #[default]
    Degree,
    Betweenness,
    Closeness,
}

impl CentralityAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            CentralityAlgorithm::Degree => "degree",
            CentralityAlgorithm::Betweenness => "betweenness",
            CentralityAlgorithm::Closeness => "closeness",
        }
    }
}

impl fmt::Display for CentralityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CentralityAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "degree" => Ok(CentralityAlgorithm::Degree),
            "betweenness" => Ok(CentralityAlgorithm::Betweenness),
            "closeness" => Ok(CentralityAlgorithm::Closeness),
            other => Err(format!("unknown centrality algorithm '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntity {
    pub entity_id: EntityId,
    pub name: String,
    pub entity_type: EntityType,
    pub score: f64,
    pub mention_count: u64,
}

/// Top `top_n` entities by centrality; ties go to more mentions, then smaller id.
pub fn rank_by_centrality(
    snapshot: &GraphSnapshot,
    top_n: usize,
    algorithm: CentralityAlgorithm,
) -> Vec<RankedEntity> {
    let view = snapshot.undirected_view();
    let scores = match algorithm {
        CentralityAlgorithm::Degree => degree(&view),
        CentralityAlgorithm::Betweenness => betweenness(&view),
        CentralityAlgorithm::Closeness => closeness(&view),
    };

    let mut ranked: Vec<RankedEntity> = view
        .ids
        .iter()
        .zip(scores)
        .filter_map(|(&id, score)| {
            let entity = snapshot.entity(id)?;
            Some(RankedEntity {
                entity_id: id,
                name: entity.canonical_name.clone(),
                entity_type: entity.entity_type,
                score,
                mention_count: entity.mention_count,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.mention_count.cmp(&a.mention_count))
            .then(a.entity_id.cmp(&b.entity_id))
    });
    ranked.truncate(top_n);
    ranked
}

/// Distinct neighbours over `n - 1`.
pub fn degree(view: &UndirectedView<'_>) -> Vec<f64> {
    let n = view.len();
    if n <= 1 {
        return vec![0.0; n];
    }
    let scale = (n - 1) as f64;
    view.neighbors.iter().map(|hops| hops.len() as f64 / scale).collect()
}

/// Brandes' algorithm on the unweighted projection, as a fraction of the
/// `(n - 1)(n - 2)` ordered pairs that could route through each node.
pub fn betweenness(view: &UndirectedView<'_>) -> Vec<f64> {
    let n = view.len();
    let mut centrality = vec![0.0; n];
    if n <= 2 {
        return centrality;
    }

    for s in 0..n {
        let mut stack = Vec::with_capacity(n);
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0_f64; n];
        let mut dist: Vec<Option<usize>> = vec![None; n];
        sigma[s] = 1.0;
        dist[s] = Some(0);

        let mut queue = VecDeque::from([s]);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            let Some(dv) = dist[v] else { continue };
            for hop in &view.neighbors[v] {
                let w = hop.node;
                if dist[w].is_none() {
                    dist[w] = Some(dv + 1);
                    queue.push_back(w);
                }
                if dist[w] == Some(dv + 1) {
                    sigma[w] += sigma[v];
                    predecessors[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0_f64; n];
        while let Some(w) = stack.pop() {
            for &v in &predecessors[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                centrality[w] += delta[w];
            }
        }
    }

    let scale = ((n - 1) * (n - 2)) as f64;
    centrality.iter().map(|c| c / scale).collect()
}

/// Wasserman-Faust closeness, scaled by the reachable share of the graph.
pub fn closeness(view: &UndirectedView<'_>) -> Vec<f64> {
    let n = view.len();
    if n <= 1 {
        return vec![0.0; n];
    }

    (0..n)
        .map(|source| {
            let mut dist: Vec<Option<usize>> = vec![None; n];
            dist[source] = Some(0);
            let mut queue = VecDeque::from([source]);
            let mut reachable = 0usize;
            let mut total = 0usize;

            while let Some(v) = queue.pop_front() {
                let dv = dist[v].unwrap_or(0);
                reachable += 1;
                total += dv;
                for hop in &view.neighbors[v] {
                    if dist[hop.node].is_none() {
                        dist[hop.node] = Some(dv + 1);
                        queue.push_back(hop.node);
                    }
                }
            }

            if total == 0 {
                return 0.0;
            }
            let others = (reachable - 1) as f64;
            (others / total as f64) * (others / (n - 1) as f64)
        })
        .collect()
}
