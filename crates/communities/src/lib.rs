pub mod graph_export;
pub mod modularity;

pub use graph_export::{GraphData, GraphExporter};
pub use modularity::GreedyModularity;

use graph::{EntityId, GraphSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub label: usize,
    pub members: Vec<EntityId>,
}

/// A full partition of the snapshot's entities.
///
/// Labels count up from 0 in decreasing cluster size, equal sizes ordered by
/// their smallest member id. The partition comes from a greedy heuristic and
/// is not a canonical ground truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Communities {
    pub assignments: BTreeMap<EntityId, usize>,
    pub clusters: Vec<Cluster>,
    pub modularity: f64,
}

impl Communities {
    pub fn cluster_of(&self, id: EntityId) -> Option<&Cluster> {
        self.assignments
            .get(&id)
            .and_then(|&label| self.clusters.get(label))
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommunityDetector;

impl CommunityDetector {
    pub fn new() -> Self {
        Self
    }

    /// Export the snapshot, cluster it and number the clusters.
    pub fn detect(&self, snapshot: &GraphSnapshot) -> Communities {
        let graph_data = GraphExporter::export_graph(snapshot);
        let detector = GreedyModularity::new(graph_data.clone());
        let community = detector.detect_communities();
        let modularity = detector.modularity(&community);

        let mut groups: BTreeMap<usize, Vec<EntityId>> = BTreeMap::new();
        for (idx, entity_id) in graph_data.entities.iter().enumerate() {
            groups.entry(community[idx]).or_default().push(*entity_id);
        }

        let mut members: Vec<Vec<EntityId>> = groups.into_values().collect();
        for group in &mut members {
            group.sort();
        }
        members.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

        let clusters: Vec<Cluster> = members
            .into_iter()
            .enumerate()
            .map(|(label, members)| Cluster { label, members })
            .collect();
        let assignments = clusters
            .iter()
            .flat_map(|cluster| cluster.members.iter().map(move |&id| (id, cluster.label)))
            .collect();

        info!(
            communities = clusters.len(),
            entities = graph_data.entities.len(),
            modularity,
            revision = snapshot.revision(),
            "Detected communities"
        );

        Communities {
            assignments,
            clusters,
            modularity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{EntityType, RelationshipType};
    use graph::{KnowledgeGraph, Mention, NewRelationship, ResolverConfig};

    fn graph_with(names: &[&str], edges: &[(usize, usize)]) -> (KnowledgeGraph, Vec<EntityId>) {
        let mut kg = KnowledgeGraph::new("test", ResolverConfig::default());
        let ids: Vec<EntityId> = names
            .iter()
            .map(|name| {
                kg.resolve_mention(&Mention::new(*name, EntityType::Organization, 0.9, "doc"))
                    .entity_id
            })
            .collect();
        for &(s, t) in edges {
            kg.add_relationship(NewRelationship::new(ids[s], ids[t], RelationshipType::AssociatedWith, 0.8))
                .unwrap();
        }
        (kg, ids)
    }

    #[test]
    fn test_partition_covers_isolated_entities() {
        let (kg, ids) = graph_with(&["Alpha", "Bravo", "Charlie", "Delta"], &[(0, 1), (1, 2)]);
        let communities = CommunityDetector::new().detect(&kg.snapshot());

        assert_eq!(communities.len(), 2);
        assert_eq!(communities.clusters[0].members, ids[..3].to_vec());
        assert_eq!(communities.clusters[1].members, vec![ids[3]]);
        assert_eq!(communities.assignments.len(), 4);
        assert_eq!(communities.cluster_of(ids[3]).unwrap().label, 1);
    }

    #[test]
    fn test_equal_sized_clusters_ordered_by_smallest_member() {
        let (kg, ids) = graph_with(&["Alpha", "Bravo", "Charlie", "Delta", "Echo"], &[(3, 4), (0, 1)]);
        let communities = CommunityDetector::new().detect(&kg.snapshot());

        assert_eq!(communities.clusters[0].members, vec![ids[0], ids[1]]);
        assert_eq!(communities.clusters[1].members, vec![ids[3], ids[4]]);
        assert_eq!(communities.clusters[2].members, vec![ids[2]]);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let (kg, _) = graph_with(
            &["A1", "A2", "A3", "B1", "B2", "B3"],
            &[(0, 1), (0, 2), (1, 2), (2, 3), (3, 4), (3, 5), (4, 5)],
        );
        let snapshot = kg.snapshot();
        let detector = CommunityDetector::new();
        assert_eq!(detector.detect(&snapshot), detector.detect(&snapshot));
    }

    #[test]
    fn test_empty_graph() {
        let kg = KnowledgeGraph::new("empty", ResolverConfig::default());
        let communities = CommunityDetector::new().detect(&kg.snapshot());
        assert!(communities.is_empty());
        assert_eq!(communities.modularity, 0.0);
    }
}
