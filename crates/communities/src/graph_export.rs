use graph::{EntityId, GraphSnapshot};
use std::collections::HashMap;

/// Undirected simple projection handed to the clustering step.
#[derive(Debug, Clone, Default)]
pub struct GraphData {
    pub entities: Vec<EntityId>,
    pub edges: Vec<(usize, usize)>, // (source_idx, target_idx), source_idx < target_idx
    pub entity_to_idx: HashMap<EntityId, usize>,
}

impl GraphData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, entity_id: EntityId) -> usize {
        if let Some(&idx) = self.entity_to_idx.get(&entity_id) {
            return idx;
        }

        let idx = self.entities.len();
        self.entities.push(entity_id);
        self.entity_to_idx.insert(entity_id, idx);
        idx
    }

    pub fn add_edge(&mut self, source: usize, target: usize) {
        self.edges.push((source.min(target), source.max(target)));
    }
}

pub struct GraphExporter;

impl GraphExporter {
    /// Every entity (isolated ones included) and one unit edge per connected
    /// pair, ignoring direction, multiplicity and self-loops.
    pub fn export_graph(snapshot: &GraphSnapshot) -> GraphData {
        let view = snapshot.undirected_view();
        let mut graph_data = GraphData::new();

        for &id in &view.ids {
            graph_data.add_entity(id);
        }
        for (node, hops) in view.neighbors.iter().enumerate() {
            for hop in hops.iter().filter(|hop| hop.node > node) {
                graph_data.add_edge(node, hop.node);
            }
        }

        tracing::debug!(
            entities = graph_data.entities.len(),
            edges = graph_data.edges.len(),
            revision = snapshot.revision(),
            "Exported graph for clustering"
        );
        graph_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{EntityType, RelationshipType};
    use graph::{KnowledgeGraph, Mention, NewRelationship, ResolverConfig};

    #[test]
    fn test_export_collapses_parallel_edges() {
        let mut kg = KnowledgeGraph::new("test", ResolverConfig::default());
        let a = kg.resolve_mention(&Mention::new("Alpha", EntityType::Organization, 0.9, "d")).entity_id;
        let b = kg.resolve_mention(&Mention::new("Beta", EntityType::Organization, 0.9, "d")).entity_id;
        kg.resolve_mention(&Mention::new("Gamma", EntityType::Organization, 0.9, "d"));
        kg.add_relationship(NewRelationship::new(a, b, RelationshipType::Owns, 0.5)).unwrap();
        kg.add_relationship(NewRelationship::new(b, a, RelationshipType::Controls, 0.5)).unwrap();
        kg.add_relationship(NewRelationship::new(a, a, RelationshipType::Controls, 0.5)).unwrap();

        let data = GraphExporter::export_graph(&kg.snapshot());
        assert_eq!(data.entities.len(), 3);
        assert_eq!(data.edges, vec![(0, 1)]);
    }
}
