use extract::EntityType;
use graph::GraphSnapshot;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub total_entities: usize,
    pub total_relationships: usize,
    pub entity_types: BTreeMap<EntityType, usize>,
    pub relationship_types: BTreeMap<String, usize>,
    /// In plus out degree, averaged over entities.
    pub average_degree: f64,
    /// Edges over `n(n - 1)` for the directed graph.
    pub density: f64,
    pub connected_components: usize,
    pub largest_component_size: usize,
}

pub fn graph_stats(snapshot: &GraphSnapshot) -> GraphStats {
    let entities = snapshot.entities();
    let relationships = snapshot.relationships();
    let n = entities.len();
    let e = relationships.len();

    let mut entity_types = BTreeMap::new();
    for entity in &entities {
        *entity_types.entry(entity.entity_type).or_insert(0) += 1;
    }
    let mut relationship_types = BTreeMap::new();
    for relationship in &relationships {
        *relationship_types
            .entry(relationship.relationship_type.to_string())
            .or_insert(0) += 1;
    }

    let average_degree = if n == 0 { 0.0 } else { 2.0 * e as f64 / n as f64 };
    let density = if n <= 1 { 0.0 } else { e as f64 / (n * (n - 1)) as f64 };

    // Weakly connected components over the undirected projection
    let view = snapshot.undirected_view();
    let mut seen = vec![false; view.len()];
    let mut components = 0;
    let mut largest = 0;
    for start in 0..view.len() {
        if seen[start] {
            continue;
        }
        components += 1;
        seen[start] = true;
        let mut size = 0;
        let mut queue = VecDeque::from([start]);
        while let Some(v) = queue.pop_front() {
            size += 1;
            for hop in &view.neighbors[v] {
                if !seen[hop.node] {
                    seen[hop.node] = true;
                    queue.push_back(hop.node);
                }
            }
        }
        largest = largest.max(size);
    }

    GraphStats {
        total_entities: n,
        total_relationships: e,
        entity_types,
        relationship_types,
        average_degree,
        density,
        connected_components: components,
        largest_component_size: largest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::RelationshipType;
    use graph::{KnowledgeGraph, Mention, NewRelationship, ResolverConfig};

    #[test]
    fn test_stats_counts() {
        let mut kg = KnowledgeGraph::new("test", ResolverConfig::default());
        let alice = kg.resolve_mention(&Mention::new("Alice Jones", EntityType::Person, 0.9, "d")).entity_id;
        let acme = kg.resolve_mention(&Mention::new("ACME", EntityType::Organization, 0.9, "d")).entity_id;
        kg.resolve_mention(&Mention::new("Paris", EntityType::Location, 0.9, "d"));
        kg.resolve_mention(&Mention::new("Berlin", EntityType::Location, 0.9, "d"));
        kg.add_relationship(NewRelationship::new(alice, acme, RelationshipType::WorksAt, 0.9)).unwrap();
        kg.add_relationship(NewRelationship::new(acme, alice, RelationshipType::Other("pays".into()), 0.9))
            .unwrap();

        let stats = graph_stats(&kg.snapshot());
        assert_eq!(stats.total_entities, 4);
        assert_eq!(stats.total_relationships, 2);
        assert_eq!(stats.entity_types[&EntityType::Location], 2);
        assert_eq!(stats.relationship_types["works_at"], 1);
        assert_eq!(stats.relationship_types["pays"], 1);
        assert!((stats.average_degree - 1.0).abs() < 1e-9);
        assert!((stats.density - 2.0 / 12.0).abs() < 1e-9);
        assert_eq!(stats.connected_components, 3);
        assert_eq!(stats.largest_component_size, 2);
    }

    #[test]
    fn test_empty_graph_stats() {
        let kg = KnowledgeGraph::new("empty", ResolverConfig::default());
        let stats = graph_stats(&kg.snapshot());
        assert_eq!(stats.total_entities, 0);
        assert_eq!(stats.density, 0.0);
        assert_eq!(stats.connected_components, 0);
    }
}
