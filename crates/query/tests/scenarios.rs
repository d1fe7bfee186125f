use extract::{ChunkInput, EntityMention, EntityType, ExtractionBatch, RelationshipMention, RelationshipType};
use graph::{KnowledgeGraph, ResolverConfig};
use query::{CentralityAlgorithm, PathResult, QueryEngine, QueryError};

fn org(text: &str) -> EntityMention {
    EntityMention {
        text: text.to_string(),
        entity_type: EntityType::Organization,
        confidence: 0.9,
    }
}

fn link(source: &str, target: &str, confidence: f64) -> RelationshipMention {
    RelationshipMention {
        source_text: source.to_string(),
        target_text: target.to_string(),
        relationship_type: RelationshipType::TransactedWith,
        confidence,
        evidence: String::new(),
    }
}

/// Alpha - Bravo - Charlie, with Delta on its own.
fn chain_graph() -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::new("chain", ResolverConfig::default());
    graph.ingest_batch(
        &ChunkInput::new("ledger", "Alpha paid Bravo, Bravo paid Charlie. Delta.", Some(1)),
        &ExtractionBatch {
            entities: vec![org("Alpha"), org("Bravo"), org("Charlie"), org("Delta")],
            relationships: vec![link("Alpha", "Bravo", 0.9), link("Bravo", "Charlie", 0.7)],
        },
    );
    graph
}

#[test]
fn path_and_communities_on_chain_with_isolated_node() {
    let engine = QueryEngine::new(chain_graph().snapshot());

    let PathResult::Found(path) = engine.find_path("Alpha", "Charlie").unwrap() else {
        panic!("Alpha and Charlie are connected");
    };
    let names: Vec<String> = path
        .nodes
        .iter()
        .map(|id| engine.snapshot().entity(*id).unwrap().canonical_name.clone())
        .collect();
    assert_eq!(names, ["Alpha", "Bravo", "Charlie"]);

    assert_eq!(engine.find_path("alpha", "Delta").unwrap(), PathResult::NoPath);

    let communities = engine.list_communities();
    assert_eq!(communities.len(), 2);
    assert_eq!(communities.clusters[0].members.len(), 3);
    assert_eq!(communities.clusters[1].members.len(), 1);
    assert_eq!(communities.assignments.len(), 4);
}

#[test]
fn path_is_symmetric_and_trivial_for_same_entity() {
    let engine = QueryEngine::new(chain_graph().snapshot());

    let (PathResult::Found(there), PathResult::Found(back)) = (
        engine.find_path("Alpha", "Charlie").unwrap(),
        engine.find_path("Charlie", "Alpha").unwrap(),
    ) else {
        panic!("expected paths both ways");
    };
    assert_eq!(there.len(), back.len());
    assert_eq!(there.nodes, back.nodes.iter().rev().copied().collect::<Vec<_>>());

    let PathResult::Found(trivial) = engine.find_path("Bravo", "e_2").unwrap() else {
        panic!("an entity reaches itself");
    };
    assert!(trivial.is_empty());
}

#[test]
fn unknown_names_are_reported() {
    let engine = QueryEngine::new(chain_graph().snapshot());
    assert_eq!(
        engine.find_path("Alpha", "Zulu"),
        Err(QueryError::UnknownEntity("Zulu".to_string()))
    );
    assert!(engine.get_entity("e_99").is_err());
}

#[test]
fn centrality_ranks_the_broker_first() {
    let engine = QueryEngine::new(chain_graph().snapshot());

    let top = engine.rank_by_centrality(1, CentralityAlgorithm::Betweenness);
    assert_eq!(top[0].name, "Bravo");

    let degree = engine.rank_by_centrality(10, CentralityAlgorithm::Degree);
    assert_eq!(degree.len(), 4);
    assert_eq!(degree[0].name, "Bravo");
    assert_eq!(degree.last().unwrap().name, "Delta");
}

#[test]
fn analytics_ignore_writes_after_the_snapshot() {
    let mut graph = chain_graph();
    let engine = QueryEngine::new(graph.snapshot());

    graph.ingest_batch(
        &ChunkInput::new("ledger", "Charlie paid Delta.", Some(2)),
        &ExtractionBatch {
            entities: vec![],
            relationships: vec![link("Charlie", "Delta", 0.5)],
        },
    );

    assert_eq!(engine.find_path("Alpha", "Delta").unwrap(), PathResult::NoPath);
    assert!(matches!(
        QueryEngine::new(graph.snapshot()).find_path("Alpha", "Delta").unwrap(),
        PathResult::Found(_)
    ));
}

#[test]
fn entity_details_and_neighbourhood() {
    let engine = QueryEngine::new(chain_graph().snapshot());

    let bravo = engine.get_entity("bravo").unwrap();
    assert_eq!(bravo.entity.canonical_name, "Bravo");
    assert_eq!(bravo.incoming.len(), 1);
    assert_eq!(bravo.outgoing.len(), 1);

    let around: Vec<String> = engine
        .neighborhood("Alpha", 2)
        .unwrap()
        .into_iter()
        .map(|e| e.canonical_name)
        .collect();
    assert_eq!(around, ["Bravo", "Charlie"]);

    let stats = engine.stats();
    assert_eq!(stats.total_entities, 4);
    assert_eq!(stats.connected_components, 2);
}

#[test]
fn subgraph_of_chain_ends_drops_the_middle() {
    let engine = QueryEngine::new(chain_graph().snapshot());

    let ends = engine.subgraph(&["Alpha", "Charlie"]).unwrap();
    assert_eq!(ends.nodes.len(), 2);
    assert!(ends.links.is_empty());

    let upper = engine.subgraph(&["alpha", "Bravo"]).unwrap();
    assert_eq!(upper.nodes.len(), 2);
    assert_eq!(upper.links.len(), 1);
    assert_eq!(upper.links[0].confidence, 0.9);

    assert_eq!(
        engine.subgraph(&["Alpha", "Nobody"]),
        Err(QueryError::UnknownEntity("Nobody".to_string()))
    );
}
