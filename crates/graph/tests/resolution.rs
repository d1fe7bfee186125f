use extract::{ChunkInput, EntityMention, EntityType, ExtractionBatch, RelationshipMention, RelationshipType};
use graph::{EntityId, GraphExport, KnowledgeGraph, ResolverConfig};

fn mention(text: &str, entity_type: EntityType, confidence: f64) -> EntityMention {
    EntityMention {
        text: text.to_string(),
        entity_type,
        confidence,
    }
}

fn works_at(source: &str, target: &str, confidence: f64) -> RelationshipMention {
    RelationshipMention {
        source_text: source.to_string(),
        target_text: target.to_string(),
        relationship_type: RelationshipType::WorksAt,
        confidence,
        evidence: format!("{} works at {}", source, target),
    }
}

#[test]
fn initials_merge_across_documents_and_edges_combine() {
    let mut graph = KnowledgeGraph::new("scenario", ResolverConfig::default());

    graph.ingest_batch(
        &ChunkInput::new("doc1", "John Smith of ACME Corp", Some(1)),
        &ExtractionBatch {
            entities: vec![
                mention("John Smith", EntityType::Person, 0.9),
                mention("ACME Corp", EntityType::Organization, 0.9),
            ],
            relationships: vec![works_at("John Smith", "ACME Corp", 0.9)],
        },
    );
    let report = graph.ingest_batch(
        &ChunkInput::new("doc2", "J. Smith, ACME Corp", Some(4)),
        &ExtractionBatch {
            entities: vec![
                mention("J. Smith", EntityType::Person, 0.8),
                mention("ACME Corp", EntityType::Organization, 0.7),
            ],
            relationships: vec![works_at("J. Smith", "ACME Corp", 0.6)],
        },
    );
    assert_eq!(report.entities_merged, 2);
    assert_eq!(report.relationships_merged, 1);

    let smith = graph.get_entity("John Smith").unwrap();
    assert_eq!(smith.mention_count, 2);
    assert!(smith.aliases.contains("John Smith"));
    assert!(smith.aliases.contains("J. Smith"));
    assert_eq!(smith.source_documents.len(), 2);

    let snapshot = graph.snapshot();
    let relationships = snapshot.relationships();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].confidence, 0.9);
    assert_eq!(relationships[0].evidence.len(), 2);
    assert_eq!(relationships[0].observation_count, 2);
}

#[test]
fn same_name_different_type_stays_apart() {
    let mut graph = KnowledgeGraph::new("scenario", ResolverConfig::default());
    graph.ingest_batch(
        &ChunkInput::new("doc1", "Amazon", None),
        &ExtractionBatch {
            entities: vec![
                mention("Amazon", EntityType::Person, 0.6),
                mention("Amazon", EntityType::Organization, 0.9),
            ],
            relationships: vec![],
        },
    );
    assert_eq!(graph.store().entity_count(), 2);
}

#[test]
fn writes_after_snapshot_are_invisible_to_it() {
    let mut graph = KnowledgeGraph::new("scenario", ResolverConfig::default());
    graph.ingest_batch(
        &ChunkInput::new("doc1", "A", None),
        &ExtractionBatch {
            entities: vec![mention("Alpha", EntityType::Organization, 0.9)],
            relationships: vec![],
        },
    );
    let frozen = graph.snapshot();

    graph.ingest_batch(
        &ChunkInput::new("doc2", "B", None),
        &ExtractionBatch {
            entities: vec![
                mention("Alpha", EntityType::Organization, 0.5),
                mention("Beta", EntityType::Organization, 0.9),
            ],
            relationships: vec![],
        },
    );

    assert_eq!(frozen.entity_count(), 1);
    assert_eq!(frozen.entity(EntityId(1)).unwrap().mention_count, 1);
    assert_eq!(graph.snapshot().entity(EntityId(1)).unwrap().mention_count, 2);
}

#[tokio::test]
async fn export_round_trip_keeps_merges_and_redirects() {
    let mut graph = KnowledgeGraph::new("scenario", ResolverConfig::default());
    graph.ingest_batch(
        &ChunkInput::new("doc1", "text", None),
        &ExtractionBatch {
            entities: vec![
                mention("Robert Paulson", EntityType::Person, 0.9),
                mention("Bob Paulson", EntityType::Person, 0.6),
                mention("Paper Street Soap", EntityType::Organization, 0.8),
            ],
            relationships: vec![works_at("Bob Paulson", "Paper Street Soap", 0.7)],
        },
    );
    graph.merge_entities(EntityId(1), EntityId(2)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");
    let export = graph.to_export();
    export.save(&path).await.unwrap();

    let restored = GraphExport::load(&path)
        .await
        .unwrap()
        .into_graph(ResolverConfig::default())
        .unwrap();

    assert_eq!(restored.to_export(), export);
    assert_eq!(restored.get_entity("e_2").unwrap().id, EntityId(1));
    assert_eq!(
        restored.resolver().lookup("Bob Paulson", Some(EntityType::Person)),
        Some(EntityId(1))
    );
}
