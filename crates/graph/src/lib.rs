//! Entity resolution and the knowledge graph it feeds.
//!
//! [`KnowledgeGraph`] owns one resolver, one store and the document registry.
//! Nothing here is global, so independent graphs can live side by side.

pub mod error;
pub mod export;
pub mod model;
pub mod resolver;
pub mod similarity;
pub mod store;

pub use error::{GraphError, Result};
pub use export::GraphExport;
pub use model::{
    Document, Entity, EntityId, EvidenceSpan, Mention, NewRelationship, Relationship,
    RelationshipId, MAX_EVIDENCE_SPANS,
};
pub use resolver::{EntityResolver, FuzzyPool, MatchKind, MatchPolicy, Resolution, ResolverConfig};
pub use similarity::SimilarityAlgorithm;
pub use store::{EdgeOutcome, GraphSnapshot, GraphStore, Hop, UndirectedView};

use extract::{ChunkInput, ExtractionBatch};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// A relationship or mention from a batch that could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchFailure {
    DanglingReference { index: usize, message: String },
    MalformedMention { index: usize, message: String },
}

/// Outcome of applying one extraction batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub entities_created: usize,
    pub entities_merged: usize,
    pub relationships_created: usize,
    pub relationships_merged: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn dangling(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| matches!(f, BatchFailure::DanglingReference { .. }))
            .count()
    }

    pub fn malformed(&self) -> usize {
        self.failures.len() - self.dangling()
    }
}

pub struct KnowledgeGraph {
    name: String,
    resolver: EntityResolver,
    store: GraphStore,
    documents: BTreeMap<String, Document>,
}

impl KnowledgeGraph {
    pub fn new(name: impl Into<String>, config: ResolverConfig) -> Self {
        Self {
            name: name.into(),
            resolver: EntityResolver::new(config),
            store: GraphStore::new(),
            documents: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn revision(&self) -> u64 {
        self.store.revision()
    }

    /// Frozen copy-on-write view for analytics.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.store.snapshot()
    }

    /// Resolve a mention and mirror the resulting canonical entity into the store.
    pub fn resolve_mention(&mut self, mention: &Mention) -> Resolution {
        let resolution = self.resolver.resolve(mention);
        if let Some(entity) = self.resolver.entity(resolution.entity_id) {
            self.store.add_entity(entity.clone());
        }
        resolution
    }

    pub fn add_relationship(&mut self, relationship: NewRelationship) -> Result<EdgeOutcome> {
        self.store.add_relationship(relationship)
    }

    pub fn register_document(&mut self, id: impl Into<String>, metadata: BTreeMap<String, String>) {
        let id = id.into();
        self.documents
            .entry(id.clone())
            .or_insert_with(|| Document {
                id,
                ..Document::default()
            })
            .metadata
            .extend(metadata);
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Apply one chunk's extraction output. Bad items are reported, never fatal.
    pub fn ingest_batch(&mut self, chunk: &ChunkInput, batch: &ExtractionBatch) -> BatchReport {
        self.register_document(chunk.document_id.clone(), BTreeMap::new());
        if let Some(document) = self.documents.get_mut(&chunk.document_id) {
            document.chunk_count += 1;
        }

        let mut report = BatchReport::default();
        let chunk_id = chunk.chunk_id();
        // Surface text (case-folded) -> entity resolved within this batch
        let mut local: HashMap<String, EntityId> = HashMap::new();

        for (index, extracted) in batch.entities.iter().enumerate() {
            if !(0.0..=1.0).contains(&extracted.confidence) {
                let message = GraphError::InvalidConfidence(extracted.confidence).to_string();
                warn!(document_id = %chunk.document_id, index, %message, "Skipping mention");
                report.failures.push(BatchFailure::MalformedMention { index, message });
                continue;
            }
            let resolution = self.resolve_mention(&Mention::from_extracted(extracted, chunk));
            if resolution.created {
                report.entities_created += 1;
            } else {
                report.entities_merged += 1;
            }
            local
                .entry(fold(&extracted.text))
                .or_insert(resolution.entity_id);
        }

        for (index, extracted) in batch.relationships.iter().enumerate() {
            let source = self.endpoint(&local, &extracted.source_text);
            let target = self.endpoint(&local, &extracted.target_text);

            let (source_id, target_id) = match (source, target) {
                (Some(source_id), Some(target_id)) => (source_id, target_id),
                (source, _) => {
                    let missing = if source.is_none() {
                        &extracted.source_text
                    } else {
                        &extracted.target_text
                    };
                    let error = GraphError::DanglingReference {
                        relationship: format!(
                            "{} -[{}]-> {}",
                            extracted.source_text, extracted.relationship_type, extracted.target_text
                        ),
                        missing: missing.clone(),
                    };
                    warn!(document_id = %chunk.document_id, index, %error, "Skipping relationship");
                    report.failures.push(BatchFailure::DanglingReference {
                        index,
                        message: error.to_string(),
                    });
                    continue;
                }
            };

            let relationship = NewRelationship::new(
                source_id,
                target_id,
                extracted.relationship_type.clone(),
                extracted.confidence,
            )
            .with_evidence(extracted.evidence.clone())
            .with_provenance(chunk.document_id.clone(), chunk.page_number)
            .with_chunk_id(chunk_id.clone());

            match self.store.add_relationship(relationship) {
                Ok(EdgeOutcome::Created(_)) => report.relationships_created += 1,
                Ok(EdgeOutcome::Merged(_)) => report.relationships_merged += 1,
                Err(error) => {
                    warn!(document_id = %chunk.document_id, index, %error, "Skipping relationship");
                    let message = error.to_string();
                    report.failures.push(if error.is_dangling_reference() {
                        BatchFailure::DanglingReference { index, message }
                    } else {
                        BatchFailure::MalformedMention { index, message }
                    });
                }
            }
        }

        info!(
            document_id = %chunk.document_id,
            page = ?chunk.page_number,
            chunk_id = %chunk_id,
            entities_created = report.entities_created,
            entities_merged = report.entities_merged,
            relationships_created = report.relationships_created,
            relationships_merged = report.relationships_merged,
            failures = report.failures.len(),
            "Applied batch"
        );
        report
    }

    /// Batch-local mentions first, then the resolver's exact index.
    fn endpoint(&self, local: &HashMap<String, EntityId>, text: &str) -> Option<EntityId> {
        local
            .get(&fold(text))
            .copied()
            .or_else(|| self.resolver.lookup(text, None))
    }

    /// Look an entity up by id (`e_12`), canonical name or alias.
    pub fn get_entity(&self, name_or_id: &str) -> Option<Entity> {
        self.store.snapshot().find_entity(name_or_id).cloned()
    }

    /// Remove an entity, its incident edges and its resolver keys.
    pub fn purge_entity(&mut self, id: EntityId) -> Result<Entity> {
        let entity = self.store.remove_entity(id)?;
        self.resolver.forget(entity.id);
        info!(entity_id = %entity.id, name = %entity.canonical_name, "Purged entity");
        Ok(entity)
    }

    /// Absorb one entity into another of the same type. The absorbed id keeps
    /// resolving, to the kept entity.
    pub fn merge_entities(&mut self, keep: EntityId, absorb: EntityId) -> Result<Entity> {
        let keep = self.canonical_id(keep)?;
        let absorb = self.canonical_id(absorb)?;
        let merged = self.resolver.absorb_entity(keep, absorb)?;
        self.store.redirect_entity(absorb, merged.clone())?;
        info!(
            kept = %keep,
            absorbed = %absorb,
            mention_count = merged.mention_count,
            "Merged entities"
        );
        Ok(merged)
    }

    fn canonical_id(&self, id: EntityId) -> Result<EntityId> {
        self.store
            .get_entity(id)
            .map(|entity| entity.id)
            .ok_or_else(|| GraphError::UnknownEntity(id.to_string()))
    }

    pub fn to_export(&self) -> GraphExport {
        GraphExport::from_graph(self)
    }

    pub fn from_export(export: GraphExport, config: ResolverConfig) -> Result<Self> {
        let GraphExport { graph, nodes, links, .. } = export;

        let mut store = GraphStore::new();
        for entity in &nodes {
            store.add_entity(entity.clone());
        }
        for relationship in links {
            store.restore_relationship(relationship)?;
        }
        store.set_next_relationship_id(graph.next_relationship_id);
        for redirect in graph.redirects {
            store.insert_redirect(redirect.from, redirect.to);
        }

        let resolver = EntityResolver::rebuild(config, nodes, graph.next_entity_id);
        let documents = graph
            .documents
            .into_iter()
            .map(|document| (document.id.clone(), document))
            .collect();

        Ok(Self {
            name: graph.name,
            resolver,
            store,
            documents,
        })
    }
}

fn fold(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{EntityMention, EntityType, RelationshipMention, RelationshipType};

    fn entity(text: &str, entity_type: EntityType, confidence: f64) -> EntityMention {
        EntityMention {
            text: text.into(),
            entity_type,
            confidence,
        }
    }

    fn relationship(source: &str, target: &str, kind: RelationshipType, confidence: f64) -> RelationshipMention {
        RelationshipMention {
            source_text: source.into(),
            target_text: target.into(),
            relationship_type: kind,
            confidence,
            evidence: format!("{} / {}", source, target),
        }
    }

    #[test]
    fn test_ingest_batch_resolves_relationship_endpoints() {
        let mut graph = KnowledgeGraph::new("test", ResolverConfig::default());
        let chunk = ChunkInput::new("doc1", "John Smith works at ACME Corp.", Some(1));
        let batch = ExtractionBatch {
            entities: vec![
                entity("John Smith", EntityType::Person, 0.9),
                entity("ACME Corp", EntityType::Organization, 0.8),
            ],
            relationships: vec![
                relationship("john smith", "ACME Corp", RelationshipType::WorksAt, 0.9),
                relationship("John Smith", "Initech", RelationshipType::WorksAt, 0.9),
            ],
        };

        let report = graph.ingest_batch(&chunk, &batch);
        assert_eq!(report.entities_created, 2);
        assert_eq!(report.relationships_created, 1);
        assert_eq!(report.dangling(), 1);
        assert_eq!(graph.store().entity_count(), 2);

        let documents: Vec<&Document> = graph.documents().collect();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].chunk_count, 1);
    }

    #[test]
    fn test_evidence_records_source_chunk() {
        let mut graph = KnowledgeGraph::new("test", ResolverConfig::default());
        let batch = ExtractionBatch {
            entities: vec![
                entity("John Smith", EntityType::Person, 0.9),
                entity("ACME Corp", EntityType::Organization, 0.8),
            ],
            relationships: vec![relationship("John Smith", "ACME Corp", RelationshipType::WorksAt, 0.9)],
        };
        let first = ChunkInput::new("doc1", "John Smith works at ACME Corp.", Some(1));
        let second = ChunkInput::new("doc2", "Smith, of ACME Corp, said...", Some(4));
        graph.ingest_batch(&first, &batch);
        graph.ingest_batch(&second, &batch);

        let relationships = graph.store().all_relationships();
        assert_eq!(relationships.len(), 1);
        let chunk_ids: Vec<Option<String>> = relationships[0]
            .evidence
            .iter()
            .map(|span| span.chunk_id.clone())
            .collect();
        assert_eq!(chunk_ids, vec![Some(first.chunk_id()), Some(second.chunk_id())]);
    }

    #[test]
    fn test_endpoints_fall_back_to_existing_entities() {
        let mut graph = KnowledgeGraph::new("test", ResolverConfig::default());
        let first = ExtractionBatch {
            entities: vec![entity("ACME Corp", EntityType::Organization, 0.8)],
            relationships: vec![],
        };
        graph.ingest_batch(&ChunkInput::new("doc1", "...", None), &first);

        let second = ExtractionBatch {
            entities: vec![entity("Jane Doe", EntityType::Person, 0.8)],
            relationships: vec![relationship("Jane Doe", "Acme, Inc.", RelationshipType::EmployedBy, 0.7)],
        };
        let report = graph.ingest_batch(&ChunkInput::new("doc2", "...", None), &second);
        assert_eq!(report.relationships_created, 1);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_purge_and_merge() {
        let mut graph = KnowledgeGraph::new("test", ResolverConfig::default());
        let chunk = ChunkInput::new("doc1", "...", None);
        let batch = ExtractionBatch {
            entities: vec![
                entity("Robert Paulson", EntityType::Person, 0.9),
                entity("Bob Paulson", EntityType::Person, 0.6),
                entity("Paper Street Soap", EntityType::Organization, 0.8),
            ],
            relationships: vec![
                relationship("Robert Paulson", "Paper Street Soap", RelationshipType::AssociatedWith, 0.5),
                relationship("Bob Paulson", "Paper Street Soap", RelationshipType::AssociatedWith, 0.8),
            ],
        };
        graph.ingest_batch(&chunk, &batch);
        let robert = graph.get_entity("Robert Paulson").unwrap().id;
        let bob = graph.get_entity("Bob Paulson").unwrap().id;
        let soap = graph.get_entity("paper street soap").unwrap().id;
        assert_ne!(robert, bob);

        assert!(matches!(
            graph.merge_entities(robert, soap),
            Err(GraphError::TypeMismatch { .. })
        ));

        let merged = graph.merge_entities(robert, bob).unwrap();
        assert_eq!(merged.mention_count, 2);
        assert_eq!(graph.store().relationship_count(), 1);
        assert_eq!(graph.store().all_relationships()[0].confidence, 0.8);
        assert_eq!(graph.get_entity(&bob.to_string()).unwrap().id, robert);

        let purged = graph.purge_entity(soap).unwrap();
        assert_eq!(purged.canonical_name, "Paper Street Soap");
        assert_eq!(graph.store().relationship_count(), 0);
        assert!(graph.get_entity("Paper Street Soap").is_none());
        assert!(graph.resolver().lookup("Paper Street Soap", None).is_none());
    }
}
