use extract::{ChunkInput, EntityMention, EntityType, RelationshipType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Upper bound on evidence spans kept per relationship.
pub const MAX_EVIDENCE_SPANS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e_{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::num::ParseIntError;

    /// Accepts `e_12` as well as a bare `12`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().strip_prefix("e_").unwrap_or(s.trim());
        digits.parse().map(EntityId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(pub u64);

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r_{}", self.0)
    }
}

/// A single raw occurrence of an entity, tied to one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub text: String,
    pub entity_type: EntityType,
    pub confidence: f64,
    pub source_document: String,
    #[serde(default)]
    pub page_number: Option<u32>,
}

impl Mention {
    pub fn new(
        text: impl Into<String>,
        entity_type: EntityType,
        confidence: f64,
        source_document: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            entity_type,
            confidence,
            source_document: source_document.into(),
            page_number: None,
        }
    }

    pub fn from_extracted(mention: &EntityMention, chunk: &ChunkInput) -> Self {
        Self {
            text: mention.text.clone(),
            entity_type: mention.entity_type,
            confidence: mention.confidence,
            source_document: chunk.document_id.clone(),
            page_number: chunk.page_number,
        }
    }
}

/// Canonical node: every mention believed to name the same real-world thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub aliases: BTreeSet<String>,
    pub mention_count: u64,
    pub confidence: f64,
    pub best_mention_confidence: f64,
    pub source_documents: BTreeSet<String>,
    #[serde(default)]
    pub low_confidence: bool,
}

impl Entity {
    pub fn from_mention(id: EntityId, mention: &Mention, low_confidence: bool) -> Self {
        Self {
            id,
            entity_type: mention.entity_type,
            canonical_name: mention.text.clone(),
            aliases: BTreeSet::from([mention.text.clone()]),
            mention_count: 1,
            confidence: mention.confidence,
            best_mention_confidence: mention.confidence,
            source_documents: BTreeSet::from([mention.source_document.clone()]),
            low_confidence,
        }
    }

    /// Fold one more mention into the running aggregates.
    pub fn absorb_mention(&mut self, mention: &Mention) {
        let before = self.mention_count as f64;
        self.mention_count += 1;
        self.confidence =
            (self.confidence * before + mention.confidence) / self.mention_count as f64;

        self.aliases.insert(mention.text.clone());
        self.source_documents.insert(mention.source_document.clone());

        if mention.confidence > self.best_mention_confidence {
            self.best_mention_confidence = mention.confidence;
            self.canonical_name = mention.text.clone();
        }
    }

    /// Fold another canonical entity of the same type into this one.
    pub fn absorb_entity(&mut self, other: &Entity) {
        let total = self.mention_count + other.mention_count;
        if total > 0 {
            self.confidence = (self.confidence * self.mention_count as f64
                + other.confidence * other.mention_count as f64)
                / total as f64;
        }
        self.mention_count = total;
        self.aliases.extend(other.aliases.iter().cloned());
        self.source_documents
            .extend(other.source_documents.iter().cloned());

        if other.best_mention_confidence > self.best_mention_confidence {
            self.best_mention_confidence = other.best_mention_confidence;
            self.canonical_name = other.canonical_name.clone();
        }
        self.low_confidence = self.low_confidence && other.low_confidence;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub text: String,
    pub source_document: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    /// `ChunkInput::chunk_id` of the chunk the span was read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
}

impl EvidenceSpan {
    fn same_passage(&self, other: &EvidenceSpan) -> bool {
        self.text == other.text
            && self.source_document == other.source_document
            && self.page_number == other.page_number
    }
}

/// Typed, directed edge. Endpoints are ids only; the graph owns the entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    #[serde(rename = "source")]
    pub source_id: EntityId,
    #[serde(rename = "target")]
    pub target_id: EntityId,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    pub evidence: Vec<EvidenceSpan>,
    pub source_document: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    pub observation_count: u64,
}

impl Relationship {
    /// The endpoint that is not `id` (or `id` itself for a self-loop).
    pub fn other_end(&self, id: EntityId) -> EntityId {
        if self.source_id == id { self.target_id } else { self.source_id }
    }

    /// Add an evidence span unless it is already recorded or the list is full.
    pub fn push_evidence(&mut self, span: EvidenceSpan) {
        if span.text.is_empty()
            || self.evidence.len() >= MAX_EVIDENCE_SPANS
            || self.evidence.iter().any(|existing| existing.same_passage(&span))
        {
            return;
        }
        self.evidence.push(span);
    }

    /// Combine another observation of the same (source, target, type) edge.
    pub(crate) fn merge_from(&mut self, other: &Relationship) {
        self.confidence = self.confidence.max(other.confidence);
        self.observation_count += other.observation_count;
        for span in &other.evidence {
            self.push_evidence(span.clone());
        }
    }
}

/// A relationship as submitted, before the store assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelationship {
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    pub evidence: String,
    pub source_document: String,
    pub page_number: Option<u32>,
    pub chunk_id: Option<String>,
}

impl NewRelationship {
    pub fn new(
        source_id: EntityId,
        target_id: EntityId,
        relationship_type: RelationshipType,
        confidence: f64,
    ) -> Self {
        Self {
            source_id,
            target_id,
            relationship_type,
            confidence,
            evidence: String::new(),
            source_document: String::new(),
            page_number: None,
            chunk_id: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    pub fn with_provenance(mut self, source_document: impl Into<String>, page_number: Option<u32>) -> Self {
        self.source_document = source_document.into();
        self.page_number = page_number;
        self
    }

    pub fn with_chunk_id(mut self, chunk_id: impl Into<String>) -> Self {
        self.chunk_id = Some(chunk_id.into());
        self
    }

    pub(crate) fn into_relationship(self, id: RelationshipId) -> Relationship {
        let mut relationship = Relationship {
            id,
            source_id: self.source_id,
            target_id: self.target_id,
            relationship_type: self.relationship_type,
            confidence: self.confidence,
            evidence: Vec::new(),
            source_document: self.source_document.clone(),
            page_number: self.page_number,
            observation_count: 1,
        };
        relationship.push_evidence(EvidenceSpan {
            text: self.evidence,
            source_document: self.source_document,
            page_number: self.page_number,
            chunk_id: self.chunk_id,
        });
        relationship
    }
}

/// Provenance-only record of an ingested document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub chunk_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_round_trips_through_display() {
        let id = EntityId(42);
        assert_eq!(id.to_string(), "e_42");
        assert_eq!("e_42".parse::<EntityId>().unwrap(), id);
        assert_eq!("42".parse::<EntityId>().unwrap(), id);
        assert!("acme".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_absorb_mention_running_average() {
        let first = Mention::new("John Smith", EntityType::Person, 0.9, "doc1");
        let mut entity = Entity::from_mention(EntityId(1), &first, false);

        entity.absorb_mention(&Mention::new("J. Smith", EntityType::Person, 0.6, "doc2"));

        assert_eq!(entity.mention_count, 2);
        assert!((entity.confidence - 0.75).abs() < 1e-9);
        assert_eq!(entity.canonical_name, "John Smith");
        assert_eq!(entity.source_documents.len(), 2);

        entity.absorb_mention(&Mention::new("Johnny Smith", EntityType::Person, 0.95, "doc2"));
        assert_eq!(entity.canonical_name, "Johnny Smith");
        assert!((entity.confidence - (0.75 * 2.0 + 0.95) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_evidence_is_deduplicated_and_capped() {
        let mut relationship = NewRelationship::new(
            EntityId(1),
            EntityId(2),
            RelationshipType::Owns,
            0.5,
        )
        .with_evidence("span 0")
        .with_provenance("doc", None)
        .into_relationship(RelationshipId(1));

        relationship.push_evidence(EvidenceSpan {
            text: "span 0".into(),
            source_document: "doc".into(),
            page_number: None,
            chunk_id: Some("other-chunk".into()),
        });
        assert_eq!(relationship.evidence.len(), 1);

        for i in 1..50 {
            relationship.push_evidence(EvidenceSpan {
                text: format!("span {}", i),
                source_document: "doc".into(),
                page_number: Some(i),
                chunk_id: None,
            });
        }
        assert_eq!(relationship.evidence.len(), MAX_EVIDENCE_SPANS);
    }
}
