use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of entity kinds the graph understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Event,
    Date,
    Document,
    Phone,
    Email,
    Money,
    Legal,
    Vehicle,
}

impl EntityType {
    pub const ALL: [EntityType; 11] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Location,
        EntityType::Event,
        EntityType::Date,
        EntityType::Document,
        EntityType::Phone,
        EntityType::Email,
        EntityType::Money,
        EntityType::Legal,
        EntityType::Vehicle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Organization => "ORGANIZATION",
            EntityType::Location => "LOCATION",
            EntityType::Event => "EVENT",
            EntityType::Date => "DATE",
            EntityType::Document => "DOCUMENT",
            EntityType::Phone => "PHONE",
            EntityType::Email => "EMAIL",
            EntityType::Money => "MONEY",
            EntityType::Legal => "LEGAL",
            EntityType::Vehicle => "VEHICLE",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    /// Accepts our own labels case-insensitively, plus the spaCy NER labels
    /// local extractors emit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_uppercase();
        let entity_type = match label.as_str() {
            "PERSON" | "PER" => EntityType::Person,
            "ORGANIZATION" | "ORGANISATION" | "ORG" | "NORP" => EntityType::Organization,
            "LOCATION" | "GPE" | "LOC" | "FAC" => EntityType::Location,
            "EVENT" => EntityType::Event,
            "DATE" | "TIME" => EntityType::Date,
            "DOCUMENT" | "WORK_OF_ART" => EntityType::Document,
            "PHONE" => EntityType::Phone,
            "EMAIL" => EntityType::Email,
            "MONEY" | "PERCENT" => EntityType::Money,
            "LEGAL" | "LAW" => EntityType::Legal,
            "VEHICLE" => EntityType::Vehicle,
            _ => return Err(format!("unknown entity type '{}'", s)),
        };
        Ok(entity_type)
    }
}

/// Relationship labels. Anything outside the closed set is kept as `Other`
/// with its free text folded to snake_case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RelationshipType {
    WorksAt,
    EmployedBy,
    LocatedIn,
    BasedIn,
    Attended,
    ParticipatedIn,
    MentionedIn,
    AssociatedWith,
    Owns,
    Controls,
    TransactedWith,
    CommunicatedWith,
    Other(String),
}

impl RelationshipType {
    /// Returns `None` for blank labels.
    pub fn parse(raw: &str) -> Option<Self> {
        let folded = raw
            .trim()
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c == '-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_");

        if folded.is_empty() {
            return None;
        }

        let relationship_type = match folded.as_str() {
            "works_at" => RelationshipType::WorksAt,
            "employed_by" => RelationshipType::EmployedBy,
            "located_in" => RelationshipType::LocatedIn,
            "based_in" => RelationshipType::BasedIn,
            "attended" => RelationshipType::Attended,
            "participated_in" => RelationshipType::ParticipatedIn,
            "mentioned_in" => RelationshipType::MentionedIn,
            "associated_with" => RelationshipType::AssociatedWith,
            "owns" => RelationshipType::Owns,
            "controls" => RelationshipType::Controls,
            "transacted_with" => RelationshipType::TransactedWith,
            "communicated_with" => RelationshipType::CommunicatedWith,
            _ => RelationshipType::Other(folded),
        };
        Some(relationship_type)
    }

    pub fn as_str(&self) -> &str {
        match self {
            RelationshipType::WorksAt => "works_at",
            RelationshipType::EmployedBy => "employed_by",
            RelationshipType::LocatedIn => "located_in",
            RelationshipType::BasedIn => "based_in",
            RelationshipType::Attended => "attended",
            RelationshipType::ParticipatedIn => "participated_in",
            RelationshipType::MentionedIn => "mentioned_in",
            RelationshipType::AssociatedWith => "associated_with",
            RelationshipType::Owns => "owns",
            RelationshipType::Controls => "controls",
            RelationshipType::TransactedWith => "transacted_with",
            RelationshipType::CommunicatedWith => "communicated_with",
            RelationshipType::Other(text) => text,
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RelationshipType> for String {
    fn from(value: RelationshipType) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for RelationshipType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RelationshipType::parse(&value).ok_or_else(|| "empty relationship type".to_string())
    }
}

/// One text chunk handed over by document ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkInput {
    pub document_id: String,
    pub text: String,
    #[serde(default)]
    pub page_number: Option<u32>,
}

impl ChunkInput {
    pub fn new(document_id: impl Into<String>, text: impl Into<String>, page_number: Option<u32>) -> Self {
        Self {
            document_id: document_id.into(),
            text: text.into(),
            page_number,
        }
    }

    /// Stable chunk id derived from document, page and content.
    pub fn chunk_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.document_id.as_bytes());
        hasher.update(self.page_number.unwrap_or(0).to_string().as_bytes());
        hasher.update(self.text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

/// A validated entity mention, still referring to nothing but its text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub confidence: f64,
}

/// A validated relationship between two textual mentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipMention {
    pub source_text: String,
    pub target_text: String,
    pub relationship_type: RelationshipType,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionBatch {
    pub entities: Vec<EntityMention>,
    pub relationships: Vec<RelationshipMention>,
}

/// Extraction output with the items that failed validation.
#[derive(Debug, Clone, Default)]
pub struct ValidatedBatch {
    pub batch: ExtractionBatch,
    pub rejected: Vec<ValidationError>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("malformed entity mention #{index}: {reason}")]
    MalformedMention { index: usize, reason: String },

    #[error("malformed relationship #{index}: {reason}")]
    MalformedRelationship { index: usize, reason: String },

    #[error("malformed extraction batch: {0}")]
    MalformedBatch(String),
}

impl ExtractionBatch {
    /// Validate a loosely-typed extractor response item by item.
    ///
    /// Only a response that is not an object (or whose lists are not lists)
    /// fails as a whole; individual bad items land in `rejected`.
    pub fn from_value(value: &Value) -> Result<ValidatedBatch, ValidationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::MalformedBatch("response is not a JSON object".into()))?;

        let entities = list_field(object, &["entities"])?;
        let relationships = list_field(object, &["relationships", "relations"])?;

        let mut validated = ValidatedBatch::default();

        for (index, item) in entities.iter().enumerate() {
            match parse_entity(item) {
                Ok(mention) => validated.batch.entities.push(mention),
                Err(reason) => validated
                    .rejected
                    .push(ValidationError::MalformedMention { index, reason }),
            }
        }

        for (index, item) in relationships.iter().enumerate() {
            match parse_relationship(item) {
                Ok(relationship) => validated.batch.relationships.push(relationship),
                Err(reason) => validated
                    .rejected
                    .push(ValidationError::MalformedRelationship { index, reason }),
            }
        }

        Ok(validated)
    }
}

fn list_field<'a>(
    object: &'a serde_json::Map<String, Value>,
    names: &[&str],
) -> Result<&'a [Value], ValidationError> {
    for name in names {
        if let Some(field) = object.get(*name) {
            return match field {
                Value::Array(items) => Ok(items.as_slice()),
                Value::Null => Ok(&[] as &[Value]),
                _ => Err(ValidationError::MalformedBatch(format!("'{}' is not a list", name))),
            };
        }
    }
    Ok(&[] as &[Value])
}

fn string_field<'a>(item: &'a Value, names: &[&str]) -> Result<&'a str, String> {
    for name in names {
        if let Some(field) = item.get(*name) {
            return field
                .as_str()
                .ok_or_else(|| format!("field '{}' is not a string", name));
        }
    }
    Err(format!("missing field '{}'", names[0]))
}

fn confidence_field(item: &Value) -> Result<f64, String> {
    let confidence = item
        .get("confidence")
        .ok_or_else(|| "missing field 'confidence'".to_string())?
        .as_f64()
        .ok_or_else(|| "field 'confidence' is not a number".to_string())?;

    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {} outside [0, 1]", confidence));
    }
    Ok(confidence)
}

fn parse_entity(item: &Value) -> Result<EntityMention, String> {
    if !item.is_object() {
        return Err("entity is not an object".into());
    }
    // Blank text is allowed here: the resolver turns it into an unmergeable entity.
    let text = string_field(item, &["text", "name"])?;
    let entity_type = string_field(item, &["type"])?.parse::<EntityType>()?;
    let confidence = confidence_field(item)?;

    Ok(EntityMention {
        text: text.to_string(),
        entity_type,
        confidence,
    })
}

fn parse_relationship(item: &Value) -> Result<RelationshipMention, String> {
    if !item.is_object() {
        return Err("relationship is not an object".into());
    }
    let source_text = string_field(item, &["source_text", "source"])?.trim();
    let target_text = string_field(item, &["target_text", "target"])?.trim();
    if source_text.is_empty() || target_text.is_empty() {
        return Err("relationship endpoint text is blank".into());
    }

    let relationship_type = RelationshipType::parse(string_field(
        item,
        &["relationship_type", "relation", "type"],
    )?)
    .ok_or_else(|| "relationship type is blank".to_string())?;

    let confidence = confidence_field(item)?;
    let evidence = match item.get("evidence") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(_) => return Err("field 'evidence' is not a string".into()),
    };

    Ok(RelationshipMention {
        source_text: source_text.to_string(),
        target_text: target_text.to_string(),
        relationship_type,
        confidence,
        evidence,
    })
}
