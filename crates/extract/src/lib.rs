//! Boundary between the engine and the extraction collaborator: strict
//! records for what the extractor reports, the entity normalizer, and an
//! HTTP client for an Ollama-style model.

pub mod llm;
pub mod normalizer;
pub mod prompt;
pub mod schema;

pub use llm::{ExtractionClient, ExtractionError, OllamaClient, parse_json_response};
pub use normalizer::{ComparisonKey, EntityNormalizer};
pub use schema::{
    ChunkInput, EntityMention, EntityType, ExtractionBatch, RelationshipMention, RelationshipType,
    ValidatedBatch, ValidationError,
};
