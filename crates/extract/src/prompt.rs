use crate::schema::{ChunkInput, EntityType};

const RELATIONSHIP_TYPES: &[&str] = &[
    "works_at",
    "employed_by",
    "located_in",
    "based_in",
    "attended",
    "participated_in",
    "mentioned_in",
    "associated_with",
    "owns",
    "controls",
    "transacted_with",
    "communicated_with",
];

pub fn build_extraction_prompt(chunk: &ChunkInput) -> String {
    let entity_types = EntityType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let page_info = match chunk.page_number {
        Some(page) => format!("Page {}", page),
        None => "Unknown page".to_string(),
    };

    format!(
        r#"Extract entities and relationships from the following text.

INSTRUCTIONS:
1. Identify every named entity of these types: {entity_types}
2. Extract relationships you can support with a quote from the text
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"text": "John Smith", "type": "PERSON", "confidence": 0.95}}
  ],
  "relationships": [
    {{"source_text": "John Smith", "target_text": "ACME Corporation", "relationship_type": "works_at", "confidence": 0.88, "evidence": "John Smith is CEO of ACME Corporation"}}
  ]
}}

RULES:
- "text" must be the entity exactly as it appears in the document
- "source_text" and "target_text" must repeat the "text" of an extracted entity
- Relationship types should be one of: {relationship_types}
- Confidence is a number between 0.0 and 1.0; do not default to 0.9
- Evidence must be a direct quote from the text
- Output ONLY the JSON object, no markdown, no explanations

Document ID: {document_id}
{page_info}

TEXT:
{text}

JSON OUTPUT:"#,
        entity_types = entity_types,
        relationship_types = RELATIONSHIP_TYPES.join(", "),
        document_id = chunk.document_id,
        page_info = page_info,
        text = chunk.text,
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}
