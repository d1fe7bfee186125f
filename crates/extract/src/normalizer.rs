use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use crate::schema::EntityType;

/// "Last, First" with exactly one comma.
static LAST_FIRST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^,]+?)\s*,\s*([^,]+?)\s*$").expect("valid regex"));

const HONORIFICS: &[&str] = &[
    "mr", "mrs", "ms", "miss", "mx", "dr", "prof", "sir", "dame", "rev", "hon", "sen", "rep",
    "gov", "gen", "col", "capt", "lt", "sgt",
];

const PERSON_SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "phd", "md", "esq"];

const CORPORATE_SUFFIXES: &[&str] = &[
    "inc", "incorporated", "llc", "ltd", "limited", "corp", "corporation", "co", "company", "plc",
    "gmbh", "sa", "ag",
];

/// Folded form of a surface string used to decide whether two mentions name
/// the same thing. The empty key is reserved for unusable text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComparisonKey(String);

impl ComparisonKey {
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ').filter(|t| !t.is_empty())
    }
}

impl fmt::Display for ComparisonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityNormalizer {
    /// Maps a folded alias -> the text it expands to
    aliases: HashMap<String, String>,
}

impl EntityNormalizer {
    pub fn new() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    /// Build a normalizer with an alias expansion table, e.g. `USA -> United States`.
    pub fn with_aliases<I, K, V>(aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let aliases = aliases
            .into_iter()
            .map(|(alias, target)| (fold_tokens(&alias.as_ref().to_lowercase()).join(" "), target.into()))
            .filter(|(alias, _)| !alias.is_empty())
            .collect();
        Self { aliases }
    }

    /// Normalize a raw mention into its comparison key.
    ///
    /// Lowercases, collapses whitespace, strips punctuation at token edges,
    /// then applies the type-specific rules (honorifics and "Last, First" for
    /// people, corporate suffixes for organizations) and alias expansion.
    pub fn normalize(&self, raw: &str, entity_type: EntityType) -> ComparisonKey {
        let key = normalize_for_type(raw, entity_type);
        if key.is_empty() {
            return key;
        }

        // Single level of expansion: targets are not expanded again.
        match self.aliases.get(key.as_str()) {
            Some(target) => {
                let expanded = normalize_for_type(target, entity_type);
                if expanded.is_empty() { key } else { expanded }
            }
            None => key,
        }
    }
}

fn normalize_for_type(raw: &str, entity_type: EntityType) -> ComparisonKey {
    let lowered = raw.to_lowercase();

    let mut tokens = match entity_type {
        EntityType::Person => fold_tokens(&reorder_last_first(&lowered)),
        _ => fold_tokens(&lowered),
    };

    match entity_type {
        EntityType::Person => {
            while tokens.len() > 1 && HONORIFICS.contains(&tokens[0].as_str()) {
                tokens.remove(0);
            }
            strip_trailing(&mut tokens, PERSON_SUFFIXES);
        }
        EntityType::Organization => strip_trailing(&mut tokens, CORPORATE_SUFFIXES),
        _ => {}
    }

    ComparisonKey(tokens.join(" "))
}

/// "smith, john" -> "john smith"; "john smith, jr." -> "john smith jr."
fn reorder_last_first(text: &str) -> String {
    let Some(captures) = LAST_FIRST.captures(text) else {
        return text.to_string();
    };
    let last = &captures[1];
    let first = &captures[2];

    let first_folded = fold_tokens(first);
    let is_suffix = first_folded.len() == 1 && PERSON_SUFFIXES.contains(&first_folded[0].as_str());
    if is_suffix {
        format!("{} {}", last, first)
    } else {
        format!("{} {}", first, last)
    }
}

fn fold_tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_trailing(tokens: &mut Vec<String>, suffixes: &[&str]) {
    while tokens.len() > 1
        && tokens
            .last()
            .is_some_and(|token| suffixes.contains(&token.as_str()))
    {
        tokens.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str, entity_type: EntityType) -> String {
        EntityNormalizer::new().normalize(text, entity_type).to_string()
    }

    #[test]
    fn test_normalization() {
        assert_eq!(key("GraphRAG", EntityType::Event), "graphrag");
        assert_eq!(key("GraphRAG!", EntityType::Event), "graphrag");
        assert_eq!(key("  Graph   RAG  ", EntityType::Event), "graph rag");
    }

    #[test]
    fn test_person_rules() {
        assert_eq!(key("Dr. John Smith", EntityType::Person), "john smith");
        assert_eq!(key("Smith, John", EntityType::Person), "john smith");
        assert_eq!(key("J. Smith", EntityType::Person), "j smith");
        assert_eq!(key("John Smith, Jr.", EntityType::Person), "john smith");
        // A lone honorific is still a name.
        assert_eq!(key("Mr.", EntityType::Person), "mr");
    }

    #[test]
    fn test_organization_suffixes() {
        assert_eq!(key("ACME Corp.", EntityType::Organization), "acme");
        assert_eq!(key("ACME, Inc.", EntityType::Organization), "acme");
        assert_eq!(key("Widgets Co LLC", EntityType::Organization), "widgets");
        assert_eq!(key("Inc.", EntityType::Organization), "inc");
        // Suffix rules are type-specific.
        assert_eq!(key("ACME Corp", EntityType::Location), "acme corp");
    }

    #[test]
    fn test_empty_text_yields_reserved_key() {
        assert!(EntityNormalizer::new().normalize("   ", EntityType::Person).is_empty());
        assert!(EntityNormalizer::new().normalize("?!.", EntityType::Location).is_empty());
    }

    #[test]
    fn test_alias_resolution() {
        let normalizer = EntityNormalizer::with_aliases([("USA", "United States")]);

        let n1 = normalizer.normalize("USA", EntityType::Location);
        let n2 = normalizer.normalize("United States", EntityType::Location);

        assert_eq!(n1, n2);
        assert_eq!(n1.as_str(), "united states");
    }
}
