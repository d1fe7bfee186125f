use extract::ComparisonKey;
use serde::{Deserialize, Serialize};

/// Score given to a single-letter token that is the initial of the other token.
const INITIAL_MATCH_SCORE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityAlgorithm {
    /// Token alignment aware of initials ("j smith" ~ "john smith").
    TokenAware,
    /// Normalized Levenshtein over the whole key.
    EditDistance,
    /// No fuzzy fallback at all.
    ExactOnly,
}

/// Bounded similarity in [0, 1] between two comparison keys.
pub fn similarity(a: &ComparisonKey, b: &ComparisonKey, algorithm: SimilarityAlgorithm) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    match algorithm {
        SimilarityAlgorithm::TokenAware => token_alignment(a, b),
        SimilarityAlgorithm::EditDistance => strsim::normalized_levenshtein(a.as_str(), b.as_str()),
        SimilarityAlgorithm::ExactOnly => 0.0,
    }
}

fn token_score(x: &str, y: &str) -> f64 {
    if x == y {
        return 1.0;
    }
    let is_initial_of = |short: &str, long: &str| short.chars().count() == 1 && long.starts_with(short);
    if is_initial_of(x, y) || is_initial_of(y, x) {
        return INITIAL_MATCH_SCORE;
    }
    strsim::normalized_levenshtein(x, y)
}

/// Greedy best-first pairing of tokens, averaged over the longer key.
fn token_alignment(a: &ComparisonKey, b: &ComparisonKey) -> f64 {
    let left: Vec<&str> = a.tokens().collect();
    let right: Vec<&str> = b.tokens().collect();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let mut pairs = Vec::with_capacity(left.len() * right.len());
    for (i, x) in left.iter().enumerate() {
        for (j, y) in right.iter().enumerate() {
            pairs.push((token_score(x, y), i, j));
        }
    }
    pairs.sort_by(|p, q| q.0.total_cmp(&p.0).then(p.1.cmp(&q.1)).then(p.2.cmp(&q.2)));

    let mut left_used = vec![false; left.len()];
    let mut right_used = vec![false; right.len()];
    let mut total = 0.0;
    for (score, i, j) in pairs {
        if left_used[i] || right_used[j] {
            continue;
        }
        left_used[i] = true;
        right_used[j] = true;
        total += score;
    }

    total / left.len().max(right.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{EntityNormalizer, EntityType};

    fn key(text: &str) -> ComparisonKey {
        EntityNormalizer::new().normalize(text, EntityType::Person)
    }

    #[test]
    fn test_initials_score_high() {
        let score = similarity(&key("John Smith"), &key("J. Smith"), SimilarityAlgorithm::TokenAware);
        assert!((score - 0.95).abs() < 1e-9, "score was {}", score);
    }

    #[test]
    fn test_different_initials_score_low() {
        let score = similarity(&key("J. Smith"), &key("K. Smith"), SimilarityAlgorithm::TokenAware);
        assert!(score < 0.85, "score was {}", score);

        let score = similarity(&key("Jane Doe"), &key("John Doe"), SimilarityAlgorithm::TokenAware);
        assert!(score < 0.85, "score was {}", score);
    }

    #[test]
    fn test_exact_only_never_matches_fuzzily() {
        let score = similarity(&key("John Smith"), &key("Jon Smith"), SimilarityAlgorithm::ExactOnly);
        assert_eq!(score, 0.0);
        assert_eq!(
            similarity(&key("John Smith"), &key("John Smith"), SimilarityAlgorithm::ExactOnly),
            1.0
        );
    }

    #[test]
    fn test_empty_keys_never_match() {
        assert_eq!(
            similarity(&ComparisonKey::empty(), &ComparisonKey::empty(), SimilarityAlgorithm::EditDistance),
            0.0
        );
    }
}
