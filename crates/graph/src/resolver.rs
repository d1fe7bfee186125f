//! Entity resolution: decides which canonical entity a raw mention belongs to.
//!
//! Exact matching on `(type, comparison key)` comes first; a per-type fuzzy
//! fallback is the only source of false merges and is configured through
//! [`ResolverConfig`]. Fuzzy decisions depend on what was merged before, so
//! replaying mentions in a different order may legitimately produce a
//! different set of entities. Replaying the same order is deterministic.

use extract::{ComparisonKey, EntityNormalizer, EntityType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::model::{Entity, EntityId, Mention};
use crate::similarity::{SimilarityAlgorithm, similarity};

pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub algorithm: SimilarityAlgorithm,
    pub threshold: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            algorithm: SimilarityAlgorithm::TokenAware,
            threshold: DEFAULT_MERGE_THRESHOLD,
        }
    }
}

impl MatchPolicy {
    pub fn exact_only() -> Self {
        Self {
            algorithm: SimilarityAlgorithm::ExactOnly,
            threshold: 1.0,
        }
    }
}

/// Which keys a mention is fuzzy-compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzyPool {
    /// Every key indexed so far, including those of fuzzily merged aliases.
    #[default]
    AllKeys,
    /// Only the key of each entity's current canonical name.
    CanonicalNames,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub default_policy: MatchPolicy,
    pub per_type: BTreeMap<EntityType, MatchPolicy>,
    pub fuzzy_pool: FuzzyPool,
    /// Alias expansion table handed to the normalizer.
    pub aliases: BTreeMap<String, String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        // Identifiers differ meaningfully by a single character.
        let per_type = [
            EntityType::Phone,
            EntityType::Email,
            EntityType::Legal,
            EntityType::Money,
            EntityType::Date,
        ]
        .into_iter()
        .map(|t| (t, MatchPolicy::exact_only()))
        .collect();

        Self {
            default_policy: MatchPolicy::default(),
            per_type,
            fuzzy_pool: FuzzyPool::default(),
            aliases: BTreeMap::new(),
        }
    }
}

impl ResolverConfig {
    pub fn policy_for(&self, entity_type: EntityType) -> MatchPolicy {
        self.per_type
            .get(&entity_type)
            .copied()
            .unwrap_or(self.default_policy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy { score: f64 },
    New,
    /// Empty comparison key: always a fresh, low-confidence entity.
    Unmergeable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub entity_id: EntityId,
    pub created: bool,
    pub matched_by: MatchKind,
}

pub struct EntityResolver {
    config: ResolverConfig,
    normalizer: EntityNormalizer,
    entities: BTreeMap<EntityId, Entity>,
    exact: HashMap<(EntityType, ComparisonKey), EntityId>,
    /// Every indexed key per type, the candidate pool for fuzzy matching
    by_type: HashMap<EntityType, Vec<(ComparisonKey, EntityId)>>,
    next_id: u64,
}

impl EntityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let normalizer = EntityNormalizer::with_aliases(config.aliases.clone());
        Self {
            config,
            normalizer,
            entities: BTreeMap::new(),
            exact: HashMap::new(),
            by_type: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &EntityNormalizer {
        &self.normalizer
    }

    /// Assign a mention to an existing canonical entity or create a new one.
    ///
    /// A fuzzy merge indexes the mention's key as well, and with
    /// [`FuzzyPool::AllKeys`] that key joins the fuzzy pool. Short forms can
    /// then bridge distinct names: after "J. Smith" joins "John Smith",
    /// "Jane Smith" scores 0.95 against "j smith" and lands there too. Use
    /// [`FuzzyPool::CanonicalNames`] to compare against canonical names only.
    pub fn resolve(&mut self, mention: &Mention) -> Resolution {
        let key = self.normalizer.normalize(&mention.text, mention.entity_type);

        if key.is_empty() {
            let entity_id = self.create(mention, true);
            debug!(entity_id = %entity_id, text = %mention.text, "Unmergeable mention, created flagged entity");
            return Resolution {
                entity_id,
                created: true,
                matched_by: MatchKind::Unmergeable,
            };
        }

        if let Some(&entity_id) = self.exact.get(&(mention.entity_type, key.clone())) {
            self.absorb(entity_id, mention);
            return Resolution {
                entity_id,
                created: false,
                matched_by: MatchKind::Exact,
            };
        }

        if let Some((entity_id, score)) = self.best_fuzzy_candidate(&key, mention.entity_type) {
            self.absorb(entity_id, mention);
            self.index_key(mention.entity_type, key, entity_id);
            debug!(
                entity_id = %entity_id,
                text = %mention.text,
                score,
                "Fuzzy merge"
            );
            return Resolution {
                entity_id,
                created: false,
                matched_by: MatchKind::Fuzzy { score },
            };
        }

        let entity_id = self.create(mention, false);
        self.index_key(mention.entity_type, key, entity_id);
        Resolution {
            entity_id,
            created: true,
            matched_by: MatchKind::New,
        }
    }

    /// Exact-key lookup without mutating anything. With no type given, types
    /// are tried in declaration order.
    pub fn lookup(&self, text: &str, entity_type: Option<EntityType>) -> Option<EntityId> {
        let types: &[EntityType] = match &entity_type {
            Some(t) => std::slice::from_ref(t),
            None => &EntityType::ALL,
        };
        types.iter().find_map(|&t| {
            let key = self.normalizer.normalize(text, t);
            if key.is_empty() {
                None
            } else {
                self.exact.get(&(t, key)).copied()
            }
        })
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Next id to be handed out; ids are never reused.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Drop an entity and every key that pointed at it.
    pub fn forget(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        self.exact.retain(|_, entity_id| *entity_id != id);
        if let Some(keys) = self.by_type.get_mut(&entity.entity_type) {
            keys.retain(|(_, entity_id)| *entity_id != id);
        }
        Some(entity)
    }

    /// Fold `absorbed` into `kept`. Keys of the absorbed entity now resolve to
    /// the kept one. Returns the updated kept entity.
    pub fn absorb_entity(&mut self, kept: EntityId, absorbed: EntityId) -> Result<Entity> {
        if kept == absorbed {
            return Err(GraphError::SelfMerge(kept));
        }
        let kept_entity = self
            .entities
            .get(&kept)
            .ok_or_else(|| GraphError::UnknownEntity(kept.to_string()))?;
        let absorbed_entity = self
            .entities
            .get(&absorbed)
            .ok_or_else(|| GraphError::UnknownEntity(absorbed.to_string()))?;

        if kept_entity.entity_type != absorbed_entity.entity_type {
            return Err(GraphError::TypeMismatch {
                kept,
                kept_type: kept_entity.entity_type,
                absorbed,
                absorbed_type: absorbed_entity.entity_type,
            });
        }

        let absorbed_entity = self
            .entities
            .remove(&absorbed)
            .ok_or_else(|| GraphError::UnknownEntity(absorbed.to_string()))?;

        for entity_id in self.exact.values_mut() {
            if *entity_id == absorbed {
                *entity_id = kept;
            }
        }
        if let Some(keys) = self.by_type.get_mut(&absorbed_entity.entity_type) {
            for (_, entity_id) in keys.iter_mut() {
                if *entity_id == absorbed {
                    *entity_id = kept;
                }
            }
        }

        let kept_entity = self
            .entities
            .get_mut(&kept)
            .ok_or_else(|| GraphError::UnknownEntity(kept.to_string()))?;
        kept_entity.absorb_entity(&absorbed_entity);
        Ok(kept_entity.clone())
    }

    /// Rebuild indices from previously persisted entities.
    ///
    /// When two entities claim the same key, the one with more mentions
    /// (then the smaller id) keeps it.
    pub fn rebuild<I>(config: ResolverConfig, entities: I, next_id: u64) -> Self
    where
        I: IntoIterator<Item = Entity>,
    {
        let mut resolver = Self::new(config);
        for entity in entities {
            resolver.next_id = resolver.next_id.max(entity.id.0 + 1);
            resolver.entities.insert(entity.id, entity);
        }
        resolver.next_id = resolver.next_id.max(next_id);

        let mut claims: BTreeMap<(EntityType, ComparisonKey), EntityId> = BTreeMap::new();
        for entity in resolver.entities.values() {
            let surface_forms = std::iter::once(&entity.canonical_name).chain(entity.aliases.iter());
            for text in surface_forms {
                let key = resolver.normalizer.normalize(text, entity.entity_type);
                if key.is_empty() {
                    continue;
                }
                claims
                    .entry((entity.entity_type, key))
                    .and_modify(|holder| {
                        if resolver.prefer(entity.id, *holder) {
                            *holder = entity.id;
                        }
                    })
                    .or_insert(entity.id);
            }
        }

        for ((entity_type, key), entity_id) in claims {
            resolver.index_key(entity_type, key, entity_id);
        }
        resolver
    }

    fn create(&mut self, mention: &Mention, low_confidence: bool) -> EntityId {
        let entity_id = EntityId(self.next_id);
        self.next_id += 1;
        self.entities
            .insert(entity_id, Entity::from_mention(entity_id, mention, low_confidence));
        entity_id
    }

    fn absorb(&mut self, entity_id: EntityId, mention: &Mention) {
        if let Some(entity) = self.entities.get_mut(&entity_id) {
            entity.absorb_mention(mention);
        }
    }

    fn index_key(&mut self, entity_type: EntityType, key: ComparisonKey, entity_id: EntityId) {
        self.by_type
            .entry(entity_type)
            .or_default()
            .push((key.clone(), entity_id));
        self.exact.insert((entity_type, key), entity_id);
    }

    /// True when `candidate` should win a tie against `incumbent`.
    fn prefer(&self, candidate: EntityId, incumbent: EntityId) -> bool {
        let count = |id: EntityId| self.entities.get(&id).map_or(0, |e| e.mention_count);
        (count(candidate), std::cmp::Reverse(candidate)) > (count(incumbent), std::cmp::Reverse(incumbent))
    }

    fn best_fuzzy_candidate(&self, key: &ComparisonKey, entity_type: EntityType) -> Option<(EntityId, f64)> {
        let policy = self.config.policy_for(entity_type);
        if policy.algorithm == SimilarityAlgorithm::ExactOnly {
            return None;
        }

        let candidates: Vec<(ComparisonKey, EntityId)> = match self.config.fuzzy_pool {
            FuzzyPool::AllKeys => self.by_type.get(&entity_type)?.clone(),
            FuzzyPool::CanonicalNames => self
                .entities
                .values()
                .filter(|entity| entity.entity_type == entity_type)
                .map(|entity| (self.normalizer.normalize(&entity.canonical_name, entity_type), entity.id))
                .filter(|(candidate_key, _)| !candidate_key.is_empty())
                .collect(),
        };

        let mut best: Option<(EntityId, f64)> = None;
        for (candidate_key, entity_id) in &candidates {
            let score = similarity(key, candidate_key, policy.algorithm);
            if score < policy.threshold {
                continue;
            }
            best = match best {
                None => Some((*entity_id, score)),
                Some((holder, best_score)) => {
                    let better = score > best_score
                        || (score == best_score && self.prefer(*entity_id, holder));
                    if better { Some((*entity_id, score)) } else { Some((holder, best_score)) }
                }
            };
        }
        best
    }
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mention(text: &str, entity_type: EntityType, confidence: f64, doc: &str) -> Mention {
        Mention::new(text, entity_type, confidence, doc)
    }

    #[test]
    fn test_exact_key_mentions_converge() {
        let mut resolver = EntityResolver::default();
        let a = resolver.resolve(&mention("ACME Corp.", EntityType::Organization, 0.9, "d1"));
        let b = resolver.resolve(&mention("acme, inc", EntityType::Organization, 0.7, "d2"));
        let c = resolver.resolve(&mention("ACME", EntityType::Organization, 0.8, "d3"));

        assert_eq!(a.matched_by, MatchKind::New);
        assert_eq!(b.matched_by, MatchKind::Exact);
        assert_eq!(a.entity_id, b.entity_id);
        assert_eq!(a.entity_id, c.entity_id);

        let entity = resolver.entity(a.entity_id).unwrap();
        assert_eq!(entity.mention_count, 3);
        assert_eq!(entity.aliases.len(), 3);
        assert!(entity.aliases.contains("ACME Corp."));
        assert_eq!(entity.source_documents.len(), 3);
    }

    #[test]
    fn test_exact_key_convergence_is_order_independent() {
        let texts = ["Jane Doe", "jane doe", "Doe, Jane", "Ms. Jane Doe"];
        let orders = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]];

        for order in orders {
            let mut resolver = EntityResolver::default();
            for i in order {
                resolver.resolve(&mention(texts[i], EntityType::Person, 0.8, "d"));
            }
            assert_eq!(resolver.len(), 1);
            assert_eq!(resolver.entities().next().unwrap().mention_count, 4);
        }
    }

    #[test]
    fn test_never_merges_across_types() {
        let mut resolver = EntityResolver::default();
        let person = resolver.resolve(&mention("Amazon", EntityType::Person, 0.9, "d1"));
        let org = resolver.resolve(&mention("Amazon", EntityType::Organization, 0.9, "d1"));

        assert_ne!(person.entity_id, org.entity_id);
        assert!(org.created);
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_fuzzy_merge_of_initials() {
        let mut resolver = EntityResolver::default();
        let first = resolver.resolve(&mention("John Smith", EntityType::Person, 0.9, "doc1"));
        let second = resolver.resolve(&mention("J. Smith", EntityType::Person, 0.8, "doc2"));

        assert_eq!(first.entity_id, second.entity_id);
        assert!(matches!(second.matched_by, MatchKind::Fuzzy { score } if score >= 0.85));

        let entity = resolver.entity(first.entity_id).unwrap();
        assert_eq!(entity.mention_count, 2);
        assert_eq!(entity.canonical_name, "John Smith");
        assert!((entity.confidence - 0.85).abs() < 1e-9);

        // The fuzzy alias is now an exact key.
        let third = resolver.resolve(&mention("j smith", EntityType::Person, 0.5, "doc3"));
        assert_eq!(third.matched_by, MatchKind::Exact);
    }

    #[test]
    fn test_fuzzy_alias_keys_can_bridge_names() {
        let texts = ["John Smith", "J. Smith", "Jane Smith"];

        let mut resolver = EntityResolver::default();
        let ids: Vec<EntityId> = texts
            .iter()
            .map(|text| resolver.resolve(&mention(text, EntityType::Person, 0.9, "d")).entity_id)
            .collect();
        assert_eq!(ids[0], ids[1]);
        assert_eq!(ids[0], ids[2]);

        let config = ResolverConfig {
            fuzzy_pool: FuzzyPool::CanonicalNames,
            ..ResolverConfig::default()
        };
        let mut resolver = EntityResolver::new(config);
        let ids: Vec<EntityId> = texts
            .iter()
            .map(|text| resolver.resolve(&mention(text, EntityType::Person, 0.9, "d")).entity_id)
            .collect();
        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[0], ids[2]);
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_threshold_is_tunable_per_type() {
        let mut config = ResolverConfig::default();
        config.per_type.insert(
            EntityType::Person,
            MatchPolicy {
                algorithm: SimilarityAlgorithm::TokenAware,
                threshold: 0.99,
            },
        );
        let mut resolver = EntityResolver::new(config);
        let first = resolver.resolve(&mention("John Smith", EntityType::Person, 0.9, "doc1"));
        let second = resolver.resolve(&mention("J. Smith", EntityType::Person, 0.8, "doc2"));
        assert_ne!(first.entity_id, second.entity_id);
    }

    #[test]
    fn test_identifiers_are_exact_only_by_default() {
        let mut resolver = EntityResolver::default();
        let a = resolver.resolve(&mention("555-123-4567", EntityType::Phone, 0.9, "d"));
        let b = resolver.resolve(&mention("555-123-4568", EntityType::Phone, 0.9, "d"));
        assert_ne!(a.entity_id, b.entity_id);
    }

    #[test]
    fn test_empty_text_is_never_merged() {
        let mut resolver = EntityResolver::default();
        let a = resolver.resolve(&mention("  ", EntityType::Person, 0.4, "d"));
        let b = resolver.resolve(&mention("...", EntityType::Person, 0.4, "d"));

        assert_eq!(a.matched_by, MatchKind::Unmergeable);
        assert_ne!(a.entity_id, b.entity_id);
        assert!(resolver.entity(a.entity_id).unwrap().low_confidence);
    }

    #[test]
    fn test_fuzzy_ties_prefer_mention_count_then_id() {
        let config = ResolverConfig {
            default_policy: MatchPolicy {
                algorithm: SimilarityAlgorithm::EditDistance,
                threshold: 0.75,
            },
            ..ResolverConfig::default()
        };

        // "abcdeh" is one edit away from both "abcdef" and "abcdgh".
        let mut resolver = EntityResolver::new(config.clone());
        let a = resolver.resolve(&mention("abcdef", EntityType::Event, 0.9, "d")).entity_id;
        let b = resolver.resolve(&mention("abcdgh", EntityType::Event, 0.9, "d")).entity_id;
        assert_ne!(a, b);
        resolver.resolve(&mention("abcdgh", EntityType::Event, 0.9, "d"));
        let tie = resolver.resolve(&mention("abcdeh", EntityType::Event, 0.9, "d"));
        assert_eq!(tie.entity_id, b);

        let mut resolver = EntityResolver::new(config);
        let a = resolver.resolve(&mention("abcdef", EntityType::Event, 0.9, "d")).entity_id;
        resolver.resolve(&mention("abcdgh", EntityType::Event, 0.9, "d"));
        let tie = resolver.resolve(&mention("abcdeh", EntityType::Event, 0.9, "d"));
        assert_eq!(tie.entity_id, a);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let run = || {
            let mut resolver = EntityResolver::default();
            let inputs = ["Robert Brown", "R. Brown", "Bob Brown", "Roberta Brown", "R Brown"];
            inputs
                .iter()
                .map(|t| resolver.resolve(&mention(t, EntityType::Person, 0.7, "d")).entity_id)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_forget_and_absorb() {
        let mut resolver = EntityResolver::default();
        let a = resolver.resolve(&mention("Jane Roe", EntityType::Person, 0.6, "d1")).entity_id;
        let b = resolver.resolve(&mention("Janet Q. Roe", EntityType::Person, 0.9, "d2")).entity_id;
        let c = resolver.resolve(&mention("Roe Holdings", EntityType::Organization, 0.9, "d2")).entity_id;
        assert_ne!(a, b);

        assert!(matches!(
            resolver.absorb_entity(a, c),
            Err(GraphError::TypeMismatch { .. })
        ));

        let merged = resolver.absorb_entity(a, b).unwrap();
        assert_eq!(merged.mention_count, 2);
        assert_eq!(merged.canonical_name, "Janet Q. Roe");
        assert!((merged.confidence - 0.75).abs() < 1e-9);
        assert_eq!(resolver.lookup("Janet Q. Roe", Some(EntityType::Person)), Some(a));

        resolver.forget(a);
        assert_eq!(resolver.lookup("Jane Roe", None), None);
        assert_eq!(resolver.lookup("Roe Holdings", None), Some(c));

        let fresh = resolver.resolve(&mention("Jane Roe", EntityType::Person, 0.6, "d3"));
        assert!(fresh.entity_id.0 > c.0, "ids are never reused");
    }

    #[test]
    fn test_rebuild_restores_index() {
        let mut resolver = EntityResolver::default();
        let id = resolver.resolve(&mention("John Smith", EntityType::Person, 0.9, "d1")).entity_id;
        resolver.resolve(&mention("J. Smith", EntityType::Person, 0.8, "d2"));
        let entities: Vec<Entity> = resolver.entities().cloned().collect();

        let rebuilt = EntityResolver::rebuild(ResolverConfig::default(), entities, resolver.next_id());
        assert_eq!(rebuilt.lookup("J. Smith", Some(EntityType::Person)), Some(id));
        assert_eq!(rebuilt.next_id(), resolver.next_id());
    }
}
