//! Petgraph-backed multigraph of canonical entities and typed relationships.
//!
//! The store is the only writer. [`GraphStore::snapshot`] hands out a frozen
//! [`GraphSnapshot`] sharing the same `Arc`; the next mutation clones the inner
//! graph first (`Arc::make_mut`), so analytics keep a consistent view while
//! ingestion carries on.

use extract::RelationshipType;
use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::model::{Entity, EntityId, NewRelationship, Relationship, RelationshipId};

type EdgeKey = (EntityId, EntityId, RelationshipType);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum EdgeOutcome {
    Created(RelationshipId),
    Merged(RelationshipId),
}

impl EdgeOutcome {
    pub fn id(&self) -> RelationshipId {
        match self {
            EdgeOutcome::Created(id) | EdgeOutcome::Merged(id) => *id,
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, EdgeOutcome::Merged(_))
    }
}

#[derive(Debug, Clone, Default)]
struct GraphInner {
    graph: StableDiGraph<Entity, Relationship>,
    nodes: HashMap<EntityId, NodeIndex>,
    edges: HashMap<EdgeKey, EdgeIndex>,
    /// Absorbed id -> kept id, always a single hop.
    redirects: BTreeMap<EntityId, EntityId>,
    revision: u64,
}

impl GraphInner {
    fn canonical(&self, id: EntityId) -> EntityId {
        self.redirects.get(&id).copied().unwrap_or(id)
    }

    fn node(&self, id: EntityId) -> Option<NodeIndex> {
        self.nodes.get(&self.canonical(id)).copied()
    }

    fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.node(id).and_then(|ix| self.graph.node_weight(ix))
    }

    fn entities(&self) -> Vec<&Entity> {
        let mut entities: Vec<&Entity> = self
            .graph
            .node_indices()
            .filter_map(|ix| self.graph.node_weight(ix))
            .collect();
        entities.sort_by_key(|e| e.id);
        entities
    }

    fn relationships(&self) -> Vec<&Relationship> {
        let mut relationships: Vec<&Relationship> = self
            .graph
            .edge_indices()
            .filter_map(|ix| self.graph.edge_weight(ix))
            .collect();
        relationships.sort_by_key(|r| r.id);
        relationships
    }

    fn directed(&self, id: EntityId, direction: Direction) -> Vec<&Relationship> {
        let Some(ix) = self.node(id) else {
            return Vec::new();
        };
        let mut relationships: Vec<&Relationship> = self
            .graph
            .edges_directed(ix, direction)
            .map(|edge| edge.weight())
            .collect();
        relationships.sort_by_key(|r| r.id);
        relationships
    }

    /// Every relationship touching `ix`, in both directions, self-loops once.
    fn incident(&self, ix: NodeIndex) -> Vec<&Relationship> {
        let outgoing = self.graph.edges_directed(ix, Direction::Outgoing);
        let incoming = self
            .graph
            .edges_directed(ix, Direction::Incoming)
            .filter(|edge| edge.weight().source_id != edge.weight().target_id);
        outgoing.chain(incoming).map(|edge| edge.weight()).collect()
    }

    fn undirected_adjacency(&self, id: EntityId) -> Vec<(EntityId, &Relationship)> {
        let Some(ix) = self.node(id) else {
            return Vec::new();
        };
        let id = self.canonical(id);
        let mut strongest: BTreeMap<EntityId, &Relationship> = BTreeMap::new();
        for relationship in self.incident(ix) {
            let other = relationship.other_end(id);
            if other == id {
                continue;
            }
            keep_stronger(strongest.entry(other), relationship);
        }
        strongest.into_iter().collect()
    }
}

fn is_stronger(candidate: &Relationship, incumbent: &Relationship) -> bool {
    candidate.confidence > incumbent.confidence
        || (candidate.confidence == incumbent.confidence && candidate.id < incumbent.id)
}

fn keep_stronger<'a, K: Ord>(slot: Entry<'_, K, &'a Relationship>, relationship: &'a Relationship) {
    match slot {
        Entry::Vacant(vacant) => {
            vacant.insert(relationship);
        }
        Entry::Occupied(mut occupied) => {
            if is_stronger(relationship, occupied.get()) {
                occupied.insert(relationship);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphStore {
    inner: Arc<GraphInner>,
    next_relationship_id: u64,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GraphInner::default()),
            next_relationship_id: 1,
        }
    }

    pub fn revision(&self) -> u64 {
        self.inner.revision
    }

    pub fn next_relationship_id(&self) -> u64 {
        self.next_relationship_id
    }

    pub fn entity_count(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.inner.edges.len()
    }

    /// Freeze the current state for analytics.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn get_entity(&self, id: EntityId) -> Option<&Entity> {
        self.inner.entity(id)
    }

    /// Distinct neighbours regardless of edge direction, sorted by id.
    pub fn neighbors(&self, id: EntityId) -> Vec<EntityId> {
        self.inner
            .undirected_adjacency(id)
            .into_iter()
            .map(|(neighbor, _)| neighbor)
            .collect()
    }

    pub fn outgoing(&self, id: EntityId) -> Vec<&Relationship> {
        self.inner.directed(id, Direction::Outgoing)
    }

    pub fn incoming(&self, id: EntityId) -> Vec<&Relationship> {
        self.inner.directed(id, Direction::Incoming)
    }

    pub fn all_entities(&self) -> Vec<&Entity> {
        self.inner.entities()
    }

    pub fn all_relationships(&self) -> Vec<&Relationship> {
        self.inner.relationships()
    }

    pub fn redirects(&self) -> &BTreeMap<EntityId, EntityId> {
        &self.inner.redirects
    }

    /// Insert a node, or replace the stored copy of an existing one.
    pub fn add_entity(&mut self, entity: Entity) {
        let inner = Arc::make_mut(&mut self.inner);
        inner.revision += 1;
        match inner.nodes.get(&entity.id).copied() {
            Some(ix) => {
                if let Some(slot) = inner.graph.node_weight_mut(ix) {
                    *slot = entity;
                }
            }
            None => {
                let id = entity.id;
                let ix = inner.graph.add_node(entity);
                inner.nodes.insert(id, ix);
            }
        }
    }

    /// Add a relationship, folding it into an existing edge with the same
    /// `(source, target, type)`.
    pub fn add_relationship(&mut self, relationship: NewRelationship) -> Result<EdgeOutcome> {
        if !(0.0..=1.0).contains(&relationship.confidence) {
            return Err(GraphError::InvalidConfidence(relationship.confidence));
        }

        let describe = || {
            format!(
                "{} -[{}]-> {}",
                relationship.source_id, relationship.relationship_type, relationship.target_id
            )
        };
        let source_ix = self.inner.node(relationship.source_id).ok_or_else(|| {
            GraphError::DanglingReference {
                relationship: describe(),
                missing: relationship.source_id.to_string(),
            }
        })?;
        let target_ix = self.inner.node(relationship.target_id).ok_or_else(|| {
            GraphError::DanglingReference {
                relationship: describe(),
                missing: relationship.target_id.to_string(),
            }
        })?;

        let mut relationship = relationship;
        relationship.source_id = self.inner.canonical(relationship.source_id);
        relationship.target_id = self.inner.canonical(relationship.target_id);

        let key = (
            relationship.source_id,
            relationship.target_id,
            relationship.relationship_type.clone(),
        );
        let existing = self.inner.edges.get(&key).copied();

        let inner = Arc::make_mut(&mut self.inner);
        inner.revision += 1;

        if let Some(edge_ix) = existing {
            if let Some(edge) = inner.graph.edge_weight_mut(edge_ix) {
                let observation = relationship.into_relationship(edge.id);
                edge.merge_from(&observation);
                debug!(relationship_id = %edge.id, confidence = edge.confidence, "Merged relationship");
                return Ok(EdgeOutcome::Merged(edge.id));
            }
        }

        let id = RelationshipId(self.next_relationship_id);
        self.next_relationship_id += 1;
        let edge_ix = inner
            .graph
            .add_edge(source_ix, target_ix, relationship.into_relationship(id));
        inner.edges.insert(key, edge_ix);
        Ok(EdgeOutcome::Created(id))
    }

    /// Re-insert a persisted relationship, keeping its id.
    pub fn restore_relationship(&mut self, relationship: Relationship) -> Result<EdgeOutcome> {
        if !(0.0..=1.0).contains(&relationship.confidence) {
            return Err(GraphError::InvalidConfidence(relationship.confidence));
        }
        for endpoint in [relationship.source_id, relationship.target_id] {
            if !self.inner.nodes.contains_key(&endpoint) {
                return Err(GraphError::DanglingReference {
                    relationship: relationship.id.to_string(),
                    missing: endpoint.to_string(),
                });
            }
        }
        self.next_relationship_id = self.next_relationship_id.max(relationship.id.0 + 1);
        let inner = Arc::make_mut(&mut self.inner);
        inner.revision += 1;
        Ok(inner.insert_or_merge(relationship))
    }

    pub fn set_next_relationship_id(&mut self, next: u64) {
        self.next_relationship_id = self.next_relationship_id.max(next);
    }

    /// Record that `from` was absorbed into `to` without touching edges.
    pub fn insert_redirect(&mut self, from: EntityId, to: EntityId) {
        let inner = Arc::make_mut(&mut self.inner);
        inner.redirects.insert(from, to);
    }

    /// Purge an entity together with every incident relationship.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<Entity> {
        let id = self.inner.canonical(id);
        let ix = self
            .inner
            .nodes
            .get(&id)
            .copied()
            .ok_or_else(|| GraphError::UnknownEntity(id.to_string()))?;

        let inner = Arc::make_mut(&mut self.inner);
        inner.revision += 1;
        inner.nodes.remove(&id);
        inner
            .edges
            .retain(|(source, target, _), _| *source != id && *target != id);
        inner.redirects.retain(|from, to| *from != id && *to != id);
        inner
            .graph
            .remove_node(ix)
            .ok_or_else(|| GraphError::UnknownEntity(id.to_string()))
    }

    /// Re-point every edge of `from` at `to` through the normal merge rule,
    /// store the merged entity and leave a redirect behind.
    pub fn redirect_entity(&mut self, from: EntityId, merged: Entity) -> Result<()> {
        let to = merged.id;
        let from_ix = self
            .inner
            .nodes
            .get(&from)
            .copied()
            .ok_or_else(|| GraphError::UnknownEntity(from.to_string()))?;
        if !self.inner.nodes.contains_key(&to) {
            return Err(GraphError::UnknownEntity(to.to_string()));
        }

        let moved: Vec<Relationship> = self
            .inner
            .incident(from_ix)
            .into_iter()
            .cloned()
            .collect();

        let inner = Arc::make_mut(&mut self.inner);
        inner.revision += 1;
        inner
            .edges
            .retain(|(source, target, _), _| *source != from && *target != from);
        inner.graph.remove_node(from_ix);
        inner.nodes.remove(&from);

        for mut relationship in moved {
            if relationship.source_id == from {
                relationship.source_id = to;
            }
            if relationship.target_id == from {
                relationship.target_id = to;
            }
            inner.insert_or_merge(relationship);
        }

        if let Some(slot) = inner.nodes.get(&to).and_then(|&ix| inner.graph.node_weight_mut(ix)) {
            *slot = merged;
        }

        for target in inner.redirects.values_mut() {
            if *target == from {
                *target = to;
            }
        }
        inner.redirects.insert(from, to);
        Ok(())
    }
}

impl GraphInner {
    fn insert_or_merge(&mut self, relationship: Relationship) -> EdgeOutcome {
        let key = (
            relationship.source_id,
            relationship.target_id,
            relationship.relationship_type.clone(),
        );
        if let Some(edge) = self
            .edges
            .get(&key)
            .and_then(|&ix| self.graph.edge_weight_mut(ix))
        {
            edge.merge_from(&relationship);
            return EdgeOutcome::Merged(edge.id);
        }

        let id = relationship.id;
        let (Some(&source_ix), Some(&target_ix)) = (
            self.nodes.get(&relationship.source_id),
            self.nodes.get(&relationship.target_id),
        ) else {
            return EdgeOutcome::Created(id);
        };
        let edge_ix = self.graph.add_edge(source_ix, target_ix, relationship);
        self.edges.insert(key, edge_ix);
        EdgeOutcome::Created(id)
    }
}

/// One neighbour in the undirected projection, with the strongest
/// relationship connecting to it.
#[derive(Debug, Clone, Copy)]
pub struct Hop<'a> {
    pub node: usize,
    pub relationship: &'a Relationship,
}

/// Dense, index-addressed undirected simple projection of a snapshot.
/// Node indices follow ascending entity id; neighbour lists are sorted.
#[derive(Debug, Clone)]
pub struct UndirectedView<'a> {
    pub ids: Vec<EntityId>,
    pub neighbors: Vec<Vec<Hop<'a>>>,
}

impl UndirectedView<'_> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, id: EntityId) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    pub fn edge_count(&self) -> usize {
        self.neighbors.iter().map(Vec::len).sum::<usize>() / 2
    }
}

/// Read-only view of the graph at one revision.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    inner: Arc<GraphInner>,
}

impl GraphSnapshot {
    pub fn revision(&self) -> u64 {
        self.inner.revision
    }

    pub fn entity_count(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.inner.edges.len()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.inner.entity(id)
    }

    pub fn entities(&self) -> Vec<&Entity> {
        self.inner.entities()
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.inner.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn relationships(&self) -> Vec<&Relationship> {
        self.inner.relationships()
    }

    pub fn outgoing(&self, id: EntityId) -> Vec<&Relationship> {
        self.inner.directed(id, Direction::Outgoing)
    }

    pub fn incoming(&self, id: EntityId) -> Vec<&Relationship> {
        self.inner.directed(id, Direction::Incoming)
    }

    pub fn redirects(&self) -> &BTreeMap<EntityId, EntityId> {
        &self.inner.redirects
    }

    /// Neighbour ids with the strongest connecting relationship, ignoring
    /// direction and self-loops.
    pub fn undirected_adjacency(&self, id: EntityId) -> Vec<(EntityId, &Relationship)> {
        self.inner.undirected_adjacency(id)
    }

    pub fn undirected_view(&self) -> UndirectedView<'_> {
        let ids = self.entity_ids();
        let mut strongest: Vec<BTreeMap<usize, &Relationship>> = vec![BTreeMap::new(); ids.len()];
        let position = |id: EntityId| ids.binary_search(&id).ok();

        for relationship in self.inner.relationships() {
            if relationship.source_id == relationship.target_id {
                continue;
            }
            let (Some(s), Some(t)) = (position(relationship.source_id), position(relationship.target_id))
            else {
                continue;
            };
            keep_stronger(strongest[s].entry(t), relationship);
            keep_stronger(strongest[t].entry(s), relationship);
        }

        let neighbors = strongest
            .into_iter()
            .map(|hops| {
                hops.into_iter()
                    .map(|(node, relationship)| Hop { node, relationship })
                    .collect()
            })
            .collect();
        UndirectedView { ids, neighbors }
    }

    /// Resolve a prefixed id (`e_12`, following merge redirects), then an
    /// exact canonical name, then a bare numeric id (`12`), then a
    /// case-insensitive name or alias.
    ///
    /// Names win over bare numbers so DATE and MONEY entities such as "2019"
    /// stay reachable by name.
    pub fn find_entity(&self, name_or_id: &str) -> Option<&Entity> {
        let query = name_or_id.trim();
        if query.starts_with("e_") {
            if let Some(entity) = query.parse::<EntityId>().ok().and_then(|id| self.entity(id)) {
                return Some(entity);
            }
        }

        let entities = self.entities();
        let exact = entities.iter().copied().filter(|e| e.canonical_name == query);
        if let Some(entity) = most_mentioned(exact) {
            return Some(entity);
        }

        if let Some(entity) = query.parse::<EntityId>().ok().and_then(|id| self.entity(id)) {
            return Some(entity);
        }

        let folded = query.to_lowercase();
        let loose = entities.iter().copied().filter(|e| {
            e.canonical_name.to_lowercase() == folded
                || e.aliases.iter().any(|alias| alias.to_lowercase() == folded)
        });
        most_mentioned(loose)
    }
}

fn most_mentioned<'a>(candidates: impl Iterator<Item = &'a Entity>) -> Option<&'a Entity> {
    candidates.max_by(|a, b| a.mention_count.cmp(&b.mention_count).then(b.id.cmp(&a.id)))
}
