//! Read-only query surface over a frozen graph snapshot.

pub mod centrality;
pub mod path;
pub mod stats;

pub use centrality::{CentralityAlgorithm, RankedEntity, rank_by_centrality};
pub use path::{Path, PathResult, PathStep, neighborhood, shortest_path};
pub use stats::{GraphStats, graph_stats};

use communities::{CommunityDetector, Communities};
use graph::{Entity, EntityId, GraphExport, GraphSnapshot, Relationship};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
}

/// An entity together with the relationships touching it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDetails {
    pub entity: Entity,
    pub outgoing: Vec<Relationship>,
    pub incoming: Vec<Relationship>,
}

/// Analytics bound to one snapshot. Every call observes the same revision.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    snapshot: GraphSnapshot,
    detector: CommunityDetector,
}

impl QueryEngine {
    pub fn new(snapshot: GraphSnapshot) -> Self {
        Self {
            snapshot,
            detector: CommunityDetector::new(),
        }
    }

    pub fn snapshot(&self) -> &GraphSnapshot {
        &self.snapshot
    }

    pub fn revision(&self) -> u64 {
        self.snapshot.revision()
    }

    fn resolve(&self, name_or_id: &str) -> Result<&Entity, QueryError> {
        self.snapshot
            .find_entity(name_or_id)
            .ok_or_else(|| QueryError::UnknownEntity(name_or_id.to_string()))
    }

    pub fn get_entity(&self, name_or_id: &str) -> Result<EntityDetails, QueryError> {
        let entity = self.resolve(name_or_id)?;
        Ok(EntityDetails {
            entity: entity.clone(),
            outgoing: self.snapshot.outgoing(entity.id).into_iter().cloned().collect(),
            incoming: self.snapshot.incoming(entity.id).into_iter().cloned().collect(),
        })
    }

    pub fn find_path(&self, from: &str, to: &str) -> Result<PathResult, QueryError> {
        let source = self.resolve(from)?.id;
        let target = self.resolve(to)?.id;
        let result = shortest_path(&self.snapshot, source, target);
        debug!(
            from = %source,
            to = %target,
            found = matches!(result, PathResult::Found(_)),
            "Path query"
        );
        Ok(result)
    }

    pub fn rank_by_centrality(&self, top_n: usize, algorithm: CentralityAlgorithm) -> Vec<RankedEntity> {
        rank_by_centrality(&self.snapshot, top_n, algorithm)
    }

    pub fn list_communities(&self) -> Communities {
        self.detector.detect(&self.snapshot)
    }

    /// Entities within `depth` hops, sorted by id.
    pub fn neighborhood(&self, name_or_id: &str, depth: usize) -> Result<Vec<Entity>, QueryError> {
        let start = self.resolve(name_or_id)?.id;
        Ok(neighborhood(&self.snapshot, start, depth)
            .into_iter()
            .filter_map(|id| self.snapshot.entity(id).cloned())
            .collect())
    }

    /// Node-link export of the subgraph induced by the named entities.
    pub fn subgraph<S: AsRef<str>>(&self, names_or_ids: &[S]) -> Result<GraphExport, QueryError> {
        let ids = names_or_ids
            .iter()
            .map(|name| self.resolve(name.as_ref()).map(|entity| entity.id))
            .collect::<Result<Vec<EntityId>, QueryError>>()?;
        let export = GraphExport::subgraph(&self.snapshot, "subgraph", &ids);
        debug!(
            entities = export.nodes.len(),
            relationships = export.links.len(),
            "Subgraph query"
        );
        Ok(export)
    }

    pub fn stats(&self) -> GraphStats {
        graph_stats(&self.snapshot)
    }
}
