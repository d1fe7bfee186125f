//! Node-link JSON interchange, shaped like NetworkX's `node_link_data`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::model::{Document, Entity, EntityId, Relationship};
use crate::resolver::ResolverConfig;
use crate::store::GraphSnapshot;
use crate::KnowledgeGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redirect {
    pub from: EntityId,
    pub to: EntityId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphAttributes {
    pub name: String,
    pub next_entity_id: u64,
    pub next_relationship_id: u64,
    #[serde(default)]
    pub redirects: Vec<Redirect>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub directed: bool,
    pub multigraph: bool,
    pub graph: GraphAttributes,
    pub nodes: Vec<Entity>,
    pub links: Vec<Relationship>,
}

impl GraphExport {
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        let store = graph.store();
        Self {
            directed: true,
            multigraph: true,
            graph: GraphAttributes {
                name: graph.name().to_string(),
                next_entity_id: graph.resolver().next_id(),
                next_relationship_id: store.next_relationship_id(),
                redirects: store
                    .redirects()
                    .iter()
                    .map(|(&from, &to)| Redirect { from, to })
                    .collect(),
                documents: graph.documents().cloned().collect(),
            },
            nodes: store.all_entities().into_iter().cloned().collect(),
            links: store.all_relationships().into_iter().cloned().collect(),
        }
    }

    /// The subgraph induced by `ids`: those entities and only the
    /// relationships with both endpoints among them. Merged ids follow their
    /// redirects; unknown ids are skipped.
    pub fn subgraph(snapshot: &GraphSnapshot, name: impl Into<String>, ids: &[EntityId]) -> Self {
        let kept: BTreeSet<EntityId> = ids
            .iter()
            .filter_map(|&id| snapshot.entity(id))
            .map(|entity| entity.id)
            .collect();

        let nodes: Vec<Entity> = kept
            .iter()
            .filter_map(|&id| snapshot.entity(id).cloned())
            .collect();
        let links: Vec<Relationship> = snapshot
            .relationships()
            .into_iter()
            .filter(|r| kept.contains(&r.source_id) && kept.contains(&r.target_id))
            .cloned()
            .collect();
        let redirects = snapshot
            .redirects()
            .iter()
            .filter(|(_, to)| kept.contains(to))
            .map(|(&from, &to)| Redirect { from, to })
            .collect();

        Self {
            directed: true,
            multigraph: true,
            graph: GraphAttributes {
                name: name.into(),
                next_entity_id: kept.last().map_or(1, |id| id.0 + 1),
                next_relationship_id: links.iter().map(|r| r.id.0 + 1).max().unwrap_or(1),
                redirects,
                documents: Vec::new(),
            },
            nodes,
            links,
        }
    }

    /// Rebuild a live graph, including resolver indices, from an export.
    pub fn into_graph(self, config: ResolverConfig) -> Result<KnowledgeGraph> {
        KnowledgeGraph::from_export(self, config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        tokio::fs::write(path, json).await?;
        info!(
            path = %path.display(),
            entities = self.nodes.len(),
            relationships = self.links.len(),
            "Saved graph"
        );
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let export = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            entities = export.nodes.len(),
            relationships = export.links.len(),
            "Loaded graph"
        );
        Ok(export)
    }
}
