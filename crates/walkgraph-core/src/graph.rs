//! Object Graph
//!
//! Id-keyed arena of loaded anchors. Connectivity lives on the anchors as
//! [`LazyRef`] lists, so an anchor referenced by a loaded node does not have
//! to be loaded itself: when traversal reaches such a reference the graph
//! asks its [`AnchorSource`] (normally the store) to materialize it.
//!
//! All structural edits go through [`ObjectGraph::connect`] and
//! [`ObjectGraph::disconnect_edge`], which keep the edge lists of both
//! endpoints in step with the edge anchors themselves.

use crate::anchor::{
    AccessLevel, Anchor, AnchorId, AnchorKind, Architype, EdgeDir, EdgeLinks, LazyRef, ROOT_CLASS,
};
use crate::registry::{RegistryError, TypeRegistry};
use crate::store::StoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors raised by graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Unknown anchor: {0}")]
    UnknownAnchor(AnchorId),

    #[error("Anchor {0} is not a node")]
    NotANode(AnchorId),

    #[error("Anchor {0} is not an edge")]
    NotAnEdge(AnchorId),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to materialize anchor: {0}")]
    Store(#[from] StoreError),
}

/// Something that can turn a lazy reference into a full anchor.
pub trait AnchorSource: Send + Sync {
    /// Load the referenced anchor, or `None` if it no longer exists.
    fn resolve(&self, lazy: &LazyRef) -> Result<Option<Anchor>, StoreError>;
}

/// Predicate applied to each resolved edge during neighbor lookups.
pub type EdgeSelector<'a> = &'a dyn Fn(&Anchor) -> bool;

// ============================================================================
// ObjectGraph
// ============================================================================

/// In-memory graph of nodes and edges for one execution context.
pub struct ObjectGraph {
    anchors: HashMap<AnchorId, Anchor>,
    registry: Arc<TypeRegistry>,
    source: Option<Arc<dyn AnchorSource>>,
    default_access: AccessLevel,
    /// Persisted edges removed since the last flush
    removed: Vec<RemovedEdge>,
}

/// A persisted edge dropped from the graph but not yet from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RemovedEdge {
    pub id: AnchorId,
    pub source: AnchorId,
    pub target: AnchorId,
}

impl std::fmt::Debug for ObjectGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectGraph")
            .field("anchors", &self.anchors.len())
            .field("has_source", &self.source.is_some())
            .field("default_access", &self.default_access)
            .field("removed", &self.removed)
            .finish()
    }
}

impl ObjectGraph {
    /// A detached graph; unloaded references never resolve.
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            anchors: HashMap::new(),
            registry,
            source: None,
            default_access: AccessLevel::default(),
            removed: Vec::new(),
        }
    }

    /// A graph that materializes unloaded references through `source`
    pub fn with_source(registry: Arc<TypeRegistry>, source: Arc<dyn AnchorSource>) -> Self {
        Self {
            source: Some(source),
            ..Self::new(registry)
        }
    }

    /// Access level given to anchors created without an explicit one
    pub fn set_default_access(&mut self, level: AccessLevel) {
        self.default_access = level;
    }

    pub fn default_access(&self) -> AccessLevel {
        self.default_access
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn contains(&self, id: AnchorId) -> bool {
        self.anchors.contains_key(&id)
    }

    pub fn get(&self, id: AnchorId) -> Option<&Anchor> {
        self.anchors.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: AnchorId) -> Option<&mut Anchor> {
        self.anchors.get_mut(&id)
    }

    /// Loaded anchors in no particular order
    pub fn anchors(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.values()
    }

    /// Place an already built anchor into the arena, replacing any copy.
    pub(crate) fn insert(&mut self, anchor: Anchor) -> AnchorId {
        let id = anchor.id();
        self.anchors.insert(id, anchor);
        id
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Create a node with the graph's default access level.
    pub fn add_node(&mut self, architype: Architype) -> Result<AnchorId, GraphError> {
        self.add_node_with_access(architype, self.default_access)
    }

    /// Create a node with an explicit access level.
    ///
    /// The architype's class must be registered as a node class.
    pub fn add_node_with_access(
        &mut self,
        architype: Architype,
        access: AccessLevel,
    ) -> Result<AnchorId, GraphError> {
        let kind = self
            .registry
            .expect_kind(architype.name(), AnchorKind::Node)?
            .kind();
        let id = self.insert(Anchor::node(AnchorId::new(), kind, architype, access));
        trace!("Added node {}", id);
        Ok(id)
    }

    /// Create a namespace root at a fixed id.
    pub(crate) fn add_root(&mut self, id: AnchorId) -> AnchorId {
        self.insert(Anchor::node(
            id,
            AnchorKind::Root,
            Architype::new(ROOT_CLASS),
            AccessLevel::Private,
        ))
    }

    /// Connect `node` to `target` with a new edge.
    ///
    /// With `EdgeDir::In` the edge runs from `target` to `node`; otherwise it
    /// runs from `node` to `target`. Everything is validated before the first
    /// mutation, so a failed call leaves the graph untouched.
    pub fn connect(
        &mut self,
        node: AnchorId,
        target: AnchorId,
        edge: Architype,
        dir: EdgeDir,
    ) -> Result<AnchorId, GraphError> {
        let node_ref = self.require_node(node)?.lazy_ref();
        let target_ref = self.require_node(target)?.lazy_ref();
        self.registry.expect_kind(edge.name(), AnchorKind::Edge)?;

        let (source, target) = match dir {
            EdgeDir::In => (target_ref, node_ref),
            EdgeDir::Out | EdgeDir::Any => (node_ref, target_ref),
        };
        let (source_id, target_id) = (source.id, target.id);

        let anchor = Anchor::edge(
            edge,
            EdgeLinks {
                source,
                target,
                dir,
            },
            self.default_access,
        );
        let edge_ref = anchor.lazy_ref();
        let edge_id = self.insert(anchor);

        if let Some(source) = self.anchors.get_mut(&source_id) {
            if let Some(links) = source.node_links_mut() {
                links.outgoing.push(edge_ref.clone());
            }
            source.dirty = true;
        }
        if let Some(target) = self.anchors.get_mut(&target_id) {
            if let Some(links) = target.node_links_mut() {
                links.incoming.push(edge_ref);
            }
            target.dirty = true;
        }

        trace!("Connected {} -> {} via {}", source_id, target_id, edge_id);
        Ok(edge_id)
    }

    /// Remove one edge from both endpoints and drop it from the arena.
    ///
    /// Returns `false` when the edge is not loaded. Persisted edges are queued
    /// for deletion at the next flush.
    pub fn disconnect_edge(&mut self, edge: AnchorId) -> Result<bool, GraphError> {
        let links = match self.anchors.get(&edge) {
            None => return Ok(false),
            Some(anchor) => anchor
                .edge_links()
                .cloned()
                .ok_or(GraphError::NotAnEdge(edge))?,
        };

        for (endpoint, outgoing) in [(&links.source, true), (&links.target, false)] {
            let Some(id) = self.materialize(endpoint)? else {
                continue;
            };
            if let Some(anchor) = self.anchors.get_mut(&id) {
                if let Some(list) = anchor.node_links_mut() {
                    let list = if outgoing {
                        &mut list.outgoing
                    } else {
                        &mut list.incoming
                    };
                    list.retain(|r| r.id != edge);
                }
                anchor.dirty = true;
            }
        }

        if let Some(removed) = self.anchors.remove(&edge) {
            if removed.persisted {
                self.removed.push(RemovedEdge {
                    id: edge,
                    source: links.source.id,
                    target: links.target.id,
                });
            }
        }
        trace!("Disconnected edge {}", edge);
        Ok(true)
    }

    /// Remove every edge between `node` and `target` in the given direction.
    pub fn disconnect(
        &mut self,
        node: AnchorId,
        target: AnchorId,
        dir: EdgeDir,
    ) -> Result<usize, GraphError> {
        let refs: Vec<LazyRef> = self
            .require_node(node)?
            .node_links()
            .map(|links| links.list(dir).into_iter().cloned().collect())
            .unwrap_or_default();

        let mut doomed = Vec::new();
        for edge_ref in refs {
            let Some(edge_id) = self.materialize(&edge_ref)? else {
                continue;
            };
            let hits = self
                .get(edge_id)
                .and_then(Anchor::edge_links)
                .is_some_and(|links| links.opposite(node).id == target);
            if hits && !doomed.contains(&edge_id) {
                doomed.push(edge_id);
            }
        }

        let mut removed = 0;
        for edge_id in doomed {
            if self.disconnect_edge(edge_id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Bring a referenced anchor into the arena if it is not there already.
    ///
    /// Returns `None` when the anchor has vanished (or there is no source to
    /// ask). Store failures propagate.
    pub fn materialize(&mut self, lazy: &LazyRef) -> Result<Option<AnchorId>, GraphError> {
        if self.anchors.contains_key(&lazy.id) {
            return Ok(Some(lazy.id));
        }
        let Some(source) = self.source.as_ref() else {
            return Ok(None);
        };
        match source.resolve(lazy)? {
            Some(anchor) => {
                debug!("Materialized {} {} ({})", lazy.kind.as_str(), lazy.id, lazy.name);
                Ok(Some(self.insert(anchor)))
            }
            None => {
                debug!("Reference to vanished anchor {}", lazy.id);
                Ok(None)
            }
        }
    }

    /// Nodes on the far side of `node`'s edges in the given direction.
    ///
    /// Edges are considered in insertion order (`Any` = outgoing then
    /// incoming). `edge_type` keeps only edges of that class or a subclass;
    /// `selector` then filters the remaining edges. Edges or endpoints that
    /// no longer exist are skipped.
    pub fn edges_to_nodes(
        &mut self,
        node: AnchorId,
        dir: EdgeDir,
        edge_type: Option<&str>,
        selector: Option<EdgeSelector<'_>>,
    ) -> Result<Vec<AnchorId>, GraphError> {
        let refs: Vec<LazyRef> = self
            .require_node(node)?
            .node_links()
            .map(|links| links.list(dir).into_iter().cloned().collect())
            .unwrap_or_default();

        let mut nodes = Vec::with_capacity(refs.len());
        for edge_ref in refs {
            let Some(edge_id) = self.materialize(&edge_ref)? else {
                continue;
            };
            let Some(edge) = self.anchors.get(&edge_id) else {
                continue;
            };
            let Some(links) = edge.edge_links() else {
                continue;
            };
            if let Some(class) = edge_type {
                if !self.registry.is_a(edge.name(), class) {
                    continue;
                }
            }
            if let Some(select) = selector {
                if !select(edge) {
                    continue;
                }
            }
            let far = links.opposite(node).clone();
            if let Some(id) = self.materialize(&far)? {
                nodes.push(id);
            }
        }
        Ok(nodes)
    }

    /// Edges attached to `node` in the given direction that are loadable.
    pub fn edges(&mut self, node: AnchorId, dir: EdgeDir) -> Result<Vec<AnchorId>, GraphError> {
        let refs: Vec<LazyRef> = self
            .require_node(node)?
            .node_links()
            .map(|links| links.list(dir).into_iter().cloned().collect())
            .unwrap_or_default();

        let mut edges = Vec::with_capacity(refs.len());
        for edge_ref in refs {
            if let Some(id) = self.materialize(&edge_ref)? {
                edges.push(id);
            }
        }
        Ok(edges)
    }

    // ========================================================================
    // Field access
    // ========================================================================

    pub fn architype(&self, id: AnchorId) -> Result<&Architype, GraphError> {
        self.anchors
            .get(&id)
            .map(Anchor::architype)
            .ok_or(GraphError::UnknownAnchor(id))
    }

    /// Mutable payload access; the anchor is marked dirty.
    pub fn architype_mut(&mut self, id: AnchorId) -> Result<&mut Architype, GraphError> {
        let anchor = self
            .anchors
            .get_mut(&id)
            .ok_or(GraphError::UnknownAnchor(id))?;
        anchor.dirty = true;
        Ok(anchor.architype_mut())
    }

    pub fn field(&self, id: AnchorId, key: &str) -> Option<&Value> {
        self.anchors.get(&id).and_then(|a| a.architype().get(key))
    }

    pub fn set_field(
        &mut self,
        id: AnchorId,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), GraphError> {
        self.architype_mut(id)?.set(key, value);
        Ok(())
    }

    pub fn set_access(&mut self, id: AnchorId, level: AccessLevel) -> Result<(), GraphError> {
        let anchor = self
            .anchors
            .get_mut(&id)
            .ok_or(GraphError::UnknownAnchor(id))?;
        if anchor.access != level {
            anchor.access = level;
            anchor.dirty = true;
        }
        Ok(())
    }

    /// Loaded node-like anchor or an error.
    pub fn require_node(&self, id: AnchorId) -> Result<&Anchor, GraphError> {
        let anchor = self.anchors.get(&id).ok_or(GraphError::UnknownAnchor(id))?;
        if !anchor.is_node() {
            return Err(GraphError::NotANode(id));
        }
        Ok(anchor)
    }

    // ========================================================================
    // Persistence bookkeeping
    // ========================================================================

    /// Anchors that a flush would write: new or mutated.
    pub(crate) fn unsaved_ids(&self) -> Vec<AnchorId> {
        let mut ids: Vec<AnchorId> = self
            .anchors
            .values()
            .filter(|a| !a.persisted || a.dirty)
            .map(Anchor::id)
            .collect();
        ids.sort();
        ids
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.removed.is_empty() || self.anchors.values().any(|a| !a.persisted || a.dirty)
    }

    pub(crate) fn removed_edges(&self) -> &[RemovedEdge] {
        &self.removed
    }

    /// Far endpoints of removed edges that touched `id`
    pub(crate) fn removed_partners(&self, id: AnchorId) -> Vec<AnchorId> {
        self.removed
            .iter()
            .filter_map(|edge| {
                if edge.source == id {
                    Some(edge.target)
                } else if edge.target == id {
                    Some(edge.source)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Record a successful write of `ids` and of all queued deletions.
    pub(crate) fn mark_saved(&mut self, ids: &[AnchorId], deleted: &[AnchorId]) {
        for id in ids {
            if let Some(anchor) = self.anchors.get_mut(id) {
                anchor.persisted = true;
                anchor.dirty = false;
            }
        }
        self.removed.retain(|edge| !deleted.contains(&edge.id));
    }

    /// Grant owner access to an anchor loaded through the owner path.
    pub(crate) fn escalate(&mut self, id: AnchorId) {
        if let Some(anchor) = self.anchors.get_mut(&id) {
            anchor.local_owner = true;
        }
    }
}
