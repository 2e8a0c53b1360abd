//! Anchor Definitions
//!
//! An anchor is the identity and infrastructure wrapper around exactly one
//! architype (the user-visible payload of a node, edge or walker). Anchors
//! carry the id, kind, access level, connectivity and persistence markers;
//! the architype carries the class name and field values.
//!
//! Connectivity is expressed with [`LazyRef`] values rather than pointers:
//! a node lists the edges it participates in, an edge names its two
//! endpoints, and any of them may be resolved later through the graph arena
//! or the store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Class name of the builtin namespace root.
pub const ROOT_CLASS: &str = "Root";

/// Class name of the builtin untyped edge.
pub const GENERIC_EDGE_CLASS: &str = "GenericEdge";

// ============================================================================
// Identity
// ============================================================================

/// Globally unique anchor identifier.
///
/// Assigned when the anchor is constructed and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(Uuid);

impl AnchorId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The well-known id of the namespace super root
    pub const fn super_root() -> Self {
        Self(Uuid::nil())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn is_super_root(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for AnchorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for AnchorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Kinds and levels
// ============================================================================

/// What an anchor represents in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorKind {
    /// Namespace root node
    Root,
    /// Ordinary node
    Node,
    /// Edge between two nodes
    Edge,
    /// Walker (never persisted)
    Walker,
}

impl AnchorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorKind::Root => "root",
            AnchorKind::Node => "node",
            AnchorKind::Edge => "edge",
            AnchorKind::Walker => "walker",
        }
    }

    /// Roots behave as nodes everywhere except identity.
    pub fn is_node_like(&self) -> bool {
        matches!(self, AnchorKind::Root | AnchorKind::Node)
    }
}

impl FromStr for AnchorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(AnchorKind::Root),
            "node" => Ok(AnchorKind::Node),
            "edge" => Ok(AnchorKind::Edge),
            "walker" => Ok(AnchorKind::Walker),
            other => Err(format!("unknown anchor kind '{other}'")),
        }
    }
}

/// Cross-session visibility of an anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessLevel {
    /// Visible only under owner (elevated) access
    #[default]
    Private,
    /// Visible to everyone
    Public,
    /// Visible to any identified caller
    Protected,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Private => "PRIVATE",
            AccessLevel::Public => "PUBLIC",
            AccessLevel::Protected => "PROTECTED",
        }
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRIVATE" => Ok(AccessLevel::Private),
            "PUBLIC" => Ok(AccessLevel::Public),
            "PROTECTED" => Ok(AccessLevel::Protected),
            other => Err(format!("unknown access level '{other}'")),
        }
    }
}

impl From<walkgraph_config::AccessLevelSetting> for AccessLevel {
    fn from(setting: walkgraph_config::AccessLevelSetting) -> Self {
        match setting {
            walkgraph_config::AccessLevelSetting::Private => AccessLevel::Private,
            walkgraph_config::AccessLevelSetting::Public => AccessLevel::Public,
            walkgraph_config::AccessLevelSetting::Protected => AccessLevel::Protected,
        }
    }
}

/// Direction of an edge relative to the node it is attached from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDir {
    /// Edge points at the node it was attached from
    In,
    /// Edge points away from the node it was attached from
    #[default]
    Out,
    /// Either direction
    Any,
}

// ============================================================================
// Lazy references
// ============================================================================

/// An `{id, kind, name}` stand-in for an anchor that may not be loaded.
///
/// This is the only form in which one anchor refers to another, both in
/// memory and in persisted records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LazyRef {
    #[serde(rename = "_id")]
    pub id: AnchorId,

    #[serde(rename = "_type")]
    pub kind: AnchorKind,

    /// Declared class name
    #[serde(rename = "_name")]
    pub name: String,
}

impl LazyRef {
    pub fn new(id: AnchorId, kind: AnchorKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
        }
    }
}

// ============================================================================
// Architype
// ============================================================================

/// The behavior-bearing payload owned by an anchor: class name plus fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Architype {
    name: String,
    fields: Map<String, Value>,
}

impl Architype {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Map::new(),
        }
    }

    pub fn with_fields(name: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Builder-style field assignment
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }
}

// ============================================================================
// Anchor
// ============================================================================

/// Connectivity held by node-like anchors.
///
/// Both lists keep insertion order and may hold the same edge class many
/// times (multigraph).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLinks {
    pub incoming: Vec<LazyRef>,
    pub outgoing: Vec<LazyRef>,
}

impl NodeLinks {
    pub fn list(&self, dir: EdgeDir) -> Vec<&LazyRef> {
        match dir {
            EdgeDir::In => self.incoming.iter().collect(),
            EdgeDir::Out => self.outgoing.iter().collect(),
            EdgeDir::Any => self.outgoing.iter().chain(self.incoming.iter()).collect(),
        }
    }
}

/// Endpoints held by edge anchors. Weak: lookup only, never ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeLinks {
    pub source: LazyRef,
    pub target: LazyRef,
    pub dir: EdgeDir,
}

impl EdgeLinks {
    /// The endpoint on the other side of `from`, or the target when `from`
    /// is not an endpoint at all.
    pub fn opposite(&self, from: AnchorId) -> &LazyRef {
        if self.target.id == from {
            &self.source
        } else {
            &self.target
        }
    }
}

/// Kind-specific anchor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Links {
    Node(NodeLinks),
    Edge(EdgeLinks),
}

/// Identity/ownership wrapper for one graph object.
#[derive(Debug, Clone)]
pub struct Anchor {
    id: AnchorId,
    kind: AnchorKind,
    architype: Architype,
    pub(crate) access: AccessLevel,
    pub(crate) links: Links,
    /// Written to the store at least once
    pub(crate) persisted: bool,
    /// Mutated since the last successful write
    pub(crate) dirty: bool,
    /// Created in this process or loaded through the owner path
    pub(crate) local_owner: bool,
}

impl Anchor {
    pub(crate) fn node(
        id: AnchorId,
        kind: AnchorKind,
        architype: Architype,
        access: AccessLevel,
    ) -> Self {
        Self {
            id,
            kind,
            architype,
            access,
            links: Links::Node(NodeLinks::default()),
            persisted: false,
            dirty: false,
            local_owner: true,
        }
    }

    pub(crate) fn edge(architype: Architype, links: EdgeLinks, access: AccessLevel) -> Self {
        Self {
            id: AnchorId::new(),
            kind: AnchorKind::Edge,
            architype,
            access,
            links: Links::Edge(links),
            persisted: false,
            dirty: false,
            local_owner: true,
        }
    }

    /// Rebuild an anchor from its stored form; it is persisted and clean.
    pub(crate) fn restored(
        id: AnchorId,
        kind: AnchorKind,
        architype: Architype,
        access: AccessLevel,
        links: Links,
    ) -> Self {
        Self {
            id,
            kind,
            architype,
            access,
            links,
            persisted: true,
            dirty: false,
            local_owner: false,
        }
    }

    pub fn id(&self) -> AnchorId {
        self.id
    }

    pub fn kind(&self) -> AnchorKind {
        self.kind
    }

    pub fn architype(&self) -> &Architype {
        &self.architype
    }

    pub(crate) fn architype_mut(&mut self) -> &mut Architype {
        &mut self.architype
    }

    /// Class name of the owned architype
    pub fn name(&self) -> &str {
        self.architype.name()
    }

    pub fn access(&self) -> AccessLevel {
        self.access
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_local_owner(&self) -> bool {
        self.local_owner
    }

    pub fn is_node(&self) -> bool {
        self.kind.is_node_like()
    }

    pub fn is_edge(&self) -> bool {
        self.kind == AnchorKind::Edge
    }

    pub fn node_links(&self) -> Option<&NodeLinks> {
        match &self.links {
            Links::Node(links) => Some(links),
            Links::Edge(_) => None,
        }
    }

    pub(crate) fn node_links_mut(&mut self) -> Option<&mut NodeLinks> {
        match &mut self.links {
            Links::Node(links) => Some(links),
            Links::Edge(_) => None,
        }
    }

    pub fn edge_links(&self) -> Option<&EdgeLinks> {
        match &self.links {
            Links::Edge(links) => Some(links),
            Links::Node(_) => None,
        }
    }

    /// A lazy reference pointing at this anchor
    pub fn lazy_ref(&self) -> LazyRef {
        LazyRef::new(self.id, self.kind, self.architype.name())
    }
}
