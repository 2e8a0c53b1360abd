//! Persisted Anchor Records
//!
//! The document stored for each anchor. Nodes and roots carry their edge
//! lists under `edg` as `[incoming, outgoing]`; edges carry `src`, `tgt` and
//! `dir`. Every cross-anchor reference is a lazy `{_id, _type, _name}`.

use super::StoreError;
use crate::anchor::{
    AccessLevel, Anchor, AnchorId, AnchorKind, Architype, EdgeDir, EdgeLinks, LazyRef, Links,
    NodeLinks,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Serialized form of one anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    #[serde(rename = "_id")]
    pub id: AnchorId,

    #[serde(rename = "_type")]
    pub kind: AnchorKind,

    #[serde(rename = "_name")]
    pub name: String,

    pub access: AccessLevel,

    /// Architype field values
    pub ctx: Map<String, Value>,

    #[serde(flatten)]
    pub links: RecordLinks,
}

/// Kind-specific part of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordLinks {
    Node {
        /// `[incoming, outgoing]`
        edg: [Vec<LazyRef>; 2],
    },
    Edge {
        src: LazyRef,
        tgt: LazyRef,
        dir: EdgeDir,
    },
}

impl AnchorRecord {
    pub fn from_anchor(anchor: &Anchor) -> Self {
        let links = match &anchor.links {
            Links::Node(links) => RecordLinks::Node {
                edg: [links.incoming.clone(), links.outgoing.clone()],
            },
            Links::Edge(links) => RecordLinks::Edge {
                src: links.source.clone(),
                tgt: links.target.clone(),
                dir: links.dir,
            },
        };
        Self {
            id: anchor.id(),
            kind: anchor.kind(),
            name: anchor.name().to_string(),
            access: anchor.access(),
            ctx: anchor.architype().fields().clone(),
            links,
        }
    }

    /// Rebuild the anchor; kind and link shape must agree.
    pub fn into_anchor(self) -> Result<Anchor, StoreError> {
        let links = match (self.kind, self.links) {
            (kind, RecordLinks::Node { edg: [incoming, outgoing] }) if kind.is_node_like() => {
                Links::Node(NodeLinks { incoming, outgoing })
            }
            (AnchorKind::Edge, RecordLinks::Edge { src, tgt, dir }) => Links::Edge(EdgeLinks {
                source: src,
                target: tgt,
                dir,
            }),
            (kind, _) => {
                return Err(StoreError::BadRecord {
                    id: self.id,
                    message: format!("links do not match kind '{}'", kind.as_str()),
                })
            }
        };
        Ok(Anchor::restored(
            self.id,
            self.kind,
            Architype::with_fields(self.name, self.ctx),
            self.access,
            links,
        ))
    }

    pub fn lazy_ref(&self) -> LazyRef {
        LazyRef::new(self.id, self.kind, self.name.clone())
    }

    pub fn to_json(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(self)?)
    }
}
