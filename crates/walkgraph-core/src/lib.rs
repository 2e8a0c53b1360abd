//! Walkgraph Core - Walker traversal over a persistent object graph
//!
//! This crate provides the execution engine behind walker programs:
//! - Anchors: identity, access level and connectivity for graph objects
//! - An in-memory object graph with lazily materialized references
//! - The walker engine (breadth-first traversal with entry/exit hooks)
//! - A SQLite-backed anchor store with transactional write sessions
//! - Execution contexts bounding one run against the shared store
//! - Graphviz export of reachable subgraphs

pub mod access;
pub mod anchor;
pub mod context;
pub mod export;
pub mod graph;
pub mod logging;
pub mod registry;
pub mod store;
pub mod walker;

// Re-exports for convenience
pub use access::{Access, AccessGuard, Caller};
pub use anchor::{
    AccessLevel, Anchor, AnchorId, AnchorKind, Architype, EdgeDir, EdgeLinks, LazyRef, Links,
    NodeLinks, GENERIC_EDGE_CLASS, ROOT_CLASS,
};
pub use context::{ContextError, ContextOptions, ExecutionContext, ObjectResponse};
pub use export::{export_graph, ExportOptions, GraphExport};
pub use graph::{AnchorSource, EdgeSelector, GraphError, ObjectGraph};
pub use registry::{ArchitypeClass, Hook, HookFn, HookPhase, RegistryError, TypeRegistry};
pub use store::{AnchorRecord, AnchorStore, StoreError, StoreMetrics, StoreSession};
pub use walker::{EngineError, HookContext, SpawnOutcome, Walker, WalkerEngine, WalkerState};

// Configuration re-export
pub use walkgraph_config::{ConfigLoader, WalkgraphConfig};
