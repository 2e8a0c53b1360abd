//! Common test utilities for integration tests.
//!
//! Provides a small travel-themed class registry, store helpers and graph
//! invariant checks shared across integration test files.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use walkgraph_core::{
    AnchorId, AnchorStore, ArchitypeClass, EdgeDir, Hook, HookContext, ObjectGraph, TypeRegistry,
};

// ============================================================================
// Registry
// ============================================================================

/// Report the current node's `name` (if any) and continue along outgoing edges.
pub fn tour(ctx: &mut HookContext<'_>) -> anyhow::Result<()> {
    if let Some(name) = ctx.field("name").cloned() {
        ctx.report(name);
    }
    let next = ctx.neighbors(EdgeDir::Out)?;
    ctx.visit(next)?;
    Ok(())
}

/// Classes used across the integration tests:
/// - `City` (node), `Capital` (node, extends `City`)
/// - `Road` (edge), `Highway` (edge, extends `Road`)
/// - `Tourist` (walker reporting every named node it tours)
/// - `Greeter` (walker reporting "hello" only at `City` nodes)
pub fn travel_registry() -> Arc<TypeRegistry> {
    TypeRegistry::new()
        .with(ArchitypeClass::node("City"))
        .unwrap()
        .with(ArchitypeClass::node("Capital").extends("City"))
        .unwrap()
        .with(ArchitypeClass::edge("Road"))
        .unwrap()
        .with(ArchitypeClass::edge("Highway").extends("Road"))
        .unwrap()
        .with(ArchitypeClass::walker("Tourist").on_entry(Hook::new("tour", tour)))
        .unwrap()
        .with(
            ArchitypeClass::walker("Greeter")
                .on_entry(Hook::new("greet", |ctx| {
                    ctx.report("hello");
                    Ok(())
                }).on("City"))
                .on_exit(Hook::new("move_on", |ctx| {
                    let next = ctx.neighbors(EdgeDir::Out)?;
                    ctx.visit(next)?;
                    Ok(())
                })),
        )
        .unwrap()
        .freeze()
}

/// On-disk store under `dir`
pub fn open_store(dir: &Path, registry: Arc<TypeRegistry>) -> Arc<AnchorStore> {
    Arc::new(AnchorStore::open(&dir.join("graph.db"), registry).expect("Failed to open store"))
}

// ============================================================================
// Graph invariants
// ============================================================================

/// Every loaded edge appears exactly once in its source's outgoing list and
/// once in its target's incoming list (when those endpoints are loaded), and
/// every listed edge that is loaded points back at the listing node.
pub fn assert_connectivity_consistent(graph: &ObjectGraph) {
    for anchor in graph.anchors() {
        if let Some(links) = anchor.edge_links() {
            if let Some(source) = graph.get(links.source.id) {
                let count = source
                    .node_links()
                    .unwrap()
                    .outgoing
                    .iter()
                    .filter(|r| r.id == anchor.id())
                    .count();
                assert_eq!(count, 1, "edge {} listed {} times by source", anchor.id(), count);
            }
            if let Some(target) = graph.get(links.target.id) {
                let count = target
                    .node_links()
                    .unwrap()
                    .incoming
                    .iter()
                    .filter(|r| r.id == anchor.id())
                    .count();
                assert_eq!(count, 1, "edge {} listed {} times by target", anchor.id(), count);
            }
        }
        if let Some(links) = anchor.node_links() {
            for edge_ref in &links.outgoing {
                if let Some(edge) = graph.get(edge_ref.id) {
                    assert_eq!(edge.edge_links().unwrap().source.id, anchor.id());
                }
            }
            for edge_ref in &links.incoming {
                if let Some(edge) = graph.get(edge_ref.id) {
                    assert_eq!(edge.edge_links().unwrap().target.id, anchor.id());
                }
            }
        }
    }
}

/// Names of the given nodes, in order
pub fn names(graph: &ObjectGraph, ids: &[AnchorId]) -> Vec<String> {
    ids.iter()
        .map(|id| {
            graph
                .field(*id, "name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}
