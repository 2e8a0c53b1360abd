//! Access control integration tests for walkgraph-core.
//!
//! Seeds a graph as the namespace owner, then reopens it as other callers:
//! - Anonymous callers only see public anchors
//! - Identified callers also see protected anchors
//! - Walkers and exports skip what the caller may not see
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package walkgraph-core --test access_control
//! ```

mod common;

use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use common::{open_store, travel_registry};
use walkgraph_core::{
    AccessLevel, AnchorId, AnchorStore, Architype, Caller, ContextOptions, EdgeDir,
    ExecutionContext, ExportOptions, ObjectResponse, Walker,
};

// ============================================================================
// Test Helpers
// ============================================================================

struct Seeded {
    store: Arc<AnchorStore>,
    public: AnchorId,
    protected: AnchorId,
    private: AnchorId,
}

/// Root with one city per access level, created by the owner.
fn seed(dir: &Path) -> Seeded {
    let store = open_store(dir, travel_registry());
    let (public, protected, private) =
        ExecutionContext::scoped(store.clone(), ContextOptions::default(), |ctx| {
            let root = ctx.root();
            let graph = ctx.graph_mut();
            let mut ids = Vec::new();
            for (name, level) in [
                ("public", AccessLevel::Public),
                ("protected", AccessLevel::Protected),
                ("private", AccessLevel::Private),
            ] {
                let id = graph
                    .add_node_with_access(Architype::new("City").with_field("name", name), level)?;
                graph.connect(root, id, Architype::new("Road"), EdgeDir::Out)?;
                ids.push(id);
            }
            Ok((ids[0], ids[1], ids[2]))
        })
        .expect("Seeding run failed");
    Seeded {
        store,
        public,
        protected,
        private,
    }
}

fn open_as(store: &Arc<AnchorStore>, caller: Caller) -> ExecutionContext {
    ExecutionContext::open(store.clone(), ContextOptions::default().with_caller(caller))
        .expect("Failed to open context")
}

fn tour(ctx: &mut ExecutionContext) -> Vec<serde_json::Value> {
    let mut walker = Walker::new(Architype::new("Tourist"));
    ctx.spawn(&mut walker, None).unwrap();
    ctx.take_reports()
}

// ============================================================================
// get_object
// ============================================================================

#[test]
fn test_anonymous_sees_only_public() {
    let temp = TempDir::new().unwrap();
    let seeded = seed(temp.path());
    let mut ctx = open_as(&seeded.store, Caller::anonymous());

    let response = ctx.get_object(seeded.public).unwrap();
    assert!(response.is_found());
    let record = response.into_json();
    assert_eq!(record["_name"], json!("City"));
    assert_eq!(record["access"], json!("PUBLIC"));
    assert_eq!(record["ctx"]["name"], json!("public"));

    assert_eq!(
        ctx.get_object(seeded.protected).unwrap(),
        ObjectResponse::Denied
    );
    let denied = ctx.get_object(seeded.private).unwrap();
    assert_eq!(denied, ObjectResponse::Denied);
    assert_eq!(denied.into_json(), json!({}));
}

#[test]
fn test_identity_unlocks_protected() {
    let temp = TempDir::new().unwrap();
    let seeded = seed(temp.path());
    let mut ctx = open_as(&seeded.store, Caller::identified("alice"));

    assert!(ctx.get_object(seeded.public).unwrap().is_found());
    assert!(ctx.get_object(seeded.protected).unwrap().is_found());
    assert_eq!(
        ctx.get_object(seeded.private).unwrap(),
        ObjectResponse::Denied
    );
}

#[test]
fn test_owner_sees_everything() {
    let temp = TempDir::new().unwrap();
    let seeded = seed(temp.path());
    let mut ctx = open_as(&seeded.store, Caller::owner());

    for id in [seeded.public, seeded.protected, seeded.private] {
        assert!(ctx.get_object(id).unwrap().is_found());
    }
}

#[test]
fn test_anchors_created_here_are_visible() {
    let temp = TempDir::new().unwrap();
    let seeded = seed(temp.path());
    let mut ctx = open_as(&seeded.store, Caller::anonymous());

    let mine = ctx
        .graph_mut()
        .add_node_with_access(Architype::new("City"), AccessLevel::Private)
        .unwrap();
    assert!(ctx.get_object(mine).unwrap().is_found());
}

#[test]
fn test_root_is_visible_through_owner_path() {
    let temp = TempDir::new().unwrap();
    let seeded = seed(temp.path());
    let mut ctx = open_as(&seeded.store, Caller::anonymous());

    // The super root is private but loaded on open
    let root = ctx.root();
    assert!(ctx.get_object(root).unwrap().is_found());
}

// ============================================================================
// Traversal
// ============================================================================

#[test]
fn test_walker_skips_denied_nodes() {
    let temp = TempDir::new().unwrap();
    let seeded = seed(temp.path());

    let mut anonymous = open_as(&seeded.store, Caller::anonymous());
    assert_eq!(tour(&mut anonymous), vec![json!("public")]);
    anonymous.close().unwrap();

    let mut alice = open_as(&seeded.store, Caller::identified("alice"));
    assert_eq!(tour(&mut alice), vec![json!("public"), json!("protected")]);
    alice.close().unwrap();

    let mut owner = open_as(&seeded.store, Caller::owner());
    assert_eq!(
        tour(&mut owner),
        vec![json!("public"), json!("protected"), json!("private")]
    );
}

#[test]
fn test_export_omits_denied_nodes() {
    let temp = TempDir::new().unwrap();
    let seeded = seed(temp.path());

    let mut ctx = open_as(&seeded.store, Caller::anonymous());
    let export = ctx.export(&ExportOptions::default()).unwrap();
    assert_eq!(export.nodes(), &[ctx.root(), seeded.public]);
    assert_eq!(export.edge_count(), 1);

    let dot = export.to_dot();
    assert!(dot.contains("public"));
    assert!(!dot.contains("private"));
}

#[test]
fn test_access_change_persists() {
    let temp = TempDir::new().unwrap();
    let seeded = seed(temp.path());

    ExecutionContext::scoped(seeded.store.clone(), ContextOptions::default(), |ctx| {
        let root = ctx.root();
        // Materialize the private city through the root
        ctx.graph_mut()
            .edges_to_nodes(root, EdgeDir::Out, None, None)?;
        ctx.graph_mut()
            .set_access(seeded.private, AccessLevel::Public)?;
        Ok(())
    })
    .unwrap();

    let mut ctx = open_as(&seeded.store, Caller::anonymous());
    assert!(ctx.get_object(seeded.private).unwrap().is_found());
}
