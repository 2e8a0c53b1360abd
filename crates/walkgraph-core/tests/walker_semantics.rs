//! Walker traversal integration tests for walkgraph-core.
//!
//! Runs walkers through execution contexts and checks the traversal rules:
//! - Breadth-first order and duplicate visits
//! - Trigger matching through base classes
//! - Disengage and hook failures
//! - Contexts sharing one store across threads
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package walkgraph-core --test walker_semantics
//! ```

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use common::{assert_connectivity_consistent, names, open_store, travel_registry};
use walkgraph_core::{
    AnchorId, AnchorStore, ArchitypeClass, Architype, ContextError, ContextOptions, EdgeDir,
    EngineError, ExecutionContext, Hook, SpawnOutcome, TypeRegistry, Walker, WalkerState,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn memory_store(registry: Arc<TypeRegistry>) -> Arc<AnchorStore> {
    Arc::new(AnchorStore::in_memory(registry).expect("Failed to create store"))
}

fn city(ctx: &mut ExecutionContext, name: &str) -> AnchorId {
    ctx.graph_mut()
        .add_node(Architype::new("City").with_field("name", name))
        .unwrap()
}

fn road(ctx: &mut ExecutionContext, from: AnchorId, to: AnchorId) {
    ctx.graph_mut()
        .connect(from, to, Architype::new("Road"), EdgeDir::Out)
        .unwrap();
}

/// root -> a, root -> b, a -> c, b -> d, c -> e
fn two_level_tree(ctx: &mut ExecutionContext) -> Vec<AnchorId> {
    let root = ctx.root();
    let a = city(ctx, "a");
    let b = city(ctx, "b");
    let c = city(ctx, "c");
    let d = city(ctx, "d");
    let e = city(ctx, "e");
    road(ctx, root, a);
    road(ctx, root, b);
    road(ctx, a, c);
    road(ctx, b, d);
    road(ctx, c, e);
    vec![a, b, c, d, e]
}

// ============================================================================
// Traversal Order
// ============================================================================

#[test]
fn test_breadth_first_from_root() {
    let mut ctx =
        ExecutionContext::open(memory_store(travel_registry()), ContextOptions::default()).unwrap();
    two_level_tree(&mut ctx);

    let mut walker = Walker::new(Architype::new("Tourist"));
    let outcome = ctx.spawn(&mut walker, None).unwrap();

    assert_eq!(outcome, SpawnOutcome::Drained);
    assert_eq!(walker.state(), WalkerState::Idle);
    assert_eq!(
        ctx.reports(),
        &[json!("a"), json!("b"), json!("c"), json!("d"), json!("e")]
    );
    assert_eq!(walker.path().len(), 6);
    assert_eq!(
        names(ctx.graph(), &walker.path()[1..]),
        vec!["a", "b", "c", "d", "e"]
    );
}

#[test]
fn test_diamond_is_visited_twice() {
    let mut ctx =
        ExecutionContext::open(memory_store(travel_registry()), ContextOptions::default()).unwrap();
    let root = ctx.root();
    let a = city(&mut ctx, "a");
    let b = city(&mut ctx, "b");
    let join = city(&mut ctx, "join");
    road(&mut ctx, root, a);
    road(&mut ctx, root, b);
    road(&mut ctx, a, join);
    road(&mut ctx, b, join);

    let mut walker = Walker::new(Architype::new("Tourist"));
    ctx.spawn(&mut walker, None).unwrap();

    assert_eq!(
        ctx.reports(),
        &[json!("a"), json!("b"), json!("join"), json!("join")]
    );
}

#[test]
fn test_spawn_on_explicit_start() {
    let mut ctx =
        ExecutionContext::open(memory_store(travel_registry()), ContextOptions::default()).unwrap();
    let nodes = two_level_tree(&mut ctx);

    let mut walker = Walker::new(Architype::new("Tourist"));
    ctx.spawn(&mut walker, Some(nodes[1])).unwrap();
    assert_eq!(ctx.take_reports(), vec![json!("b"), json!("d")]);

    // Respawn resets path and queue
    ctx.spawn(&mut walker, Some(nodes[2])).unwrap();
    assert_eq!(ctx.take_reports(), vec![json!("c"), json!("e")]);
    assert_eq!(walker.path(), &[nodes[2], nodes[4]]);
}

#[test]
fn test_trigger_matches_subclasses() {
    let mut ctx =
        ExecutionContext::open(memory_store(travel_registry()), ContextOptions::default()).unwrap();
    let root = ctx.root();
    let capital = ctx
        .graph_mut()
        .add_node(Architype::new("Capital").with_field("name", "paris"))
        .unwrap();
    road(&mut ctx, root, capital);

    // Greeter says hello at every City, including Capital, but not at Root
    let mut walker = Walker::new(Architype::new("Greeter"));
    ctx.spawn(&mut walker, None).unwrap();
    assert_eq!(ctx.reports(), &[json!("hello")]);
}

// ============================================================================
// Control Flow
// ============================================================================

#[test]
fn test_disengage_leaves_queue_unvisited() {
    let registry = TypeRegistry::new()
        .with(ArchitypeClass::node("City"))
        .unwrap()
        .with(ArchitypeClass::edge("Road"))
        .unwrap()
        .with(
            ArchitypeClass::walker("Searcher")
                .on_entry(Hook::new("look", |ctx| {
                    if ctx.field("name") == Some(&json!("c")) {
                        ctx.report("found");
                        ctx.disengage();
                    }
                    let next = ctx.neighbors(EdgeDir::Out)?;
                    ctx.visit(next)?;
                    Ok(())
                }))
                .on_exit(Hook::new("after", |ctx| {
                    ctx.report("exit");
                    Ok(())
                })),
        )
        .unwrap()
        .freeze();
    let mut ctx = ExecutionContext::open(memory_store(registry), ContextOptions::default()).unwrap();
    let nodes = two_level_tree(&mut ctx);

    let mut walker = Walker::new(Architype::new("Searcher"));
    let outcome = ctx.spawn(&mut walker, None).unwrap();

    assert_eq!(outcome, SpawnOutcome::Disengaged);
    assert!(walker.is_disengaged());
    // root, a, b exit normally; c stops before its exit hook
    assert_eq!(
        ctx.reports(),
        &[json!("exit"), json!("exit"), json!("exit"), json!("found")]
    );
    assert_eq!(walker.path().last(), Some(&nodes[2]));
    // d and the visit queued at c are still pending
    assert_eq!(walker.pending().count(), 2);
}

#[test]
fn test_unbound_hook_fails_spawn() {
    let registry = TypeRegistry::new()
        .with(ArchitypeClass::walker("Draft").on_entry(Hook::declared("todo")))
        .unwrap()
        .freeze();
    let mut ctx = ExecutionContext::open(memory_store(registry), ContextOptions::default()).unwrap();

    let mut walker = Walker::new(Architype::new("Draft"));
    let err = ctx.spawn(&mut walker, None).unwrap_err();
    assert!(matches!(
        err,
        ContextError::Engine(EngineError::UnresolvedHook { .. })
    ));
    // The context stays usable and still closes cleanly
    ctx.close().unwrap();
}

#[test]
fn test_unknown_walker_class_fails() {
    let mut ctx =
        ExecutionContext::open(memory_store(travel_registry()), ContextOptions::default()).unwrap();
    let mut walker = Walker::new(Architype::new("Ghost"));
    assert!(ctx.spawn(&mut walker, None).is_err());
}

#[test]
fn test_hooks_can_build_graph() {
    let registry = TypeRegistry::new()
        .with(ArchitypeClass::node("City"))
        .unwrap()
        .with(ArchitypeClass::edge("Road"))
        .unwrap()
        .with(
            ArchitypeClass::walker("Builder").on_entry(Hook::new("build", |ctx| {
                let depth = ctx.walker().path().len();
                if depth > 3 {
                    return Ok(());
                }
                let here = ctx.here();
                let graph = ctx.graph_mut();
                let next = graph.add_node(Architype::new("City").with_field("depth", depth))?;
                graph.connect(here, next, Architype::new("Road"), EdgeDir::Out)?;
                ctx.visit([next])?;
                Ok(())
            })),
        )
        .unwrap()
        .freeze();
    let store = memory_store(registry);
    let mut ctx = ExecutionContext::open(store.clone(), ContextOptions::default()).unwrap();

    let mut walker = Walker::new(Architype::new("Builder"));
    ctx.spawn(&mut walker, None).unwrap();
    assert_eq!(walker.path().len(), 4);
    assert_connectivity_consistent(ctx.graph());

    ctx.close().unwrap();
    // super root + 3 cities + 3 roads
    assert_eq!(store.count().unwrap(), 7);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_contexts_share_store_across_threads() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path(), travel_registry());
    // Create the super root once up front
    ExecutionContext::open(store.clone(), ContextOptions::default())
        .unwrap()
        .close()
        .unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let store = store.clone();
            scope.spawn(move || {
                ExecutionContext::scoped(store, ContextOptions::default(), |ctx| {
                    let graph = ctx.graph_mut();
                    let mut previous = graph.add_node(
                        Architype::new("City").with_field("name", format!("w{worker}-0")),
                    )?;
                    for step in 1..5 {
                        let next = graph.add_node(
                            Architype::new("City").with_field("name", format!("w{worker}-{step}")),
                        )?;
                        graph.connect(previous, next, Architype::new("Road"), EdgeDir::Out)?;
                        previous = next;
                    }
                    Ok(())
                })
                .expect("Worker run failed");
            });
        }
    });

    // super root + 4 workers x (5 cities + 4 roads)
    assert_eq!(store.count().unwrap(), 1 + 4 * 9);
}
