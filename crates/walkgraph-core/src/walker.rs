//! Walker Traversal Engine
//!
//! A walker is an ephemeral agent that is spawned onto a node and then moves
//! through the graph breadth-first. At every node it reaches, the engine
//! fires four hook groups in a fixed order:
//!
//! 1. node entry hooks matching the walker's class
//! 2. walker entry hooks matching the node's class
//! 3. walker exit hooks matching the node's class
//! 4. node exit hooks matching the walker's class
//!
//! Hooks steer the walk through [`HookContext`]: `visit` appends nodes to the
//! queue, `ignore` excludes nodes from future visits and `disengage` stops
//! the walk right after the current hook returns.

use crate::access::AccessGuard;
use crate::anchor::{Anchor, AnchorId, AnchorKind, Architype, EdgeDir};
use crate::graph::{GraphError, ObjectGraph};
use crate::registry::{ArchitypeClass, HookPhase, RegistryError, TypeRegistry};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors raised while running a walker
#[derive(Debug, Error)]
pub enum EngineError {
    /// A matched hook was declared but never given a body
    #[error("Hook '{hook}' of class '{class}' has no bound function")]
    UnresolvedHook { class: String, hook: String },

    /// A visit target could not be resolved to a node
    #[error("Cannot resolve {target} to a node from {from}")]
    GraphIntegrity { from: AnchorId, target: AnchorId },

    /// A hook body returned an error
    #[error("Hook '{hook}' failed: {source}")]
    Hook {
        hook: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

// ============================================================================
// Walker
// ============================================================================

/// Lifecycle of a walker across spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkerState {
    #[default]
    Idle,
    Running,
    Disengaged,
}

/// How a spawn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// The queue emptied
    Drained,
    /// A hook disengaged the walker
    Disengaged,
}

/// A mobile computation unit. Never persisted.
#[derive(Debug, Clone)]
pub struct Walker {
    id: AnchorId,
    architype: Architype,
    queue: VecDeque<AnchorId>,
    ignores: HashSet<AnchorId>,
    path: Vec<AnchorId>,
    disengaged: bool,
    state: WalkerState,
}

impl Walker {
    pub fn new(architype: Architype) -> Self {
        Self {
            id: AnchorId::new(),
            architype,
            queue: VecDeque::new(),
            ignores: HashSet::new(),
            path: Vec::new(),
            disengaged: false,
            state: WalkerState::Idle,
        }
    }

    pub fn id(&self) -> AnchorId {
        self.id
    }

    /// Class name
    pub fn name(&self) -> &str {
        self.architype.name()
    }

    pub fn architype(&self) -> &Architype {
        &self.architype
    }

    pub fn architype_mut(&mut self) -> &mut Architype {
        &mut self.architype
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    pub fn is_disengaged(&self) -> bool {
        self.disengaged
    }

    /// Nodes entered during the current or last spawn, in order
    pub fn path(&self) -> &[AnchorId] {
        &self.path
    }

    /// Nodes still waiting to be visited
    pub fn pending(&self) -> impl Iterator<Item = &AnchorId> {
        self.queue.iter()
    }

    pub fn is_ignored(&self, id: AnchorId) -> bool {
        self.ignores.contains(&id)
    }

    fn reset(&mut self, start: AnchorId) {
        self.path.clear();
        self.ignores.clear();
        self.queue.clear();
        self.queue.push_back(start);
        self.disengaged = false;
        self.state = WalkerState::Running;
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Drives walkers over one context's graph.
pub struct WalkerEngine<'a> {
    graph: &'a mut ObjectGraph,
    guard: &'a AccessGuard,
    reports: &'a mut Vec<Value>,
}

impl<'a> WalkerEngine<'a> {
    pub fn new(
        graph: &'a mut ObjectGraph,
        guard: &'a AccessGuard,
        reports: &'a mut Vec<Value>,
    ) -> Self {
        Self {
            graph,
            guard,
            reports,
        }
    }

    /// Run `walker` from `start` until its queue drains or it disengages.
    ///
    /// Errors abort the walk and leave the walker `Idle`; hooks that already
    /// ran are not undone.
    pub fn spawn(
        &mut self,
        walker: &mut Walker,
        start: AnchorId,
    ) -> Result<SpawnOutcome, EngineError> {
        let registry = self.graph.registry().clone();
        let walker_class = registry.expect_kind(walker.name(), AnchorKind::Walker)?;
        let start = self.resolve_start(start)?;

        walker.reset(start);
        debug!("Spawned {} {} at {}", walker.name(), walker.id(), start);

        let outcome = self.drain(walker, &registry, walker_class);
        if let Err(err) = &outcome {
            walker.state = WalkerState::Idle;
            debug!("{} {} aborted: {}", walker.name(), walker.id(), err);
        }
        outcome
    }

    fn drain(
        &mut self,
        walker: &mut Walker,
        registry: &TypeRegistry,
        walker_class: &ArchitypeClass,
    ) -> Result<SpawnOutcome, EngineError> {
        while let Some(here) = walker.queue.pop_front() {
            let Some(anchor) = self.graph.get(here) else {
                debug!("Skipping vanished node {}", here);
                continue;
            };
            if !self.guard.validate_access(anchor).is_granted() {
                debug!("Access denied to {}, skipping", here);
                continue;
            }
            let node_name = anchor.name().to_string();
            let node_class = registry
                .get(&node_name)
                .ok_or_else(|| RegistryError::UnknownClass(node_name.clone()))?;
            let walker_name = walker.name().to_string();

            walker.path.push(here);
            trace!("{} entering {} ({})", walker_name, here, node_name);

            let phases: [(&ArchitypeClass, HookPhase, &str); 4] = [
                (node_class, HookPhase::Entry, &walker_name),
                (walker_class, HookPhase::Entry, &node_name),
                (walker_class, HookPhase::Exit, &node_name),
                (node_class, HookPhase::Exit, &walker_name),
            ];

            for (class, phase, other) in phases {
                for hook in class.hooks(phase) {
                    if !registry.triggers(hook, other) {
                        continue;
                    }
                    let func = hook.func().ok_or_else(|| EngineError::UnresolvedHook {
                        class: class.name().to_string(),
                        hook: hook.name().to_string(),
                    })?;

                    trace!("Firing {}.{} at {}", class.name(), hook.name(), here);
                    let mut ctx = HookContext {
                        graph: &mut *self.graph,
                        walker: &mut *walker,
                        guard: self.guard,
                        reports: &mut *self.reports,
                        here,
                    };
                    func(&mut ctx).map_err(|err| match err.downcast::<EngineError>() {
                        Ok(engine) => engine,
                        Err(other) => EngineError::Hook {
                            hook: format!("{}.{}", class.name(), hook.name()),
                            source: other.into(),
                        },
                    })?;

                    if walker.disengaged {
                        walker.state = WalkerState::Disengaged;
                        debug!("{} {} disengaged at {}", walker_name, walker.id(), here);
                        return Ok(SpawnOutcome::Disengaged);
                    }
                }
            }
        }

        walker.ignores.clear();
        walker.state = WalkerState::Idle;
        debug!("{} {} drained", walker.name(), walker.id());
        Ok(SpawnOutcome::Drained)
    }

    /// Starting on an edge means starting on its target.
    fn resolve_start(&mut self, start: AnchorId) -> Result<AnchorId, EngineError> {
        let anchor = self
            .graph
            .get(start)
            .ok_or(GraphError::UnknownAnchor(start))?;
        match anchor.edge_links() {
            None => {
                self.graph.require_node(start)?;
                Ok(start)
            }
            Some(links) => {
                let target = links.target.clone();
                self.graph
                    .materialize(&target)?
                    .ok_or(EngineError::GraphIntegrity {
                        from: start,
                        target: target.id,
                    })
            }
        }
    }
}

// ============================================================================
// Hook context
// ============================================================================

/// Everything a hook body may touch while the walker sits on a node.
pub struct HookContext<'a> {
    graph: &'a mut ObjectGraph,
    walker: &'a mut Walker,
    guard: &'a AccessGuard,
    reports: &'a mut Vec<Value>,
    here: AnchorId,
}

impl HookContext<'_> {
    /// The node the walker is on
    pub fn here(&self) -> AnchorId {
        self.here
    }

    pub fn node(&self) -> Option<&Anchor> {
        self.graph.get(self.here)
    }

    /// Field of the current node
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.graph.field(self.here, key)
    }

    pub fn set_field(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<(), EngineError> {
        self.graph.set_field(self.here, key, value)?;
        Ok(())
    }

    pub fn walker(&self) -> &Walker {
        &*self.walker
    }

    pub fn walker_mut(&mut self) -> &mut Walker {
        &mut *self.walker
    }

    pub fn graph(&self) -> &ObjectGraph {
        &*self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ObjectGraph {
        &mut *self.graph
    }

    pub fn guard(&self) -> &AccessGuard {
        self.guard
    }

    /// Nodes adjacent to the current one in the given direction
    pub fn neighbors(&mut self, dir: EdgeDir) -> Result<Vec<AnchorId>, EngineError> {
        Ok(self.graph.edges_to_nodes(self.here, dir, None, None)?)
    }

    /// Adjacent nodes reached through edges of `edge_type` (or a subclass)
    pub fn neighbors_via(
        &mut self,
        dir: EdgeDir,
        edge_type: &str,
    ) -> Result<Vec<AnchorId>, EngineError> {
        Ok(self
            .graph
            .edges_to_nodes(self.here, dir, Some(edge_type), None)?)
    }

    /// Append targets to the end of the queue.
    ///
    /// Edges resolve to their endpoint opposite the current node. Ignored
    /// nodes are dropped; nothing else is deduplicated, so a node passed twice
    /// is visited twice. Returns whether anything was queued.
    pub fn visit<I>(&mut self, targets: I) -> Result<bool, EngineError>
    where
        I: IntoIterator<Item = AnchorId>,
    {
        let mut queued = false;
        for target in targets {
            let node = self.resolve_node(target)?;
            if self.walker.ignores.contains(&node) {
                continue;
            }
            self.walker.queue.push_back(node);
            queued = true;
        }
        Ok(queued)
    }

    /// Exclude targets from future visits during this spawn.
    ///
    /// Returns whether any target was newly ignored.
    pub fn ignore<I>(&mut self, targets: I) -> Result<bool, EngineError>
    where
        I: IntoIterator<Item = AnchorId>,
    {
        let mut added = false;
        for target in targets {
            let node = self.resolve_node(target)?;
            added |= self.walker.ignores.insert(node);
        }
        Ok(added)
    }

    /// Stop the walk once the current hook returns.
    pub fn disengage(&mut self) {
        self.walker.disengaged = true;
    }

    /// Append a value to the context's reports.
    pub fn report(&mut self, value: impl Into<Value>) {
        self.reports.push(value.into());
    }

    fn resolve_node(&mut self, target: AnchorId) -> Result<AnchorId, EngineError> {
        let integrity = EngineError::GraphIntegrity {
            from: self.here,
            target,
        };
        let Some(anchor) = self.graph.get(target) else {
            return Err(integrity);
        };
        match anchor.edge_links() {
            None if anchor.is_node() => Ok(target),
            None => Err(integrity),
            Some(links) => {
                let far = links.opposite(self.here).clone();
                self.graph.materialize(&far)?.ok_or(integrity)
            }
        }
    }
}
