//! Execution Context
//!
//! Bounds one run against a shared [`AnchorStore`]: owns the run's
//! [`ObjectGraph`], resolves the namespace roots, drives walkers and collects
//! their reports, and flushes new or mutated anchors when it closes.
//!
//! Closing happens exactly once. It runs on [`ExecutionContext::close`], on
//! drop, or at the end of [`ExecutionContext::scoped`], whichever comes
//! first. A context whose flush failed is poisoned and closes without
//! writing again.

use crate::access::{Access, AccessGuard, Caller};
use crate::anchor::{AccessLevel, AnchorId};
use crate::export::{export_graph, ExportOptions, GraphExport};
use crate::graph::{GraphError, ObjectGraph};
use crate::store::{AnchorRecord, AnchorStore, StoreError};
use crate::walker::{EngineError, SpawnOutcome, Walker, WalkerEngine};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkgraph_config::WalkgraphConfig;

/// Errors surfaced by an execution context
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Execution context is closed")]
    Closed,

    #[error("Execution context is poisoned by a failed save")]
    Poisoned,
}

/// How to open a context.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Root to run under; the super root when absent or unknown
    pub root: Option<AnchorId>,
    /// Default spawn target; the root when absent or unknown
    pub entry: Option<AnchorId>,
    pub caller: Caller,
    /// Access level stamped on anchors created in this context
    pub default_access: AccessLevel,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            root: None,
            entry: None,
            caller: Caller::owner(),
            default_access: AccessLevel::default(),
        }
    }
}

impl ContextOptions {
    pub fn from_config(config: &WalkgraphConfig) -> Self {
        Self {
            caller: Caller::from_config(&config.access),
            default_access: config.access.default_level.into(),
            ..Self::default()
        }
    }

    pub fn with_root(mut self, root: AnchorId) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_entry(mut self, entry: AnchorId) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn with_caller(mut self, caller: Caller) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_default_access(mut self, level: AccessLevel) -> Self {
        self.default_access = level;
        self
    }
}

/// Result of [`ExecutionContext::get_object`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectResponse {
    /// Serialized record of the anchor
    Found(Value),
    Denied,
    NotFound,
}

impl ObjectResponse {
    pub fn is_found(&self) -> bool {
        matches!(self, ObjectResponse::Found(_))
    }

    /// The record, or an empty object when denied or missing
    pub fn into_json(self) -> Value {
        match self {
            ObjectResponse::Found(value) => value,
            ObjectResponse::Denied | ObjectResponse::NotFound => json!({}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Open,
    Poisoned,
    Closed,
}

/// One run over the shared store.
pub struct ExecutionContext {
    store: Arc<AnchorStore>,
    graph: ObjectGraph,
    guard: AccessGuard,
    super_root: AnchorId,
    root: AnchorId,
    entry: AnchorId,
    reports: Vec<Value>,
    state: ContextState,
}

impl ExecutionContext {
    /// Open a context, creating and persisting the super root on first use.
    pub fn open(store: Arc<AnchorStore>, options: ContextOptions) -> Result<Self, ContextError> {
        let mut graph = ObjectGraph::with_source(store.registry().clone(), store.clone());
        graph.set_default_access(options.default_access);

        let mut ctx = Self {
            store,
            graph,
            guard: AccessGuard::new(options.caller),
            super_root: AnchorId::super_root(),
            root: AnchorId::super_root(),
            entry: AnchorId::super_root(),
            reports: Vec::new(),
            state: ContextState::Open,
        };

        ctx.super_root = ctx.load(Some(AnchorId::super_root()), Self::create_super_root)?;
        ctx.root = ctx.load(options.root, |ctx| Ok(ctx.super_root))?;
        ctx.entry = ctx.load(options.entry, |ctx| Ok(ctx.root))?;

        info!("Opened execution context (root {}, entry {})", ctx.root, ctx.entry);
        Ok(ctx)
    }

    /// Run `body` in a fresh context and close it on every path.
    pub fn scoped<T, F>(
        store: Arc<AnchorStore>,
        options: ContextOptions,
        body: F,
    ) -> Result<T, ContextError>
    where
        F: FnOnce(&mut ExecutionContext) -> Result<T, ContextError>,
    {
        let mut ctx = Self::open(store, options)?;
        match body(&mut ctx) {
            Ok(value) => {
                ctx.close()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(close_err) = ctx.close() {
                    warn!("Close after failed run also failed: {}", close_err);
                }
                Err(err)
            }
        }
    }

    fn create_super_root(&mut self) -> Result<AnchorId, ContextError> {
        let id = self.graph.add_root(AnchorId::super_root());
        self.save(id)?;
        info!("Created super root {}", id);
        Ok(id)
    }

    /// Bring node `id` into the graph with owner access, or fall back to
    /// `default` when it is missing or not a node.
    pub fn load<F>(&mut self, id: Option<AnchorId>, default: F) -> Result<AnchorId, ContextError>
    where
        F: FnOnce(&mut Self) -> Result<AnchorId, ContextError>,
    {
        if let Some(id) = id {
            if !self.graph.contains(id) {
                match self.store.load(id)? {
                    Some(anchor) if anchor.is_node() => {
                        self.graph.insert(anchor);
                        debug!("Loaded {} through the owner path", id);
                    }
                    Some(_) => debug!("Stored anchor {} is not a node", id),
                    None => debug!("No stored anchor {}", id),
                }
            }
            if self.graph.require_node(id).is_ok() {
                self.graph.escalate(id);
                return Ok(id);
            }
            debug!("Using default in place of {}", id);
        }
        default(self)
    }

    /// Load `id` without escalation; `false` if it does not exist.
    fn ensure_loaded(&mut self, id: AnchorId) -> Result<bool, ContextError> {
        if self.graph.contains(id) {
            return Ok(true);
        }
        match self.store.load(id)? {
            Some(anchor) => {
                self.graph.insert(anchor);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn ensure_open(&self) -> Result<(), ContextError> {
        match self.state {
            ContextState::Open => Ok(()),
            ContextState::Poisoned => Err(ContextError::Poisoned),
            ContextState::Closed => Err(ContextError::Closed),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn super_root(&self) -> AnchorId {
        self.super_root
    }

    pub fn root(&self) -> AnchorId {
        self.root
    }

    pub fn entry(&self) -> AnchorId {
        self.entry
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ObjectGraph {
        &mut self.graph
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub fn store(&self) -> &Arc<AnchorStore> {
        &self.store
    }

    /// Values reported so far, in order
    pub fn reports(&self) -> &[Value] {
        &self.reports
    }

    pub fn take_reports(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.reports)
    }

    pub fn report(&mut self, value: impl Into<Value>) {
        self.reports.push(value.into());
    }

    pub fn is_closed(&self) -> bool {
        self.state == ContextState::Closed
    }

    pub fn is_poisoned(&self) -> bool {
        self.state == ContextState::Poisoned
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Run `walker` from `start` (the entry node by default).
    pub fn spawn(
        &mut self,
        walker: &mut Walker,
        start: Option<AnchorId>,
    ) -> Result<SpawnOutcome, ContextError> {
        self.ensure_open()?;
        let start = start.unwrap_or(self.entry);
        if !self.ensure_loaded(start)? {
            return Err(GraphError::UnknownAnchor(start).into());
        }

        let mut engine = WalkerEngine::new(&mut self.graph, &self.guard, &mut self.reports);
        Ok(engine.spawn(walker, start)?)
    }

    /// Serialized record of `id` if it exists and the caller may see it.
    pub fn get_object(&mut self, id: AnchorId) -> Result<ObjectResponse, ContextError> {
        self.ensure_open()?;
        if !self.ensure_loaded(id)? {
            return Ok(ObjectResponse::NotFound);
        }
        let Some(anchor) = self.graph.get(id) else {
            return Ok(ObjectResponse::NotFound);
        };
        if self.guard.validate_access(anchor) == Access::Denied {
            return Ok(ObjectResponse::Denied);
        }
        Ok(ObjectResponse::Found(
            AnchorRecord::from_anchor(anchor).to_json()?,
        ))
    }

    /// Export the graph around `options.start` (the root by default).
    pub fn export(&mut self, options: &ExportOptions) -> Result<GraphExport, ContextError> {
        self.ensure_open()?;
        let start = options.start.unwrap_or(self.root);
        if !self.ensure_loaded(start)? {
            return Err(GraphError::UnknownAnchor(start).into());
        }
        Ok(export_graph(&mut self.graph, &self.guard, start, options)?)
    }

    /// Persist one anchor now. A failure poisons the context.
    pub fn save(&mut self, id: AnchorId) -> Result<(), ContextError> {
        self.ensure_open()?;
        if let Err(err) = self.store.save(&mut self.graph, id) {
            self.state = ContextState::Poisoned;
            return Err(err.into());
        }
        Ok(())
    }

    /// Persist every new or mutated anchor. A failure poisons the context.
    pub fn flush(&mut self) -> Result<usize, ContextError> {
        self.ensure_open()?;
        match self.store.flush(&mut self.graph) {
            Ok(written) => Ok(written),
            Err(err) => {
                self.state = ContextState::Poisoned;
                Err(err.into())
            }
        }
    }

    /// Flush and close. Later calls do nothing.
    pub fn close(&mut self) -> Result<(), ContextError> {
        match self.state {
            ContextState::Closed => Ok(()),
            ContextState::Poisoned => {
                warn!("Closing poisoned context without flushing");
                self.state = ContextState::Closed;
                Ok(())
            }
            ContextState::Open => {
                let result = self.store.flush(&mut self.graph);
                self.state = ContextState::Closed;
                let written = result?;
                info!("Closed execution context ({} rows written)", written);
                Ok(())
            }
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!("Failed to close execution context: {}", err);
        }
    }
}
