//! Architype Class Registry
//!
//! Holds every class the graph and walkers may instantiate, keyed by class
//! name. Each class declares its kind, optional base classes and two ordered
//! hook tables (entry and exit). Hooks are `(name, trigger types, callable)`
//! triples; dispatch walks the tables in order and matches triggers against
//! the runtime class of the other party, following declared bases.
//!
//! The registry is built once, then frozen behind an `Arc` and injected into
//! the graph and the store. Nothing mutates it afterwards.

use crate::anchor::{AnchorKind, GENERIC_EDGE_CLASS, ROOT_CLASS};
use crate::walker::HookContext;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building or querying the registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Class already registered: {0}")]
    DuplicateClass(String),

    #[error("Unknown class: {0}")]
    UnknownClass(String),

    #[error("Class '{name}' is a {found}, expected a {expected}")]
    KindMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Class '{class}' declares no hook named '{hook}'")]
    UnknownHook { class: String, hook: String },
}

/// Callable body of a hook.
///
/// Receives the hook context for the current (node, walker) meeting and
/// returns any error the body produced.
pub type HookFn = Arc<dyn Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// One entry of a class's hook table.
#[derive(Clone)]
pub struct Hook {
    name: String,
    /// Class names that trigger this hook; empty matches every class
    trigger: Vec<String>,
    func: Option<HookFn>,
}

impl Hook {
    /// A hook bound to its callable
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            trigger: Vec::new(),
            func: Some(Arc::new(func)),
        }
    }

    /// A hook declared by name whose callable is bound later
    pub fn declared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger: Vec::new(),
            func: None,
        }
    }

    /// Restrict the hook to meetings with `class` (repeatable for unions)
    pub fn on(mut self, class: impl Into<String>) -> Self {
        self.trigger.push(class.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> &[String] {
        &self.trigger
    }

    pub fn func(&self) -> Option<&HookFn> {
        self.func.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.func.is_some()
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("bound", &self.func.is_some())
            .finish()
    }
}

/// Which of a class's two hook tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Entry,
    Exit,
}

/// A registered architype class.
#[derive(Debug, Clone)]
pub struct ArchitypeClass {
    name: String,
    kind: AnchorKind,
    bases: Vec<String>,
    entry: Vec<Hook>,
    exit: Vec<Hook>,
}

impl ArchitypeClass {
    fn with_kind(name: impl Into<String>, kind: AnchorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bases: Vec::new(),
            entry: Vec::new(),
            exit: Vec::new(),
        }
    }

    pub fn node(name: impl Into<String>) -> Self {
        Self::with_kind(name, AnchorKind::Node)
    }

    pub fn edge(name: impl Into<String>) -> Self {
        Self::with_kind(name, AnchorKind::Edge)
    }

    pub fn walker(name: impl Into<String>) -> Self {
        Self::with_kind(name, AnchorKind::Walker)
    }

    /// Declare a base class used when matching hook triggers
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.bases.push(base.into());
        self
    }

    pub fn on_entry(mut self, hook: Hook) -> Self {
        self.entry.push(hook);
        self
    }

    pub fn on_exit(mut self, hook: Hook) -> Self {
        self.exit.push(hook);
        self
    }

    /// Bind the callable of a previously declared hook (both tables).
    pub fn bind<F>(mut self, hook: &str, func: F) -> Result<Self, RegistryError>
    where
        F: Fn(&mut HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let func: HookFn = Arc::new(func);
        let mut found = false;
        for entry in self
            .entry
            .iter_mut()
            .chain(self.exit.iter_mut())
            .filter(|h| h.name == hook)
        {
            entry.func = Some(func.clone());
            found = true;
        }
        if !found {
            return Err(RegistryError::UnknownHook {
                class: self.name.clone(),
                hook: hook.to_string(),
            });
        }
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AnchorKind {
        self.kind
    }

    pub fn bases(&self) -> &[String] {
        &self.bases
    }

    pub fn hooks(&self, phase: HookPhase) -> &[Hook] {
        match phase {
            HookPhase::Entry => &self.entry,
            HookPhase::Exit => &self.exit,
        }
    }
}

/// Registry of architype classes, injected wherever class lookups happen.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    classes: HashMap<String, ArchitypeClass>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry holding only the builtin `Root` and `GenericEdge` classes
    pub fn new() -> Self {
        let mut classes = HashMap::new();
        classes.insert(
            ROOT_CLASS.to_string(),
            ArchitypeClass::with_kind(ROOT_CLASS, AnchorKind::Root),
        );
        classes.insert(
            GENERIC_EDGE_CLASS.to_string(),
            ArchitypeClass::edge(GENERIC_EDGE_CLASS),
        );
        Self { classes }
    }

    /// Register a class; names are unique.
    pub fn register(&mut self, class: ArchitypeClass) -> Result<(), RegistryError> {
        if self.classes.contains_key(class.name()) {
            return Err(RegistryError::DuplicateClass(class.name.clone()));
        }
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, class: ArchitypeClass) -> Result<Self, RegistryError> {
        self.register(class)?;
        Ok(self)
    }

    /// Freeze the registry for sharing
    pub fn freeze(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn get(&self, name: &str) -> Option<&ArchitypeClass> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Look up a class and check it has the expected kind.
    ///
    /// `Node` accepts both node and root classes.
    pub fn expect_kind(
        &self,
        name: &str,
        kind: AnchorKind,
    ) -> Result<&ArchitypeClass, RegistryError> {
        let class = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownClass(name.to_string()))?;
        let compatible = match kind {
            AnchorKind::Node => class.kind.is_node_like(),
            other => class.kind == other,
        };
        if !compatible {
            return Err(RegistryError::KindMismatch {
                name: name.to_string(),
                expected: kind.as_str(),
                found: class.kind.as_str(),
            });
        }
        Ok(class)
    }

    /// Whether `class` is `ancestor` or derives from it through declared bases.
    ///
    /// Unknown classes only match themselves.
    pub fn is_a(&self, class: &str, ancestor: &str) -> bool {
        let mut pending = vec![class];
        let mut seen = HashSet::new();
        while let Some(current) = pending.pop() {
            if current == ancestor {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(found) = self.classes.get(current) {
                pending.extend(found.bases.iter().map(String::as_str));
            }
        }
        false
    }

    /// Whether `hook` fires when meeting an instance of `class`
    pub fn triggers(&self, hook: &Hook, class: &str) -> bool {
        hook.trigger.is_empty() || hook.trigger.iter().any(|t| self.is_a(class, t))
    }
}
