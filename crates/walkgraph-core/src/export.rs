//! Graph Export
//!
//! Walks the object graph outward from a start node and renders what it saw
//! as Graphviz DOT. The traversal is bounded by an optional depth and by
//! node and edge caps; it stops as soon as either cap is reached. Nodes the
//! caller may not see are left out together with their edges.
//!
//! Breadth-first export expands nodes level by level. Depth-first export
//! descends into every newly discovered node before following the next edge
//! of its parent, so a node's depth is its depth along the descent.

use crate::access::AccessGuard;
use crate::anchor::{Anchor, AnchorId, EdgeDir};
use crate::graph::{GraphError, ObjectGraph};
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;
use walkgraph_config::ExportConfig;

/// Default cap on exported nodes
pub const DEFAULT_NODE_LIMIT: usize = 512;

/// Default cap on exported edges
pub const DEFAULT_EDGE_LIMIT: usize = 512;

/// What to export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Start node; the context root when absent
    pub start: Option<AnchorId>,
    /// Maximum distance from the start; unlimited when absent
    pub depth: Option<usize>,
    /// Which edges to follow from each node
    pub dir: EdgeDir,
    /// Only follow edges of these classes (or subclasses); empty follows all
    pub edge_types: Vec<String>,
    pub node_limit: usize,
    pub edge_limit: usize,
    /// Breadth-first when set, depth-first otherwise
    pub bfs: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            start: None,
            depth: None,
            dir: EdgeDir::Any,
            edge_types: Vec::new(),
            node_limit: DEFAULT_NODE_LIMIT,
            edge_limit: DEFAULT_EDGE_LIMIT,
            bfs: false,
        }
    }
}

impl ExportOptions {
    /// Options from the `[export]` config section (`depth = -1` is unlimited)
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            depth: usize::try_from(config.depth).ok(),
            node_limit: config.node_limit,
            edge_limit: config.edge_limit,
            bfs: config.bfs,
            ..Self::default()
        }
    }

    pub fn with_start(mut self, start: AnchorId) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_edge_type(mut self, class: impl Into<String>) -> Self {
        self.edge_types.push(class.into());
        self
    }
}

/// Exported subgraph.
#[derive(Debug, Clone)]
pub struct GraphExport {
    graph: DiGraph<String, String>,
    nodes: Vec<AnchorId>,
    edges: Vec<AnchorId>,
}

impl GraphExport {
    fn empty() -> Self {
        Self {
            graph: DiGraph::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Exported node ids in discovery order
    pub fn nodes(&self) -> &[AnchorId] {
        &self.nodes
    }

    /// Exported edge ids in discovery order
    pub fn edges(&self) -> &[AnchorId] {
        &self.edges
    }

    pub fn graph(&self) -> &DiGraph<String, String> {
        &self.graph
    }

    /// Graphviz DOT text
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::new(&self.graph))
    }
}

/// Label used for both nodes and edges: `Class(field=value, ...)`.
fn label(anchor: &Anchor) -> String {
    let fields: Vec<String> = anchor
        .architype()
        .fields()
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    format!("{}({})", anchor.name(), fields.join(", "))
}

/// What following one edge from an exported node led to.
enum Step {
    /// A cap was reached; the export is complete
    Stop,
    /// Nothing new was exported
    Skip,
    /// The edge was exported and reached a node already exported
    Linked,
    /// The edge was exported and reached a new node
    Discovered(AnchorId),
}

/// Pending expansion of one node during a depth-first export.
struct Frame {
    node: AnchorId,
    depth: usize,
    edges: Vec<AnchorId>,
    next: usize,
}

struct Exporter<'a> {
    graph: &'a mut ObjectGraph,
    guard: &'a AccessGuard,
    options: &'a ExportOptions,
    export: GraphExport,
    indices: HashMap<AnchorId, NodeIndex>,
    seen_edges: HashSet<AnchorId>,
}

impl Exporter<'_> {
    /// Edges to follow from `node`, or none once the depth limit is reached.
    fn edges_at(&mut self, node: AnchorId, depth: usize) -> Result<Vec<AnchorId>, GraphError> {
        if self.options.depth.is_some_and(|max| depth >= max) {
            return Ok(Vec::new());
        }
        self.graph.edges(node, self.options.dir)
    }

    fn follow(&mut self, node: AnchorId, edge_id: AnchorId) -> Result<Step, GraphError> {
        if self.export.edges.len() >= self.options.edge_limit {
            return Ok(Step::Stop);
        }
        if !self.seen_edges.insert(edge_id) {
            return Ok(Step::Skip);
        }
        let Some(edge) = self.graph.get(edge_id) else {
            return Ok(Step::Skip);
        };
        let Some(links) = edge.edge_links() else {
            return Ok(Step::Skip);
        };
        if links.source.id == links.target.id {
            return Ok(Step::Skip);
        }
        if !self.options.edge_types.is_empty()
            && !self
                .options
                .edge_types
                .iter()
                .any(|class| self.graph.registry().is_a(edge.name(), class))
        {
            return Ok(Step::Skip);
        }

        let edge_label = label(edge);
        let outgoing = links.source.id == node;
        let far = links.opposite(node).clone();

        let Some(far_id) = self.graph.materialize(&far)? else {
            return Ok(Step::Skip);
        };
        let Some(far_anchor) = self.graph.get(far_id) else {
            return Ok(Step::Skip);
        };
        if !self.guard.validate_access(far_anchor).is_granted() {
            return Ok(Step::Skip);
        }

        let (far_index, step) = match self.indices.get(&far_id) {
            Some(index) => (*index, Step::Linked),
            None => {
                if self.export.nodes.len() >= self.options.node_limit {
                    return Ok(Step::Stop);
                }
                let index = self.export.graph.add_node(label(far_anchor));
                self.indices.insert(far_id, index);
                self.export.nodes.push(far_id);
                (index, Step::Discovered(far_id))
            }
        };

        let Some(&node_index) = self.indices.get(&node) else {
            return Ok(Step::Skip);
        };
        let (from, to) = if outgoing {
            (node_index, far_index)
        } else {
            (far_index, node_index)
        };
        self.export.graph.add_edge(from, to, edge_label);
        self.export.edges.push(edge_id);
        Ok(step)
    }

    /// Expand every node of a level before the next level.
    fn breadth_first(&mut self, start: AnchorId) -> Result<(), GraphError> {
        let mut frontier: VecDeque<(AnchorId, usize)> = VecDeque::from([(start, 0)]);
        while let Some((node, depth)) = frontier.pop_front() {
            for edge_id in self.edges_at(node, depth)? {
                match self.follow(node, edge_id)? {
                    Step::Stop => return Ok(()),
                    Step::Discovered(far) => frontier.push_back((far, depth + 1)),
                    Step::Skip | Step::Linked => {}
                }
            }
        }
        Ok(())
    }

    /// Descend into each newly discovered node before its siblings.
    fn depth_first(&mut self, start: AnchorId) -> Result<(), GraphError> {
        let mut stack = vec![Frame {
            node: start,
            depth: 0,
            edges: self.edges_at(start, 0)?,
            next: 0,
        }];
        while let Some(frame) = stack.last_mut() {
            let Some(&edge_id) = frame.edges.get(frame.next) else {
                stack.pop();
                continue;
            };
            frame.next += 1;
            let (node, depth) = (frame.node, frame.depth);

            match self.follow(node, edge_id)? {
                Step::Stop => return Ok(()),
                Step::Discovered(far) => stack.push(Frame {
                    node: far,
                    depth: depth + 1,
                    edges: self.edges_at(far, depth + 1)?,
                    next: 0,
                }),
                Step::Skip | Step::Linked => {}
            }
        }
        Ok(())
    }
}

/// Export the part of `graph` reachable from `start` under `options`.
pub fn export_graph(
    graph: &mut ObjectGraph,
    guard: &AccessGuard,
    start: AnchorId,
    options: &ExportOptions,
) -> Result<GraphExport, GraphError> {
    let mut export = GraphExport::empty();
    let start_anchor = graph.require_node(start)?;
    if !guard.validate_access(start_anchor).is_granted() || options.node_limit == 0 {
        return Ok(export);
    }

    let start_index = export.graph.add_node(label(start_anchor));
    export.nodes.push(start);

    let mut exporter = Exporter {
        graph,
        guard,
        options,
        export,
        indices: HashMap::from([(start, start_index)]),
        seen_edges: HashSet::new(),
    };
    if options.bfs {
        exporter.breadth_first(start)?;
    } else {
        exporter.depth_first(start)?;
    }

    let export = exporter.export;
    debug!(
        "Exported {} nodes and {} edges from {}",
        export.nodes.len(),
        export.edges.len(),
        start
    );
    Ok(export)
}
