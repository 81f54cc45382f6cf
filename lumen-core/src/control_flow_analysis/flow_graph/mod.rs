//! The flow graph: pseudo-instructions connected by labeled control edges,
//! one graph per function and per lambda literal. Graphs are fully built in a
//! single pass and are read-only afterwards; the reachability pass and the
//! dump layer never mutate them.

use std::fmt;

use crate::{language::Literal, reflection::CallableHandle};
use lumen_error::error::CompileError;
use lumen_types::{Ident, Span};

use petgraph::{prelude::NodeIndex, visit::EdgeRef, Direction};

mod namespace;
pub(crate) use namespace::{ControlFlowNamespace, FunctionNamespaceEntry};

pub type Graph = petgraph::Graph<FlowGraphNode, FlowGraphEdge>;

/// Identity of one graph inside a [FlowForest]. Cross-graph linkage (call
/// targets, lambda bodies, non-local return targets) is always by id, never
/// by merging node lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(pub u32);

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// An opaque result identifier. Produced by exactly one instruction and
/// consumed by zero or more later instructions in the same graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// A named join point inside one graph. Numbered by a per-graph monotonic
/// counter at creation time; never renumbered, so gaps appear when a join is
/// later proven unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

#[derive(Debug, Clone)]
pub struct ValueInfo {
    pub producer: Option<NodeIndex>,
    /// The `!` tag: this value is known never to be observed on a live path.
    pub non_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowGraphEdge {
    Normal,
    TrueBranch,
    FalseBranch,
    /// Never traversed by the reachability pass, by construction.
    Dead,
}

impl fmt::Display for FlowGraphEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowGraphEdge::Normal => Ok(()),
            FlowGraphEdge::TrueBranch => write!(f, "T"),
            FlowGraphEdge::FalseBranch => write!(f, "F"),
            FlowGraphEdge::Dead => write!(f, "D"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadSource {
    Variable(Ident),
    Constant(Literal),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MagicKind {
    /// Assembles an interpolated string from its parts.
    StringTemplate,
    /// The implicit null result of a short-circuited safe call.
    ImplicitNull,
    /// A lambda literal in expression position; the body lives in `0`.
    LambdaValue(GraphId),
    /// Producer for the shadow return of a lambda that never completes.
    Shadow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallTargetRef {
    Local { name: Ident, graph: GraphId },
    External(CallableHandle),
}

impl CallTargetRef {
    pub fn name(&self) -> &Ident {
        match self {
            CallTargetRef::Local { name, .. } => name,
            CallTargetRef::External(handle) => handle.name(),
        }
    }
}

/// Where a `return` transfers control: this graph's own end, or a label
/// belonging to an enclosing graph (a non-local return out of a lambda).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnTarget {
    Local,
    NonLocal { graph: GraphId, label: LabelId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowGraphNode {
    Start,
    End,
    Error,
    Sink,
    Mark {
        span: Span,
    },
    Declare {
        name: Ident,
        init: ValueId,
        span: Span,
    },
    Write {
        name: Ident,
        rhs: ValueId,
        span: Span,
    },
    Read {
        source: ReadSource,
        value: ValueId,
        span: Span,
    },
    Magic {
        kind: MagicKind,
        inputs: Vec<ValueId>,
        value: ValueId,
        span: Span,
    },
    Call {
        target: CallTargetRef,
        receiver: Option<ValueId>,
        arguments: Vec<ValueId>,
        null_propagating: bool,
        value: ValueId,
        span: Span,
    },
    BranchTrue {
        condition: ValueId,
        target: LabelId,
        span: Span,
    },
    BranchFalse {
        condition: ValueId,
        target: LabelId,
        span: Span,
    },
    Jump {
        body: GraphId,
        span: Span,
    },
    DeclarationDead {
        name: Ident,
        body: GraphId,
        span: Span,
    },
    Merge {
        inputs: Vec<ValueId>,
        value: ValueId,
        span: Span,
    },
    Return {
        value: Option<ValueId>,
        target: ReturnTarget,
        /// The unreachable placeholder return a non-locally-returning lambda
        /// still carries so its body produces a value on a dead path.
        shadow: bool,
        span: Span,
    },
}

impl FlowGraphNode {
    pub fn op_name(&self) -> &'static str {
        use FlowGraphNode::*;
        match self {
            Start => "<START>",
            End => "<END>",
            Error => "<ERROR>",
            Sink => "<SINK>",
            Mark { .. } => "mark",
            Declare { .. } => "declare",
            Write { .. } => "write",
            Read { .. } => "read",
            Magic { .. } => "magic",
            Call { .. } => "call",
            BranchTrue { .. } => "branch-true",
            BranchFalse { .. } => "branch-false",
            Jump { .. } => "jump",
            DeclarationDead { .. } => "declaration-dead",
            Merge { .. } => "merge",
            Return { .. } => "return",
        }
    }

    pub fn is_canonical(&self) -> bool {
        matches!(
            self,
            FlowGraphNode::Start | FlowGraphNode::End | FlowGraphNode::Error | FlowGraphNode::Sink
        )
    }

    pub fn span(&self) -> Option<Span> {
        use FlowGraphNode::*;
        match self {
            Start | End | Error | Sink => None,
            Mark { span }
            | Declare { span, .. }
            | Write { span, .. }
            | Read { span, .. }
            | Magic { span, .. }
            | Call { span, .. }
            | BranchTrue { span, .. }
            | BranchFalse { span, .. }
            | Jump { span, .. }
            | DeclarationDead { span, .. }
            | Merge { span, .. }
            | Return { span, .. } => Some(span.clone()),
        }
    }

    /// The value this instruction produces, if any.
    pub fn value(&self) -> Option<ValueId> {
        use FlowGraphNode::*;
        match self {
            Read { value, .. }
            | Magic { value, .. }
            | Call { value, .. }
            | Merge { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The span a dead-code diagnostic would point at. `None` for synthetic
    /// helper nodes the diagnostics layer should never mention directly.
    pub fn diagnostic_span(&self) -> Option<Span> {
        use FlowGraphNode::*;
        match self {
            Mark { span }
            | Declare { span, .. }
            | Write { span, .. }
            | Read { span, .. }
            | Call { span, .. }
            | BranchTrue { span, .. }
            | BranchFalse { span, .. } => Some(span.clone()),
            Return { shadow: false, span, .. } => Some(span.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for FlowGraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.op_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    Function,
    Lambda,
}

/// One function's (or lambda's) control flow graph.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub(crate) graph: Graph,
    id: GraphId,
    name: Ident,
    kind: GraphKind,
    start: NodeIndex,
    end: NodeIndex,
    error: NodeIndex,
    sink: NodeIndex,
    labels: Vec<Option<NodeIndex>>,
    values: Vec<ValueInfo>,
}

/// Number of canonical nodes constructed before any body node.
const CANONICAL_NODES: usize = 4;

impl FlowGraph {
    /// The label every graph binds to its own end node at creation.
    pub const EXIT_LABEL: LabelId = LabelId(0);

    pub(crate) fn new(id: GraphId, name: Ident, kind: GraphKind) -> Self {
        let mut graph = Graph::new();
        let start = graph.add_node(FlowGraphNode::Start);
        let end = graph.add_node(FlowGraphNode::End);
        let error = graph.add_node(FlowGraphNode::Error);
        let sink = graph.add_node(FlowGraphNode::Sink);
        // Sink's first two predecessors are always error then end; dead-edge
        // sources follow in discovery order.
        graph.add_edge(error, sink, FlowGraphEdge::Normal);
        graph.add_edge(end, sink, FlowGraphEdge::Normal);
        FlowGraph {
            graph,
            id,
            name,
            kind,
            start,
            end,
            error,
            sink,
            labels: vec![Some(end)],
            values: vec![],
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn name(&self) -> &Ident {
        &self.name
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn start(&self) -> NodeIndex {
        self.start
    }

    pub fn end(&self) -> NodeIndex {
        self.end
    }

    pub fn error(&self) -> NodeIndex {
        self.error
    }

    pub fn sink(&self) -> NodeIndex {
        self.sink
    }

    pub(crate) fn add_node(&mut self, node: FlowGraphNode) -> NodeIndex {
        self.graph.add_node(node)
    }

    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, edge: FlowGraphEdge) {
        self.graph.add_edge(from, to, edge);
    }

    pub(crate) fn reserve_value(&mut self) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo {
            producer: None,
            non_local: false,
        });
        id
    }

    pub(crate) fn set_value_producer(&mut self, value: ValueId, producer: NodeIndex) {
        self.values[value.0 as usize].producer = Some(producer);
    }

    pub(crate) fn mark_value_non_local(&mut self, value: ValueId) {
        self.values[value.0 as usize].non_local = true;
    }

    pub fn value_is_non_local(&self, value: ValueId) -> bool {
        self.values[value.0 as usize].non_local
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(None);
        id
    }

    pub(crate) fn bind_label(&mut self, label: LabelId, node: NodeIndex) {
        self.labels[label.0 as usize] = Some(node);
    }

    pub fn label_target(&self, label: LabelId) -> Option<NodeIndex> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Labels bound to `node`, in creation order.
    pub fn labels_at(&self, node: NodeIndex) -> Vec<LabelId> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, bound)| **bound == Some(node))
            .map(|(i, _)| LabelId(i as u32))
            .collect()
    }

    /// Body nodes in construction order, skipping the four canonical nodes.
    pub fn body_nodes(&self) -> impl Iterator<Item = (NodeIndex, &FlowGraphNode)> {
        self.graph
            .node_indices()
            .skip(CANONICAL_NODES)
            .map(|ix| (ix, &self.graph[ix]))
    }

    /// Position of a body node in the construction order.
    pub fn body_position(&self, node: NodeIndex) -> Option<usize> {
        node.index().checked_sub(CANONICAL_NODES)
    }

    pub fn node(&self, node: NodeIndex) -> &FlowGraphNode {
        &self.graph[node]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Outgoing edges in discovery (insertion) order. Petgraph iterates
    /// adjacency most-recent-first, so the collected list is reversed.
    pub fn ordered_successors(&self, node: NodeIndex) -> Vec<(NodeIndex, FlowGraphEdge)> {
        let mut out: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        out.reverse();
        out
    }

    /// Incoming edges in discovery (insertion) order.
    pub fn ordered_predecessors(&self, node: NodeIndex) -> Vec<(NodeIndex, FlowGraphEdge)> {
        let mut out: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
            .collect();
        out.reverse();
        out
    }

    /// A node whose control never proceeds within this graph: the sink, a
    /// non-local return, or a call whose produced value is `!`-tagged because
    /// argument evaluation already transferred control away.
    pub fn is_terminal(&self, node: NodeIndex) -> bool {
        match &self.graph[node] {
            FlowGraphNode::Sink => true,
            FlowGraphNode::Return {
                target: ReturnTarget::NonLocal { .. },
                ..
            } => true,
            FlowGraphNode::Call { value, .. } => self.value_is_non_local(*value),
            _ => false,
        }
    }

    pub fn declaration_dead_nodes(&self) -> Vec<NodeIndex> {
        self.body_nodes()
            .filter(|(_, n)| matches!(n, FlowGraphNode::DeclarationDead { .. }))
            .map(|(ix, _)| ix)
            .collect()
    }

    fn any_span(&self) -> Span {
        self.body_nodes()
            .find_map(|(_, n)| n.span())
            .unwrap_or_else(Span::dummy)
    }

    /// Structural invariant checks. Any violation is a fatal programming
    /// fault in graph construction, scoped to this graph.
    pub fn verify(&self) -> Result<(), CompileError> {
        let span = self.any_span();

        // Labels created must all have been bound.
        for (i, bound) in self.labels.iter().enumerate() {
            if bound.is_none() {
                return Err(CompileError::UnboundLabel {
                    label: i as u32,
                    span,
                });
            }
        }

        // Values must all have a producer.
        if self.values.iter().any(|v| v.producer.is_none()) {
            return Err(CompileError::Internal(
                "value reserved but never produced",
                span,
            ));
        }

        // Every non-terminal node has at least one outgoing edge.
        for ix in self.graph.node_indices() {
            if self.is_terminal(ix) {
                continue;
            }
            if self
                .graph
                .edges_directed(ix, Direction::Outgoing)
                .next()
                .is_none()
            {
                let node_span = self.graph[ix].span().unwrap_or_else(|| span.clone());
                return Err(CompileError::MissingSuccessor { span: node_span });
            }
        }

        // Dead edges target the sink, or a declaration-dead node that itself
        // drains to the sink through a dead edge.
        for edge in self.graph.edge_references() {
            if *edge.weight() != FlowGraphEdge::Dead {
                continue;
            }
            let target = edge.target();
            if target == self.sink {
                continue;
            }
            let drains = matches!(self.graph[target], FlowGraphNode::DeclarationDead { .. })
                && self
                    .graph
                    .edges_directed(target, Direction::Outgoing)
                    .any(|e| e.target() == self.sink && *e.weight() == FlowGraphEdge::Dead);
            if !drains {
                return Err(CompileError::Internal(
                    "dead edge does not drain to sink",
                    span,
                ));
            }
        }

        // Sink's predecessors are exactly {error} ∪ {end} ∪ {sources of dead
        // edges into sink}.
        let mut expected: Vec<NodeIndex> = vec![self.error, self.end];
        for edge in self.graph.edge_references() {
            if *edge.weight() == FlowGraphEdge::Dead && edge.target() == self.sink {
                expected.push(edge.source());
            }
        }
        let mut actual: Vec<NodeIndex> = self
            .graph
            .edges_directed(self.sink, Direction::Incoming)
            .map(|e| e.source())
            .collect();
        expected.sort();
        expected.dedup();
        actual.sort();
        actual.dedup();
        if expected != actual {
            return Err(CompileError::SinkInvariantViolated {
                details: format!("expected {expected:?}, found {actual:?}"),
                span,
            });
        }

        // Merge arity: consumed values match predecessor edges.
        for ix in self.graph.node_indices() {
            if let FlowGraphNode::Merge {
                inputs,
                span: merge_span,
                ..
            } = &self.graph[ix]
            {
                let predecessors = self
                    .graph
                    .edges_directed(ix, Direction::Incoming)
                    .count();
                if inputs.len() != predecessors {
                    return Err(CompileError::MergeArityMismatch {
                        consumed: inputs.len(),
                        predecessors,
                        span: merge_span.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Logs the graph in GraphViz DOT format.
    pub fn visualize(&self) {
        use petgraph::dot::{Config, Dot};
        tracing::info!("{}", Dot::with_config(&self.graph, &[Config::EdgeNoLabel]));
    }
}

/// The forest: one graph per outer function plus one per lambda literal.
/// A construction fault is scoped to a single graph; its slot holds the
/// error while sibling graphs still build.
#[derive(Debug, Default)]
pub struct FlowForest {
    graphs: Vec<Result<FlowGraph, CompileError>>,
}

impl FlowForest {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reserve(&mut self, span: &Span) -> GraphId {
        let id = GraphId(self.graphs.len() as u32);
        self.graphs.push(Err(CompileError::Internal(
            "graph construction abandoned",
            span.clone(),
        )));
        id
    }

    pub(crate) fn set(&mut self, id: GraphId, result: Result<FlowGraph, CompileError>) {
        self.graphs[id.0 as usize] = result;
    }

    pub fn get(&self, id: GraphId) -> Option<&Result<FlowGraph, CompileError>> {
        self.graphs.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GraphId, &Result<FlowGraph, CompileError>)> {
        self.graphs
            .iter()
            .enumerate()
            .map(|(i, g)| (GraphId(i as u32), g))
    }

    /// Successfully built graphs, in id order.
    pub fn graphs(&self) -> impl Iterator<Item = &FlowGraph> {
        self.graphs.iter().filter_map(|g| g.as_ref().ok())
    }

    /// Construction faults, in id order.
    pub fn errors(&self) -> impl Iterator<Item = &CompileError> {
        self.graphs.iter().filter_map(|g| g.as_ref().err())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> FlowGraph {
        FlowGraph::new(GraphId(0), Ident::new_no_span("t"), GraphKind::Function)
    }

    #[test]
    fn verify_accepts_an_empty_body() {
        let mut g = graph();
        let (start, end) = (g.start(), g.end());
        g.add_edge(start, end, FlowGraphEdge::Normal);
        g.verify().unwrap();
    }

    #[test]
    fn verify_rejects_merge_arity_mismatch() {
        let mut g = graph();
        let v0 = g.reserve_value();
        let read = g.add_node(FlowGraphNode::Read {
            source: ReadSource::Constant(Literal::Boolean(true)),
            value: v0,
            span: Span::dummy(),
        });
        g.set_value_producer(v0, read);
        let v1 = g.reserve_value();
        let merge = g.add_node(FlowGraphNode::Merge {
            inputs: vec![v0, v0],
            value: v1,
            span: Span::dummy(),
        });
        g.set_value_producer(v1, merge);
        let (start, end) = (g.start(), g.end());
        g.add_edge(start, read, FlowGraphEdge::Normal);
        g.add_edge(read, merge, FlowGraphEdge::Normal);
        g.add_edge(merge, end, FlowGraphEdge::Normal);
        assert!(matches!(
            g.verify(),
            Err(CompileError::MergeArityMismatch {
                consumed: 2,
                predecessors: 1,
                ..
            })
        ));
    }

    #[test]
    fn verify_rejects_an_unbound_label() {
        let mut g = graph();
        g.new_label();
        let (start, end) = (g.start(), g.end());
        g.add_edge(start, end, FlowGraphEdge::Normal);
        assert!(matches!(
            g.verify(),
            Err(CompileError::UnboundLabel { label: 1, .. })
        ));
    }

    #[test]
    fn verify_rejects_a_stray_sink_predecessor() {
        let mut g = graph();
        let (start, end, sink) = (g.start(), g.end(), g.sink());
        g.add_edge(start, end, FlowGraphEdge::Normal);
        g.add_edge(start, sink, FlowGraphEdge::Normal);
        assert!(matches!(
            g.verify(),
            Err(CompileError::SinkInvariantViolated { .. })
        ));
    }

    #[test]
    fn verify_rejects_a_dangling_node() {
        let mut g = graph();
        let mark = g.add_node(FlowGraphNode::Mark { span: Span::dummy() });
        let start = g.start();
        g.add_edge(start, mark, FlowGraphEdge::Normal);
        assert!(matches!(
            g.verify(),
            Err(CompileError::MissingSuccessor { .. })
        ));
    }

    #[test]
    fn exit_label_is_pre_bound_to_the_end_node() {
        let g = graph();
        assert_eq!(g.label_target(FlowGraph::EXIT_LABEL), Some(g.end()));
    }
}
