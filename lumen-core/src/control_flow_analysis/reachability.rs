//! Reachability over live edges and the dead-code diagnostics derived
//! from it. Dead edges are never traversed; their sources are asserted to
//! be unreachable, since the builder only drains already-dead tails into
//! the sink.

use lumen_error::{
    error::CompileError,
    warning::{CompileWarning, Warning},
};
use lumen_types::Span;
use petgraph::{prelude::NodeIndex, visit::EdgeRef, Direction};

use super::flow_graph::{FlowGraph, FlowGraphEdge, FlowGraphNode};

impl FlowGraph {
    /// Nodes reachable from the start node through non-dead edges, indexed
    /// by node index.
    pub fn reachable_from_start(&self) -> Vec<bool> {
        let mut reachable = vec![false; self.node_count()];
        let mut worklist = vec![self.start()];
        reachable[self.start().index()] = true;
        while let Some(node) = worklist.pop() {
            for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                if *edge.weight() == FlowGraphEdge::Dead {
                    continue;
                }
                let target = edge.target();
                if !reachable[target.index()] {
                    reachable[target.index()] = true;
                    worklist.push(target);
                }
            }
        }
        reachable
    }

    pub fn unreachable_nodes(&self) -> Vec<NodeIndex> {
        let reachable = self.reachable_from_start();
        self.body_nodes()
            .map(|(ix, _)| ix)
            .filter(|ix| !reachable[ix.index()])
            .collect()
    }

    /// Every dead edge draining into the sink must come from a node the
    /// reachability pass never visited.
    pub fn check_dead_edge_sources(&self, reachable: &[bool]) -> Result<(), CompileError> {
        for edge in self.graph.edge_references() {
            if *edge.weight() != FlowGraphEdge::Dead || edge.target() != self.sink() {
                continue;
            }
            if reachable[edge.source().index()] {
                let span = self.graph[edge.source()]
                    .span()
                    .unwrap_or_else(Span::dummy);
                return Err(CompileError::DeadEdgeSourceReachable { span });
            }
        }
        Ok(())
    }

    /// Runs reachability and renders warnings: one per unreachable region
    /// plus one per declared-but-never-run local function.
    pub fn find_dead_code(&self) -> Result<Vec<CompileWarning>, CompileError> {
        let reachable = self.reachable_from_start();
        self.check_dead_edge_sources(&reachable)?;

        let mut warnings = vec![];
        for (ix, node) in self.body_nodes() {
            if let FlowGraphNode::DeclarationDead { name, span, .. } = node {
                warnings.push(CompileWarning {
                    span: span.clone(),
                    warning_content: Warning::DeadFunctionDeclaration { name: name.clone() },
                });
                continue;
            }
            if reachable[ix.index()] {
                continue;
            }
            if let Some(span) = node.diagnostic_span() {
                warnings.push(CompileWarning {
                    span,
                    warning_content: Warning::UnreachableCode,
                });
            }
        }
        Ok(drop_covered_unreachable(warnings))
    }
}

/// A dead statement produces one warning per instruction; only the widest
/// span per region is worth reporting.
fn drop_covered_unreachable(warnings: Vec<CompileWarning>) -> Vec<CompileWarning> {
    let mut kept: Vec<CompileWarning> = vec![];
    for warning in warnings {
        if warning.warning_content != Warning::UnreachableCode {
            kept.push(warning);
            continue;
        }
        if kept
            .iter()
            .any(|k| k.warning_content == Warning::UnreachableCode && covers(&k.span, &warning.span))
        {
            continue;
        }
        kept.retain(|k| {
            k.warning_content != Warning::UnreachableCode || !covers(&warning.span, &k.span)
        });
        kept.push(warning);
    }
    kept
}

fn covers(outer: &Span, inner: &Span) -> bool {
    outer.start() <= inner.start() && outer.end() >= inner.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_flow_analysis::flow_graph::{GraphId, GraphKind};
    use lumen_types::Ident;

    #[test]
    fn dead_edge_from_a_reachable_node_is_a_fault() {
        let mut g = FlowGraph::new(GraphId(0), Ident::new_no_span("t"), GraphKind::Function);
        let mark = g.add_node(FlowGraphNode::Mark { span: Span::dummy() });
        let (start, end, sink) = (g.start(), g.end(), g.sink());
        g.add_edge(start, mark, FlowGraphEdge::Normal);
        g.add_edge(mark, end, FlowGraphEdge::Normal);
        g.add_edge(mark, sink, FlowGraphEdge::Dead);
        assert!(matches!(
            g.find_dead_code(),
            Err(CompileError::DeadEdgeSourceReachable { .. })
        ));
    }

    #[test]
    fn orphan_chains_are_unreachable() {
        let mut g = FlowGraph::new(GraphId(0), Ident::new_no_span("t"), GraphKind::Function);
        let reachable = g.add_node(FlowGraphNode::Mark { span: Span::dummy() });
        let orphan = g.add_node(FlowGraphNode::Mark { span: Span::dummy() });
        let (start, end, sink) = (g.start(), g.end(), g.sink());
        g.add_edge(start, reachable, FlowGraphEdge::Normal);
        g.add_edge(reachable, end, FlowGraphEdge::Normal);
        g.add_edge(orphan, sink, FlowGraphEdge::Dead);
        assert_eq!(g.unreachable_nodes(), vec![orphan]);
    }
}
