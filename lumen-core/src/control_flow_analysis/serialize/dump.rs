//! Deterministic textual rendering of flow graphs.
//!
//! Body nodes print in construction order, numbered from zero, grouped
//! under `-- line N` headers as the source line advances. A single normal
//! edge to the textually next node is implicit; every other node carries an
//! explicit `NEXT:[...]` list, and join points additionally carry
//! `PREV:[...]`. The four canonical nodes close each graph, always with
//! explicit lists.

use std::fmt::Write;

use itertools::Itertools;
use petgraph::prelude::NodeIndex;

use super::parse::{GraphTopology, NodeRef, TopologyNode};
use crate::control_flow_analysis::flow_graph::{
    CallTargetRef, FlowForest, FlowGraph, FlowGraphEdge, FlowGraphNode, MagicKind, ReadSource,
    ReturnTarget, ValueId,
};

/// Dumps every successfully built graph of the forest, in id order,
/// separated by blank lines. Failed slots render as an error banner.
pub fn dump_forest(forest: &FlowForest) -> String {
    let mut out = String::new();
    for (id, slot) in forest.iter() {
        if !out.is_empty() {
            out.push('\n');
        }
        match slot {
            Ok(graph) => out.push_str(&dump_graph(graph)),
            Err(e) => {
                let _ = writeln!(out, "== <failed> ({id}) ==");
                let _ = writeln!(out, "    error: {e}");
            }
        }
    }
    out
}

pub fn dump_graph(graph: &FlowGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ({}) ==", graph.name(), graph.id());

    let mut current_line = None;
    for (ix, node) in graph.body_nodes() {
        let line = node.span().map(|s| s.start_line()).unwrap_or(1);
        if current_line != Some(line) {
            let _ = writeln!(out, "-- line {line}");
            current_line = Some(line);
        }
        let prefix = match graph.labels_at(ix).first() {
            Some(label) => format!("L{}: ", label.0),
            None => "    ".to_string(),
        };
        let position = graph.body_position(ix).unwrap_or(0);
        let mut row = format!("{prefix}{position}: {}", render_instruction(graph, node));
        if let Some(next) = next_suffix(graph, ix) {
            row.push_str("  ");
            row.push_str(&next);
        }
        if let Some(prev) = prev_suffix(graph, ix) {
            row.push_str("  ");
            row.push_str(&prev);
        }
        let _ = writeln!(out, "{row}");
    }

    for ix in [graph.start(), graph.end(), graph.error(), graph.sink()] {
        let mut row = format!("    {}", graph.node(ix).op_name());
        if ix != graph.sink() {
            let entries = edge_entries(graph, &graph.ordered_successors(ix));
            row.push_str(&format!("  NEXT:[{entries}]"));
        }
        if let Some(prev) = prev_suffix(graph, ix) {
            row.push_str("  ");
            row.push_str(&prev);
        }
        let _ = writeln!(out, "{row}");
    }
    out
}

/// The topology the parser would recover from this graph's dump. Used to
/// state round-trip equality without comparing strings.
pub fn graph_topology(graph: &FlowGraph) -> GraphTopology {
    let mut nodes = vec![];
    for (ix, node) in graph.body_nodes() {
        nodes.push(TopologyNode {
            op: node.op_name().to_string(),
            operands: operands(graph, node),
            value: node.value().map(|v| fmt_value(graph, v)),
            label: graph.labels_at(ix).first().map(|l| l.0),
        });
    }
    let mut edges = vec![];
    let body: Vec<NodeIndex> = graph.body_nodes().map(|(ix, _)| ix).collect();
    for ix in body
        .into_iter()
        .chain([graph.start(), graph.end(), graph.error(), graph.sink()])
    {
        for (target, edge) in graph.ordered_successors(ix) {
            edges.push((node_ref(graph, ix), node_ref(graph, target), edge));
        }
    }
    GraphTopology {
        name: graph.name().as_str().to_string(),
        id: graph.id().0,
        nodes,
        edges,
    }
}

fn node_ref(graph: &FlowGraph, ix: NodeIndex) -> NodeRef {
    if ix == graph.start() {
        NodeRef::Start
    } else if ix == graph.end() {
        NodeRef::End
    } else if ix == graph.error() {
        NodeRef::Error
    } else if ix == graph.sink() {
        NodeRef::Sink
    } else {
        NodeRef::Body(graph.body_position(ix).unwrap_or(0))
    }
}

fn ref_text(graph: &FlowGraph, ix: NodeIndex) -> String {
    match node_ref(graph, ix) {
        NodeRef::Start => "START".to_string(),
        NodeRef::End => "END".to_string(),
        NodeRef::Error => "ERROR".to_string(),
        NodeRef::Sink => "SINK".to_string(),
        NodeRef::Body(position) => position.to_string(),
    }
}

fn edge_entries(graph: &FlowGraph, entries: &[(NodeIndex, FlowGraphEdge)]) -> String {
    entries
        .iter()
        .map(|(target, edge)| {
            let target = ref_text(graph, *target);
            match edge {
                FlowGraphEdge::Normal => target,
                other => format!("{other}:{target}"),
            }
        })
        .join(", ")
}

/// `None` means the node's single normal edge to the next body node stays
/// implicit.
fn next_suffix(graph: &FlowGraph, ix: NodeIndex) -> Option<String> {
    let successors = graph.ordered_successors(ix);
    if let [(target, FlowGraphEdge::Normal)] = successors.as_slice() {
        let next = graph.body_position(ix).map(|p| p + 1);
        if next.is_some() && graph.body_position(*target) == next {
            return None;
        }
    }
    Some(format!("NEXT:[{}]", edge_entries(graph, &successors)))
}

fn prev_suffix(graph: &FlowGraph, ix: NodeIndex) -> Option<String> {
    let predecessors = graph.ordered_predecessors(ix);
    if predecessors.len() > 1 || ix == graph.sink() {
        let entries = predecessors
            .iter()
            .map(|(source, edge)| {
                let source = ref_text(graph, *source);
                match edge {
                    FlowGraphEdge::Normal => source,
                    other => format!("{other}:{source}"),
                }
            })
            .join(", ");
        Some(format!("PREV:[{entries}]"))
    } else {
        None
    }
}

fn render_instruction(graph: &FlowGraph, node: &FlowGraphNode) -> String {
    let mut text = format!("{}({})", node.op_name(), operands(graph, node));
    if let Some(value) = node.value() {
        text.push_str(" -> ");
        text.push_str(&fmt_value(graph, value));
    }
    text
}

fn fmt_value(graph: &FlowGraph, value: ValueId) -> String {
    if graph.value_is_non_local(value) {
        format!("!v{}", value.0)
    } else {
        format!("v{}", value.0)
    }
}

fn fmt_values(graph: &FlowGraph, values: &[ValueId]) -> String {
    values.iter().map(|v| fmt_value(graph, *v)).join(", ")
}

fn operands(graph: &FlowGraph, node: &FlowGraphNode) -> String {
    use FlowGraphNode::*;
    match node {
        Start | End | Error | Sink => String::new(),
        Mark { span } => span.start_pos().to_string(),
        Declare { name, init, .. } => format!("{name}, {}", fmt_value(graph, *init)),
        Write { name, rhs, .. } => format!("{name}, {}", fmt_value(graph, *rhs)),
        Read { source, .. } => match source {
            ReadSource::Variable(name) => name.to_string(),
            ReadSource::Constant(literal) => literal.to_string(),
        },
        Magic { kind, inputs, .. } => match kind {
            MagicKind::StringTemplate if inputs.is_empty() => "string-template".to_string(),
            MagicKind::StringTemplate => {
                format!("string-template, {}", fmt_values(graph, inputs))
            }
            MagicKind::ImplicitNull => "implicit-null".to_string(),
            MagicKind::LambdaValue(body) => format!("lambda @{body}"),
            MagicKind::Shadow => "shadow".to_string(),
        },
        Call {
            target,
            receiver,
            arguments,
            null_propagating,
            ..
        } => {
            let question = if *null_propagating { "?." } else { "" };
            let target = match target {
                CallTargetRef::Local { name, graph } => format!("{name}{question} @{graph}"),
                CallTargetRef::External(handle) => format!("{}{question}", handle.name()),
            };
            let mut text = target;
            if let Some(receiver) = receiver {
                text.push_str(", ");
                text.push_str(&fmt_value(graph, *receiver));
            }
            text.push_str(&format!(", [{}]", fmt_values(graph, arguments)));
            text
        }
        BranchTrue {
            condition, target, ..
        }
        | BranchFalse {
            condition, target, ..
        } => format!("{}, L{}", fmt_value(graph, *condition), target.0),
        Jump { body, .. } => format!("@{body}"),
        DeclarationDead { name, body, .. } => format!("{name} @{body}"),
        Merge { inputs, .. } => fmt_values(graph, inputs),
        Return { value, target, .. } => {
            let value = value.map(|v| fmt_value(graph, v)).unwrap_or_default();
            match target {
                ReturnTarget::Local => value,
                ReturnTarget::NonLocal { graph, label } => {
                    if value.is_empty() {
                        format!("@{graph}:L{}", label.0)
                    } else {
                        format!("{value}, @{graph}:L{}", label.0)
                    }
                }
            }
        }
    }
}
