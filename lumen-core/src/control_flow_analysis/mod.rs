//! Control flow analysis: builds one flow graph per function and per
//! lambda literal, verifies the structural invariants, and derives
//! dead-code diagnostics from reachability.

pub mod flow_graph;
mod graph_builder;
mod reachability;
pub mod serialize;

pub use flow_graph::{
    CallTargetRef, FlowForest, FlowGraph, FlowGraphEdge, FlowGraphNode, GraphId, GraphKind,
    LabelId, MagicKind, ReadSource, ReturnTarget, ValueId, ValueInfo,
};
pub use graph_builder::build_flow_forest;
