//! Flow-graph construction and reachability analysis for the typed tree.
//!
//! The input is a [language::ty::TyProgram] as produced by the upstream
//! parser and type checker. [analyze_program] turns it into a
//! [control_flow_analysis::FlowForest] of pseudo-instruction graphs, runs
//! the reachability pass over each, and collects dead-code warnings plus
//! any construction faults. The textual dump of a forest is available
//! through [control_flow_analysis::serialize].

pub mod control_flow_analysis;
pub mod language;
pub mod reflection;

pub use control_flow_analysis::{build_flow_forest, FlowForest, FlowGraph, GraphId};

use lumen_error::{error::CompileError, warning::CompileWarning};

/// The result of analyzing a whole program. Faults are scoped to the graph
/// they occurred in; the forest still holds every sibling that built.
pub struct ProgramAnalysis {
    pub forest: FlowForest,
    pub warnings: Vec<CompileWarning>,
    pub errors: Vec<CompileError>,
}

pub fn analyze_program(program: &language::ty::TyProgram) -> ProgramAnalysis {
    let forest = build_flow_forest(program);
    let mut warnings = vec![];
    let mut errors = vec![];
    for (id, slot) in forest.iter() {
        match slot {
            Ok(graph) => match graph.find_dead_code() {
                Ok(found) => warnings.extend(found),
                Err(e) => {
                    tracing::warn!(graph = %id, error = %e, "reachability check failed");
                    errors.push(e);
                }
            },
            Err(e) => errors.push(e.clone()),
        }
    }
    tracing::debug!(
        graphs = forest.len(),
        warnings = warnings.len(),
        errors = errors.len(),
        "program analysis finished"
    );
    ProgramAnalysis {
        forest,
        warnings,
        errors,
    }
}
