use lumen_types::{Ident, Span, Spanned};
use thiserror::Error;

/// A fault detected while constructing or verifying a single flow graph.
///
/// None of these are recoverable: the input tree is validated before it
/// reaches the graph builder, so every variant here is a programming fault in
/// the analysis itself. A fault is scoped to one graph's construction; other
/// graphs in the forest still build.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompileError {
    #[error("Internal compiler error: {0}")]
    Internal(&'static str, Span),
    #[error(
        "Merge node consumes {consumed} values but has {predecessors} predecessor edges."
    )]
    MergeArityMismatch {
        consumed: usize,
        predecessors: usize,
        span: Span,
    },
    #[error("Label L{label} was never bound to a node.")]
    UnboundLabel { label: u32, span: Span },
    #[error("Variable \"{var_name}\" was reassigned but never declared in this scope.")]
    UnknownVariable { var_name: Ident, span: Span },
    #[error("Callable \"{name}\" does not exist in this scope.")]
    UnknownCallable { name: Ident, span: Span },
    #[error("Node has no outgoing edge but is not a terminal node.")]
    MissingSuccessor { span: Span },
    #[error("Sink predecessors diverge from {{error, end, dead-edge sources}}: {details}")]
    SinkInvariantViolated { details: String, span: Span },
    #[error("A dead-edge source was visited by the reachability pass.")]
    DeadEdgeSourceReachable { span: Span },
}

impl Spanned for CompileError {
    fn span(&self) -> Span {
        use CompileError::*;
        match self {
            Internal(_, span) => span.clone(),
            MergeArityMismatch { span, .. } => span.clone(),
            UnboundLabel { span, .. } => span.clone(),
            UnknownVariable { span, .. } => span.clone(),
            UnknownCallable { span, .. } => span.clone(),
            MissingSuccessor { span } => span.clone(),
            SinkInvariantViolated { span, .. } => span.clone(),
            DeadEdgeSourceReachable { span } => span.clone(),
        }
    }
}

/// Failures surfaced by the reflective callable-descriptor collaborator.
///
/// `BackendUnavailable` is deliberately distinct from an ordinary call
/// failure: the former means the descriptor could not be computed at all, the
/// latter is propagated unchanged from the call itself.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReflectionError {
    #[error("Reflection backend unavailable for \"{owner}::{name}\".")]
    BackendUnavailable { owner: Ident, name: Ident },
    #[error("{0}")]
    CallFailed(String),
}
