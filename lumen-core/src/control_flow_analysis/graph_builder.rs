//! Single-pass construction of the flow forest from the typed tree.
//!
//! The builder threads a cursor through each graph: the set of dangling
//! edges waiting for the next instruction, plus a liveness bit. Control
//! transfers (returns, calls that never come back) clear the cursor; dead
//! statements after them still connect as orphan chains whose tails drain
//! to the sink through dead edges at statement boundaries.

use crate::language::{
    ty::{
        self, CallTarget, TyAstNodeContent, TyCodeBlock, TyDeclaration, TyExpression,
        TyExpressionVariant,
    },
    Nullability,
};
use lumen_error::error::CompileError;
use lumen_types::{Ident, Span, Spanned};

use petgraph::prelude::NodeIndex;

use super::flow_graph::{
    CallTargetRef, ControlFlowNamespace, FlowForest, FlowGraph, FlowGraphEdge, FlowGraphNode,
    FunctionNamespaceEntry, GraphId, GraphKind, LabelId, MagicKind, ReadSource, ReturnTarget,
    ValueId,
};

/// Builds the whole forest. A construction fault inside one outer function
/// is recorded in that function's slot; the remaining functions still build.
pub fn build_flow_forest(program: &ty::TyProgram) -> FlowForest {
    let mut builder = GraphBuilder::default();
    builder.namespace.push_scope();
    for function in &program.functions {
        let result = builder.build_graph(
            function.name.clone(),
            GraphKind::Function,
            &function.body,
            None,
            &function.span,
        );
        if let Ok((graph, completes_normally)) = result {
            builder.namespace.insert_function(
                &function.name,
                FunctionNamespaceEntry {
                    graph,
                    completes_normally,
                },
            );
        }
    }
    builder.namespace.pop_scope();
    builder.forest
}

#[derive(Default)]
struct GraphBuilder {
    forest: FlowForest,
    namespace: ControlFlowNamespace,
}

/// A dangling edge registered against a label, waiting for the label's
/// target instruction to exist.
struct LabelEdge {
    source: NodeIndex,
    edge: FlowGraphEdge,
    live: bool,
}

/// The saved state of a cursor, used to split control around a join.
struct Cursor {
    pending: Vec<(NodeIndex, FlowGraphEdge)>,
    live: bool,
}

struct GraphFrame {
    graph: FlowGraph,
    pending: Vec<(NodeIndex, FlowGraphEdge)>,
    live: bool,
    label_edges: Vec<Vec<LabelEdge>>,
    /// The nearest enclosing named function's graph; non-local returns
    /// target its exit label.
    function_graph: GraphId,
}

struct ExprOutput {
    value: ValueId,
    /// Set when the expression is itself a lambda literal; call sites use
    /// this to decide whether argument evaluation transfers control away.
    lambda: Option<LambdaInfo>,
}

impl ExprOutput {
    fn plain(value: ValueId) -> Self {
        ExprOutput {
            value,
            lambda: None,
        }
    }
}

struct LambdaInfo {
    completes_normally: bool,
}

impl GraphFrame {
    fn new(graph: FlowGraph, function_graph: GraphId) -> Self {
        let start = graph.start();
        GraphFrame {
            graph,
            pending: vec![(start, FlowGraphEdge::Normal)],
            live: true,
            // Slot for the pre-bound exit label.
            label_edges: vec![vec![]],
            function_graph,
        }
    }

    fn new_label(&mut self) -> LabelId {
        let label = self.graph.new_label();
        self.label_edges.push(vec![]);
        label
    }

    fn register_label_edge(&mut self, label: LabelId, source: NodeIndex, edge: FlowGraphEdge) {
        let live = self.live;
        self.label_edges[label.0 as usize].push(LabelEdge { source, edge, live });
    }

    /// Appends an instruction, connecting the pending edges to it. When
    /// `label` is given, edges registered against that label connect first
    /// and the label binds to the new node.
    fn append_inner(&mut self, label: Option<LabelId>, node: FlowGraphNode) -> NodeIndex {
        let ix = self.graph.add_node(node);
        let mut live_in = false;
        if let Some(label) = label {
            for entry in std::mem::take(&mut self.label_edges[label.0 as usize]) {
                self.graph.add_edge(entry.source, ix, entry.edge);
                live_in |= entry.live;
            }
            self.graph.bind_label(label, ix);
        }
        live_in |= !self.pending.is_empty() && self.live;
        for (source, edge) in std::mem::take(&mut self.pending) {
            self.graph.add_edge(source, ix, edge);
        }
        self.pending = vec![(ix, FlowGraphEdge::Normal)];
        self.live = live_in;
        ix
    }

    fn append(&mut self, node: FlowGraphNode) -> NodeIndex {
        self.append_inner(None, node)
    }

    fn append_producing(
        &mut self,
        build: impl FnOnce(ValueId) -> FlowGraphNode,
    ) -> (NodeIndex, ValueId) {
        let value = self.graph.reserve_value();
        let ix = self.append_inner(None, build(value));
        self.graph.set_value_producer(value, ix);
        (ix, value)
    }

    fn append_bound_producing(
        &mut self,
        label: LabelId,
        build: impl FnOnce(ValueId) -> FlowGraphNode,
    ) -> (NodeIndex, ValueId) {
        let value = self.graph.reserve_value();
        let ix = self.append_inner(Some(label), build(value));
        self.graph.set_value_producer(value, ix);
        (ix, value)
    }

    /// Control does not proceed past the current instruction.
    fn kill(&mut self) {
        self.pending.clear();
        self.live = false;
    }

    fn take_cursor(&mut self) -> Cursor {
        Cursor {
            pending: std::mem::take(&mut self.pending),
            live: std::mem::replace(&mut self.live, false),
        }
    }

    /// Rejoins a saved cursor in front of the current one; its edges will
    /// connect before the current pending edges at the next append.
    fn prepend_cursor(&mut self, mut cursor: Cursor) {
        std::mem::swap(&mut self.pending, &mut cursor.pending);
        self.pending.extend(cursor.pending);
        self.live |= cursor.live;
    }

    /// Statement boundary: a dead tail drains to the sink so no orphan is
    /// left dangling.
    fn flush_dead(&mut self) {
        if self.live {
            return;
        }
        let sink = self.graph.sink();
        for (source, _) in std::mem::take(&mut self.pending) {
            self.graph.add_edge(source, sink, FlowGraphEdge::Dead);
        }
    }
}

impl GraphBuilder {
    /// Builds one graph and stores it in its reserved forest slot. Returns
    /// the id and whether the body can fall off its end.
    fn build_graph(
        &mut self,
        name: Ident,
        kind: GraphKind,
        body: &TyCodeBlock,
        enclosing_function: Option<GraphId>,
        span: &Span,
    ) -> Result<(GraphId, bool), CompileError> {
        let id = self.forest.reserve(span);
        tracing::debug!(graph = %id, name = %name, "building flow graph");
        let graph = FlowGraph::new(id, name, kind);
        let function_graph = enclosing_function.unwrap_or(id);
        let mut frame = GraphFrame::new(graph, function_graph);

        self.namespace.push_scope();
        let connected = self.connect_block(&mut frame, body);
        self.namespace.pop_scope();
        if let Err(e) = connected {
            self.forest.set(id, Err(e.clone()));
            return Err(e);
        }

        let completes_normally = frame.live;
        if frame.live {
            let end = frame.graph.end();
            for (source, edge) in std::mem::take(&mut frame.pending) {
                frame.graph.add_edge(source, end, edge);
            }
        } else {
            frame.flush_dead();
        }

        if kind == GraphKind::Lambda && !completes_normally {
            self.synthesize_shadow_return(&mut frame, span);
        }

        let graph = frame.graph;
        if let Err(e) = graph.verify() {
            tracing::warn!(graph = %id, error = %e, "flow graph failed verification");
            self.forest.set(id, Err(e.clone()));
            return Err(e);
        }
        self.forest.set(id, Ok(graph));
        Ok((id, completes_normally))
    }

    /// A lambda whose every path returns non-locally still produces a value
    /// on an unreachable path, so downstream value bookkeeping stays total.
    fn synthesize_shadow_return(&mut self, frame: &mut GraphFrame, span: &Span) {
        let (_, shadow) = frame.append_producing(|value| FlowGraphNode::Magic {
            kind: MagicKind::Shadow,
            inputs: vec![],
            value,
            span: span.clone(),
        });
        frame.graph.mark_value_non_local(shadow);
        let ret = frame.append(FlowGraphNode::Return {
            value: Some(shadow),
            target: ReturnTarget::Local,
            shadow: true,
            span: span.clone(),
        });
        let end = frame.graph.end();
        frame.graph.add_edge(ret, end, FlowGraphEdge::Normal);
        frame.pending.clear();
    }

    fn connect_block(
        &mut self,
        frame: &mut GraphFrame,
        block: &TyCodeBlock,
    ) -> Result<(), CompileError> {
        for node in &block.contents {
            self.connect_node(frame, node)?;
            frame.flush_dead();
        }
        Ok(())
    }

    fn connect_node(
        &mut self,
        frame: &mut GraphFrame,
        node: &ty::TyAstNode,
    ) -> Result<(), CompileError> {
        frame.append(FlowGraphNode::Mark {
            span: node.span.clone(),
        });
        match &node.content {
            TyAstNodeContent::Expression(expr) => {
                self.connect_expression(frame, expr)?;
                Ok(())
            }
            TyAstNodeContent::ReturnStatement(ret) => {
                let value = match &ret.expr {
                    Some(expr) => Some(self.connect_expression(frame, expr)?.value),
                    None => None,
                };
                self.connect_return(frame, value, node.span());
                Ok(())
            }
            TyAstNodeContent::Declaration(TyDeclaration::Variable(decl)) => {
                let init = self.connect_expression(frame, &decl.body)?;
                frame.append(FlowGraphNode::Declare {
                    name: decl.name.clone(),
                    init: init.value,
                    span: node.span(),
                });
                self.namespace.insert_variable(&decl.name, init.value);
                Ok(())
            }
            TyAstNodeContent::Declaration(TyDeclaration::Function(decl)) => {
                self.connect_function_declaration(frame, decl)
            }
        }
    }

    fn connect_return(&mut self, frame: &mut GraphFrame, value: Option<ValueId>, span: Span) {
        let target = match frame.graph.kind() {
            GraphKind::Function => ReturnTarget::Local,
            // Every explicit return inside a lambda body is non-local: it
            // exits the enclosing named function, not the lambda.
            GraphKind::Lambda => ReturnTarget::NonLocal {
                graph: frame.function_graph,
                label: FlowGraph::EXIT_LABEL,
            },
        };
        let ret = frame.append(FlowGraphNode::Return {
            value,
            target,
            shadow: false,
            span,
        });
        if target == ReturnTarget::Local {
            let end = frame.graph.end();
            frame.graph.add_edge(ret, end, FlowGraphEdge::Normal);
        }
        frame.kill();
    }

    /// A local function declaration is dead as a statement: control steps
    /// over it through the jump's normal edge, while the declaration-dead
    /// node hangs off the jump on a dead chain that drains to the sink. The
    /// body becomes its own graph, linked by id only.
    fn connect_function_declaration(
        &mut self,
        frame: &mut GraphFrame,
        decl: &ty::TyLocalFunctionDeclaration,
    ) -> Result<(), CompileError> {
        let (body, completes_normally) = self.build_graph(
            decl.name.clone(),
            GraphKind::Function,
            &decl.body,
            None,
            &decl.span,
        )?;
        self.namespace.insert_function(
            &decl.name,
            FunctionNamespaceEntry {
                graph: body,
                completes_normally,
            },
        );
        let jump = frame.append(FlowGraphNode::Jump {
            body,
            span: decl.span.clone(),
        });
        let dead = frame.graph.add_node(FlowGraphNode::DeclarationDead {
            name: decl.name.clone(),
            body,
            span: decl.span.clone(),
        });
        let sink = frame.graph.sink();
        frame.graph.add_edge(jump, dead, FlowGraphEdge::Dead);
        frame.graph.add_edge(dead, sink, FlowGraphEdge::Dead);
        Ok(())
    }

    fn connect_expression(
        &mut self,
        frame: &mut GraphFrame,
        expr: &TyExpression,
    ) -> Result<ExprOutput, CompileError> {
        match &expr.expression {
            TyExpressionVariant::Literal(lit) => {
                let (_, value) = frame.append_producing(|value| FlowGraphNode::Read {
                    source: ReadSource::Constant(lit.clone()),
                    value,
                    span: expr.span.clone(),
                });
                Ok(ExprOutput::plain(value))
            }
            TyExpressionVariant::Variable { name } => {
                let (_, value) = frame.append_producing(|value| FlowGraphNode::Read {
                    source: ReadSource::Variable(name.clone()),
                    value,
                    span: expr.span.clone(),
                });
                Ok(ExprOutput::plain(value))
            }
            TyExpressionVariant::Reassignment { name, rhs } => {
                let rhs = self.connect_expression(frame, rhs)?;
                if !self.namespace.update_variable(name, rhs.value) {
                    return Err(CompileError::UnknownVariable {
                        var_name: name.clone(),
                        span: expr.span.clone(),
                    });
                }
                frame.append(FlowGraphNode::Write {
                    name: name.clone(),
                    rhs: rhs.value,
                    span: expr.span.clone(),
                });
                Ok(ExprOutput::plain(rhs.value))
            }
            TyExpressionVariant::StringTemplate { parts } => {
                let mut inputs = vec![];
                for part in parts {
                    inputs.push(self.connect_expression(frame, part)?.value);
                }
                let (_, value) = frame.append_producing(|value| FlowGraphNode::Magic {
                    kind: MagicKind::StringTemplate,
                    inputs,
                    value,
                    span: expr.span.clone(),
                });
                Ok(ExprOutput::plain(value))
            }
            TyExpressionVariant::Lambda(lambda) => self.connect_lambda(frame, lambda),
            TyExpressionVariant::Elvis { lhs, rhs } => {
                self.connect_elvis(frame, lhs, rhs, &expr.span)
            }
            TyExpressionVariant::Call {
                target,
                receiver,
                arguments,
                null_propagating,
            } => {
                if *null_propagating {
                    let receiver = receiver.as_deref().ok_or_else(|| {
                        CompileError::Internal(
                            "null-propagating call without receiver",
                            expr.span.clone(),
                        )
                    })?;
                    self.connect_safe_call(frame, target, receiver, arguments, &expr.span)
                } else {
                    self.connect_plain_call(frame, target, receiver.as_deref(), arguments, &expr.span)
                }
            }
        }
    }

    fn connect_lambda(
        &mut self,
        frame: &mut GraphFrame,
        lambda: &ty::TyLambda,
    ) -> Result<ExprOutput, CompileError> {
        let (body, completes_normally) = self.build_graph(
            Ident::new_no_span("<lambda>"),
            GraphKind::Lambda,
            &lambda.body,
            Some(frame.function_graph),
            &lambda.span,
        )?;
        let (_, value) = frame.append_producing(|value| FlowGraphNode::Magic {
            kind: MagicKind::LambdaValue(body),
            inputs: vec![],
            value,
            span: lambda.span.clone(),
        });
        Ok(ExprOutput {
            value,
            lambda: Some(LambdaInfo { completes_normally }),
        })
    }

    fn resolve_target(
        &self,
        target: &CallTarget,
        span: &Span,
    ) -> Result<CallTargetRef, CompileError> {
        match target {
            CallTarget::Local(name) => match self.namespace.get_function(name) {
                Some(entry) => Ok(CallTargetRef::Local {
                    name: name.clone(),
                    graph: entry.graph,
                }),
                None => Err(CompileError::UnknownCallable {
                    name: name.clone(),
                    span: span.clone(),
                }),
            },
            CallTarget::External(handle) => Ok(CallTargetRef::External(handle.clone())),
        }
    }

    fn connect_plain_call(
        &mut self,
        frame: &mut GraphFrame,
        target: &CallTarget,
        receiver: Option<&TyExpression>,
        arguments: &[TyExpression],
        span: &Span,
    ) -> Result<ExprOutput, CompileError> {
        let target = self.resolve_target(target, span)?;
        let receiver = match receiver {
            Some(expr) => Some(self.connect_expression(frame, expr)?.value),
            None => None,
        };
        let mut argument_values = vec![];
        let mut transfers_control = false;
        for argument in arguments {
            let out = self.connect_expression(frame, argument)?;
            if matches!(&out.lambda, Some(info) if !info.completes_normally) {
                transfers_control = true;
            }
            argument_values.push(out.value);
        }
        let (_, value) = frame.append_producing(|value| FlowGraphNode::Call {
            target,
            receiver,
            arguments: argument_values,
            null_propagating: false,
            value,
            span: span.clone(),
        });
        if transfers_control {
            // The lambda argument never completes normally, so the call's
            // result is never observed and control stops here.
            frame.graph.mark_value_non_local(value);
            frame.kill();
        }
        Ok(ExprOutput::plain(value))
    }

    /// `recv?.f(args)`: the branch falls through on the non-null path into
    /// argument evaluation and the call; the false edge skips to the label
    /// where an implicit null is produced. Both results meet at a merge.
    fn connect_safe_call(
        &mut self,
        frame: &mut GraphFrame,
        target: &CallTarget,
        receiver: &TyExpression,
        arguments: &[TyExpression],
        span: &Span,
    ) -> Result<ExprOutput, CompileError> {
        let target = self.resolve_target(target, span)?;
        let receiver_out = self.connect_expression(frame, receiver)?;
        let label = frame.new_label();
        let branch = frame.append(FlowGraphNode::BranchFalse {
            condition: receiver_out.value,
            target: label,
            span: span.clone(),
        });
        frame.pending = vec![(branch, FlowGraphEdge::TrueBranch)];
        if receiver.nullability != Nullability::NotNull {
            frame.register_label_edge(label, branch, FlowGraphEdge::FalseBranch);
        }

        let mut argument_values = vec![];
        let mut transfers_control = false;
        for argument in arguments {
            let out = self.connect_expression(frame, argument)?;
            if matches!(&out.lambda, Some(info) if !info.completes_normally) {
                transfers_control = true;
            }
            argument_values.push(out.value);
        }
        let (_, call_value) = frame.append_producing(|value| FlowGraphNode::Call {
            target,
            receiver: Some(receiver_out.value),
            arguments: argument_values,
            null_propagating: true,
            value,
            span: span.clone(),
        });
        if transfers_control {
            frame.graph.mark_value_non_local(call_value);
            frame.kill();
        }

        let call_cursor = frame.take_cursor();
        let call_completes = !call_cursor.pending.is_empty();
        let (_, null_value) = frame.append_bound_producing(label, |value| FlowGraphNode::Magic {
            kind: MagicKind::ImplicitNull,
            inputs: vec![],
            value,
            span: span.clone(),
        });
        frame.prepend_cursor(call_cursor);

        let mut inputs = vec![];
        if call_completes {
            inputs.push(call_value);
        }
        inputs.push(null_value);
        let (_, value) = frame.append_producing(|value| FlowGraphNode::Merge {
            inputs,
            value,
            span: span.clone(),
        });
        Ok(ExprOutput::plain(value))
    }

    /// `lhs ?: rhs`: the true branch jumps to the merge carrying the
    /// non-null lhs; the fall-through evaluates rhs. A lhs proven non-null
    /// emits no fall-through edge at all, leaving rhs on an orphan chain.
    fn connect_elvis(
        &mut self,
        frame: &mut GraphFrame,
        lhs: &TyExpression,
        rhs: &TyExpression,
        span: &Span,
    ) -> Result<ExprOutput, CompileError> {
        let lhs_out = self.connect_expression(frame, lhs)?;
        let label = frame.new_label();
        let branch = frame.append(FlowGraphNode::BranchTrue {
            condition: lhs_out.value,
            target: label,
            span: span.clone(),
        });
        frame.register_label_edge(label, branch, FlowGraphEdge::TrueBranch);
        if lhs.nullability == Nullability::NotNull {
            frame.kill();
        } else {
            frame.pending = vec![(branch, FlowGraphEdge::FalseBranch)];
        }

        let rhs_out = self.connect_expression(frame, rhs)?;
        let rhs_completes = !frame.pending.is_empty();

        let mut inputs = vec![lhs_out.value];
        if rhs_completes {
            inputs.push(rhs_out.value);
        }
        let (_, value) = frame.append_bound_producing(label, |value| FlowGraphNode::Merge {
            inputs,
            value,
            span: span.clone(),
        });
        Ok(ExprOutput::plain(value))
    }
}
