//! End-to-end analysis tests: typed trees in, graphs, dumps, and
//! diagnostics out. Expected dumps are written out in full; the builder is
//! deterministic, so they are stable across runs.

use std::sync::Arc;

use lumen_core::{
    analyze_program,
    control_flow_analysis::serialize::{dump_forest, dump_graph, graph_topology, parse_forest_dump},
    language::{
        ty::{CallTarget, TyAstNode, TyCodeBlock, TyExpression, TyFunctionDeclaration, TyProgram},
        Literal, Nullability,
    },
    reflection::CallableHandle,
};
use lumen_error::{error::CompileError, warning::Warning};
use lumen_types::{Ident, Span};
use pretty_assertions::assert_eq;

fn span(src: &Arc<str>, start: usize, end: usize) -> Span {
    Span::new(src.clone(), start, end, None).unwrap()
}

fn external(name: &str) -> CallTarget {
    CallTarget::External(CallableHandle::new(
        Ident::new_no_span("Builtins"),
        Ident::new_no_span(name),
        "(...) -> Unit",
    ))
}

fn program(body: Vec<TyAstNode>, span: Span) -> TyProgram {
    TyProgram {
        functions: vec![TyFunctionDeclaration {
            name: Ident::new_no_span("main"),
            body: TyCodeBlock { contents: body },
            span,
        }],
    }
}

/// A dead local function declaration followed by a safe call on a null
/// receiver.
fn safe_call_program() -> (Arc<str>, TyProgram) {
    let src: Arc<str> = "fun probe() { }\nnull?.run()\n".into();
    let decl = TyAstNode::function_decl(
        Ident::new(span(&src, 4, 9)),
        TyCodeBlock::default(),
        span(&src, 0, 15),
    );
    let call = TyAstNode::expression(TyExpression::safe_call(
        external("run"),
        TyExpression::literal(Literal::Null, span(&src, 16, 20)),
        vec![],
        span(&src, 16, 27),
    ));
    let program = program(vec![decl, call], span(&src, 0, 28));
    (src, program)
}

#[test]
fn safe_call_on_null_and_dead_declaration() {
    let (_, program) = safe_call_program();
    let analysis = analyze_program(&program);
    assert!(analysis.errors.is_empty());
    assert_eq!(analysis.forest.len(), 2);

    assert_eq!(analysis.warnings.len(), 1);
    assert_eq!(
        analysis.warnings[0].warning_content,
        Warning::DeadFunctionDeclaration {
            name: Ident::new_no_span("probe")
        }
    );
    assert_eq!(analysis.warnings[0].span.as_str(), "fun probe() { }");

    assert_eq!(
        dump_forest(&analysis.forest),
        "\
== main (g0) ==
-- line 1
    0: mark(1:1)
    1: jump(@g1)  NEXT:[D:2, 3]
    2: declaration-dead(probe @g1)  NEXT:[D:SINK]
-- line 2
    3: mark(2:1)
    4: read(null) -> v0
    5: branch-false(v0, L1)  NEXT:[T:6, F:7]
    6: call(run?., v0, []) -> v1  NEXT:[8]
L1: 7: magic(implicit-null) -> v2
    8: merge(v1, v2) -> v3  NEXT:[END]  PREV:[6, 7]
    <START>  NEXT:[0]
    <END>  NEXT:[SINK]
    <ERROR>  NEXT:[SINK]
    <SINK>  PREV:[ERROR, END, D:2]

== probe (g1) ==
    <START>  NEXT:[END]
    <END>  NEXT:[SINK]
    <ERROR>  NEXT:[SINK]
    <SINK>  PREV:[ERROR, END]
"
    );
}

/// `val x = "a" ?: fallback()` with a lhs proven non-null: the fall-through
/// edge is omitted entirely and the rhs hangs on an orphan chain.
fn elvis_program() -> (Arc<str>, TyProgram) {
    let src: Arc<str> = "val x = \"a\" ?: fallback()\n".into();
    let lhs = TyExpression::literal(Literal::String("a".to_string()), span(&src, 8, 11));
    let rhs = TyExpression::call(external("fallback"), vec![], span(&src, 15, 25));
    let elvis = TyExpression::elvis(lhs, rhs, span(&src, 8, 25));
    let decl = TyAstNode::variable_decl(Ident::new(span(&src, 4, 5)), elvis, span(&src, 0, 25));
    let program = program(vec![decl], span(&src, 0, 26));
    (src, program)
}

#[test]
fn elvis_with_non_null_lhs_leaves_rhs_unreachable() {
    let (_, program) = elvis_program();
    let analysis = analyze_program(&program);
    assert!(analysis.errors.is_empty());

    assert_eq!(analysis.warnings.len(), 1);
    assert_eq!(analysis.warnings[0].warning_content, Warning::UnreachableCode);
    assert_eq!(analysis.warnings[0].span.as_str(), "fallback()");

    let graph = analysis.forest.get(lumen_core::GraphId(0)).unwrap().as_ref().unwrap();
    assert_eq!(
        dump_graph(graph),
        "\
== main (g0) ==
-- line 1
    0: mark(1:1)
    1: read(\"a\") -> v0
    2: branch-true(v0, L1)  NEXT:[T:4]
    3: call(fallback, []) -> v1
L1: 4: merge(v0, v1) -> v2  PREV:[T:2, 3]
    5: declare(x, v2)  NEXT:[END]
    <START>  NEXT:[0]
    <END>  NEXT:[SINK]
    <ERROR>  NEXT:[SINK]
    <SINK>  PREV:[ERROR, END]
"
    );
}

/// A lambda argument that always returns non-locally: the call never
/// completes, its value is tagged, and everything after it is dead.
fn non_local_return_program() -> (Arc<str>, TyProgram) {
    let src: Arc<str> = "fun main() {\n  hold { return }\n  probe()\n}\n".into();
    let lambda_body = TyCodeBlock {
        contents: vec![TyAstNode::ret(None, span(&src, 22, 28))],
    };
    let hold = TyAstNode::expression(TyExpression::call(
        external("hold"),
        vec![TyExpression::lambda(lambda_body, span(&src, 20, 30))],
        span(&src, 15, 30),
    ));
    let probe = TyAstNode::expression(TyExpression::call(
        external("probe"),
        vec![],
        span(&src, 33, 40),
    ));
    let program = program(vec![hold, probe], span(&src, 0, 42));
    (src, program)
}

#[test]
fn non_local_return_kills_the_rest_of_the_body() {
    let (_, program) = non_local_return_program();
    let analysis = analyze_program(&program);
    assert!(analysis.errors.is_empty());
    assert_eq!(analysis.forest.len(), 2);

    // One warning for the whole dead statement; the shadow pair in the
    // lambda graph stays silent.
    assert_eq!(analysis.warnings.len(), 1);
    assert_eq!(analysis.warnings[0].warning_content, Warning::UnreachableCode);
    assert_eq!(analysis.warnings[0].span.as_str(), "probe()");

    assert_eq!(
        dump_forest(&analysis.forest),
        "\
== main (g0) ==
-- line 2
    0: mark(2:3)
    1: magic(lambda @g1) -> v0
    2: call(hold, [v0]) -> !v1  NEXT:[]
-- line 3
    3: mark(3:3)
    4: call(probe, []) -> v2  NEXT:[D:SINK]
    <START>  NEXT:[0]
    <END>  NEXT:[SINK]
    <ERROR>  NEXT:[SINK]
    <SINK>  PREV:[ERROR, END, D:4]

== <lambda> (g1) ==
-- line 2
    0: mark(2:10)
    1: return(@g0:L0)  NEXT:[]
    2: magic(shadow) -> !v0
    3: return(!v0)  NEXT:[END]
    <START>  NEXT:[0]
    <END>  NEXT:[SINK]
    <ERROR>  NEXT:[SINK]
    <SINK>  PREV:[ERROR, END]
"
    );
}

/// `val r = x?.f() ?: y` with unknown nullability: both joins stay live,
/// each merge consumes one value per contributing edge, and the two labels
/// are numbered in creation order.
#[test]
fn nested_joins_keep_creation_order_and_arity() {
    let src: Arc<str> = "val r = x?.f() ?: y\n".into();
    let lhs = TyExpression::safe_call(
        external("f"),
        TyExpression::variable(
            Ident::new(span(&src, 8, 9)),
            Nullability::Unknown,
            span(&src, 8, 9),
        ),
        vec![],
        span(&src, 8, 14),
    );
    let rhs = TyExpression::variable(
        Ident::new(span(&src, 18, 19)),
        Nullability::Unknown,
        span(&src, 18, 19),
    );
    let elvis = TyExpression::elvis(lhs, rhs, span(&src, 8, 19));
    let decl = TyAstNode::variable_decl(Ident::new(span(&src, 4, 5)), elvis, span(&src, 0, 19));
    let program = program(vec![decl], span(&src, 0, 20));
    let analysis = analyze_program(&program);
    assert!(analysis.errors.is_empty());
    assert!(analysis.warnings.is_empty());

    let graph = analysis
        .forest
        .get(lumen_core::GraphId(0))
        .unwrap()
        .as_ref()
        .unwrap();
    assert_eq!(
        dump_graph(graph),
        "\
== main (g0) ==
-- line 1
    0: mark(1:1)
    1: read(x) -> v0
    2: branch-false(v0, L1)  NEXT:[T:3, F:4]
    3: call(f?., v0, []) -> v1  NEXT:[5]
L1: 4: magic(implicit-null) -> v2
    5: merge(v1, v2) -> v3  PREV:[3, 4]
    6: branch-true(v3, L2)  NEXT:[F:7, T:8]
    7: read(y) -> v4
L2: 8: merge(v3, v4) -> v5  PREV:[T:6, 7]
    9: declare(r, v5)  NEXT:[END]
    <START>  NEXT:[0]
    <END>  NEXT:[SINK]
    <ERROR>  NEXT:[SINK]
    <SINK>  PREV:[ERROR, END]
"
    );
}

/// `val r = x?.let { return true } ?: false` with `x` proven non-null and a
/// lambda argument that always returns non-locally. The null-skip edge is
/// omitted, so the implicit-null path is an orphan and its merge takes a
/// single input; the call itself never completes, so everything after it is
/// one dead region.
fn non_null_receiver_program() -> (Arc<str>, TyProgram) {
    let src: Arc<str> = "val r = x?.let { return true } ?: false\n".into();
    let lambda_body = TyCodeBlock {
        contents: vec![TyAstNode::ret(
            Some(TyExpression::literal(
                Literal::Boolean(true),
                span(&src, 24, 28),
            )),
            span(&src, 17, 28),
        )],
    };
    let lhs = TyExpression::safe_call(
        external("let"),
        TyExpression::variable(
            Ident::new(span(&src, 8, 9)),
            Nullability::NotNull,
            span(&src, 8, 9),
        ),
        vec![TyExpression::lambda(lambda_body, span(&src, 15, 30))],
        span(&src, 8, 30),
    );
    let rhs = TyExpression::literal(Literal::Boolean(false), span(&src, 34, 39));
    let elvis = TyExpression::elvis(lhs, rhs, span(&src, 8, 39));
    let decl = TyAstNode::variable_decl(Ident::new(span(&src, 4, 5)), elvis, span(&src, 0, 39));
    let program = program(vec![decl], span(&src, 0, 40));
    (src, program)
}

#[test]
fn non_null_receiver_keeps_the_null_path_an_orphan() {
    let (_, program) = non_null_receiver_program();
    let analysis = analyze_program(&program);
    assert!(analysis.errors.is_empty());
    assert_eq!(analysis.forest.len(), 2);

    // The branch, the orphan joins, and the declaration collapse into one
    // dead region reported once at the statement span.
    assert_eq!(analysis.warnings.len(), 1);
    assert_eq!(analysis.warnings[0].warning_content, Warning::UnreachableCode);
    assert_eq!(
        analysis.warnings[0].span.as_str(),
        "val r = x?.let { return true } ?: false"
    );

    assert_eq!(
        dump_forest(&analysis.forest),
        "\
== main (g0) ==
-- line 1
    0: mark(1:1)
    1: read(x) -> v0
    2: branch-false(v0, L1)  NEXT:[T:3]
    3: magic(lambda @g1) -> v1
    4: call(let?., v0, [v1]) -> !v2  NEXT:[]
L1: 5: magic(implicit-null) -> v3
    6: merge(v3) -> v4
    7: branch-true(v4, L2)  NEXT:[F:8, T:9]
    8: read(false) -> v5
L2: 9: merge(v4, v5) -> v6  PREV:[T:7, 8]
    10: declare(r, v6)  NEXT:[D:SINK]
    <START>  NEXT:[0]
    <END>  NEXT:[SINK]
    <ERROR>  NEXT:[SINK]
    <SINK>  PREV:[ERROR, END, D:10]

== <lambda> (g1) ==
-- line 1
    0: mark(1:18)
    1: read(true) -> v0
    2: return(v0, @g0:L0)  NEXT:[]
    3: magic(shadow) -> !v1
    4: return(!v1)  NEXT:[END]
    <START>  NEXT:[0]
    <END>  NEXT:[SINK]
    <ERROR>  NEXT:[SINK]
    <SINK>  PREV:[ERROR, END]
"
    );
}

#[test]
fn dumps_round_trip_through_the_parser() {
    for (_, program) in [
        safe_call_program(),
        elvis_program(),
        non_local_return_program(),
        non_null_receiver_program(),
    ] {
        let analysis = analyze_program(&program);
        let parsed = parse_forest_dump(&dump_forest(&analysis.forest)).unwrap();
        let expected: Vec<_> = analysis.forest.graphs().map(graph_topology).collect();
        assert_eq!(parsed, expected);
    }
}

#[test]
fn analysis_is_deterministic() {
    let (_, program) = safe_call_program();
    let first = dump_forest(&analyze_program(&program).forest);
    let second = dump_forest(&analyze_program(&program).forest);
    assert_eq!(first, second);
}

#[test]
fn unknown_callable_is_scoped_to_its_graph() {
    let src: Arc<str> = "missing()\nok()\n".into();
    let broken = TyFunctionDeclaration {
        name: Ident::new_no_span("broken"),
        body: TyCodeBlock {
            contents: vec![TyAstNode::expression(TyExpression::call(
                CallTarget::Local(Ident::new(span(&src, 0, 7))),
                vec![],
                span(&src, 0, 9),
            ))],
        },
        span: span(&src, 0, 9),
    };
    let fine = TyFunctionDeclaration {
        name: Ident::new_no_span("fine"),
        body: TyCodeBlock {
            contents: vec![TyAstNode::expression(TyExpression::call(
                external("ok"),
                vec![],
                span(&src, 10, 14),
            ))],
        },
        span: span(&src, 10, 14),
    };
    let analysis = analyze_program(&TyProgram {
        functions: vec![broken, fine],
    });

    assert_eq!(analysis.errors.len(), 1);
    assert!(matches!(
        &analysis.errors[0],
        CompileError::UnknownCallable { name, .. } if name.as_str() == "missing"
    ));
    assert!(analysis.forest.get(lumen_core::GraphId(0)).unwrap().is_err());
    assert!(analysis.forest.get(lumen_core::GraphId(1)).unwrap().is_ok());
}

#[test]
fn reassignment_to_unknown_variable_is_a_fault() {
    let src: Arc<str> = "x = 1\n".into();
    let rhs = TyExpression::literal(Literal::Integer(1), span(&src, 4, 5));
    let write = TyExpression {
        expression: lumen_core::language::ty::TyExpressionVariant::Reassignment {
            name: Ident::new(span(&src, 0, 1)),
            rhs: Box::new(rhs),
        },
        nullability: Nullability::NotNull,
        span: span(&src, 0, 5),
    };
    let program = program(
        vec![TyAstNode::expression(write)],
        span(&src, 0, 6),
    );
    let analysis = analyze_program(&program);
    assert_eq!(analysis.errors.len(), 1);
    assert!(matches!(
        &analysis.errors[0],
        CompileError::UnknownVariable { var_name, .. } if var_name.as_str() == "x"
    ));
}

/// Declarations, reads, writes, and a string template flowing through one
/// straight-line body.
#[test]
fn straight_line_statements_chain_implicitly() {
    let src: Arc<str> = "val a = 1\na = 2\nlog(\"{a}\")\n".into();
    let decl = TyAstNode::variable_decl(
        Ident::new(span(&src, 4, 5)),
        TyExpression::literal(Literal::Integer(1), span(&src, 8, 9)),
        span(&src, 0, 9),
    );
    let write = TyAstNode::expression(TyExpression {
        expression: lumen_core::language::ty::TyExpressionVariant::Reassignment {
            name: Ident::new(span(&src, 10, 11)),
            rhs: Box::new(TyExpression::literal(
                Literal::Integer(2),
                span(&src, 14, 15),
            )),
        },
        nullability: Nullability::NotNull,
        span: span(&src, 10, 15),
    });
    let template = TyExpression {
        expression: lumen_core::language::ty::TyExpressionVariant::StringTemplate {
            parts: vec![TyExpression::variable(
                Ident::new(span(&src, 22, 23)),
                Nullability::NotNull,
                span(&src, 22, 23),
            )],
        },
        nullability: Nullability::NotNull,
        span: span(&src, 20, 25),
    };
    let log = TyAstNode::expression(TyExpression::call(
        external("log"),
        vec![template],
        span(&src, 16, 26),
    ));
    let program = program(vec![decl, write, log], span(&src, 0, 27));
    let analysis = analyze_program(&program);
    assert!(analysis.errors.is_empty());
    assert!(analysis.warnings.is_empty());

    let graph = analysis
        .forest
        .get(lumen_core::GraphId(0))
        .unwrap()
        .as_ref()
        .unwrap();
    assert_eq!(
        dump_graph(graph),
        "\
== main (g0) ==
-- line 1
    0: mark(1:1)
    1: read(1) -> v0
    2: declare(a, v0)
-- line 2
    3: mark(2:1)
    4: read(2) -> v1
    5: write(a, v1)
-- line 3
    6: mark(3:1)
    7: read(a) -> v2
    8: magic(string-template, v2) -> v3
    9: call(log, [v3]) -> v4  NEXT:[END]
    <START>  NEXT:[0]
    <END>  NEXT:[SINK]
    <ERROR>  NEXT:[SINK]
    <SINK>  PREV:[ERROR, END]
"
    );
}
