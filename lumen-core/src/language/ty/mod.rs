//! The validated statement tree handed to the control flow analysis.
//!
//! This is the output shape of the external parser and type checker: every
//! node carries the span it was derived from, nullability facts are already
//! attached to expressions, and name resolution errors have been rejected
//! upstream. The graph builder walks this tree and never re-validates it.

mod expression;

pub use expression::*;

use lumen_types::{Ident, Span, Spanned};

#[derive(Debug, Clone, PartialEq)]
pub struct TyProgram {
    pub functions: Vec<TyFunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TyFunctionDeclaration {
    pub name: Ident,
    pub body: TyCodeBlock,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TyCodeBlock {
    pub contents: Vec<TyAstNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TyAstNode {
    pub content: TyAstNodeContent,
    pub span: Span,
}

impl Spanned for TyAstNode {
    fn span(&self) -> Span {
        self.span.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TyAstNodeContent {
    Expression(TyExpression),
    ReturnStatement(TyReturnStatement),
    Declaration(TyDeclaration),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TyDeclaration {
    Variable(TyVariableDeclaration),
    /// A local function or named lambda. Dead as a statement; its body lives
    /// in its own graph and is only reachable through call sites.
    Function(TyLocalFunctionDeclaration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TyVariableDeclaration {
    pub name: Ident,
    pub body: TyExpression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TyLocalFunctionDeclaration {
    pub name: Ident,
    pub body: TyCodeBlock,
    pub span: Span,
}

/// `return` at statement level. Inside a lambda literal this is a non-local
/// return: its target is the enclosing function's exit, not the lambda's own.
/// The builder decides which from context; the tree does not distinguish.
#[derive(Debug, Clone, PartialEq)]
pub struct TyReturnStatement {
    pub expr: Option<TyExpression>,
}

impl TyAstNode {
    pub fn expression(expr: TyExpression) -> TyAstNode {
        let span = expr.span.clone();
        TyAstNode {
            content: TyAstNodeContent::Expression(expr),
            span,
        }
    }

    pub fn ret(expr: Option<TyExpression>, span: Span) -> TyAstNode {
        TyAstNode {
            content: TyAstNodeContent::ReturnStatement(TyReturnStatement { expr }),
            span,
        }
    }

    pub fn variable_decl(name: Ident, body: TyExpression, span: Span) -> TyAstNode {
        TyAstNode {
            content: TyAstNodeContent::Declaration(TyDeclaration::Variable(
                TyVariableDeclaration { name, body },
            )),
            span,
        }
    }

    pub fn function_decl(name: Ident, body: TyCodeBlock, span: Span) -> TyAstNode {
        TyAstNode {
            content: TyAstNodeContent::Declaration(TyDeclaration::Function(
                TyLocalFunctionDeclaration {
                    name,
                    body,
                    span: span.clone(),
                },
            )),
            span,
        }
    }
}
