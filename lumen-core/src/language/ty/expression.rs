use super::TyCodeBlock;
use crate::{
    language::{Literal, Nullability},
    reflection::CallableHandle,
};
use lumen_types::{Ident, Span, Spanned};

#[derive(Debug, Clone, PartialEq)]
pub struct TyExpression {
    pub expression: TyExpressionVariant,
    pub nullability: Nullability,
    pub span: Span,
}

impl Spanned for TyExpression {
    fn span(&self) -> Span {
        self.span.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TyExpressionVariant {
    Literal(Literal),
    Variable {
        name: Ident,
    },
    Reassignment {
        name: Ident,
        rhs: Box<TyExpression>,
    },
    /// An interpolated string; each part is evaluated in order and the
    /// assembled string is a synthesized value.
    StringTemplate {
        parts: Vec<TyExpression>,
    },
    Call {
        target: CallTarget,
        receiver: Option<Box<TyExpression>>,
        arguments: Vec<TyExpression>,
        /// `x?.f(...)`: the call only happens when the receiver is non-null;
        /// a null receiver short-circuits to an implicit null result.
        null_propagating: bool,
    },
    /// `lhs ?: rhs`: lhs if non-null, otherwise rhs.
    Elvis {
        lhs: Box<TyExpression>,
        rhs: Box<TyExpression>,
    },
    /// A lambda literal in expression position. Its body becomes a separate
    /// graph; the literal itself only produces the callable value.
    Lambda(TyLambda),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TyLambda {
    pub body: TyCodeBlock,
    pub span: Span,
}

/// Who a call invokes: a locally declared function (resolved to its graph at
/// build time) or an opaque external callable described only by its handle.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    Local(Ident),
    External(CallableHandle),
}

impl CallTarget {
    pub fn name(&self) -> &Ident {
        match self {
            CallTarget::Local(name) => name,
            CallTarget::External(handle) => handle.name(),
        }
    }
}

impl TyExpression {
    pub fn literal(value: Literal, span: Span) -> TyExpression {
        let nullability = match value {
            Literal::Null => Nullability::Nullable,
            _ => Nullability::NotNull,
        };
        TyExpression {
            expression: TyExpressionVariant::Literal(value),
            nullability,
            span,
        }
    }

    pub fn variable(name: Ident, nullability: Nullability, span: Span) -> TyExpression {
        TyExpression {
            expression: TyExpressionVariant::Variable { name },
            nullability,
            span,
        }
    }

    pub fn lambda(body: TyCodeBlock, span: Span) -> TyExpression {
        TyExpression {
            expression: TyExpressionVariant::Lambda(TyLambda {
                body,
                span: span.clone(),
            }),
            nullability: Nullability::NotNull,
            span,
        }
    }

    pub fn call(
        target: CallTarget,
        arguments: Vec<TyExpression>,
        span: Span,
    ) -> TyExpression {
        TyExpression {
            expression: TyExpressionVariant::Call {
                target,
                receiver: None,
                arguments,
                null_propagating: false,
            },
            nullability: Nullability::Unknown,
            span,
        }
    }

    pub fn safe_call(
        target: CallTarget,
        receiver: TyExpression,
        arguments: Vec<TyExpression>,
        span: Span,
    ) -> TyExpression {
        TyExpression {
            expression: TyExpressionVariant::Call {
                target,
                receiver: Some(Box::new(receiver)),
                arguments,
                null_propagating: true,
            },
            nullability: Nullability::Nullable,
            span,
        }
    }

    pub fn elvis(lhs: TyExpression, rhs: TyExpression, span: Span) -> TyExpression {
        let nullability = rhs.nullability;
        TyExpression {
            expression: TyExpressionVariant::Elvis {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            nullability,
            span,
        }
    }
}
