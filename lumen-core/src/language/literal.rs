use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Null,
    Unit,
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Unit => write!(f, "unit"),
            Literal::Boolean(b) => write!(f, "{b}"),
            Literal::Integer(i) => write!(f, "{i}"),
            Literal::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// What the external type checker proved about an expression's nullness.
/// The graph builder only consumes this; it never re-derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullability {
    /// Statically known to never be null.
    NotNull,
    /// May be null.
    Nullable,
    /// Nothing is known.
    Unknown,
}
