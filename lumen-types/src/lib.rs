pub mod ident;
pub mod span;

pub use ident::*;
pub use span::*;

/// Anything that carries a [Span] pointing back into the source it was derived from.
pub trait Spanned {
    fn span(&self) -> Span;
}
