pub mod literal;
pub mod ty;

pub use literal::*;
