use core::fmt;

use lumen_types::{Ident, Span, Spanned};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileWarning {
    pub span: Span,
    pub warning_content: Warning,
}

impl Spanned for CompileWarning {
    fn span(&self) -> Span {
        self.span.clone()
    }
}

impl CompileWarning {
    pub fn to_friendly_warning_string(&self) -> String {
        self.warning_content.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Warning {
    UnreachableCode,
    DeadFunctionDeclaration {
        name: Ident,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Warning::*;
        match self {
            UnreachableCode => write!(f, "This code is unreachable."),
            DeadFunctionDeclaration { name } => write!(
                f,
                "Declaring \"{name}\" has no runtime effect; its body only runs when called."
            ),
        }
    }
}
